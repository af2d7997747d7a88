use crate::auth::{AuthProvider, AuthServiceClient};
use crate::metrics::{GATEWAY_UPDATES, SINK_FAILURES, STRING_TAG_WRITES, TAG_WRITES};
use crate::services::ServiceEndpoints;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use std::time::Duration;
use tag_core::{EngineUpdate, GatewaySink, PersistenceSink, SinkError, TagWrite};
use tracing::{debug, instrument};

pub const TAG_WRITE_PATH: &str = "/api/tags/write";
pub const STRING_TAG_WRITE_PATH: &str = "/api/tags/str/write";
pub const ENGINE_UPDATE_PATH: &str = "/api/opcua_server/engine";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the DAQ service, acting as both the persistence sink and
/// the supervisory gateway sink.
pub struct DaqClient {
    client: Client,
    base_url: String,
    auth: Option<Arc<dyn AuthProvider>>,
}

fn transport(e: reqwest::Error) -> SinkError {
    SinkError::Transport(e.to_string())
}

impl DaqClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build().map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth: None,
        })
    }

    /// Client for `endpoints`, with auth-service headers when `app_auth` is set.
    pub fn from_endpoints(
        endpoints: &ServiceEndpoints,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = Self::new(endpoints.daq_url(), timeout)?;
        if !endpoints.app_auth {
            return Ok(client);
        }
        let auth = AuthServiceClient::new(&endpoints.auth_url(), timeout)
            .map_err(|e| SinkError::Auth(e.to_string()))?;
        Ok(client.with_auth(Arc::new(auth)))
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, sink: &'static str, request: RequestBuilder) -> Result<(), SinkError> {
        let result = request.send().map_err(transport).and_then(|response| {
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(SinkError::Status {
                    status: status.as_u16(),
                })
            }
        });
        if result.is_err() {
            SINK_FAILURES.with_label_values(&[sink]).inc();
        }
        result
    }
}

impl PersistenceSink for DaqClient {
    #[instrument(skip(self, write), fields(tag = %write.name))]
    fn write_tag(&self, write: &TagWrite) -> Result<(), SinkError> {
        TAG_WRITES.inc();
        let request = self.client.post(self.url(TAG_WRITE_PATH)).json(write);
        self.send("persistence", request)
    }

    #[instrument(skip(self, write), fields(tag = %write.name))]
    fn write_string_tag(&self, write: &TagWrite) -> Result<(), SinkError> {
        STRING_TAG_WRITES.inc();
        let request = self.client.post(self.url(STRING_TAG_WRITE_PATH)).json(write);
        self.send("persistence", request)
    }
}

impl GatewaySink for DaqClient {
    fn update_engine(&self, update: &EngineUpdate) -> Result<(), SinkError> {
        GATEWAY_UPDATES.inc();
        let mut request = self.client.put(self.url(ENGINE_UPDATE_PATH)).json(update);
        if let Some(auth) = &self.auth {
            let header = auth.authorization().map_err(|e| {
                SINK_FAILURES.with_label_values(&["gateway"]).inc();
                SinkError::Auth(e.to_string())
            })?;
            request = request.header(AUTHORIZATION, header);
        }
        debug!(folder = ?update.folder_struct, "pushing engine update");
        self.send("gateway", request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use tag_core::{Snapshot, TagValue};
    use tiny_http::{Response, Server};

    #[derive(Debug)]
    struct Captured {
        method: String,
        url: String,
        body: serde_json::Value,
        authorization: Option<String>,
    }

    /// Answers `count` requests with `status`, reporting each one.
    fn mock_daq(status: u16, count: usize) -> (String, mpsc::Receiver<Captured>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for _ in 0..count {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let mut body = String::new();
                request.as_reader().read_to_string(&mut body).unwrap();
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.to_string());
                let captured = Captured {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    body: serde_json::from_str(&body).unwrap_or_default(),
                    authorization,
                };
                let _ = request.respond(Response::from_string("{}").with_status_code(status));
                let _ = tx.send(captured);
            }
        });
        (format!("http://{addr}"), rx)
    }

    struct FixedToken(Result<&'static str, ()>);

    impl AuthProvider for FixedToken {
        fn authorization(&self) -> Result<String, AuthError> {
            self.0
                .map(|token| format!("Bearer {token}"))
                .map_err(|_| AuthError::Service("status 401".into()))
        }
    }

    fn update() -> EngineUpdate {
        let mut engine = Snapshot::new();
        engine.insert("level".into(), TagValue::from(42.0));
        EngineUpdate::new("Plant", "Tank-01", engine)
    }

    #[test]
    fn numeric_and_string_writes_hit_their_endpoints() {
        let (url, rx) = mock_daq(200, 2);
        let client = DaqClient::new(url, DEFAULT_TIMEOUT).unwrap();

        client
            .write_tag(&TagWrite {
                name: "Plant.level".into(),
                value: TagValue::from(42.5),
            })
            .unwrap();
        client
            .write_string_tag(&TagWrite {
                name: "state".into(),
                value: TagValue::from("filling"),
            })
            .unwrap();

        let numeric = rx.recv().unwrap();
        assert_eq!(numeric.method, "POST");
        assert_eq!(numeric.url, TAG_WRITE_PATH);
        assert_eq!(
            numeric.body,
            serde_json::json!({"name": "Plant.level", "value": 42.5})
        );

        let text = rx.recv().unwrap();
        assert_eq!(text.url, STRING_TAG_WRITE_PATH);
        assert_eq!(text.body["value"], "filling");
    }

    #[test]
    fn gateway_update_is_a_put_with_folder_struct() {
        let (url, rx) = mock_daq(200, 1);
        let client = DaqClient::new(url, DEFAULT_TIMEOUT).unwrap();
        client.update_engine(&update()).unwrap();

        let captured = rx.recv().unwrap();
        assert_eq!(captured.method, "PUT");
        assert_eq!(captured.url, ENGINE_UPDATE_PATH);
        assert_eq!(
            captured.body,
            serde_json::json!({
                "folder_struct": ["Plant", "Engines", "Tank-01"],
                "engine": {"level": 42.0}
            })
        );
        assert!(captured.authorization.is_none());
    }

    #[test]
    fn gateway_carries_bearer_token_when_authenticated() {
        let (url, rx) = mock_daq(200, 1);
        let client = DaqClient::new(url, DEFAULT_TIMEOUT)
            .unwrap()
            .with_auth(Arc::new(FixedToken(Ok("abc"))));
        client.update_engine(&update()).unwrap();
        assert_eq!(rx.recv().unwrap().authorization.as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn auth_failure_skips_the_request() {
        let (url, rx) = mock_daq(200, 1);
        let client = DaqClient::new(url, DEFAULT_TIMEOUT)
            .unwrap()
            .with_auth(Arc::new(FixedToken(Err(()))));
        assert!(matches!(
            client.update_engine(&update()),
            Err(SinkError::Auth(_))
        ));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn error_status_is_reported() {
        let (url, _rx) = mock_daq(503, 1);
        let client = DaqClient::new(url, DEFAULT_TIMEOUT).unwrap();
        assert!(matches!(
            client.update_engine(&update()),
            Err(SinkError::Status { status: 503 })
        ));
    }

    #[test]
    fn unreachable_service_is_a_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client =
            DaqClient::new(format!("http://127.0.0.1:{port}"), Duration::from_millis(500)).unwrap();
        let result = client.write_tag(&TagWrite {
            name: "x".into(),
            value: TagValue::from(1),
        });
        assert!(matches!(result, Err(SinkError::Transport(_))));
    }

    #[test]
    fn endpoints_with_app_auth_fetch_token_from_auth_service() {
        let auth = Server::http("127.0.0.1:0").unwrap();
        let auth_addr = auth.server_addr().to_ip().unwrap();
        thread::spawn(move || {
            if let Ok(request) = auth.recv() {
                assert_eq!(request.url(), "/api/auth/token");
                let _ = request.respond(Response::from_string(r#"{"token":"t0k"}"#));
            }
        });
        let (daq_url, rx) = mock_daq(200, 1);
        let daq_addr: std::net::SocketAddr = daq_url.trim_start_matches("http://").parse().unwrap();

        let endpoints = ServiceEndpoints {
            daq_host: daq_addr.ip().to_string(),
            daq_port: daq_addr.port(),
            auth_host: auth_addr.ip().to_string(),
            auth_port: auth_addr.port(),
            app_auth: true,
        };
        let client = DaqClient::from_endpoints(&endpoints, DEFAULT_TIMEOUT).unwrap();
        client.update_engine(&update()).unwrap();
        assert_eq!(rx.recv().unwrap().authorization.as_deref(), Some("Bearer t0k"));
    }
}
