use crate::auth::{AuthConfig, TokenValidator};
use crate::hub::{unix_us, NotificationHub};
use crate::metrics::{BRIDGE_AUTH_FAILURES, BRIDGE_CLIENTS};
use crate::protocol::{HelloMsg, IncomingMessage, NotificationMsg, PongMsg, ProtocolVersion};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Unsent bytes a subscriber may hold before the bridge stops draining its
/// hub receiver. Past this point the receiver lags and drops the oldest
/// notifications.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Longest incoming line accepted from a subscriber.
const MAX_LINE_BYTES: usize = 16 * 1024;

pub struct BridgeConfig {
    pub bind_addr: String,
    pub auth: AuthConfig,
    /// Hold notifications back until the subscriber has said hello.
    pub require_hello: bool,
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7000".to_string(),
            auth: AuthConfig::default(),
            require_hello: false,
            poll_interval: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Default)]
struct SubscriberState {
    hello_seen: bool,
    client_id: Option<String>,
    /// Empty means every event.
    events: Vec<String>,
}

impl SubscriberState {
    fn wants(&self, event: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event)
    }
}

struct Subscriber {
    addr: SocketAddr,
    stream: TcpStream,
    notifications: broadcast::Receiver<NotificationMsg>,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    send_offset: usize,
    state: SubscriberState,
}

impl Subscriber {
    fn new(addr: SocketAddr, stream: TcpStream, hub: &NotificationHub) -> Self {
        Self {
            addr,
            stream,
            notifications: hub.subscribe(),
            recv_buf: Vec::with_capacity(1024),
            send_buf: Vec::new(),
            send_offset: 0,
            state: SubscriberState::default(),
        }
    }

    fn pending(&self) -> usize {
        self.send_buf.len() - self.send_offset
    }

    fn queue_line<T: serde::Serialize>(&mut self, msg: &T) {
        if self.pending() > MAX_PENDING_BYTES {
            debug!(client_addr = %self.addr, "Bridge send buffer full, dropping line");
            return;
        }
        match serde_json::to_vec(msg) {
            Ok(mut line) => {
                line.push(b'\n');
                self.send_buf.extend_from_slice(&line);
            }
            Err(e) => warn!(error = %e, "failed to encode bridge message"),
        }
    }

    /// Returns false once the connection is gone.
    fn read_lines(&mut self, gate: &Gate) -> bool {
        let mut temp = [0u8; 1024];
        loop {
            match self.stream.read(&mut temp) {
                Ok(0) => return false,
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&temp[..n]);
                    if self.recv_buf.len() >= MAX_LINE_BYTES {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(client_addr = %self.addr, error = %err, "Bridge read error");
                    return false;
                }
            }
        }

        while let Some(pos) = self.recv_buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.recv_buf.drain(..=pos).collect();
            let Ok(text) = std::str::from_utf8(&line) else {
                continue;
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            match IncomingMessage::parse(trimmed) {
                Some(IncomingMessage::Hello(hello)) => gate.admit(&hello, &mut self.state),
                Some(IncomingMessage::Ping(ping)) => {
                    let pong = PongMsg {
                        msg_type: "pong",
                        protocol_version: ProtocolVersion::v1(),
                        sequence: ping.sequence,
                        unix_us: unix_us(),
                    };
                    self.queue_line(&pong);
                }
                None => debug!(client_addr = %self.addr, line = trimmed, "ignoring bridge line"),
            }
        }

        if self.recv_buf.len() >= MAX_LINE_BYTES {
            warn!(
                client_addr = %self.addr,
                buffered = self.recv_buf.len(),
                "Bridge line too long, disconnecting"
            );
            return false;
        }
        true
    }

    /// Moves pending hub messages into the send buffer. Messages that arrive
    /// before the subscriber is admitted are dropped. Stops while the send
    /// buffer is over [`MAX_PENDING_BYTES`], leaving the rest in the receiver.
    fn collect_notifications(&mut self, gate: &Gate) {
        let admitted = !gate.needs_hello() || self.state.hello_seen;
        while self.pending() <= MAX_PENDING_BYTES {
            match self.notifications.try_recv() {
                Ok(msg) => {
                    if admitted && self.state.wants(&msg.event) {
                        self.queue_line(&msg);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(client_addr = %self.addr, skipped, "Bridge subscriber lagging");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Returns false once the connection is gone.
    fn flush(&mut self) -> bool {
        while self.send_offset < self.send_buf.len() {
            match self.stream.write(&self.send_buf[self.send_offset..]) {
                Ok(0) => return false,
                Ok(n) => self.send_offset += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.send_buf.drain(..self.send_offset);
                    self.send_offset = 0;
                    return true;
                }
                Err(err) => {
                    warn!(client_addr = %self.addr, error = %err, "Bridge write error");
                    return false;
                }
            }
        }
        self.send_buf.clear();
        self.send_offset = 0;
        true
    }
}

/// Admission rules shared by every subscriber.
struct Gate {
    validator: Option<TokenValidator>,
    require_hello: bool,
}

impl Gate {
    fn needs_hello(&self) -> bool {
        self.require_hello || self.validator.is_some()
    }

    fn admit(&self, hello: &HelloMsg, state: &mut SubscriberState) {
        if !hello.protocol_version.is_supported() {
            warn!(
                major = hello.protocol_version.major,
                minor = hello.protocol_version.minor,
                "Unsupported protocol version"
            );
            return;
        }

        if let Some(validator) = &self.validator {
            let client_id = hello.client_id.as_deref().unwrap_or_default();
            match &hello.auth_token {
                Some(token) => {
                    if let Err(e) = validator.validate(token, client_id) {
                        warn!(error = %e, client_id, "Invalid subscriber token");
                        BRIDGE_AUTH_FAILURES.inc();
                        return;
                    }
                }
                None => {
                    warn!(client_id, "Missing subscriber token");
                    BRIDGE_AUTH_FAILURES.inc();
                    return;
                }
            }
        }

        state.hello_seen = true;
        state.client_id = hello.client_id.clone();
        state.events = hello.events.clone();
        info!(
            client_id = ?state.client_id,
            events = ?state.events,
            "Bridge subscriber admitted"
        );
    }
}

/// Streams hub notifications to TCP subscribers as JSON lines until `stop`
/// is set.
pub fn run_bridge(
    hub: NotificationHub,
    config: BridgeConfig,
    stop: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)?;
    listener.set_nonblocking(true)?;

    info!(
        addr = %config.bind_addr,
        auth = config.auth.enabled,
        require_hello = config.require_hello,
        "Bridge listening"
    );

    let gate = Gate {
        validator: config
            .auth
            .enabled
            .then(|| TokenValidator::from_config(&config.auth)),
        require_hello: config.require_hello,
    };
    let mut subscribers: Vec<Subscriber> = Vec::new();

    while !stop.load(Ordering::Relaxed) {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(client_addr = %addr, error = %e, "Dropping bridge client");
                        continue;
                    }
                    info!(client_addr = %addr, "Bridge client connected");
                    subscribers.push(Subscriber::new(addr, stream, &hub));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("Bridge accept error: {}", err);
                    break;
                }
            }
        }

        subscribers.retain_mut(|sub| {
            let alive = sub.read_lines(&gate) && {
                sub.collect_notifications(&gate);
                sub.flush()
            };
            if !alive {
                info!(client_addr = %sub.addr, "Bridge client disconnected");
            }
            alive
        });
        BRIDGE_CLIENTS.set(subscribers.len() as i64);

        std::thread::sleep(config.poll_interval);
    }

    BRIDGE_CLIENTS.set(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::thread;
    use std::time::Instant;
    use tag_core::fanout::{ATTRIBUTE_CHANGED, MACHINE_CHANGED};

    struct Running {
        addr: String,
        hub: NotificationHub,
        stop: Arc<AtomicBool>,
        handle: Option<thread::JoinHandle<std::io::Result<()>>>,
    }

    impl Running {
        fn start(auth: AuthConfig, require_hello: bool) -> Self {
            let port = TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap()
                .port();
            let addr = format!("127.0.0.1:{port}");
            let hub = NotificationHub::new();
            let stop = Arc::new(AtomicBool::new(false));
            let config = BridgeConfig {
                bind_addr: addr.clone(),
                auth,
                require_hello,
                ..Default::default()
            };
            let handle = {
                let hub = hub.clone();
                let stop = Arc::clone(&stop);
                thread::spawn(move || run_bridge(hub, config, stop))
            };
            Self {
                addr,
                hub,
                stop,
                handle: Some(handle),
            }
        }

        fn connect(&self) -> (TcpStream, BufReader<TcpStream>) {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if let Ok(stream) = TcpStream::connect(&self.addr) {
                    stream
                        .set_read_timeout(Some(Duration::from_millis(500)))
                        .unwrap();
                    let reader = BufReader::new(stream.try_clone().unwrap());
                    return (stream, reader);
                }
                assert!(Instant::now() < deadline, "bridge never came up");
                thread::sleep(Duration::from_millis(20));
            }
        }

        /// Publishes until the bridge has registered `count` subscribers.
        fn wait_for_subscribers(&self, count: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.hub.subscriber_count() < count {
                assert!(Instant::now() < deadline, "subscriber never registered");
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    impl Drop for Running {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (server, client)
    }

    fn open_gate() -> Gate {
        Gate {
            validator: None,
            require_hello: false,
        }
    }

    fn read_msg(reader: &mut BufReader<TcpStream>) -> Option<serde_json::Value> {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(n) if n > 0 => serde_json::from_str(&line).ok(),
            _ => None,
        }
    }

    #[test]
    fn open_bridge_streams_to_every_subscriber() {
        let bridge = Running::start(AuthConfig::default(), false);
        let (_a, mut first) = bridge.connect();
        let (_b, mut second) = bridge.connect();
        bridge.wait_for_subscribers(2);

        bridge
            .hub
            .publish(MACHINE_CHANGED, serde_json::json!({"level": 1.0}));

        for reader in [&mut first, &mut second] {
            let msg = read_msg(reader).expect("notification");
            assert_eq!(msg["type"], "notification");
            assert_eq!(msg["event"], MACHINE_CHANGED);
            assert_eq!(msg["data"]["level"], 1.0);
            assert_eq!(msg["protocol_version"]["major"], 1);
        }
    }

    #[test]
    fn hello_filters_events() {
        let bridge = Running::start(AuthConfig::default(), true);
        let (mut stream, mut reader) = bridge.connect();
        bridge.wait_for_subscribers(1);
        writeln!(
            stream,
            r#"{{"type":"hello","client_id":"hmi","events":["{ATTRIBUTE_CHANGED}"]}}"#
        )
        .unwrap();
        writeln!(stream, r#"{{"type":"ping","sequence":7}}"#).unwrap();

        let pong = read_msg(&mut reader).expect("pong");
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["sequence"], 7);

        bridge.hub.publish(MACHINE_CHANGED, serde_json::json!({}));
        bridge.hub.publish(ATTRIBUTE_CHANGED, serde_json::json!({}));
        let msg = read_msg(&mut reader).expect("attribute notification");
        assert_eq!(msg["event"], ATTRIBUTE_CHANGED);
    }

    #[test]
    fn nothing_is_delivered_before_hello_when_required() {
        let bridge = Running::start(AuthConfig::default(), true);
        let (_stream, mut reader) = bridge.connect();
        bridge.wait_for_subscribers(1);
        bridge.hub.publish(MACHINE_CHANGED, serde_json::json!({}));
        assert!(read_msg(&mut reader).is_none());
    }

    #[test]
    fn authenticated_bridge_requires_valid_token() {
        let auth = AuthConfig {
            secret: b"bridge-secret".to_vec(),
            max_age_secs: 300,
            enabled: true,
        };
        let token = TokenValidator::from_config(&auth).issue("hmi").unwrap();
        let bridge = Running::start(auth, false);

        let (mut rogue, mut rogue_reader) = bridge.connect();
        let (mut trusted, mut trusted_reader) = bridge.connect();
        bridge.wait_for_subscribers(2);

        writeln!(rogue, r#"{{"type":"hello","client_id":"hmi","auth_token":"AAAA"}}"#).unwrap();
        writeln!(
            trusted,
            r#"{{"type":"hello","client_id":"hmi","auth_token":"{token}"}}"#
        )
        .unwrap();
        // Round-trip a ping so the hello is known to be processed.
        writeln!(trusted, r#"{{"type":"ping","sequence":1}}"#).unwrap();
        assert_eq!(read_msg(&mut trusted_reader).expect("pong")["type"], "pong");
        writeln!(rogue, r#"{{"type":"ping","sequence":1}}"#).unwrap();
        assert_eq!(read_msg(&mut rogue_reader).expect("pong")["type"], "pong");

        bridge.hub.publish(MACHINE_CHANGED, serde_json::json!({"level": 2.0}));
        assert_eq!(
            read_msg(&mut trusted_reader).expect("notification")["event"],
            MACHINE_CHANGED
        );
        assert!(read_msg(&mut rogue_reader).is_none());
    }

    #[test]
    fn unread_subscriber_holds_bounded_backlog() {
        let hub = NotificationHub::with_capacity(16);
        let (server, _client) = socket_pair();
        let addr = server.peer_addr().unwrap();
        let mut sub = Subscriber::new(addr, server, &hub);
        let gate = open_gate();
        let pad = "x".repeat(1024);

        for _ in 0..1_000 {
            hub.publish(MACHINE_CHANGED, serde_json::json!({ "pad": pad }));
            sub.collect_notifications(&gate);
        }
        assert!(sub.pending() <= MAX_PENDING_BYTES + 2 * 1024);
        assert!(matches!(
            sub.notifications.try_recv(),
            Err(TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn stalled_reader_does_not_starve_other_subscribers() {
        let bridge = Running::start(AuthConfig::default(), false);
        let (_stalled, _never_read) = bridge.connect();
        bridge.wait_for_subscribers(1);
        let pad = "x".repeat(4096);
        for _ in 0..500 {
            bridge
                .hub
                .publish(MACHINE_CHANGED, serde_json::json!({ "pad": pad }));
        }

        let (_live, mut reader) = bridge.connect();
        bridge.wait_for_subscribers(2);
        bridge
            .hub
            .publish(ATTRIBUTE_CHANGED, serde_json::json!({"level": 3.0}));
        assert_eq!(
            read_msg(&mut reader).expect("notification")["event"],
            ATTRIBUTE_CHANGED
        );
    }

    #[test]
    fn endless_line_disconnects_client() {
        let hub = NotificationHub::new();
        let (server, mut client) = socket_pair();
        let addr = server.peer_addr().unwrap();
        let mut sub = Subscriber::new(addr, server, &hub);
        let gate = open_gate();
        client.write_all(&vec![b'a'; MAX_LINE_BYTES + 1]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut alive = true;
        while alive && Instant::now() < deadline {
            alive = sub.read_lines(&gate);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!alive);
    }
}
