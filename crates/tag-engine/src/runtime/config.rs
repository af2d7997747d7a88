use std::time::Duration;
use tag_core::GatewayPolicy;
use tag_io::daq::DEFAULT_TIMEOUT;
use tag_io::ServiceEndpoints;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub bind_addr: String,
    pub bridge_enabled: bool,
    pub cycle_time: Duration,
    pub json_logs: bool,
    pub metrics_addr: Option<String>,
    pub services: ServiceEndpoints,
    pub bridge_secret: Option<String>,
    pub token_max_age_secs: u64,
    pub require_hello: bool,
    pub gateway_policy: GatewayPolicy,
    pub http_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            bind_addr: "127.0.0.1:7000".to_string(),
            bridge_enabled: true,
            cycle_time: Duration::from_millis(100),
            json_logs: false,
            metrics_addr: None,
            services: ServiceEndpoints::default(),
            bridge_secret: None,
            token_max_age_secs: 300,
            require_hello: false,
            gateway_policy: GatewayPolicy::Always,
            http_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Process arguments layered over the service environment variables.
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args_with(&args, ServiceEndpoints::from_env())
    }

    #[cfg(test)]
    pub fn from_args(args: &[String]) -> Self {
        Self::from_args_with(args, ServiceEndpoints::default())
    }

    /// Unparsable values leave the previous setting in place.
    pub fn from_args_with(args: &[String], services: ServiceEndpoints) -> Self {
        let mut cfg = RuntimeConfig {
            services,
            ..Default::default()
        };
        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1);
            let mut consumed = true;
            match (args[i].as_str(), value) {
                ("--run-seconds", Some(v)) => {
                    cfg.run_seconds = v.parse::<u64>().ok();
                }
                ("--bind", Some(v)) => {
                    cfg.bind_addr = v.clone();
                }
                ("--cycle-ms", Some(v)) => {
                    if let Some(ms) = v.parse::<u64>().ok().filter(|ms| *ms > 0) {
                        cfg.cycle_time = Duration::from_millis(ms);
                    }
                }
                ("--metrics-addr", Some(v)) => {
                    cfg.metrics_addr = Some(v.clone());
                }
                ("--daq-host", Some(v)) => {
                    cfg.services.daq_host = v.clone();
                }
                ("--daq-port", Some(v)) => {
                    cfg.services.daq_port = v.parse().unwrap_or(cfg.services.daq_port);
                }
                ("--auth-host", Some(v)) => {
                    cfg.services.auth_host = v.clone();
                }
                ("--auth-port", Some(v)) => {
                    cfg.services.auth_port = v.parse().unwrap_or(cfg.services.auth_port);
                }
                ("--bridge-secret", Some(v)) => {
                    cfg.bridge_secret = Some(v.clone());
                }
                ("--token-max-age", Some(v)) => {
                    cfg.token_max_age_secs = v.parse().unwrap_or(cfg.token_max_age_secs);
                }
                ("--http-timeout-ms", Some(v)) => {
                    if let Some(ms) = v.parse::<u64>().ok().filter(|ms| *ms > 0) {
                        cfg.http_timeout = Duration::from_millis(ms);
                    }
                }
                (flag, _) => {
                    consumed = false;
                    match flag {
                        "--no-bridge" => cfg.bridge_enabled = false,
                        "--json-logs" => cfg.json_logs = true,
                        "--app-auth" => cfg.services.app_auth = true,
                        "--require-hello" => cfg.require_hello = true,
                        "--gateway-logged-only" => cfg.gateway_policy = GatewayPolicy::LoggedOnly,
                        "--help" | "-h" => {
                            cfg.show_help = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            i += if consumed { 2 } else { 1 };
        }
        cfg
    }

    pub fn print_help() {
        println!(
            r#"tag-engine - typed tag models with DAQ persistence and live notifications

USAGE:
    tag-engine [OPTIONS]

OPTIONS:
    --bind <ADDR>            Notification bridge bind address [default: 127.0.0.1:7000]
    --no-bridge              Disable the notification bridge
    --run-seconds <SECS>     Run for a fixed duration then exit
    --cycle-ms <MS>          Scan cycle time in milliseconds [default: 100]
    --json-logs              Output logs in JSON format
    --metrics-addr <ADDR>    Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --daq-host <HOST>        DAQ service host [env: DAQ_SERVICE_HOST, default: 127.0.0.1]
    --daq-port <PORT>        DAQ service port [env: DAQ_SERVICE_PORT, default: 5001]
    --auth-host <HOST>       Auth service host [env: AUTH_SERVICE_HOST, default: 127.0.0.1]
    --auth-port <PORT>       Auth service port [env: AUTH_SERVICE_PORT, default: 5000]
    --app-auth               Send auth-service tokens with gateway updates [env: APP_AUTH=1]
    --bridge-secret <STR>    Shared secret for bridge subscriber tokens
    --token-max-age <SECS>   Maximum age for subscriber tokens in seconds [default: 300]
    --require-hello          Hold notifications until the subscriber says hello
    --gateway-logged-only    Push gateway updates for logged attributes only
    --http-timeout-ms <MS>   Timeout for DAQ and auth requests [default: 5000]
    -h, --help               Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                 Set log filter (e.g., RUST_LOG=debug,tag_core=trace)

EXAMPLES:
    # Local run against a DAQ service on another host
    tag-engine --daq-host 10.0.0.5 --metrics-addr 0.0.0.0:9090

    # Short test run without subscribers
    tag-engine --run-seconds 10 --no-bridge
"#
        );
    }
}
