//! Locations of the DAQ and auth services, read from the environment.

use std::env;
use tracing::warn;

pub const DEFAULT_DAQ_HOST: &str = "127.0.0.1";
pub const DEFAULT_DAQ_PORT: u16 = 5001;
pub const DEFAULT_AUTH_HOST: &str = "127.0.0.1";
pub const DEFAULT_AUTH_PORT: u16 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub daq_host: String,
    pub daq_port: u16,
    pub auth_host: String,
    pub auth_port: u16,
    /// Attach auth-service headers to gateway updates.
    pub app_auth: bool,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            daq_host: DEFAULT_DAQ_HOST.to_string(),
            daq_port: DEFAULT_DAQ_PORT,
            auth_host: DEFAULT_AUTH_HOST.to_string(),
            auth_port: DEFAULT_AUTH_PORT,
            app_auth: false,
        }
    }
}

impl ServiceEndpoints {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Empty or unparsable variables fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut endpoints = Self::default();

        if let Some(host) = get("DAQ_SERVICE_HOST") {
            endpoints.daq_host = host;
        }
        if let Some(port) = get("DAQ_SERVICE_PORT") {
            endpoints.daq_port = parse_or("DAQ_SERVICE_PORT", &port, DEFAULT_DAQ_PORT);
        }
        if let Some(host) = get("AUTH_SERVICE_HOST") {
            endpoints.auth_host = host;
        }
        if let Some(port) = get("AUTH_SERVICE_PORT") {
            endpoints.auth_port = parse_or("AUTH_SERVICE_PORT", &port, DEFAULT_AUTH_PORT);
        }
        if let Some(flag) = get("APP_AUTH") {
            endpoints.app_auth = parse_or::<i64>("APP_AUTH", &flag, 0) != 0;
        }
        endpoints
    }

    pub fn daq_url(&self) -> String {
        format!("http://{}:{}", self.daq_host, self.daq_port)
    }

    pub fn auth_url(&self) -> String {
        format!("http://{}:{}", self.auth_host, self.auth_port)
    }
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, raw: &str, fallback: T) -> T {
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = raw, "ignoring unparsable environment value");
            fallback
        }
    }
}
