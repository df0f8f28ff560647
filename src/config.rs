//! Process configuration, read once from the environment at startup.
//!
//! Every knob has a documented default and a `TRACE_*` environment
//! variable. The resulting [`Config`] is immutable and passed into each
//! component's constructor — no ambient lookups after startup. Invalid
//! values fall back to their defaults rather than failing the process.

use std::fmt;
use std::time::Duration;

pub const ENV_DEBUG: &str = "TRACE_DEBUG";
pub const ENV_TIMEOUT: &str = "TRACE_TIMEOUT";
pub const ENV_CORE: &str = "TRACE_CORE";
pub const ENV_WEB_HOST: &str = "TRACE_WEB_HOST";
pub const ENV_WEB_PORT: &str = "TRACE_WEB_PORT";
pub const ENV_MQTT_TYPE: &str = "TRACE_MQTT_TYPE";
pub const ENV_MQTT_HOST: &str = "TRACE_MQTT_HOST";
pub const ENV_MQTT_PORT: &str = "TRACE_MQTT_PORT";
pub const ENV_MQTT_USER: &str = "TRACE_MQTT_USERNAME";
pub const ENV_MQTT_PASS: &str = "TRACE_MQTT_PASSWORD";
pub const ENV_MQTT_TOPIC: &str = "TRACE_MQTT_TOPIC";
pub const ENV_MQTT_QOS: &str = "TRACE_MQTT_QOS";
pub const ENV_MQTT_RETAIN: &str = "TRACE_MQTT_RETAIN";
pub const ENV_MQTT_CLEANSTART: &str = "TRACE_MQTT_CLEANSTART";
pub const ENV_MQTT_CLIENT: &str = "TRACE_MQTT_CLIENT";
pub const ENV_MQTT_WITHTLS: &str = "TRACE_MQTT_WITHTLS";
pub const ENV_MQTT_INSECURE: &str = "TRACE_MQTT_INSECURE";

const DEFAULT_CORE: &str = "/usr/bin/nexttrace";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// How the broker connection is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// MQTT over WebSocket.
    Ws,
    /// MQTT over a raw TCP stream.
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ws => write!(f, "ws"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Process-wide configuration. Constructed once, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Verbose diagnostics (raises the default log level).
    pub debug: bool,
    /// Path to the trace executable.
    pub trace_core: String,
    /// Deadline for a single trace run.
    pub trace_timeout: Duration,
    pub web: WebConfig,
    pub mqtt: MqttConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

/// Broker connection settings.
#[derive(Clone)]
pub struct MqttConfig {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    /// Empty username disables authentication.
    pub username: String,
    pub password: String,
    /// Base task topic; the worker subscribes to `<topic>/<client_id>`.
    pub topic: String,
    /// QoS level for both subscribe and publish (0–2).
    pub qos: u8,
    pub retain: bool,
    pub clean_start: bool,
    /// Client identity, doubling as the routing region.
    pub client_id: String,
    pub with_tls: bool,
    /// Skip TLS certificate verification.
    pub insecure_tls: bool,
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("clean_start", &self.clean_start)
            .field("client_id", &self.client_id)
            .field("with_tls", &self.with_tls)
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

impl Config {
    /// Read the full configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            debug: env_bool(ENV_DEBUG, false),
            trace_core: env_string(ENV_CORE, DEFAULT_CORE),
            trace_timeout: Duration::from_secs(env_timeout()),
            web: WebConfig {
                host: env_string(ENV_WEB_HOST, "127.0.0.1"),
                port: env_u16(ENV_WEB_PORT, 8080),
            },
            mqtt: MqttConfig {
                transport: parse_transport(env_raw(ENV_MQTT_TYPE), Transport::Ws),
                host: env_string(ENV_MQTT_HOST, "127.0.0.1"),
                port: env_u16(ENV_MQTT_PORT, 1883),
                username: env_string(ENV_MQTT_USER, "qmaru"),
                password: env_string(ENV_MQTT_PASS, "123456"),
                topic: env_string(ENV_MQTT_TOPIC, "trace/data"),
                qos: parse_qos(env_raw(ENV_MQTT_QOS), 0),
                retain: env_bool(ENV_MQTT_RETAIN, false),
                clean_start: env_bool(ENV_MQTT_CLEANSTART, true),
                client_id: env_string(ENV_MQTT_CLIENT, "trace"),
                with_tls: env_bool(ENV_MQTT_WITHTLS, false),
                insecure_tls: env_bool(ENV_MQTT_INSECURE, false),
            },
        }
    }
}

impl MqttConfig {
    /// Topic this worker subscribes to.
    pub fn task_topic(&self) -> String {
        format!("{}/{}", self.topic, self.client_id)
    }
}

fn env_raw(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_string(key: &str, default: &str) -> String {
    parse_string(env_raw(key), default)
}

fn env_bool(key: &str, default: bool) -> bool {
    parse_bool(env_raw(key), default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    parse_u16(env_raw(key), default)
}

fn env_timeout() -> u64 {
    parse_timeout(env_raw(ENV_TIMEOUT), DEFAULT_TIMEOUT_SECS)
}

fn parse_string(raw: Option<String>, default: &str) -> String {
    match raw {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_u16(raw: Option<String>, default: u16) -> u16 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Zero and negative timeouts make no sense; fall back to the default.
fn parse_timeout(raw: Option<String>, default: u64) -> u64 {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(secs) if secs > 0 => secs as u64,
        _ => default,
    }
}

fn parse_qos(raw: Option<String>, default: u8) -> u8 {
    match raw.and_then(|v| v.trim().parse::<u8>().ok()) {
        Some(level @ 0..=2) => level,
        _ => default,
    }
}

fn parse_transport(raw: Option<String>, default: Transport) -> Transport {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("ws") | Some("websocket") => Transport::Ws,
        Some("tcp") => Transport::Tcp,
        _ => default,
    }
}
