//! Configuration types for docker-dns.
//!
//! Configuration is read from a TOML file and overlaid with `DOCKER_DNS__*`
//! environment variables. Unknown keys are rejected so that typos surface at
//! startup instead of silently falling back to defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::DnsError;

/// Largest accepted answer TTL, in seconds.
pub const MAX_TTL: u32 = 3600;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DOCKER_DNS";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// DNS server configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a TOML file plus environment overrides, then validate it.
    pub fn load(path: &Path) -> Result<Self, DnsError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("dns.networks")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()
    }

    /// Parse configuration from an in-memory TOML document and validate it.
    pub fn from_toml_str(source: &str) -> Result<Self, DnsError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()
    }

    /// Check value ranges and normalize the zone.
    pub fn validate(mut self) -> Result<Self, DnsError> {
        self.dns = self.dns.validate()?;
        Ok(self)
    }
}

/// DNS server and synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Address for DNS server to listen on (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Zone suffix every generated name lives under (e.g. "docker.").
    #[serde(default = "default_zone")]
    pub zone: String,

    /// TTL for DNS answers in seconds, at most [`MAX_TTL`].
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Label namespace recognized for SRV declarations (`<prefix>/srv.<proto>.<service>`).
    /// May be empty, in which case labels are matched as `srv.<proto>.<service>`.
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Ceiling for the reconnect backoff after event stream failures.
    #[serde(default = "default_max_backoff", with = "duration")]
    pub max_backoff: Duration,

    /// Network scopes to publish. Empty means every scope.
    #[serde(default)]
    pub networks: Vec<String>,

    /// Docker daemon address (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// Falls back to `DOCKER_HOST` and the platform default when unset.
    #[serde(default)]
    pub docker_host: Option<String>,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            zone: default_zone(),
            ttl: default_ttl(),
            label_prefix: default_label_prefix(),
            max_backoff: default_max_backoff(),
            networks: Vec::new(),
            docker_host: None,
            soa: SoaConfig::default(),
        }
    }
}

impl DnsConfig {
    /// Validate ranges and normalize the zone to a lowercase, dot-terminated name.
    pub fn validate(mut self) -> Result<Self, DnsError> {
        if self.ttl > MAX_TTL {
            return Err(DnsError::Config(format!(
                "ttl must be in range [0, {}]: {}",
                MAX_TTL, self.ttl
            )));
        }

        self.zone = normalize_zone(&self.zone).ok_or_else(|| {
            DnsError::Config(format!("zone must be a non-empty domain: {:?}", self.zone))
        })?;

        if self.max_backoff.is_zero() {
            return Err(DnsError::Config("max_backoff must be greater than zero".into()));
        }

        Ok(self)
    }
}

/// Lowercase a zone and make it dot-terminated. Returns `None` for an empty zone.
pub fn normalize_zone(zone: &str) -> Option<String> {
    let trimmed = zone.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("{}.", trimmed.to_ascii_lowercase()))
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "docker_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// Address for the HTTP readiness endpoint (`GET /ready`).
    #[serde(default)]
    pub ready_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            prometheus_addr: None,
            ready_addr: None,
            opentelemetry: None,
        }
    }
}

/// Output format of the fmt logging layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// SOA (Start of Authority) record configuration for the zone apex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoaConfig {
    /// Primary nameserver hostname (e.g., "ns.docker.").
    pub mname: String,

    /// Admin mailbox in DNS format (e.g., "hostmaster.docker.").
    pub rname: String,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Negative caching TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns.docker.".to_string(),
            rname: "hostmaster.docker.".to_string(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5353))
}

fn default_zone() -> String {
    "docker.".to_string()
}

fn default_ttl() -> u32 {
    30
}

fn default_label_prefix() -> String {
    "com.dokku.coredns-docker".to_string()
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "docker-dns".to_string()
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    30
}

/// Serde adapter for durations written as `"60s"`, `"1m30s"`, `"250ms"` or bare seconds.
pub mod duration {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    /// Serialize as whole seconds when possible, milliseconds otherwise.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", value.as_millis()))
        }
    }

    /// Deserialize from a duration string or a number of seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration such as \"60s\", \"1m30s\" or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("duration must not be negative: {}", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse(v).map_err(E::custom)
        }
    }

    /// Parse a sequence of `<number><unit>` pairs (`h`, `m`, `s`, `ms`, `us`, `ns`).
    /// A bare number is read as seconds.
    pub fn parse(input: &str) -> Result<Duration, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty duration".to_string());
        }
        if let Ok(secs) = input.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        let mut total = 0f64;
        let mut rest = input;
        while !rest.is_empty() {
            let number_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
            if number_len == 0 {
                return Err(format!("invalid duration {:?}", input));
            }
            let value: f64 = rest[..number_len]
                .parse()
                .map_err(|_| format!("invalid number in duration {:?}", input))?;
            rest = &rest[number_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let scale = match &rest[..unit_len] {
                "h" => 3600.0,
                "m" => 60.0,
                "s" => 1.0,
                "ms" => 1e-3,
                "us" | "µs" => 1e-6,
                "ns" => 1e-9,
                unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
            };
            rest = &rest[unit_len..];
            total += value * scale;
        }

        Duration::try_from_secs_f64(total).map_err(|e| e.to_string())
    }
}
