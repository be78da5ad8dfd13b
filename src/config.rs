use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use crate::gateway::{DEFAULT_GATEWAY_TIMEOUT_SECS, DEFAULT_GATEWAY_URL, normalize_base_url};
use crate::playback::DEFAULT_STEP_INTERVAL_MS;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub gateway: GatewayConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            gateway: GatewayConfig::from_env(),
            playback: PlaybackConfig::from_env(),
        }
    }
}

/// Configuration for the dashboard API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "PACKING_DASHBOARD_API_HOST";
    const PORT_VAR: &'static str = "PACKING_DASHBOARD_API_PORT";

    fn from_env() -> Self {
        let host_value =
            env_string(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string(Self::PORT_VAR) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    eprintln!(
                        "⚠️ {} must not be 0. Using {}.",
                        Self::PORT_VAR,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    eprintln!(
                        "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                        Self::PORT_VAR,
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Where and how the packing algorithm service is reached.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    base_url: String,
    timeout: Duration,
    probe_on_start: bool,
}

impl GatewayConfig {
    const URL_VAR: &'static str = "PACKING_DASHBOARD_GATEWAY_URL";
    const TIMEOUT_VAR: &'static str = "PACKING_DASHBOARD_GATEWAY_TIMEOUT_SECS";
    const PROBE_VAR: &'static str = "PACKING_DASHBOARD_GATEWAY_PROBE_ON_START";

    fn from_env() -> Self {
        let base_url = normalize_base_url(
            &env_string(Self::URL_VAR).unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
        );
        let timeout_secs = resolve_u64(
            Self::TIMEOUT_VAR,
            env_string(Self::TIMEOUT_VAR),
            DEFAULT_GATEWAY_TIMEOUT_SECS,
            |value| value > 0,
            "must be greater than 0",
        );
        let probe_on_start = env_string(Self::PROBE_VAR)
            .and_then(|raw| parse_bool(&raw, Self::PROBE_VAR))
            .unwrap_or(true);

        Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            probe_on_start,
        }
    }

    /// Base URL with scheme and without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether to check the service once at startup.
    pub fn probe_on_start(&self) -> bool {
        self.probe_on_start
    }
}

/// Timing of playback and camera persistence, plus the randomization default.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    step_interval_ms: u64,
    camera_snapshot_interval: Duration,
    randomize_max_change: f64,
}

impl PlaybackConfig {
    const STEP_INTERVAL_VAR: &'static str = "PACKING_DASHBOARD_STEP_INTERVAL_MS";
    const CAMERA_SNAPSHOT_VAR: &'static str = "PACKING_DASHBOARD_CAMERA_SNAPSHOT_MS";
    const RANDOMIZE_VAR: &'static str = "PACKING_DASHBOARD_RANDOMIZE_MAX_CHANGE";

    pub const DEFAULT_CAMERA_SNAPSHOT_MS: u64 = 2000;
    pub const DEFAULT_RANDOMIZE_MAX_CHANGE: f64 = 0.3;

    fn from_env() -> Self {
        let step_interval_ms = resolve_u64(
            Self::STEP_INTERVAL_VAR,
            env_string(Self::STEP_INTERVAL_VAR),
            DEFAULT_STEP_INTERVAL_MS,
            |value| value > 0,
            "must be greater than 0",
        );
        let camera_snapshot_ms = resolve_u64(
            Self::CAMERA_SNAPSHOT_VAR,
            env_string(Self::CAMERA_SNAPSHOT_VAR),
            Self::DEFAULT_CAMERA_SNAPSHOT_MS,
            |value| value > 0,
            "must be greater than 0",
        );
        let randomize_max_change = resolve_f64(
            Self::RANDOMIZE_VAR,
            env_string(Self::RANDOMIZE_VAR),
            Self::DEFAULT_RANDOMIZE_MAX_CHANGE,
            |value| value > 0.0 && value <= 1.0,
            "must be in (0, 1]",
        );

        Self {
            step_interval_ms,
            camera_snapshot_interval: Duration::from_millis(camera_snapshot_ms),
            randomize_max_change,
        }
    }

    pub fn step_interval_ms(&self) -> u64 {
        self.step_interval_ms
    }

    pub fn camera_snapshot_interval(&self) -> Duration {
        self.camera_snapshot_interval
    }

    /// Fractional change used when a randomize request names none.
    pub fn randomize_max_change(&self) -> f64 {
        self.randomize_max_change
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: DEFAULT_STEP_INTERVAL_MS,
            camera_snapshot_interval: Duration::from_millis(Self::DEFAULT_CAMERA_SNAPSHOT_MS),
            randomize_max_change: Self::DEFAULT_RANDOMIZE_MAX_CHANGE,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            eprintln!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name, err
            );
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            eprintln!(
                "⚠️ Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

fn resolve_f64(
    var_name: &str,
    raw: Option<String>,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
) -> f64 {
    match raw {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && validator(value) => value,
            Ok(_) => {
                eprintln!(
                    "⚠️ {} contains invalid value '{}': {}. Using {}.",
                    var_name, raw, invalid_hint, default
                );
                default
            }
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name, raw, err, default
                );
                default
            }
        },
        None => default,
    }
}

fn resolve_u64(
    var_name: &str,
    raw: Option<String>,
    default: u64,
    validator: impl Fn(u64) -> bool,
    invalid_hint: &str,
) -> u64 {
    match raw {
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if validator(value) => value,
            Ok(_) => {
                eprintln!(
                    "⚠️ {} contains invalid value '{}': {}. Using {}.",
                    var_name, raw, invalid_hint, default
                );
                default
            }
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse {} ('{}') as integer: {}. Using {}.",
                    var_name, raw, err, default
                );
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_true_values() {
        assert_eq!(parse_bool("1", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("true", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("yes", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("on", "TEST_VAR"), Some(true));

        // Test case insensitivity
        assert_eq!(parse_bool("TRUE", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool(" Yes ", "TEST_VAR"), Some(true));
    }

    #[test]
    fn test_parse_bool_false_and_invalid_values() {
        assert_eq!(parse_bool("0", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("off", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("No", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("maybe", "TEST_VAR"), None);
        assert_eq!(parse_bool("", "TEST_VAR"), None);
    }

    #[test]
    fn test_resolve_u64_falls_back_on_invalid_input() {
        let positive = |value: u64| value > 0;
        assert_eq!(resolve_u64("TEST_VAR", None, 1000, positive, "hint"), 1000);
        assert_eq!(
            resolve_u64("TEST_VAR", Some("250".to_string()), 1000, positive, "hint"),
            250
        );
        assert_eq!(
            resolve_u64("TEST_VAR", Some("0".to_string()), 1000, positive, "hint"),
            1000
        );
        assert_eq!(
            resolve_u64("TEST_VAR", Some("fast".to_string()), 1000, positive, "hint"),
            1000
        );
    }

    #[test]
    fn test_resolve_f64_rejects_out_of_range_and_non_finite() {
        let fraction = |value: f64| value > 0.0 && value <= 1.0;
        assert_eq!(
            resolve_f64("TEST_VAR", Some("0.5".to_string()), 0.3, fraction, "hint"),
            0.5
        );
        assert_eq!(
            resolve_f64("TEST_VAR", Some("1.5".to_string()), 0.3, fraction, "hint"),
            0.3
        );
        assert_eq!(
            resolve_f64("TEST_VAR", Some("NaN".to_string()), 0.3, fraction, "hint"),
            0.3
        );
    }

    #[test]
    fn test_playback_defaults() {
        let config = PlaybackConfig::default();
        assert_eq!(config.step_interval_ms(), 1000);
        assert_eq!(config.camera_snapshot_interval(), Duration::from_millis(2000));
        assert_eq!(config.randomize_max_change(), 0.3);
    }
}
