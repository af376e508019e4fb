use std::time::Duration;

/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// HMAC secret used to verify bearer tokens presented at the WebSocket handshake.
    pub jwt_secret: String,
    /// Hub and connection tuning.
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            port: parsed_var("PORT").unwrap_or(8080),
            jwt_secret: required_var("JWT_SECRET"),
            gateway: GatewayConfig::from_env(),
        }
    }
}

/// Tuning knobs for the real-time hub and per-connection loops.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Capacity of each connection's outbound queue, in frames.
    pub send_queue_capacity: usize,
    /// How often the write loop sends a liveness probe.
    pub ping_interval: Duration,
    /// A connection with no inbound activity for this long is closed.
    pub pong_wait: Duration,
    /// Deadline for writing a single frame to the socket.
    pub write_timeout: Duration,
    /// Deadline for store calls made during connect and disconnect.
    pub store_timeout: Duration,
    /// Deadline for the whole `message/send` path.
    pub message_timeout: Duration,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(3),
            message_timeout: Duration::from_secs(5),
            max_message_size: 512 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Defaults, overridden by any `GATEWAY_*` variables that are set and parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            send_queue_capacity: parsed_var("GATEWAY_SEND_QUEUE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.send_queue_capacity),
            ping_interval: secs_var("GATEWAY_PING_INTERVAL_SECS")
                .unwrap_or(defaults.ping_interval),
            pong_wait: secs_var("GATEWAY_PONG_WAIT_SECS").unwrap_or(defaults.pong_wait),
            write_timeout: secs_var("GATEWAY_WRITE_TIMEOUT_SECS")
                .unwrap_or(defaults.write_timeout),
            store_timeout: secs_var("GATEWAY_STORE_TIMEOUT_SECS")
                .unwrap_or(defaults.store_timeout),
            message_timeout: secs_var("GATEWAY_MESSAGE_TIMEOUT_SECS")
                .unwrap_or(defaults.message_timeout),
            max_message_size: parsed_var("GATEWAY_MAX_FRAME_BYTES")
                .unwrap_or(defaults.max_message_size),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn secs_var(name: &str) -> Option<Duration> {
    parsed_var::<u64>(name)
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_connection_limits() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.send_queue_capacity, 256);
        assert_eq!(cfg.max_message_size, 524_288);
        // Probes must fire well inside the liveness window.
        assert!(cfg.ping_interval < cfg.pong_wait);
    }
}
