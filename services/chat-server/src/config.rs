use std::env;
use std::time::Duration;

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub log_level: String,
    pub max_frame_bytes: usize,
    pub outbound_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
            max_frame_bytes: env_usize("MAX_FRAME_BYTES", 512),
            outbound_queue_capacity: env_usize("OUTBOUND_QUEUE_CAPACITY", 256),
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 54)),
            read_deadline: Duration::from_secs(env_u64("READ_DEADLINE_SECS", 60)),
            write_deadline: Duration::from_secs(10),
        }
    }

    pub fn session_config(&self) -> chat_core::session::SessionConfig {
        chat_core::session::SessionConfig {
            max_text_frame_bytes: self.max_frame_bytes,
            outbound_queue_capacity: self.outbound_queue_capacity,
            heartbeat_interval: self.heartbeat_interval,
            read_deadline: self.read_deadline,
            write_deadline: self.write_deadline,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
