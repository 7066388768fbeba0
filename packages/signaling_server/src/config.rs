use std::time::Duration;

use clap::Parser;

use crate::{
    turn::{DEFAULT_TURN_API_BASE_URL, TurnCredentials},
    ws::handler::Heartbeat,
};

/// Command line and environment configuration of the server binary.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(index = 1, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Number of actix worker threads
    #[arg(long, env = "ACTIX_WORKERS")]
    pub actix_workers: Option<usize>,

    /// Maximum number of tokio blocking threads
    #[arg(long, env = "MAX_THREADS", default_value_t = 64)]
    pub max_threads: usize,

    /// TURN key id used to mint ICE server credentials
    #[arg(long, env = "TURN_KEY_ID")]
    pub turn_key_id: Option<String>,

    #[arg(long, env = "TURN_API_TOKEN", hide_env_values = true)]
    pub turn_api_token: Option<String>,

    #[arg(long, env = "TURN_API_BASE_URL", default_value = DEFAULT_TURN_API_BASE_URL)]
    pub turn_api_base_url: String,

    /// Seconds between WebSocket pings
    #[arg(long, env = "WS_HEARTBEAT_INTERVAL_SECS", default_value_t = 5)]
    pub ws_heartbeat_interval_secs: u64,

    /// Seconds of client silence before a WebSocket is dropped
    #[arg(long, env = "WS_CLIENT_TIMEOUT_SECS", default_value_t = 10)]
    pub ws_client_timeout_secs: u64,
}

impl Config {
    #[must_use]
    pub const fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            interval: Duration::from_secs(self.ws_heartbeat_interval_secs),
            client_timeout: Duration::from_secs(self.ws_client_timeout_secs),
        }
    }

    #[must_use]
    pub fn turn_credentials(&self) -> TurnCredentials {
        TurnCredentials::new(
            self.turn_key_id.clone(),
            self.turn_api_token.clone(),
            &self.turn_api_base_url,
        )
    }
}
