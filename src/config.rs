use crate::extensions::Extensions;
use crate::reconnect::{
    AdaptiveBackoff, ExponentialBackoff, FixedInterval, LinearBackoff, NoReconnect,
    ReconnectStrategy,
};
use std::time::Duration;

/// Protocol-level knobs consumed by the codec and the assembler. Split out of
/// `ClientConfig` the way the teacher splits `WebSocketConfig` from
/// `ClientConfig`/`ServerConfig` in `config.rs` — these are the limits that
/// matter regardless of how the connection was established.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: usize,
    pub max_message_size: usize,
    pub fragment_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_message_size: 16 * 1024 * 1024,
            fragment_timeout: Duration::from_secs(30),
        }
    }
}

/// A `reconnect_strategy` config value rather than a trait object, so
/// `ClientConfig` stays `Clone` and `Debug` like the rest of the teacher's
/// config structs. `build` is where it turns into the boxed
/// `dyn ReconnectStrategy` the reconnect manager actually drives.
#[derive(Debug, Clone)]
pub enum ReconnectStrategyConfig {
    Exponential {
        base: Duration,
        max: Duration,
        jitter_range: (f64, f64),
    },
    Linear {
        base: Duration,
        increment: Duration,
        max: Duration,
    },
    Fixed {
        delay: Duration,
    },
    Adaptive {
        base: Duration,
        max: Duration,
    },
    None,
}

impl Default for ReconnectStrategyConfig {
    fn default() -> Self {
        ReconnectStrategyConfig::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter_range: (0.8, 1.2),
        }
    }
}

impl ReconnectStrategyConfig {
    pub fn build(&self, max_attempts: u32) -> Box<dyn ReconnectStrategy> {
        match self {
            ReconnectStrategyConfig::Exponential {
                base,
                max,
                jitter_range,
            } => {
                let mut strategy = ExponentialBackoff::new(*base, *max, max_attempts);
                strategy.jitter_range = jitter_range.0..jitter_range.1;
                Box::new(strategy)
            }
            ReconnectStrategyConfig::Linear {
                base,
                increment,
                max,
            } => Box::new(LinearBackoff {
                base: *base,
                increment: *increment,
                max: *max,
                max_attempts,
            }),
            ReconnectStrategyConfig::Fixed { delay } => Box::new(FixedInterval {
                delay: *delay,
                max_attempts,
            }),
            ReconnectStrategyConfig::Adaptive { base, max } => {
                Box::new(AdaptiveBackoff::new(*base, *max, max_attempts))
            }
            ReconnectStrategyConfig::None => Box::new(NoReconnect),
        }
    }
}

/// Everything a `Client` needs to know before `connect` is called. Mirrors
/// the teacher's `ClientConfig { web_socket_config, ca_file }` split, widened
/// with the heartbeat and reconnect knobs the teacher never needed since it
/// never drove a client-side resilience layer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub web_socket_config: WebSocketConfig,

    pub subprotocols: Vec<String>,
    pub extensions: Option<Extensions>,
    pub extra_headers: Vec<(String, String)>,

    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub enable_heartbeat: bool,
    pub max_consecutive_heartbeat_timeouts: u32,

    pub enable_auto_reconnect: bool,
    pub reconnect_strategy: ReconnectStrategyConfig,
    pub max_reconnect_attempts: u32,
    pub reconnect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            web_socket_config: WebSocketConfig::default(),

            subprotocols: Vec::new(),
            extensions: None,
            extra_headers: Vec::new(),

            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            enable_heartbeat: true,
            max_consecutive_heartbeat_timeouts: 3,

            enable_auto_reconnect: true,
            reconnect_strategy: ReconnectStrategyConfig::default(),
            max_reconnect_attempts: 5,
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}
