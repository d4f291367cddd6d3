pub mod manager;
pub mod strategy;

pub use manager::{ReconnectEvent, ReconnectManager, ReconnectState};
pub use strategy::{
    AdaptiveBackoff, ErrorClassifier, ExponentialBackoff, FixedInterval, LinearBackoff,
    NoReconnect, ReconnectOutcome, ReconnectStrategy,
};
