use futures::StreamExt;
use log::*;
use std::time::Duration;
use wsflow::{Client, ClientConfig, ClientEvent, ReconnectStrategyConfig};

async fn handle_connection(addr: &str) {
    let config = ClientConfig {
        enable_auto_reconnect: true,
        reconnect_strategy: ReconnectStrategyConfig::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(20),
            jitter_range: (0.8, 1.2),
        },
        max_reconnect_attempts: 10,
        ..ClientConfig::default()
    };
    let client = Client::new(config);

    let mut events = client.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                ClientEvent::State(state) => info!("connection state: {state:?}"),
                ClientEvent::Heartbeat(event) => debug!("heartbeat: {event:?}"),
                ClientEvent::Reconnect(event) => info!("reconnect: {event:?}"),
            }
        }
    });

    if let Err(err) = client.connect(addr).await {
        error!("error when performing handshake: {err}");
        return;
    }

    loop {
        match client.receive().await {
            Ok(message) => info!("received message: {}", message.as_text().unwrap_or_default()),
            Err(err) => {
                error!("received error from the stream: {err}");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}
