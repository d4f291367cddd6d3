use futures::StreamExt;
use log::*;
use wsflow::{Client, ClientConfig};

async fn handle_connection(addr: &str) {
    let client = Client::new(ClientConfig::default());
    match client.connect(addr).await {
        Ok(()) => {
            let mut events = client.events();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    debug!("event: {event:?}");
                }
            });

            loop {
                match client.receive().await {
                    Ok(message) => {
                        info!("received message: {}", message.as_text().unwrap_or_default())
                    }
                    Err(err) => {
                        error!("received error from the stream: {err}");
                        break;
                    }
                }
            }
        }
        Err(err) => error!("error when performing handshake: {err}"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("wss://api.gemini.com/v1/marketdata/BTCUSD").await;
}
