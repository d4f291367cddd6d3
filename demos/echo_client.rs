use log::*;
use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use wsflow::{Client, ClientConfig, Message};

async fn handle_connection(addr: &str) {
    let client = Client::new(ClientConfig::default());
    if let Err(err) = client.connect(addr).await {
        error!("error when performing handshake: {err}");
        return;
    }

    let mut counter = 0;
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(5));

    loop {
        tokio::select! {
            result = client.receive() => {
                match result {
                    Ok(Message::Text(text)) => {
                        info!("received message: {text}");
                        counter += 1;
                        if counter >= 3 {
                            if let Err(err) = client.close(1000, "done").await {
                                error!("error closing connection: {err}");
                            }
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("receive failed: {err}");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let random_string = generate_random_string();
                if let Err(err) = client.send(Message::Text(random_string)).await {
                    error!("failed to send message: {err}");
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}

fn generate_random_string() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}
