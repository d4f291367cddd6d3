use crate::error::Error;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use tokio_rustls::{client::TlsStream, TlsConnector};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// The byte-transport contract the client orchestrator depends on. Consumers
/// may supply their own implementation (a mock for tests, a different TLS
/// stack); this crate ships `TcpClientTransport` as the default.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(host: &str, port: u16, use_tls: bool) -> Result<Self, Error>
    where
        Self: Sized;
    async fn send(&self, bytes: &[u8]) -> Result<(), Error>;
    async fn receive(&self) -> Result<Vec<u8>, Error>;
    async fn disconnect(&self) -> Result<(), Error>;
}

enum Stream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

/// Default `Transport` over `tokio::net::TcpStream`, upgraded to
/// `tokio_rustls::client::TlsStream` when the URL scheme is `wss`. Read/write
/// halves are serialized behind one `Mutex`, the same single-writer discipline
/// the teacher applies to its `Writer` in `split.rs` — there is exactly one
/// send-loop and one receive-loop per connection, so the lock is uncontended
/// in the common case and only exists to let both sides share ownership.
pub struct TcpClientTransport {
    stream: Mutex<Stream>,
}

fn root_cert_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

#[async_trait]
impl Transport for TcpClientTransport {
    async fn connect(host: &str, port: u16, use_tls: bool) -> Result<Self, Error> {
        debug!("opening TCP connection to {host}:{port} (tls={use_tls})");
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        let stream = if use_tls {
            let config = RustlsClientConfig::builder()
                .with_root_certificates(root_cert_store())
                .with_no_client_auth();
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(host.to_string()).map_err(Error::from)?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
            Stream::Tls(tls)
        } else {
            Stream::Plain(tcp)
        };

        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    async fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut stream = self.stream.lock().await;
        match &mut *stream {
            Stream::Plain(s) => s.write_all(bytes).await,
            Stream::Tls(s) => s.write_all(bytes).await,
        }
        .map_err(Error::from)
    }

    async fn receive(&self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stream = self.stream.lock().await;
        let read = match &mut *stream {
            Stream::Plain(s) => s.read(&mut buf).await,
            Stream::Tls(s) => s.read(&mut buf).await,
        }
        .map_err(Error::from)?;

        if read == 0 {
            return Err(Error::Network("connection closed by peer".to_string()));
        }
        buf.truncate(read);
        Ok(buf)
    }

    async fn disconnect(&self) -> Result<(), Error> {
        let mut stream = self.stream.lock().await;
        match &mut *stream {
            Stream::Plain(s) => s.shutdown().await,
            Stream::Tls(s) => s.shutdown().await,
        }
        .map_err(Error::from)
    }
}
