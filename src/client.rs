use crate::config::ClientConfig;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::Error;
use crate::event::{ClientEvent, EventStream, HeartbeatEvent};
use crate::handshake::{self, HandshakeConfig, HandshakeResult};
use crate::heartbeat::{HeartbeatManager, HeartbeatStats};
use crate::message::{validate_close_code, Message};
use crate::assembler::MessageAssembler;
use crate::reconnect::{ReconnectManager, ReconnectState};
use crate::request::parse_ws_url;
use crate::state::{ConnectionState, StateManager};
use crate::transport::{TcpClientTransport, Transport};

use log::{debug, error, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// How long the public, polling `receive` waits between checks of the queue
/// and the connection state before giving up on an empty queue.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long `close` waits for the peer's close frame (or the receive loop's
/// own cleanup) before forcing the connection closed anyway.
const GRACEFUL_CLOSE_WAIT: Duration = Duration::from_secs(3);
/// How often `start_reconnect` polls the reconnect manager's state while
/// waiting for it to settle into `Idle` or `Stopped`.
const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type JoinHandleSlot = SyncMutex<Option<JoinHandle<()>>>;

struct Shared<T: Transport> {
    config: ClientConfig,
    state: Arc<StateManager>,
    heartbeat: Arc<HeartbeatManager>,
    heartbeat_events_tx: mpsc::UnboundedSender<HeartbeatEvent>,
    reconnect: Arc<ReconnectManager>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: SyncMutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,

    url: SyncMutex<Option<String>>,
    transport: SyncMutex<Option<Arc<T>>>,
    send_tx: SyncMutex<Option<mpsc::UnboundedSender<Message>>>,
    handshake_result: SyncMutex<Option<HandshakeResult>>,

    recv_tx: mpsc::UnboundedSender<Message>,
    recv_rx: Mutex<mpsc::UnboundedReceiver<Message>>,

    send_task: JoinHandleSlot,
    recv_task: JoinHandleSlot,
    heartbeat_task: JoinHandleSlot,

    cleaning_up: AtomicBool,
}

/// The public entry point to this crate: connects to a `ws://`/`wss://`
/// endpoint, runs the send/receive/heartbeat loops in the background, and
/// drives automatic reconnection on top of them.
///
/// Generic over the transport because `Transport::connect` returns `Self`
/// and therefore isn't object-safe — there's no `dyn Transport` to store, so
/// `Client` is parameterized instead, mirroring how the teacher's own
/// connection plumbing is generic over its stream type rather than boxing it.
/// `Client` is cheap to clone (an `Arc` around shared state), the way the
/// teacher's `Writer`/`Reader` halves are handed out from one shared owner.
pub struct Client<T: Transport = TcpClientTransport> {
    inner: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport + 'static> Client<T> {
    /// Builds a client around `config`. Spawns the event-forwarding tasks
    /// immediately, so this must be called from within a running tokio
    /// runtime; the connection itself isn't opened until `connect`.
    pub fn new(config: ClientConfig) -> Self {
        let state = Arc::new(StateManager::new());
        let heartbeat = HeartbeatManager::new(
            config.heartbeat_interval,
            config.heartbeat_timeout,
            config.max_consecutive_heartbeat_timeouts,
        );
        let strategy = config.reconnect_strategy.build(config.max_reconnect_attempts);
        let (reconnect, mut reconnect_events) = ReconnectManager::new(strategy);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (heartbeat_events_tx, mut heartbeat_events_rx) = mpsc::unbounded_channel();
        let (recv_tx, recv_rx) = mpsc::unbounded_channel();

        let forward_events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = heartbeat_events_rx.recv().await {
                if forward_events_tx.send(ClientEvent::Heartbeat(event)).is_err() {
                    return;
                }
            }
        });

        let forward_events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = reconnect_events.recv().await {
                if forward_events_tx.send(ClientEvent::Reconnect(event)).is_err() {
                    return;
                }
            }
        });

        let forward_events_tx = events_tx.clone();
        let mut state_changes = state.subscribe();
        tokio::spawn(async move {
            loop {
                let current = *state_changes.borrow();
                if forward_events_tx.send(ClientEvent::State(current)).is_err() {
                    return;
                }
                if state_changes.changed().await.is_err() {
                    return;
                }
            }
        });

        Self {
            inner: Arc::new(Shared {
                config,
                state,
                heartbeat,
                heartbeat_events_tx,
                reconnect,
                events_tx,
                events_rx: SyncMutex::new(Some(events_rx)),
                url: SyncMutex::new(None),
                transport: SyncMutex::new(None),
                send_tx: SyncMutex::new(None),
                handshake_result: SyncMutex::new(None),
                recv_tx,
                recv_rx: Mutex::new(recv_rx),
                send_task: SyncMutex::new(None),
                recv_task: SyncMutex::new(None),
                heartbeat_task: SyncMutex::new(None),
                cleaning_up: AtomicBool::new(false),
            }),
        }
    }

    /// Opens a connection to `url` (`ws://` or `wss://`). Requires the
    /// client to currently be `Closed`. If the initial attempt fails and
    /// auto-reconnect is enabled, hands off to the reconnect manager and
    /// waits up to `reconnect_timeout` for it to either succeed or give up.
    pub async fn connect(&self, url: &str) -> Result<(), Error> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::InvalidUrl(format!(
                "expected a ws:// or wss:// URL, got {url:?}"
            )));
        }
        if self.inner.state.current().await != ConnectionState::Closed {
            return Err(Error::InvalidState);
        }

        *self.inner.url.lock().unwrap() = Some(url.to_string());

        match self.perform_connection(url).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.inner.config.enable_auto_reconnect {
                    self.start_reconnect(err).await
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn perform_connection(&self, url: &str) -> Result<(), Error> {
        self.inner.state.update(ConnectionState::Connecting).await;
        info!("connecting to {url}");

        let parsed = parse_ws_url(url)?;
        let transport = match tokio::time::timeout(
            self.inner.config.connect_timeout,
            T::connect(&parsed.host, parsed.port, parsed.use_tls),
        )
        .await
        {
            Ok(Ok(transport)) => transport,
            Ok(Err(err)) => {
                self.inner.state.update(ConnectionState::Closed).await;
                return Err(err);
            }
            Err(_) => {
                self.inner.state.update(ConnectionState::Closed).await;
                return Err(Error::ConnectionTimeout);
            }
        };
        let transport = Arc::new(transport);

        let handshake_config = HandshakeConfig {
            subprotocols: &self.inner.config.subprotocols,
            extensions: self.inner.config.extensions.clone(),
            extra_headers: &self.inner.config.extra_headers,
            timeout: self.inner.config.connect_timeout,
        };
        let handshake_result = match handshake::perform(transport.as_ref(), &parsed, handshake_config).await
        {
            Ok(result) => result,
            Err(err) => {
                error!("handshake with {url} failed: {err}");
                self.inner.state.update(ConnectionState::Closed).await;
                let _ = transport.disconnect().await;
                return Err(err);
            }
        };
        debug!(
            "handshake complete, negotiated protocol={:?}",
            handshake_result.negotiated_protocol
        );

        *self.inner.transport.lock().unwrap() = Some(transport.clone());
        *self.inner.handshake_result.lock().unwrap() = Some(handshake_result);

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        *self.inner.send_tx.lock().unwrap() = Some(send_tx.clone());

        let send_task = self.clone().spawn_send_loop(transport.clone(), send_rx);
        let recv_task = self.clone().spawn_receive_loop(transport.clone());
        *self.inner.send_task.lock().unwrap() = Some(send_task);
        *self.inner.recv_task.lock().unwrap() = Some(recv_task);

        self.inner.state.update(ConnectionState::Open).await;
        info!("connection to {url} established");

        if self.inner.config.enable_heartbeat {
            self.inner.heartbeat.reset().await;
            let heartbeat_events = self.inner.heartbeat_events_tx.clone();
            let this = self.clone();
            let on_timeout: Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync> =
                Arc::new(move || {
                    let this = this.clone();
                    Box::pin(async move { this.handle_heartbeat_timeout().await })
                });
            let handle = self.inner.heartbeat.spawn(send_tx, heartbeat_events, on_timeout);
            *self.inner.heartbeat_task.lock().unwrap() = Some(handle);
        }

        Ok(())
    }

    fn spawn_send_loop(
        self,
        transport: Arc<T>,
        mut queue: mpsc::UnboundedReceiver<Message>,
    ) -> JoinHandle<()> {
        let encoder = Encoder::new(self.inner.config.web_socket_config.max_frame_size);
        tokio::spawn(async move {
            loop {
                let state = self.inner.state.current().await;
                if !matches!(state, ConnectionState::Open | ConnectionState::Closing) {
                    return;
                }

                let Some(message) = queue.recv().await else {
                    return;
                };
                let is_close = message.is_close();

                let bytes = match encoder.encode_message(message) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!("dropping outgoing message that failed to encode: {err}");
                        continue;
                    }
                };

                if let Err(err) = transport.send(&bytes).await {
                    error!("transport send failed, tearing down connection: {err}");
                    self.inner.state.update(ConnectionState::Closing).await;
                    self.inner.state.update(ConnectionState::Closed).await;
                    self.cleanup().await;
                    return;
                }

                if is_close {
                    return;
                }
            }
        })
    }

    fn spawn_receive_loop(self, transport: Arc<T>) -> JoinHandle<()> {
        let max_frame_size = self.inner.config.web_socket_config.max_frame_size;
        let max_message_size = self.inner.config.web_socket_config.max_message_size;
        let fragment_timeout = self.inner.config.web_socket_config.fragment_timeout;

        tokio::spawn(async move {
            let mut decoder = Decoder::new(max_frame_size);
            let mut assembler = MessageAssembler::new(max_message_size, fragment_timeout);

            loop {
                let state = self.inner.state.current().await;
                if !matches!(state, ConnectionState::Open | ConnectionState::Closing) {
                    return;
                }

                let chunk = match transport.receive().await {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        error!("transport receive failed, tearing down connection: {err}");
                        self.inner.state.update(ConnectionState::Closing).await;
                        self.inner.state.update(ConnectionState::Closed).await;
                        self.cleanup().await;
                        return;
                    }
                };

                let frames = match decoder.decode(&chunk) {
                    Ok(frames) => frames,
                    Err(err) => {
                        error!("protocol violation on receive: {err}");
                        self.inner.state.update(ConnectionState::Closing).await;
                        self.inner.state.update(ConnectionState::Closed).await;
                        self.cleanup().await;
                        return;
                    }
                };

                for frame in frames {
                    let message = match assembler.push(frame) {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(err) => {
                            error!("protocol violation assembling message: {err}");
                            self.inner.state.update(ConnectionState::Closing).await;
                            self.inner.state.update(ConnectionState::Closed).await;
                            self.cleanup().await;
                            return;
                        }
                    };

                    if self.dispatch_message(message).await {
                        return;
                    }
                }
            }
        })
    }

    /// Handles one reassembled message from the receive loop. Returns `true`
    /// if the receive loop should stop (a close frame was processed).
    async fn dispatch_message(&self, message: Message) -> bool {
        match message {
            Message::Ping(payload) => {
                debug!("received ping, enqueueing matching pong");
                if let Some(send_tx) = self.inner.send_tx.lock().unwrap().clone() {
                    let _ = send_tx.send(Message::Pong(payload));
                }
                false
            }
            Message::Pong(payload) => {
                let payload = payload.unwrap_or_default();
                self.inner
                    .heartbeat
                    .handle_pong(&payload, &self.inner.heartbeat_events_tx)
                    .await;
                false
            }
            Message::Close { code, reason } => {
                info!("received close frame: code={code} reason={reason:?}");
                if self.inner.state.current().await == ConnectionState::Open {
                    // Write the reply directly and await it rather than
                    // handing it to the send queue: `cleanup` (below) aborts
                    // the send loop immediately after, so an enqueued close
                    // reply would race that abort and typically never reach
                    // the wire. Writing it here guarantees it's sent (or the
                    // failure observed) before teardown begins.
                    if let Err(err) = self
                        .write_directly(Message::Close {
                            code,
                            reason: String::new(),
                        })
                        .await
                    {
                        warn!("failed to send close-frame reply: {err}");
                    }
                }
                self.inner.state.update(ConnectionState::Closed).await;
                self.cleanup().await;
                true
            }
            text_or_binary => {
                let _ = self.inner.recv_tx.send(text_or_binary);
                false
            }
        }
    }

    /// Encodes `message` and writes it straight to the transport, bypassing
    /// the send queue and awaiting completion. Used only for the close-frame
    /// reply the receive loop sends right before tearing the connection down,
    /// where the normal queue-and-abort path could drop the reply.
    async fn write_directly(&self, message: Message) -> Result<(), Error> {
        let transport = self.inner.transport.lock().unwrap().clone();
        let Some(transport) = transport else {
            return Ok(());
        };
        let encoder = Encoder::new(self.inner.config.web_socket_config.max_frame_size);
        let bytes = encoder.encode_message(message)?;
        transport.send(&bytes).await
    }

    /// Enqueues a message for the send loop. Requires the connection to be
    /// `Open`.
    pub async fn send(&self, message: Message) -> Result<(), Error> {
        if self.inner.state.current().await != ConnectionState::Open {
            return Err(Error::InvalidState);
        }
        let send_tx = self
            .inner
            .send_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::InvalidState)?;
        send_tx.send(message).map_err(|_| Error::CommunicationError)
    }

    /// Sends an application-level ping outside of the heartbeat's own
    /// automatic pings.
    pub async fn ping(&self, data: Option<Vec<u8>>) -> Result<(), Error> {
        self.send(Message::Ping(data)).await
    }

    /// Pulls the next text/binary message off the receive queue, waiting
    /// while the connection remains open or closing and the queue is empty.
    pub async fn receive(&self) -> Result<Message, Error> {
        loop {
            {
                let mut rx = self.inner.recv_rx.lock().await;
                tokio::select! {
                    message = rx.recv() => {
                        return message.ok_or(Error::InvalidState);
                    }
                    _ = sleep(RECEIVE_POLL_INTERVAL) => {}
                }
            }

            let state = self.inner.state.current().await;
            if !matches!(state, ConnectionState::Open | ConnectionState::Closing) {
                let mut rx = self.inner.recv_rx.lock().await;
                return match rx.try_recv() {
                    Ok(message) => Ok(message),
                    Err(_) => Err(Error::InvalidState),
                };
            }
        }
    }

    /// A `futures::Stream` view over the lifecycle/heartbeat/reconnect event
    /// channel, mirroring the teacher's `event.rs::EventStream`. This mpsc
    /// channel has a single consumer: the first call returns a live stream,
    /// any later call gets one that's already exhausted.
    pub fn events(&self) -> EventStream {
        match self.inner.events_rx.lock().unwrap().take() {
            Some(rx) => EventStream::new(rx),
            None => {
                let (_tx, rx) = mpsc::unbounded_channel();
                EventStream::new(rx)
            }
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.state.current().await
    }

    pub async fn state_history(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.inner.state.history().await
    }

    pub async fn heartbeat_stats(&self) -> HeartbeatStats {
        self.inner.heartbeat.stats().await
    }

    pub async fn negotiated_protocol(&self) -> Option<String> {
        self.inner
            .handshake_result
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|result| result.negotiated_protocol.clone())
    }

    /// Initiates a graceful close: disables reconnection, sends a close
    /// frame, waits briefly for the peer's reply, then forces cleanup
    /// regardless. Idempotent — already `Closed`/`Closing` returns `Ok(())`.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), Error> {
        let reason = reason.into();
        let current = self.inner.state.current().await;
        if matches!(current, ConnectionState::Closed | ConnectionState::Closing) {
            return Ok(());
        }

        self.inner.reconnect.disable();
        self.inner.reconnect.stop().await;

        if let Err(err) = validate_close_code(code) {
            warn!("sending close with a non-standard code: {err}");
        }

        self.inner.state.update(ConnectionState::Closing).await;
        if let Some(send_tx) = self.inner.send_tx.lock().unwrap().clone() {
            let _ = send_tx.send(Message::Close { code, reason });
        }

        let _ = self
            .inner
            .state
            .wait_for(ConnectionState::Closed, GRACEFUL_CLOSE_WAIT)
            .await;

        self.cleanup().await;
        self.inner.state.update(ConnectionState::Closed).await;
        Ok(())
    }

    /// Idempotent teardown of everything a live connection owns: the
    /// heartbeat loop, the send/receive background tasks, and the
    /// transport. Safe to call from any of the three loops, or from `close`.
    async fn cleanup(&self) {
        if self.inner.cleaning_up.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.heartbeat.stop();
        if let Some(handle) = self.inner.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.send_task.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.send_tx.lock().unwrap().take();

        let transport = self.inner.transport.lock().unwrap().take();
        if let Some(transport) = transport {
            let _ = transport.disconnect().await;
        }
        self.inner.handshake_result.lock().unwrap().take();

        self.inner.cleaning_up.store(false, Ordering::SeqCst);

        // Abort the receive task last, after every other await in this
        // function has already completed: `cleanup` is itself invoked from
        // inside the receive loop (a server close frame, or a decode/
        // assembler error) as well as from `close`/heartbeat-timeout. If the
        // receive task aborted its own handle any earlier, the runtime could
        // drop the rest of this function - including the disconnect call and
        // the flag reset above - the next time it's polled, leaving
        // `cleaning_up` stuck `true`.
        if let Some(handle) = self.inner.recv_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn handle_heartbeat_timeout(&self) {
        warn!("heartbeat timed out, closing connection");
        self.inner.state.update(ConnectionState::Closing).await;
        self.cleanup().await;
        self.inner.state.update(ConnectionState::Closed).await;

        if self.inner.config.enable_auto_reconnect && self.inner.url.lock().unwrap().is_some() {
            let _ = self.start_reconnect(Error::ConnectionTimeout).await;
        }
    }

    /// Enables and starts the reconnect manager against the last connected
    /// `url`, then waits up to `reconnect_timeout` for it to settle into
    /// `Idle` (reconnected) or `Stopped` (gave up). The reconnect loop keeps
    /// running in the background even if this wait itself times out.
    async fn start_reconnect(&self, triggering_error: Error) -> Result<(), Error> {
        self.inner.reconnect.enable();

        let this = self.clone();
        let connect_action: Arc<
            dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> + Send + Sync,
        > = Arc::new(move || {
            let this = this.clone();
            Box::pin(async move {
                let url = this
                    .inner
                    .url
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or(Error::InvalidState)?;
                this.perform_connection(&url).await
            })
        });

        let manager = self.inner.reconnect.clone();
        // Synchronously move off `Idle` before spawning: otherwise a caller
        // polling `state()` right away could see the constructor's initial
        // `Idle` value and mistake it for an already-completed reconnect.
        manager.mark_pending().await;
        tokio::spawn(manager.clone().run(triggering_error, connect_action));

        let settle = async {
            loop {
                match manager.state().await {
                    ReconnectState::Idle | ReconnectState::Stopped => return manager.state().await,
                    _ => sleep(RECONNECT_POLL_INTERVAL).await,
                }
            }
        };

        match tokio::time::timeout(self.inner.config.reconnect_timeout, settle).await {
            Ok(ReconnectState::Idle) => Ok(()),
            Ok(_) => Err(Error::ConnectionFailed(
                "reconnect attempts were abandoned".to_string(),
            )),
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }
}

impl Client<TcpClientTransport> {
    /// Convenience constructor for the default TCP/TLS transport.
    pub fn with_default_transport(config: ClientConfig) -> Self {
        Self::new(config)
    }
}
