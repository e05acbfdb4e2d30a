use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use boardwalk_core::{ClientControl, ClientEnvelope, ServerEnvelope, SessionState};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::action::{Action, LocalState};
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::reconcile::{ConnectionStatus, SyncCore, SyncEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum DriverCommand {
    Flush,
    RequestSnapshot,
    Close,
}

struct Shared {
    core: Mutex<SyncCore>,
    opens: AtomicU64,
}

/// Handle to a running sync connection. All methods are cheap; network work
/// happens on a background task.
pub struct SyncClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<DriverCommand>,
    task: JoinHandle<()>,
}

enum ConnectionEnd {
    Closed,
    Lost,
}

impl SyncClient {
    /// Opens the first connection. Failure here is returned rather than
    /// retried; later drops reconnect with backoff.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(SyncClient, mpsc::UnboundedReceiver<SyncEvent>), SyncError> {
        let shared = Arc::new(Shared {
            core: Mutex::new(SyncCore::new(config.reconnect, config.outbox_capacity)),
            opens: AtomicU64::new(0),
        });
        let socket = open(&config, &shared).await?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(
            Arc::clone(&shared),
            config,
            socket,
            command_rx,
            events_tx,
        ));
        Ok((
            SyncClient {
                shared,
                commands,
                task,
            },
            events,
        ))
    }

    pub fn send(&self, action: impl Into<Action>) -> Result<(), SyncError> {
        let action = action.into();
        let is_mutation = matches!(action, Action::Mutate(_));
        self.shared.core.lock().send(action)?;
        if is_mutation {
            self.commands
                .send(DriverCommand::Flush)
                .map_err(|_| SyncError::Closed)?;
        }
        Ok(())
    }

    pub fn request_snapshot(&self) -> Result<(), SyncError> {
        self.commands
            .send(DriverCommand::RequestSnapshot)
            .map_err(|_| SyncError::Closed)
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state().clone()
    }

    pub fn local_state(&self) -> LocalState {
        self.shared.core.lock().local().clone()
    }

    pub fn player_id(&self) -> Option<String> {
        self.shared.core.lock().player_id().map(str::to_string)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.core.lock().status()
    }

    /// Transport opens so far, first connection included.
    pub fn connection_opens(&self) -> u64 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub async fn close(self) {
        self.shared.core.lock().close();
        let _ = self.commands.send(DriverCommand::Close);
        if let Err(err) = self.task.await {
            debug!(error = %err, "sync driver ended abnormally");
        }
    }
}

async fn open(config: &ClientConfig, shared: &Shared) -> Result<Socket, SyncError> {
    let (socket, _) = timeout(config.connect_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| SyncError::Connect(format!("timed out connecting to {}", config.url)))?
        .map_err(|err| SyncError::Connect(err.to_string()))?;
    shared.opens.fetch_add(1, Ordering::SeqCst);
    Ok(socket)
}

async fn drive(
    shared: Arc<Shared>,
    config: ClientConfig,
    mut socket: Socket,
    mut commands: mpsc::UnboundedReceiver<DriverCommand>,
    events: mpsc::UnboundedSender<SyncEvent>,
) {
    loop {
        if let ConnectionEnd::Closed =
            run_connection(&shared, &config, socket, &mut commands, &events).await
        {
            let _ = events.send(SyncEvent::StatusChanged {
                status: ConnectionStatus::Disconnected,
            });
            return;
        }

        socket = loop {
            let next = shared.core.lock().on_disconnect();
            let Some(delay) = next else {
                let attempts = shared.core.lock().reconnect_attempts();
                warn!(url = %config.url, attempts, "giving up on reconnecting");
                let _ = events.send(SyncEvent::StatusChanged {
                    status: ConnectionStatus::Disconnected,
                });
                let _ = events.send(SyncEvent::GaveUp { attempts });
                return;
            };
            let status = shared.core.lock().status();
            let _ = events.send(SyncEvent::StatusChanged { status });
            debug!(delay_ms = delay.as_millis() as u64, ?status, "scheduling reconnect");

            let wake = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = sleep_until(wake) => break,
                    command = commands.recv() => match command {
                        Some(DriverCommand::Close) | None => return,
                        // queued mutations and snapshot requests go out on reconnect
                        Some(DriverCommand::Flush | DriverCommand::RequestSnapshot) => {}
                    }
                }
            }

            match open(&config, &shared).await {
                Ok(socket) => break socket,
                Err(err) => warn!(url = %config.url, error = %err, "reconnect attempt failed"),
            }
        };
    }
}

async fn run_connection(
    shared: &Shared,
    config: &ClientConfig,
    socket: Socket,
    commands: &mut mpsc::UnboundedReceiver<DriverCommand>,
    events: &mpsc::UnboundedSender<SyncEvent>,
) -> ConnectionEnd {
    let (mut sink, mut stream) = socket.split();

    let greeting = shared.core.lock().on_connected();
    info!(url = %config.url, queued = greeting.len(), "sync connection open");
    let _ = events.send(SyncEvent::StatusChanged {
        status: ConnectionStatus::Connected,
    });
    for envelope in &greeting {
        if send_envelope(&mut sink, envelope).await.is_err() {
            return ConnectionEnd::Lost;
        }
    }

    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(DriverCommand::Flush) => {
                    let pending = shared.core.lock().take_outbox();
                    for envelope in &pending {
                        if send_envelope(&mut sink, envelope).await.is_err() {
                            return ConnectionEnd::Lost;
                        }
                    }
                }
                Some(DriverCommand::RequestSnapshot) => {
                    let request = ClientEnvelope::control(ClientControl::RequestSnapshot);
                    if send_envelope(&mut sink, &request).await.is_err() {
                        return ConnectionEnd::Lost;
                    }
                }
                Some(DriverCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return ConnectionEnd::Closed;
                }
            },
            _ = heartbeat.tick() => {
                let ping = ClientEnvelope::control(ClientControl::Ping);
                if send_envelope(&mut sink, &ping).await.is_err() {
                    return ConnectionEnd::Lost;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let envelope: ServerEnvelope = match serde_json::from_str(text.as_str()) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            warn!(error = %err, "ignoring undecodable server frame");
                            continue;
                        }
                    };
                    let outcome = shared.core.lock().on_server_message(envelope);
                    for event in outcome.events {
                        let _ = events.send(event);
                    }
                    if outcome.request_snapshot {
                        let request = ClientEnvelope::control(ClientControl::RequestSnapshot);
                        if send_envelope(&mut sink, &request).await.is_err() {
                            return ConnectionEnd::Lost;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the connection");
                    return ConnectionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "sync connection errored");
                    return ConnectionEnd::Lost;
                }
                None => return ConnectionEnd::Lost,
            },
        }
    }
}

async fn send_envelope<S>(sink: &mut S, envelope: &ClientEnvelope) -> Result<(), SyncError>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(envelope)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|_| SyncError::Closed)
}
