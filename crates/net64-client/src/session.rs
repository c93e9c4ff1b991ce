//! The session task and its handle.
//!
//! [`SessionHandle::spawn`] starts one background task that owns the
//! transport, the [`ConnectionMachine`] and every timer. The handle talks to
//! it over a command channel; state and players are observable through
//! [`watch`] channels and everything else through [`SessionEvent`]s.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use net64_net::{
    ClientMessage, Connector, Credentials, MessageDecoder, Server, TcpConnector, TransportError,
    connect_with_timeout, encode_client, encode_frame,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::machine::{ConnectionMachine, Effect};
use crate::registry::PlayerMap;
use crate::state::ConnectionState;

const READ_BUFFER: usize = 8192;

/// How long closing may wait for queued frames (such as `Goodbye`) to go out.
const CLOSE_FLUSH: Duration = Duration::from_millis(250);

type Reply = oneshot::Sender<Result<(), SessionError>>;
type PendingConnect<S> = Pin<Box<dyn Future<Output = Result<S, TransportError>> + Send>>;
/// An in-flight write. Hands the writer back when done.
type PendingWrite<S> =
    Pin<Box<dyn Future<Output = (WriteHalf<S>, Result<(), TransportError>)> + Send>>;

enum Command {
    Connect { server: Server, reply: Reply },
    Disconnect { reply: Reply },
    SendCredentials { credentials: Credentials, reply: Reply },
    Subscribe(mpsc::UnboundedSender<SessionEvent>),
    Shutdown { done: oneshot::Sender<()> },
}

/// Cheap, cloneable handle to a running session.
///
/// The session task stops once [`shutdown`](Self::shutdown) is called or every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    players: watch::Receiver<Arc<PlayerMap>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { server, .. } => write!(f, "Connect({}:{})", server.host(), server.port),
            Self::Disconnect { .. } => f.write_str("Disconnect"),
            Self::SendCredentials { .. } => f.write_str("SendCredentials"),
            Self::Subscribe(_) => f.write_str("Subscribe"),
            Self::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl SessionHandle {
    /// Spawn a session on the current tokio runtime.
    pub fn spawn<C: Connector>(config: SessionConfig, connector: C, clock: Arc<dyn Clock>) -> Self {
        let machine = ConnectionMachine::new(&config, clock);
        let state = machine.state_watch().subscribe();
        let players = machine.registry().subscribe();
        let (commands, rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            decoder: MessageDecoder::new(config.frame.clone()),
            machine,
            connector: Arc::new(connector),
            config,
            commands: rx,
            connecting: None,
            reader: None,
            writer: None,
            writing: None,
            outbox: VecDeque::new(),
            auth_deadline: None,
            auth_retry_at: None,
            reconnect_at: None,
        };
        tokio::spawn(task.run());

        Self {
            commands,
            state,
            players,
        }
    }

    /// Spawn a session that dials real TCP and uses the system clock.
    pub fn spawn_tcp(config: SessionConfig) -> Self {
        Self::spawn(config, TcpConnector, Arc::new(SystemClock))
    }

    /// Start connecting to `server`. Returns once the attempt has started;
    /// its outcome arrives as state changes and events.
    pub async fn connect(&self, server: Server) -> Result<(), SessionError> {
        self.request(|reply| Command::Connect { server, reply }).await
    }

    /// Say goodbye and close the transport.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Answer `AuthRequired`, or retry after a denial once the throttle elapsed.
    pub async fn send_credentials(&self, credentials: Credentials) -> Result<(), SessionError> {
        self.request(|reply| Command::SendCredentials { credentials, reply })
            .await
    }

    /// Receive every future event. The first subscriber also gets events
    /// emitted before anyone was listening.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Subscribe(tx));
        rx
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn players(&self) -> watch::Receiver<Arc<PlayerMap>> {
        self.players.clone()
    }

    /// Disconnect if needed and stop the session task.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

struct SessionTask<C: Connector> {
    machine: ConnectionMachine,
    connector: Arc<C>,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    connecting: Option<PendingConnect<C::Stream>>,
    reader: Option<ReadHalf<C::Stream>>,
    /// Idle writer. `None` while `writing` holds it or without a transport.
    writer: Option<WriteHalf<C::Stream>>,
    writing: Option<PendingWrite<C::Stream>>,
    /// Framed messages waiting for the writer.
    outbox: VecDeque<Vec<u8>>,
    decoder: MessageDecoder,
    auth_deadline: Option<Instant>,
    auth_retry_at: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl<C: Connector> SessionTask<C> {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_BUFFER];
        tracing::debug!("Session task started");

        loop {
            self.sync_auth_timer();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.stop().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                result = pending_connect(&mut self.connecting) => {
                    self.connecting = None;
                    let effects = match result {
                        Ok(stream) => {
                            let (reader, writer) = tokio::io::split(stream);
                            self.reader = Some(reader);
                            self.writer = Some(writer);
                            self.machine.on_transport_ready()
                        }
                        Err(e) => self.machine.on_transport_failed(e),
                    };
                    self.execute(effects).await;
                }
                (writer, result) = pending_write(&mut self.writing) => {
                    self.writing = None;
                    match result {
                        Ok(()) => {
                            self.writer = Some(writer);
                            self.start_write();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Send failed");
                            let effects = self.machine.on_transport_lost(e);
                            self.execute(effects).await;
                        }
                    }
                }
                read = read_some(&mut self.reader, &mut buf) => match read {
                    Ok(0) => {
                        let effects = self.machine.on_transport_lost(TransportError::Closed);
                        self.execute(effects).await;
                    }
                    Ok(n) => {
                        self.decoder.extend(&buf[..n]);
                        self.drain_messages().await;
                    }
                    Err(e) => {
                        let effects = self.machine.on_transport_lost(TransportError::Io(e));
                        self.execute(effects).await;
                    }
                },
                () = sleep_until_opt(self.auth_deadline) => {
                    self.auth_deadline = None;
                    let effects = self.machine.on_auth_timeout(self.config.auth_timeout);
                    self.execute(effects).await;
                }
                () = sleep_until_opt(self.auth_retry_at) => {
                    self.auth_retry_at = None;
                    let effects = self.machine.on_auth_retry_due();
                    self.execute(effects).await;
                }
                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let effects = self.machine.on_reconnect_due();
                    self.execute(effects).await;
                }
            }
        }

        tracing::debug!("Session task stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, "Session command");
        match command {
            Command::Connect { server, reply } => {
                let result = self.machine.connect(server);
                self.respond(result, reply).await;
            }
            Command::Disconnect { reply } => {
                let result = self.machine.disconnect();
                self.respond(result, reply).await;
            }
            Command::SendCredentials { credentials, reply } => {
                let result = self.machine.send_credentials(credentials);
                self.respond(result, reply).await;
            }
            Command::Subscribe(tx) => self.machine.events_mut().attach(tx),
            Command::Shutdown { .. } => {}
        }
    }

    async fn respond(&mut self, result: Result<Vec<Effect>, SessionError>, reply: Reply) {
        match result {
            Ok(effects) => {
                self.execute(effects).await;
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Command rejected");
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Feed every whole message in the buffer to the machine.
    async fn drain_messages(&mut self) {
        loop {
            match self.decoder.next_message() {
                Ok(Some(msg)) => {
                    let effects = self.machine.on_message(msg);
                    self.execute(effects).await;
                }
                Ok(None) => break,
                Err(e) => {
                    let effects = self.machine.on_decode_error(e);
                    self.execute(effects).await;
                    break;
                }
            }
        }
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Open { host, port } => {
                    self.close_transport();
                    self.auth_retry_at = None;
                    self.reconnect_at = None;
                    let attempt = connect_with_timeout(
                        Arc::clone(&self.connector),
                        host,
                        port,
                        self.config.connect_timeout,
                    );
                    self.connecting = Some(Box::pin(attempt));
                }
                Effect::Send(msg) => {
                    if let Err(e) = self.enqueue(&msg) {
                        tracing::warn!(error = %e, "Send failed");
                        queue.extend(self.machine.on_transport_lost(e));
                    }
                }
                Effect::Close => {
                    self.flush_before_close().await;
                    self.close_transport();
                    self.auth_retry_at = None;
                    self.reconnect_at = None;
                }
                Effect::ScheduleAuthRetry(delay) => {
                    self.auth_retry_at = Some(Instant::now() + delay);
                }
                Effect::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
            }
        }
        self.start_write();
    }

    /// Frame `msg` and queue it behind any write already in flight.
    fn enqueue(&mut self, msg: &ClientMessage) -> Result<(), TransportError> {
        if self.writer.is_none() && self.writing.is_none() {
            return Err(TransportError::Closed);
        }
        let payload = encode_client(msg)
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.outbox.push_back(encode_frame(&payload, &self.config.frame)?);
        Ok(())
    }

    /// Hand everything queued to a write future the run loop polls, so a
    /// stalled peer never blocks commands or timers.
    fn start_write(&mut self) {
        if self.writing.is_some() || self.outbox.is_empty() {
            return;
        }
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        let batch: Vec<u8> = self.outbox.drain(..).flatten().collect();
        let timeout = self.config.write_timeout;

        self.writing = Some(Box::pin(async move {
            let result = match tokio::time::timeout(timeout, write_batch(&mut writer, &batch)).await {
                Ok(result) => result.map_err(TransportError::Io),
                Err(_) => Err(TransportError::WriteTimeout(timeout)),
            };
            (writer, result)
        }));
    }

    /// Give queued frames a short, bounded chance to reach the peer. A write
    /// that is still stuck after [`CLOSE_FLUSH`] is abandoned.
    async fn flush_before_close(&mut self) {
        let deadline = Instant::now() + CLOSE_FLUSH;
        if let Some(write) = self.writing.take() {
            match tokio::time::timeout_at(deadline, write).await {
                Ok((writer, Ok(()))) => self.writer = Some(writer),
                _ => {
                    tracing::debug!(dropped = self.outbox.len(), "Write stalled, closing without flush");
                    return;
                }
            }
        }
        if self.outbox.is_empty() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let batch: Vec<u8> = self.outbox.drain(..).flatten().collect();
        if !matches!(tokio::time::timeout_at(deadline, write_batch(writer, &batch)).await, Ok(Ok(()))) {
            tracing::debug!("Could not flush before close");
        }
    }

    fn close_transport(&mut self) {
        if self.reader.is_some() || self.connecting.is_some() {
            tracing::debug!("Closing transport");
        }
        self.connecting = None;
        self.reader = None;
        self.writer = None;
        self.writing = None;
        self.outbox.clear();
        self.decoder.clear();
        self.auth_deadline = None;
    }

    /// Arm the auth timer when an attempt goes out; disarm once answered.
    fn sync_auth_timer(&mut self) {
        if !self.machine.awaiting_auth_reply() {
            self.auth_deadline = None;
        } else if self.auth_deadline.is_none() {
            self.auth_deadline = Some(Instant::now() + self.config.auth_timeout);
        }
    }

    async fn stop(&mut self) {
        if self.machine.state().holds_transport()
            && let Ok(effects) = self.machine.disconnect()
        {
            self.execute(effects).await;
        }
        self.execute(vec![Effect::Close]).await;
    }
}

async fn pending_connect<S>(slot: &mut Option<PendingConnect<S>>) -> Result<S, TransportError> {
    match slot {
        Some(attempt) => attempt.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn write_batch<W: AsyncWrite + Unpin>(writer: &mut W, batch: &[u8]) -> io::Result<()> {
    writer.write_all(batch).await?;
    writer.flush().await
}

async fn pending_write<S>(
    slot: &mut Option<PendingWrite<S>>,
) -> (WriteHalf<S>, Result<(), TransportError>) {
    match slot {
        Some(write) => write.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn read_some<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
