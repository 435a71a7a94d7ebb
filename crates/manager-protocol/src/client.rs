//! Manager session client
//!
//! One TCP session, split into a write half guarded by the client and a
//! read half owned by a background reader task. The reader routes
//! responses to the waiting action by `ActionID` and fans events out on a
//! broadcast channel.
//!
//! Actions are serialised by a FIFO request lock, so at most one is in
//! flight at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::constants::wire::ACTION_ID_PREFIX;
use crate::error::{ManagerError, Result};
use crate::message::{read_banner, read_message, Action, Message, MessageKind};

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 256;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingBanner,
    Authenticating,
    Ready,
}

type Waiter = oneshot::Sender<Result<Message>>;

/// Outstanding actions: ActionID -> (session generation, waiter)
type PendingMap = Arc<Mutex<HashMap<String, (u64, Waiter)>>>;

struct Session {
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
    generation: u64,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Everything the reader task shares with the client
struct ReaderContext {
    generation: u64,
    current_generation: Arc<AtomicU64>,
    state: Arc<Mutex<ConnectionState>>,
    pending: PendingMap,
    events: broadcast::Sender<Message>,
}

/// Client for the switch manager interface
///
/// Construct once per process and share by `Arc`.
///
/// # Example
///
/// ```ignore
/// let client = ManagerClient::new(ManagerConfig::new("127.0.0.1", 5038, "ivr", secret));
/// client.ensure_connected().await?;
/// client.reload_dialplan().await?;
/// ```
pub struct ManagerClient {
    config: ManagerConfig,
    state: Arc<Mutex<ConnectionState>>,
    session: tokio::sync::Mutex<Option<Session>>,
    request_lock: tokio::sync::Mutex<()>,
    pending: PendingMap,
    events: broadcast::Sender<Message>,
    next_action_id: AtomicU64,
    generation: Arc<AtomicU64>,
    banner: Mutex<Option<String>>,
}

impl ManagerClient {
    pub fn new(config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            session: tokio::sync::Mutex::new(None),
            request_lock: tokio::sync::Mutex::new(()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            next_action_id: AtomicU64::new(1),
            generation: Arc::new(AtomicU64::new(0)),
            banner: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Greeting line of the current or last session
    pub fn banner(&self) -> Option<String> {
        self.banner.lock().clone()
    }

    /// Receive events sent by the switch from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn next_id(&self) -> String {
        let n = self.next_action_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", ACTION_ID_PREFIX, n)
    }

    /// Open a session and log in, once.
    ///
    /// Connect, banner and login together must finish within the connect
    /// timeout. Returns immediately if a session is already ready.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() && self.is_ready() {
            return Ok(());
        }
        // Drop any dead session before replacing it.
        if let Some(old) = session.take() {
            self.fail_pending(old.generation);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connecting);
        log::info!("Connecting to manager interface at {}", self.config.address());

        let timeout = self.config.connect_timeout();
        let handshake = tokio::time::timeout(timeout, self.handshake()).await;
        let (reader, writer) = match handshake {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                log::warn!("Manager login to {} failed: {}", self.config.address(), e);
                return Err(e);
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                log::warn!(
                    "Manager login to {} timed out after {}ms",
                    self.config.address(),
                    self.config.connect_timeout_ms
                );
                return Err(ManagerError::timeout("login", self.config.connect_timeout_ms));
            }
        };

        let context = ReaderContext {
            generation,
            current_generation: self.generation.clone(),
            state: self.state.clone(),
            pending: self.pending.clone(),
            events: self.events.clone(),
        };
        // Ready must be set before the reader can observe a close.
        self.set_state(ConnectionState::Ready);
        let reader_task = tokio::spawn(read_loop(reader, context));
        *session = Some(Session {
            writer,
            reader_task,
            generation,
        });
        log::info!("Manager session ready on {}", self.config.address());
        Ok(())
    }

    /// TCP connect, read the banner, then send Login and await its answer
    async fn handshake(&self) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream = TcpStream::connect(self.config.address()).await?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        self.set_state(ConnectionState::AwaitingBanner);
        let banner = read_banner(&mut reader).await?;
        log::debug!("Manager banner: {}", banner);
        *self.banner.lock() = Some(banner);

        self.set_state(ConnectionState::Authenticating);
        let login = Action::new("Login")
            .with_action_id(self.next_id())
            .header("Username", self.config.username.as_str())
            .header("Secret", self.config.secret.as_str())
            .header("Events", self.config.events.as_str());
        log::debug!("Logging in as '{}'", self.config.username);
        writer.write_all(login.encode().as_bytes()).await?;

        loop {
            let Some(message) = read_message(&mut reader).await? else {
                return Err(ManagerError::ConnectionClosed);
            };
            match message.kind() {
                MessageKind::Event => {
                    let _ = self.events.send(message);
                }
                MessageKind::Response => {
                    let accepted = message
                        .response()
                        .is_some_and(|r| r.eq_ignore_ascii_case("Success"));
                    if !accepted {
                        let reason = message.text().unwrap_or("login rejected").to_string();
                        return Err(ManagerError::AuthenticationFailed(reason));
                    }
                    return Ok((reader, writer));
                }
                MessageKind::Unknown => {
                    log::debug!("Ignoring unrecognised message during login");
                }
            }
        }
    }

    /// Connect if needed, retrying with backoff.
    ///
    /// Authentication failures are returned at once.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        let policy = &self.config.reconnect;
        let attempts = policy.attempts();
        let mut last_error = ManagerError::NotConnected;

        for attempt in 0..attempts {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    last_error = e;
                    if attempt + 1 < attempts {
                        let delay = policy.delay_for(attempt);
                        log::info!(
                            "Manager connect attempt {}/{} failed, retrying in {:?}",
                            attempt + 1,
                            attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Send an action and wait for its correlated response.
    ///
    /// Any ActionID already on `action` is replaced.
    pub async fn send_action(&self, action: Action) -> Result<Message> {
        let _turn = self.request_lock.lock().await;

        let id = self.next_id();
        let name = action.name().to_string();
        let action = action.with_action_id(id.clone());
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.session.lock().await;
            let session = match guard.as_mut() {
                Some(s) if self.is_ready() => s,
                _ => return Err(ManagerError::NotConnected),
            };
            self.pending
                .lock()
                .insert(id.clone(), (session.generation, tx));
            log::debug!("-> {} ({})", name, id);
            let frame = action.encode();
            let written = session.writer.write_all(frame.as_bytes()).await;
            if let Err(e) = written {
                self.pending.lock().remove(&id);
                if let Some(dead) = guard.take() {
                    self.teardown(dead);
                }
                return Err(e.into());
            }
        }

        let timeout_ms = self.config.action_timeout_ms;
        let response = match tokio::time::timeout(self.config.action_timeout(), rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ManagerError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                log::warn!("No response to '{}' within {}ms, dropping session", name, timeout_ms);
                self.disconnect().await;
                return Err(ManagerError::timeout(format!("'{}' response", name), timeout_ms));
            }
        };

        if response.is_error() {
            let message = response.text().unwrap_or("unknown error").to_string();
            return Err(ManagerError::ActionFailed {
                action: name,
                message,
            });
        }
        Ok(response)
    }

    /// Run a console command, returning the full response
    pub async fn command(&self, command: &str) -> Result<Message> {
        self.send_action(Action::command(command)).await
    }

    /// Ask the switch to re-read its dialplan
    pub async fn reload_dialplan(&self) -> Result<()> {
        let response = self.command("dialplan reload").await?;
        for line in response.output() {
            log::debug!("dialplan reload: {}", line);
        }
        Ok(())
    }

    /// Round-trip a keepalive
    pub async fn ping(&self) -> Result<()> {
        self.send_action(Action::new("Ping")).await.map(|_| ())
    }

    /// End the session politely, then close the socket
    pub async fn logoff(&self) -> Result<()> {
        let result = self.send_action(Action::new("Logoff")).await.map(|_| ());
        self.disconnect().await;
        result
    }

    /// Drop the session without logging off
    pub async fn disconnect(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            self.teardown(session);
            log::info!("Disconnected from {}", self.config.address());
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn teardown(&self, session: Session) {
        self.set_state(ConnectionState::Disconnected);
        self.fail_pending(session.generation);
        drop(session);
    }

    fn fail_pending(&self, generation: u64) {
        fail_pending(&self.pending, generation);
    }
}

fn fail_pending(pending: &PendingMap, generation: u64) {
    let mut map = pending.lock();
    let stale: Vec<String> = map
        .iter()
        .filter(|(_, (g, _))| *g == generation)
        .map(|(id, _)| id.clone())
        .collect();
    for id in stale {
        if let Some((_, waiter)) = map.remove(&id) {
            let _ = waiter.send(Err(ManagerError::ConnectionClosed));
        }
    }
}

/// Route one response to its waiter
fn dispatch_response(context: &ReaderContext, message: Message) {
    let mut map = context.pending.lock();
    let key = match message.action_id() {
        Some(id) => Some(id.to_string()),
        // No ActionID: only safe when exactly one action is in flight.
        None => {
            let mut ours = map.iter().filter(|(_, (g, _))| *g == context.generation);
            match (ours.next(), ours.next()) {
                (Some((id, _)), None) => Some(id.clone()),
                _ => None,
            }
        }
    };
    let waiter = key.and_then(|k| map.remove(&k));
    match waiter {
        Some((_, tx)) => {
            let _ = tx.send(Ok(message));
        }
        None => log::debug!("Dropping uncorrelated response {:?}", message.action_id()),
    }
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, context: ReaderContext) {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => match message.kind() {
                MessageKind::Response => dispatch_response(&context, message),
                MessageKind::Event => {
                    let _ = context.events.send(message);
                }
                MessageKind::Unknown => log::debug!("Ignoring message without Response or Event"),
            },
            Ok(None) => {
                log::info!("Manager connection closed by peer");
                break;
            }
            Err(e) => {
                log::warn!("Manager connection read failed: {}", e);
                break;
            }
        }
    }

    if context.current_generation.load(Ordering::SeqCst) == context.generation {
        *context.state.lock() = ConnectionState::Disconnected;
    }
    fail_pending(&context.pending, context.generation);
}
