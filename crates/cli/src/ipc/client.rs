//! Daemon client
//!
//! A single background task owns the socket and the table of pending calls.
//! Public methods talk to it over a channel, so any number of tasks can
//! issue calls concurrently on one connection; responses are matched to
//! callers by id only.

use super::protocol::{Message, Notification, Request};
use super::{write_line, IpcError};
use bsync_core::debug_event;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Notifications buffered for a slow subscriber before new ones are dropped
const SUBSCRIPTION_CAPACITY: usize = 256;

type Reply = oneshot::Sender<Result<Value, IpcError>>;

enum Command {
    Call { id: u64, line: String, reply: Reply },
    Notify { line: String },
    Cancel { id: u64 },
    Subscribe(mpsc::Sender<Notification>),
    Close,
}

/// Stream of server notifications for one connection
pub struct Subscription {
    receiver: tokio::sync::Mutex<mpsc::Receiver<Notification>>,
}

impl Subscription {
    /// Next notification; `None` once the connection is closed
    pub async fn recv(&self) -> Option<Notification> {
        self.receiver.lock().await.recv().await
    }
}

/// Connection to a running daemon
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    closed: AtomicBool,
    subscription: Mutex<Option<Arc<Subscription>>>,
}

impl Client {
    /// Connect to the daemon socket
    ///
    /// A missing socket or a refused connection is reported as
    /// [`IpcError::DaemonNotRunning`].
    pub async fn connect(socket_path: &Path) -> Result<Self, IpcError> {
        let stream = match UnixStream::connect(socket_path).await {
            Ok(stream) => stream,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Err(IpcError::DaemonNotRunning {
                    path: socket_path.to_path_buf(),
                });
            }
            Err(e) => return Err(IpcError::Io(e)),
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(stream, receiver));
        debug_event!("ipc", "connected", "{}", socket_path.display());

        Ok(Self {
            commands,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
        })
    }

    /// Call a method and wait for its response
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, IpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_inner(method, params, None).await
    }

    /// Call a method, giving up after `timeout`
    pub async fn call_timeout<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, IpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_inner(method, params, Some(timeout)).await
    }

    async fn call_inner<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R, IpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IpcError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(id, method, serde_json::to_value(params)?);
        let line = serde_json::to_string(&request)?;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call { id, line, reply })
            .map_err(|_| IpcError::NotConnected)?;

        // Dropping the caller's future removes the pending entry
        let mut pending = PendingGuard {
            id,
            commands: &self.commands,
            armed: true,
        };

        let outcome = match timeout {
            None => response.await,
            Some(after) => match tokio::time::timeout(after, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(IpcError::Timeout {
                        method: method.to_string(),
                        after,
                    })
                }
            },
        };
        pending.armed = false;

        let value = outcome.map_err(|_| IpcError::Disconnected)??;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a request without an id
    ///
    /// The daemon runs the method but never replies, so the outcome is
    /// unknown to the caller. Returns once the message is queued.
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), IpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IpcError::NotConnected);
        }

        let notification = Notification::new(method, serde_json::to_value(params)?);
        let line = serde_json::to_string(&notification)?;
        self.commands
            .send(Command::Notify { line })
            .map_err(|_| IpcError::NotConnected)
    }

    /// Subscribe to server notifications
    ///
    /// Returns the same subscription on every call.
    pub fn subscribe_events(&self) -> Result<Arc<Subscription>, IpcError> {
        let mut slot = self.subscription.lock();
        if let Some(subscription) = slot.as_ref() {
            return Ok(Arc::clone(subscription));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(IpcError::NotConnected);
        }

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.commands
            .send(Command::Subscribe(sender))
            .map_err(|_| IpcError::NotConnected)?;

        let subscription = Arc::new(Subscription {
            receiver: tokio::sync::Mutex::new(receiver),
        });
        *slot = Some(Arc::clone(&subscription));
        Ok(subscription)
    }

    /// Close the connection
    ///
    /// Pending calls fail with [`IpcError::Disconnected`], the subscription
    /// ends, later calls fail with [`IpcError::NotConnected`]. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(Command::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.commands.is_closed()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sends `Cancel` unless disarmed
struct PendingGuard<'a> {
    id: u64,
    commands: &'a mpsc::UnboundedSender<Command>,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Cancel { id: self.id });
        }
    }
}

/// Connection task: owns the socket, the pending map and the subscriber
async fn run_connection(stream: UnixStream, mut commands: mpsc::UnboundedReceiver<Command>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut pending: HashMap<u64, Reply> = HashMap::new();
    let mut subscriber: Option<mpsc::Sender<Notification>> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Call { id, line, reply }) => {
                    pending.insert(id, reply);
                    if let Err(e) = write_line(&mut write_half, &line).await {
                        debug_event!("ipc", "write failed", "{}", e);
                        break;
                    }
                }
                Some(Command::Notify { line }) => {
                    if let Err(e) = write_line(&mut write_half, &line).await {
                        debug_event!("ipc", "write failed", "{}", e);
                        break;
                    }
                }
                Some(Command::Cancel { id }) => {
                    pending.remove(&id);
                }
                Some(Command::Subscribe(sender)) => subscriber = Some(sender),
                Some(Command::Close) | None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => route(&line, &mut pending, subscriber.as_ref()),
                Ok(None) => {
                    debug_event!("ipc", "server closed connection");
                    break;
                }
                Err(e) => {
                    warn!("[ipc] read failed: {e}");
                    break;
                }
            },
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(IpcError::Disconnected));
    }
}

fn route(
    line: &str,
    pending: &mut HashMap<u64, Reply>,
    subscriber: Option<&mpsc::Sender<Notification>>,
) {
    if line.trim().is_empty() {
        return;
    }

    match Message::parse(line) {
        Ok(Message::Response(response)) => {
            let reply = response.id.and_then(|id| pending.remove(&id));
            match reply {
                Some(reply) => {
                    let _ = reply.send(response.into_result().map_err(IpcError::from));
                }
                None => {
                    debug_event!("ipc", "unmatched response", "id={:?}", response.id);
                }
            }
        }
        Ok(Message::Notification(notification)) => {
            if let Some(subscriber) = subscriber {
                if subscriber.try_send(notification).is_err() {
                    debug_event!("ipc", "notification dropped");
                }
            }
        }
        Ok(Message::Request(request)) => {
            debug_event!("ipc", "ignoring server request", "{}", request.method);
        }
        Err(e) => warn!("[ipc] undecodable message from daemon: {e}"),
    }
}
