//! Daemon-side socket server
//!
//! Each connection gets a reader loop, a writer task fed by a channel, and
//! one task per request, so a slow method never blocks other requests on
//! the same connection. Lifecycle notifications from the broadcast channel
//! are interleaved with responses on the writer.

use super::protocol::{DecodeError, Message, Notification, Response, RpcError};
use super::{write_line, IpcError};
use async_trait::async_trait;
use bsync_core::{debug_event, log_event};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How long in-flight requests may run after shutdown starts
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Lines queued per connection before notifications are dropped
const OUTBOUND_CAPACITY: usize = 256;

/// Serves requests for one method namespace
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Listening socket owned by the daemon
///
/// The socket file is removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the socket at `path`
    ///
    /// An existing socket that still accepts connections means another
    /// daemon owns it ([`IpcError::AlreadyRunning`]); one that refuses is
    /// stale and replaced.
    pub fn bind(path: &Path) -> Result<Self, IpcError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        prepare_socket_for_bind(path)?;

        let listener = UnixListener::bind(path)?;
        set_socket_permissions(path)?;
        log_event!("ipc", "listening", "{}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` fires
    ///
    /// Open connections then get [`SHUTDOWN_GRACE`] to finish in-flight
    /// requests before they are aborted.
    pub async fn serve<H: RequestHandler>(
        self,
        handler: Arc<H>,
        events: broadcast::Sender<Notification>,
        shutdown: CancellationToken,
    ) -> Result<(), IpcError> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        debug_event!("ipc", "accepted", "{} open", connections.len() + 1);
                        connections.spawn(handle_connection(
                            stream,
                            Arc::clone(&handler),
                            events.subscribe(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!("[ipc] accept failed: {e}"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!("[ipc] connection task panicked: {e}");
                        }
                    }
                }
            }
        }

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(
                "[ipc] aborting {} connections after shutdown grace",
                connections.len()
            );
            connections.abort_all();
        }

        log_event!("ipc", "stopped");
        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection<H: RequestHandler>(
    stream: UnixStream,
    handler: Arc<H>,
    mut events: broadcast::Receiver<Notification>,
    shutdown: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let (outbound, mut queued) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = queued.recv().await {
            if let Err(e) = write_line(&mut writer, &line).await {
                debug_event!("ipc", "client write failed", "{}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let mut requests = JoinSet::new();
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => dispatch(&line, &handler, &outbound, &mut requests),
                Ok(None) => break,
                Err(e) => {
                    debug_event!("ipc", "client read failed", "{}", e);
                    break;
                }
            },
            event = events.recv(), if events_open => match event {
                Ok(notification) => match serde_json::to_string(&notification) {
                    Ok(line) => {
                        if outbound.try_send(line).is_err() {
                            debug_event!("ipc", "slow client", "notification dropped");
                        }
                    }
                    Err(e) => warn!("[ipc] cannot encode notification: {e}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[ipc] client lagged, {skipped} notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            Some(_) = requests.join_next(), if !requests.is_empty() => {}
        }
    }

    // Let in-flight requests answer; the server aborts us after the grace
    while requests.join_next().await.is_some() {}
    drop(outbound);
    let _ = writer_task.await;
}

fn dispatch<H: RequestHandler>(
    line: &str,
    handler: &Arc<H>,
    outbound: &mpsc::Sender<String>,
    requests: &mut JoinSet<()>,
) {
    if line.trim().is_empty() {
        return;
    }

    let request = match Message::parse(line) {
        Ok(Message::Request(request)) => request,
        Ok(Message::Notification(notification)) => {
            // Fire-and-forget: run the method, send nothing back
            let handler = Arc::clone(handler);
            requests.spawn(async move {
                debug_event!("ipc", "notification", "method={}", notification.method);
                if let Err(e) = handler
                    .handle(&notification.method, notification.params)
                    .await
                {
                    debug_event!("ipc", "notification failed", "{}: {}", notification.method, e);
                }
            });
            return;
        }
        Ok(Message::Response(_)) => {
            debug_event!("ipc", "ignoring client response");
            return;
        }
        Err(DecodeError::Invalid(reason)) => {
            warn!("[ipc] invalid request: {reason}");
            let response = Response::failure(None, RpcError::invalid_request(reason));
            if let Ok(line) = serde_json::to_string(&response) {
                let _ = outbound.try_send(line);
            }
            return;
        }
        Err(e) => {
            warn!("[ipc] dropping malformed message: {e}");
            return;
        }
    };

    let handler = Arc::clone(handler);
    let outbound = outbound.clone();
    requests.spawn(async move {
        debug_event!("ipc", "request", "id={} method={}", request.id, request.method);
        let response = match handler.handle(&request.method, request.params).await {
            Ok(result) => Response::success(request.id, result),
            Err(error) => Response::failure(Some(request.id), error),
        };

        match serde_json::to_string(&response) {
            Ok(line) => {
                let _ = outbound.send(line).await;
            }
            Err(e) => warn!("[ipc] cannot encode response {}: {e}", request.id),
        }
    });
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), IpcError> {
    if !socket.exists() {
        return Ok(());
    }

    match std::os::unix::net::UnixStream::connect(socket) {
        Ok(_) => {
            return Err(IpcError::AlreadyRunning {
                path: socket.to_path_buf(),
            });
        }
        Err(err) => {
            warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match std::fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(IpcError::Io(err)),
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), IpcError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            match method {
                "echo" => Ok(params),
                other => Err(RpcError::method_not_found(other)),
            }
        }
    }

    #[tokio::test]
    async fn test_second_bind_reports_already_running() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("d.sock");

        let _server = IpcServer::bind(&socket).unwrap();
        assert!(matches!(
            IpcServer::bind(&socket),
            Err(IpcError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("d.sock");

        // A bound-then-dropped std listener leaves a dead socket file behind
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let server = IpcServer::bind(&socket).unwrap();
        let mode = std::fs::metadata(&socket).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(mode.mode() & 0o777, 0o600);

        drop(server);
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_serve_answers_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("d.sock");

        let server = IpcServer::bind(&socket).unwrap();
        let (events, _) = broadcast::channel(16);
        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(Arc::new(Echo), events, shutdown.clone()));

        let client = crate::ipc::Client::connect(&socket).await.unwrap();
        let echoed: Value = client
            .call("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(echoed["x"], 1);

        let missing = client.call::<_, Value>("nope", Value::Null).await;
        assert_eq!(missing.unwrap_err().code(), Some(-32601));

        shutdown.cancel();
        serving.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    /// Counts `bump` calls
    #[derive(Default)]
    struct Counter {
        bumps: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for Counter {
        async fn handle(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
            match method {
                "bump" => {
                    let n = self.bumps.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    Ok(Value::from(n))
                }
                other => Err(RpcError::method_not_found(other)),
            }
        }
    }

    #[tokio::test]
    async fn test_notifications_run_without_reply() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("d.sock");

        let server = IpcServer::bind(&socket).unwrap();
        let (events, _) = broadcast::channel(16);
        let shutdown = CancellationToken::new();
        let counter = Arc::new(Counter::default());
        let serving = tokio::spawn(server.serve(Arc::clone(&counter), events, shutdown.clone()));

        let client = crate::ipc::Client::connect(&socket).await.unwrap();
        client.notify("bump", Value::Null).unwrap();
        client.notify("missing", Value::Null).unwrap();

        // Only the call gets a response; its count includes the notification
        let count: usize = client.call("bump", Value::Null).await.unwrap();
        assert!(count >= 1);
        for _ in 0..100 {
            if counter.bumps.load(std::sync::atomic::Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.bumps.load(std::sync::atomic::Ordering::SeqCst), 2);

        shutdown.cancel();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error_reply() {
        use tokio::io::AsyncWriteExt;

        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("d.sock");

        let server = IpcServer::bind(&socket).unwrap();
        let (events, _) = broadcast::channel(16);
        let shutdown = CancellationToken::new();
        let serving = tokio::spawn(server.serve(Arc::new(Echo), events, shutdown.clone()));

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"abc\",\"method\":\"echo\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match Message::parse(&line).unwrap() {
            Message::Response(response) => {
                assert_eq!(response.id, None);
                let error = response.into_result().unwrap_err();
                assert_eq!(error.code, crate::ipc::protocol::codes::INVALID_REQUEST);
            }
            other => panic!("expected response, got {other:?}"),
        }

        shutdown.cancel();
        serving.await.unwrap().unwrap();
    }
}
