//! IPC between CLI and daemon
//!
//! Line-delimited JSON over a Unix domain socket. See [`protocol`] for the
//! message shapes.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{Client, Subscription};
pub use protocol::{Message, Notification, Request, Response, RpcError};
pub use server::{IpcServer, RequestHandler};

use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Errors seen by IPC callers
///
/// Transport failures, client-state errors and RPC errors returned by the
/// daemon are distinct variants.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("not connected")]
    NotConnected,

    #[error("daemon not running (no listener at {})", path.display())]
    DaemonNotRunning { path: PathBuf },

    #[error("daemon already running at {}", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("connection to daemon lost")]
    Disconnected,

    #[error("'{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("daemon returned error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl IpcError {
    /// RPC error code, if the daemon answered with an error
    pub fn code(&self) -> Option<i32> {
        match self {
            IpcError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_running(&self) -> bool {
        matches!(self, IpcError::DaemonNotRunning { .. })
    }
}

impl From<RpcError> for IpcError {
    fn from(error: RpcError) -> Self {
        IpcError::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

/// Write one message followed by a newline
pub(crate) async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
