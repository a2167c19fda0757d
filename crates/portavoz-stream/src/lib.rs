//! Local message stream endpoint.
//!
//! A [`MessageStream`] owns one end of a connection-oriented unix-domain
//! socket and runs a dedicated I/O worker that multiplexes complete
//! messages over the two logical packet streams (`SPEECH`, `COMMAND`).
//! Callers interact only with mutex-guarded FIFOs: [`MessageStream::send`]
//! enqueues an outbound message, [`MessageStream::try_recv`] pops the
//! oldest inbound one. The worker is the sole toucher of the socket and of
//! the packet reassembly state.
//!
//! Server endpoints bind a filesystem path, accept a single client
//! (backlog 1), and put the accepted socket in non-blocking mode. Client
//! endpoints retry their connect every poll cycle. Either side can run the
//! keep-alive protocol: a `HELLO` message at 90% of the idle timeout, and
//! a forced disconnect when no inbound traffic arrives within the full
//! timeout.

mod stream;

pub use stream::{MessageStream, Role, StreamConfig};

use std::path::{Path, PathBuf};

/// Build the socket path for a named channel under a socket directory.
pub fn channel_socket_path(dir: &Path, channel: &str) -> PathBuf {
    dir.join(format!("portavoz_{channel}.sock"))
}

/// Errors produced by message stream operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Socket setup failed.
    #[error("socket error on {path}: {source}")]
    Socket {
        /// The endpoint path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The worker thread could not be started.
    #[error("failed to spawn stream worker: {0}")]
    Spawn(std::io::Error),
}

/// Convenience result type for stream operations.
pub type Result<T> = std::result::Result<T, Error>;
