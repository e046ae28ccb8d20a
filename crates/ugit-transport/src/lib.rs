//! Transport boundary for the wire protocol.
//!
//! The protocol engine never opens sockets or spawns processes itself: it
//! consumes a [`Connection`] obtained from one of the injected client
//! capabilities ([`TcpClient`], [`SshClient`], [`HttpClient`]). Hosts supply
//! implementations — a browser build may back [`TcpClient`] with a
//! WebSocket proxy; the engine cannot tell the difference.

pub mod duplex;
pub mod url;

use std::io::{Read, Write};
use std::time::Duration;

pub use duplex::DuplexPipe;
pub use url::{GitUrl, Scheme};

/// Errors crossing the transport boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The service being invoked on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `git-upload-pack` — fetch and clone.
    UploadPack,
    /// `git-receive-pack` — push.
    ReceivePack,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }
}

/// A bidirectional byte stream to a remote git process.
pub trait Connection: Send {
    fn reader(&mut self) -> &mut dyn Read;
    fn writer(&mut self) -> &mut dyn Write;

    /// Close the connection, flushing pending output.
    fn close(self: Box<Self>) -> Result<(), TransportError>;

    /// Stateless transports (smart HTTP) replay state per request.
    fn is_stateless(&self) -> bool {
        false
    }
}

/// Capability: raw TCP (`git://`) connectivity.
pub trait TcpClient: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>, TransportError>;
}

/// Capability: SSH connectivity running a remote command.
pub trait SshClient: Send + Sync {
    fn connect(
        &self,
        host: &str,
        port: Option<u16>,
        user: Option<&str>,
        command: &str,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// A buffered HTTP response.
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Capability: HTTP(S) requests for the smart HTTP protocol.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, TransportError>;

    fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError>;
}
