//! Error types for the IMAP engine.

use thiserror::Error;

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Connection URI could not be parsed.
    #[error("Invalid connection URI: {0}")]
    InvalidUri(String),

    /// URI scheme is neither `imap` nor `imaps`.
    #[error("Unsupported protocol: {0}")]
    UnsupportedScheme(String),

    /// Protocol parsing error.
    #[error("Protocol error at position {position}: {message}")]
    Parse {
        /// Byte position where the error occurred.
        position: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Capability negotiation exhausted every authentication option.
    #[error(
        "IMAP server and client do not share any supported authentication \
         mechanisms. Did you provide a username/password?"
    )]
    NoCompatibleAuth,

    /// Protocol violation or unexpected data.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server closed the connection.
    #[error("Connection closed")]
    Disconnected,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
