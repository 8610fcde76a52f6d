use std::net::SocketAddr;

use thiserror::Error;
use transport_tls::TransportError;

/// Fatal errors of a share run. A rejected request is not an error, neither
/// is an operator interrupt; see `ServeOutcome`.
#[derive(Error, Debug)]
pub enum ShareError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("credential generation failed: {0}")]
    Credential(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    pub(crate) fn credential(err: impl std::fmt::Display) -> Self {
        Self::Credential(err.to_string())
    }
}

impl From<TransportError> for ShareError {
    fn from(err: TransportError) -> Self {
        match err {
            // The acceptor is built from the run's credential.
            TransportError::Tls(e) => Self::credential(e),
            TransportError::Bind { addr, source } => Self::Bind { addr, source },
            TransportError::Io(e) => Self::Io(e),
        }
    }
}
