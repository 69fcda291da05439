//! Bus endpoint errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bus is not connected")]
    NotConnected,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
