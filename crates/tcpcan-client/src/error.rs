//! Client errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("CAN interface error: {0}")]
    Interface(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}
