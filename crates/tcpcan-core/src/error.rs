//! Codec errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("CAN data cannot exceed 8 bytes (got {0})")]
    DataTooLong(usize),

    #[error("Invalid DLC {0} in wire frame")]
    InvalidDlc(u8),

    #[error("Invalid CAN ID '{0}'")]
    InvalidId(String),
}
