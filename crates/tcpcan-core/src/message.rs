//! CAN message model

use crate::codec::FrameFlags;
use crate::error::CodecError;

/// Maximum classic CAN payload length
pub const MAX_DLC: usize = 8;

/// A classic CAN frame as seen by applications and CAN interfaces
///
/// `dlc` always equals `data.len()` for messages built through the
/// constructors. The wire format pads `data` to 8 bytes; the padding is
/// never part of the message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanMessage {
    /// Seconds, monotonic within a session
    pub timestamp: f64,
    /// 11-bit (standard) or 29-bit (extended) identifier, without flag bits
    pub arbitration_id: u32,
    pub is_extended_id: bool,
    pub is_remote_frame: bool,
    pub is_error_frame: bool,
    /// Data length code (0-8)
    pub dlc: u8,
    pub data: Vec<u8>,
}

impl CanMessage {
    /// Create a standard (11-bit) data frame
    pub fn new(arbitration_id: u32, data: &[u8]) -> Result<Self, CodecError> {
        Self::build(arbitration_id & FrameFlags::STANDARD_ID_MASK, false, data)
    }

    /// Create an extended (29-bit) data frame
    pub fn new_extended(arbitration_id: u32, data: &[u8]) -> Result<Self, CodecError> {
        Self::build(arbitration_id & FrameFlags::EXTENDED_ID_MASK, true, data)
    }

    /// Create a remote transmission request with `dlc` requested bytes
    ///
    /// Remote frames carry no payload, but `data` is zero-filled to `dlc` so
    /// the length invariant holds.
    pub fn new_remote(arbitration_id: u32, extended: bool, dlc: u8) -> Result<Self, CodecError> {
        if dlc as usize > MAX_DLC {
            return Err(CodecError::DataTooLong(dlc as usize));
        }
        let mask = if extended {
            FrameFlags::EXTENDED_ID_MASK
        } else {
            FrameFlags::STANDARD_ID_MASK
        };
        let mut msg = Self::build(arbitration_id & mask, extended, &vec![0; dlc as usize])?;
        msg.is_remote_frame = true;
        Ok(msg)
    }

    fn build(arbitration_id: u32, extended: bool, data: &[u8]) -> Result<Self, CodecError> {
        if data.len() > MAX_DLC {
            return Err(CodecError::DataTooLong(data.len()));
        }
        Ok(Self {
            timestamp: 0.0,
            arbitration_id,
            is_extended_id: extended,
            is_remote_frame: false,
            is_error_frame: false,
            dlc: data.len() as u8,
            data: data.to_vec(),
        })
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_error_frame(mut self, is_error_frame: bool) -> Self {
        self.is_error_frame = is_error_frame;
        self
    }

    /// Flag bits this message contributes to the wire identifier field
    pub fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        if self.is_extended_id {
            flags |= FrameFlags::EXTENDED;
        }
        if self.is_remote_frame {
            flags |= FrameFlags::REMOTE;
        }
        if self.is_error_frame {
            flags |= FrameFlags::ERROR;
        }
        flags
    }

    /// Identifier with flag bits OR'd in, as written on the wire
    pub fn raw_id(&self) -> u32 {
        FrameFlags::pack(self.arbitration_id, self.flags())
    }

    /// Stamp with the current wall-clock time
    pub fn stamp_now(&mut self) {
        self.timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
    }
}

impl std::fmt::Display for CanMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_extended_id {
            write!(f, "{:08X}", self.arbitration_id)?;
        } else {
            write!(f, "{:03X}", self.arbitration_id)?;
        }
        write!(f, " [{}]", self.dlc)?;
        if self.is_remote_frame {
            return write!(f, " RTR");
        }
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        if self.is_error_frame {
            write!(f, " ERR")?;
        }
        Ok(())
    }
}
