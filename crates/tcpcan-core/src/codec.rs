//! 21-byte wire codec
//!
//! Every frame on the TCP stream has the same fixed size, so there is no
//! delimiter and no length prefix. A reader only has to count bytes; see
//! [`FrameAssembler`] for stream reassembly.

use std::ops::{BitOr, BitOrAssign};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::CodecError;
use crate::message::{CanMessage, MAX_DLC};

/// Size of one encoded frame on the wire
pub const FRAME_SIZE: usize = 21;

const ID_OFFSET: usize = 8;
const DLC_OFFSET: usize = 12;
const DATA_OFFSET: usize = 13;

/// Flag bits carried in the top of the 32-bit identifier field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// Extended frame format (29-bit identifier)
    pub const EXTENDED: Self = Self(0x8000_0000);
    /// Remote transmission request
    pub const REMOTE: Self = Self(0x4000_0000);
    /// Error frame
    pub const ERROR: Self = Self(0x2000_0000);

    pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;
    pub const STANDARD_ID_MASK: u32 = 0x0000_07FF;

    const ALL: u32 = Self::EXTENDED.0 | Self::REMOTE.0 | Self::ERROR.0;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// OR the flag bits into an identifier
    pub fn pack(arbitration_id: u32, flags: Self) -> u32 {
        arbitration_id | flags.0
    }

    /// Split a wire identifier into the masked arbitration ID and its flags
    ///
    /// The mask width is chosen by the extended bit alone, never by the
    /// magnitude of the identifier.
    pub fn unpack(raw_id: u32) -> (u32, Self) {
        let flags = Self(raw_id & Self::ALL);
        let mask = if flags.contains(Self::EXTENDED) {
            Self::EXTENDED_ID_MASK
        } else {
            Self::STANDARD_ID_MASK
        };
        (raw_id & mask, flags)
    }
}

impl BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Split a timestamp into whole seconds and a microsecond remainder
fn split_timestamp(timestamp: f64) -> (u32, u32) {
    if !timestamp.is_finite() || timestamp <= 0.0 {
        return (0, 0);
    }
    let secs = timestamp.trunc();
    let micros = ((timestamp - secs) * 1e6).round();
    // `as` saturates, which is what we want for out-of-range seconds
    if micros >= 1e6 {
        ((secs as u32).saturating_add(1), 0)
    } else {
        (secs as u32, micros as u32)
    }
}

/// Encode one message into a fixed-size wire frame
pub fn encode(msg: &CanMessage) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    let (secs, micros) = split_timestamp(msg.timestamp);
    frame[0..4].copy_from_slice(&secs.to_le_bytes());
    frame[4..8].copy_from_slice(&micros.to_le_bytes());
    frame[ID_OFFSET..DLC_OFFSET].copy_from_slice(&msg.raw_id().to_le_bytes());
    frame[DLC_OFFSET] = msg.dlc;

    let len = msg.data.len().min(MAX_DLC);
    frame[DATA_OFFSET..DATA_OFFSET + len].copy_from_slice(&msg.data[..len]);
    frame
}

/// Append one encoded frame to a batch buffer
pub fn encode_into(msg: &CanMessage, buf: &mut BytesMut) {
    buf.reserve(FRAME_SIZE);
    buf.put_slice(&encode(msg));
}

/// Decode one wire frame
///
/// Padding beyond `dlc` is discarded. Frames announcing more than 8 data
/// bytes are rejected rather than sliced.
pub fn decode(frame: &[u8; FRAME_SIZE]) -> Result<CanMessage, CodecError> {
    let mut buf = &frame[..];
    let secs = buf.get_u32_le();
    let micros = buf.get_u32_le();
    let raw_id = buf.get_u32_le();
    let dlc = buf.get_u8();

    if dlc as usize > MAX_DLC {
        return Err(CodecError::InvalidDlc(dlc));
    }

    let (arbitration_id, flags) = FrameFlags::unpack(raw_id);

    Ok(CanMessage {
        timestamp: secs as f64 + micros as f64 / 1e6,
        arbitration_id,
        is_extended_id: flags.contains(FrameFlags::EXTENDED),
        is_remote_frame: flags.contains(FrameFlags::REMOTE),
        is_error_frame: flags.contains(FrameFlags::ERROR),
        dlc,
        data: buf[..dlc as usize].to_vec(),
    })
}

/// Reassembles fixed-size frames from an arbitrarily segmented byte stream
///
/// Bytes that do not yet form a whole frame are kept until the next
/// [`push`](Self::push).
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every frame they complete, in order
    pub fn push(&mut self, bytes: &[u8]) -> Vec<[u8; FRAME_SIZE]> {
        self.pending.extend_from_slice(bytes);

        let complete = self.pending.len() / FRAME_SIZE;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            let chunk = self.pending.split_to(FRAME_SIZE);
            let mut frame = [0u8; FRAME_SIZE];
            frame.copy_from_slice(&chunk);
            frames.push(frame);
        }
        frames
    }

    /// Number of buffered bytes belonging to an incomplete frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
