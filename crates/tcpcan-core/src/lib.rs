//! tcpcan-core - shared types for the CAN-over-TCP bridge
//!
//! This crate holds everything both ends of the bridge agree on:
//! - [`CanMessage`], the unit exchanged with applications and CAN interfaces
//! - the fixed 21-byte wire codec and stream reassembler
//! - the identifier filter descriptor handed to the CAN side
//!
//! # Wire format
//!
//! ```text
//!  0      4      8          12   13              21
//!  ┌──────┬──────┬──────────┬────┬───────────────┐
//!  │ secs │ usec │ id|flags │dlc │ data (8, pad) │
//!  └──────┴──────┴──────────┴────┴───────────────┘
//!           all integers little-endian
//! ```

pub mod codec;
pub mod error;
pub mod filter;
pub mod message;

pub use codec::{decode, encode, encode_into, FrameAssembler, FrameFlags, FRAME_SIZE};
pub use error::CodecError;
pub use filter::{any_match, pack_filters, CanFilter, PackedFilter};
pub use message::{CanMessage, MAX_DLC};
