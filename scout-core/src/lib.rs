//! LAN discovery protocol reference implementation.
//! No I/O here; the daemon feeds received bytes in and sends frames out.

pub mod protocol;
pub mod reassembly;
pub mod wire;

pub use protocol::{Frame, IdentityRecord, DEFAULT_PORT, MAGIC};
pub use reassembly::Reassembler;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
