//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! TCP byte stream
//!     → codec.rs (newline-delimited JSON frames, size limit)
//!     → packet.rs (Packet shape validation)
//!     → connection reader routes by kind:
//!         request  → local endpoint dispatch
//!         response → correlation table
//!         publish  → subscription dispatch, then ack
//!         ack      → fan-out publish bookkeeping
//! ```
//!
//! # Design Decisions
//! - One JSON object per line; compact JSON never contains a raw newline
//! - Decoding errors close the connection, they are never retried
//! - A response carries either `payload` or `error` + `failed`, never both

pub mod codec;
pub mod packet;

pub use codec::{PacketCodec, MAX_FRAME_LENGTH};
pub use packet::{new_packet_id, Packet, PacketKind, RemoteError, Target};
