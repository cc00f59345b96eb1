//! SlidR host link
//!
//! Device side of the serial link between a host application and a SlidR
//! device. The link reassembles packets from the transport, runs the image
//! transfer sub-protocol against the device filesystem, and forwards every other
//! packet to the device controller. Installed images are announced through
//! [`Link::asset_ready`].
//!
//! # Transfers
//!
//! At most one transfer is active at a time:
//!
//! - **Upload** (host → device): `UPLOAD_IMAGE_START`, any number of
//!   `UPLOAD_IMAGE_DATA` chunks, `UPLOAD_IMAGE_END`. Every accepted step is
//!   ACKed. Data lands in a staging file and replaces the segment image only
//!   once the declared size has arrived.
//! - **Download** (device → host): `DOWNLOAD_IMAGE_START` starts a stream of
//!   `DOWNLOAD_IMAGE_DATA` chunks, each waiting for a host ACK, followed by
//!   `DOWNLOAD_IMAGE_END`.
//!
//! A watchdog cancels a transfer that sees no progress within the configured
//! window and reports `TRANSFER_TIMEOUT`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// Declared first so every module below sees its logging macros.
mod fmt;

pub mod config;
pub mod error;
pub mod link;
pub mod transfer;
pub mod watchdog;
pub mod writer;

pub use config::{AssetPath, LinkConfig};
pub use error::TransferError;
pub use link::Link;
pub use transfer::{Direction, Installed, Progress, TransferEngine};
pub use watchdog::Watchdog;
pub use writer::{PacketWriter, SendError};
