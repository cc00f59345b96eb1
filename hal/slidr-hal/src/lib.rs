//! SlidR Hardware Abstraction Layer
//!
//! This crate defines the hardware abstraction traits the link core depends
//! on. Chip-specific firmware implements them on top of its filesystem
//! (LittleFS on the reference board), which keeps the protocol and transfer
//! engine testable on the host.
//!
//! # Traits
//!
//! - [`storage::Storage`], [`storage::FileHandle`] - Path-addressed file storage
//!
//! With the `std` feature, [`mem::MemStorage`] provides an in-memory
//! filesystem for host-side testing.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

pub mod storage;

#[cfg(any(test, feature = "std"))]
pub mod mem;

// Re-export key traits at crate root for convenience
pub use storage::{FileHandle, OpenMode, Storage, StorageError};
