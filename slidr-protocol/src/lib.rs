//! SlidR Host Link Protocol
//!
//! This crate defines the serial protocol between a host application and the
//! SlidR device (a row of display + potentiometer segments). It covers packet
//! framing, the command set, and typed views of the requests and replies the
//! device understands.
//!
//! # Protocol Overview
//!
//! All packets use a simple binary frame format:
//! ```text
//! ┌───────┬─────┬────────┬──────────────┬──────────┐
//! │ START │ CMD │ LENGTH │ PAYLOAD      │ CHECKSUM │
//! │ 1B    │ 1B  │ 2B LE  │ 0–4092B      │ 1B       │
//! └───────┴─────┴────────┴──────────────┴──────────┘
//! ```
//!
//! The checksum is the XOR of CMD, both LENGTH bytes and every PAYLOAD byte.
//! The parser is fed one byte at a time and never blocks, so it can sit
//! behind an interrupt-fed ring buffer or a polling loop.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod checksum;
pub mod command;
pub mod frame;
pub mod messages;

pub use checksum::{xor_checksum, Checksum};
pub use command::{Command, ErrorCode};
pub use frame::{
    serialize, FrameError, FrameParser, Packet, FRAME_START, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE,
};
pub use messages::{DeviceMessage, HostRequest, TransferRequest, TRANSFER_CHUNK_SIZE};
