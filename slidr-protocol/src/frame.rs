//! Frame encoding and decoding for the host link.
//!
//! Frame format:
//! - START (1 byte): 0xAA synchronization byte
//! - CMD (1 byte): [`Command`] identifier
//! - LENGTH (2 bytes): payload length, little-endian (0-4092)
//! - PAYLOAD (0-4092 bytes): command-specific data
//! - CHECKSUM (1 byte): XOR of CMD, both LENGTH bytes, and all PAYLOAD bytes
//!
//! Everything after START is buffered by the parser, so a frame occupies at
//! most [`MAX_FRAME_SIZE`] bytes of receive buffer.

use heapless::Vec;

use crate::checksum::{xor_checksum, Checksum};
use crate::command::Command;

/// Frame synchronization byte
pub const FRAME_START: u8 = 0xAA;

/// Receive buffer budget for one frame (CMD + LENGTH + PAYLOAD + CHECKSUM)
pub const MAX_FRAME_SIZE: usize = 4096;

/// Bytes preceding the payload in the receive buffer (CMD + LENGTH)
pub const HEADER_SIZE: usize = 3;

/// Maximum payload size in bytes
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE - 1;

/// Maximum complete frame size on the wire (START + buffered frame)
pub const MAX_WIRE_SIZE: usize = 1 + MAX_FRAME_SIZE;

/// Silence after which a partial frame is dropped
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 1000;

/// Errors that can occur during frame parsing or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Declared payload length exceeds [`MAX_PAYLOAD_SIZE`]
    BufferOverflow(u16),
    /// Trailing checksum does not match the frame contents
    ChecksumError { received: u8, calculated: u8 },
    /// A partial frame went silent for longer than the idle timeout
    FrameTimeout,
    /// Checksum was valid but the command byte is not a known verb
    UnknownCommand(u8),
    /// Payload exceeds maximum allowed size
    PayloadTooLarge,
    /// Buffer too small for encoding
    BufferTooSmall,
}

/// A decoded, checksum-valid packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Protocol verb
    pub command: Command,
    /// Payload data
    pub payload: Vec<u8, MAX_PAYLOAD_SIZE>,
}

impl Packet {
    /// Create a new packet with the given command and payload
    pub fn new(command: Command, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = Vec::from_slice(payload).map_err(|_| FrameError::PayloadTooLarge)?;
        Ok(Self { command, payload })
    }

    /// Create a packet with no payload
    pub fn empty(command: Command) -> Self {
        Self {
            command,
            payload: Vec::new(),
        }
    }

    /// Number of bytes this packet occupies on the wire
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.payload.len())
    }

    /// Encode this packet into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        encode(self.command, &self.payload, buffer)
    }

    /// Encode this packet into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_WIRE_SIZE>, FrameError> {
        serialize(self.command, &self.payload)
    }
}

/// Wire size of a frame carrying `payload_len` bytes
pub const fn encoded_len(payload_len: usize) -> usize {
    1 + HEADER_SIZE + payload_len + 1
}

/// START, CMD and LENGTH bytes for a frame
pub fn header(command: Command, payload_len: u16) -> [u8; 4] {
    let [lo, hi] = payload_len.to_le_bytes();
    [FRAME_START, command.to_byte(), lo, hi]
}

/// Checksum byte for a frame
pub fn frame_checksum(command: Command, payload: &[u8]) -> u8 {
    let mut checksum = Checksum::new();
    checksum.update(&header(command, payload.len() as u16)[1..]);
    checksum.update(payload);
    checksum.value()
}

/// Encode a frame into `buffer`, returning the number of bytes written
pub fn encode(command: Command, payload: &[u8], buffer: &mut [u8]) -> Result<usize, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge);
    }
    let frame_len = encoded_len(payload.len());
    if buffer.len() < frame_len {
        return Err(FrameError::BufferTooSmall);
    }

    buffer[..4].copy_from_slice(&header(command, payload.len() as u16));
    buffer[4..4 + payload.len()].copy_from_slice(payload);
    buffer[4 + payload.len()] = frame_checksum(command, payload);

    Ok(frame_len)
}

/// Serialize a command and payload into a complete frame
pub fn serialize(command: Command, payload: &[u8]) -> Result<Vec<u8, MAX_WIRE_SIZE>, FrameError> {
    let mut frame = Vec::new();
    frame
        .resize(encoded_len(payload.len().min(MAX_PAYLOAD_SIZE)), 0)
        .map_err(|_| FrameError::BufferTooSmall)?;
    let len = encode(command, payload, &mut frame)?;
    frame.truncate(len);
    Ok(frame)
}

/// Byte-at-a-time frame reassembler
///
/// Holds the only mutable receive state of the link. Timestamps are plain
/// milliseconds supplied by the caller so the parser stays clock-agnostic.
#[derive(Debug, Clone)]
pub struct FrameParser {
    active: bool,
    buffer: Vec<u8, MAX_FRAME_SIZE>,
    expected_length: usize,
    last_byte_ms: u64,
    last_packet_ms: Option<u64>,
    timeout_ms: u64,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Create a parser with the default idle timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_FRAME_TIMEOUT_MS)
    }

    /// Create a parser that drops partial frames after `timeout_ms` of silence
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            active: false,
            buffer: Vec::new(),
            expected_length: 0,
            last_byte_ms: 0,
            last_packet_ms: None,
            timeout_ms,
        }
    }

    /// Drop any partial frame and go back to scanning for START
    pub fn reset(&mut self) {
        self.active = false;
        self.buffer.clear();
        self.expected_length = 0;
    }

    /// True while a frame is being accumulated
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of bytes buffered for the current frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Timestamp of the last valid packet, if any
    pub fn last_packet_at(&self) -> Option<u64> {
        self.last_packet_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Earliest time at which [`FrameParser::check_timeout`] drops the
    /// current partial frame, or `None` while scanning for START
    pub fn deadline_ms(&self) -> Option<u64> {
        self.active
            .then(|| self.last_byte_ms.saturating_add(self.timeout_ms).saturating_add(1))
    }

    /// Drop a stalled partial frame
    ///
    /// Call this when the line has been quiet; `feed` applies the same check
    /// before accepting a byte.
    pub fn check_timeout(&mut self, now_ms: u64) -> Result<(), FrameError> {
        if self.active && now_ms.saturating_sub(self.last_byte_ms) > self.timeout_ms {
            self.reset();
            return Err(FrameError::FrameTimeout);
        }
        Ok(())
    }

    /// Feed a single byte to the parser
    ///
    /// Returns `Ok(Some(packet))` when a complete valid frame is parsed,
    /// `Ok(None)` when more bytes are needed, or `Err` when the current frame
    /// was discarded. After an error the parser is already scanning for the
    /// next START byte.
    pub fn feed(&mut self, byte: u8, now_ms: u64) -> Result<Option<Packet>, FrameError> {
        if let Err(e) = self.check_timeout(now_ms) {
            // The byte that revealed the stall may itself open a new frame
            if byte == FRAME_START {
                self.begin(now_ms);
            }
            return Err(e);
        }

        if !self.active {
            // Silently ignore non-START bytes while waiting
            if byte == FRAME_START {
                self.begin(now_ms);
            }
            return Ok(None);
        }

        self.last_byte_ms = now_ms;
        if self.buffer.push(byte).is_err() {
            self.reset();
            return Err(FrameError::BufferOverflow(self.expected_length as u16));
        }

        if self.buffer.len() == HEADER_SIZE {
            let declared = u16::from_le_bytes([self.buffer[1], self.buffer[2]]);
            if declared as usize > MAX_PAYLOAD_SIZE {
                self.reset();
                return Err(FrameError::BufferOverflow(declared));
            }
            self.expected_length = declared as usize;
        }

        if self.buffer.len() >= HEADER_SIZE && self.buffer.len() == self.expected_length + 4 {
            let result = self.finish();
            if let Ok(Some(_)) = result {
                self.last_packet_ms = Some(now_ms);
            }
            self.reset();
            return result;
        }

        Ok(None)
    }

    /// Feed multiple bytes to the parser
    ///
    /// Returns the first complete packet or error found, if any.
    /// Remaining bytes after it are not consumed.
    pub fn feed_bytes(&mut self, bytes: &[u8], now_ms: u64) -> Result<Option<Packet>, FrameError> {
        for &byte in bytes {
            if let Some(packet) = self.feed(byte, now_ms)? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }

    fn begin(&mut self, now_ms: u64) {
        self.reset();
        self.active = true;
        self.last_byte_ms = now_ms;
    }

    fn finish(&self) -> Result<Option<Packet>, FrameError> {
        let (body, tail) = self.buffer.split_at(self.buffer.len() - 1);
        let received = tail[0];
        let calculated = xor_checksum(body);
        if received != calculated {
            return Err(FrameError::ChecksumError {
                received,
                calculated,
            });
        }

        let command = Command::from_byte(body[0]).ok_or(FrameError::UnknownCommand(body[0]))?;
        Packet::new(command, &body[HEADER_SIZE..]).map(Some)
    }
}
