//! Transfer error type
//!
//! Every variant maps onto exactly one wire [`ErrorCode`], which the
//! dispatcher reports to the host in a single ERROR packet.

use core::fmt;

use slidr_hal::StorageError;
use slidr_protocol::ErrorCode;

/// Errors raised by the transfer engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// Another transfer is already active
    InProgress,
    /// Chunk or end received without an active upload
    NotActive,
    /// Upload ended before the declared size was received
    SizeMismatch { received: u32, expected: u32 },
    /// Chunk would carry the upload past its declared size
    Overrun { received: u32, expected: u32 },
    /// Storage accepted fewer bytes than the chunk held
    ShortWrite { written: usize, expected: usize },
    /// Source yielded fewer bytes than it reported
    ShortRead { read: usize, expected: usize },
    /// Asset path does not fit the path buffer
    InvalidPath,
    /// Filesystem operation failed
    Storage(StorageError),
    /// Watchdog expired
    Timeout,
}

impl TransferError {
    /// Wire error code reported to the host
    pub fn code(&self) -> ErrorCode {
        match self {
            TransferError::InProgress => ErrorCode::TransferInProgress,
            TransferError::NotActive | TransferError::SizeMismatch { .. } => {
                ErrorCode::InvalidCommand
            }
            TransferError::Overrun { .. } | TransferError::InvalidPath => ErrorCode::InvalidData,
            TransferError::ShortWrite { .. }
            | TransferError::ShortRead { .. }
            | TransferError::Storage(_) => ErrorCode::FileError,
            TransferError::Timeout => ErrorCode::TransferTimeout,
        }
    }
}

impl From<StorageError> for TransferError {
    fn from(e: StorageError) -> Self {
        TransferError::Storage(e)
    }
}

impl From<TransferError> for ErrorCode {
    fn from(e: TransferError) -> Self {
        e.code()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::InProgress => write!(f, "Transfer already in progress"),
            TransferError::NotActive => write!(f, "No active upload"),
            TransferError::SizeMismatch { received, expected } => {
                write!(f, "Upload size mismatch: received {} of {}", received, expected)
            }
            TransferError::Overrun { received, expected } => {
                write!(f, "Upload overrun: {} bytes exceeds declared {}", received, expected)
            }
            TransferError::ShortWrite { written, expected } => write!(
                f,
                "Failed to write all data to file - written: {}, expected: {}",
                written, expected
            ),
            TransferError::ShortRead { read, expected } => write!(
                f,
                "Failed to read expected number of bytes from file - read: {}, expected: {}",
                read, expected
            ),
            TransferError::InvalidPath => write!(f, "Asset path too long"),
            TransferError::Storage(e) => write!(f, "Storage error: {:?}", e),
            TransferError::Timeout => write!(f, "Transfer timed out"),
        }
    }
}
