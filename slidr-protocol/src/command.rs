//! Command and error code identifiers
//!
//! Numbering matches the host-side tooling shipped with the device.

/// Protocol verbs, in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Host heartbeat
    Ping = 0x01,
    /// Heartbeat reply
    Pong = 0x02,
    /// Replace the device configuration
    SetConfig = 0x03,
    /// Request the device configuration
    GetConfig = 0x04,
    /// Configuration bytes (device → host)
    ConfigData = 0x05,
    /// Restore the built-in configuration
    DefaultConfig = 0x06,
    /// Begin an image upload: `[index][size:u32 LE]`
    UploadImageStart = 0x07,
    /// One upload chunk
    UploadImageData = 0x08,
    /// Finalize the upload
    UploadImageEnd = 0x09,
    /// Begin an image download: `[index]`
    DownloadImageStart = 0x0A,
    /// One download chunk (device → host)
    DownloadImageData = 0x0B,
    /// End of the download stream (device → host)
    DownloadImageEnd = 0x0C,
    /// Generic acknowledgement
    Ack = 0x0D,
    /// Slider moved: `[index][value]` (device → host)
    SliderValue = 0x0E,
    /// Set backlight level: `[level]`
    SetBacklight = 0x0F,
    /// Device-reported failure: `[code]`
    Error = 0x10,
    /// Request device status
    GetStatus = 0x11,
    /// Status reply: `[awake][backlight][segments]`
    StatusData = 0x12,
    /// Diagnostic text, never acknowledged
    LogMessage = 0x13,
}

impl Command {
    /// Parse a command from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        let command = match byte {
            0x01 => Command::Ping,
            0x02 => Command::Pong,
            0x03 => Command::SetConfig,
            0x04 => Command::GetConfig,
            0x05 => Command::ConfigData,
            0x06 => Command::DefaultConfig,
            0x07 => Command::UploadImageStart,
            0x08 => Command::UploadImageData,
            0x09 => Command::UploadImageEnd,
            0x0A => Command::DownloadImageStart,
            0x0B => Command::DownloadImageData,
            0x0C => Command::DownloadImageEnd,
            0x0D => Command::Ack,
            0x0E => Command::SliderValue,
            0x0F => Command::SetBacklight,
            0x10 => Command::Error,
            0x11 => Command::GetStatus,
            0x12 => Command::StatusData,
            0x13 => Command::LogMessage,
            _ => return None,
        };
        Some(command)
    }

    /// Convert to wire byte
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Returns true if this verb belongs to the file transfer sub-protocol
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Command::UploadImageStart
                | Command::UploadImageData
                | Command::UploadImageEnd
                | Command::DownloadImageStart
                | Command::Ack
        )
    }
}

/// Error codes carried by [`Command::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0x00,
    InvalidCommand = 0x01,
    InvalidData = 0x02,
    ChecksumError = 0x03,
    FileError = 0x04,
    InvalidConfig = 0x05,
    BufferOverflow = 0x06,
    TransferInProgress = 0x07,
    TransferTimeout = 0x08,
}

impl ErrorCode {
    /// Parse an error code from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        let code = match byte {
            0x00 => ErrorCode::NoError,
            0x01 => ErrorCode::InvalidCommand,
            0x02 => ErrorCode::InvalidData,
            0x03 => ErrorCode::ChecksumError,
            0x04 => ErrorCode::FileError,
            0x05 => ErrorCode::InvalidConfig,
            0x06 => ErrorCode::BufferOverflow,
            0x07 => ErrorCode::TransferInProgress,
            0x08 => ErrorCode::TransferTimeout,
            _ => return None,
        };
        Some(code)
    }

    /// Convert to wire byte
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}
