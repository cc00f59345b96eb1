//! Typed views of packets
//!
//! Packets are divided into three categories:
//! - Host → Device transfer verbs, consumed by the transfer engine
//! - Host → Device requests, handled by the device controller
//! - Device → Host messages: replies, slider updates, errors, diagnostics

use heapless::Vec;

use crate::command::{Command, ErrorCode};
use crate::frame::{FrameError, Packet};

/// Largest chunk carried by UPLOAD_IMAGE_DATA / DOWNLOAD_IMAGE_DATA
pub const TRANSFER_CHUNK_SIZE: usize = 512;

/// File transfer verbs sent by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferRequest<'a> {
    /// Begin uploading `total_size` bytes of image data for a segment
    UploadStart { index: u8, total_size: u32 },
    /// One chunk of upload data
    UploadData(&'a [u8]),
    /// Finalize the upload
    UploadEnd,
    /// Begin streaming a segment image back to the host
    DownloadStart { index: u8 },
    /// Acknowledgement; advances an active download
    Ack,
}

impl<'a> TransferRequest<'a> {
    /// Parse a transfer verb from a packet
    ///
    /// Returns `Ok(None)` for packets outside the transfer sub-protocol and
    /// `Err(ErrorCode::InvalidData)` when a transfer verb carries a malformed
    /// payload.
    pub fn from_packet(packet: &'a Packet) -> Result<Option<Self>, ErrorCode> {
        let payload = packet.payload.as_slice();
        let request = match packet.command {
            Command::UploadImageStart => {
                let [index, s0, s1, s2, s3] = payload else {
                    return Err(ErrorCode::InvalidData);
                };
                TransferRequest::UploadStart {
                    index: *index,
                    total_size: u32::from_le_bytes([*s0, *s1, *s2, *s3]),
                }
            }
            Command::UploadImageData => TransferRequest::UploadData(payload),
            Command::UploadImageEnd => TransferRequest::UploadEnd,
            Command::DownloadImageStart => {
                let [index] = payload else {
                    return Err(ErrorCode::InvalidData);
                };
                TransferRequest::DownloadStart { index: *index }
            }
            Command::Ack => TransferRequest::Ack,
            _ => return Ok(None),
        };
        Ok(Some(request))
    }

    /// Encode this request into a packet (for host tooling and tests)
    pub fn to_packet(&self) -> Result<Packet, FrameError> {
        match self {
            TransferRequest::UploadStart { index, total_size } => {
                let mut payload = [0u8; 5];
                payload[0] = *index;
                payload[1..].copy_from_slice(&total_size.to_le_bytes());
                Packet::new(Command::UploadImageStart, &payload)
            }
            TransferRequest::UploadData(data) => Packet::new(Command::UploadImageData, data),
            TransferRequest::UploadEnd => Ok(Packet::empty(Command::UploadImageEnd)),
            TransferRequest::DownloadStart { index } => {
                Packet::new(Command::DownloadImageStart, &[*index])
            }
            TransferRequest::Ack => Ok(Packet::empty(Command::Ack)),
        }
    }
}

/// Requests handled by the device controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostRequest<'a> {
    /// Heartbeat request
    Ping,
    /// Replace the stored configuration with these bytes
    SetConfig(&'a [u8]),
    /// Read back the stored configuration
    GetConfig,
    /// Restore the built-in configuration
    DefaultConfig,
    /// Set the shared backlight level
    SetBacklight(u8),
    /// Report awake state, backlight and segment count
    GetStatus,
    /// Acknowledgement received outside a transfer
    Ack,
}

impl<'a> HostRequest<'a> {
    /// Parse a request from a forwarded packet
    ///
    /// Device-originated verbs are rejected with `InvalidCommand`.
    pub fn from_packet(packet: &'a Packet) -> Result<Self, ErrorCode> {
        let payload = packet.payload.as_slice();
        match packet.command {
            Command::Ping => Ok(HostRequest::Ping),
            Command::SetConfig => Ok(HostRequest::SetConfig(payload)),
            Command::GetConfig => Ok(HostRequest::GetConfig),
            Command::DefaultConfig => Ok(HostRequest::DefaultConfig),
            Command::SetBacklight => payload
                .first()
                .map(|&level| HostRequest::SetBacklight(level))
                .ok_or(ErrorCode::InvalidData),
            Command::GetStatus => Ok(HostRequest::GetStatus),
            Command::Ack => Ok(HostRequest::Ack),
            _ => Err(ErrorCode::InvalidCommand),
        }
    }
}

/// Payload bytes of a [`DeviceMessage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload<'a> {
    Borrowed(&'a [u8]),
    Inline(Vec<u8, 3>),
}

impl AsRef<[u8]> for MessagePayload<'_> {
    fn as_ref(&self) -> &[u8] {
        match self {
            MessagePayload::Borrowed(bytes) => bytes,
            MessagePayload::Inline(bytes) => bytes,
        }
    }
}

/// Messages sent from the device to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMessage<'a> {
    /// Heartbeat response
    Pong,
    /// Accepted operation
    Ack,
    /// Rejected or failed operation
    Error(ErrorCode),
    /// Diagnostic text
    Log(&'a str),
    /// Stored configuration bytes
    ConfigData(&'a [u8]),
    /// Slider position changed
    SliderValue { index: u8, value: u8 },
    /// Device status
    StatusData {
        awake: bool,
        backlight: u8,
        segments: u8,
    },
    /// One chunk of a download
    DownloadData(&'a [u8]),
    /// End of a download stream
    DownloadEnd,
}

impl<'a> DeviceMessage<'a> {
    /// Wire command for this message
    pub fn command(&self) -> Command {
        match self {
            DeviceMessage::Pong => Command::Pong,
            DeviceMessage::Ack => Command::Ack,
            DeviceMessage::Error(_) => Command::Error,
            DeviceMessage::Log(_) => Command::LogMessage,
            DeviceMessage::ConfigData(_) => Command::ConfigData,
            DeviceMessage::SliderValue { .. } => Command::SliderValue,
            DeviceMessage::StatusData { .. } => Command::StatusData,
            DeviceMessage::DownloadData(_) => Command::DownloadImageData,
            DeviceMessage::DownloadEnd => Command::DownloadImageEnd,
        }
    }

    /// Payload bytes for this message
    pub fn payload(&self) -> MessagePayload<'a> {
        let inline = |bytes: &[u8]| {
            // At most three bytes, always fits
            MessagePayload::Inline(Vec::from_slice(bytes).unwrap_or_default())
        };
        match *self {
            DeviceMessage::Pong | DeviceMessage::Ack | DeviceMessage::DownloadEnd => {
                MessagePayload::Borrowed(&[])
            }
            DeviceMessage::Error(code) => inline(&[code.to_byte()]),
            DeviceMessage::Log(text) => MessagePayload::Borrowed(text.as_bytes()),
            DeviceMessage::ConfigData(bytes) | DeviceMessage::DownloadData(bytes) => {
                MessagePayload::Borrowed(bytes)
            }
            DeviceMessage::SliderValue { index, value } => inline(&[index, value]),
            DeviceMessage::StatusData {
                awake,
                backlight,
                segments,
            } => inline(&[awake as u8, backlight, segments]),
        }
    }

    /// Encode this message into a packet
    pub fn to_packet(&self) -> Result<Packet, FrameError> {
        Packet::new(self.command(), self.payload().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_start_parsing() {
        let packet = Packet::new(Command::UploadImageStart, &[3, 0x10, 0x27, 0, 0]).unwrap();
        assert_eq!(
            TransferRequest::from_packet(&packet),
            Ok(Some(TransferRequest::UploadStart {
                index: 3,
                total_size: 10_000,
            }))
        );
    }

    #[test]
    fn test_upload_start_wrong_length() {
        let packet = Packet::new(Command::UploadImageStart, &[3, 0x10, 0x27]).unwrap();
        assert_eq!(
            TransferRequest::from_packet(&packet),
            Err(ErrorCode::InvalidData)
        );
    }

    #[test]
    fn test_download_start_parsing() {
        let packet = Packet::new(Command::DownloadImageStart, &[2]).unwrap();
        assert_eq!(
            TransferRequest::from_packet(&packet),
            Ok(Some(TransferRequest::DownloadStart { index: 2 }))
        );

        let packet = Packet::empty(Command::DownloadImageStart);
        assert_eq!(
            TransferRequest::from_packet(&packet),
            Err(ErrorCode::InvalidData)
        );
    }

    #[test]
    fn test_non_transfer_packet_passes_through() {
        let packet = Packet::empty(Command::Ping);
        assert_eq!(TransferRequest::from_packet(&packet), Ok(None));
    }

    #[test]
    fn test_transfer_request_roundtrip() {
        let original = TransferRequest::UploadStart {
            index: 7,
            total_size: 0x0102_0304,
        };
        let packet = original.to_packet().unwrap();
        assert_eq!(TransferRequest::from_packet(&packet), Ok(Some(original)));
    }

    #[test]
    fn test_host_request_backlight() {
        let packet = Packet::new(Command::SetBacklight, &[128]).unwrap();
        assert_eq!(
            HostRequest::from_packet(&packet),
            Ok(HostRequest::SetBacklight(128))
        );

        let packet = Packet::empty(Command::SetBacklight);
        assert_eq!(HostRequest::from_packet(&packet), Err(ErrorCode::InvalidData));
    }

    #[test]
    fn test_host_request_rejects_device_verbs() {
        let packet = Packet::new(Command::SliderValue, &[0, 50]).unwrap();
        assert_eq!(
            HostRequest::from_packet(&packet),
            Err(ErrorCode::InvalidCommand)
        );
    }

    #[test]
    fn test_device_message_error() {
        let packet = DeviceMessage::Error(ErrorCode::TransferTimeout)
            .to_packet()
            .unwrap();
        assert_eq!(packet.command, Command::Error);
        assert_eq!(packet.payload.as_slice(), &[0x08]);
    }

    #[test]
    fn test_device_message_status() {
        let packet = DeviceMessage::StatusData {
            awake: true,
            backlight: 200,
            segments: 4,
        }
        .to_packet()
        .unwrap();
        assert_eq!(packet.command, Command::StatusData);
        assert_eq!(packet.payload.as_slice(), &[1, 200, 4]);
    }

    #[test]
    fn test_device_message_log() {
        let packet = DeviceMessage::Log("Packet timeout").to_packet().unwrap();
        assert_eq!(packet.command, Command::LogMessage);
        assert_eq!(packet.payload.as_slice(), b"Packet timeout");
    }
}
