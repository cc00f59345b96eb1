//! Outbound packet writer
//!
//! The receive path, the watchdog and the download sender all reply to the
//! host over one transport. The writer serializes them: each packet is
//! written whole while holding the transport lock, so frames never
//! interleave.

use core::fmt::{self, Write as _};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_io_async::Write;
use heapless::String;
use slidr_protocol::frame::{frame_checksum, header};
use slidr_protocol::{Command, DeviceMessage, ErrorCode, MAX_PAYLOAD_SIZE};

/// Longest diagnostic text carried by one LOG_MESSAGE
pub const MAX_LOG_LEN: usize = 128;

/// Failure to send a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError<E> {
    /// Payload exceeds the frame limit; nothing was written
    PayloadTooLarge,
    /// Transport write failed, possibly mid-frame
    Transport(E),
}

/// Serializing packet writer over a byte transport
pub struct PacketWriter<M: RawMutex, W> {
    tx: Mutex<M, W>,
}

impl<M: RawMutex, W: Write> PacketWriter<M, W> {
    pub const fn new(tx: W) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    /// Frame and write one packet
    pub async fn send(&self, command: Command, payload: &[u8]) -> Result<(), SendError<W::Error>> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::PayloadTooLarge);
        }

        let mut tx = self.tx.lock().await;
        tx.write_all(&header(command, payload.len() as u16))
            .await
            .map_err(SendError::Transport)?;
        tx.write_all(payload).await.map_err(SendError::Transport)?;
        tx.write_all(&[frame_checksum(command, payload)])
            .await
            .map_err(SendError::Transport)?;
        tx.flush().await.map_err(SendError::Transport)
    }

    pub async fn send_message(&self, message: &DeviceMessage<'_>) -> Result<(), SendError<W::Error>> {
        self.send(message.command(), message.payload().as_ref()).await
    }

    /// Send formatted diagnostic text as a LOG_MESSAGE
    ///
    /// Text that does not fit is cut at the last whole fragment.
    pub async fn send_log(&self, args: fmt::Arguments<'_>) -> Result<(), SendError<W::Error>> {
        let mut text: String<MAX_LOG_LEN> = String::new();
        let _ = text.write_fmt(args);
        self.send(Command::LogMessage, text.as_bytes()).await
    }

    pub async fn send_error(&self, code: ErrorCode) -> Result<(), SendError<W::Error>> {
        self.send_message(&DeviceMessage::Error(code)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embedded_io_async::ErrorType;
    use slidr_protocol::{FrameParser, Packet};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    /// Transport that records everything written to it
    #[derive(Clone, Default)]
    pub(crate) struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Capture {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.0.borrow().clone()
        }

        /// Decode every complete packet written so far
        pub(crate) fn packets(&self) -> Vec<Packet> {
            let mut parser = FrameParser::new();
            self.0
                .borrow()
                .iter()
                .filter_map(|&byte| parser.feed(byte, 0).ok().flatten())
                .collect()
        }
    }

    impl ErrorType for Capture {
        type Error = Infallible;
    }

    impl Write for Capture {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    #[test]
    fn test_send_matches_serialize() {
        let capture = Capture::default();
        let writer = PacketWriter::<NoopRawMutex, _>::new(capture.clone());

        block_on(writer.send(Command::SliderValue, &[2, 77])).unwrap();
        let expected = slidr_protocol::serialize(Command::SliderValue, &[2, 77]).unwrap();
        assert_eq!(capture.bytes(), expected.as_slice());
    }

    #[test]
    fn test_send_error_code() {
        let capture = Capture::default();
        let writer = PacketWriter::<NoopRawMutex, _>::new(capture.clone());

        block_on(writer.send_error(ErrorCode::FileError)).unwrap();
        let packets = capture.packets();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].command, Command::Error);
        assert_eq!(packets[0].payload.as_slice(), [ErrorCode::FileError.to_byte()]);
    }

    #[test]
    fn test_send_log_formats_text() {
        let capture = Capture::default();
        let writer = PacketWriter::<NoopRawMutex, _>::new(capture.clone());

        block_on(writer.send_log(format_args!("received {} of {}", 5, 10))).unwrap();
        let packets = capture.packets();
        assert_eq!(packets[0].command, Command::LogMessage);
        assert_eq!(packets[0].payload.as_slice(), b"received 5 of 10");
    }

    #[test]
    fn test_oversized_payload_writes_nothing() {
        let capture = Capture::default();
        let writer = PacketWriter::<NoopRawMutex, _>::new(capture.clone());

        let payload = [0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            block_on(writer.send(Command::ConfigData, &payload)),
            Err(SendError::PayloadTooLarge)
        );
        assert!(capture.bytes().is_empty());
    }
}
