//! Host link
//!
//! Owns the packet writer and the transfer engine and drives three
//! activities that share them:
//!
//! - [`Link::run_receiver`]: reads the transport, reassembles frames,
//!   dispatches transfer verbs to the engine and forwards everything else
//! - [`Link::run_watchdog`]: cancels a stalled transfer and reports the timeout
//! - [`Link::run_sender`]: streams downloads chunk by chunk
//!
//! [`Link::run`] joins all three. On the device the link is placed in a
//! `static` and the three futures are driven by one task; tests drive the
//! pieces they need with `block_on`.
//!
//! The device controller consumes two outputs: forwarded packets through the
//! channel handed to [`Link::run_receiver`], and installed images through
//! [`Link::asset_ready`]. Forwarding is lossy under backpressure; installs
//! are never lost.

use core::cell::Cell;
use core::fmt;

use embassy_futures::join::join3;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_deadline, Instant};
use embedded_io_async::{Error as _, Read, Write};
use slidr_hal::Storage;
use slidr_protocol::{
    Command, DeviceMessage, ErrorCode, FrameError, FrameParser, Packet, TransferRequest,
    TRANSFER_CHUNK_SIZE,
};

use crate::config::LinkConfig;
use crate::error::TransferError;
use crate::transfer::{Chunk, DownloadTicket, Installed, TransferEngine};
use crate::writer::{PacketWriter, SendError};

/// Buffer size for transport reads
const RX_BUF_SIZE: usize = 64;

/// Segment indices installed but not yet collected
#[derive(Debug, Clone, Copy, Default)]
struct PendingAssets([u32; 8]);

impl PendingAssets {
    fn insert(&mut self, index: u8) {
        self.0[index as usize / 32] |= 1 << (index % 32);
    }

    /// Take the lowest pending index
    fn pop(&mut self) -> Option<u8> {
        let (word, bits) = self.0.iter_mut().enumerate().find(|(_, bits)| **bits != 0)?;
        let bit = bits.trailing_zeros();
        *bits &= !(1 << bit);
        Some((word as u32 * 32 + bit) as u8)
    }
}

/// Device side of the host link
pub struct Link<M: RawMutex, S: Storage, W: Write> {
    config: LinkConfig,
    writer: PacketWriter<M, W>,
    transfer: TransferEngine<M, S>,
    last_packet: Mutex<M, Cell<Option<Instant>>>,
    assets: Mutex<M, Cell<PendingAssets>>,
    asset_installed: Signal<M, ()>,
}

impl<M: RawMutex, S: Storage, W: Write> Link<M, S, W> {
    pub fn new(config: LinkConfig, storage: S, tx: W) -> Self {
        Self {
            transfer: TransferEngine::new(storage, &config),
            writer: PacketWriter::new(tx),
            last_packet: Mutex::new(Cell::new(None)),
            assets: Mutex::new(Cell::new(PendingAssets::default())),
            asset_installed: Signal::new(),
            config,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn transfer(&self) -> &TransferEngine<M, S> {
        &self.transfer
    }

    pub fn writer(&self) -> &PacketWriter<M, W> {
        &self.writer
    }

    /// Time the last valid packet arrived
    pub fn last_packet_at(&self) -> Option<Instant> {
        self.last_packet.lock(|last| last.get())
    }

    /// Wait for the next installed upload
    ///
    /// Installs are recorded per segment until collected here, so none is
    /// lost while the controller is busy. Installing the same segment twice
    /// before collection yields it once.
    pub async fn asset_ready(&self) -> Installed {
        loop {
            let pending = self.assets.lock(|assets| {
                let mut set = assets.get();
                let index = set.pop();
                assets.set(set);
                index
            });
            match pending.map(|index| (index, self.config.asset_path(index))) {
                Some((index, Ok(path))) => return Installed { index, path },
                Some((index, Err(e))) => warn!("No asset path for segment {}: {:?}", index, e),
                None => self.asset_installed.wait().await,
            }
        }
    }

    fn notify_installed(&self, installed: &Installed) {
        self.assets.lock(|assets| {
            let mut set = assets.get();
            set.insert(installed.index);
            assets.set(set);
        });
        self.asset_installed.signal(());
    }

    /// Send a message to the host, logging a failure
    pub async fn send(&self, message: &DeviceMessage<'_>) {
        if let Err(e) = self.writer.send_message(message).await {
            self.log_send_error(message.command(), e);
        }
    }

    /// Report a rejected operation: LOG_MESSAGE with the reason, then ERROR
    pub async fn report(&self, code: ErrorCode, reason: fmt::Arguments<'_>) {
        warn!("Reporting error {:?}", code);
        if let Err(e) = self.writer.send_log(reason).await {
            self.log_send_error(Command::LogMessage, e);
        }
        self.send(&DeviceMessage::Error(code)).await;
    }

    async fn report_transfer(&self, e: TransferError) {
        self.report(e.code(), format_args!("{}", e)).await;
    }

    fn log_send_error(&self, command: Command, e: SendError<W::Error>) {
        match e {
            SendError::PayloadTooLarge => warn!("Payload too large for {:?}", command),
            SendError::Transport(e) => warn!("Failed to send {:?}: {:?}", command, e.kind()),
        }
    }

    /// Dispatch one decoded packet
    ///
    /// Transfer verbs are handled here and answered on the wire; a finished
    /// upload is queued for [`Link::asset_ready`]. An ACK is consumed while a
    /// transfer is active. Everything else is returned for the command
    /// handler.
    pub async fn handle_packet(&self, packet: Packet) -> Option<Packet> {
        if !packet.command.is_transfer() {
            return Some(packet);
        }
        if packet.command == Command::Ack {
            if self.transfer.acknowledge() {
                trace!("ACK consumed by transfer");
                return None;
            }
            return Some(packet);
        }

        let request = match TransferRequest::from_packet(&packet) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(code) => {
                self.report(
                    code,
                    format_args!(
                        "Invalid payload for {:?}: {} bytes",
                        packet.command,
                        packet.payload.len()
                    ),
                )
                .await;
                return None;
            }
        };

        if let Err(e) = self.handle_transfer(request).await {
            self.report_transfer(e).await;
        }
        None
    }

    async fn handle_transfer(&self, request: TransferRequest<'_>) -> Result<(), TransferError> {
        match request {
            TransferRequest::UploadStart { index, total_size } => {
                let target = self.config.asset_path(index)?;
                self.transfer.start_upload(index, &target, total_size)?;
                self.send(&DeviceMessage::Ack).await;
            }
            TransferRequest::UploadData(data) => {
                self.transfer.receive_chunk(data)?;
                self.send(&DeviceMessage::Ack).await;
            }
            TransferRequest::UploadEnd => {
                let installed = self.transfer.end_upload()?;
                self.notify_installed(&installed);
                self.send(&DeviceMessage::Ack).await;
            }
            TransferRequest::DownloadStart { index } => {
                let source = self.config.asset_path(index)?;
                // The sender streams from here; no ACK for the start itself
                self.transfer.start_download(&source)?;
            }
            // Filtered out before parsing
            TransferRequest::Ack => {}
        }
        Ok(())
    }

    /// Report a framing error raised by the parser
    pub async fn handle_frame_error(&self, e: FrameError) {
        match e {
            FrameError::BufferOverflow(len) => {
                self.report(
                    ErrorCode::BufferOverflow,
                    format_args!("Frame length {} exceeds buffer", len),
                )
                .await
            }
            FrameError::ChecksumError {
                received,
                calculated,
            } => {
                self.report(
                    ErrorCode::ChecksumError,
                    format_args!(
                        "Checksum mismatch: received {:#04x}, calculated {:#04x}",
                        received, calculated
                    ),
                )
                .await
            }
            FrameError::UnknownCommand(byte) => {
                self.report(
                    ErrorCode::InvalidCommand,
                    format_args!("Unknown command {:#04x}", byte),
                )
                .await
            }
            FrameError::FrameTimeout => {
                // No wire code for a dropped partial frame
                warn!("Partial frame timed out");
                if let Err(e) = self.writer.send_log(format_args!("Frame timed out")).await {
                    self.log_send_error(Command::LogMessage, e);
                }
            }
            FrameError::PayloadTooLarge | FrameError::BufferTooSmall => {
                warn!("Unexpected frame error: {:?}", e);
            }
        }
    }

    /// Read the transport forever, dispatching packets and forwarding the
    /// rest to `forward`
    ///
    /// A partial frame is dropped as soon as its idle window has passed, even
    /// when the line goes quiet. Forwarded packets are dropped with a warning
    /// when `forward` is full, so a slow command handler never stalls
    /// ingestion.
    pub async fn run_receiver<R: Read, const N: usize>(
        &self,
        mut rx: R,
        forward: &Channel<M, Packet, N>,
    ) {
        info!("Link receiver started");

        let mut parser = FrameParser::with_timeout(self.config.frame_timeout_ms as u64);
        let mut buf = [0u8; RX_BUF_SIZE];

        loop {
            let deadline = match parser.deadline_ms() {
                Some(ms) => Instant::from_millis(ms),
                None => Instant::now() + self.config.frame_timeout(),
            };
            match with_deadline(deadline, rx.read(&mut buf)).await {
                Ok(Ok(n)) => {
                    trace!("RX: {} bytes", n);
                    for &byte in &buf[..n] {
                        match parser.feed(byte, Instant::now().as_millis()) {
                            Ok(Some(packet)) => {
                                self.mark_packet(&parser);
                                if let Some(packet) = self.handle_packet(packet).await {
                                    if forward.try_send(packet).is_err() {
                                        warn!("Forward channel full, dropping packet");
                                    }
                                }
                            }
                            Ok(None) => {}
                            Err(e) => self.handle_frame_error(e).await,
                        }
                    }
                }
                Ok(Err(e)) => warn!("Link read error: {:?}", e.kind()),
                Err(_) => {
                    if let Err(e) = parser.check_timeout(Instant::now().as_millis()) {
                        self.handle_frame_error(e).await;
                    }
                }
            }
        }
    }

    fn mark_packet(&self, parser: &FrameParser) {
        if let Some(ms) = parser.last_packet_at() {
            self.last_packet
                .lock(|last| last.set(Some(Instant::from_millis(ms))));
        }
    }

    /// Cancel and report transfers whose watchdog runs out
    pub async fn run_watchdog(&self) {
        loop {
            self.transfer.watchdog().expired().await;
            if self.transfer.expire() {
                self.report_transfer(TransferError::Timeout).await;
            }
        }
    }

    /// Stream each download as it is started
    pub async fn run_sender(&self) {
        loop {
            let ticket = self.transfer.download_requested().await;
            self.stream(ticket).await;
        }
    }

    async fn stream(&self, mut ticket: DownloadTicket) {
        let mut buf = [0u8; TRANSFER_CHUNK_SIZE];
        let chunk_size = self.config.chunk_size();

        loop {
            match self.transfer.read_chunk(ticket, &mut buf[..chunk_size]) {
                Ok(Chunk::Data(n)) => {
                    self.send(&DeviceMessage::DownloadData(&buf[..n])).await;
                    // A missed ACK does not stop the stream; the watchdog does.
                    // A download started meanwhile replaces a cancelled one at once.
                    let ack = self.transfer.wait_ack(self.config.transfer_timeout());
                    match select(ack, self.transfer.download_requested()).await {
                        Either::First(true) => self.transfer.kick(),
                        Either::First(false) => debug!("No ACK for download chunk"),
                        Either::Second(next) => {
                            debug!("Download replaced while waiting for ACK");
                            ticket = next;
                        }
                    }
                }
                Ok(Chunk::Finished) => {
                    self.send(&DeviceMessage::DownloadEnd).await;
                    return;
                }
                Ok(Chunk::Cancelled) => return,
                Err(e) => {
                    self.report_transfer(e).await;
                    return;
                }
            }
        }
    }

    /// Drive the receiver, the watchdog and the download sender together
    pub async fn run<R: Read, const N: usize>(&self, rx: R, forward: &Channel<M, Packet, N>) {
        join3(
            self.run_receiver(rx, forward),
            self.run_watchdog(),
            self.run_sender(),
        )
        .await;
    }
}
