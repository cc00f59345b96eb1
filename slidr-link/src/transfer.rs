//! File transfer engine
//!
//! State machine for exactly one transfer at a time:
//!
//! ```text
//! Idle ──start_upload──▶ Upload ──end_upload / cancel / expiry──▶ Idle
//! Idle ──start_download─▶ Download ──exhausted / cancel / expiry──▶ Idle
//! ```
//!
//! Every transition into an active state starts the watchdog and every
//! transition back to `Idle` stops it, under the same lock that changes the
//! state. Storage calls are synchronous and short, so the lock is a blocking
//! mutex and is never held across an await point.
//!
//! Uploads are written to a staging file and only moved over the
//! destination once the declared size has arrived. Downloads are streamed by
//! a separate sender (see [`crate::Link::run_sender`]), which pulls chunks
//! through [`TransferEngine::read_chunk`] and waits for acknowledgements
//! signalled by [`TransferEngine::acknowledge`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use heapless::String;
use slidr_hal::{FileHandle, OpenMode, Storage};

use crate::config::{AssetPath, LinkConfig, MAX_PATH_LEN};
use crate::error::TransferError;
use crate::watchdog::Watchdog;

/// Direction of the active transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host → device
    Upload,
    /// Device → host
    Download,
}

/// Progress of the active transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Progress {
    pub direction: Direction,
    /// Bytes written (upload) or sent (download) so far
    pub transferred: u32,
    /// Declared size (upload) or source size (download)
    pub total: u32,
}

/// Identifies one download so a stale sender never streams a newer one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DownloadTicket(u32);

/// Outcome of pulling the next download chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Chunk {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Source exhausted; the transfer is finished and the engine is idle
    Finished,
    /// The download was cancelled or replaced
    Cancelled,
}

/// A successfully installed upload
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Installed {
    pub index: u8,
    pub path: AssetPath,
}

struct Upload<F> {
    file: F,
    index: u8,
    target: AssetPath,
    total_size: u32,
    received: u32,
}

struct Download<F> {
    file: F,
    source: AssetPath,
    size: u32,
    sent: u32,
    ticket: DownloadTicket,
}

enum State<F> {
    Idle,
    Upload(Upload<F>),
    Download(Download<F>),
}

struct Inner<S: Storage> {
    storage: S,
    state: State<S::File>,
    downloads: u32,
}

/// Owner of the transfer state, the watchdog, and the acknowledgement signal
pub struct TransferEngine<M: RawMutex, S: Storage> {
    inner: Mutex<M, RefCell<Inner<S>>>,
    staging_path: String<MAX_PATH_LEN>,
    watchdog: Watchdog<M>,
    ack: Signal<M, ()>,
    download_ready: Signal<M, DownloadTicket>,
}

impl<M: RawMutex, S: Storage> TransferEngine<M, S> {
    pub fn new(storage: S, config: &LinkConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                storage,
                state: State::Idle,
                downloads: 0,
            })),
            staging_path: config.staging_path.clone(),
            watchdog: Watchdog::new(config.transfer_timeout()),
            ack: Signal::new(),
            download_ready: Signal::new(),
        }
    }

    pub fn watchdog(&self) -> &Watchdog<M> {
        &self.watchdog
    }

    /// Run `f` with exclusive access to the storage
    ///
    /// Used by collaborators that read installed assets between transfers.
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.inner.lock(|inner| f(&mut inner.borrow_mut().storage))
    }

    /// True while an upload or download is active
    pub fn is_active(&self) -> bool {
        self.direction().is_some()
    }

    pub fn direction(&self) -> Option<Direction> {
        self.progress().map(|p| p.direction)
    }

    pub fn progress(&self) -> Option<Progress> {
        self.inner.lock(|inner| match &inner.borrow().state {
            State::Idle => None,
            State::Upload(upload) => Some(Progress {
                direction: Direction::Upload,
                transferred: upload.received,
                total: upload.total_size,
            }),
            State::Download(download) => Some(Progress {
                direction: Direction::Download,
                transferred: download.sent,
                total: download.size,
            }),
        })
    }

    /// Begin receiving an image for segment `index` at `target`
    pub fn start_upload(
        &self,
        index: u8,
        target: &str,
        total_size: u32,
    ) -> Result<(), TransferError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !matches!(inner.state, State::Idle) {
                return Err(TransferError::InProgress);
            }

            let target = AssetPath::try_from(target).map_err(|_| TransferError::InvalidPath)?;
            let file = inner.storage.open(&self.staging_path, OpenMode::Write)?;

            info!("Upload started: {} ({} bytes)", target, total_size);
            inner.state = State::Upload(Upload {
                file,
                index,
                target,
                total_size,
                received: 0,
            });
            self.watchdog.start();
            Ok(())
        })
    }

    /// Append one chunk to the active upload
    ///
    /// A short write or an overrun cancels the upload before the error is
    /// returned.
    pub fn receive_chunk(&self, data: &[u8]) -> Result<(), TransferError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let State::Upload(upload) = &mut inner.state else {
                return Err(TransferError::NotActive);
            };
            self.watchdog.kick();

            let received = upload.received as u64 + data.len() as u64;
            if received > upload.total_size as u64 {
                let e = TransferError::Overrun {
                    received: received.min(u32::MAX as u64) as u32,
                    expected: upload.total_size,
                };
                self.cancel_locked(&mut inner);
                return Err(e);
            }

            let written = match upload.file.write(data) {
                Ok(written) => written,
                Err(e) => {
                    self.cancel_locked(&mut inner);
                    return Err(e.into());
                }
            };
            if written != data.len() {
                self.cancel_locked(&mut inner);
                return Err(TransferError::ShortWrite {
                    written,
                    expected: data.len(),
                });
            }

            upload.received += written as u32;
            trace!("Upload chunk: {}/{}", upload.received, upload.total_size);
            Ok(())
        })
    }

    /// Finalize the active upload and install it over the destination
    ///
    /// The old destination is removed before the staging file is renamed
    /// into place. If the rename then fails the destination is left absent;
    /// the staging file is discarded either way.
    pub fn end_upload(&self) -> Result<Installed, TransferError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !matches!(inner.state, State::Upload(_)) {
                return Err(TransferError::NotActive);
            }
            let State::Upload(upload) = core::mem::replace(&mut inner.state, State::Idle) else {
                return Err(TransferError::NotActive);
            };
            self.watchdog.stop();
            upload.file.close();

            if upload.received != upload.total_size {
                let _ = inner.storage.remove(&self.staging_path);
                return Err(TransferError::SizeMismatch {
                    received: upload.received,
                    expected: upload.total_size,
                });
            }

            if let Err(e) = Self::install(&mut inner.storage, &self.staging_path, &upload.target) {
                warn!("Failed to install upload at {}: {:?}", upload.target, e);
                let _ = inner.storage.remove(&self.staging_path);
                return Err(e.into());
            }

            info!("Upload complete: {} ({} bytes)", upload.target, upload.received);
            Ok(Installed {
                index: upload.index,
                path: upload.target,
            })
        })
    }

    fn install(
        storage: &mut S,
        staging: &str,
        target: &str,
    ) -> Result<(), slidr_hal::StorageError> {
        if storage.exists(target) {
            storage.remove(target)?;
        }
        storage.create_parent_dirs(target)?;
        storage.rename(staging, target)
    }

    /// Open `source` and hand it to the download sender
    pub fn start_download(&self, source: &str) -> Result<DownloadTicket, TransferError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if !matches!(inner.state, State::Idle) {
                return Err(TransferError::InProgress);
            }

            let source = AssetPath::try_from(source).map_err(|_| TransferError::InvalidPath)?;
            let file = inner.storage.open(&source, OpenMode::Read)?;
            let size = file.size() as u32;

            inner.downloads = inner.downloads.wrapping_add(1);
            let ticket = DownloadTicket(inner.downloads);
            info!("Download started: {} ({} bytes)", source, size);
            inner.state = State::Download(Download {
                file,
                source,
                size,
                sent: 0,
                ticket,
            });

            // Drop any acknowledgement left over from before this download
            self.ack.reset();
            self.watchdog.start();
            self.download_ready.signal(ticket);
            Ok(ticket)
        })
    }

    /// Wait for the next download to be started
    pub async fn download_requested(&self) -> DownloadTicket {
        self.download_ready.wait().await
    }

    /// Read the next chunk of the download identified by `ticket`
    ///
    /// Reads up to `buffer.len()` bytes, bounded by what remains of the
    /// source. On exhaustion the source is closed and the engine returns to
    /// idle before `Chunk::Finished` is returned. A failed or short read
    /// cancels the download.
    pub fn read_chunk(
        &self,
        ticket: DownloadTicket,
        buffer: &mut [u8],
    ) -> Result<Chunk, TransferError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let download = match &mut inner.state {
                State::Download(download) if download.ticket == ticket => download,
                _ => return Ok(Chunk::Cancelled),
            };

            let wanted = buffer.len().min(download.size.saturating_sub(download.sent) as usize);
            if wanted == 0 {
                if let State::Download(download) = core::mem::replace(&mut inner.state, State::Idle)
                {
                    info!("Download complete: {} ({} bytes)", download.source, download.sent);
                    download.file.close();
                }
                self.watchdog.stop();
                return Ok(Chunk::Finished);
            }

            let n = match download.file.read(&mut buffer[..wanted]) {
                Ok(n) => n,
                Err(e) => {
                    self.cancel_locked(&mut inner);
                    return Err(e.into());
                }
            };
            if n != wanted {
                self.cancel_locked(&mut inner);
                return Err(TransferError::ShortRead {
                    read: n,
                    expected: wanted,
                });
            }

            download.sent += n as u32;
            Ok(Chunk::Data(n))
        })
    }

    /// Deliver an acknowledgement to the active transfer
    ///
    /// Returns false when no transfer is active, leaving the packet for the
    /// command handler.
    pub fn acknowledge(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.ack.signal(());
        true
    }

    /// Push the watchdog deadline out, if a transfer is still active
    pub fn kick(&self) {
        self.inner.lock(|inner| {
            if !matches!(inner.borrow().state, State::Idle) {
                self.watchdog.kick();
            }
        });
    }

    /// Wait up to `timeout` for an acknowledgement; true if one arrived
    pub async fn wait_ack(&self, timeout: Duration) -> bool {
        with_timeout(timeout, self.ack.wait()).await.is_ok()
    }

    /// Abort any active transfer
    ///
    /// Idempotent. Closes the open handle, removes the staging file of an
    /// upload, and stops the watchdog.
    pub fn cancel(&self) {
        self.inner.lock(|inner| self.cancel_locked(&mut inner.borrow_mut()));
    }

    /// Handle a watchdog expiry
    ///
    /// Returns true if a transfer was active and has been cancelled, i.e.
    /// the timeout must be reported.
    pub fn expire(&self) -> bool {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if matches!(inner.state, State::Idle) {
                return false;
            }
            warn!("Transfer watchdog expired");
            self.cancel_locked(&mut inner);
            true
        })
    }

    fn cancel_locked(&self, inner: &mut Inner<S>) {
        match core::mem::replace(&mut inner.state, State::Idle) {
            State::Idle => {}
            State::Upload(upload) => {
                upload.file.close();
                let _ = inner.storage.remove(&self.staging_path);
                self.watchdog.stop();
                debug!("Upload to {} cancelled", upload.target);
            }
            State::Download(download) => {
                download.file.close();
                self.watchdog.stop();
                debug!("Download of {} cancelled", download.source);
            }
        }
    }
}
