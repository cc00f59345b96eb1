//! Link configuration
//!
//! Timing windows and storage locations used by the link. The defaults
//! match the reference device; tests shorten the windows.

use core::fmt::Write;

use embassy_time::Duration;
use heapless::String;
use slidr_protocol::TRANSFER_CHUNK_SIZE;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Maximum configured path length
pub const MAX_PATH_LEN: usize = 32;

/// Maximum asset path length (`{image_dir}/img-255.bin`)
pub const MAX_ASSET_PATH_LEN: usize = MAX_PATH_LEN + 12;

/// Path of an installed segment image
pub type AssetPath = String<MAX_ASSET_PATH_LEN>;

/// Default silence before a partial frame is dropped
pub const DEFAULT_FRAME_TIMEOUT_MS: u32 = 1000;

/// Default watchdog window for an active transfer
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u32 = 1000;

/// Link configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkConfig {
    /// Silence (ms) after which a partial inbound frame is discarded
    pub frame_timeout_ms: u32,
    /// Watchdog window (ms); also bounds each download acknowledgement wait
    pub transfer_timeout_ms: u32,
    /// Download chunk size in bytes (1-512)
    pub chunk_size: u16,
    /// Staging file for uploads in progress
    pub staging_path: String<MAX_PATH_LEN>,
    /// Directory holding segment images
    pub image_dir: String<MAX_PATH_LEN>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let mut staging_path = String::new();
        let _ = staging_path.push_str("/upload_temp");
        let mut image_dir = String::new();
        let _ = image_dir.push_str("/images");

        Self {
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
            chunk_size: TRANSFER_CHUNK_SIZE as u16,
            staging_path,
            image_dir,
        }
    }
}

impl LinkConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms as u64)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms as u64)
    }

    /// Effective download chunk size, clamped to the protocol limit
    pub fn chunk_size(&self) -> usize {
        (self.chunk_size as usize).clamp(1, TRANSFER_CHUNK_SIZE)
    }

    /// Storage path of the image for a segment
    pub fn asset_path(&self, index: u8) -> Result<AssetPath, TransferError> {
        let mut path = AssetPath::new();
        write!(path, "{}/img-{}.bin", self.image_dir.trim_end_matches('/'), index)
            .map_err(|_| TransferError::InvalidPath)?;
        Ok(path)
    }

    /// Segment index of an asset path produced by [`LinkConfig::asset_path`]
    pub fn asset_index(&self, path: &str) -> Option<u8> {
        let name = path
            .strip_prefix(self.image_dir.trim_end_matches('/'))?
            .strip_prefix("/img-")?
            .strip_suffix(".bin")?;
        name.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.frame_timeout_ms, 1000);
        assert_eq!(config.transfer_timeout_ms, 1000);
        assert_eq!(config.chunk_size(), 512);
        assert_eq!(config.staging_path.as_str(), "/upload_temp");
    }

    #[test]
    fn test_asset_path() {
        let config = LinkConfig::default();
        assert_eq!(config.asset_path(0).unwrap().as_str(), "/images/img-0.bin");
        assert_eq!(config.asset_path(255).unwrap().as_str(), "/images/img-255.bin");
    }

    #[test]
    fn test_asset_path_trailing_slash() {
        let mut config = LinkConfig::default();
        config.image_dir.push('/').unwrap();
        assert_eq!(config.asset_path(3).unwrap().as_str(), "/images/img-3.bin");
    }

    #[test]
    fn test_asset_index_roundtrip() {
        let config = LinkConfig::default();
        let path = config.asset_path(42).unwrap();
        assert_eq!(config.asset_index(&path), Some(42));
        assert_eq!(config.asset_index("/upload_temp"), None);
        assert_eq!(config.asset_index("/images/img-x.bin"), None);
    }

    #[test]
    fn test_chunk_size_clamped() {
        let mut config = LinkConfig {
            chunk_size: 4000,
            ..Default::default()
        };
        assert_eq!(config.chunk_size(), 512);
        config.chunk_size = 0;
        assert_eq!(config.chunk_size(), 1);
    }
}
