//! Tile address model
//!
//! Represents and parses `(zoom, x, y)` addresses in the standard slippy-map
//! pyramid and derives their on-disk location. Pure value logic; the
//! filesystem is only touched by the [`crate::index`] module.

mod types;

pub use types::{AddressError, TileAddress, MAX_ZOOM, MIN_ZOOM};

use std::path::{Path, PathBuf};

impl TileAddress {
    /// Creates a validated tile address.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidZoom` if `zoom` exceeds [`MAX_ZOOM`],
    /// or `AddressError::InvalidAddress` if `x` or `y` is outside
    /// `[0, 2^zoom)`.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self, AddressError> {
        if zoom > MAX_ZOOM {
            return Err(AddressError::InvalidZoom(zoom));
        }

        let side = 1u64 << zoom;
        if u64::from(x) >= side || u64::from(y) >= side {
            return Err(AddressError::InvalidAddress { zoom, x, y });
        }

        Ok(Self { zoom, x, y })
    }

    /// Parses an address from the string components of a `zoom/x/y` path.
    ///
    /// Used by the pyramid indexer when walking directory names. Returns
    /// `None` for components that are not non-negative integers or addresses
    /// that fail range validation; the caller skips those entries.
    pub fn parse_components(zoom: &str, x: &str, y: &str) -> Option<Self> {
        let zoom: u8 = parse_decimal(zoom)?;
        let x: u32 = parse_decimal(x)?;
        let y: u32 = parse_decimal(y)?;
        Self::new(zoom, x, y).ok()
    }

    /// Derives the tile's path as `root/zoom/x/y.ext`.
    pub fn to_path(&self, root: &Path, ext: &str) -> PathBuf {
        root.join(self.zoom.to_string())
            .join(self.x.to_string())
            .join(format!("{}.{}", self.y, ext))
    }
}

/// Strict decimal parse: rejects signs, leading `+`, and non-ASCII digits
/// that `str::parse` would otherwise accept.
fn parse_decimal<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
