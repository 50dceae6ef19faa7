//! Tile address type definitions

use std::fmt;

/// Smallest zoom level that produces a pyramid
pub const MIN_ZOOM: u8 = 0;
/// Largest zoom level accepted by the address model.
///
/// At zoom 23 a pyramid spans 2^23 tiles per axis, which is already beyond
/// what any imagery provider publishes. Keeping the bound at 23 lets both
/// axes fit comfortably in `u32`.
pub const MAX_ZOOM: u8 = 23;

/// Address of a raster tile in the Slippy Map `zoom/x/y` pyramid.
///
/// Immutable value type. Ordering is structural: zoom first, then x, then y,
/// which makes ordered sets of addresses group by zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileAddress {
    /// Zoom level (0-23)
    pub zoom: u8,
    /// Column (east-west), 0 at the west edge
    pub x: u32,
    /// Row (north-south), 0 at the north edge
    pub y: u32,
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Errors that can occur when constructing a tile address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Zoom level is outside the supported range (0 to 23)
    InvalidZoom(u8),
    /// x or y coordinate does not fit the pyramid at the given zoom
    InvalidAddress { zoom: u8, x: u32, y: u32 },
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::InvalidZoom(zoom) => {
                write!(
                    f,
                    "Invalid zoom level: {} (must be between {} and {})",
                    zoom, MIN_ZOOM, MAX_ZOOM
                )
            }
            AddressError::InvalidAddress { zoom, x, y } => {
                write!(
                    f,
                    "Invalid tile address {}/{}/{}: x and y must be below {}",
                    zoom,
                    x,
                    y,
                    1u64 << zoom
                )
            }
        }
    }
}

impl std::error::Error for AddressError {}
