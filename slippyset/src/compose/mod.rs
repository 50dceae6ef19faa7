//! Tensor compositor
//!
//! Composes the multi-band input tensor for one tile address by decoding
//! each channel source's tile (through the tile cache) and concatenating the
//! selected bands. The band layout is an external contract with the model
//! consumer: channel blocks appear in declared order, and within each block
//! the declared band order. A tensor composed from
//! `[{sub: "images", bands: [1,2,3]}, {sub: "elevation", bands: [1]}]`
//! therefore carries image red, green, blue, then elevation as band 4.
//!
//! Every failure is tagged with the offending tile address so the training
//! loop can skip-and-log a bad tile instead of aborting a whole epoch.
//! Dimension mismatches are errors, never silent resizes; resizing would
//! corrupt the pixel-to-label alignment this subsystem exists to protect.

use crate::cache::{TileCache, TileKey};
use crate::channel::{decode_tile, ChannelError, ChannelSource, DecodedTile};
use crate::palette::{ClassMask, ClassPalette, PaletteError};
use crate::tile::TileAddress;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Composed multi-band input tensor for one tile.
///
/// `data` is band-major: band 0's full `height * width` plane first, then
/// band 1's, and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedTensor {
    /// Total bands across all channel blocks
    pub bands: u32,
    /// Height in pixels
    pub height: u32,
    /// Width in pixels
    pub width: u32,
    /// Band-major samples, `bands * height * width` bytes
    pub data: Vec<u8>,
}

impl ComposedTensor {
    /// Tensor shape as `(bands, height, width)`.
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.bands, self.height, self.width)
    }
}

/// Errors raised during per-tile composition.
///
/// Address-level variants carry the offending [`TileAddress`]; callers that
/// prefer skip-and-continue over abort key their bookkeeping on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    /// A channel or label tile is missing at this address
    #[error("Tile {address} not found under '{sub}'")]
    TileNotFound { address: TileAddress, sub: String },

    /// Tile bytes are not a decodable image
    #[error("Failed to decode tile {address} under '{sub}': {message}")]
    Decode {
        address: TileAddress,
        sub: String,
        message: String,
    },

    /// A configured band exceeds this tile's band count
    #[error(
        "Band {band} configured for '{sub}' but tile {address} has {available} band(s)"
    )]
    BandOutOfRange {
        address: TileAddress,
        sub: String,
        band: u32,
        available: u32,
    },

    /// Channel sources disagree on tile dimensions at this address
    #[error(
        "Tile {address} under '{sub}' is {}x{} but the first channel block is {}x{}",
        .actual.1, .actual.0, .expected.1, .expected.0
    )]
    DimensionMismatch {
        address: TileAddress,
        sub: String,
        /// (height, width) established by the first channel block
        expected: (u32, u32),
        /// (height, width) of the offending tile
        actual: (u32, u32),
    },

    /// Palette codec failure while decoding the label tile
    #[error("Label tile {address}: {source}")]
    Label {
        address: TileAddress,
        #[source]
        source: PaletteError,
    },

    /// `compose_label` called on a compositor without a label source
    #[error("No label source configured")]
    NoLabelSource,

    /// Compositor was built with an empty channel list
    #[error("No channel sources configured")]
    NoChannels,

    /// Channel configuration invalid (empty or zero band list); construction
    /// normally prevents this
    #[error("Invalid channel '{sub}': {message}")]
    InvalidChannel { sub: String, message: String },
}

impl ComposeError {
    /// The tile address the failure is tagged with, when address-level.
    pub fn address(&self) -> Option<TileAddress> {
        match self {
            ComposeError::TileNotFound { address, .. }
            | ComposeError::Decode { address, .. }
            | ComposeError::BandOutOfRange { address, .. }
            | ComposeError::DimensionMismatch { address, .. }
            | ComposeError::Label { address, .. } => Some(*address),
            ComposeError::NoLabelSource
            | ComposeError::NoChannels
            | ComposeError::InvalidChannel { .. } => None,
        }
    }
}

impl From<ChannelError> for ComposeError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::TileNotFound { sub, address } => {
                ComposeError::TileNotFound { address, sub }
            }
            ChannelError::Decode {
                sub,
                address,
                message,
            } => ComposeError::Decode {
                address,
                sub,
                message,
            },
            ChannelError::BandOutOfRange {
                sub,
                address,
                band,
                available,
            } => ComposeError::BandOutOfRange {
                address,
                sub,
                band,
                available,
            },
            ChannelError::EmptyBands { sub } => ComposeError::InvalidChannel {
                sub,
                message: "no bands configured".to_string(),
            },
            ChannelError::InvalidBandIndex { sub } => ComposeError::InvalidChannel {
                sub,
                message: "band indices start at 1".to_string(),
            },
        }
    }
}

/// Label source: the sub-directory holding label tiles and the palette that
/// decodes them.
#[derive(Debug, Clone)]
struct LabelSource {
    sub: String,
    palette: ClassPalette,
}

/// Cache-backed per-tile compositor.
///
/// Immutable once constructed; safe to share across loader workers behind
/// an `Arc`.
pub struct TensorCompositor {
    root: PathBuf,
    channels: Vec<ChannelSource>,
    label: Option<LabelSource>,
    cache: Arc<TileCache>,
}

impl TensorCompositor {
    /// Creates a compositor over a dataset root and its channel sources.
    pub fn new(
        root: impl Into<PathBuf>,
        channels: Vec<ChannelSource>,
        cache: Arc<TileCache>,
    ) -> Self {
        Self {
            root: root.into(),
            channels,
            label: None,
            cache,
        }
    }

    /// Configures the label sub-directory and its decoding palette.
    pub fn with_labels(mut self, sub: impl Into<String>, palette: ClassPalette) -> Self {
        self.label = Some(LabelSource {
            sub: sub.into(),
            palette,
        });
        self
    }

    /// True when a label source is configured.
    pub fn has_labels(&self) -> bool {
        self.label.is_some()
    }

    /// The label sub-directory, when a label source is configured.
    pub fn label_sub(&self) -> Option<&str> {
        self.label.as_ref().map(|l| l.sub.as_str())
    }

    /// Total bands the composed tensor will carry.
    pub fn total_bands(&self) -> usize {
        self.channels.iter().map(ChannelSource::band_count).sum()
    }

    /// The configured channel sources, in block order.
    pub fn channels(&self) -> &[ChannelSource] {
        &self.channels
    }

    fn fetch(&self, sub: &str, address: TileAddress) -> Result<Arc<DecodedTile>, ChannelError> {
        let key = TileKey::new(sub, address);
        self.cache
            .get_or_decode(&key, || decode_tile(&self.root, sub, address))
    }

    /// Composes the input tensor for one tile address.
    ///
    /// # Errors
    ///
    /// Address-tagged failures from any channel source: `TileNotFound`,
    /// `Decode`, `BandOutOfRange`, or `DimensionMismatch` when a source's
    /// tile disagrees with the first block's dimensions.
    pub fn compose(&self, address: TileAddress) -> Result<ComposedTensor, ComposeError> {
        if self.channels.is_empty() {
            return Err(ComposeError::NoChannels);
        }

        let mut dims: Option<(u32, u32)> = None;
        let mut bands = 0u32;
        let mut data = Vec::new();

        for source in &self.channels {
            let tile = self.fetch(source.sub(), address)?;

            let actual = (tile.height, tile.width);
            match dims {
                None => {
                    dims = Some(actual);
                    let pixels = tile.height as usize * tile.width as usize;
                    data.reserve(self.total_bands() * pixels);
                }
                Some(expected) if expected != actual => {
                    return Err(ComposeError::DimensionMismatch {
                        address,
                        sub: source.sub().to_string(),
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }

            let stack = source.select_bands(&tile, address)?;
            bands += stack.bands;
            data.extend_from_slice(&stack.data);
        }

        let (height, width) = dims.expect("channels checked non-empty");
        Ok(ComposedTensor {
            bands,
            height,
            width,
            data,
        })
    }

    /// Decodes the label tile at `address` into a class mask.
    ///
    /// # Errors
    ///
    /// `NoLabelSource` when labels are not configured; otherwise the same
    /// address-tagged failures as [`Self::compose`], plus `Label` wrapping
    /// `UnknownColor` from the palette codec.
    pub fn compose_label(&self, address: TileAddress) -> Result<ClassMask, ComposeError> {
        let label = self.label.as_ref().ok_or(ComposeError::NoLabelSource)?;

        let tile = self.fetch(&label.sub, address)?;
        let rgb = tile
            .to_rgb_image()
            .ok_or_else(|| ComposeError::Decode {
                address,
                sub: label.sub.clone(),
                message: format!("label tile has {} band(s), expected RGB", tile.bands),
            })?;

        label
            .palette
            .decode(&rgb)
            .map_err(|source| ComposeError::Label { address, source })
    }
}
