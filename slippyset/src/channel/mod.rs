//! Channel sources
//!
//! A channel source binds one dataset sub-directory to an ordered list of
//! band indices. Decoding produces the full pixel buffer of a tile;
//! [`ChannelSource::select_bands`] then extracts the configured bands in
//! declared order as a band-major stack.
//!
//! Band indices are 1-based, matching how they appear in pipeline
//! configuration (`bands = [1, 2, 3]`). Emptiness and zero indices are
//! rejected at construction; the upper bound can only be checked against a
//! decoded tile, so it is validated lazily at selection time.

use crate::tile::TileAddress;
use image::{DynamicImage, ImageReader, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions probed before falling back to a directory scan.
const COMMON_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "tif", "tiff"];

/// Errors raised while decoding channel tiles.
///
/// Clonable so a cached decode failure can be handed to every caller that
/// coalesced onto the same in-flight decode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// A channel source must select at least one band
    #[error("Channel '{sub}' configures no bands")]
    EmptyBands { sub: String },

    /// Band indices are 1-based; zero never addresses a band
    #[error("Channel '{sub}' configures band 0; band indices start at 1")]
    InvalidBandIndex { sub: String },

    /// No tile file exists at the address under this source
    #[error("Tile {address} not found under '{sub}'")]
    TileNotFound { sub: String, address: TileAddress },

    /// The tile file exists but its bytes are not a decodable image
    #[error("Failed to decode tile {address} under '{sub}': {message}")]
    Decode {
        sub: String,
        address: TileAddress,
        message: String,
    },

    /// A configured band index exceeds the tile's band count
    #[error(
        "Band {band} configured for '{sub}' but tile {address} has {available} band(s)"
    )]
    BandOutOfRange {
        sub: String,
        address: TileAddress,
        band: u32,
        available: u32,
    },
}

/// Fully decoded tile pixel buffer.
///
/// `data` is pixel-interleaved exactly as decoded (`bands` samples per
/// pixel, row-major). This is the unit the tile cache stores, so two channel
/// blocks over the same sub-directory share one decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    /// Number of bands available in the tile
    pub bands: u32,
    /// Height in pixels
    pub height: u32,
    /// Width in pixels
    pub width: u32,
    /// Pixel-interleaved samples, `bands * height * width` bytes
    pub data: Vec<u8>,
}

impl DecodedTile {
    /// Size of the pixel buffer in bytes, used for cache accounting.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Reinterprets the first three bands as an RGB image.
    ///
    /// Returns `None` when the tile has fewer than three bands. Used for
    /// label tiles, whose palette colors are RGB triples.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if self.bands < 3 {
            return None;
        }
        if self.bands == 3 {
            return RgbImage::from_raw(self.width, self.height, self.data.clone());
        }

        let c = self.bands as usize;
        let pixels = self.height as usize * self.width as usize;
        let mut rgb = Vec::with_capacity(pixels * 3);
        for i in 0..pixels {
            rgb.extend_from_slice(&self.data[i * c..i * c + 3]);
        }
        RgbImage::from_raw(self.width, self.height, rgb)
    }
}

/// Decodes the tile at `address` under `root/sub` into its full pixel buffer.
///
/// The file may carry any decodable raster extension: the common ones are
/// probed first, then the `z/x/` directory is scanned for a matching stem.
/// Format detection goes by file content, not extension.
///
/// # Errors
///
/// `TileNotFound` when no file exists for the address, `Decode` when the
/// bytes are not a valid image.
pub fn decode_tile(
    root: &Path,
    sub: &str,
    address: TileAddress,
) -> Result<DecodedTile, ChannelError> {
    let source_root = root.join(sub);
    let path = locate_tile(&source_root, address).ok_or_else(|| ChannelError::TileNotFound {
        sub: sub.to_string(),
        address,
    })?;

    let decode_err = |message: String| ChannelError::Decode {
        sub: sub.to_string(),
        address,
        message,
    };

    let image = ImageReader::open(&path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))?;

    Ok(flatten(image))
}

/// Collapses a decoded image into a `DecodedTile`, preserving band count.
///
/// High-bit-depth variants are narrowed to 8 bits per sample; the pipeline's
/// tensor contract is u8 throughout.
fn flatten(image: DynamicImage) -> DecodedTile {
    let (height, width) = (image.height(), image.width());
    let (bands, data) = match image {
        DynamicImage::ImageLuma8(buf) => (1, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (2, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => (3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => (4, buf.into_raw()),
        other => match other.color().channel_count() {
            1 => (1, other.to_luma8().into_raw()),
            2 => (2, other.to_luma_alpha8().into_raw()),
            3 => (3, other.to_rgb8().into_raw()),
            _ => (4, other.to_rgba8().into_raw()),
        },
    };

    DecodedTile {
        bands,
        height,
        width,
        data,
    }
}

/// Finds the tile file for `address` under a source root, any extension.
fn locate_tile(source_root: &Path, address: TileAddress) -> Option<PathBuf> {
    for ext in COMMON_EXTENSIONS {
        let candidate = address.to_path(source_root, ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    // Uncommon extension: scan the x directory for a matching stem
    let dir = source_root
        .join(address.zoom.to_string())
        .join(address.x.to_string());
    let stem = address.y.to_string();

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file()
            && path.extension().is_some()
            && path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str())
        {
            return Some(path);
        }
    }
    None
}

/// One channel block: a dataset sub-directory plus the bands it contributes
/// to the composed tensor, in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSource {
    sub: String,
    bands: Vec<u32>,
}

impl ChannelSource {
    /// Creates a channel source with 1-based band indices.
    ///
    /// # Errors
    ///
    /// `EmptyBands` for an empty band list, `InvalidBandIndex` if any index
    /// is zero. Upper-bound validation happens at [`Self::select_bands`].
    pub fn new(sub: impl Into<String>, bands: Vec<u32>) -> Result<Self, ChannelError> {
        let sub = sub.into();
        if bands.is_empty() {
            return Err(ChannelError::EmptyBands { sub });
        }
        if bands.contains(&0) {
            return Err(ChannelError::InvalidBandIndex { sub });
        }
        Ok(Self { sub, bands })
    }

    /// The dataset sub-directory this source reads from.
    pub fn sub(&self) -> &str {
        &self.sub
    }

    /// Configured band indices, 1-based, in declared order.
    pub fn bands(&self) -> &[u32] {
        &self.bands
    }

    /// Number of bands this source contributes to the composed tensor.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Extracts the configured bands from a decoded tile as a band-major
    /// `(bands, height, width)` buffer.
    ///
    /// # Errors
    ///
    /// `BandOutOfRange` if any configured index exceeds the tile's band
    /// count; heterogeneous pyramids surface this per tile, not per dataset.
    pub fn select_bands(
        &self,
        tile: &DecodedTile,
        address: TileAddress,
    ) -> Result<BandStack, ChannelError> {
        let pixels = tile.height as usize * tile.width as usize;
        let stride = tile.bands as usize;
        let mut data = Vec::with_capacity(self.bands.len() * pixels);

        for &band in &self.bands {
            if band > tile.bands {
                return Err(ChannelError::BandOutOfRange {
                    sub: self.sub.clone(),
                    address,
                    band,
                    available: tile.bands,
                });
            }
            let offset = (band - 1) as usize;
            data.extend((0..pixels).map(|i| tile.data[i * stride + offset]));
        }

        Ok(BandStack {
            bands: self.bands.len() as u32,
            height: tile.height,
            width: tile.width,
            data,
        })
    }

    /// Decodes the tile at `address` and selects this source's bands.
    ///
    /// Uncached convenience path; the compositor goes through the tile cache
    /// instead so co-located channel blocks share one decode.
    pub fn decode_bands(
        &self,
        root: &Path,
        address: TileAddress,
    ) -> Result<BandStack, ChannelError> {
        let tile = decode_tile(root, &self.sub, address)?;
        self.select_bands(&tile, address)
    }
}

/// Band-major pixel buffer selected from one channel source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandStack {
    /// Number of selected bands
    pub bands: u32,
    /// Height in pixels
    pub height: u32,
    /// Width in pixels
    pub width: u32,
    /// Band-major samples, `bands * height * width` bytes
    pub data: Vec<u8>,
}
