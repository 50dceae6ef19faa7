//! Slippyset - dataset composition for slippy-map tile pyramids
//!
//! This library assembles pixel-classification training datasets from
//! directories of map tiles laid out as `zoom/x/y.ext` pyramids. Several
//! pyramids (RGB imagery, elevation, auxiliary rasters) are joined on
//! tile address, selected bands are stacked into one multi-band tensor
//! per tile, and color-coded label tiles are translated to class-index
//! masks.
//!
//! # High-Level API
//!
//! Build a manifest over the pyramids that interest you, then hand its
//! compositor and a sequence to a loader:
//!
//! ```ignore
//! use slippyset::cache::TileCache;
//! use slippyset::channel::ChannelSource;
//! use slippyset::dataset::{DatasetManifest, IterOrder};
//! use slippyset::loader::{DatasetLoader, LoaderConfig};
//! use std::sync::Arc;
//!
//! let manifest = DatasetManifest::build(
//!     "/data/training",
//!     vec![ChannelSource::new("images", vec![1, 2, 3])?],
//!     Some("labels".to_string()),
//! )?;
//!
//! let compositor = Arc::new(manifest.compositor(Some(palette), Arc::new(TileCache::default())));
//! let loader = DatasetLoader::spawn(
//!     compositor,
//!     manifest.sequence(IterOrder::Shuffled { seed: 42 }),
//!     LoaderConfig::default(),
//! );
//! for sample in loader {
//!     // train on sample.image / sample.mask
//! }
//! ```

pub mod cache;
pub mod channel;
pub mod compose;
pub mod config;
pub mod dataset;
pub mod index;
pub mod loader;
pub mod logging;
pub mod palette;
pub mod tile;

/// Version of the slippyset library and CLI.
///
/// Synchronized across the workspace via `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
