//! Dataset assembler
//!
//! Builds the immutable manifest of tile addresses usable for training or
//! inference: the intersection of every channel source's pyramid and, when
//! configured, the label pyramid. A tile missing from any source is simply
//! excluded; partial coverage is normal operation for datasets assembled
//! from heterogeneous collection passes, never an error.
//!
//! Per-source discovery counts and the retained count are recorded so that
//! silent data loss stays observable.

use crate::cache::TileCache;
use crate::channel::ChannelSource;
use crate::compose::TensorCompositor;
use crate::index::{self, IndexError};
use crate::palette::ClassPalette;
use crate::tile::TileAddress;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while assembling or partitioning a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// A dataset needs at least one channel source to compose anything
    #[error("Dataset configures no channel sources")]
    NoChannels,

    /// A source pyramid could not be enumerated
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Split ratio must be a fraction of the dataset
    #[error("Split ratio {0} is outside [0, 1]")]
    InvalidRatio(f64),
}

/// Counts recorded while building a manifest.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Tiles discovered per enumerated sub-directory, in enumeration order
    pub discovered: Vec<(String, usize)>,
    /// Tiles retained after cross-source intersection
    pub retained: usize,
}

/// Iteration order over a manifest's addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterOrder {
    /// Structural address order: zoom, then x, then y
    Sequential,
    /// Deterministic permutation; the same seed yields the same order
    Shuffled { seed: u64 },
}

/// Immutable set of tile addresses for which every configured source has a
/// tile, plus the configuration needed to compose them.
///
/// Built once per dataset root; shared read-only across loader workers. A
/// caller that knows tiles were added re-runs [`DatasetManifest::build`].
#[derive(Debug, Clone)]
pub struct DatasetManifest {
    root: PathBuf,
    channels: Vec<ChannelSource>,
    label_sub: Option<String>,
    /// Sorted ascending; ordering is part of the sequential-iteration contract
    addresses: Vec<TileAddress>,
    stats: BuildStats,
}

impl DatasetManifest {
    /// Assembles a manifest by intersecting tile sets across all channel
    /// sources and the label sub-directory when given.
    ///
    /// # Errors
    ///
    /// `NoChannels` for an empty channel list (a configuration-level
    /// failure, fatal before any tile work), or an enumeration error from
    /// any source pyramid.
    pub fn build(
        root: impl Into<PathBuf>,
        channels: Vec<ChannelSource>,
        label_sub: Option<String>,
    ) -> Result<Self, DatasetError> {
        if channels.is_empty() {
            return Err(DatasetError::NoChannels);
        }
        let root = root.into();

        let mut discovered = Vec::new();
        let mut retained: Option<BTreeSet<TileAddress>> = None;
        let mut seen_subs = BTreeSet::new();

        let label_iter = label_sub.as_deref().map(str::to_owned);
        let subs = channels
            .iter()
            .map(|c| c.sub().to_owned())
            .chain(label_iter);

        for sub in subs {
            // Two channel blocks over one sub share a single enumeration
            if !seen_subs.insert(sub.clone()) {
                continue;
            }

            let tiles = index::enumerate(&root.join(&sub))?;
            discovered.push((sub, tiles.len()));

            retained = Some(match retained {
                None => tiles,
                Some(current) => current.intersection(&tiles).copied().collect(),
            });
        }

        let addresses: Vec<TileAddress> =
            retained.unwrap_or_default().into_iter().collect();
        let stats = BuildStats {
            discovered,
            retained: addresses.len(),
        };

        for (sub, count) in &stats.discovered {
            info!(sub = %sub, tiles = count, "Enumerated dataset source");
        }
        info!(
            root = %root.display(),
            retained = stats.retained,
            "Assembled dataset manifest"
        );

        Ok(Self {
            root,
            channels,
            label_sub,
            addresses,
            stats,
        })
    }

    /// Dataset root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Channel sources in declared block order.
    pub fn channels(&self) -> &[ChannelSource] {
        &self.channels
    }

    /// Label sub-directory, when labels are configured.
    pub fn label_sub(&self) -> Option<&str> {
        self.label_sub.as_deref()
    }

    /// Retained addresses in structural order.
    pub fn addresses(&self) -> &[TileAddress] {
        &self.addresses
    }

    /// Number of retained tiles.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True when the intersection is empty.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// True if the manifest retains the address.
    pub fn contains(&self, address: TileAddress) -> bool {
        self.addresses.binary_search(&address).is_ok()
    }

    /// Build-time counts for observability.
    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Creates the finite, restartable iteration sequence for this manifest.
    pub fn sequence(&self, order: IterOrder) -> TileSequence {
        let mut addresses = self.addresses.clone();
        if let IterOrder::Shuffled { seed } = order {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            addresses.shuffle(&mut rng);
        }
        TileSequence {
            addresses,
            cursor: 0,
        }
    }

    /// Deterministically partitions the manifest into disjoint, exhaustive
    /// train/validation manifests.
    ///
    /// The same `(ratio, seed)` always reproduces the identical partition,
    /// which honest evaluation across restarted training depends on.
    ///
    /// # Errors
    ///
    /// `InvalidRatio` unless `0.0 <= ratio <= 1.0`.
    pub fn split(&self, ratio: f64, seed: u64) -> Result<(Self, Self), DatasetError> {
        if !(0.0..=1.0).contains(&ratio) || ratio.is_nan() {
            return Err(DatasetError::InvalidRatio(ratio));
        }

        let mut permuted = self.addresses.clone();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        permuted.shuffle(&mut rng);

        let train_len = ((permuted.len() as f64) * ratio).round() as usize;
        let validation: Vec<TileAddress> = permuted.split_off(train_len);

        Ok((
            self.with_addresses(permuted),
            self.with_addresses(validation),
        ))
    }

    /// Derives a manifest holding a subset of this one's addresses.
    fn with_addresses(&self, mut addresses: Vec<TileAddress>) -> Self {
        addresses.sort_unstable();
        let stats = BuildStats {
            discovered: self.stats.discovered.clone(),
            retained: addresses.len(),
        };
        Self {
            root: self.root.clone(),
            channels: self.channels.clone(),
            label_sub: self.label_sub.clone(),
            addresses,
            stats,
        }
    }

    /// Creates the compositor matching this manifest's configuration.
    ///
    /// `palette` is required for label decoding and ignored when the
    /// manifest has no label sub-directory.
    pub fn compositor(
        &self,
        palette: Option<ClassPalette>,
        cache: Arc<TileCache>,
    ) -> TensorCompositor {
        let mut compositor =
            TensorCompositor::new(self.root.clone(), self.channels.clone(), cache);
        if let (Some(sub), Some(palette)) = (&self.label_sub, palette) {
            compositor = compositor.with_labels(sub.clone(), palette);
        }
        compositor
    }
}

/// Finite, restartable sequence of tile addresses.
///
/// Holds its own (possibly permuted) copy of the manifest's addresses, so
/// iteration carries no hidden state: callers re-run by calling
/// [`TileSequence::reset`] or by asking the manifest for a fresh sequence.
#[derive(Debug, Clone)]
pub struct TileSequence {
    addresses: Vec<TileAddress>,
    cursor: usize,
}

impl TileSequence {
    /// Rewinds to the first address without re-permuting.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Remaining addresses.
    pub fn remaining(&self) -> usize {
        self.addresses.len() - self.cursor
    }

    /// The full address order backing this sequence.
    pub fn as_slice(&self) -> &[TileAddress] {
        &self.addresses
    }

    /// Consumes the sequence into its backing address order.
    pub fn into_addresses(self) -> Vec<TileAddress> {
        self.addresses
    }
}

impl Iterator for TileSequence {
    type Item = TileAddress;

    fn next(&mut self) -> Option<Self::Item> {
        let address = *self.addresses.get(self.cursor)?;
        self.cursor += 1;
        Some(address)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for TileSequence {}
