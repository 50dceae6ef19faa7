//! Multi-worker dataset loading
//!
//! Drives a pool of worker threads over an iteration sequence, composing
//! tensors and masks in parallel and yielding them through a bounded queue.
//! The bound is the backpressure: when the consumer falls behind, workers
//! block on the queue instead of piling decoded tiles into memory.
//!
//! Failed tiles are yielded as errors, not dropped; whether to skip or
//! abort is the training loop's decision. A stop signal lets workers finish
//! their current tile and produce no further work, leaving the cache and
//! manifest untouched for a restart.

use crate::compose::{ComposeError, ComposedTensor, TensorCompositor};
use crate::dataset::TileSequence;
use crate::palette::ClassMask;
use crate::tile::TileAddress;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Worker-pool configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of worker threads (default: available parallelism)
    pub workers: usize,
    /// Bounded queue depth between workers and the consumer (default: 32)
    pub queue_depth: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_depth: 32,
        }
    }
}

impl LoaderConfig {
    /// Sets the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the bounded queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}

/// One composed training/inference sample.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Address the sample was composed from
    pub address: TileAddress,
    /// Composed multi-band input tensor
    pub image: ComposedTensor,
    /// Class mask, present when the compositor has a label source
    pub mask: Option<ClassMask>,
}

/// Snapshot of loader counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Samples composed successfully
    pub produced: u64,
    /// Tiles that failed composition and were yielded as errors
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    produced: AtomicU64,
    failed: AtomicU64,
}

/// Iteration handle over a worker pool composing tiles in parallel.
///
/// Yields one `Result` per tile in the sequence (completion order, not
/// sequence order). Dropping the handle stops the pool: workers finish
/// their current tile, fail their next send, and exit.
pub struct DatasetLoader {
    receiver: Option<Receiver<Result<Sample, ComposeError>>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl DatasetLoader {
    /// Spawns the worker pool over a compositor and an address sequence.
    ///
    /// The compositor is shared read-only; the tile cache inside it is the
    /// only mutable state the workers touch.
    pub fn spawn(
        compositor: Arc<TensorCompositor>,
        sequence: TileSequence,
        config: LoaderConfig,
    ) -> Self {
        let addresses = Arc::new(sequence.into_addresses());
        let cursor = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let (sender, receiver) = mpsc::sync_channel(config.queue_depth.max(1));

        debug!(
            workers = config.workers.max(1),
            queue_depth = config.queue_depth.max(1),
            tiles = addresses.len(),
            "Starting dataset loader"
        );

        let mut handles = Vec::new();
        for i in 0..config.workers.max(1) {
            let compositor = Arc::clone(&compositor);
            let addresses = Arc::clone(&addresses);
            let cursor = Arc::clone(&cursor);
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&counters);
            let sender = sender.clone();

            let handle = thread::Builder::new()
                .name(format!("compose-worker-{}", i))
                .spawn(move || {
                    Self::worker_loop(compositor, addresses, cursor, stop, counters, sender);
                })
                .expect("Failed to spawn compose worker thread");
            handles.push(handle);
        }

        Self {
            receiver: Some(receiver),
            stop,
            handles,
            counters,
        }
    }

    fn worker_loop(
        compositor: Arc<TensorCompositor>,
        addresses: Arc<Vec<TileAddress>>,
        cursor: Arc<AtomicUsize>,
        stop: Arc<AtomicBool>,
        counters: Arc<Counters>,
        sender: SyncSender<Result<Sample, ComposeError>>,
    ) {
        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }

            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(&address) = addresses.get(index) else {
                break;
            };

            let result = Self::compose_sample(&compositor, address);
            match &result {
                Ok(_) => {
                    counters.produced.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(address = %address, error = %err, "Tile failed composition");
                }
            }

            // Blocks when the queue is full (backpressure); fails when the
            // consumer dropped the handle, which is our stop condition too.
            if sender.send(result).is_err() {
                break;
            }
        }
    }

    fn compose_sample(
        compositor: &TensorCompositor,
        address: TileAddress,
    ) -> Result<Sample, ComposeError> {
        let image = compositor.compose(address)?;
        let mask = if compositor.has_labels() {
            let mask = compositor.compose_label(address)?;
            // A mask that does not align pixel-for-pixel with the tensor
            // must fail here, not train on shifted labels
            if (mask.height, mask.width) != (image.height, image.width) {
                return Err(ComposeError::DimensionMismatch {
                    address,
                    sub: compositor.label_sub().unwrap_or_default().to_string(),
                    expected: (image.height, image.width),
                    actual: (mask.height, mask.width),
                });
            }
            Some(mask)
        } else {
            None
        };
        Ok(Sample {
            address,
            image,
            mask,
        })
    }

    /// Signals the pool to stop. Workers finish the tile they are on and
    /// produce no further work; already-queued samples remain consumable.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Snapshot of the produced/failed counters.
    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            produced: self.counters.produced.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stops the pool, waits for every worker to exit, and returns the
    /// final counters.
    pub fn join(mut self) -> LoaderStats {
        self.shutdown();
        self.stats()
    }

    fn shutdown(&mut self) {
        self.stop();
        // Dropping the receiver unblocks workers waiting on a full queue
        self.receiver.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Iterator for DatasetLoader {
    type Item = Result<Sample, ComposeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for DatasetLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TileCache;
    use crate::channel::ChannelSource;
    use crate::dataset::{DatasetManifest, IterOrder};
    use crate::palette::{named, ClassPalette};
    use crate::tile::TileAddress;
    use image::{Rgb, RgbImage};
    use std::collections::BTreeSet;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_tile(root: &Path, sub: &str, address: TileAddress, shade: u8) {
        let mut image = RgbImage::new(2, 2);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([shade, shade, shade]);
        }
        let path = address.to_path(&root.join(sub), "png");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image.save(path).unwrap();
    }

    fn dataset(dir: &TempDir, tiles: u32) -> DatasetManifest {
        for y in 0..tiles {
            write_tile(
                dir.path(),
                "images",
                TileAddress::new(10, 1, y).unwrap(),
                y as u8,
            );
        }
        DatasetManifest::build(
            dir.path(),
            vec![ChannelSource::new("images", vec![1, 2, 3]).unwrap()],
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_loader_yields_every_tile() {
        let dir = TempDir::new().unwrap();
        let manifest = dataset(&dir, 20);
        let compositor = Arc::new(manifest.compositor(None, Arc::new(TileCache::default())));

        let loader = DatasetLoader::spawn(
            compositor,
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(4).with_queue_depth(4),
        );

        let samples: Vec<_> = loader.collect();
        assert_eq!(samples.len(), 20);

        let addresses: BTreeSet<_> = samples
            .iter()
            .map(|r| r.as_ref().unwrap().address)
            .collect();
        assert_eq!(addresses.len(), 20, "each tile yielded exactly once");
    }

    #[test]
    fn test_loader_yields_failures_for_bad_tiles() {
        let dir = TempDir::new().unwrap();
        let manifest = dataset(&dir, 5);

        // Corrupt one tile after enumeration so composition fails late
        let bad = TileAddress::new(10, 1, 2).unwrap();
        std::fs::write(
            bad.to_path(&dir.path().join("images"), "png"),
            b"truncated",
        )
        .unwrap();

        let compositor = Arc::new(manifest.compositor(None, Arc::new(TileCache::default())));
        let mut loader = DatasetLoader::spawn(
            compositor,
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(2),
        );

        let results: Vec<_> = loader.by_ref().collect();
        assert_eq!(results.len(), 5);

        let failures: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].as_ref().unwrap_err().address(),
            Some(bad),
            "failure carries the offending address"
        );

        let stats = loader.join();
        assert_eq!(stats, LoaderStats {
            produced: 4,
            failed: 1
        });
    }

    #[test]
    fn test_loader_stop_produces_no_further_work() {
        let dir = TempDir::new().unwrap();
        let manifest = dataset(&dir, 200);
        let compositor = Arc::new(manifest.compositor(None, Arc::new(TileCache::default())));

        let mut loader = DatasetLoader::spawn(
            compositor,
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(2).with_queue_depth(2),
        );

        // Consume a handful, then stop
        for _ in 0..5 {
            assert!(loader.next().is_some());
        }
        loader.stop();
        let remaining: Vec<_> = loader.by_ref().collect();

        // In-flight tiles finish; nothing close to the full 200 arrives
        assert!(
            5 + remaining.len() < 200,
            "stop must cut the run short, got {} more",
            remaining.len()
        );
        loader.join();
    }

    #[test]
    fn test_loader_restart_after_stop() {
        let dir = TempDir::new().unwrap();
        let manifest = dataset(&dir, 10);
        let cache = Arc::new(TileCache::default());
        let compositor = Arc::new(manifest.compositor(None, Arc::clone(&cache)));

        let loader = DatasetLoader::spawn(
            Arc::clone(&compositor),
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(2),
        );
        loader.stop();
        loader.join();

        // Cache and manifest stay consistent; a fresh spawn covers the set
        let loader = DatasetLoader::spawn(
            compositor,
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(2),
        );
        let samples: Vec<_> = loader.collect();
        assert_eq!(samples.len(), 10);
        assert!(samples.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_loader_rejects_misaligned_label_mask() {
        let dir = TempDir::new().unwrap();
        let tiles: Vec<_> = (0..4)
            .map(|y| TileAddress::new(10, 1, y).unwrap())
            .collect();

        // Imagery is 2x2 throughout; one label tile is 1x1
        for (i, &address) in tiles.iter().enumerate() {
            write_tile(dir.path(), "images", address, i as u8);
        }
        let bad = tiles[1];
        for &address in &tiles {
            let size = if address == bad { 1 } else { 2 };
            let mut label = RgbImage::new(size, size);
            for pixel in label.pixels_mut() {
                *pixel = Rgb([255, 255, 255]);
            }
            let path = address.to_path(&dir.path().join("labels"), "png");
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            label.save(path).unwrap();
        }

        let manifest = DatasetManifest::build(
            dir.path(),
            vec![ChannelSource::new("images", vec![1, 2, 3]).unwrap()],
            Some("labels".to_string()),
        )
        .unwrap();

        let palette = ClassPalette::new(
            vec!["background".to_string()],
            vec![named::resolve("white").unwrap()],
        )
        .unwrap();
        let compositor = Arc::new(
            manifest.compositor(Some(palette), Arc::new(TileCache::default())),
        );

        let loader = DatasetLoader::spawn(
            compositor,
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(2),
        );
        let results: Vec<_> = loader.collect();
        assert_eq!(results.len(), 4);

        let failures: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
        assert_eq!(failures.len(), 1, "only the misaligned tile fails");
        match failures[0].as_ref().unwrap_err() {
            ComposeError::DimensionMismatch {
                address,
                expected,
                actual,
                ..
            } => {
                assert_eq!(*address, bad);
                assert_eq!(*expected, (2, 2));
                assert_eq!(*actual, (1, 1));
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }

        for result in results.iter().filter(|r| r.is_ok()) {
            let sample = result.as_ref().unwrap();
            let mask = sample.mask.as_ref().unwrap();
            assert_eq!((mask.height, mask.width), (2, 2));
        }
    }

    #[test]
    fn test_loader_single_worker_preserves_sequence_order() {
        let dir = TempDir::new().unwrap();
        let manifest = dataset(&dir, 8);
        let compositor = Arc::new(manifest.compositor(None, Arc::new(TileCache::default())));

        let loader = DatasetLoader::spawn(
            compositor,
            manifest.sequence(IterOrder::Sequential),
            LoaderConfig::default().with_workers(1),
        );

        let addresses: Vec<_> = loader.map(|r| r.unwrap().address).collect();
        assert_eq!(addresses, manifest.addresses());
    }
}
