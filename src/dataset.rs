//! Per-item dataset reads on blocking threads, grouped into encode-ready
//! batches behind a bounded channel.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use ndarray::{Array5, Axis};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use video_frames::{FrameSize, SampleRequest};

use crate::manifest::ShardedManifest;

/// Random access over work items. `produce` returns `None` for items that
/// yield no data; it runs on a blocking thread.
pub trait Dataset: Send + Sync + 'static {
    type Item: Send + 'static;

    fn len(&self) -> usize;

    fn produce(&self, index: usize) -> Option<Self::Item>;

    /// Human-readable name of item `index`, for logs.
    fn describe(&self, index: usize) -> String {
        format!("item #{}", index)
    }
}

/// One clip ready for the encoder.
#[derive(Debug, Clone)]
pub struct EncodeItem {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    /// `(1, 3, T, H, W)` in `[-1, 1]`.
    pub input: Array5<f32>,
}

pub struct VideoDataset {
    shard: ShardedManifest,
    frame_budget: usize,
    resize: Option<FrameSize>,
}

impl VideoDataset {
    pub fn new(shard: ShardedManifest, frame_budget: usize, resize: Option<FrameSize>) -> Self {
        Self {
            shard,
            frame_budget,
            resize,
        }
    }
}

impl Dataset for VideoDataset {
    type Item = EncodeItem;

    fn len(&self) -> usize {
        self.shard.len()
    }

    fn describe(&self, index: usize) -> String {
        match self.shard.get(index) {
            Some(entry) => entry.source_path.display().to_string(),
            None => format!("item #{}", index),
        }
    }

    fn produce(&self, index: usize) -> Option<EncodeItem> {
        let entry = self.shard.get(index)?;
        if let Err(e) = entry.validate() {
            log::warn!(
                "skipping manifest entry {} ({}): {}",
                self.shard.global_index(index).unwrap_or(index),
                entry.source_path.display(),
                e
            );
            return None;
        }

        let default_indices;
        let indices = match &entry.frame_indices {
            Some(frames) => frames.as_slice(),
            None => {
                default_indices = (0..self.frame_budget).collect::<Vec<_>>();
                default_indices.as_slice()
            }
        };
        let request = SampleRequest {
            indices,
            max_frames: self.frame_budget,
            resize: self.resize,
        };
        let frames = video_frames::sample_frames(&entry.source_path, &request)?;

        Some(EncodeItem {
            source_path: entry.source_path.clone(),
            output_path: entry.output_path.clone(),
            input: frames.insert_axis(Axis(0)),
        })
    }
}

/// Outcome of producing one item on a worker.
pub struct Produced<T> {
    pub index: usize,
    pub label: String,
    pub result: anyhow::Result<Option<T>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub requested: usize,
    pub produced: usize,
    /// Items that yielded no data.
    pub empty: usize,
    /// Items whose worker failed.
    pub failed: usize,
}

impl BatchStats {
    pub fn dropped(&self) -> usize {
        self.empty + self.failed
    }
}

#[derive(Debug)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub stats: BatchStats,
}

/// Flattens one batch of outcomes, dropping empty and failed items.
pub fn assemble<T>(outcomes: Vec<Produced<T>>) -> Batch<T> {
    let mut stats = BatchStats {
        requested: outcomes.len(),
        ..Default::default()
    };
    let mut items = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome.result {
            Ok(Some(item)) => {
                stats.produced += 1;
                items.push(item);
            }
            Ok(None) => {
                log::warn!("dropping {} (#{}): no frames", outcome.label, outcome.index);
                stats.empty += 1;
            }
            Err(e) => {
                log::warn!("dropping {} (#{}): {:#}", outcome.label, outcome.index, e);
                stats.failed += 1;
            }
        }
    }
    Batch { items, stats }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub num_workers: usize,
    pub prefetch_batches: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            num_workers: 6,
            prefetch_batches: 2,
        }
    }
}

/// Streams `dataset` in order as batches. At most `num_workers` items are
/// produced at once and at most `prefetch_batches` finished batches wait in
/// the channel.
pub fn spawn_loader<D: Dataset>(
    dataset: Arc<D>,
    config: LoaderConfig,
) -> (mpsc::Receiver<Batch<D::Item>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.prefetch_batches.max(1));
    let handle = tokio::spawn(async move {
        let total = dataset.len();
        let mut batches = futures::stream::iter(0..total)
            .map(|index| {
                let dataset = dataset.clone();
                async move {
                    let label = dataset.describe(index);
                    let result = tokio::task::spawn_blocking(move || dataset.produce(index))
                        .await
                        .map_err(|e| anyhow::anyhow!("worker failed: {}", e));
                    Produced {
                        index,
                        label,
                        result,
                    }
                }
            })
            .buffered(config.num_workers.max(1))
            .chunks(config.batch_size.max(1));

        while let Some(outcomes) = batches.next().await {
            if tx.send(assemble(outcomes)).await.is_err() {
                log::warn!("loader: batch receiver closed, stopping");
                break;
            }
        }
        log::debug!("loader: finished {} items", total);
    });
    (rx, handle)
}
