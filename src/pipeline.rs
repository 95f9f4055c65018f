//! Drives one rank's shard from manifest to latent files.
//!
//! ```text
//! Init ─► Loaded ─► [barrier "start"] ─► Encoding ─► Draining ─► [barrier "finish"] ─► Done
//! ```
//!
//! After `"finish"` the rank clears its rendezvous markers. An aborted run
//! keeps them, and the next launch with the same run id refuses to start.
//!
//! Loading runs ahead on blocking workers, encoding happens one item at a
//! time on the driver task, and writes overlap with both.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dataset::{Dataset, EncodeItem, LoaderConfig, spawn_loader};
use crate::dist::ProcessGroup;
use crate::encode::{EncodeOrchestrator, VideoEncoder};
use crate::persist::{AsyncPersistor, LatentWriter, PendingWrite};

/// Consecutive encode failures after which the device is assumed gone.
const MAX_CONSECUTIVE_ENCODE_FAILURES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Loaded,
    Encoding,
    Draining,
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub shard_entries: usize,
    pub encoded: usize,
    /// Entries that produced no clip (missing, undecodable, empty or invalid).
    pub dropped: usize,
    pub encode_failed: usize,
    pub written: usize,
    pub write_failed: Vec<(PathBuf, String)>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries: {} encoded, {} dropped, {} encode failures, {} written, {} write failures",
            self.shard_entries,
            self.encoded,
            self.dropped,
            self.encode_failed,
            self.written,
            self.write_failed.len()
        )
    }
}

pub struct PipelineDriver<D, W> {
    state: PipelineState,
    group: ProcessGroup,
    dataset: Arc<D>,
    loader: LoaderConfig,
    persistor: AsyncPersistor<W>,
}

impl<D, W> PipelineDriver<D, W>
where
    D: Dataset<Item = EncodeItem>,
    W: LatentWriter,
{
    pub fn new(
        group: ProcessGroup,
        dataset: Arc<D>,
        loader: LoaderConfig,
        persistor: AsyncPersistor<W>,
    ) -> Self {
        Self {
            state: PipelineState::Init,
            group,
            dataset,
            loader,
            persistor,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        log::info!(
            "rank {}: pipeline {:?} -> {:?}",
            self.group.rank(),
            self.state,
            next
        );
        self.state = next;
    }

    /// Runs the shard to completion. Must be called on a multi-threaded
    /// runtime: encoding blocks the driver task in place.
    pub async fn run<E: VideoEncoder>(
        mut self,
        mut orchestrator: EncodeOrchestrator<E>,
    ) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary {
            shard_entries: self.dataset.len(),
            ..Default::default()
        };

        let (mut batches, loader) = spawn_loader(self.dataset.clone(), self.loader);
        self.transition(PipelineState::Loaded);

        self.group.barrier("start").await?;
        self.transition(PipelineState::Encoding);

        let mut pending: Vec<PendingWrite> = Vec::new();
        let mut seen = 0;
        let mut consecutive_failures = 0;
        let mut batch_index = 0;
        let mut fatal = None;
        'batches: while let Some(batch) = batches.recv().await {
            seen += batch.stats.requested;
            summary.dropped += batch.stats.dropped();

            for item in batch.items {
                let result = tokio::task::block_in_place(|| orchestrator.encode_item(&item));
                match result {
                    Ok(latent) => {
                        consecutive_failures = 0;
                        summary.encoded += 1;
                        pending.push(self.persistor.submit(latent, item.output_path));
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        summary.encode_failed += 1;
                        log::warn!("encoding {} failed: {:#}", item.source_path.display(), e);
                        if consecutive_failures >= MAX_CONSECUTIVE_ENCODE_FAILURES {
                            fatal = Some(anyhow::anyhow!(
                                "{} encodes failed in a row, last: {:#}",
                                consecutive_failures,
                                e
                            ));
                            break 'batches;
                        }
                    }
                }
            }

            log::info!(
                "rank {}: batch {} done, {}/{} entries ({} encoded, {} dropped)",
                self.group.rank(),
                batch_index,
                seen,
                summary.shard_entries,
                summary.encoded,
                summary.dropped
            );
            batch_index += 1;
        }
        drop(batches);
        if let Err(e) = loader.await {
            log::warn!("loader task ended abnormally: {}", e);
        }

        self.transition(PipelineState::Draining);
        let report = self.persistor.drain(pending).await;
        summary.written = report.written;
        summary.write_failed = report.failed;
        if let Some(e) = fatal {
            log::error!("rank {}: aborting after {}", self.group.rank(), summary);
            return Err(e);
        }

        self.group.barrier("finish").await?;
        self.group.leave().await?;
        self.transition(PipelineState::Done);
        log::info!("rank {}: {}", self.group.rank(), summary);
        Ok(summary)
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
