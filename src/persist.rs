//! Off-thread latent persistence with a bounded number of concurrent writes.
//!
//! `submit` hands back a [`PendingWrite`] immediately; `drain` joins them in
//! completion order. A failed write is reported, never raised.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use safetensors::Dtype;
use safetensors::tensor::TensorView;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::encode::{Latent, LatentData};

/// Name of the single tensor in every output file.
pub const LATENT_TENSOR: &str = "latent";

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("output directory {0} does not exist")]
    MissingParent(PathBuf),
    #[error("serialize latent for {path}: {message}")]
    Serialize { path: PathBuf, message: String },
    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write task for {path} did not finish: {message}")]
    Task { path: PathBuf, message: String },
}

pub trait LatentWriter: Send + Sync + 'static {
    fn write(&self, latent: &Latent, path: &Path) -> Result<(), WriteError>;
}

/// Writes one safetensors file per latent, holding a single tensor named
/// [`LATENT_TENSOR`]. Never creates directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsWriter;

fn dtype(data: &LatentData) -> Dtype {
    match data {
        LatentData::F32(_) => Dtype::F32,
        LatentData::F16(_) => Dtype::F16,
        LatentData::BF16(_) => Dtype::BF16,
    }
}

impl LatentWriter for SafetensorsWriter {
    fn write(&self, latent: &Latent, path: &Path) -> Result<(), WriteError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(WriteError::MissingParent(parent.to_path_buf()));
            }
        }

        let bytes = latent.to_le_bytes();
        let serialize_error = |e: safetensors::SafeTensorError| WriteError::Serialize {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let view = TensorView::new(dtype(&latent.data), latent.shape.clone(), &bytes)
            .map_err(serialize_error)?;
        let buffer =
            safetensors::serialize([(LATENT_TENSOR, view)], &None).map_err(serialize_error)?;

        // a crash mid-write must not leave a file that looks finished
        let partial = partial_path(path);
        let result = std::fs::write(&partial, buffer)
            .map_err(|source| WriteError::Io {
                path: partial.clone(),
                source,
            })
            .and_then(|()| {
                std::fs::rename(&partial, path).map_err(|source| WriteError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            });
        if result.is_err() {
            if let Err(e) = std::fs::remove_file(&partial) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {}", partial.display(), e);
                }
            }
        }
        result
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

#[derive(Debug)]
pub enum WriteOutcome {
    Written(PathBuf),
    Failed { path: PathBuf, error: WriteError },
}

/// A submitted write that has not been joined yet.
pub struct PendingWrite {
    path: PathBuf,
    handle: JoinHandle<WriteOutcome>,
}

impl PendingWrite {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Default)]
pub struct DrainReport {
    pub written: usize,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct AsyncPersistor<W> {
    writer: Arc<W>,
    permits: Arc<Semaphore>,
}

impl<W: LatentWriter> AsyncPersistor<W> {
    pub fn new(writer: W, max_writers: usize) -> Self {
        Self {
            writer: Arc::new(writer),
            permits: Arc::new(Semaphore::new(max_writers.max(1))),
        }
    }

    /// Queues `latent` for writing to `path`. Returns without waiting for a
    /// writer slot.
    pub fn submit(&self, latent: Latent, path: PathBuf) -> PendingWrite {
        let writer = self.writer.clone();
        let permits = self.permits.clone();
        let task_path = path.clone();

        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return WriteOutcome::Failed {
                        error: WriteError::Task {
                            path: task_path.clone(),
                            message: e.to_string(),
                        },
                        path: task_path,
                    };
                }
            };

            let write_path = task_path.clone();
            match tokio::task::spawn_blocking(move || writer.write(&latent, &write_path)).await {
                Ok(Ok(())) => WriteOutcome::Written(task_path),
                Ok(Err(error)) => WriteOutcome::Failed {
                    path: task_path,
                    error,
                },
                Err(e) => WriteOutcome::Failed {
                    error: WriteError::Task {
                        path: task_path.clone(),
                        message: e.to_string(),
                    },
                    path: task_path,
                },
            }
        });

        PendingWrite { path, handle }
    }

    /// Waits for every pending write and tallies the results.
    pub async fn drain(&self, pending: Vec<PendingWrite>) -> DrainReport {
        let total = pending.len();
        let mut in_flight = pending
            .into_iter()
            .map(|p| async move { (p.path, p.handle.await) })
            .collect::<FuturesUnordered<_>>();

        let mut report = DrainReport::default();
        while let Some((path, joined)) = in_flight.next().await {
            match joined {
                Ok(WriteOutcome::Written(path)) => {
                    log::debug!("saved {}", path.display());
                    report.written += 1;
                }
                Ok(WriteOutcome::Failed { path, error }) => {
                    log::warn!("saving {} failed: {}", path.display(), error);
                    report.failed.push((path, error.to_string()));
                }
                Err(e) => {
                    log::warn!("saving {} failed: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        log::info!(
            "drained {} writes: {} written, {} failed",
            total,
            report.written,
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
#[path = "persist_test.rs"]
mod persist_test;
