//! Rank bookkeeping and a named cross-process barrier.
//!
//! Processes never share memory. The barrier is a rendezvous through marker
//! files in a directory every rank can see. Markers are removed again as the
//! ranks move on, so a clean run leaves the directory as it found it and the
//! next launch with the same run id waits for its own ranks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

const BARRIER_POLL: Duration = Duration::from_millis(200);

/// Internal barrier used by [`ProcessGroup::leave`] when the run passed only
/// one named barrier.
const LEAVE_BARRIER: &str = "leave";

#[derive(Debug, Clone)]
pub struct ProcessGroup {
    rank: usize,
    world_size: usize,
    rendezvous: Option<PathBuf>,
    run_id: String,
    /// Barriers this rank has passed, oldest first.
    passed: Arc<Mutex<Vec<String>>>,
}

impl ProcessGroup {
    /// A group of one; barriers return immediately.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            rendezvous: None,
            run_id: "default".to_string(),
            passed: Arc::default(),
        }
    }

    pub fn new(
        rank: usize,
        world_size: usize,
        rendezvous: Option<PathBuf>,
        run_id: &str,
    ) -> anyhow::Result<Self> {
        if world_size == 0 {
            anyhow::bail!("world size must be at least 1");
        }
        if rank >= world_size {
            anyhow::bail!("rank {} out of range for world size {}", rank, world_size);
        }
        if world_size > 1 && rendezvous.is_none() {
            anyhow::bail!("a rendezvous directory is required when world size is {}", world_size);
        }
        if run_id.is_empty() || run_id.contains(std::path::is_separator) {
            anyhow::bail!("invalid run id {:?}", run_id);
        }
        Ok(Self {
            rank,
            world_size,
            rendezvous,
            run_id: run_id.to_string(),
            passed: Arc::default(),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    fn rendezvous_dir(&self) -> Option<&Path> {
        if self.world_size == 1 {
            return None;
        }
        self.rendezvous.as_deref()
    }

    fn marker(&self, dir: &Path, name: &str, rank: usize) -> PathBuf {
        dir.join(format!("{}.{}.{}", self.run_id, name, rank))
    }

    /// Polls until the marker of `name` is present (`present == true`) or
    /// gone for every rank.
    async fn wait_for_markers(&self, dir: &Path, name: &str, present: bool) -> anyhow::Result<()> {
        let mut waiting = (0..self.world_size).collect::<Vec<_>>();
        loop {
            let mut still_waiting = Vec::with_capacity(waiting.len());
            for rank in waiting {
                let marker = self.marker(dir, name, rank);
                let exists = tokio::fs::try_exists(&marker).await.map_err(|e| {
                    anyhow::anyhow!("barrier {}: check {}: {}", name, marker.display(), e)
                })?;
                if exists != present {
                    still_waiting.push(rank);
                }
            }
            if still_waiting.is_empty() {
                return Ok(());
            }
            waiting = still_waiting;
            tokio::time::sleep(BARRIER_POLL).await;
        }
    }

    async fn remove_marker(&self, dir: &Path, name: &str) -> anyhow::Result<()> {
        let own = self.marker(dir, name, self.rank);
        tokio::fs::remove_file(&own)
            .await
            .map_err(|e| anyhow::anyhow!("barrier {}: remove {}: {}", name, own.display(), e))
    }

    /// Blocks until every rank has reached the barrier called `name`.
    ///
    /// Each name can be used once per run. A marker of this rank that is
    /// already on disk belongs to a run that did not shut down cleanly and is
    /// an error rather than a free pass.
    pub async fn barrier(&self, name: &str) -> anyhow::Result<()> {
        let Some(dir) = self.rendezvous_dir() else {
            return Ok(());
        };
        let previous = {
            let passed = self.passed.lock().await;
            if passed.iter().any(|n| n == name) {
                anyhow::bail!("barrier {} was already passed in run {}", name, self.run_id);
            }
            passed.last().cloned()
        };

        let own = self.marker(dir, name, self.rank);
        let stale = tokio::fs::try_exists(&own)
            .await
            .map_err(|e| anyhow::anyhow!("barrier {}: check {}: {}", name, own.display(), e))?;
        if stale {
            anyhow::bail!(
                "barrier {}: stale marker {} from an earlier run; remove it or use another run id",
                name,
                own.display()
            );
        }
        tokio::fs::write(&own, self.rank.to_string())
            .await
            .map_err(|e| anyhow::anyhow!("barrier {}: write {}: {}", name, own.display(), e))?;
        log::info!(
            "rank {} waiting at barrier {} ({} ranks)",
            self.rank,
            name,
            self.world_size
        );

        self.wait_for_markers(dir, name, true).await?;

        // every rank is past the previous barrier once all of them are here
        if let Some(previous) = previous {
            self.remove_marker(dir, &previous).await?;
        }
        self.passed.lock().await.push(name.to_string());
        log::info!("rank {} passed barrier {}", self.rank, name);
        Ok(())
    }

    /// Removes this rank's remaining markers once no other rank can still be
    /// waiting on them. Call after the last barrier of a run.
    pub async fn leave(&self) -> anyhow::Result<()> {
        let Some(dir) = self.rendezvous_dir() else {
            return Ok(());
        };
        let passed = self.passed.lock().await.len();
        match passed {
            0 => return Ok(()),
            1 => self.barrier(LEAVE_BARRIER).await?,
            _ => {}
        }

        let (previous, last) = {
            let passed = self.passed.lock().await;
            match passed.as_slice() {
                [.., previous, last] => (previous.clone(), last.clone()),
                _ => anyhow::bail!("leave needs two passed barriers"),
            }
        };
        // a rank drops its `previous` marker only after passing `last`
        self.wait_for_markers(dir, &previous, false).await?;
        self.remove_marker(dir, &last).await?;
        log::debug!("rank {} left run {}", self.rank, self.run_id);
        Ok(())
    }
}
