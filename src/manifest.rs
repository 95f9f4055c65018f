//! JSON-lines manifest loading and striped sharding across ranks.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "video")]
    pub source_path: PathBuf,
    #[serde(rename = "latent")]
    pub output_path: PathBuf,
    #[serde(rename = "frames", default, skip_serializing_if = "Option::is_none")]
    pub frame_indices: Option<Vec<usize>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry has an empty video path")]
    EmptyVideo,
    #[error("entry has an empty latent path")]
    EmptyLatent,
    #[error("entry has an empty frame list")]
    EmptyFrames,
    #[error("frame list is not strictly increasing at position {0}")]
    FramesNotIncreasing(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest {path} line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl ManifestEntry {
    pub fn validate(&self) -> Result<(), EntryError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(EntryError::EmptyVideo);
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(EntryError::EmptyLatent);
        }
        if let Some(frames) = &self.frame_indices {
            if frames.is_empty() {
                return Err(EntryError::EmptyFrames);
            }
            if let Some(position) = frames.windows(2).position(|w| w[0] >= w[1]) {
                return Err(EntryError::FramesNotIncreasing(position + 1));
            }
        }
        Ok(())
    }
}

/// Reads every entry of a JSON-lines manifest in file order. Blank lines are
/// skipped; a malformed line fails the whole load.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, ManifestError> {
    let file = File::open(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            line: number + 1,
            source,
        })?;
        entries.push(entry);
    }

    log::info!("loaded {} videos from {}", entries.len(), path.display());
    Ok(entries)
}

/// Manifest indices owned by `rank`: `rank, rank + world_size, ...`.
pub fn shard_indices(total: usize, world_size: usize, rank: usize) -> Vec<usize> {
    if world_size == 0 || rank >= world_size {
        return Vec::new();
    }
    (rank..total).step_by(world_size).collect()
}

/// The local slice of a manifest, in manifest order.
#[derive(Debug, Clone)]
pub struct ShardedManifest {
    entries: Vec<ManifestEntry>,
    global_indices: Vec<usize>,
    total: usize,
}

impl ShardedManifest {
    pub fn new(entries: Vec<ManifestEntry>, world_size: usize, rank: usize) -> anyhow::Result<Self> {
        if world_size == 0 {
            anyhow::bail!("world size must be at least 1");
        }
        if rank >= world_size {
            anyhow::bail!("rank {} out of range for world size {}", rank, world_size);
        }

        let total = entries.len();
        let global_indices = shard_indices(total, world_size, rank);
        let entries = entries
            .into_iter()
            .skip(rank)
            .step_by(world_size)
            .collect::<Vec<_>>();
        log::info!(
            "rank {}/{}: {} of {} manifest entries",
            rank,
            world_size,
            entries.len(),
            total
        );

        Ok(Self {
            entries,
            global_indices,
            total,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the full manifest before sharding.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn get(&self, index: usize) -> Option<&ManifestEntry> {
        self.entries.get(index)
    }

    /// Position of local entry `index` in the full manifest.
    pub fn global_index(&self, index: usize) -> Option<usize> {
        self.global_indices.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Write;

    use super::*;

    fn entry(i: usize) -> ManifestEntry {
        ManifestEntry {
            source_path: PathBuf::from(format!("v{i}.mp4")),
            output_path: PathBuf::from(format!("l{i}.safetensors")),
            frame_indices: None,
        }
    }

    #[test]
    fn test_shards_cover_manifest_exactly_once() {
        for total in [0usize, 1, 7, 100, 101] {
            for world_size in 1..=8 {
                let mut seen = HashSet::new();
                let mut count = 0;
                for rank in 0..world_size {
                    for i in shard_indices(total, world_size, rank) {
                        assert_eq!(i % world_size, rank);
                        seen.insert(i);
                        count += 1;
                    }
                }
                assert_eq!(count, total, "total={total} world={world_size}");
                assert_eq!(seen.len(), total);
            }
        }
    }

    #[test]
    fn test_shard_is_striped_in_order() {
        assert_eq!(shard_indices(10, 3, 1), vec![1, 4, 7]);
        assert_eq!(shard_indices(2, 4, 3), Vec::<usize>::new());
        assert_eq!(shard_indices(5, 0, 0), Vec::<usize>::new());
    }

    #[test]
    fn test_sharded_manifest_local_view() {
        let entries = (0..7).map(entry).collect::<Vec<_>>();
        let shard = ShardedManifest::new(entries, 3, 2).unwrap();
        assert_eq!(shard.len(), 2);
        assert_eq!(shard.total(), 7);
        assert_eq!(shard.get(0).unwrap().source_path, PathBuf::from("v2.mp4"));
        assert_eq!(shard.get(1).unwrap().source_path, PathBuf::from("v5.mp4"));
        assert_eq!(shard.global_index(1), Some(5));
        assert!(shard.get(2).is_none());
    }

    #[test]
    fn test_sharded_manifest_rejects_bad_group() {
        assert!(ShardedManifest::new(vec![entry(0)], 0, 0).is_err());
        assert!(ShardedManifest::new(vec![entry(0)], 2, 2).is_err());
    }

    #[test]
    fn test_load_manifest_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"video": "a.mp4", "latent": "a.safetensors"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"video": "b.mp4", "latent": "b.safetensors", "frames": [0, 2, 4], "text": "ignored"}}"#
        )
        .unwrap();

        let entries = load_manifest(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].frame_indices, None);
        assert_eq!(entries[1].frame_indices, Some(vec![0, 2, 4]));
    }

    #[test]
    fn test_load_manifest_reports_line_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"video": "a.mp4", "latent": "a.safetensors"}}"#).unwrap();
        writeln!(file, r#"{{"video": "b.mp4""#).unwrap();

        match load_manifest(file.path()) {
            Err(ManifestError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_manifest_missing_file() {
        let result = load_manifest(Path::new("/nonexistent/manifest.jsonl"));
        assert!(matches!(result, Err(ManifestError::Io { .. })));
    }

    #[test]
    fn test_entry_validation() {
        assert_eq!(entry(0).validate(), Ok(()));

        let mut bad = entry(0);
        bad.source_path = PathBuf::new();
        assert_eq!(bad.validate(), Err(EntryError::EmptyVideo));

        let mut bad = entry(0);
        bad.output_path = PathBuf::new();
        assert_eq!(bad.validate(), Err(EntryError::EmptyLatent));

        let mut bad = entry(0);
        bad.frame_indices = Some(vec![]);
        assert_eq!(bad.validate(), Err(EntryError::EmptyFrames));

        let mut bad = entry(0);
        bad.frame_indices = Some(vec![0, 3, 3, 5]);
        assert_eq!(bad.validate(), Err(EntryError::FramesNotIncreasing(2)));
    }
}
