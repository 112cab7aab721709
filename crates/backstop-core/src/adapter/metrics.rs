//! Time-series store source.
//!
//! The live store is a TSDB data directory: immutable block directories, each
//! with a `meta.json`, plus a write-ahead log and head chunks. Only persisted
//! blocks are captured; the WAL is replayed by the database on startup and is
//! not part of a consistent snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ComponentHealth, ComponentSource};
use crate::archive::copy_dir_all;
use crate::artifact::{ArtifactFacts, Component};

/// Fact key for the total series count across blocks.
pub const FACT_SERIES: &str = "series";
/// Fact key for the number of persisted blocks.
pub const FACT_BLOCKS: &str = "blocks";

const BLOCK_META: &str = "meta.json";
const VOLATILE_DIRS: [&str; 2] = ["wal", "chunks_head"];

#[derive(Debug, Deserialize)]
struct BlockMeta {
    #[serde(default)]
    ulid: String,
    stats: BlockStats,
}

#[derive(Debug, Deserialize)]
struct BlockStats {
    #[serde(rename = "numSeries", default)]
    num_series: u64,
}

/// TSDB data directory.
#[derive(Debug, Clone)]
pub struct MetricsSource {
    data_dir: PathBuf,
}

impl MetricsSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

fn read_block_meta(block: &Path) -> Result<BlockMeta, String> {
    let raw = fs::read(block.join(BLOCK_META))
        .map_err(|e| format!("block {} has no readable meta.json: {e}", block.display()))?;
    serde_json::from_slice(&raw)
        .map_err(|e| format!("block {} meta.json is malformed: {e}", block.display()))
}

/// Block directories under `root`, skipping WAL and head chunks.
fn block_dirs(root: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = fs::read_dir(root).map_err(|e| format!("cannot read {}: {e}", root.display()))?;
    let mut blocks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| e.to_string())?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !is_dir || name.starts_with('.') || VOLATILE_DIRS.contains(&name.as_ref()) {
            continue;
        }
        blocks.push(entry.path());
    }
    blocks.sort();
    Ok(blocks)
}

/// Walk every block and total its stats. Any unreadable block fails the scan.
fn scan_blocks(root: &Path) -> Result<ArtifactFacts, String> {
    let mut series = 0u64;
    let blocks = block_dirs(root)?;
    for block in &blocks {
        let meta = read_block_meta(block)?;
        tracing::trace!(block = %meta.ulid, series = meta.stats.num_series, "Scanned block");
        series = series.saturating_add(meta.stats.num_series);
    }
    Ok(BTreeMap::from([
        (FACT_SERIES.to_string(), series),
        (FACT_BLOCKS.to_string(), blocks.len() as u64),
    ]))
}

impl ComponentSource for MetricsSource {
    const COMPONENT: Component = Component::Metrics;

    fn live_root(&self) -> &Path {
        &self.data_dir
    }

    fn paths(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            "data_dir".to_string(),
            self.data_dir.to_string_lossy().into_owned(),
        )])
    }

    fn capture(&self, staging: &Path) -> Result<ArtifactFacts, String> {
        if !self.data_dir.is_dir() {
            return Err(format!("data directory {} missing", self.data_dir.display()));
        }
        // Blocks are immutable once written; a block without meta.json is still
        // being compacted and is left for the next run.
        for block in block_dirs(&self.data_dir)? {
            if read_block_meta(&block).is_err() {
                tracing::debug!(block = %block.display(), "Skipping incomplete block");
                continue;
            }
            let Some(name) = block.file_name() else {
                continue;
            };
            copy_dir_all(&block, &staging.join(name)).map_err(|e| e.to_string())?;
        }
        scan_blocks(staging)
    }

    fn check_integrity(&self, root: &Path) -> Result<ArtifactFacts, String> {
        scan_blocks(root)
    }

    fn probe(&self) -> ComponentHealth {
        if !self.data_dir.is_dir() {
            return ComponentHealth::unreachable(
                Component::Metrics,
                format!("data directory {} missing", self.data_dir.display()),
            );
        }
        match scan_blocks(&self.data_dir) {
            Ok(facts) => ComponentHealth::healthy(Component::Metrics, facts),
            Err(reason) => ComponentHealth::degraded(Component::Metrics, ArtifactFacts::new(), reason),
        }
    }
}
