//! Application store source: relational database plus a semantic vector index.
//!
//! The vector index directory holds one file per document and an `index.json`
//! manifest recording the embedding dimension and document count.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use super::dashboards::{backup_database, count_rows, integrity_ok, table_exists};
use super::{ComponentHealth, ComponentSource};
use crate::archive::copy_dir_all;
use crate::artifact::{ArtifactFacts, Component};
use crate::config::ApplicationSourceConfig;

/// Fact key for the relational record count.
pub const FACT_RECORDS: &str = "records";
/// Fact key for the vector index document count.
pub const FACT_VECTOR_DOCUMENTS: &str = "vector_documents";

pub const VECTOR_MANIFEST: &str = "index.json";

/// Manifest written by the application next to its vector documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexManifest {
    pub dimension: u32,
    pub document_count: u64,
}

/// Application state directory.
#[derive(Debug, Clone)]
pub struct ApplicationSource {
    root: PathBuf,
    database: String,
    records_table: String,
    vector_dir: String,
}

impl ApplicationSource {
    pub fn new(
        root: impl Into<PathBuf>,
        database: impl Into<String>,
        records_table: impl Into<String>,
        vector_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            database: database.into(),
            records_table: records_table.into(),
            vector_dir: vector_dir.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ApplicationSourceConfig) -> Self {
        Self::new(
            &config.root,
            &config.database,
            &config.records_table,
            &config.vector_dir,
        )
    }

    fn inspect(&self, root: &Path, check: bool) -> Result<ArtifactFacts, String> {
        let db = root.join(&self.database);
        let conn = Connection::open_with_flags(&db, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| format!("cannot open {}: {e}", db.display()))?;
        if check {
            integrity_ok(&conn)?;
        }
        if !table_exists(&conn, &self.records_table)? {
            return Err(format!("{} table missing", self.records_table));
        }
        let records = count_rows(&conn, &self.records_table)?;
        let documents = read_vector_manifest(&root.join(&self.vector_dir))?
            .map_or(0, |m| m.document_count);
        Ok(BTreeMap::from([
            (FACT_RECORDS.to_string(), records),
            (FACT_VECTOR_DOCUMENTS.to_string(), documents),
        ]))
    }
}

/// Parse the vector manifest. A missing index directory means no documents yet.
pub fn read_vector_manifest(dir: &Path) -> Result<Option<VectorIndexManifest>, String> {
    if !dir.exists() {
        return Ok(None);
    }
    let raw = fs::read(dir.join(VECTOR_MANIFEST))
        .map_err(|e| format!("vector index manifest unreadable: {e}"))?;
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| format!("vector index manifest malformed: {e}"))
}

impl ComponentSource for ApplicationSource {
    const COMPONENT: Component = Component::Application;

    fn live_root(&self) -> &Path {
        &self.root
    }

    fn paths(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "database".to_string(),
                self.root.join(&self.database).to_string_lossy().into_owned(),
            ),
            (
                "vector_index".to_string(),
                self.root.join(&self.vector_dir).to_string_lossy().into_owned(),
            ),
        ])
    }

    fn capture(&self, staging: &Path) -> Result<ArtifactFacts, String> {
        let live_db = self.root.join(&self.database);
        if !live_db.is_file() {
            return Err(format!("database {} missing", live_db.display()));
        }
        backup_database(&live_db, &staging.join(&self.database))?;

        let vectors = self.root.join(&self.vector_dir);
        if vectors.is_dir() {
            // Validate before copying so a half-written index never becomes an artifact
            read_vector_manifest(&vectors)?;
            copy_dir_all(&vectors, &staging.join(&self.vector_dir))
                .map_err(|e| format!("cannot copy vector index: {e}"))?;
        }
        self.inspect(staging, false)
    }

    fn check_integrity(&self, root: &Path) -> Result<ArtifactFacts, String> {
        self.inspect(root, true)
    }

    fn probe(&self) -> ComponentHealth {
        if !self.root.join(&self.database).is_file() {
            return ComponentHealth::unreachable(Component::Application, "database missing");
        }
        match self.inspect(&self.root, false) {
            Ok(facts) => ComponentHealth::healthy(Component::Application, facts),
            Err(reason) => {
                ComponentHealth::degraded(Component::Application, ArtifactFacts::new(), reason)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn seed_application(root: &Path, records: usize, documents: u64) {
        fs::create_dir_all(root).unwrap();
        let conn = Connection::open(root.join("app.db")).unwrap();
        conn.execute_batch("CREATE TABLE journal_entries (id INTEGER PRIMARY KEY, body TEXT);")
            .unwrap();
        for i in 0..records {
            conn.execute("INSERT INTO journal_entries (body) VALUES (?1)", [format!("entry {i}")])
                .unwrap();
        }
        let vectors = root.join("vectors");
        fs::create_dir_all(&vectors).unwrap();
        for i in 0..documents {
            fs::write(vectors.join(format!("doc-{i}.vec")), [0u8; 16]).unwrap();
        }
        let manifest = VectorIndexManifest {
            dimension: 4,
            document_count: documents,
        };
        fs::write(
            vectors.join(VECTOR_MANIFEST),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();
    }

    fn source(root: &Path) -> ApplicationSource {
        ApplicationSource::new(root, "app.db", "journal_entries", "vectors")
    }

    #[test]
    fn capture_records_both_facts() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("app");
        seed_application(&live, 25, 20);
        let staging = tmp.path().join("stage");
        fs::create_dir_all(&staging).unwrap();

        let facts = source(&live).capture(&staging).unwrap();
        assert_eq!(facts[FACT_RECORDS], 25);
        assert_eq!(facts[FACT_VECTOR_DOCUMENTS], 20);
        assert!(staging.join("vectors").join("doc-0.vec").exists());
        assert_eq!(source(&live).check_integrity(&staging).unwrap(), facts);
    }

    #[test]
    fn malformed_manifest_blocks_capture() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("app");
        seed_application(&live, 1, 1);
        fs::write(live.join("vectors").join(VECTOR_MANIFEST), b"[]").unwrap();
        let staging = tmp.path().join("stage");
        fs::create_dir_all(&staging).unwrap();
        let err = source(&live).capture(&staging).unwrap_err();
        assert!(err.contains("manifest malformed"));
    }

    #[test]
    fn missing_vector_index_counts_zero_documents() {
        let tmp = TempDir::new().unwrap();
        seed_application(tmp.path(), 3, 0);
        fs::remove_dir_all(tmp.path().join("vectors")).unwrap();
        let facts = source(tmp.path()).check_integrity(tmp.path()).unwrap();
        assert_eq!(facts[FACT_VECTOR_DOCUMENTS], 0);
        assert_eq!(facts[FACT_RECORDS], 3);
    }
}
