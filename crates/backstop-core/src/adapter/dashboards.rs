//! Dashboard store source: a SQLite database plus a provisioning directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use super::{ComponentHealth, ComponentSource};
use crate::archive::copy_dir_all;
use crate::artifact::{ArtifactFacts, Component};
use crate::config::DashboardsSourceConfig;

/// Fact key for the number of stored dashboards.
pub const FACT_DASHBOARDS: &str = "dashboards";

const DASHBOARD_TABLE: &str = "dashboard";

/// Dashboard server state directory.
#[derive(Debug, Clone)]
pub struct DashboardsSource {
    root: PathBuf,
    database: String,
    provisioning: String,
}

impl DashboardsSource {
    pub fn new(
        root: impl Into<PathBuf>,
        database: impl Into<String>,
        provisioning: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            database: database.into(),
            provisioning: provisioning.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &DashboardsSourceConfig) -> Self {
        Self::new(&config.root, &config.database, &config.provisioning)
    }

    fn database_path(&self, root: &Path) -> PathBuf {
        root.join(&self.database)
    }
}

/// Copy a live SQLite database page-by-page with the online backup API.
pub(crate) fn backup_database(src_path: &Path, dest_path: &Path) -> Result<(), String> {
    let src = Connection::open_with_flags(src_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| format!("failed to open source database {}: {e}", src_path.display()))?;
    let mut dest = Connection::open(dest_path)
        .map_err(|e| format!("failed to create snapshot database: {e}"))?;
    let backup = rusqlite::backup::Backup::new(&src, &mut dest)
        .map_err(|e| format!("failed to initialize backup: {e}"))?;
    backup.step(-1).map_err(|e| format!("backup failed: {e}"))?;
    Ok(())
}

/// `PRAGMA integrity_check` must report exactly `ok`.
pub(crate) fn integrity_ok(conn: &Connection) -> Result<(), String> {
    let verdict: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|e| format!("integrity check could not run: {e}"))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(format!("integrity check reported: {verdict}"))
    }
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(|e| e.to_string())
}

pub(crate) fn count_rows(conn: &Connection, table: &str) -> Result<u64, String> {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|n| n.max(0) as u64)
    .map_err(|e| format!("cannot count {table}: {e}"))
}

fn inspect(db_path: &Path, check: bool) -> Result<ArtifactFacts, String> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| format!("cannot open {}: {e}", db_path.display()))?;
    if check {
        integrity_ok(&conn)?;
    }
    if !table_exists(&conn, DASHBOARD_TABLE)? {
        return Err(format!("{DASHBOARD_TABLE} table missing"));
    }
    let dashboards = count_rows(&conn, DASHBOARD_TABLE)?;
    Ok(BTreeMap::from([(FACT_DASHBOARDS.to_string(), dashboards)]))
}

impl ComponentSource for DashboardsSource {
    const COMPONENT: Component = Component::Dashboards;

    fn live_root(&self) -> &Path {
        &self.root
    }

    fn paths(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "database".to_string(),
                self.database_path(&self.root).to_string_lossy().into_owned(),
            ),
            (
                "provisioning".to_string(),
                self.root.join(&self.provisioning).to_string_lossy().into_owned(),
            ),
        ])
    }

    fn capture(&self, staging: &Path) -> Result<ArtifactFacts, String> {
        let live_db = self.database_path(&self.root);
        if !live_db.is_file() {
            return Err(format!("database {} missing", live_db.display()));
        }
        let staged_db = self.database_path(staging);
        backup_database(&live_db, &staged_db)?;

        let provisioning = self.root.join(&self.provisioning);
        if provisioning.is_dir() {
            copy_dir_all(&provisioning, &staging.join(&self.provisioning))
                .map_err(|e| format!("cannot copy provisioning: {e}"))?;
        }
        inspect(&staged_db, false)
    }

    fn check_integrity(&self, root: &Path) -> Result<ArtifactFacts, String> {
        inspect(&self.database_path(root), true)
    }

    fn probe(&self) -> ComponentHealth {
        let db = self.database_path(&self.root);
        if !db.is_file() {
            return ComponentHealth::unreachable(
                Component::Dashboards,
                format!("database {} missing", db.display()),
            );
        }
        match inspect(&db, false) {
            Ok(facts) => ComponentHealth::healthy(Component::Dashboards, facts),
            Err(reason) => {
                ComponentHealth::degraded(Component::Dashboards, ArtifactFacts::new(), reason)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapter::HealthStatus;
    use tempfile::TempDir;

    pub(crate) fn seed_dashboards(root: &Path, count: usize) {
        std::fs::create_dir_all(root.join("provisioning").join("dashboards")).unwrap();
        std::fs::write(
            root.join("provisioning").join("dashboards").join("default.yaml"),
            "apiVersion: 1\n",
        )
        .unwrap();
        let conn = Connection::open(root.join("grafana.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE dashboard (id INTEGER PRIMARY KEY, uid TEXT, title TEXT, data TEXT);",
        )
        .unwrap();
        for i in 0..count {
            conn.execute(
                "INSERT INTO dashboard (uid, title, data) VALUES (?1, ?2, '{}')",
                [format!("uid-{i}"), format!("Board {i}")],
            )
            .unwrap();
        }
    }

    fn source(root: &Path) -> DashboardsSource {
        DashboardsSource::new(root, "grafana.db", "provisioning")
    }

    #[test]
    fn capture_backs_up_database_and_provisioning() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("grafana");
        seed_dashboards(&live, 4);
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(&staging).unwrap();

        let facts = source(&live).capture(&staging).unwrap();
        assert_eq!(facts[FACT_DASHBOARDS], 4);
        assert!(staging.join("grafana.db").exists());
        assert!(
            staging
                .join("provisioning")
                .join("dashboards")
                .join("default.yaml")
                .exists()
        );
        assert_eq!(source(&live).check_integrity(&staging).unwrap(), facts);
    }

    #[test]
    fn integrity_requires_dashboard_table() {
        let tmp = TempDir::new().unwrap();
        let conn = Connection::open(tmp.path().join("grafana.db")).unwrap();
        conn.execute_batch("CREATE TABLE other (id INTEGER);").unwrap();
        drop(conn);
        let err = source(tmp.path()).check_integrity(tmp.path()).unwrap_err();
        assert!(err.contains("dashboard table missing"));
    }

    #[test]
    fn garbage_database_fails_integrity() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("grafana.db"), b"not a database at all").unwrap();
        assert!(source(tmp.path()).check_integrity(tmp.path()).is_err());
    }

    #[test]
    fn probe_reports_counts() {
        let tmp = TempDir::new().unwrap();
        seed_dashboards(tmp.path(), 2);
        let health = source(tmp.path()).probe();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.facts[FACT_DASHBOARDS], 2);

        let missing = source(&tmp.path().join("absent")).probe();
        assert_eq!(missing.status, HealthStatus::Unreachable);
    }
}
