//! Applying revisions to a live database.

use std::collections::HashSet;

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument};

use super::{MigrationError, Result, RevisionGraph};

/// Advisory lock held for the duration of every migration transaction.
const MIGRATION_LOCK_ID: i64 = 0x4449_414C_4F47_4D49_i64;

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_revisions (revision_id TEXT PRIMARY KEY)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeTarget {
    /// Every head of the graph
    Heads,
    /// The given revision and its ancestors
    Revision(String),
    /// The next `n` pending revisions in dependency order
    Steps(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DowngradeTarget {
    /// Revert everything, including the base revision
    Base,
    /// Keep only the given revision and its ancestors
    Revision(String),
    /// Revert the last `n` applied revisions
    Steps(usize),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<&'static str>,
    pub reverted: Vec<&'static str>,
    pub heads: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevisionStatus {
    pub id: &'static str,
    pub description: &'static str,
    pub down_revisions: Vec<&'static str>,
    pub applied: bool,
    pub is_head: bool,
}

/// Runs revisions of a [`RevisionGraph`] against a PostgreSQL database.
pub struct Migrator {
    pool: PgPool,
    graph: RevisionGraph,
}

impl Migrator {
    /// Migrator over the revisions embedded in this build.
    pub fn new(pool: PgPool) -> Result<Self> {
        Ok(Self::with_graph(pool, super::embedded_graph()?))
    }

    pub fn with_graph(pool: PgPool, graph: RevisionGraph) -> Self {
        Self { pool, graph }
    }

    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    /// Heads currently recorded in the version table.
    ///
    /// Read-only: a database without a version table reports no heads.
    pub async fn current(&self) -> Result<Vec<&'static str>> {
        let mut conn = self.pool.acquire().await?;
        let applied = self.load_applied(&mut conn).await?;
        Ok(self.graph.heads_of(&applied))
    }

    /// Every applied revision, in dependency order.
    pub async fn applied(&self) -> Result<Vec<&'static str>> {
        let mut conn = self.pool.acquire().await?;
        let applied = self.load_applied(&mut conn).await?;
        Ok(self.graph.ordered(&applied).into_iter().map(|r| r.id).collect())
    }

    /// Every revision with its applied flag, in dependency order.
    pub async fn history(&self) -> Result<Vec<RevisionStatus>> {
        let mut conn = self.pool.acquire().await?;
        let applied = self.load_applied(&mut conn).await?;

        let heads: HashSet<&str> = self.graph.heads().into_iter().collect();
        Ok(self
            .graph
            .topological_order()
            .into_iter()
            .map(|r| RevisionStatus {
                id: r.id,
                description: r.description,
                down_revisions: r.down_revisions.to_vec(),
                applied: applied.contains(r.id),
                is_head: heads.contains(r.id),
            })
            .collect())
    }

    #[instrument(skip(self), err)]
    pub async fn upgrade(&self, target: UpgradeTarget) -> Result<MigrationReport> {
        let mut tx = self.pool.begin().await?;
        lock(&mut tx).await?;
        sqlx::query(CREATE_VERSION_TABLE).execute(&mut *tx).await?;
        let mut applied = self.load_applied(&mut tx).await?;

        let desired: HashSet<&'static str> = match &target {
            UpgradeTarget::Heads => self.graph.closure(self.graph.heads())?,
            UpgradeTarget::Revision(id) => {
                let mut desired = self.graph.ancestors(id)?;
                desired.extend(applied.iter().copied());
                desired
            }
            UpgradeTarget::Steps(n) => {
                let pending = self.pending(&applied);
                let mut desired = applied.clone();
                desired.extend(self.graph.ordered(&pending).into_iter().take(*n).map(|r| r.id));
                desired
            }
        };

        let to_apply: HashSet<&'static str> = desired.difference(&applied).copied().collect();
        let mut report = MigrationReport::default();

        for revision in self.graph.ordered(&to_apply) {
            info!(revision = revision.id, "Applying revision: {}", revision.description);
            run_sql(&mut tx, revision.upgrade)
                .await
                .map_err(|source| MigrationError::Apply {
                    revision: revision.id.to_string(),
                    direction: "upgrade",
                    source,
                })?;
            applied.insert(revision.id);
            self.write_heads(&mut tx, &applied).await?;
            report.applied.push(revision.id);
        }

        tx.commit().await?;
        report.heads = self.graph.heads_of(&applied);
        if report.applied.is_empty() {
            info!("Schema already at target, heads: {:?}", report.heads);
        }
        Ok(report)
    }

    #[instrument(skip(self), err)]
    pub async fn downgrade(&self, target: DowngradeTarget) -> Result<MigrationReport> {
        let mut tx = self.pool.begin().await?;
        lock(&mut tx).await?;
        let mut applied = self.load_applied(&mut tx).await?;

        let desired: HashSet<&'static str> = match &target {
            DowngradeTarget::Base => HashSet::new(),
            DowngradeTarget::Revision(id) => {
                let ancestors = self.graph.ancestors(id)?;
                if !applied.contains(id.as_str()) {
                    return Err(MigrationError::UnknownRevision(format!("{id} (not applied)")));
                }
                ancestors
            }
            DowngradeTarget::Steps(n) => {
                let newest_first: Vec<&'static str> = self.graph.ordered(&applied).into_iter().rev().take(*n).map(|r| r.id).collect();
                applied.iter().copied().filter(|id| !newest_first.contains(id)).collect()
            }
        };

        let to_revert: HashSet<&'static str> = applied.difference(&desired).copied().collect();
        let mut report = MigrationReport::default();

        for revision in self.graph.ordered(&to_revert).into_iter().rev() {
            info!(revision = revision.id, "Reverting revision: {}", revision.description);
            run_sql(&mut tx, revision.downgrade)
                .await
                .map_err(|source| MigrationError::Apply {
                    revision: revision.id.to_string(),
                    direction: "downgrade",
                    source,
                })?;
            applied.remove(revision.id);
            self.write_heads(&mut tx, &applied).await?;
            report.reverted.push(revision.id);
        }

        tx.commit().await?;
        report.heads = self.graph.heads_of(&applied);
        Ok(report)
    }

    /// Record `ids` as the current revisions without running any SQL.
    #[instrument(skip(self), err)]
    pub async fn stamp(&self, ids: &[String]) -> Result<Vec<&'static str>> {
        let applied = self.graph.closure(ids.iter().map(String::as_str))?;
        let mut tx = self.pool.begin().await?;
        lock(&mut tx).await?;
        sqlx::query(CREATE_VERSION_TABLE).execute(&mut *tx).await?;
        self.write_heads(&mut tx, &applied).await?;
        tx.commit().await?;
        Ok(self.graph.heads_of(&applied))
    }

    /// Empty the version table. The schema itself is left untouched.
    #[instrument(skip(self), err)]
    pub async fn clear(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        lock(&mut tx).await?;
        sqlx::query(CREATE_VERSION_TABLE).execute(&mut *tx).await?;
        let removed = sqlx::query("DELETE FROM schema_revisions").execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;
        info!("Cleared {} row(s) from schema_revisions", removed);
        Ok(removed)
    }

    fn pending(&self, applied: &HashSet<&'static str>) -> HashSet<&'static str> {
        self.graph
            .topological_order()
            .into_iter()
            .map(|r| r.id)
            .filter(|id| !applied.contains(id))
            .collect()
    }

    async fn load_applied(&self, conn: &mut PgConnection) -> Result<HashSet<&'static str>> {
        let has_table: bool = sqlx::query_scalar("SELECT to_regclass('schema_revisions') IS NOT NULL")
            .fetch_one(&mut *conn)
            .await?;
        if !has_table {
            return Ok(HashSet::new());
        }
        let stored: Vec<String> = sqlx::query_scalar("SELECT revision_id FROM schema_revisions ORDER BY revision_id")
            .fetch_all(&mut *conn)
            .await?;

        let mut heads = Vec::with_capacity(stored.len());
        for id in &stored {
            let revision = self
                .graph
                .get(id)
                .ok_or_else(|| MigrationError::UnknownAppliedRevision(id.clone()))?;
            heads.push(revision.id);
        }

        self.graph.closure(heads)
    }

    async fn write_heads(&self, conn: &mut PgConnection, applied: &HashSet<&'static str>) -> Result<()> {
        sqlx::query("DELETE FROM schema_revisions").execute(&mut *conn).await?;
        for head in self.graph.heads_of(applied) {
            sqlx::query("INSERT INTO schema_revisions (revision_id) VALUES ($1)")
                .bind(head)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

async fn lock(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Merge revisions carry nothing but a comment.
fn is_blank(sql: &str) -> bool {
    sql.lines().map(str::trim).all(|line| line.is_empty() || line.starts_with("--"))
}

async fn run_sql(conn: &mut PgConnection, sql: &'static str) -> std::result::Result<(), sqlx::Error> {
    if is_blank(sql) {
        return Ok(());
    }
    sqlx::raw_sql(sql).execute(&mut *conn).await?;
    Ok(())
}
