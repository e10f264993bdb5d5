//! Schema revisions and the machinery that applies them.
//!
//! Revisions form a directed acyclic graph rather than a line: two revisions may branch from the
//! same parent (for example two features developed in parallel) and a later *merge revision*
//! lists both as its down revisions. The database records which revisions are the current heads
//! in the `schema_revisions` table; everything reachable from those heads is considered applied.
//!
//! - [`graph`]: validation and ordering of the revision graph
//! - [`runner`]: [`Migrator`], which upgrades, downgrades and stamps a live database
//!
//! Revision SQL lives in the crate's `revisions/` directory and is embedded at compile time.
//!
//! ```ignore
//! let migrator = dialogctl::migrations::Migrator::new(pool.clone())?;
//! migrator.upgrade(UpgradeTarget::Heads).await?;
//! ```

pub mod graph;
pub mod runner;

pub use graph::RevisionGraph;
pub use runner::{DowngradeTarget, MigrationReport, Migrator, UpgradeTarget};

use thiserror::Error;

/// A single schema change with its forward and backward SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub id: &'static str,
    pub description: &'static str,
    /// Parent revisions. Empty for the base revision, more than one for merges.
    pub down_revisions: &'static [&'static str],
    pub upgrade: &'static str,
    pub downgrade: &'static str,
}

impl Revision {
    pub fn is_merge(&self) -> bool {
        self.down_revisions.len() > 1
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("duplicate revision id {0}")]
    DuplicateRevision(String),

    #[error("revision {revision} refers to unknown down revision {missing}")]
    UnknownDownRevision { revision: String, missing: String },

    #[error("unknown revision {0}")]
    UnknownRevision(String),

    #[error("expected exactly one base revision, found {0:?}")]
    BaseRevision(Vec<String>),

    #[error("revision graph contains a cycle through {0}")]
    Cycle(String),

    #[error("revision graph is empty")]
    Empty,

    #[error("database records revision {0}, which this build does not know about")]
    UnknownAppliedRevision(String),

    #[error("failed to apply {direction} of revision {revision}: {source}")]
    Apply {
        revision: String,
        direction: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

macro_rules! revision {
    ($id:literal, $slug:literal, $description:literal, [$($down:literal),*]) => {
        Revision {
            id: $id,
            description: $description,
            down_revisions: &[$($down),*],
            upgrade: include_str!(concat!("../../revisions/", $id, "_", $slug, ".up.sql")),
            downgrade: include_str!(concat!("../../revisions/", $id, "_", $slug, ".down.sql")),
        }
    };
}

/// All revisions shipped with this build, in declaration order.
///
/// Declaration order breaks ties when two revisions could run in either order.
pub static REVISIONS: &[Revision] = &[
    revision!("1c0a5e7d2b01", "initial_schema", "users, assistants, dialogs, ledger and payments", []),
    revision!("2d4b8f1e9a02", "bot_tokens", "telegram and vk bot tokens", ["1c0a5e7d2b01"]),
    revision!("3e7a2c5f0b13", "knowledge_and_embeddings", "user knowledge and embedding cache", ["1c0a5e7d2b01"]),
    revision!(
        "4f1d9b3a6c24",
        "merge_bots_and_knowledge",
        "merge bot tokens and knowledge branches",
        ["2d4b8f1e9a02", "3e7a2c5f0b13"]
    ),
    revision!("5a8c4e2d7f35", "assistant_widget_version", "widget_version on assistants", ["4f1d9b3a6c24"]),
    revision!(
        "6b2e7f9c1d46",
        "website_integration_enabled",
        "website_integration_enabled on assistants",
        ["5a8c4e2d7f35"]
    ),
    revision!("7c5f1a8e3b57", "welcome_bonus_received", "welcome_bonus_received on users", ["5a8c4e2d7f35"]),
    revision!(
        "8d9a3b6f2c68",
        "merge_integration_and_bonus",
        "merge website integration and welcome bonus branches",
        ["6b2e7f9c1d46", "7c5f1a8e3b57"]
    ),
    revision!("9e3c7d1a5f79", "dialog_handoff", "operator handoff state on dialogs", ["8d9a3b6f2c68"]),
];

/// Build the graph of the revisions embedded in this binary.
pub fn embedded_graph() -> Result<RevisionGraph> {
    RevisionGraph::new(REVISIONS.to_vec())
}
