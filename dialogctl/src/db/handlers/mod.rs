//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (a pooled connection or an open transaction), binds
//! parameters, and returns models from [`crate::db::models`]. Callers decide the transaction
//! boundary:
//!
//! ```ignore
//! use dialogctl::db::handlers::{Assistants, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let assistant = Assistants::new(&mut tx).get_by_id(id).await?;
//! tx.commit().await?;
//! ```
//!
//! - [`Users`], [`Assistants`], [`Knowledge`]: CRUD via the [`Repository`] trait
//! - [`Dialogs`]: dialogs, messages and handoff transitions
//! - [`Credits`]: the balance ledger
//! - [`Payments`]: payment rows and their status transitions
//! - [`BotTokens`]: messaging platform bot credentials

pub mod assistants;
pub mod bot_tokens;
pub mod credits;
pub mod dialogs;
pub mod knowledge;
pub mod payments;
pub mod repository;
pub mod users;

pub use assistants::Assistants;
pub use bot_tokens::BotTokens;
pub use credits::Credits;
pub use dialogs::Dialogs;
pub use knowledge::Knowledge;
pub use payments::Payments;
pub use repository::Repository;
pub use users::Users;
