//! Database record models matching table schemas.
//!
//! Each module holds the create/update request structs a repository accepts and the response
//! struct (deriving `sqlx::FromRow`) it returns. API models in [`crate::api::models`] convert from
//! these so storage and wire formats can evolve separately.
//!
//! Enum columns are stored as TEXT and map through `sqlx::Type` with lowercase or snake_case
//! names, matching the CHECK constraints in the schema.

pub mod assistants;
pub mod bot_tokens;
pub mod credits;
pub mod dialogs;
pub mod knowledge;
pub mod payments;
pub mod users;
