//! HTTP request handlers.
//!
//! Each module handles one resource. Handlers authenticate through extractors, check ownership,
//! then delegate to repositories (`crate::db::handlers`) or services (`crate::services`).

pub mod assistants;
pub mod auth;
pub mod balance;
pub mod bots;
pub mod dialogs;
pub mod health;
pub mod knowledge;
pub mod payments;
pub mod widget;
