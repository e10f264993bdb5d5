//! API request and response models.
//!
//! These define the public contract and are annotated with `utoipa` for the OpenAPI document.
//! Conversions from the `*DBResponse` types live next to the API types.

pub mod assistants;
pub mod auth;
pub mod balance;
pub mod bots;
pub mod dialogs;
pub mod handoff;
pub mod health;
pub mod knowledge;
pub mod pagination;
pub mod payments;
pub mod users;
pub mod widget;
