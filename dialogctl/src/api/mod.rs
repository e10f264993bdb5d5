//! HTTP API.
//!
//! - **[`handlers`]**: axum route handlers
//! - **[`models`]**: request/response bodies, kept separate from the database models
//!
//! Routes live under `/api`. Owner routes authenticate with a session JWT; widget routes with
//! `X-Widget-Token`; bot-worker routes with `X-Bot-Secret`. The OpenAPI document is served at
//! `/api-docs/openapi.json`.

pub mod handlers;
pub mod models;
