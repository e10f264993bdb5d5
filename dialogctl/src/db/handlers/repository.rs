//! Shared CRUD shape for table-backed repositories.

use crate::db::errors::Result;

/// Data access for a single table (users, assistants, knowledge documents).
///
/// The ledger, payment and bot-token repositories have access patterns that do not fit
/// plain CRUD and expose inherent methods instead.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    /// Row shape handed back to callers.
    type Response;
    type Id: Send + Sync;
    /// Narrowing and paging options accepted by [`Repository::list`].
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// `Ok(None)` when no row carries `id`.
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// Returns whether a row was removed.
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    /// Fails with `DbError::NotFound` when `id` is unknown.
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}
