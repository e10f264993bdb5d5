use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::{
        balance::{BalanceAdjustment, BalanceResponse, CreditTransactionResponse},
        pagination::Pagination,
        users::CurrentUser,
    },
    auth::current_user::require_admin,
    db::handlers::{Credits, Repository, Users},
    errors::{Error, Result},
    services::balance,
    types::{Resource, UserId},
};

/// The caller's balance
#[utoipa::path(
    get,
    path = "/api/balance",
    tag = "balance",
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_balance(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<BalanceResponse>> {
    let mut conn = state.db.acquire().await?;
    let balance = Credits::new(&mut conn).get_user_balance(current_user.id).await?;
    Ok(Json(BalanceResponse {
        user_id: current_user.id,
        balance,
    }))
}

/// The caller's ledger, newest first
#[utoipa::path(
    get,
    path = "/api/balance/transactions",
    tag = "balance",
    params(Pagination),
    responses(
        (status = 200, description = "Ledger entries", body = [CreditTransactionResponse]),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    current_user: CurrentUser,
) -> Result<Json<Vec<CreditTransactionResponse>>> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await?;
    let transactions = Credits::new(&mut conn).list_user_transactions(current_user.id, skip, limit).await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

/// Grant or remove credits
#[utoipa::path(
    post,
    path = "/api/admin/users/{user_id}/balance",
    tag = "balance",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    request_body = BalanceAdjustment,
    responses(
        (status = 201, description = "Adjustment recorded", body = CreditTransactionResponse),
        (status = 400, description = "Zero amount or insufficient balance"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn adjust_balance(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: CurrentUser,
    Json(request): Json<BalanceAdjustment>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    require_admin(&current_user, Resource::Credits)?;

    let mut conn = state.db.acquire().await?;
    Users::new(&mut conn)
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| Error::not_found("User", user_id))?;

    let transaction = balance::admin_adjust(&mut conn, user_id, current_user.id, request.amount, request.description).await?;
    tracing::info!("Admin {} adjusted balance of {} by {}", current_user.id, user_id, request.amount);
    Ok((StatusCode::CREATED, Json(transaction.into())))
}
