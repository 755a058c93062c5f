/// Credit endpoints
///
/// - `GET /v1/credits/packages` - Active packages (public)
/// - `GET /v1/credits/balance` - Caller's balance
/// - `GET /v1/credits/transactions` - Caller's ledger, newest first

use super::Pagination;
use crate::{app::AppState, error::ApiResult};
use axum::{
    extract::{Query, State},
    Json,
};
use restora_shared::{
    auth::middleware::AuthContext,
    models::{
        credit::{CreditBalance, CreditTransaction},
        package::CreditPackage,
    },
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: i64,

    /// Credits one image submission costs
    pub cost_per_image: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<CreditTransaction>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    pub packages: Vec<CreditPackage>,
}

pub async fn list_packages(State(state): State<AppState>) -> ApiResult<Json<PackagesResponse>> {
    let packages = CreditPackage::list_active(&state.db).await?;
    Ok(Json(PackagesResponse { packages }))
}

pub async fn get_balance(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = CreditBalance::get(&state.db, auth.user_id).await?;

    Ok(Json(BalanceResponse {
        user_id: auth.user_id,
        balance,
        cost_per_image: state.config.credits.per_image,
    }))
}

/// List the caller's credit ledger
///
/// ```text
/// GET /v1/credits/transactions?limit=20&offset=0
/// ```
pub async fn list_transactions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<TransactionsResponse>> {
    let (limit, offset) = (page.limit(), page.offset());
    let transactions = CreditTransaction::list_by_user(&state.db, auth.user_id, limit, offset).await?;

    Ok(Json(TransactionsResponse {
        transactions,
        limit,
        offset,
    }))
}
