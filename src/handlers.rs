// src/handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use crate::AppState;
use crate::error::ApiResult;
use crate::models::DashboardStats;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl PaginationQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

// ==================== DASHBOARD STATISTICS ====================

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let total_transfers: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transfer_requests")
        .fetch_one(&app_state.db_pool)
        .await?;

    let by_status = |status: &'static str| {
        sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM transfer_requests WHERE approval_status = ?"
        )
        .bind(status)
        .fetch_one(&app_state.db_pool)
    };

    let draft = by_status("draft").await?;
    let pending_approval = by_status("pending_approval").await?;
    let completed = by_status("completed").await?;
    let rejected = by_status("rejected").await?;

    // Everything between approval and completion counts as in transit
    let in_transit: (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM transfer_requests WHERE approval_status IN
           ('approved_pending_shipment', 'partially_shipped', 'shipped', 'partially_completed')"#
    )
        .fetch_one(&app_state.db_pool)
        .await?;

    let total_items: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE status = 'active'")
        .fetch_one(&app_state.db_pool)
        .await?;

    let total_warehouses: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM warehouses WHERE is_hold = 0")
        .fetch_one(&app_state.db_pool)
        .await?;

    let stats = DashboardStats {
        total_transfers: total_transfers.0,
        draft: draft.0,
        pending_approval: pending_approval.0,
        in_transit: in_transit.0,
        completed: completed.0,
        rejected: rejected.0,
        total_items: total_items.0,
        total_warehouses: total_warehouses.0,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

// ==================== RECENT ACTIVITY ====================

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ActivityEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn get_recent_activity(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_logs")
        .fetch_one(&app_state.db_pool)
        .await?;

    let entries: Vec<ActivityEntry> = sqlx::query_as(
        r#"SELECT id, user_id, action, entity_type, entity_id, description, created_at
           FROM audit_logs ORDER BY created_at DESC LIMIT ? OFFSET ?"#
    )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&app_state.db_pool)
        .await?;

    let total_pages = (total.0 + per_page - 1) / per_page;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: entries,
        total: total.0,
        page,
        per_page,
        total_pages,
    })))
}
