// src/stock_handlers.rs
//! Обработчики остатков и записей движений

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use validator::Validate;
use log::info;
use serde::Serialize;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse};
use crate::models::*;
use crate::stock;

// ==================== BIN QUERIES ====================

pub async fn get_bins(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<BinQuery>,
) -> ApiResult<HttpResponse> {
    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(ref item_code) = query.item_code {
        conditions.push("item_code = ?".to_string());
        params.push(item_code.clone());
    }
    if let Some(ref warehouse) = query.warehouse {
        conditions.push("warehouse = ?".to_string());
        params.push(warehouse.clone());
    }

    let sql = format!(
        "SELECT * FROM bins WHERE {} ORDER BY warehouse, item_code",
        conditions.join(" AND ")
    );
    let mut select_query = sqlx::query_as::<_, Bin>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    let bins: Vec<Bin> = select_query.fetch_all(&app_state.db_pool).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(bins)))
}

#[derive(Debug, Serialize)]
pub struct WarehouseStockResponse {
    #[serde(flatten)]
    pub warehouse: Warehouse,
    pub bins: Vec<Bin>,
}

/// Склад с остатками по каждому товару
pub async fn get_warehouse_stock(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let name = path.into_inner();

    let warehouse: Warehouse = sqlx::query_as("SELECT * FROM warehouses WHERE name = ?")
        .bind(&name)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::warehouse_not_found(&name))?;

    let bins: Vec<Bin> = sqlx::query_as(
        "SELECT * FROM bins WHERE warehouse = ? AND actual_qty > 0 ORDER BY item_code",
    )
    .bind(&name)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(WarehouseStockResponse { warehouse, bins })))
}

// ==================== WAREHOUSES ====================

pub async fn get_warehouses(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let warehouses: Vec<WarehouseWithStock> = sqlx::query_as(
        r#"SELECT w.name, w.warehouse_group, w.is_hold,
                  COALESCE(SUM(b.actual_qty), 0.0) AS total_qty,
                  COUNT(b.id) AS item_count
           FROM warehouses w
           LEFT JOIN bins b ON b.warehouse = w.name
           GROUP BY w.name, w.warehouse_group, w.is_hold
           ORDER BY w.warehouse_group, w.name"#,
    )
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(warehouses)))
}

// ==================== STOCK ADJUSTMENT ====================

/// Admin-only absolute correction of a bin (stock seeding, stocktake)
pub async fn adjust_stock(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<AdjustStockRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    crate::error::validate_quantity(request.actual_qty)?;

    let item_exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE item_code = ?")
        .bind(&request.item_code)
        .fetch_one(&app_state.db_pool)
        .await?;
    if item_exists.0 == 0 {
        return Err(ApiError::item_not_found(&request.item_code));
    }

    let warehouse_exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM warehouses WHERE name = ?")
        .bind(&request.warehouse)
        .fetch_one(&app_state.db_pool)
        .await?;
    if warehouse_exists.0 == 0 {
        return Err(ApiError::warehouse_not_found(&request.warehouse));
    }

    stock::set_bin_qty(
        &app_state.db_pool,
        &request.item_code,
        &request.warehouse,
        request.actual_qty,
    )
    .await?;

    info!(
        "User {} set stock of {} in {} to {}",
        user_id, request.item_code, request.warehouse, request.actual_qty
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({
            "item_code": request.item_code,
            "warehouse": request.warehouse,
            "actual_qty": request.actual_qty
        }),
        "Stock level updated".to_string(),
    )))
}

// ==================== STOCK ENTRIES ====================

#[derive(Debug, Serialize)]
pub struct StockEntryWithItems {
    #[serde(flatten)]
    pub entry: StockEntry,
    pub items: Vec<StockEntryItem>,
}

pub async fn get_stock_entries(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<StockEntryQuery>,
) -> ApiResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(ref transfer_id) = query.transfer_id {
        conditions.push("transfer_id = ?".to_string());
        params.push(transfer_id.clone());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM stock_entries WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total: i64 = count_query.fetch_one(&app_state.db_pool).await?;

    let sql = format!(
        "SELECT * FROM stock_entries WHERE {} ORDER BY posting_date DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, StockEntry>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    select_query = select_query.bind(per_page).bind(offset);
    let entries: Vec<StockEntry> = select_query.fetch_all(&app_state.db_pool).await?;

    let mut data = Vec::with_capacity(entries.len());
    for entry in entries {
        let items: Vec<StockEntryItem> = sqlx::query_as(
            "SELECT * FROM stock_entry_items WHERE stock_entry_id = ? ORDER BY item_code",
        )
        .bind(&entry.id)
        .fetch_all(&app_state.db_pool)
        .await?;
        data.push(StockEntryWithItems { entry, items });
    }

    let total_pages = (total + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data,
        total,
        page,
        per_page,
        total_pages,
    })))
}

// ==================== TESTS ====================
