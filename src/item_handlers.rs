// src/item_handlers.rs
//! Обработчики справочника товаров и штрихкодов

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use chrono::Utc;
use validator::Validate;
use log::info;
use serde::Serialize;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{CreateItemRequest, Item, ItemBarcode};

// ==================== ITEM CRUD ====================

pub async fn create_item(
    app_state: web::Data<Arc<AppState>>,
    item: web::Json<CreateItemRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    item.validate()?;
    crate::error::validate_uom(&item.stock_uom)?;

    let existing: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE item_code = ?")
        .bind(&item.item_code)
        .fetch_one(&app_state.db_pool)
        .await?;
    if existing.0 > 0 {
        return Err(ApiError::BadRequest(format!(
            "Item '{}' already exists",
            item.item_code
        )));
    }

    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO items (item_code, item_name, stock_uom, status, created_at, updated_at)
           VALUES (?, ?, ?, 'active', ?, ?)"#,
    )
    .bind(&item.item_code)
    .bind(&item.item_name)
    .bind(&item.stock_uom)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if let Some(ref barcodes) = item.barcodes {
        for barcode in barcodes {
            if barcode.trim().is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT INTO item_barcodes (barcode, item_code, created_at) VALUES (?, ?, ?)",
            )
            .bind(barcode.trim())
            .bind(&item.item_code)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    let created: Item = sqlx::query_as("SELECT * FROM items WHERE item_code = ?")
        .bind(&item.item_code)
        .fetch_one(&app_state.db_pool)
        .await?;

    info!("User {} created item {}", user_id, created.item_code);
    Ok(HttpResponse::Created().json(ApiResponse::success(created)))
}

pub async fn get_items(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();

    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    if let Some(ref search) = query.search {
        if !search.trim().is_empty() {
            let pattern = format!("%{}%", search.trim());
            conditions.push("(item_code LIKE ? OR item_name LIKE ?)".to_string());
            params.push(pattern.clone());
            params.push(pattern);
        }
    }
    if let Some(ref status) = query.status {
        conditions.push("status = ?".to_string());
        params.push(status.clone());
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM items WHERE {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total: i64 = count_query.fetch_one(&app_state.db_pool).await?;

    let sql = format!(
        "SELECT * FROM items WHERE {} ORDER BY item_code LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, Item>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    select_query = select_query.bind(per_page).bind(offset);
    let items: Vec<Item> = select_query.fetch_all(&app_state.db_pool).await?;

    let total_pages = (total + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: items,
        total,
        page,
        per_page,
        total_pages,
    })))
}

#[derive(Debug, Serialize)]
pub struct ItemWithBarcodes {
    #[serde(flatten)]
    pub item: Item,
    pub barcodes: Vec<ItemBarcode>,
}

pub async fn get_item(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let item_code = path.into_inner();
    let item: Item = sqlx::query_as("SELECT * FROM items WHERE item_code = ?")
        .bind(&item_code)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::item_not_found(&item_code))?;

    let barcodes: Vec<ItemBarcode> = sqlx::query_as(
        "SELECT * FROM item_barcodes WHERE item_code = ? ORDER BY barcode",
    )
    .bind(&item_code)
    .fetch_all(&app_state.db_pool)
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(ItemWithBarcodes { item, barcodes })))
}

// ==================== BARCODE LOOKUP ====================

#[derive(Debug, Serialize)]
pub struct BarcodeLookupResponse {
    pub item_code: String,
}

/// Find the item behind a scanned barcode
pub async fn get_item_by_barcode(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let barcode = path.into_inner();

    if barcode.trim().is_empty() {
        return Err(ApiError::ValidationError("Barcode is required".to_string()));
    }

    let row: Option<(String,)> =
        sqlx::query_as("SELECT item_code FROM item_barcodes WHERE barcode = ?")
            .bind(barcode.trim())
            .fetch_optional(&app_state.db_pool)
            .await?;

    match row {
        Some((item_code,)) => Ok(HttpResponse::Ok().json(ApiResponse::success(
            BarcodeLookupResponse { item_code },
        ))),
        None => Err(ApiError::NotFound(format!("Barcode '{}' not found", barcode))),
    }
}

// ==================== TESTS ====================
