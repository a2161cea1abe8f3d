// src/models/stock.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

/// Остаток товара на складе (item + warehouse -> actual_qty)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Bin {
    pub id: String,
    pub item_code: String,
    pub warehouse: String,
    pub actual_qty: f64,
    pub updated_at: DateTime<Utc>,
}

/// Запись о движении товара между складами
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockEntry {
    pub id: String,
    pub entry_type: String,
    pub transfer_id: Option<String>,
    pub source_warehouse: String,
    pub target_warehouse: String,
    pub posting_date: DateTime<Utc>,
    pub total_qty: f64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockEntryItem {
    pub id: String,
    pub stock_entry_id: String,
    pub item_code: String,
    pub qty: f64,
    pub uom: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustStockRequest {
    #[validate(length(min = 1, max = 100, message = "Item code must be between 1 and 100 characters"))]
    pub item_code: String,
    #[validate(length(min = 1, max = 255, message = "Warehouse must be between 1 and 255 characters"))]
    pub warehouse: String,
    #[validate(range(min = 0.0, message = "Quantity must be non-negative"))]
    pub actual_qty: f64,
}

#[derive(Debug, Deserialize)]
pub struct BinQuery {
    pub item_code: Option<String>,
    pub warehouse: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockEntryQuery {
    pub transfer_id: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
