// src/models/item.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Item {
    pub item_code: String,
    pub item_name: String,
    pub stock_uom: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ItemBarcode {
    pub barcode: String,
    pub item_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateItemRequest {
    #[validate(length(min = 1, max = 100, message = "Item code must be between 1 and 100 characters"))]
    pub item_code: String,
    #[validate(length(min = 1, max = 255, message = "Item name must be between 1 and 255 characters"))]
    pub item_name: String,
    #[validate(length(min = 1, max = 20, message = "Stock UOM must be between 1 and 20 characters"))]
    pub stock_uom: String,
    pub barcodes: Option<Vec<String>>,
}
