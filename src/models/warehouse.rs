// src/models/warehouse.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Склады создаются из конфигурации transfer_rules, не через API
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Warehouse {
    pub name: String,
    pub warehouse_group: String,
    pub is_hold: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Склад с суммарным остатком (для списков)
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct WarehouseWithStock {
    pub name: String,
    pub warehouse_group: String,
    pub is_hold: bool,
    pub total_qty: f64,
    pub item_count: i64,
}
