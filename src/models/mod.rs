// src/models/mod.rs

// 1. Объявляем модули
pub mod item;
pub mod stock;
pub mod transfer;
pub mod warehouse;

// 2. Ре-экспортируем содержимое (Re-export), чтобы структуры были доступны как crate::models::StructName
pub use item::*;
pub use stock::*;
pub use transfer::*;
pub use warehouse::*;

use serde::Serialize;

// ==================== COMMON / SHARED ====================

/// Общая статистика для дашборда
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_transfers: i64,
    pub draft: i64,
    pub pending_approval: i64,
    pub in_transit: i64,
    pub completed: i64,
    pub rejected: i64,
    pub total_items: i64,
    pub total_warehouses: i64,
}
