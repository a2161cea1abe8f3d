// src/stock.rs
//! Складской леджер: остатки в bins и записи движений в stock_entries.
//! Движение и изменение количеств в заявке всегда выполняются в одной
//! транзакции — вызывающий код передаёт сюда свою Transaction.

use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

// ==================== ENTRY TYPE ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Physical move: decrements source bins, increments target bins
    MaterialTransfer,
    /// Dispatch record written at shipment time; bins move at receipt
    ShipmentDispatch,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::MaterialTransfer => "material_transfer",
            EntryType::ShipmentDispatch => "shipment_dispatch",
        }
    }
}

// ==================== BIN LOOKUPS ====================

/// On-hand stock for one item in one warehouse. Missing bin means zero —
/// normal for items that have never been stored there.
pub async fn get_actual_qty(
    pool: &SqlitePool,
    item_code: &str,
    warehouse: &str,
) -> ApiResult<f64> {
    let row: Option<(f64,)> = sqlx::query_as(
        "SELECT actual_qty FROM bins WHERE item_code = ? AND warehouse = ?",
    )
    .bind(item_code)
    .bind(warehouse)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0).unwrap_or(0.0))
}

/// On-hand stock for a set of items in one warehouse, keyed by item code.
/// Read once up front so every line validates against the same snapshot.
pub async fn on_hand_map(
    pool: &SqlitePool,
    item_codes: &[String],
    warehouse: &str,
) -> ApiResult<HashMap<String, f64>> {
    let mut on_hand = HashMap::new();
    for item_code in item_codes {
        let qty = get_actual_qty(pool, item_code, warehouse).await?;
        on_hand.insert(item_code.clone(), qty);
    }
    Ok(on_hand)
}

// ==================== STOCK ENTRY CREATION ====================

#[derive(Debug, Clone)]
pub struct MovementLine {
    pub item_code: String,
    pub qty: f64,
    pub uom: String,
}

/// Create a stock entry with its lines inside the caller's transaction.
/// Material transfers also move the bin quantities; dispatch records do not.
pub async fn create_stock_entry(
    tx: &mut Transaction<'_, Sqlite>,
    entry_type: EntryType,
    transfer_id: Option<&str>,
    source_warehouse: &str,
    target_warehouse: &str,
    lines: &[MovementLine],
    created_by: Option<&str>,
) -> ApiResult<String> {
    if lines.is_empty() {
        return Err(ApiError::DownstreamMovementError(
            "Stock entry requires at least one line".to_string(),
        ));
    }

    let entry_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let total_qty: f64 = lines.iter().map(|line| line.qty).sum();

    sqlx::query(
        r#"INSERT INTO stock_entries (
            id, entry_type, transfer_id, source_warehouse, target_warehouse,
            posting_date, total_qty, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&entry_id)
    .bind(entry_type.as_str())
    .bind(transfer_id)
    .bind(source_warehouse)
    .bind(target_warehouse)
    .bind(now)
    .bind(total_qty)
    .bind(created_by)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    for line in lines {
        sqlx::query(
            r#"INSERT INTO stock_entry_items (id, stock_entry_id, item_code, qty, uom)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry_id)
        .bind(&line.item_code)
        .bind(line.qty)
        .bind(&line.uom)
        .execute(&mut **tx)
        .await?;
    }

    if entry_type == EntryType::MaterialTransfer {
        move_bins(tx, source_warehouse, target_warehouse, lines).await?;
    }

    Ok(entry_id)
}

/// Decrement source bins and increment target bins for every line.
/// The caller validated stock beforehand; a shortfall here means the
/// snapshot went stale and the whole transaction rolls back.
async fn move_bins(
    tx: &mut Transaction<'_, Sqlite>,
    source_warehouse: &str,
    target_warehouse: &str,
    lines: &[MovementLine],
) -> ApiResult<()> {
    let now = Utc::now();

    for line in lines {
        let result = sqlx::query(
            r#"UPDATE bins SET actual_qty = actual_qty - ?, updated_at = ?
               WHERE item_code = ? AND warehouse = ? AND actual_qty >= ?"#,
        )
        .bind(line.qty)
        .bind(now)
        .bind(&line.item_code)
        .bind(source_warehouse)
        .bind(line.qty)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::DownstreamMovementError(format!(
                "Stock movement failed: {} has insufficient stock in {}",
                line.item_code, source_warehouse
            )));
        }

        sqlx::query(
            r#"INSERT INTO bins (id, item_code, warehouse, actual_qty, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(item_code, warehouse) DO UPDATE SET
                   actual_qty = actual_qty + excluded.actual_qty,
                   updated_at = excluded.updated_at"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&line.item_code)
        .bind(target_warehouse)
        .bind(line.qty)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Set a bin to an absolute quantity (admin stock seeding / correction).
pub async fn set_bin_qty(
    pool: &SqlitePool,
    item_code: &str,
    warehouse: &str,
    actual_qty: f64,
) -> ApiResult<()> {
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO bins (id, item_code, warehouse, actual_qty, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(item_code, warehouse) DO UPDATE SET
               actual_qty = excluded.actual_qty,
               updated_at = excluded.updated_at"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(item_code)
    .bind(warehouse)
    .bind(actual_qty)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
