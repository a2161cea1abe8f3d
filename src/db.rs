// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;
use chrono::Utc;

use crate::config::Config;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'viewer' CHECK(
                role IN ('admin', 'transfer_manager', 'warehouse_manager', 'viewer')
            ),
            warehouse_group TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            last_login DATETIME,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until DATETIME
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create warehouses table (seeded from transfer_rules config)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS warehouses (
            name TEXT PRIMARY KEY CHECK(length(name) > 0 AND length(name) <= 255),
            warehouse_group TEXT NOT NULL CHECK(length(warehouse_group) > 0 AND length(warehouse_group) <= 255),
            is_hold INTEGER NOT NULL DEFAULT 0 CHECK(is_hold IN (0, 1)),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create items table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            item_code TEXT PRIMARY KEY CHECK(length(item_code) > 0 AND length(item_code) <= 100),
            item_name TEXT NOT NULL CHECK(length(item_name) > 0 AND length(item_name) <= 255),
            stock_uom TEXT NOT NULL DEFAULT 'Nos' CHECK(length(stock_uom) > 0 AND length(stock_uom) <= 20),
            status TEXT NOT NULL DEFAULT 'active' CHECK(
                status IN ('active', 'inactive', 'discontinued')
            ),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create item_barcodes table for barcode lookups
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_barcodes (
            barcode TEXT PRIMARY KEY CHECK(length(barcode) > 0 AND length(barcode) <= 100),
            item_code TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (item_code) REFERENCES items (item_code) ON DELETE CASCADE
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create bins table - on-hand stock per item and warehouse
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bins (
            id TEXT PRIMARY KEY,
            item_code TEXT NOT NULL,
            warehouse TEXT NOT NULL,
            actual_qty REAL NOT NULL DEFAULT 0.0 CHECK(actual_qty >= 0),
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (item_code) REFERENCES items (item_code) ON DELETE CASCADE,
            FOREIGN KEY (warehouse) REFERENCES warehouses (name),
            UNIQUE(item_code, warehouse)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create transfer_requests table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_requests (
            id TEXT PRIMARY KEY,
            source_warehouse TEXT NOT NULL,
            target_warehouse TEXT NOT NULL CHECK(target_warehouse != source_warehouse),
            transfer_type TEXT NOT NULL CHECK(transfer_type IN ('internal', 'external')),
            approval_status TEXT NOT NULL DEFAULT 'draft' CHECK(
                approval_status IN (
                    'draft', 'pending_approval', 'approved_pending_shipment',
                    'partially_shipped', 'shipped', 'partially_completed',
                    'completed', 'rejected'
                )
            ),
            requested_by TEXT NOT NULL,
            requested_date DATETIME NOT NULL,
            approved_by TEXT,
            approval_date DATETIME,
            rejection_reason TEXT CHECK(rejection_reason IS NULL OR length(rejection_reason) <= 1000),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (source_warehouse) REFERENCES warehouses (name),
            FOREIGN KEY (target_warehouse) REFERENCES warehouses (name),
            FOREIGN KEY (requested_by) REFERENCES users (id),
            FOREIGN KEY (approved_by) REFERENCES users (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create transfer_request_items table with quantity guards
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_request_items (
            id TEXT PRIMARY KEY,
            transfer_id TEXT NOT NULL,
            item_code TEXT NOT NULL,
            uom TEXT NOT NULL DEFAULT 'Nos',
            requested_qty REAL NOT NULL CHECK(requested_qty > 0),
            accepted_qty REAL NOT NULL DEFAULT 0.0 CHECK(accepted_qty >= 0 AND accepted_qty <= requested_qty),
            shipped_qty REAL NOT NULL DEFAULT 0.0 CHECK(shipped_qty >= 0 AND shipped_qty <= accepted_qty),
            received_qty REAL NOT NULL DEFAULT 0.0 CHECK(received_qty >= 0 AND received_qty <= shipped_qty),
            pending_qty REAL NOT NULL DEFAULT 0.0,
            requester_notes TEXT CHECK(requester_notes IS NULL OR length(requester_notes) <= 55),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (transfer_id) REFERENCES transfer_requests (id) ON DELETE CASCADE,
            FOREIGN KEY (item_code) REFERENCES items (item_code),
            UNIQUE(transfer_id, item_code)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create stock_entries table - the movement ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_entries (
            id TEXT PRIMARY KEY,
            entry_type TEXT NOT NULL CHECK(entry_type IN ('material_transfer', 'shipment_dispatch')),
            transfer_id TEXT,
            source_warehouse TEXT NOT NULL,
            target_warehouse TEXT NOT NULL,
            posting_date DATETIME NOT NULL,
            total_qty REAL NOT NULL CHECK(total_qty > 0),
            created_by TEXT,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (transfer_id) REFERENCES transfer_requests (id),
            FOREIGN KEY (source_warehouse) REFERENCES warehouses (name),
            FOREIGN KEY (target_warehouse) REFERENCES warehouses (name)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_entry_items (
            id TEXT PRIMARY KEY,
            stock_entry_id TEXT NOT NULL,
            item_code TEXT NOT NULL,
            qty REAL NOT NULL CHECK(qty > 0),
            uom TEXT NOT NULL DEFAULT 'Nos',
            FOREIGN KEY (stock_entry_id) REFERENCES stock_entries (id) ON DELETE CASCADE,
            FOREIGN KEY (item_code) REFERENCES items (item_code)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Create audit_logs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT,
            description TEXT,
            changes TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Indexes for the hot query paths
    for index_sql in [
        "CREATE INDEX IF NOT EXISTS idx_transfer_requests_status ON transfer_requests (approval_status)",
        "CREATE INDEX IF NOT EXISTS idx_transfer_requests_source ON transfer_requests (source_warehouse)",
        "CREATE INDEX IF NOT EXISTS idx_transfer_requests_target ON transfer_requests (target_warehouse)",
        "CREATE INDEX IF NOT EXISTS idx_transfer_items_transfer ON transfer_request_items (transfer_id)",
        "CREATE INDEX IF NOT EXISTS idx_bins_item_warehouse ON bins (item_code, warehouse)",
        "CREATE INDEX IF NOT EXISTS idx_stock_entries_transfer ON stock_entries (transfer_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_entity ON audit_logs (entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs (created_at)",
    ] {
        sqlx::query(index_sql).execute(pool).await?;
    }

    Ok(())
}

/// Upsert every warehouse the transfer rules mention so foreign keys hold.
pub async fn seed_warehouses(pool: &SqlitePool, config: &Config) -> Result<()> {
    let now = Utc::now();

    for (name, group, is_hold) in config.all_warehouses() {
        sqlx::query(
            r#"INSERT INTO warehouses (name, warehouse_group, is_hold, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(name) DO UPDATE SET
                   warehouse_group = excluded.warehouse_group,
                   is_hold = excluded.is_hold,
                   updated_at = excluded.updated_at"#,
        )
            .bind(&name)
            .bind(&group)
            .bind(is_hold as i32)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
    }

    // External warehouses already belong to their internal groups; nothing
    // extra to insert, but make sure the config didn't name an unknown one.
    for name in &config.transfer_rules.external_warehouses {
        let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM warehouses WHERE name = ?")
            .bind(name)
            .fetch_one(pool)
            .await?;
        if exists.0 == 0 {
            anyhow::bail!("external warehouse '{}' is not part of any configured group", name);
        }
    }

    Ok(())
}
