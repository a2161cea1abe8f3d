// src/transfer_handlers.rs
//! Обработчики заявок на перемещение между складами (v1.2)
//!
//! Каждый переход статуса: загрузка строк, все проверки до единой записи,
//! затем одна транзакция на шапку + строки + запись движения.

use actix_web::{web, HttpResponse};
use std::collections::HashSet;
use std::sync::Arc;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;
use log::info;

use crate::AppState;
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse};
use crate::models::*;
use crate::stock::{self, EntryType, MovementLine};
use crate::transfer_rules::{
    self, ApprovalStatus, TransferType, WarehouseRules,
};

// ==================== LOAD HELPERS ====================

async fn load_transfer(
    pool: &sqlx::SqlitePool,
    transfer_id: &str,
) -> ApiResult<(TransferRequest, Vec<TransferItem>)> {
    let transfer: TransferRequest =
        sqlx::query_as("SELECT * FROM transfer_requests WHERE id = ?")
            .bind(transfer_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::transfer_not_found(transfer_id))?;

    let items: Vec<TransferItem> = sqlx::query_as(
        "SELECT * FROM transfer_request_items WHERE transfer_id = ? ORDER BY created_at, item_code",
    )
    .bind(transfer_id)
    .fetch_all(pool)
    .await?;

    Ok((transfer, items))
}

fn parse_status(transfer: &TransferRequest) -> ApiResult<ApprovalStatus> {
    ApprovalStatus::from_str(&transfer.approval_status).ok_or_else(|| {
        ApiError::InternalServerError(format!(
            "Transfer '{}' has unknown status '{}'",
            transfer.id, transfer.approval_status
        ))
    })
}

async fn warehouse_group(pool: &sqlx::SqlitePool, warehouse: &str) -> ApiResult<String> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT warehouse_group FROM warehouses WHERE name = ?")
            .bind(warehouse)
            .fetch_optional(pool)
            .await?;

    row.map(|r| r.0)
        .ok_or_else(|| ApiError::warehouse_not_found(warehouse))
}

fn truncate_notes(notes: Option<String>) -> Option<String> {
    notes.map(|n| {
        let trimmed = n.trim();
        trimmed.chars().take(REQUESTER_NOTES_MAX).collect()
    })
}

/// Every item code must exist in the item master; reports all missing ones.
async fn check_items_exist(pool: &sqlx::SqlitePool, item_codes: &[String]) -> ApiResult<()> {
    let mut missing = Vec::new();
    for item_code in item_codes {
        let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE item_code = ?")
            .bind(item_code)
            .fetch_one(pool)
            .await?;
        if exists.0 == 0 {
            missing.push(format!("Item '{}' does not exist", item_code));
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::ValidationError(missing.join("; ")));
    }
    Ok(())
}

async fn item_uom(pool: &sqlx::SqlitePool, item_code: &str) -> ApiResult<String> {
    let row: Option<(String,)> = sqlx::query_as("SELECT stock_uom FROM items WHERE item_code = ?")
        .bind(item_code)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0).unwrap_or_else(|| "Nos".to_string()))
}

// ==================== TRANSFER CRUD ====================

pub async fn create_transfer(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateTransferRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let rules = WarehouseRules::from_config(&app_state.config.transfer_rules);
    let transfer_type = rules.classify(&request.source_warehouse, &request.target_warehouse)?;

    // Duplicate lines collapse into nonsense quantities; reject them all at once
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for item in &request.items {
        if !seen.insert(item.item_code.clone()) {
            duplicates.push(format!("Duplicate item code {} in request", item.item_code));
        }
    }
    if !duplicates.is_empty() {
        return Err(ApiError::ValidationError(duplicates.join("; ")));
    }

    let item_codes: Vec<String> = request.items.iter().map(|i| i.item_code.clone()).collect();
    check_items_exist(&app_state.db_pool, &item_codes).await?;

    let mut uoms = std::collections::HashMap::new();
    for item_code in &item_codes {
        uoms.insert(item_code.clone(), item_uom(&app_state.db_pool, item_code).await?);
    }

    let transfer_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let mut tx = app_state.db_pool.begin().await?;

    sqlx::query(
        r#"INSERT INTO transfer_requests (
            id, source_warehouse, target_warehouse, transfer_type, approval_status,
            requested_by, requested_date, created_at, updated_at
        ) VALUES (?, ?, ?, ?, 'draft', ?, ?, ?, ?)"#,
    )
    .bind(&transfer_id)
    .bind(&request.source_warehouse)
    .bind(&request.target_warehouse)
    .bind(transfer_type.as_str())
    .bind(&user_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for item in &request.items {
        let uom = uoms.get(&item.item_code).cloned().unwrap_or_else(|| "Nos".to_string());
        // accepted defaults to requested until an approver overrides it
        sqlx::query(
            r#"INSERT INTO transfer_request_items (
                id, transfer_id, item_code, uom, requested_qty, accepted_qty,
                shipped_qty, received_qty, pending_qty, requester_notes,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0.0, 0.0, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&transfer_id)
        .bind(&item.item_code)
        .bind(&uom)
        .bind(item.requested_qty)
        .bind(item.requested_qty)
        .bind(item.requested_qty)
        .bind(truncate_notes(item.requester_notes.clone()))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let (transfer, items) = load_transfer(&app_state.db_pool, &transfer_id).await?;

    info!(
        "User {} created {} transfer request {} ({} -> {})",
        user_id, transfer.transfer_type, transfer_id,
        transfer.source_warehouse, transfer.target_warehouse
    );
    Ok(HttpResponse::Created().json(ApiResponse::success(TransferWithItems { transfer, items })))
}

pub async fn get_all_transfers(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<TransferQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();

    let mut conditions: Vec<String> = vec!["1=1".to_string()];
    let mut params: Vec<String> = Vec::new();

    // Фильтры
    if let Some(ref status) = query.status {
        conditions.push("approval_status = ?".to_string());
        params.push(status.clone());
    }
    if let Some(ref transfer_type) = query.transfer_type {
        conditions.push("transfer_type = ?".to_string());
        params.push(transfer_type.clone());
    }
    if let Some(ref source) = query.source_warehouse {
        conditions.push("source_warehouse = ?".to_string());
        params.push(source.clone());
    }
    if let Some(ref target) = query.target_warehouse {
        conditions.push("target_warehouse = ?".to_string());
        params.push(target.clone());
    }
    if let Some(ref requested_by) = query.requested_by {
        conditions.push("requested_by = ?".to_string());
        params.push(requested_by.clone());
    }

    let where_clause = conditions.join(" AND ");

    // Подсчёт
    let count_sql = format!(
        "SELECT COUNT(*) FROM transfer_requests WHERE {}",
        where_clause
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let total: i64 = count_query.fetch_one(&app_state.db_pool).await?;

    // Выборка данных
    let sql = format!(
        "SELECT * FROM transfer_requests WHERE {} ORDER BY requested_date DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut select_query = sqlx::query_as::<_, TransferRequest>(&sql);
    for p in &params {
        select_query = select_query.bind(p);
    }
    select_query = select_query.bind(per_page).bind(offset);
    let transfers: Vec<TransferRequest> = select_query.fetch_all(&app_state.db_pool).await?;

    let total_pages = (total + per_page - 1) / per_page;
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse {
        data: transfers,
        total,
        page,
        per_page,
        total_pages,
    })))
}

pub async fn get_transfer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let transfer_id = path.into_inner();
    let (transfer, items) = load_transfer(&app_state.db_pool, &transfer_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(TransferWithItems { transfer, items })))
}

pub async fn update_transfer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateTransferRequest>,
    user_id: String,
) -> ApiResult<HttpResponse> {
    update.validate()?;
    let transfer_id = path.into_inner();
    let (transfer, _) = load_transfer(&app_state.db_pool, &transfer_id).await?;

    if parse_status(&transfer)? != ApprovalStatus::Draft {
        return Err(ApiError::invalid_transition("edit", &transfer.approval_status));
    }

    let source = update
        .source_warehouse
        .clone()
        .unwrap_or_else(|| transfer.source_warehouse.clone());
    let target = update
        .target_warehouse
        .clone()
        .unwrap_or_else(|| transfer.target_warehouse.clone());

    let rules = WarehouseRules::from_config(&app_state.config.transfer_rules);
    let transfer_type = rules.classify(&source, &target)?;

    let mut uoms = std::collections::HashMap::new();
    if let Some(ref new_items) = update.items {
        let item_codes: Vec<String> = new_items.iter().map(|i| i.item_code.clone()).collect();
        let mut seen = HashSet::new();
        for item_code in &item_codes {
            if !seen.insert(item_code.clone()) {
                return Err(ApiError::ValidationError(format!(
                    "Duplicate item code {} in request",
                    item_code
                )));
            }
        }
        check_items_exist(&app_state.db_pool, &item_codes).await?;
        for item_code in &item_codes {
            uoms.insert(item_code.clone(), item_uom(&app_state.db_pool, item_code).await?);
        }
    }

    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;

    sqlx::query(
        r#"UPDATE transfer_requests SET
           source_warehouse = ?, target_warehouse = ?, transfer_type = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&source)
    .bind(&target)
    .bind(transfer_type.as_str())
    .bind(now)
    .bind(&transfer_id)
    .execute(&mut *tx)
    .await?;

    if let Some(ref new_items) = update.items {
        // Draft lines carry no shipment state yet, so replace them wholesale
        sqlx::query("DELETE FROM transfer_request_items WHERE transfer_id = ?")
            .bind(&transfer_id)
            .execute(&mut *tx)
            .await?;

        for item in new_items {
            let uom = uoms.get(&item.item_code).cloned().unwrap_or_else(|| "Nos".to_string());
            sqlx::query(
                r#"INSERT INTO transfer_request_items (
                    id, transfer_id, item_code, uom, requested_qty, accepted_qty,
                    shipped_qty, received_qty, pending_qty, requester_notes,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, 0.0, 0.0, ?, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&transfer_id)
            .bind(&item.item_code)
            .bind(&uom)
            .bind(item.requested_qty)
            .bind(item.requested_qty)
            .bind(item.requested_qty)
            .bind(truncate_notes(item.requester_notes.clone()))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    let (transfer, items) = load_transfer(&app_state.db_pool, &transfer_id).await?;
    info!("User {} updated transfer request {}", user_id, transfer_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(TransferWithItems { transfer, items })))
}

pub async fn delete_transfer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    claims: Claims,
) -> ApiResult<HttpResponse> {
    let transfer_id = path.into_inner();
    let (transfer, _) = load_transfer(&app_state.db_pool, &transfer_id).await?;

    if parse_status(&transfer)? != ApprovalStatus::Draft {
        return Err(ApiError::invalid_transition("delete", &transfer.approval_status));
    }

    if !claims.role.can_delete_transfers() && transfer.requested_by != claims.sub {
        return Err(ApiError::Forbidden(
            "Only the requester or an administrator can delete a draft".to_string(),
        ));
    }

    let mut tx = app_state.db_pool.begin().await?;
    sqlx::query("DELETE FROM transfer_request_items WHERE transfer_id = ?")
        .bind(&transfer_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM transfer_requests WHERE id = ?")
        .bind(&transfer_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("User {} deleted transfer request {}", claims.sub, transfer_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "message": "Transfer request deleted successfully"
    }))))
}

// ==================== WORKFLOW TRANSITIONS ====================

pub async fn submit_for_approval(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    claims: Claims,
) -> ApiResult<HttpResponse> {
    let transfer_id = path.into_inner();
    let (transfer, items) = load_transfer(&app_state.db_pool, &transfer_id).await?;
    let status = parse_status(&transfer)?;

    if status != ApprovalStatus::Draft {
        return Err(ApiError::invalid_transition("submit", &transfer.approval_status));
    }

    if items.is_empty() {
        return Err(ApiError::ValidationError("Cannot submit without items".to_string()));
    }

    let transfer_type = TransferType::from_str(&transfer.transfer_type).ok_or_else(|| {
        ApiError::InternalServerError(format!(
            "Transfer '{}' has unknown type '{}'",
            transfer.id, transfer.transfer_type
        ))
    })?;

    let now = Utc::now();

    if transfer_type == TransferType::Internal {
        // Internal: self-authorized, auto-completes with a single movement
        let item_codes: Vec<String> = items.iter().map(|i| i.item_code.clone()).collect();
        let on_hand =
            stock::on_hand_map(&app_state.db_pool, &item_codes, &transfer.source_warehouse).await?;

        let insufficient = transfer_rules::validate_internal_stock(&items, &on_hand);
        if !insufficient.is_empty() {
            return Err(ApiError::insufficient_stock(&insufficient));
        }

        let movement_lines: Vec<MovementLine> = items
            .iter()
            .map(|item| MovementLine {
                item_code: item.item_code.clone(),
                qty: item.qty_to_transfer(),
                uom: item.uom.clone(),
            })
            .collect();

        let mut tx = app_state.db_pool.begin().await?;

        let entry_id = stock::create_stock_entry(
            &mut tx,
            EntryType::MaterialTransfer,
            Some(&transfer_id),
            &transfer.source_warehouse,
            &transfer.target_warehouse,
            &movement_lines,
            Some(&claims.sub),
        )
        .await?;

        for item in &items {
            let qty = item.qty_to_transfer();
            sqlx::query(
                r#"UPDATE transfer_request_items SET
                   accepted_qty = ?, shipped_qty = ?, received_qty = ?, pending_qty = 0.0, updated_at = ?
                   WHERE id = ?"#,
            )
            .bind(qty)
            .bind(qty)
            .bind(qty)
            .bind(now)
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"UPDATE transfer_requests SET
               approval_status = 'completed', approved_by = ?, approval_date = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&claims.sub)
        .bind(now)
        .bind(now)
        .bind(&transfer_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Internal transfer {} auto-completed, stock entry {}",
            transfer_id, entry_id
        );
        return Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            serde_json::json!({ "status": "completed", "stock_entry": entry_id }),
            format!("Completed. Stock entry {} created", entry_id),
        )));
    }

    // External: hand over to the transfer manager
    sqlx::query(
        "UPDATE transfer_requests SET approval_status = 'pending_approval', updated_at = ? WHERE id = ?",
    )
    .bind(now)
    .bind(&transfer_id)
    .execute(&app_state.db_pool)
    .await?;

    info!("Transfer {} submitted for approval by {}", transfer_id, claims.sub);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "status": "pending_approval" }),
        "Submitted for approval".to_string(),
    )))
}

pub async fn approve_transfer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<ApproveRequest>,
    claims: Claims,
) -> ApiResult<HttpResponse> {
    let transfer_id = path.into_inner();

    if !claims.role.can_approve_transfers() {
        return Err(ApiError::Forbidden(
            "Only a transfer manager can approve".to_string(),
        ));
    }

    let (transfer, mut items) = load_transfer(&app_state.db_pool, &transfer_id).await?;

    let status = parse_status(&transfer)?;
    if !status.can_transition_to(ApprovalStatus::ApprovedPendingShipment) {
        return Err(ApiError::invalid_transition("approve", &transfer.approval_status));
    }

    let overrides = body.accepted_items.clone().unwrap_or_default();

    let violations = transfer_rules::validate_accepted_overrides(&items, &overrides);
    if !violations.is_empty() {
        return Err(ApiError::quantity_violations(&violations));
    }

    // Apply overrides in memory, then persist absolute values
    for accepted in &overrides {
        if let Some(item) = items.iter_mut().find(|i| i.item_code == accepted.item_code) {
            item.accepted_qty = accepted.qty;
        }
    }

    if !transfer_rules::has_accepted_lines(&items) {
        return Err(ApiError::QuantityInvariantError(
            "Cannot approve: all items have been excluded (accepted_qty = 0)".to_string(),
        ));
    }

    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;

    for item in &items {
        sqlx::query(
            r#"UPDATE transfer_request_items SET
               accepted_qty = ?, pending_qty = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(item.accepted_qty)
        .bind(transfer_rules::pending_qty(item))
        .bind(now)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"UPDATE transfer_requests SET
           approval_status = 'approved_pending_shipment', approved_by = ?, approval_date = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&claims.sub)
    .bind(now)
    .bind(now)
    .bind(&transfer_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("Transfer {} approved by {}", transfer_id, claims.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "status": "approved_pending_shipment" }),
        "Approved successfully".to_string(),
    )))
}

pub async fn reject_transfer(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<RejectRequest>,
    claims: Claims,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let transfer_id = path.into_inner();

    if !claims.role.can_approve_transfers() {
        return Err(ApiError::Forbidden(
            "Only a transfer manager can reject".to_string(),
        ));
    }

    let (transfer, _) = load_transfer(&app_state.db_pool, &transfer_id).await?;

    let status = parse_status(&transfer)?;
    if !status.can_transition_to(ApprovalStatus::Rejected) {
        return Err(ApiError::invalid_transition("reject", &transfer.approval_status));
    }

    sqlx::query(
        r#"UPDATE transfer_requests SET
           approval_status = 'rejected', rejection_reason = ?, updated_at = ?
           WHERE id = ?"#,
    )
    .bind(&body.rejection_reason)
    .bind(Utc::now())
    .bind(&transfer_id)
    .execute(&app_state.db_pool)
    .await?;

    info!("Transfer {} rejected by {}", transfer_id, claims.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "status": "rejected" }),
        "Rejected".to_string(),
    )))
}

pub async fn mark_as_shipped(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<ShipRequest>,
    claims: Claims,
) -> ApiResult<HttpResponse> {
    let transfer_id = path.into_inner();

    if body.shipped_items.is_empty() {
        return Err(ApiError::ValidationError("Shipped items required".to_string()));
    }

    let (transfer, mut items) = load_transfer(&app_state.db_pool, &transfer_id).await?;
    let status = parse_status(&transfer)?;

    if !status.can_ship_from() {
        return Err(ApiError::invalid_transition("ship", &transfer.approval_status));
    }

    // Shipping authority is scoped to the source warehouse's group
    let source_group = warehouse_group(&app_state.db_pool, &transfer.source_warehouse).await?;
    if !claims.has_group_authority(&source_group) {
        return Err(ApiError::Forbidden(format!(
            "Only a {} warehouse manager can ship",
            source_group
        )));
    }

    let item_codes: Vec<String> = body.shipped_items.iter().map(|l| l.item_code.clone()).collect();
    let on_hand =
        stock::on_hand_map(&app_state.db_pool, &item_codes, &transfer.source_warehouse).await?;

    // All lines validate before any mutation
    transfer_rules::validate_shipment(&items, &body.shipped_items, &on_hand).into_result()?;

    for ship in &body.shipped_items {
        if let Some(item) = items.iter_mut().find(|i| i.item_code == ship.item_code) {
            item.shipped_qty += ship.qty;
        }
    }

    let movement_lines: Vec<MovementLine> = body
        .shipped_items
        .iter()
        .map(|ship| {
            let uom = items
                .iter()
                .find(|i| i.item_code == ship.item_code)
                .map(|i| i.uom.clone())
                .unwrap_or_else(|| "Nos".to_string());
            MovementLine {
                item_code: ship.item_code.clone(),
                qty: ship.qty,
                uom,
            }
        })
        .collect();

    let new_status = transfer_rules::status_after_shipment(&items);
    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;

    for item in &items {
        sqlx::query(
            r#"UPDATE transfer_request_items SET
               shipped_qty = ?, pending_qty = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(item.shipped_qty)
        .bind(transfer_rules::pending_qty(item))
        .bind(now)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;
    }

    // Dispatch record only; physical custody changes at receipt
    let entry_id = stock::create_stock_entry(
        &mut tx,
        EntryType::ShipmentDispatch,
        Some(&transfer_id),
        &transfer.source_warehouse,
        &transfer.target_warehouse,
        &movement_lines,
        Some(&claims.sub),
    )
    .await?;

    sqlx::query(
        "UPDATE transfer_requests SET approval_status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(new_status.as_str())
    .bind(now)
    .bind(&transfer_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        "Transfer {} shipment recorded by {} (entry {}, status {})",
        transfer_id, claims.username, entry_id, new_status
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "status": new_status.as_str(), "stock_entry": entry_id }),
        "Shipment recorded successfully".to_string(),
    )))
}

pub async fn confirm_receipt(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<ReceiveRequest>,
    claims: Claims,
) -> ApiResult<HttpResponse> {
    let transfer_id = path.into_inner();

    if body.received_items.is_empty() {
        return Err(ApiError::ValidationError("Received items required".to_string()));
    }

    let (transfer, mut items) = load_transfer(&app_state.db_pool, &transfer_id).await?;
    let status = parse_status(&transfer)?;

    if !status.can_receive_from() {
        return Err(ApiError::invalid_transition("receive", &transfer.approval_status));
    }

    // Receiving authority is scoped to the target warehouse's group
    let target_group = warehouse_group(&app_state.db_pool, &transfer.target_warehouse).await?;
    if !claims.has_group_authority(&target_group) {
        return Err(ApiError::Forbidden(format!(
            "Only a {} warehouse manager can receive",
            target_group
        )));
    }

    let item_codes: Vec<String> = body.received_items.iter().map(|l| l.item_code.clone()).collect();
    // Stock still sits at the source until this movement posts, hence the
    // source-side availability check
    let on_hand =
        stock::on_hand_map(&app_state.db_pool, &item_codes, &transfer.source_warehouse).await?;

    transfer_rules::validate_receipt(&items, &body.received_items, &on_hand).into_result()?;

    for recv in &body.received_items {
        if let Some(item) = items.iter_mut().find(|i| i.item_code == recv.item_code) {
            item.received_qty += recv.qty;
        }
    }

    let movement_lines: Vec<MovementLine> = body
        .received_items
        .iter()
        .map(|recv| {
            let uom = items
                .iter()
                .find(|i| i.item_code == recv.item_code)
                .map(|i| i.uom.clone())
                .unwrap_or_else(|| "Nos".to_string());
            MovementLine {
                item_code: recv.item_code.clone(),
                qty: recv.qty,
                uom,
            }
        })
        .collect();

    let new_status = transfer_rules::status_after_receipt(&items);
    let now = Utc::now();
    let mut tx = app_state.db_pool.begin().await?;

    for item in &items {
        sqlx::query(
            r#"UPDATE transfer_request_items SET
               received_qty = ?, pending_qty = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(item.received_qty)
        .bind(transfer_rules::pending_qty(item))
        .bind(now)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;
    }

    // The physical movement for exactly the newly received quantities
    let entry_id = stock::create_stock_entry(
        &mut tx,
        EntryType::MaterialTransfer,
        Some(&transfer_id),
        &transfer.source_warehouse,
        &transfer.target_warehouse,
        &movement_lines,
        Some(&claims.sub),
    )
    .await?;

    sqlx::query(
        "UPDATE transfer_requests SET approval_status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(new_status.as_str())
    .bind(now)
    .bind(&transfer_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        "Transfer {} receipt confirmed by {} (entry {}, status {})",
        transfer_id, claims.username, entry_id, new_status
    );

    let message = if new_status == ApprovalStatus::Completed {
        "Transfer completed"
    } else {
        "Partial receipt confirmed"
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "status": new_status.as_str(), "stock_entry": entry_id }),
        message.to_string(),
    )))
}

pub async fn get_accepted_qty(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (transfer_id, item_code) = path.into_inner();

    let row: Option<(f64, f64)> = sqlx::query_as(
        "SELECT accepted_qty, shipped_qty FROM transfer_request_items WHERE transfer_id = ? AND item_code = ?",
    )
    .bind(&transfer_id)
    .bind(&item_code)
    .fetch_optional(&app_state.db_pool)
    .await?;

    match row {
        Some((accepted_qty, shipped_qty)) => Ok(HttpResponse::Ok().json(ApiResponse::success(
            AcceptedQtyResponse { accepted_qty, shipped_qty },
        ))),
        None => Err(ApiError::line_not_found(&transfer_id, &item_code)),
    }
}

// ==================== BULK LINE VALIDATION ====================

/// Validate upload lines before a transfer request is created. Reports every
/// problem with its spreadsheet line number (data starts at row 2).
pub async fn validate_items(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<ValidateItemsRequest>,
) -> ApiResult<HttpResponse> {
    let mut errors: Vec<String> = Vec::new();
    let mut validated_items: Vec<ValidatedLine> = Vec::new();
    let mut seen_items: HashSet<String> = HashSet::new();

    for (idx, line) in body.items.iter().enumerate() {
        let line_num = idx + 2;
        let item_code = line.item_code.clone().unwrap_or_default().trim().to_string();
        let requested_qty = line.requested_qty;
        let requester_notes: String = line
            .requester_notes
            .clone()
            .unwrap_or_default()
            .trim()
            .chars()
            .take(REQUESTER_NOTES_MAX)
            .collect();

        // Skip empty rows
        if item_code.is_empty() && requested_qty.is_none() {
            continue;
        }

        if item_code.is_empty() {
            errors.push(format!("Line {}: Item code is required", line_num));
            continue;
        }

        let qty = match requested_qty {
            Some(qty) if qty > 0.0 => qty,
            _ => {
                errors.push(format!(
                    "Line {}: Quantity must be greater than 0 for item {}",
                    line_num, item_code
                ));
                continue;
            }
        };

        if qty.fract() != 0.0 {
            errors.push(format!(
                "Line {}: Quantity must be a whole number for item {}",
                line_num, item_code
            ));
            continue;
        }

        if !seen_items.insert(item_code.clone()) {
            errors.push(format!(
                "Line {}: Duplicate item code {} found in upload",
                line_num, item_code
            ));
            continue;
        }

        let item: Option<Item> = sqlx::query_as("SELECT * FROM items WHERE item_code = ?")
            .bind(&item_code)
            .fetch_optional(&app_state.db_pool)
            .await?;

        let item = match item {
            Some(item) => item,
            None => {
                errors.push(format!(
                    "Line {}: Item {} does not exist in the item master",
                    line_num, item_code
                ));
                continue;
            }
        };

        let available_qty = match body.source_warehouse {
            Some(ref source) => stock::get_actual_qty(&app_state.db_pool, &item_code, source).await?,
            None => 0.0,
        };

        if let Some(ref source) = body.source_warehouse {
            if available_qty < qty {
                errors.push(format!(
                    "Line {}: Insufficient stock for {} in {}. Available: {}, Requested: {}",
                    line_num, item_code, source, available_qty, qty
                ));
                continue;
            }
        }

        let available_qty_target = match body.target_warehouse {
            Some(ref target) => stock::get_actual_qty(&app_state.db_pool, &item_code, target).await?,
            None => 0.0,
        };

        validated_items.push(ValidatedLine {
            item_code,
            item_name: item.item_name,
            requested_qty: qty,
            uom: item.stock_uom,
            available_qty,
            available_qty_target,
            requester_notes,
        });
    }

    if !errors.is_empty() {
        validated_items.clear();
    }

    Ok(HttpResponse::Ok().json(ApiResponse::success(ValidateItemsResponse {
        errors,
        validated_items,
    })))
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::config::Config;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    // Single connection keeps every query on the same in-memory database
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        crate::db::run_migrations(&pool).await.expect("migrations");
        crate::db::seed_warehouses(&pool, &Config::default())
            .await
            .expect("seed warehouses");
        pool
    }

    async fn seed_user(pool: &SqlitePool, id: &str, role: &str, warehouse_group: Option<&str>) {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO users (
                id, username, email, password_hash, role, warehouse_group, is_active,
                created_at, updated_at, failed_login_attempts
            ) VALUES (?, ?, ?, 'x', ?, ?, 1, ?, ?, 0)"#,
        )
        .bind(id)
        .bind(id)
        .bind(format!("{}@wms.local", id))
        .bind(role)
        .bind(warehouse_group)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .expect("seed user");
    }

    async fn seed_item(pool: &SqlitePool, item_code: &str) {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO items (item_code, item_name, stock_uom, status, created_at, updated_at)
               VALUES (?, ?, 'Nos', 'active', ?, ?)"#,
        )
        .bind(item_code)
        .bind(format!("{} name", item_code))
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .expect("seed item");
    }

    fn claims(user_id: &str, role: UserRole, warehouse_group: Option<&str>) -> Claims {
        Claims {
            sub: user_id.to_string(),
            username: user_id.to_string(),
            email: format!("{}@wms.local", user_id),
            role,
            warehouse_group: warehouse_group.map(|s| s.to_string()),
            exp: 0,
            iat: 0,
        }
    }

    fn app_state(pool: SqlitePool) -> web::Data<Arc<AppState>> {
        web::Data::new(Arc::new(AppState {
            db_pool: pool,
            config: Config::default(),
        }))
    }

    async fn create_draft(
        state: &web::Data<Arc<AppState>>,
        source: &str,
        target: &str,
        items: Vec<(&str, f64)>,
    ) -> String {
        let request = CreateTransferRequest {
            source_warehouse: source.to_string(),
            target_warehouse: target.to_string(),
            items: items
                .into_iter()
                .map(|(item_code, qty)| CreateTransferItemRequest {
                    item_code: item_code.to_string(),
                    requested_qty: qty,
                    requester_notes: None,
                })
                .collect(),
        };

        let response = create_transfer(state.clone(), web::Json(request), "requester".to_string())
            .await
            .expect("create transfer");
        assert_eq!(response.status(), actix_web::http::StatusCode::CREATED);

        let row: (String,) = sqlx::query_as(
            "SELECT id FROM transfer_requests ORDER BY created_at DESC, id LIMIT 1",
        )
        .fetch_one(&state.db_pool)
        .await
        .expect("created transfer id");
        row.0
    }

    async fn transfer_status(pool: &SqlitePool, transfer_id: &str) -> String {
        let row: (String,) =
            sqlx::query_as("SELECT approval_status FROM transfer_requests WHERE id = ?")
                .bind(transfer_id)
                .fetch_one(pool)
                .await
                .expect("status");
        row.0
    }

    async fn line_quantities(pool: &SqlitePool, transfer_id: &str, item_code: &str) -> (f64, f64, f64, f64, f64) {
        sqlx::query_as(
            r#"SELECT requested_qty, accepted_qty, shipped_qty, received_qty, pending_qty
               FROM transfer_request_items WHERE transfer_id = ? AND item_code = ?"#,
        )
        .bind(transfer_id)
        .bind(item_code)
        .fetch_one(pool)
        .await
        .expect("line")
    }

    #[tokio::test]
    async fn test_create_defaults_accepted_to_requested() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 100.0)]).await;

        assert_eq!(transfer_status(&pool, &transfer_id).await, "draft");
        let (requested, accepted, shipped, received, pending) =
            line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(requested, 100.0);
        assert_eq!(accepted, 100.0);
        assert_eq!(shipped, 0.0);
        assert_eq!(received, 0.0);
        assert_eq!(pending, 100.0);

        let row: (String,) = sqlx::query_as("SELECT transfer_type FROM transfer_requests WHERE id = ?")
            .bind(&transfer_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, "external");
    }

    #[tokio::test]
    async fn test_create_rejects_incompatible_pair() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        let state = app_state(pool.clone());

        // Damage (Main group) -> Store Display (Store group): neither internal nor external
        let request = CreateTransferRequest {
            source_warehouse: "Damage".to_string(),
            target_warehouse: "Store Display".to_string(),
            items: vec![CreateTransferItemRequest {
                item_code: "ITM-001".to_string(),
                requested_qty: 5.0,
                requester_notes: None,
            }],
        };

        let err = create_transfer(state, web::Json(request), "requester".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IncompatibleWarehousePair(_)));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transfer_requests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_internal_fast_path_completes_and_moves_stock() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 50.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Damage", vec![("ITM-001", 20.0)]).await;
        let response = submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .expect("submit");
        assert_eq!(response.status(), actix_web::http::StatusCode::OK);

        assert_eq!(transfer_status(&pool, &transfer_id).await, "completed");
        let (_, accepted, shipped, received, pending) =
            line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(shipped, accepted);
        assert_eq!(received, accepted);
        assert_eq!(pending, 0.0);

        // one movement, bins moved
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Main Warehouse").await.unwrap(), 30.0);
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Damage").await.unwrap(), 20.0);
        let entries: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM stock_entries WHERE transfer_id = ? AND entry_type = 'material_transfer'",
        )
        .bind(&transfer_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(entries.0, 1);
    }

    #[tokio::test]
    async fn test_internal_insufficient_stock_mutates_nothing() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 5.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Damage", vec![("ITM-001", 20.0)]).await;
        let err = submit_for_approval(
            state,
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientStock(_)));

        assert_eq!(transfer_status(&pool, &transfer_id).await, "draft");
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Main Warehouse").await.unwrap(), 5.0);
    }

    async fn seed_workflow_users(pool: &SqlitePool) {
        seed_user(pool, "requester", "warehouse_manager", Some("Main")).await;
        seed_user(pool, "approver", "transfer_manager", None).await;
        seed_user(pool, "main_mgr", "warehouse_manager", Some("Main")).await;
        seed_user(pool, "store_mgr", "warehouse_manager", Some("Store")).await;
    }

    #[tokio::test]
    async fn test_full_external_flow() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 100.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 100.0)]).await;

        // submit
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .expect("submit");
        assert_eq!(transfer_status(&pool, &transfer_id).await, "pending_approval");

        // approve with accepted 60
        approve_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest {
                accepted_items: Some(vec![QtyLine { item_code: "ITM-001".to_string(), qty: 60.0 }]),
            }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .expect("approve");
        assert_eq!(transfer_status(&pool, &transfer_id).await, "approved_pending_shipment");
        let (_, accepted, _, _, pending) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(accepted, 60.0);
        assert_eq!(pending, 60.0);

        // ship 60 (source group = Main)
        mark_as_shipped(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ShipRequest {
                shipped_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 60.0 }],
            }),
            claims("main_mgr", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .expect("ship");
        assert_eq!(transfer_status(&pool, &transfer_id).await, "shipped");
        let (_, _, shipped, _, pending) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(shipped, 60.0);
        assert_eq!(pending, 60.0);
        // dispatch record does not move stock yet
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Main Warehouse").await.unwrap(), 100.0);

        // receive 60 (target group = Store)
        confirm_receipt(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ReceiveRequest {
                received_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 60.0 }],
            }),
            claims("store_mgr", UserRole::WarehouseManager, Some("Store")),
        )
        .await
        .expect("receive");
        assert_eq!(transfer_status(&pool, &transfer_id).await, "completed");
        let (_, _, shipped, received, pending) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(shipped, 60.0);
        assert_eq!(received, 60.0);
        assert_eq!(pending, 0.0);

        // movement happened exactly once, for the received quantity
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Main Warehouse").await.unwrap(), 40.0);
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Store Warehouse").await.unwrap(), 60.0);
    }

    #[tokio::test]
    async fn test_partial_shipment_then_full() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 100.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 100.0)]).await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();
        approve_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest {
                accepted_items: Some(vec![QtyLine { item_code: "ITM-001".to_string(), qty: 60.0 }]),
            }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap();

        let ship = |qty: f64| {
            mark_as_shipped(
                state.clone(),
                web::Path::from(transfer_id.clone()),
                web::Json(ShipRequest {
                    shipped_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty }],
                }),
                claims("main_mgr", UserRole::WarehouseManager, Some("Main")),
            )
        };

        ship(30.0).await.expect("first shipment");
        assert_eq!(transfer_status(&pool, &transfer_id).await, "partially_shipped");
        let (_, _, shipped, _, pending) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(shipped, 30.0);
        assert_eq!(pending, 30.0);

        ship(30.0).await.expect("second shipment");
        assert_eq!(transfer_status(&pool, &transfer_id).await, "shipped");
    }

    #[tokio::test]
    async fn test_overshipment_rejected_and_unchanged() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 100.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();
        approve_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest { accepted_items: None }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap();

        // ship 8 of accepted 10
        mark_as_shipped(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ShipRequest {
                shipped_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 8.0 }],
            }),
            claims("main_mgr", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();

        // 5 more would exceed accepted
        let err = mark_as_shipped(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ShipRequest {
                shipped_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 5.0 }],
            }),
            claims("main_mgr", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::QuantityInvariantError(_)));
        assert!(err.to_string().contains("Maximum can ship: 2"));

        let (_, _, shipped, _, _) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(shipped, 8.0);
        assert_eq!(transfer_status(&pool, &transfer_id).await, "partially_shipped");
    }

    #[tokio::test]
    async fn test_approve_over_allocation_rejected() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();

        let err = approve_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest {
                accepted_items: Some(vec![QtyLine { item_code: "ITM-001".to_string(), qty: 20.0 }]),
            }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::QuantityInvariantError(_)));

        // nothing on the line changed
        let (_, accepted, _, _, _) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(accepted, 10.0);
        assert_eq!(transfer_status(&pool, &transfer_id).await, "pending_approval");
    }

    #[tokio::test]
    async fn test_approve_all_items_excluded_rejected() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        seed_item(&pool, "ITM-002").await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(
            &state,
            "Main Warehouse",
            "Store Warehouse",
            vec![("ITM-001", 10.0), ("ITM-002", 5.0)],
        )
        .await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();

        let err = approve_transfer(
            state,
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest {
                accepted_items: Some(vec![
                    QtyLine { item_code: "ITM-001".to_string(), qty: 0.0 },
                    QtyLine { item_code: "ITM-002".to_string(), qty: 0.0 },
                ]),
            }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("all items have been excluded"));
        assert_eq!(transfer_status(&pool, &transfer_id).await, "pending_approval");
    }

    #[tokio::test]
    async fn test_approve_requires_capability() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();

        let err = approve_transfer(
            state,
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest { accepted_items: None }),
            claims("main_mgr", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_ship_requires_source_group_authority() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 100.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();
        approve_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest { accepted_items: None }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap();

        // store manager cannot ship from the main group
        let err = mark_as_shipped(
            state,
            web::Path::from(transfer_id.clone()),
            web::Json(ShipRequest {
                shipped_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 5.0 }],
            }),
            claims("store_mgr", UserRole::WarehouseManager, Some("Store")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_reject_only_from_pending_approval() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;

        // rejecting a draft fails and changes nothing
        let err = reject_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(RejectRequest { rejection_reason: "not needed".to_string() }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::StateError(_)));
        assert_eq!(transfer_status(&pool, &transfer_id).await, "draft");

        // from pending approval it lands in the terminal state
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();
        reject_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(RejectRequest { rejection_reason: "budget freeze".to_string() }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap();
        assert_eq!(transfer_status(&pool, &transfer_id).await, "rejected");

        // terminal: a second reject fails
        let err = reject_transfer(
            state,
            web::Path::from(transfer_id.clone()),
            web::Json(RejectRequest { rejection_reason: "again".to_string() }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::StateError(_)));
    }

    #[tokio::test]
    async fn test_receipt_capped_by_shipped() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 100.0).await.unwrap();
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;
        submit_for_approval(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();
        approve_transfer(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ApproveRequest { accepted_items: None }),
            claims("approver", UserRole::TransferManager, None),
        )
        .await
        .unwrap();
        mark_as_shipped(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ShipRequest {
                shipped_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 10.0 }],
            }),
            claims("main_mgr", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap();

        let err = confirm_receipt(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ReceiveRequest {
                received_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 12.0 }],
            }),
            claims("store_mgr", UserRole::WarehouseManager, Some("Store")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::QuantityInvariantError(_)));

        // partial receipt then completion
        confirm_receipt(
            state.clone(),
            web::Path::from(transfer_id.clone()),
            web::Json(ReceiveRequest {
                received_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 4.0 }],
            }),
            claims("store_mgr", UserRole::WarehouseManager, Some("Store")),
        )
        .await
        .unwrap();
        assert_eq!(transfer_status(&pool, &transfer_id).await, "partially_completed");
        let (_, _, _, received, pending) = line_quantities(&pool, &transfer_id, "ITM-001").await;
        assert_eq!(received, 4.0);
        assert_eq!(pending, 6.0);

        confirm_receipt(
            state,
            web::Path::from(transfer_id.clone()),
            web::Json(ReceiveRequest {
                received_items: vec![QtyLine { item_code: "ITM-001".to_string(), qty: 6.0 }],
            }),
            claims("store_mgr", UserRole::WarehouseManager, Some("Store")),
        )
        .await
        .unwrap();
        assert_eq!(transfer_status(&pool, &transfer_id).await, "completed");
        assert_eq!(stock::get_actual_qty(&pool, "ITM-001", "Store Warehouse").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_submit_without_items_rejected() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![]).await;
        let err = submit_for_approval(
            state,
            web::Path::from(transfer_id),
            claims("requester", UserRole::WarehouseManager, Some("Main")),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("without items"));
    }

    #[tokio::test]
    async fn test_get_accepted_qty_endpoint() {
        let pool = test_pool().await;
        seed_workflow_users(&pool).await;
        seed_item(&pool, "ITM-001").await;
        let state = app_state(pool.clone());

        let transfer_id = create_draft(&state, "Main Warehouse", "Store Warehouse", vec![("ITM-001", 10.0)]).await;

        let response = get_accepted_qty(
            state.clone(),
            web::Path::from((transfer_id.clone(), "ITM-001".to_string())),
        )
        .await
        .expect("accepted qty");
        assert_eq!(response.status(), actix_web::http::StatusCode::OK);

        let err = get_accepted_qty(state, web::Path::from((transfer_id, "MISSING".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validate_items_reports_every_line() {
        let pool = test_pool().await;
        seed_item(&pool, "ITM-001").await;
        stock::set_bin_qty(&pool, "ITM-001", "Main Warehouse", 3.0).await.unwrap();
        let state = app_state(pool.clone());

        let body = ValidateItemsRequest {
            source_warehouse: Some("Main Warehouse".to_string()),
            target_warehouse: None,
            items: vec![
                // row 2: missing code
                UploadLine { item_code: None, requested_qty: Some(5.0), requester_notes: None },
                // row 3: fractional quantity
                UploadLine {
                    item_code: Some("ITM-001".to_string()),
                    requested_qty: Some(1.5),
                    requester_notes: None,
                },
                // row 4: unknown item
                UploadLine {
                    item_code: Some("GHOST".to_string()),
                    requested_qty: Some(2.0),
                    requester_notes: None,
                },
                // row 5: more than on hand
                UploadLine {
                    item_code: Some("ITM-001".to_string()),
                    requested_qty: Some(10.0),
                    requester_notes: None,
                },
            ],
        };

        let response = validate_items(state, web::Json(body)).await.expect("validate");
        let bytes = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let errors = json["data"]["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].as_str().unwrap().starts_with("Line 2:"));
        assert!(errors[3].as_str().unwrap().starts_with("Line 5:"));
        assert!(json["data"]["validated_items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audit_log_write() {
        let pool = test_pool().await;
        crate::audit::log_activity(
            &pool,
            Some("user-1"),
            "approve",
            "transfer_request",
            Some("TR-1"),
            Some("Transfer TR-1 approved"),
            None,
            None,
        )
        .await
        .expect("audit write");

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM audit_logs WHERE entity_type = 'transfer_request' AND action = 'approve'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }
}
