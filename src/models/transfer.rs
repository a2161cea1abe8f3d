// src/models/transfer.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

/// Максимальная длина примечания заявителя (лишнее обрезается при вводе)
pub const REQUESTER_NOTES_MAX: usize = 55;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct TransferRequest {
    pub id: String,
    pub source_warehouse: String,
    pub target_warehouse: String,
    pub transfer_type: String,
    pub approval_status: String,
    pub requested_by: String,
    pub requested_date: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approval_date: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct TransferItem {
    pub id: String,
    pub transfer_id: String,
    pub item_code: String,
    pub uom: String,
    pub requested_qty: f64,
    pub accepted_qty: f64,
    pub shipped_qty: f64,
    pub received_qty: f64,
    pub pending_qty: f64,
    pub requester_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferItem {
    /// Line excluded by the approver (soft delete)
    pub fn is_excluded(&self) -> bool {
        self.accepted_qty == 0.0
    }

    /// Quantity the internal fast path moves: accepted, falling back to requested
    pub fn qty_to_transfer(&self) -> f64 {
        if self.accepted_qty > 0.0 {
            self.accepted_qty
        } else {
            self.requested_qty
        }
    }
}

// ==================== REQUEST / RESPONSE STRUCTS ====================

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateTransferItemRequest {
    #[validate(length(min = 1, max = 100, message = "Item code must be between 1 and 100 characters"))]
    pub item_code: String,
    #[validate(range(min = 0.001, message = "Requested quantity must be positive"))]
    pub requested_qty: f64,
    pub requester_notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateTransferRequest {
    #[validate(length(min = 1, max = 255, message = "Source warehouse is required"))]
    pub source_warehouse: String,
    #[validate(length(min = 1, max = 255, message = "Target warehouse is required"))]
    pub target_warehouse: String,
    #[validate(nested)]
    pub items: Vec<CreateTransferItemRequest>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct UpdateTransferRequest {
    pub source_warehouse: Option<String>,
    pub target_warehouse: Option<String>,
    #[validate(nested)]
    pub items: Option<Vec<CreateTransferItemRequest>>,
}

/// Пара (товар, количество) для approve / ship / receive
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QtyLine {
    pub item_code: String,
    pub qty: f64,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub accepted_items: Option<Vec<QtyLine>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(min = 1, message = "Rejection reason required"))]
    pub rejection_reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ShipRequest {
    pub shipped_items: Vec<QtyLine>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub received_items: Vec<QtyLine>,
}

#[derive(Debug, Serialize)]
pub struct TransferWithItems {
    #[serde(flatten)]
    pub transfer: TransferRequest,
    pub items: Vec<TransferItem>,
}

#[derive(Debug, Serialize)]
pub struct AcceptedQtyResponse {
    pub accepted_qty: f64,
    pub shipped_qty: f64,
}

#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub transfer_type: Option<String>,
    pub source_warehouse: Option<String>,
    pub target_warehouse: Option<String>,
    pub requested_by: Option<String>,
}

impl TransferQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

// ==================== BULK LINE VALIDATION ====================

#[derive(Debug, Deserialize)]
pub struct ValidateItemsRequest {
    pub items: Vec<UploadLine>,
    pub source_warehouse: Option<String>,
    pub target_warehouse: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadLine {
    pub item_code: Option<String>,
    pub requested_qty: Option<f64>,
    pub requester_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidatedLine {
    pub item_code: String,
    pub item_name: String,
    pub requested_qty: f64,
    pub uom: String,
    pub available_qty: f64,
    pub available_qty_target: f64,
    pub requester_notes: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateItemsResponse {
    pub errors: Vec<String>,
    pub validated_items: Vec<ValidatedLine>,
}
