// src/transfer_rules.rs
//! Правила жизненного цикла заявки на перемещение: статусы, совместимость
//! складов и инварианты количеств. Чистая логика без доступа к БД —
//! обработчики загружают строки, прогоняют их через эти проверки и пишут
//! результат в одной транзакции.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::TransferRulesConfig;
use crate::error::ApiError;
use crate::models::transfer::{QtyLine, TransferItem};

// ==================== APPROVAL STATUS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Draft,
    PendingApproval,
    ApprovedPendingShipment,
    PartiallyShipped,
    Shipped,
    PartiallyCompleted,
    Completed,
    Rejected,
}

impl ApprovalStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_approval" => Some(Self::PendingApproval),
            "approved_pending_shipment" => Some(Self::ApprovedPendingShipment),
            "partially_shipped" => Some(Self::PartiallyShipped),
            "shipped" => Some(Self::Shipped),
            "partially_completed" => Some(Self::PartiallyCompleted),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::ApprovedPendingShipment => "approved_pending_shipment",
            Self::PartiallyShipped => "partially_shipped",
            Self::Shipped => "shipped",
            Self::PartiallyCompleted => "partially_completed",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Check if transition is valid
    pub fn can_transition_to(&self, target: ApprovalStatus) -> bool {
        use ApprovalStatus::*;

        match (self, target) {
            // From Draft: external submit, or internal fast path
            (Draft, PendingApproval) => true,
            (Draft, Completed) => true,

            // From Pending Approval
            (PendingApproval, ApprovedPendingShipment) => true,
            (PendingApproval, Rejected) => true,

            // Shipping
            (ApprovedPendingShipment, PartiallyShipped) => true,
            (ApprovedPendingShipment, Shipped) => true,
            (PartiallyShipped, PartiallyShipped) => true,
            (PartiallyShipped, Shipped) => true,

            // Receiving
            (Shipped, PartiallyCompleted) => true,
            (Shipped, Completed) => true,
            (PartiallyCompleted, PartiallyCompleted) => true,
            (PartiallyCompleted, Completed) => true,

            // Terminal states cannot transition
            (Completed, _) => false,
            (Rejected, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalStatus::Completed | ApprovalStatus::Rejected)
    }

    pub fn can_ship_from(&self) -> bool {
        matches!(self, ApprovalStatus::ApprovedPendingShipment | ApprovalStatus::PartiallyShipped)
    }

    pub fn can_receive_from(&self) -> bool {
        matches!(self, ApprovalStatus::Shipped | ApprovalStatus::PartiallyCompleted)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==================== TRANSFER TYPE ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Internal,
    External,
}

impl TransferType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

impl std::fmt::Display for TransferType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==================== WAREHOUSE COMPATIBILITY ====================

/// Таблица совместимости складов, построенная из конфигурации.
/// Internal разрешён только внутри одной группы, External — только между
/// двумя назначенными внешними складами.
#[derive(Debug, Clone)]
pub struct WarehouseRules {
    groups: Vec<(String, Vec<String>)>,
    external_warehouses: Vec<String>,
    hold_warehouses: Vec<String>,
}

impl WarehouseRules {
    pub fn from_config(config: &TransferRulesConfig) -> Self {
        Self {
            groups: config
                .internal_groups
                .iter()
                .map(|g| (g.name.clone(), g.warehouses.clone()))
                .collect(),
            external_warehouses: config.external_warehouses.clone(),
            hold_warehouses: config.hold_warehouses.clone(),
        }
    }

    /// Parent group for a warehouse, if it belongs to one
    pub fn group_of(&self, warehouse: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, members)| members.iter().any(|w| w == warehouse))
            .map(|(name, _)| name.as_str())
    }

    pub fn is_hold(&self, warehouse: &str) -> bool {
        self.hold_warehouses.iter().any(|w| w == warehouse)
    }

    /// Determine the transfer type for a warehouse pair, or reject the pair.
    pub fn classify(&self, source: &str, target: &str) -> Result<TransferType, ApiError> {
        if source.is_empty() || target.is_empty() {
            return Err(ApiError::ValidationError(
                "Source and Target warehouses are required".to_string(),
            ));
        }

        if source == target {
            return Err(ApiError::ValidationError(
                "Source and Target warehouses must be different".to_string(),
            ));
        }

        for warehouse in [source, target] {
            if self.is_hold(warehouse) {
                return Err(ApiError::IncompatibleWarehousePair(format!(
                    "Hold warehouse '{}' cannot be used in transfers",
                    warehouse
                )));
            }
        }

        let source_group = self.group_of(source);
        let target_group = self.group_of(target);

        match (source_group, target_group) {
            (Some(sg), Some(tg)) if sg == tg => Ok(TransferType::Internal),
            _ => self.classify_external(source, target, source_group),
        }
    }

    fn classify_external(
        &self,
        source: &str,
        target: &str,
        source_group: Option<&str>,
    ) -> Result<TransferType, ApiError> {
        let source_external = self.external_warehouses.iter().any(|w| w == source);
        let target_external = self.external_warehouses.iter().any(|w| w == target);

        if source_external && target_external {
            return Ok(TransferType::External);
        }

        if source_group.is_none() && !source_external {
            return Err(ApiError::IncompatibleWarehousePair(format!(
                "Source warehouse '{}' is not part of any configured warehouse group",
                source
            )));
        }

        if !source_external {
            // Source sits in a group, so the only legal move is internal
            let valid_targets: Vec<&str> = self
                .groups
                .iter()
                .find(|(name, _)| Some(name.as_str()) == source_group)
                .map(|(_, members)| {
                    members.iter().map(|s| s.as_str()).filter(|w| *w != source).collect()
                })
                .unwrap_or_default();

            return Err(ApiError::IncompatibleWarehousePair(format!(
                "For an internal transfer with source '{}', target must be one of: {}",
                source,
                valid_targets.join(", ")
            )));
        }

        Err(ApiError::IncompatibleWarehousePair(format!(
            "Target warehouse '{}' is not valid for an external transfer. Must be: {}",
            target,
            self.external_warehouses.join(" or ")
        )))
    }
}

// ==================== QUANTITY INVARIANTS ====================

/// Pending по этапу: после начала отгрузки — shipped - received,
/// до неё — accepted - shipped.
pub fn pending_qty(item: &TransferItem) -> f64 {
    if item.shipped_qty > 0.0 {
        item.shipped_qty - item.received_qty
    } else {
        item.accepted_qty - item.shipped_qty
    }
}

/// Every invariant violation on a single line. Empty vec = line is consistent.
pub fn line_violations(item: &TransferItem) -> Vec<String> {
    let mut violations = Vec::new();

    for (field, value) in [
        ("requested", item.requested_qty),
        ("accepted", item.accepted_qty),
        ("shipped", item.shipped_qty),
        ("received", item.received_qty),
    ] {
        if value < 0.0 {
            violations.push(format!(
                "{} quantity cannot be negative for {}",
                field, item.item_code
            ));
        }
    }

    if item.accepted_qty > item.requested_qty {
        violations.push(format!(
            "Accepted quantity ({}) cannot exceed requested quantity ({}) for {}",
            item.accepted_qty, item.requested_qty, item.item_code
        ));
    }

    if item.shipped_qty > item.accepted_qty {
        violations.push(format!(
            "Shipped quantity ({}) cannot exceed accepted quantity ({}) for {}",
            item.shipped_qty, item.accepted_qty, item.item_code
        ));
    }

    if item.shipped_qty > 0.0 && item.received_qty > item.shipped_qty {
        violations.push(format!(
            "Received quantity ({}) cannot exceed shipped quantity ({}) for {}",
            item.received_qty, item.shipped_qty, item.item_code
        ));
    }

    if item.shipped_qty == 0.0 && item.received_qty > 0.0 {
        violations.push(format!(
            "Cannot receive items before they are shipped. Item: {}",
            item.item_code
        ));
    }

    violations
}

/// At least one line must survive approval with accepted_qty > 0
pub fn has_accepted_lines(items: &[TransferItem]) -> bool {
    items.iter().any(|item| item.accepted_qty > 0.0)
}

/// Validate approver overrides without mutating anything.
pub fn validate_accepted_overrides(items: &[TransferItem], overrides: &[QtyLine]) -> Vec<String> {
    let mut violations = Vec::new();

    for accepted in overrides {
        if accepted.qty < 0.0 {
            violations.push(format!(
                "Accepted quantity cannot be negative for {}",
                accepted.item_code
            ));
            continue;
        }

        match items.iter().find(|item| item.item_code == accepted.item_code) {
            None => violations.push(format!(
                "Item '{}' not found in transfer request",
                accepted.item_code
            )),
            Some(item) => {
                if accepted.qty > item.requested_qty {
                    violations.push(format!(
                        "Accepted quantity ({}) cannot exceed requested quantity ({}) for {}",
                        accepted.qty, item.requested_qty, accepted.item_code
                    ));
                }
            }
        }
    }

    violations
}

/// Stock check for the internal fast path: every line needs enough on-hand
/// stock at the source for its full transfer quantity.
pub fn validate_internal_stock(
    items: &[TransferItem],
    on_hand: &HashMap<String, f64>,
) -> Vec<String> {
    let mut insufficient = Vec::new();

    for item in items {
        let required = item.qty_to_transfer();
        let available = on_hand.get(&item.item_code).copied().unwrap_or(0.0);
        if available < required {
            insufficient.push(format!(
                "{}: Available={}, Required={}",
                item.item_code, available, required
            ));
        }
    }

    insufficient
}

/// Violations found before applying a shipment or receipt batch, split by
/// class so the handler can raise the matching error variant.
#[derive(Debug, Default)]
pub struct BatchViolations {
    pub quantity: Vec<String>,
    pub stock: Vec<String>,
}

impl BatchViolations {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_empty() && self.stock.is_empty()
    }

    /// All checks ran; report every violation at once.
    pub fn into_result(self) -> Result<(), ApiError> {
        if !self.quantity.is_empty() {
            let mut all = self.quantity;
            all.extend(self.stock);
            return Err(ApiError::quantity_violations(&all));
        }
        if !self.stock.is_empty() {
            return Err(ApiError::insufficient_stock(&self.stock));
        }
        Ok(())
    }
}

/// Validate a shipment batch against the request lines and source stock.
/// Nothing is mutated; all lines validate before any write happens.
pub fn validate_shipment(
    items: &[TransferItem],
    lines: &[QtyLine],
    on_hand: &HashMap<String, f64>,
) -> BatchViolations {
    let mut violations = BatchViolations::default();

    for ship in lines {
        if ship.qty <= 0.0 {
            violations.quantity.push(format!(
                "Shipping quantity must be greater than 0 for {}",
                ship.item_code
            ));
            continue;
        }

        let item = match items.iter().find(|item| item.item_code == ship.item_code) {
            Some(item) => item,
            None => {
                violations.quantity.push(format!(
                    "Item '{}' not found in transfer request",
                    ship.item_code
                ));
                continue;
            }
        };

        if item.is_excluded() {
            violations.quantity.push(format!(
                "Cannot ship {} - item was excluded by the approver (accepted_qty = 0)",
                ship.item_code
            ));
            continue;
        }

        let new_total_shipped = item.shipped_qty + ship.qty;
        if new_total_shipped > item.accepted_qty {
            violations.quantity.push(format!(
                "Cannot ship {} more of {}. Already shipped {}, accepted {}. Maximum can ship: {}.",
                ship.qty,
                ship.item_code,
                item.shipped_qty,
                item.accepted_qty,
                item.accepted_qty - item.shipped_qty
            ));
        }

        let available = on_hand.get(&ship.item_code).copied().unwrap_or(0.0);
        if ship.qty > available {
            violations.stock.push(format!(
                "{}: Available={}, Trying to ship={}",
                ship.item_code, available, ship.qty
            ));
        }
    }

    violations
}

/// Validate a receipt batch. The source-warehouse stock re-check mirrors the
/// shipping side even though shipment already happened (design quirk kept on
/// purpose; see DESIGN.md).
pub fn validate_receipt(
    items: &[TransferItem],
    lines: &[QtyLine],
    source_on_hand: &HashMap<String, f64>,
) -> BatchViolations {
    let mut violations = BatchViolations::default();

    for recv in lines {
        if recv.qty <= 0.0 {
            violations.quantity.push(format!(
                "Receiving quantity must be greater than 0 for {}",
                recv.item_code
            ));
            continue;
        }

        let item = match items.iter().find(|item| item.item_code == recv.item_code) {
            Some(item) => item,
            None => {
                violations.quantity.push(format!(
                    "Item '{}' not found in transfer request",
                    recv.item_code
                ));
                continue;
            }
        };

        if item.shipped_qty == 0.0 {
            violations.quantity.push(format!(
                "Cannot receive {} - no items shipped yet",
                recv.item_code
            ));
            continue;
        }

        let new_total = item.received_qty + recv.qty;
        if new_total > item.shipped_qty {
            violations.quantity.push(format!(
                "Cannot receive {} more of {}. Already received {}, shipped {}. Maximum can receive: {}.",
                recv.qty,
                recv.item_code,
                item.received_qty,
                item.shipped_qty,
                item.shipped_qty - item.received_qty
            ));
        }

        let available = source_on_hand.get(&recv.item_code).copied().unwrap_or(0.0);
        if recv.qty > available {
            violations.stock.push(format!(
                "Insufficient stock in source warehouse. Item: {}, Available: {}, Trying to receive: {}",
                recv.item_code, available, recv.qty
            ));
        }
    }

    violations
}

// ==================== STATUS DERIVATION ====================

/// Every non-excluded line fully shipped?
pub fn shipment_complete(items: &[TransferItem]) -> bool {
    items
        .iter()
        .filter(|item| item.accepted_qty > 0.0)
        .all(|item| item.shipped_qty >= item.accepted_qty)
}

/// Every shipped line fully received?
pub fn receipt_complete(items: &[TransferItem]) -> bool {
    items
        .iter()
        .filter(|item| item.shipped_qty > 0.0)
        .all(|item| item.received_qty >= item.shipped_qty)
}

pub fn status_after_shipment(items: &[TransferItem]) -> ApprovalStatus {
    if shipment_complete(items) {
        ApprovalStatus::Shipped
    } else {
        ApprovalStatus::PartiallyShipped
    }
}

pub fn status_after_receipt(items: &[TransferItem]) -> ApprovalStatus {
    if receipt_complete(items) {
        ApprovalStatus::Completed
    } else {
        ApprovalStatus::PartiallyCompleted
    }
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferRulesConfig;
    use chrono::Utc;

    fn line(item_code: &str, requested: f64, accepted: f64, shipped: f64, received: f64) -> TransferItem {
        let now = Utc::now();
        TransferItem {
            id: format!("line-{}", item_code),
            transfer_id: "TR-0001".to_string(),
            item_code: item_code.to_string(),
            uom: "Nos".to_string(),
            requested_qty: requested,
            accepted_qty: accepted,
            shipped_qty: shipped,
            received_qty: received,
            pending_qty: 0.0,
            requester_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn qty(item_code: &str, qty: f64) -> QtyLine {
        QtyLine { item_code: item_code.to_string(), qty }
    }

    fn rules() -> WarehouseRules {
        WarehouseRules::from_config(&TransferRulesConfig::default())
    }

    #[test]
    fn test_status_transitions() {
        use ApprovalStatus::*;

        assert!(Draft.can_transition_to(PendingApproval));
        assert!(Draft.can_transition_to(Completed)); // internal fast path
        assert!(PendingApproval.can_transition_to(ApprovedPendingShipment));
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(ApprovedPendingShipment.can_transition_to(PartiallyShipped));
        assert!(PartiallyShipped.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(PartiallyCompleted));
        assert!(PartiallyCompleted.can_transition_to(Completed));

        // reject is only legal from pending approval
        assert!(!Draft.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Rejected));
        assert!(!Shipped.can_transition_to(Rejected));

        // terminal states stay terminal
        assert!(!Completed.can_transition_to(Draft));
        assert!(!Rejected.can_transition_to(PendingApproval));
        assert!(Completed.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!PartiallyShipped.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ApprovalStatus::Draft,
            ApprovalStatus::PendingApproval,
            ApprovalStatus::ApprovedPendingShipment,
            ApprovalStatus::PartiallyShipped,
            ApprovalStatus::Shipped,
            ApprovalStatus::PartiallyCompleted,
            ApprovalStatus::Completed,
            ApprovalStatus::Rejected,
        ] {
            assert_eq!(ApprovalStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ApprovalStatus::from_str("nonsense"), None);
    }

    #[test]
    fn test_classify_internal_same_group() {
        let rules = rules();
        let transfer_type = rules.classify("Main Warehouse", "Damage").unwrap();
        assert_eq!(transfer_type, TransferType::Internal);

        let transfer_type = rules.classify("Store Display", "Store Damage").unwrap();
        assert_eq!(transfer_type, TransferType::Internal);
    }

    #[test]
    fn test_classify_external_pair() {
        let rules = rules();
        let transfer_type = rules.classify("Main Warehouse", "Store Warehouse").unwrap();
        assert_eq!(transfer_type, TransferType::External);
    }

    #[test]
    fn test_classify_rejects_cross_group() {
        let rules = rules();
        // Damage belongs to the main group, Store Display to the store group,
        // and neither is an external warehouse
        let err = rules.classify("Damage", "Store Display").unwrap_err();
        assert!(matches!(err, ApiError::IncompatibleWarehousePair(_)));
    }

    #[test]
    fn test_classify_rejects_same_warehouse() {
        let rules = rules();
        let err = rules.classify("Main Warehouse", "Main Warehouse").unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_classify_rejects_hold_warehouse() {
        let rules = rules();
        let err = rules.classify("Hold (Reserved)", "Main Warehouse").unwrap_err();
        assert!(matches!(err, ApiError::IncompatibleWarehousePair(_)));
        let err = rules.classify("Main Warehouse", "Hold (Reserved)").unwrap_err();
        assert!(matches!(err, ApiError::IncompatibleWarehousePair(_)));
    }

    #[test]
    fn test_classify_rejects_unknown_warehouse() {
        let rules = rules();
        let err = rules.classify("Nowhere", "Main Warehouse").unwrap_err();
        assert!(matches!(err, ApiError::IncompatibleWarehousePair(_)));
    }

    #[test]
    fn test_pending_qty_by_stage() {
        // before shipping: accepted - shipped
        assert_eq!(pending_qty(&line("X", 100.0, 60.0, 0.0, 0.0)), 60.0);
        // after shipping starts: shipped - received
        assert_eq!(pending_qty(&line("X", 100.0, 60.0, 30.0, 0.0)), 30.0);
        assert_eq!(pending_qty(&line("X", 100.0, 60.0, 60.0, 60.0)), 0.0);
    }

    #[test]
    fn test_line_violations_clean_line() {
        assert!(line_violations(&line("X", 10.0, 10.0, 8.0, 5.0)).is_empty());
    }

    #[test]
    fn test_line_violations_collects_all() {
        // accepted > requested AND shipped > accepted
        let bad = line("X", 10.0, 20.0, 25.0, 0.0);
        let violations = line_violations(&bad);
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn test_line_violations_receive_before_ship() {
        let bad = line("X", 10.0, 10.0, 0.0, 3.0);
        let violations = line_violations(&bad);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("before they are shipped"));
    }

    #[test]
    fn test_accepted_override_over_allocation() {
        let items = vec![line("X", 10.0, 10.0, 0.0, 0.0)];
        let violations = validate_accepted_overrides(&items, &[qty("X", 20.0)]);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("cannot exceed requested quantity (10)"));
    }

    #[test]
    fn test_accepted_override_within_bounds() {
        let items = vec![line("X", 10.0, 10.0, 0.0, 0.0)];
        assert!(validate_accepted_overrides(&items, &[qty("X", 6.0)]).is_empty());
        // excluding a line entirely is legal
        assert!(validate_accepted_overrides(&items, &[qty("X", 0.0)]).is_empty());
    }

    #[test]
    fn test_accepted_override_unknown_item() {
        let items = vec![line("X", 10.0, 10.0, 0.0, 0.0)];
        let violations = validate_accepted_overrides(&items, &[qty("Y", 5.0)]);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("not found"));
    }

    #[test]
    fn test_all_items_excluded() {
        let items = vec![line("X", 10.0, 0.0, 0.0, 0.0), line("Y", 5.0, 0.0, 0.0, 0.0)];
        assert!(!has_accepted_lines(&items));

        let items = vec![line("X", 10.0, 0.0, 0.0, 0.0), line("Y", 5.0, 2.0, 0.0, 0.0)];
        assert!(has_accepted_lines(&items));
    }

    #[test]
    fn test_shipment_over_accepted_rejected() {
        // accepted 10, shipped 8, trying 5 more
        let items = vec![line("X", 10.0, 10.0, 8.0, 0.0)];
        let mut on_hand = HashMap::new();
        on_hand.insert("X".to_string(), 100.0);

        let violations = validate_shipment(&items, &[qty("X", 5.0)], &on_hand);
        assert_eq!(violations.quantity.len(), 1);
        assert!(violations.quantity[0].contains("Maximum can ship: 2"));
        assert!(violations.into_result().is_err());
    }

    #[test]
    fn test_shipment_of_excluded_line_rejected() {
        let items = vec![line("X", 10.0, 0.0, 0.0, 0.0)];
        let mut on_hand = HashMap::new();
        on_hand.insert("X".to_string(), 100.0);

        let violations = validate_shipment(&items, &[qty("X", 1.0)], &on_hand);
        assert_eq!(violations.quantity.len(), 1);
        assert!(violations.quantity[0].contains("excluded"));
    }

    #[test]
    fn test_shipment_insufficient_stock() {
        let items = vec![line("X", 10.0, 10.0, 0.0, 0.0)];
        let mut on_hand = HashMap::new();
        on_hand.insert("X".to_string(), 3.0);

        let violations = validate_shipment(&items, &[qty("X", 5.0)], &on_hand);
        assert!(violations.quantity.is_empty());
        assert_eq!(violations.stock.len(), 1);
        assert!(matches!(
            violations.into_result().unwrap_err(),
            ApiError::InsufficientStock(_)
        ));
    }

    #[test]
    fn test_shipment_reports_every_violation() {
        let items = vec![
            line("A", 10.0, 10.0, 10.0, 0.0), // already fully shipped
            line("B", 10.0, 0.0, 0.0, 0.0),   // excluded
        ];
        let on_hand = HashMap::new();

        let violations = validate_shipment(
            &items,
            &[qty("A", 1.0), qty("B", 1.0), qty("C", 1.0), qty("A", 0.0)],
            &on_hand,
        );
        // over-shipment, excluded line, unknown item, non-positive qty,
        // plus the stock shortfall on A
        assert_eq!(violations.quantity.len(), 4);
        assert_eq!(violations.stock.len(), 1);
    }

    #[test]
    fn test_receipt_over_shipped_rejected() {
        let items = vec![line("X", 10.0, 10.0, 6.0, 4.0)];
        let mut on_hand = HashMap::new();
        on_hand.insert("X".to_string(), 100.0);

        let violations = validate_receipt(&items, &[qty("X", 5.0)], &on_hand);
        assert_eq!(violations.quantity.len(), 1);
        assert!(violations.quantity[0].contains("Maximum can receive: 2"));
    }

    #[test]
    fn test_receipt_before_shipment_rejected() {
        let items = vec![line("X", 10.0, 10.0, 0.0, 0.0)];
        let violations = validate_receipt(&items, &[qty("X", 1.0)], &HashMap::new());
        assert_eq!(violations.quantity.len(), 1);
        assert!(violations.quantity[0].contains("no items shipped yet"));
    }

    #[test]
    fn test_receipt_rechecks_source_stock() {
        let items = vec![line("X", 10.0, 10.0, 10.0, 0.0)];
        let mut on_hand = HashMap::new();
        on_hand.insert("X".to_string(), 4.0);

        let violations = validate_receipt(&items, &[qty("X", 10.0)], &on_hand);
        assert!(violations.quantity.is_empty());
        assert_eq!(violations.stock.len(), 1);
        assert!(violations.stock[0].contains("source warehouse"));
    }

    #[test]
    fn test_internal_stock_check() {
        let items = vec![line("X", 10.0, 10.0, 0.0, 0.0), line("Y", 5.0, 5.0, 0.0, 0.0)];
        let mut on_hand = HashMap::new();
        on_hand.insert("X".to_string(), 10.0);
        on_hand.insert("Y".to_string(), 2.0);

        let insufficient = validate_internal_stock(&items, &on_hand);
        assert_eq!(insufficient.len(), 1);
        assert!(insufficient[0].starts_with("Y:"));
    }

    #[test]
    fn test_partial_then_full_shipment_status() {
        // accepted 60, ship 30 -> partially shipped; ship remaining 30 -> shipped
        let mut items = vec![line("X", 100.0, 60.0, 0.0, 0.0)];

        items[0].shipped_qty = 30.0;
        assert_eq!(status_after_shipment(&items), ApprovalStatus::PartiallyShipped);
        assert_eq!(pending_qty(&items[0]), 30.0);

        items[0].shipped_qty = 60.0;
        assert_eq!(status_after_shipment(&items), ApprovalStatus::Shipped);
    }

    #[test]
    fn test_excluded_lines_ignored_for_completion() {
        let items = vec![line("X", 10.0, 10.0, 10.0, 10.0), line("Y", 5.0, 0.0, 0.0, 0.0)];
        assert!(shipment_complete(&items));
        assert_eq!(status_after_receipt(&items), ApprovalStatus::Completed);
    }

    #[test]
    fn test_partial_receipt_status() {
        let mut items = vec![line("X", 10.0, 10.0, 10.0, 0.0)];

        items[0].received_qty = 4.0;
        assert_eq!(status_after_receipt(&items), ApprovalStatus::PartiallyCompleted);

        items[0].received_qty = 10.0;
        assert_eq!(status_after_receipt(&items), ApprovalStatus::Completed);
    }
}
