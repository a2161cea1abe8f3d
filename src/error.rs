use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    InternalServerError(String),
    ValidationError(String),
    StateError(String),
    QuantityInvariantError(String),
    InsufficientStock(String),
    IncompatibleWarehousePair(String),
    DownstreamMovementError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::StateError(msg) => write!(f, "State Error: {}", msg),
            ApiError::QuantityInvariantError(msg) => write!(f, "Quantity Error: {}", msg),
            ApiError::InsufficientStock(msg) => write!(f, "Insufficient Stock: {}", msg),
            ApiError::IncompatibleWarehousePair(msg) => write!(f, "Incompatible Warehouses: {}", msg),
            ApiError::DownstreamMovementError(msg) => write!(f, "Stock Movement Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::StateError(_) => HttpResponse::Conflict().json(error_response),
            ApiError::QuantityInvariantError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::InsufficientStock(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::IncompatibleWarehousePair(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DownstreamMovementError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

// Domain-specific constructors
impl ApiError {
    pub fn transfer_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Transfer request '{}' not found", id))
    }

    pub fn item_not_found(item_code: &str) -> Self {
        ApiError::NotFound(format!("Item '{}' not found", item_code))
    }

    pub fn warehouse_not_found(name: &str) -> Self {
        ApiError::NotFound(format!("Warehouse '{}' not found", name))
    }

    pub fn line_not_found(transfer_id: &str, item_code: &str) -> Self {
        ApiError::NotFound(format!(
            "Item '{}' not found in transfer request '{}'",
            item_code, transfer_id
        ))
    }

    pub fn invalid_transition(action: &str, status: &str) -> Self {
        ApiError::StateError(format!("Cannot {} from status: {}", action, status))
    }

    /// Joins every collected violation into one message so a caller can fix
    /// all of them in a single round-trip.
    pub fn quantity_violations(violations: &[String]) -> Self {
        ApiError::QuantityInvariantError(violations.join("; "))
    }

    pub fn insufficient_stock(violations: &[String]) -> Self {
        ApiError::InsufficientStock(violations.join("; "))
    }
}

// Validation helpers shared by handlers
pub fn validate_quantity(quantity: f64) -> Result<(), ApiError> {
    if quantity < 0.0 {
        return Err(ApiError::ValidationError("Quantity cannot be negative".to_string()));
    }
    if quantity > 1e9 {
        return Err(ApiError::ValidationError("Quantity too large".to_string()));
    }
    Ok(())
}

pub fn validate_uom(uom: &str) -> Result<(), ApiError> {
    let valid_uoms = ["Nos", "Unit", "Box", "Pair", "Set", "Meter", "Kg", "Litre"];
    if !valid_uoms.contains(&uom) {
        return Err(ApiError::ValidationError(format!(
            "Invalid unit of measure '{}'. Valid units: {}",
            uom,
            valid_uoms.join(", ")
        )));
    }
    Ok(())
}
