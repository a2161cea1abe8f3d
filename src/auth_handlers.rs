// src/auth_handlers.rs - Authentication route handlers with enhanced permissions

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::{Duration, Utc};
use uuid::Uuid;
use serde::{Serialize, Deserialize};

use crate::handlers::ApiResponse;
use crate::auth::{
    AuthService, User, LoginRequest, RegisterRequest, ChangePasswordRequest,
    LoginResponse, UserInfo, UserRole, get_current_user, check_permission
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

// Re-export get_current_user as get_claims_from_request for backward compatibility
pub use crate::auth::get_current_user as get_claims_from_request;

// ======== REQUEST STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    pub role: Option<String>,
    pub warehouse_group: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeUserPasswordRequest {
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,
}

/// Request for admin to create a new user
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, message = "Role is required"))]
    pub role: String,
    /// Scope for warehouse managers; ignored for other roles
    pub warehouse_group: Option<String>,
}

// ======== PERMISSION DEFINITIONS ========

/// Available system permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    // User management
    ManageUsers,
    ViewUsers,

    // Transfer permissions
    CreateTransfer,
    EditTransfer,
    DeleteTransfer,
    ViewTransfer,
    ApproveTransfer,
    ShipTransfer,
    ReceiveTransfer,

    // Item permissions
    ManageItems,
    ViewItems,

    // Stock permissions
    AdjustStock,
    ViewStock,

    // System permissions
    ViewAuditLog,
    ManageSystem,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "manage_users",
            Permission::ViewUsers => "view_users",
            Permission::CreateTransfer => "create_transfer",
            Permission::EditTransfer => "edit_transfer",
            Permission::DeleteTransfer => "delete_transfer",
            Permission::ViewTransfer => "view_transfer",
            Permission::ApproveTransfer => "approve_transfer",
            Permission::ShipTransfer => "ship_transfer",
            Permission::ReceiveTransfer => "receive_transfer",
            Permission::ManageItems => "manage_items",
            Permission::ViewItems => "view_items",
            Permission::AdjustStock => "adjust_stock",
            Permission::ViewStock => "view_stock",
            Permission::ViewAuditLog => "view_audit_log",
            Permission::ManageSystem => "manage_system",
        }
    }
}

/// Helper function to get permissions list for a role
pub fn get_role_permissions(role: &UserRole) -> Vec<Permission> {
    match role {
        UserRole::Admin => vec![
            // All permissions
            Permission::ManageUsers,
            Permission::ViewUsers,
            Permission::CreateTransfer,
            Permission::EditTransfer,
            Permission::DeleteTransfer,
            Permission::ViewTransfer,
            Permission::ApproveTransfer,
            Permission::ShipTransfer,
            Permission::ReceiveTransfer,
            Permission::ManageItems,
            Permission::ViewItems,
            Permission::AdjustStock,
            Permission::ViewStock,
            Permission::ViewAuditLog,
            Permission::ManageSystem,
        ],
        UserRole::TransferManager => vec![
            Permission::ViewUsers,
            Permission::CreateTransfer,
            Permission::EditTransfer,
            Permission::ViewTransfer,
            Permission::ApproveTransfer,
            Permission::ManageItems,
            Permission::ViewItems,
            Permission::ViewStock,
        ],
        UserRole::WarehouseManager => vec![
            // Ship/receive are additionally scoped to the manager's group
            Permission::CreateTransfer,
            Permission::EditTransfer,
            Permission::ViewTransfer,
            Permission::ShipTransfer,
            Permission::ReceiveTransfer,
            Permission::ViewItems,
            Permission::ViewStock,
        ],
        UserRole::Viewer => vec![
            Permission::ViewTransfer,
            Permission::ViewItems,
            Permission::ViewStock,
        ],
    }
}

// ======== TRANSFER ACTION CHECKS ========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Create,
    Edit,
    Delete,
    View,
}

/// Role-level gate used by the protected wrappers; group-scoped authority for
/// ship/receive is checked inside the transition handlers.
pub async fn check_transfer_permission(
    http_request: &HttpRequest,
    action: TransferAction,
) -> ApiResult<crate::auth::Claims> {
    let claims = get_current_user(http_request)?;
    let allowed = match action {
        TransferAction::Create => claims.role.can_create_transfers(),
        TransferAction::Edit => claims.role.can_edit_transfers(),
        TransferAction::Delete => {
            // draft owners may delete their own; handler enforces ownership
            claims.role.can_edit_transfers() || claims.role.can_delete_transfers()
        }
        TransferAction::View => claims.role.can_view_transfers(),
    };

    if allowed {
        Ok(claims)
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    // Find user by username
    let mut user = User::find_by_username(&app_state.db_pool, &request.username).await
        .map_err(|_| ApiError::BadRequest("Invalid username or password".to_string()))?;

    // Check if user is locked
    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }

    if !user.is_active {
        return Err(ApiError::AuthError("Account is deactivated".to_string()));
    }

    // Verify password
    if !auth_service.verify_password(&request.password, &user.password_hash)
        .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))? {

        // Increment failed attempts
        user.increment_failed_attempts(&app_state.db_pool).await?;

        // Lock after too many failed attempts
        let max_attempts = app_state.config.auth.max_login_attempts;
        if user.failed_login_attempts >= max_attempts {
            let lockout = app_state.config.auth.lockout_duration_minutes as i64;
            user.lock_for_duration(&app_state.db_pool, Duration::minutes(lockout)).await?;
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                lockout
            )));
        }

        return Err(ApiError::BadRequest("Invalid username or password".to_string()));
    }

    // Reset failed attempts on successful login
    user.reset_failed_attempts(&app_state.db_pool).await?;

    // Update last login
    user.update_last_login(&app_state.db_pool).await?;

    // Generate token
    let token = auth_service.generate_token(&user)?;

    let response = LoginResponse {
        token,
        expires_in: 24 * 3600, // 24 hours in seconds
        user: user.clone().into(),
    };

    log::info!("User {} logged in successfully", user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn register(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<RegisterRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    // Determine user role with transaction to prevent race condition
    let role = if let Ok(claims) = get_current_user(&http_request) {
        // Admin is creating a new user
        check_permission(&claims, |role| role.can_manage_users())?;

        // Admin can specify role or default to Viewer
        if let Some(role_str) = &request.role {
            UserRole::from_str(role_str)
                .ok_or_else(|| ApiError::BadRequest("Invalid role specified".to_string()))?
        } else {
            UserRole::Viewer
        }
    } else {
        // Use transaction to prevent race condition on first user
        let mut tx = app_state.db_pool.begin().await?;

        let user_count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM users"
        )
        .fetch_one(&mut *tx)
        .await?;

        let role = if user_count.0 == 0 {
            UserRole::Admin // First user becomes admin
        } else {
            UserRole::Viewer // Self-registration only allows Viewer
        };

        tx.commit().await?;

        role
    };

    if role == UserRole::Viewer && !app_state.config.auth.allow_self_registration
        && get_current_user(&http_request).is_err()
    {
        let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&app_state.db_pool)
            .await?;
        if user_count.0 > 0 {
            return Err(ApiError::Forbidden("Self-registration is disabled".to_string()));
        }
    }

    // Create user (only Viewer passes User::create's self-registration guard;
    // the first-user admin case is promoted below)
    let user = if role == UserRole::Admin {
        let created = User::create(
            &app_state.db_pool,
            request.into_inner(),
            UserRole::Viewer,
            &auth_service,
        )
        .await?;
        sqlx::query("UPDATE users SET role = 'admin', updated_at = datetime('now') WHERE id = ?")
            .bind(&created.id)
            .execute(&app_state.db_pool)
            .await?;
        User::find_by_id(&app_state.db_pool, &created.id).await?
    } else {
        User::create(&app_state.db_pool, request.into_inner(), role, &auth_service).await?
    };

    // Generate token
    let token = auth_service.generate_token(&user)?;

    let response = LoginResponse {
        token,
        expires_in: 24 * 3600,
        user: user.into(),
    };

    log::info!("New user registered: {} with role {:?}", response.user.username, response.user.role);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        response,
        "User registered successfully".to_string(),
    )))
}

pub async fn get_profile(http_request: HttpRequest) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;

    // Get role permissions
    let permissions: Vec<String> = get_role_permissions(&claims.role)
        .iter()
        .map(|p| p.as_str().to_string())
        .collect();

    #[derive(Serialize)]
    struct ProfileResponse {
        #[serde(flatten)]
        user: UserInfo,
        permissions: Vec<String>,
    }

    let user_info = UserInfo {
        id: claims.sub,
        username: claims.username,
        email: claims.email,
        role: claims.role.clone(),
        warehouse_group: claims.warehouse_group.clone(),
        is_active: true,
        last_login: None,
    };

    let response = ProfileResponse {
        user: user_info,
        permissions,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<ChangePasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;

    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;

    user.change_password(
        &app_state.db_pool,
        &request.current_password,
        &request.new_password,
        &auth_service
    ).await?;

    log::info!("User {} changed password", user.username);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Password changed successfully".to_string(),
    )))
}

// ======== ROLES ========

pub async fn get_roles() -> ApiResult<HttpResponse> {
    #[derive(Serialize)]
    struct RoleInfo {
        value: &'static str,
        display_name: &'static str,
        description: &'static str,
        permissions: Vec<String>,
    }

    let roles: Vec<RoleInfo> = UserRole::all_roles()
        .into_iter()
        .map(|role| RoleInfo {
            value: role.as_str(),
            display_name: role.display_name(),
            description: role.description(),
            permissions: get_role_permissions(&role)
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(roles)))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&app_state.db_pool)
        .await?;

    let user_infos: Vec<UserInfo> = users.into_iter().map(|u| u.into()).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_infos)))
}

pub async fn get_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;
    let user_info: UserInfo = user.into();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_info)))
}

/// Create a new user (admin only)
pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;

    // Validate role
    let role = UserRole::from_str(&request.role)
        .ok_or_else(|| ApiError::BadRequest(format!(
            "Invalid role '{}'. Valid roles: {}",
            request.role,
            UserRole::all_role_strings().join(", ")
        )))?;

    // Warehouse managers need a group to be scoped to
    let warehouse_group = if role == UserRole::WarehouseManager {
        match request.warehouse_group {
            Some(ref group) if !group.trim().is_empty() => Some(group.trim().to_string()),
            _ => {
                return Err(ApiError::BadRequest(
                    "warehouse_group is required for the warehouse_manager role".to_string(),
                ))
            }
        }
    } else {
        None
    };

    // Check if username already exists
    let existing_username: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM users WHERE username = ?"
    )
    .bind(&request.username)
    .fetch_optional(&app_state.db_pool)
    .await?;

    if existing_username.is_some() {
        return Err(ApiError::BadRequest(format!(
            "Username '{}' already exists",
            request.username
        )));
    }

    // Check if email already exists
    let existing_email: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM users WHERE email = ?"
    )
    .bind(&request.email)
    .fetch_optional(&app_state.db_pool)
    .await?;

    if existing_email.is_some() {
        return Err(ApiError::BadRequest(format!(
            "Email '{}' already exists",
            request.email
        )));
    }

    // Hash password
    let password_hash = auth_service.hash_password(&request.password)
        .map_err(|e| ApiError::InternalServerError(format!("Failed to hash password: {}", e)))?;

    let now = Utc::now();
    let id = Uuid::new_v4().to_string();

    // Create user
    sqlx::query(
        r#"INSERT INTO users (
            id, username, email, password_hash, role, warehouse_group, is_active,
            created_at, updated_at, failed_login_attempts, locked_until
        ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, 0, NULL)"#
    )
    .bind(&id)
    .bind(&request.username)
    .bind(&request.email)
    .bind(&password_hash)
    .bind(role.as_str())
    .bind(&warehouse_group)
    .bind(now)
    .bind(now)
    .execute(&app_state.db_pool)
    .await?;

    // Fetch created user
    let user = User::find_by_id(&app_state.db_pool, &id).await?;
    let user_info: UserInfo = user.into();

    log::info!(
        "Admin {} created user {} with role {:?}",
        claims.username, request.username, role
    );

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        user_info,
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;

    // Validate role if provided
    if let Some(ref role_str) = request.role {
        if UserRole::from_str(role_str).is_none() {
            return Err(ApiError::BadRequest(format!(
                "Invalid role '{}'. Valid roles: {}",
                role_str,
                UserRole::all_role_strings().join(", ")
            )));
        }
    }

    // Prevent admin from demoting themselves
    if user_id == claims.sub {
        if let Some(ref role_str) = request.role {
            if role_str != claims.role.as_str() {
                return Err(ApiError::BadRequest(
                    "Cannot change your own role".to_string()
                ));
            }
        }
        if let Some(is_active) = request.is_active {
            if !is_active {
                return Err(ApiError::BadRequest(
                    "Cannot deactivate your own account".to_string()
                ));
            }
        }
    }

    // Ensure the user exists before updating
    let existing = User::find_by_id(&app_state.db_pool, &user_id).await?;

    let now = Utc::now();
    let role = request.role.clone().unwrap_or(existing.role);
    let warehouse_group = match request.warehouse_group {
        Some(ref group) if !group.trim().is_empty() => Some(group.trim().to_string()),
        Some(_) => None, // explicit empty string clears the scope
        None => existing.warehouse_group,
    };
    let is_active = request.is_active.unwrap_or(existing.is_active);

    sqlx::query(
        "UPDATE users SET updated_at = ?, role = ?, warehouse_group = ?, is_active = ? WHERE id = ?"
    )
        .bind(now)
        .bind(&role)
        .bind(&warehouse_group)
        .bind(is_active)
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Admin {} updated user {}", claims.username, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "User updated successfully".to_string(),
    )))
}

pub async fn delete_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    if user_id == claims.sub {
        return Err(ApiError::BadRequest("Cannot delete your own account".to_string()));
    }

    // Deactivate rather than delete so transfer history keeps its references
    let result = sqlx::query(
        "UPDATE users SET is_active = 0, updated_at = datetime('now') WHERE id = ?"
    )
        .bind(&user_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    log::info!("Admin {} deactivated user {}", claims.username, user_id);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "User deactivated successfully".to_string(),
    )))
}

pub async fn change_user_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<String>,
    request: web::Json<ChangeUserPasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    request.validate()?;

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    let new_hash = auth_service.hash_password(&request.new_password)
        .map_err(|e| ApiError::ValidationError(format!("Password rejected: {}", e)))?;

    sqlx::query(
        "UPDATE users SET password_hash = ?, updated_at = datetime('now') WHERE id = ?"
    )
        .bind(&new_hash)
        .bind(&user.id)
        .execute(&app_state.db_pool)
        .await?;

    log::info!("Admin {} reset password for user {}", claims.username, user.username);
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Password reset successfully".to_string(),
    )))
}
