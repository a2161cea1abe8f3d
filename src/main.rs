// main.rs - server wiring for the warehouse transfer service
use actix_web::{
    middleware::{Logger, DefaultHeaders},
    web, App, HttpResponse, HttpServer, HttpRequest,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_web::http::header;
use actix_cors::Cors;
use std::env;
use crate::config::load_config;

use rand::{thread_rng, Rng, distributions::Alphanumeric};
use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use anyhow::Context;
use sqlx::{sqlite::SqliteConnectOptions, migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Module declarations
mod audit;
mod auth;
mod auth_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod item_handlers;
mod models;
mod stock;
mod stock_handlers;
mod transfer_handlers;
mod transfer_rules;

use actix_web::middleware::Compress;
use config::Config;
use auth::{AuthService, jwt_middleware};

use auth_handlers::{
    login, register, get_profile, change_password, get_roles,
    get_users, get_user, create_user, update_user, delete_user, change_user_password,
    check_transfer_permission, TransferAction,
};
use crate::audit::ChangeSet;

use handlers::{get_dashboard_stats, get_recent_activity};
use item_handlers::{get_items, get_item, get_item_by_barcode};
use stock_handlers::{get_bins, get_warehouses, get_warehouse_stock, get_stock_entries};
use error::ApiResult;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

// ==================== TRANSFER PROTECTED WRAPPERS ====================

async fn create_transfer_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<models::CreateTransferRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = check_transfer_permission(&http_request, TransferAction::Create).await?;
    let user_id = claims.sub.clone();

    let mut cs = ChangeSet::new();
    cs.created("source_warehouse", &request.source_warehouse);
    cs.created("target_warehouse", &request.target_warehouse);
    cs.created("items", &format!("{}", request.items.len()));

    let response = transfer_handlers::create_transfer(app_state.clone(), request, claims.sub).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "create", "transfer_request", "",
        &format!("Created transfer request: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn update_transfer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<models::UpdateTransferRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = check_transfer_permission(&http_request, TransferAction::Edit).await?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();

    // Fetch old warehouses for comparison
    let mut cs = ChangeSet::new();
    if let Ok(old) = sqlx::query_as::<_, (String, String)>(
        "SELECT source_warehouse, target_warehouse FROM transfer_requests WHERE id = ?"
    ).bind(&transfer_id).fetch_one(&app_state.db_pool).await {
        if let Some(ref new_source) = update.source_warehouse {
            cs.add("source_warehouse", &old.0, new_source);
        }
        if let Some(ref new_target) = update.target_warehouse {
            cs.add("target_warehouse", &old.1, new_target);
        }
        if update.items.is_some() {
            cs.created("items", "replaced");
        }
    }

    let desc = if cs.has_changes() {
        format!("Transfer request {} updated: {}", transfer_id, cs.to_description())
    } else {
        format!("Transfer request {} updated", transfer_id)
    };

    let response = transfer_handlers::update_transfer(
        app_state.clone(), web::Path::from(transfer_id.clone()), update, claims.sub,
    ).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "edit", "transfer_request", &transfer_id,
        &desc, &cs, &http_request,
    ).await;
    Ok(response)
}

async fn delete_transfer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = check_transfer_permission(&http_request, TransferAction::Delete).await?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Ok(old) = sqlx::query_as::<_, (String, String, String)>(
        "SELECT source_warehouse, target_warehouse, approval_status FROM transfer_requests WHERE id = ?"
    ).bind(&transfer_id).fetch_one(&app_state.db_pool).await {
        cs.deleted("source_warehouse", &old.0);
        cs.deleted("target_warehouse", &old.1);
        cs.deleted("status", &old.2);
    }

    let response = transfer_handlers::delete_transfer(
        app_state.clone(), web::Path::from(transfer_id.clone()), claims,
    ).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "delete", "transfer_request", &transfer_id,
        &format!("Deleted transfer request: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn submit_transfer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = check_transfer_permission(&http_request, TransferAction::Edit).await?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();

    let response = transfer_handlers::submit_for_approval(
        app_state.clone(), web::Path::from(transfer_id.clone()), claims,
    ).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "submit", "transfer_request", &transfer_id,
        &format!("Transfer request {} submitted for approval", transfer_id),
        &http_request,
    ).await;
    Ok(response)
}

async fn approve_transfer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<models::ApproveRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = auth::get_current_user(&http_request)?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();

    let mut cs = ChangeSet::new();
    if let Some(ref accepted) = body.accepted_items {
        for line in accepted {
            cs.created(&format!("accepted_qty[{}]", line.item_code), &line.qty.to_string());
        }
    }

    let response = transfer_handlers::approve_transfer(
        app_state.clone(), web::Path::from(transfer_id.clone()), body, claims,
    ).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "approve", "transfer_request", &transfer_id,
        &format!("Transfer request {} approved", transfer_id),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn reject_transfer_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<models::RejectRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = auth::get_current_user(&http_request)?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();
    let reason = body.rejection_reason.clone();

    let response = transfer_handlers::reject_transfer(
        app_state.clone(), web::Path::from(transfer_id.clone()), body, claims,
    ).await?;
    audit::audit(
        &app_state.db_pool, &user_id, "reject", "transfer_request", &transfer_id,
        &format!("Transfer request {} rejected: {}", transfer_id, reason),
        &http_request,
    ).await;
    Ok(response)
}

async fn mark_shipped_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<models::ShipRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = auth::get_current_user(&http_request)?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();

    let mut cs = ChangeSet::new();
    for line in &body.shipped_items {
        cs.created(&format!("shipped_qty[{}]", line.item_code), &line.qty.to_string());
    }

    let response = transfer_handlers::mark_as_shipped(
        app_state.clone(), web::Path::from(transfer_id.clone()), body, claims,
    ).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "ship", "transfer_request", &transfer_id,
        &format!("Shipment recorded for transfer request {}", transfer_id),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn confirm_receipt_protected(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<models::ReceiveRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = auth::get_current_user(&http_request)?;
    let user_id = claims.sub.clone();
    let transfer_id = path.into_inner();

    let mut cs = ChangeSet::new();
    for line in &body.received_items {
        cs.created(&format!("received_qty[{}]", line.item_code), &line.qty.to_string());
    }

    let response = transfer_handlers::confirm_receipt(
        app_state.clone(), web::Path::from(transfer_id.clone()), body, claims,
    ).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "receive", "transfer_request", &transfer_id,
        &format!("Receipt confirmed for transfer request {}", transfer_id),
        &cs, &http_request,
    ).await;
    Ok(response)
}

// ==================== ITEM / STOCK PROTECTED WRAPPERS ====================

async fn create_item_protected(
    app_state: web::Data<Arc<AppState>>,
    item: web::Json<models::CreateItemRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = auth::require_permission(&http_request, |role| role.can_manage_items())?;
    let user_id = claims.sub.clone();

    let mut cs = ChangeSet::new();
    cs.created("item_code", &item.item_code);
    cs.created("item_name", &item.item_name);
    cs.created("stock_uom", &item.stock_uom);

    let response = item_handlers::create_item(app_state.clone(), item, claims.sub).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "create", "item", "",
        &format!("Created item: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

async fn adjust_stock_protected(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<models::AdjustStockRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = auth::require_permission(&http_request, |role| role.can_adjust_stock())?;
    let user_id = claims.sub.clone();

    let mut cs = ChangeSet::new();
    cs.created("item_code", &request.item_code);
    cs.created("warehouse", &request.warehouse);
    cs.created("actual_qty", &request.actual_qty.to_string());

    let response = stock_handlers::adjust_stock(app_state.clone(), request, claims.sub).await?;
    audit::audit_with_changes(
        &app_state.db_pool, &user_id, "adjust", "bin", "",
        &format!("Stock adjusted: {}", cs.to_description()),
        &cs, &http_request,
    ).await;
    Ok(response)
}

// ==================== STUB HANDLERS ====================

async fn logout(
    _http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    // JWT tokens are stateless - logout is handled client-side by removing the token
    Ok(HttpResponse::Ok().json(handlers::ApiResponse::<()>::success_with_message(
        (),
        "Logged out successfully".to_string(),
    )))
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (this calls load_env_file internally)
    let config = load_config()?;

    // Setup logging
    setup_logging(&config)?;

    // Validate production config
    if env::var("WMS_ENV").as_deref() == Ok("production") {
        validate_production_config(&config)?;
    }

    // Setup database
    setup_database(&config.database.url).await?;

    // Create database pool
    let pool = create_database_pool(&config.database).await?;

    // Run migrations and seed the configured warehouses
    db::run_migrations(&pool).await?;
    db::seed_warehouses(&pool, &config).await?;

    // Create auth service
    let auth_service = Arc::new(AuthService::new(&config.auth.jwt_secret));

    // Create default admin if needed
    create_default_admin_if_needed(&pool, &auth_service).await?;

    config.print_startup_info();

    // Create app state
    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    HttpServer::new(move || {
        let cors = setup_improved_cors(&config.security.allowed_origins);
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))

            // Health check (no auth)
            .service(
                web::scope("/health")
                    .route("", web::get().to(|| async { HttpResponse::Ok().body("OK") }))
            )

            // Auth endpoints (no authentication required)
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(login))
                    .route("/register", web::post().to(register))
            )

            // Protected API endpoints
            .service(
                web::scope("/api/v1")
                    .wrap(auth_middleware)

                    // Auth management
                    .service(
                        web::scope("/auth")
                            .route("/profile", web::get().to(get_profile))
                            .route("/change-password", web::post().to(change_password))
                            .route("/logout", web::post().to(logout))
                            .route("/roles", web::get().to(get_roles))
                            .route("/users", web::get().to(get_users))
                            .route("/users", web::post().to(create_user))
                            .route("/users/{id}", web::get().to(get_user))
                            .route("/users/{id}", web::put().to(update_user))
                            .route("/users/{id}", web::delete().to(delete_user))
                            .route("/users/{id}/reset-password", web::put().to(change_user_password))
                    )

                    // Dashboard
                    .service(
                        web::scope("/dashboard")
                            .route("/stats", web::get().to(get_dashboard_stats))
                            .route("/recent-activity", web::get().to(get_recent_activity))
                    )

                    // Warehouses
                    .service(
                        web::scope("/warehouses")
                            .route("", web::get().to(get_warehouses))
                            .route("/{name}/stock", web::get().to(get_warehouse_stock))
                    )

                    // Items
                    .service(
                        web::scope("/items")
                            .route("", web::post().to(create_item_protected))
                            .route("", web::get().to(get_items))
                            .route("/barcode/{barcode}", web::get().to(get_item_by_barcode))
                            .route("/{item_code}", web::get().to(get_item))
                    )

                    // Stock
                    .service(
                        web::scope("/stock")
                            .route("/bins", web::get().to(get_bins))
                            .route("/adjust", web::post().to(adjust_stock_protected))
                            .route("/entries", web::get().to(get_stock_entries))
                    )

                    // Transfer requests
                    .service(
                        web::scope("/transfers")
                            .route("", web::post().to(create_transfer_protected))
                            .route("", web::get().to(transfer_handlers::get_all_transfers))
                            .route("/validate-items", web::post().to(transfer_handlers::validate_items))
                            .route("/{id}", web::get().to(transfer_handlers::get_transfer))
                            .route("/{id}", web::put().to(update_transfer_protected))
                            .route("/{id}", web::delete().to(delete_transfer_protected))
                            .route("/{id}/submit-for-approval", web::post().to(submit_transfer_protected))
                            .route("/{id}/approve", web::post().to(approve_transfer_protected))
                            .route("/{id}/reject", web::post().to(reject_transfer_protected))
                            .route("/{id}/mark-shipped", web::post().to(mark_shipped_protected))
                            .route("/{id}/confirm-receipt", web::post().to(confirm_receipt_protected))
                            .route("/{id}/accepted-qty/{item_code}", web::get().to(transfer_handlers::get_accepted_qty))
                    )
            )
    })
        .bind(&bind_address)?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

pub fn setup_improved_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::USER_AGENT,
            header::REFERER,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    let is_production = std::env::var("WMS_ENV").as_deref() == Ok("production");

    if allowed_origins.contains(&"*".to_string()) {
        if is_production {
            log::error!("FATAL: Wildcard CORS origin (*) is not allowed in production!");
            log::error!("Please specify exact allowed origins in ALLOWED_ORIGINS environment variable");
            panic!("Cannot start server with wildcard CORS in production");
        } else {
            log::warn!("Using wildcard CORS (*) in development mode");
            cors = cors.allow_any_origin().allow_any_header().allow_any_method();
        }
    } else {
        for origin in allowed_origins {
            if origin.is_empty() {
                continue;
            }
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let level = config.logging.level.as_str();
            tracing_subscriber::EnvFilter::new(level)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.auth.jwt_secret == "your-secret-key-here" || config.auth.jwt_secret.len() < 32 {
        anyhow::bail!("Insecure JWT secret in production! Must be at least 32 characters.");
    }

    if config.security.allowed_origins.contains(&"*".to_string()) {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }

    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &crate::config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_config.url.trim_start_matches("sqlite:"))
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn setup_security_headers(config: &crate::config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("X-XSS-Protection", "1; mode=block"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload"
        ));
    }

    headers
}

async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if user_count.0 == 0 {
        use crate::auth::{RegisterRequest, UserRole};

        let password = env::var("DEFAULT_ADMIN_PASSWORD").unwrap_or_else(|_| {
            let mut rng = thread_rng();
            let digits: Vec<char> = "0123456789".chars().collect();
            let specials: Vec<char> = "!@#$%^&*()_+-=[]{}|;:,.<>?".chars().collect();
            let uppercase: Vec<char> = "ABCDEFGHIJKLMNOPQRSTUVWXYZ".chars().collect();
            let lowercase: Vec<char> = "abcdefghijklmnopqrstuvwxyz".chars().collect();
            let alphanumeric = Alphanumeric;

            let mut pwd_chars: Vec<char> = Vec::new();

            pwd_chars.push(*digits.choose(&mut rng).unwrap());
            pwd_chars.push(*specials.choose(&mut rng).unwrap());
            pwd_chars.push(*uppercase.choose(&mut rng).unwrap());
            pwd_chars.push(*lowercase.choose(&mut rng).unwrap());

            for _ in 0..8 {
                if rng.gen_bool(0.5) {
                    let sample_u8 = alphanumeric.sample(&mut rng);
                    pwd_chars.push(char::from(sample_u8));
                } else {
                    pwd_chars.push(*specials.choose(&mut rng).unwrap());
                }
            }

            pwd_chars.shuffle(&mut rng);

            let pwd: String = pwd_chars.into_iter().collect();
            log::warn!("Generated admin password: {}", pwd);
            pwd
        });

        let admin_request = RegisterRequest {
            username: "admin".to_string(),
            email: "admin@wms.local".to_string(),
            password: password.clone(),
            role: None,
        };

        let user = crate::auth::User::create(pool, admin_request, UserRole::Viewer, auth_service)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create default admin user: {}", e))?;

        let update_result = sqlx::query(
            "UPDATE users SET role = ?, updated_at = datetime('now') WHERE id = ?"
        )
            .bind("admin")
            .bind(&user.id)
            .execute(pool)
            .await?;

        if update_result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("Failed to promote default user to Admin"));
        }

        log::warn!("Default admin user created and promoted to Admin:");
        log::warn!("  Username: admin");
        log::warn!("  Password: {} (generated - CHANGE IMMEDIATELY!)", password);
    }

    Ok(())
}
