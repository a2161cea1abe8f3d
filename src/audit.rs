// ============================================================
// ФАЙЛ: src/audit.rs — Вспомогательный модуль для аудит-логирования
// ============================================================

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::Utc;
use actix_web::HttpRequest;

/// Записать событие в audit_logs
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    description: Option<&str>,
    changes: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, changes, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(description)
    .bind(changes)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Короткая версия для частых вызовов
pub async fn audit(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        None,
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

// ==================== CHANGE SET ====================

/// Накопитель изменённых полей для человекочитаемого описания и JSON-диффа
#[derive(Debug, Default)]
pub struct ChangeSet {
    entries: Vec<ChangeEntry>,
}

#[derive(Debug)]
struct ChangeEntry {
    field: String,
    old: Option<String>,
    new: Option<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field set on creation (no previous value)
    pub fn created(&mut self, field: &str, value: &str) {
        self.entries.push(ChangeEntry {
            field: field.to_string(),
            old: None,
            new: Some(value.to_string()),
        });
    }

    /// Field removed on deletion
    pub fn deleted(&mut self, field: &str, value: &str) {
        self.entries.push(ChangeEntry {
            field: field.to_string(),
            old: Some(value.to_string()),
            new: None,
        });
    }

    /// Record a change only when old and new actually differ
    pub fn add(&mut self, field: &str, old: &str, new: &str) {
        if old != new {
            self.entries.push(ChangeEntry {
                field: field.to_string(),
                old: Some(old.to_string()),
                new: Some(new.to_string()),
            });
        }
    }

    pub fn add_opt(&mut self, field: &str, old: &Option<String>, new: &Option<String>) {
        if old != new {
            self.entries.push(ChangeEntry {
                field: field.to_string(),
                old: old.clone(),
                new: new.clone(),
            });
        }
    }

    pub fn add_f64(&mut self, field: &str, old: f64, new: f64) {
        if (old - new).abs() > f64::EPSILON {
            self.add(field, &old.to_string(), &new.to_string());
        }
    }

    pub fn add_i64(&mut self, field: &str, old: i64, new: i64) {
        if old != new {
            self.add(field, &old.to_string(), &new.to_string());
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.entries.is_empty()
    }

    /// "field: old -> new, field2: value" для описания в логе
    pub fn to_description(&self) -> String {
        self.entries
            .iter()
            .map(|entry| match (&entry.old, &entry.new) {
                (Some(old), Some(new)) => format!("{}: {} -> {}", entry.field, old, new),
                (None, Some(new)) => format!("{}: {}", entry.field, new),
                (Some(old), None) => format!("{}: {}", entry.field, old),
                (None, None) => entry.field.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// JSON для колонки changes
    pub fn to_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.field.clone(),
                    serde_json::json!({"old": entry.old, "new": entry.new}),
                )
            })
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}

/// Аудит с диффом полей
pub async fn audit_with_changes(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    changes: &ChangeSet,
    request: &HttpRequest,
) {
    let changes_json = if changes.has_changes() {
        Some(changes.to_json())
    } else {
        None
    };

    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        changes_json.as_deref(),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

// ==================== TESTS ====================
