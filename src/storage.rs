//! SQLite storage layer for Chalkline.
//!
//! All persistence goes through [`Storage`], a thin wrapper around a sqlx
//! connection pool. The schema is created on startup; timestamps are stored
//! as Unix seconds and rehydrated to `DateTime<Utc>` on read.
//!
//! Uniqueness rules enforced here:
//! - `categories.name` is unique
//! - `assignments(activity_id, user_id)` is unique

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::model::{
    Activity, ActivityStatus, ActivityUpdate, Assignment, Category, LlmConfig, User,
    WhatsAppMessage,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

fn from_unix(ts: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .with_context(|| format!("invalid stored timestamp: {}", ts))
}

fn parse_status(s: &str) -> anyhow::Result<ActivityStatus> {
    ActivityStatus::parse(s).with_context(|| format!("invalid stored status: {}", s))
}

fn activity_from_row(row: &SqliteRow) -> anyhow::Result<Activity> {
    let status: String = row.get("status");
    Ok(Activity {
        id: row.get("id"),
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        location: row.get("location"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        notes: row.get("notes"),
        photo_url: row.get("photo_url"),
        status: parse_status(&status)?,
        assigned_to_user_id: row.get("assigned_to_user_id"),
        assignment_instructions: row.get("assignment_instructions"),
        resolution_notes: row.get("resolution_notes"),
        reported_by: row.get("reported_by"),
        created_at: from_unix(row.get("created_at"))?,
        updated_at: from_unix(row.get("updated_at"))?,
    })
}

fn user_from_row(row: &SqliteRow) -> anyhow::Result<User> {
    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        phone: row.get("phone"),
        role: row.get("role"),
        created_at: from_unix(row.get("created_at"))?,
    })
}

fn category_from_row(row: &SqliteRow) -> anyhow::Result<Category> {
    Ok(Category {
        id: row.get("id"),
        name: row.get("name"),
        created_at: from_unix(row.get("created_at"))?,
    })
}

fn update_from_row(row: &SqliteRow) -> anyhow::Result<ActivityUpdate> {
    let status: Option<String> = row.get("status");
    Ok(ActivityUpdate {
        id: row.get("id"),
        activity_id: row.get("activity_id"),
        author_id: row.get("author_id"),
        status: status.as_deref().map(parse_status).transpose()?,
        note: row.get("note"),
        created_at: from_unix(row.get("created_at"))?,
    })
}

fn assignment_from_row(row: &SqliteRow) -> anyhow::Result<Assignment> {
    Ok(Assignment {
        id: row.get("id"),
        activity_id: row.get("activity_id"),
        user_id: row.get("user_id"),
        instructions: row.get("instructions"),
        created_at: from_unix(row.get("created_at"))?,
    })
}

fn llm_config_from_row(row: &SqliteRow) -> anyhow::Result<LlmConfig> {
    Ok(LlmConfig {
        id: row.get("id"),
        provider: row.get("provider"),
        model: row.get("model"),
        api_key: row.get("api_key"),
        is_active: row.get("is_active"),
        is_default: row.get("is_default"),
        created_at: from_unix(row.get("created_at"))?,
    })
}

fn message_from_row(row: &SqliteRow) -> anyhow::Result<WhatsAppMessage> {
    Ok(WhatsAppMessage {
        id: row.get("id"),
        message_sid: row.get("message_sid"),
        from_phone: row.get("from_phone"),
        body: row.get("body"),
        direction: row.get("direction"),
        activity_id: row.get("activity_id"),
        created_at: from_unix(row.get("created_at"))?,
    })
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:chalkline.db"
    ///   or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT,
                role TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                subcategory TEXT,
                location TEXT NOT NULL,
                latitude REAL,
                longitude REAL,
                notes TEXT,
                photo_url TEXT,
                status TEXT NOT NULL,
                assigned_to_user_id TEXT,
                assignment_instructions TEXT,
                resolution_notes TEXT,
                reported_by TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS activity_updates (
                id TEXT PRIMARY KEY,
                activity_id TEXT NOT NULL,
                author_id TEXT,
                status TEXT,
                note TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS assignments (
                id TEXT PRIMARY KEY,
                activity_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                instructions TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE(activity_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS whatsapp_messages (
                id TEXT PRIMARY KEY,
                message_sid TEXT NOT NULL,
                from_phone TEXT NOT NULL,
                body TEXT NOT NULL,
                direction TEXT NOT NULL,
                activity_id TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS llm_configs (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                api_key TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                is_default INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_activities_status
            ON activities(status)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_activity_updates_activity
            ON activity_updates(activity_id, created_at)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn insert_user(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, phone, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.role)
        .bind(user.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    pub async fn update_user(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET name = ?, phone = ?, role = ? WHERE id = ?")
            .bind(&user.name)
            .bind(&user.phone)
            .bind(&user.role)
            .bind(&user.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns true if a row was deleted.
    pub async fn delete_user(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------

    pub async fn insert_category(&self, category: &Category) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO categories (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&category.id)
            .bind(&category.name)
            .bind(category.created_at.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_category(&self, id: &str) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(category_from_row).transpose()
    }

    pub async fn get_category_by_name(&self, name: &str) -> anyhow::Result<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(category_from_row).transpose()
    }

    pub async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        let rows = sqlx::query("SELECT * FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(category_from_row).collect()
    }

    pub async fn update_category(&self, category: &Category) -> anyhow::Result<()> {
        sqlx::query("UPDATE categories SET name = ? WHERE id = ?")
            .bind(&category.name)
            .bind(&category.id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete_category(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Activities
    // ------------------------------------------------------------------

    pub async fn insert_activity(&self, activity: &Activity) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (
                id, category, subcategory, location, latitude, longitude,
                notes, photo_url, status, assigned_to_user_id,
                assignment_instructions, resolution_notes, reported_by,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.category)
        .bind(&activity.subcategory)
        .bind(&activity.location)
        .bind(activity.latitude)
        .bind(activity.longitude)
        .bind(&activity.notes)
        .bind(&activity.photo_url)
        .bind(activity.status.as_str())
        .bind(&activity.assigned_to_user_id)
        .bind(&activity.assignment_instructions)
        .bind(&activity.resolution_notes)
        .bind(&activity.reported_by)
        .bind(activity.created_at.timestamp())
        .bind(activity.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_activity(&self, id: &str) -> anyhow::Result<Option<Activity>> {
        let row = sqlx::query("SELECT * FROM activities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(activity_from_row).transpose()
    }

    /// List activities, optionally filtered by status and/or category.
    pub async fn list_activities(
        &self,
        status: Option<&str>,
        category: Option<&str>,
    ) -> anyhow::Result<Vec<Activity>> {
        let rows = match (status, category) {
            (Some(s), Some(c)) => {
                sqlx::query(
                    "SELECT * FROM activities WHERE status = ? AND category = ? \
                     ORDER BY created_at DESC",
                )
                .bind(s)
                .bind(c)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(s), None) => {
                sqlx::query("SELECT * FROM activities WHERE status = ? ORDER BY created_at DESC")
                    .bind(s)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(c)) => {
                sqlx::query("SELECT * FROM activities WHERE category = ? ORDER BY created_at DESC")
                    .bind(c)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query("SELECT * FROM activities ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(activity_from_row).collect()
    }

    /// Persist the full current state of an activity, refreshing its
    /// `updated_at` so the caller's copy matches what was written.
    pub async fn update_activity(&self, activity: &mut Activity) -> anyhow::Result<()> {
        activity.updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE activities SET
                category = ?, subcategory = ?, location = ?, latitude = ?,
                longitude = ?, notes = ?, photo_url = ?, status = ?,
                assigned_to_user_id = ?, assignment_instructions = ?,
                resolution_notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&activity.category)
        .bind(&activity.subcategory)
        .bind(&activity.location)
        .bind(activity.latitude)
        .bind(activity.longitude)
        .bind(&activity.notes)
        .bind(&activity.photo_url)
        .bind(activity.status.as_str())
        .bind(&activity.assigned_to_user_id)
        .bind(&activity.assignment_instructions)
        .bind(&activity.resolution_notes)
        .bind(activity.updated_at.timestamp())
        .bind(&activity.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_activity(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM activities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Activity updates (append-only)
    // ------------------------------------------------------------------

    pub async fn insert_activity_update(&self, update: &ActivityUpdate) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_updates (id, activity_id, author_id, status, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&update.id)
        .bind(&update.activity_id)
        .bind(&update.author_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.note)
        .bind(update.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List an activity's audit trail in insertion order.
    pub async fn list_activity_updates(
        &self,
        activity_id: &str,
    ) -> anyhow::Result<Vec<ActivityUpdate>> {
        let rows = sqlx::query(
            "SELECT * FROM activity_updates WHERE activity_id = ? ORDER BY created_at, rowid",
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(update_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    pub async fn insert_assignment(&self, assignment: &Assignment) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assignments (id, activity_id, user_id, instructions, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&assignment.id)
        .bind(&assignment.activity_id)
        .bind(&assignment.user_id)
        .bind(&assignment.instructions)
        .bind(assignment.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_assignment(&self, id: &str) -> anyhow::Result<Option<Assignment>> {
        let row = sqlx::query("SELECT * FROM assignments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(assignment_from_row).transpose()
    }

    /// Whether a (activity, user) assignment already exists.
    pub async fn assignment_exists(
        &self,
        activity_id: &str,
        user_id: &str,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM assignments WHERE activity_id = ? AND user_id = ?",
        )
        .bind(activity_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    pub async fn list_assignments(&self, activity_id: &str) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query("SELECT * FROM assignments WHERE activity_id = ? ORDER BY created_at")
            .bind(activity_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(assignment_from_row).collect()
    }

    pub async fn delete_assignment(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM assignments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // WhatsApp messages
    // ------------------------------------------------------------------

    pub async fn insert_whatsapp_message(&self, message: &WhatsAppMessage) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whatsapp_messages
                (id, message_sid, from_phone, body, direction, activity_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.message_sid)
        .bind(&message.from_phone)
        .bind(&message.body)
        .bind(&message.direction)
        .bind(&message.activity_id)
        .bind(message.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_whatsapp_messages(&self) -> anyhow::Result<Vec<WhatsAppMessage>> {
        let rows = sqlx::query("SELECT * FROM whatsapp_messages ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(message_from_row).collect()
    }

    // ------------------------------------------------------------------
    // LLM configurations
    // ------------------------------------------------------------------

    pub async fn insert_llm_config(&self, config: &LlmConfig) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_configs
                (id, provider, model, api_key, is_active, is_default, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&config.id)
        .bind(&config.provider)
        .bind(&config.model)
        .bind(&config.api_key)
        .bind(config.is_active)
        .bind(config.is_default)
        .bind(config.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_llm_config(&self, id: &str) -> anyhow::Result<Option<LlmConfig>> {
        let row = sqlx::query("SELECT * FROM llm_configs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(llm_config_from_row).transpose()
    }

    pub async fn list_llm_configs(&self) -> anyhow::Result<Vec<LlmConfig>> {
        let rows = sqlx::query("SELECT * FROM llm_configs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(llm_config_from_row).collect()
    }

    /// Active configurations, default first, in the order needed by the
    /// provider fallback chain.
    pub async fn active_llm_configs(&self) -> anyhow::Result<Vec<LlmConfig>> {
        let rows = sqlx::query(
            "SELECT * FROM llm_configs WHERE is_active = 1 \
             ORDER BY is_default DESC, created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(llm_config_from_row).collect()
    }

    pub async fn update_llm_config(&self, config: &LlmConfig) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE llm_configs SET provider = ?, model = ?, api_key = ?, is_active = ? \
             WHERE id = ?",
        )
        .bind(&config.provider)
        .bind(&config.model)
        .bind(&config.api_key)
        .bind(config.is_active)
        .bind(&config.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark one configuration as default, clearing any previous default in
    /// the same transaction so at most one row carries the flag.
    pub async fn set_default_llm_config(&self, id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE llm_configs SET is_default = 0 WHERE is_default = 1")
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("UPDATE llm_configs SET is_default = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Unknown id: roll back so the previous default survives.
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn delete_llm_config(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM llm_configs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;

    async fn memory_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    fn make_activity() -> Activity {
        let now = Utc::now();
        Activity {
            id: new_id(),
            category: "maintenance".to_string(),
            subcategory: Some("leak".to_string()),
            location: "Room 4".to_string(),
            latitude: Some(51.5),
            longitude: Some(-0.1),
            notes: Some("water on the floor".to_string()),
            photo_url: None,
            status: ActivityStatus::Unassigned,
            assigned_to_user_id: None,
            assignment_instructions: None,
            resolution_notes: None,
            reported_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_activity() {
        let storage = memory_storage().await;
        let activity = make_activity();

        storage.insert_activity(&activity).await.unwrap();

        let fetched = storage.get_activity(&activity.id).await.unwrap().unwrap();
        assert_eq!(fetched.category, "maintenance");
        assert_eq!(fetched.status, ActivityStatus::Unassigned);
        assert_eq!(fetched.latitude, Some(51.5));
    }

    #[tokio::test]
    async fn test_update_activity_persists_transition() {
        let storage = memory_storage().await;
        let mut activity = make_activity();
        storage.insert_activity(&activity).await.unwrap();

        activity.set_status(ActivityStatus::Resolved, Some("fixed".to_string()));
        storage.update_activity(&mut activity).await.unwrap();

        let fetched = storage.get_activity(&activity.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ActivityStatus::Resolved);
        assert_eq!(fetched.resolution_notes.as_deref(), Some("fixed"));
    }

    #[tokio::test]
    async fn test_update_activity_refreshes_updated_at() {
        let storage = memory_storage().await;
        let mut activity = make_activity();
        let past = Utc::now() - chrono::Duration::seconds(120);
        activity.created_at = past;
        activity.updated_at = past;
        storage.insert_activity(&activity).await.unwrap();

        activity.notes = Some("now with more water".to_string());
        storage.update_activity(&mut activity).await.unwrap();

        // The caller's copy carries the timestamp that was written.
        assert!(activity.updated_at > past);
        // Stored at second resolution.
        let fetched = storage.get_activity(&activity.id).await.unwrap().unwrap();
        assert_eq!(fetched.updated_at.timestamp(), activity.updated_at.timestamp());
        assert!(fetched.updated_at > fetched.created_at);
    }

    #[tokio::test]
    async fn test_list_activities_filters() {
        let storage = memory_storage().await;

        let mut a = make_activity();
        a.set_status(ActivityStatus::Open, None);
        storage.insert_activity(&a).await.unwrap();

        let mut b = make_activity();
        b.category = "security".to_string();
        storage.insert_activity(&b).await.unwrap();

        let open = storage
            .list_activities(Some("Open"), None)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);

        let security = storage
            .list_activities(None, Some("security"))
            .await
            .unwrap();
        assert_eq!(security.len(), 1);
        assert_eq!(security[0].id, b.id);

        let all = storage.list_activities(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_assignment_rejected() {
        let storage = memory_storage().await;
        let activity = make_activity();
        storage.insert_activity(&activity).await.unwrap();

        let assignment = Assignment {
            id: new_id(),
            activity_id: activity.id.clone(),
            user_id: "user1".to_string(),
            instructions: None,
            created_at: Utc::now(),
        };
        storage.insert_assignment(&assignment).await.unwrap();

        assert!(storage
            .assignment_exists(&activity.id, "user1")
            .await
            .unwrap());

        let duplicate = Assignment {
            id: new_id(),
            ..assignment
        };
        assert!(storage.insert_assignment(&duplicate).await.is_err());
    }

    #[tokio::test]
    async fn test_activity_updates_are_ordered() {
        let storage = memory_storage().await;
        let activity = make_activity();
        storage.insert_activity(&activity).await.unwrap();

        let now = Utc::now();
        for (i, note) in ["first", "second", "third"].iter().enumerate() {
            let update = ActivityUpdate {
                id: new_id(),
                activity_id: activity.id.clone(),
                author_id: None,
                status: None,
                note: note.to_string(),
                created_at: now + chrono::Duration::seconds(i as i64),
            };
            storage.insert_activity_update(&update).await.unwrap();
        }

        let updates = storage.list_activity_updates(&activity.id).await.unwrap();
        let notes: Vec<&str> = updates.iter().map(|u| u.note.as_str()).collect();
        assert_eq!(notes, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_single_default_llm_config() {
        let storage = memory_storage().await;

        let first = LlmConfig {
            id: new_id(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: "sk-first".to_string(),
            is_active: true,
            is_default: true,
            created_at: Utc::now(),
        };
        storage.insert_llm_config(&first).await.unwrap();

        let second = LlmConfig {
            id: new_id(),
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku".to_string(),
            api_key: "sk-second".to_string(),
            is_active: true,
            is_default: false,
            created_at: Utc::now(),
        };
        storage.insert_llm_config(&second).await.unwrap();

        assert!(storage.set_default_llm_config(&second.id).await.unwrap());

        let configs = storage.list_llm_configs().await.unwrap();
        let defaults: Vec<&LlmConfig> = configs.iter().filter(|c| c.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);

        // Redundant re-set keeps the invariant.
        assert!(storage.set_default_llm_config(&second.id).await.unwrap());
        let configs = storage.list_llm_configs().await.unwrap();
        assert_eq!(configs.iter().filter(|c| c.is_default).count(), 1);
    }

    #[tokio::test]
    async fn test_category_name_unique() {
        let storage = memory_storage().await;

        let category = Category {
            id: new_id(),
            name: "maintenance".to_string(),
            created_at: Utc::now(),
        };
        storage.insert_category(&category).await.unwrap();

        let duplicate = Category {
            id: new_id(),
            name: "maintenance".to_string(),
            created_at: Utc::now(),
        };
        assert!(storage.insert_category(&duplicate).await.is_err());

        let found = storage
            .get_category_by_name("maintenance")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, category.id);
    }

    #[tokio::test]
    async fn test_user_crud() {
        let storage = memory_storage().await;

        let mut user = User {
            id: new_id(),
            name: "Ana".to_string(),
            phone: Some("+15550001111".to_string()),
            role: "staff".to_string(),
            created_at: Utc::now(),
        };
        storage.insert_user(&user).await.unwrap();

        user.role = "admin".to_string();
        storage.update_user(&user).await.unwrap();

        let fetched = storage.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(fetched.role, "admin");

        assert!(storage.delete_user(&user.id).await.unwrap());
        assert!(!storage.delete_user(&user.id).await.unwrap());
        assert!(storage.get_user(&user.id).await.unwrap().is_none());
    }
}
