use chrono::{DateTime, Duration, Utc};
use shared::{AnalysisType, RequestStatus, UserRole};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::IntoEnumIterator;
use uuid::Uuid;

use super::gateway::{
    DashboardSource, PersistenceError, PersistenceGateway, RequestId, ResultId, UserStore,
};
use super::models::{AnalysisRequestRecord, NewUser, User};
use crate::admin::stats::{counted_statuses, DashboardCounts};
use crate::inference::labels::CropKind;
use crate::pipeline::types::AnalysisResult;

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;
        log::info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        log::info!("Database schema is up to date");
        Ok(())
    }

    /// Inserts the known crops and their disease classes; existing rows are kept.
    pub async fn seed_reference_data(&self) -> Result<(), PersistenceError> {
        for crop in CropKind::iter() {
            sqlx::query("INSERT INTO crops (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(crop.to_string())
                .execute(&self.pool)
                .await?;

            for disease in crop.diseases() {
                sqlx::query(
                    r#"
                    INSERT INTO diseases (crop_id, name)
                    SELECT id, $2 FROM crops WHERE name = $1
                    ON CONFLICT (name) DO NOTHING
                    "#,
                )
                .bind(crop.to_string())
                .bind(disease.native_label())
                .execute(&self.pool)
                .await?;
            }
        }
        log::info!("Reference crop and disease data seeded");
        Ok(())
    }
}

impl PersistenceGateway for PgRepository {
    async fn create_request(
        &self,
        user_id: Option<Uuid>,
        image_ref: &str,
        analysis_type: AnalysisType,
    ) -> Result<RequestId, PersistenceError> {
        let record = AnalysisRequestRecord::new(user_id, image_ref, analysis_type);
        sqlx::query(
            r#"
            INSERT INTO analysis_requests (id, user_id, image_ref, analysis_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.image_ref)
        .bind(record.analysis_type.as_ref())
        .bind(record.status.as_ref())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        log::debug!("Created analysis request {}", record.id);
        Ok(record.id)
    }

    async fn update_status(
        &self,
        request_id: RequestId,
        status: RequestStatus,
        processing_time_ms: Option<i64>,
    ) -> Result<(), PersistenceError> {
        let updated = sqlx::query(
            r#"
            UPDATE analysis_requests
            SET status = $1, processing_time_ms = COALESCE($2, processing_time_ms)
            WHERE id = $3
            "#,
        )
        .bind(status.as_ref())
        .bind(processing_time_ms)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(PersistenceError::NotFound);
        }
        log::debug!("Analysis request {} is now {}", request_id, status);
        Ok(())
    }

    async fn save_result(
        &self,
        request_id: RequestId,
        result: &AnalysisResult,
    ) -> Result<ResultId, PersistenceError> {
        let id = Uuid::new_v4();
        let detection_data = serde_json::to_value(result.detections())?;
        sqlx::query(
            r#"
            INSERT INTO analysis_results
                (id, request_id, total_detections, detection_data, processing_status, detail)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(request_id)
        .bind(result.total_detections() as i32)
        .bind(detection_data)
        .bind(result.status.as_ref())
        .bind(&result.detail)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AnalysisRequestRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, image_ref, analysis_type, status, created_at, processing_time_ms
            FROM analysis_requests
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_request).collect()
    }
}

impl UserStore for PgRepository {
    async fn create_user(&self, user: &NewUser) -> Result<User, PersistenceError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, full_name, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, username, email, password_hash, full_name, role, is_active, created_at, last_login
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.role.as_ref())
        .fetch_one(&self.pool)
        .await?;
        log::info!("Created user {} ({})", user.username, user.email);
        parse_user(&row)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, full_name, role, is_active, created_at, last_login
            FROM users WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_user).transpose()
    }

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, full_name, role, is_active, created_at, last_login
            FROM users WHERE username = $1 OR email = $1
            ORDER BY (username = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_user).transpose()
    }

    async fn username_exists(&self, username: &str) -> Result<bool, PersistenceError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, PersistenceError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn update_last_login(&self, user_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE users SET last_login = now() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl DashboardSource for PgRepository {
    async fn dashboard_counts(&self, now: DateTime<Utc>) -> Result<DashboardCounts, PersistenceError> {
        let since = now - Duration::days(30);

        let user_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE is_active) AS active,
                   COUNT(*) FILTER (WHERE created_at >= $1) AS recent
            FROM users
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let mut users_by_role = BTreeMap::new();
        for row in sqlx::query("SELECT role, COUNT(*) AS count FROM users GROUP BY role")
            .fetch_all(&self.pool)
            .await?
        {
            users_by_role.insert(row.try_get::<String, _>("role")?, row.try_get::<i64, _>("count")?);
        }

        let request_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE created_at >= $1) AS recent,
                   COUNT(*) FILTER (WHERE created_at::date = $2::date) AS today,
                   COUNT(*) FILTER (WHERE status = $3) AS completed
            FROM analysis_requests
            "#,
        )
        .bind(since)
        .bind(now)
        .bind(RequestStatus::Completed.as_ref())
        .fetch_one(&self.pool)
        .await?;

        let detection_data: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT detection_data FROM analysis_results WHERE processing_status = ANY($1)",
        )
        .bind(counted_statuses())
        .fetch_all(&self.pool)
        .await?;

        Ok(DashboardCounts {
            total_users: user_row.try_get("total")?,
            active_users: user_row.try_get("active")?,
            new_users_30d: user_row.try_get("recent")?,
            users_by_role,
            total_analyses: request_row.try_get("total")?,
            analyses_30d: request_row.try_get("recent")?,
            today_analyses: request_row.try_get("today")?,
            completed_analyses: request_row.try_get("completed")?,
            detection_data,
        })
    }
}

fn parse_enum<T: FromStr>(row: &PgRow, column: &str) -> Result<T, PersistenceError> {
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|_| PersistenceError::InvalidData(format!("{column}: {raw}")))
}

fn parse_user(row: &PgRow) -> Result<User, PersistenceError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        full_name: row.try_get("full_name")?,
        role: parse_enum::<UserRole>(row, "role")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        last_login: row.try_get("last_login")?,
    })
}

fn parse_request(row: &PgRow) -> Result<AnalysisRequestRecord, PersistenceError> {
    Ok(AnalysisRequestRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        image_ref: row.try_get("image_ref")?,
        analysis_type: parse_enum::<AnalysisType>(row, "analysis_type")?,
        status: parse_enum::<RequestStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
    })
}
