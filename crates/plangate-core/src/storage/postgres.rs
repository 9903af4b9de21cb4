//! PostgreSQL backend for gate storage.
//!
//! Insert-if-absent maps to `INSERT ... ON CONFLICT DO NOTHING`; the caller that
//! observes `rows_affected() == 1` is the single winner. A locked item has no
//! row in `plangate_unlocks`.

use super::{
    ContentStore, EmailRecordStore, GateStorage, PaymentSessionStore, StorageError,
    StorageResult, UnlockStore,
};
use crate::types::{
    Arm, ContentItem, EmailCollectionRecord, EmailRecordKey, InsertOutcome, PaymentSessionRecord,
    PlanBody, PlanPreview, Subject, UnlockRecord, UnlockTransition, UnlockVia,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct PostgresGateStorage {
    pool: PgPool,
}

impl PostgresGateStorage {
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("postgres connect failed: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS plangate_content_items (
                content_id TEXT PRIMARY KEY,
                preview JSONB NOT NULL,
                full_body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS plangate_unlocks (
                content_id TEXT PRIMARY KEY,
                unlocked_via TEXT NOT NULL,
                unlocked_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS plangate_email_records (
                content_id TEXT NOT NULL,
                subject_key TEXT NOT NULL,
                subject_id TEXT NULL,
                email TEXT NOT NULL,
                arm TEXT NOT NULL,
                captured_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (content_id, subject_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS plangate_payment_sessions (
                session_id TEXT PRIMARY KEY,
                content_id TEXT NOT NULL,
                product TEXT NOT NULL,
                amount_minor BIGINT NOT NULL,
                currency TEXT NOT NULL,
                redirect_url TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_plangate_sessions_content ON plangate_payment_sessions (content_id)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn fetch_email_record(
        &self,
        key: &EmailRecordKey,
    ) -> StorageResult<Option<EmailCollectionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT content_id, subject_key, subject_id, email, arm, captured_at
              FROM plangate_email_records
             WHERE content_id = $1 AND subject_key = $2
            "#,
        )
        .bind(&key.content_id)
        .bind(key.subject.storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(email_row_to_record).transpose()
    }
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn decode<T>(row: &PgRow, column: &str) -> StorageResult<T>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| StorageError::Backend(format!("postgres decode {column} failed: {e}")))
}

fn content_row_to_item(row: PgRow) -> StorageResult<ContentItem> {
    Ok(ContentItem {
        content_id: decode(&row, "content_id")?,
        preview: PlanPreview(decode(&row, "preview")?),
        full: PlanBody(decode(&row, "full_body")?),
        created_at: decode(&row, "created_at")?,
    })
}

fn unlock_row_to_record(row: PgRow) -> StorageResult<UnlockRecord> {
    let via: String = decode(&row, "unlocked_via")?;
    Ok(UnlockRecord {
        content_id: decode(&row, "content_id")?,
        unlocked_via: UnlockVia::parse(&via).ok_or_else(|| {
            StorageError::Serialization(format!("unknown unlock provenance '{via}'"))
        })?,
        unlocked_at: decode(&row, "unlocked_at")?,
    })
}

fn parse_arm(value: &str) -> StorageResult<Arm> {
    match value {
        "payment_gate" => Ok(Arm::PaymentGate),
        "email_gate" => Ok(Arm::EmailGate),
        other => Err(StorageError::Serialization(format!(
            "unknown experiment arm '{other}'"
        ))),
    }
}

fn email_row_to_record(row: PgRow) -> StorageResult<EmailCollectionRecord> {
    let subject_id: Option<String> = decode(&row, "subject_id")?;
    let email: String = decode(&row, "email")?;
    let arm: String = decode(&row, "arm")?;
    let subject = match subject_id {
        Some(id) => Subject::Known(id),
        None => Subject::Anonymous,
    };

    Ok(EmailCollectionRecord {
        key: EmailRecordKey {
            content_id: decode(&row, "content_id")?,
            subject,
        },
        email,
        arm: parse_arm(&arm)?,
        captured_at: decode(&row, "captured_at")?,
    })
}

fn session_row_to_record(row: PgRow) -> StorageResult<PaymentSessionRecord> {
    let amount: i64 = decode(&row, "amount_minor")?;
    Ok(PaymentSessionRecord {
        session_id: decode(&row, "session_id")?,
        content_id: decode(&row, "content_id")?,
        product: decode(&row, "product")?,
        amount_minor: amount
            .try_into()
            .map_err(|_| StorageError::Serialization("negative amount in storage".to_string()))?,
        currency: decode(&row, "currency")?,
        redirect_url: decode(&row, "redirect_url")?,
        created_at: decode(&row, "created_at")?,
    })
}

#[async_trait]
impl ContentStore for PostgresGateStorage {
    async fn insert_content_if_absent(
        &self,
        item: ContentItem,
    ) -> StorageResult<InsertOutcome<ContentItem>> {
        let result = sqlx::query(
            r#"
            INSERT INTO plangate_content_items (content_id, preview, full_body, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (content_id) DO NOTHING
            "#,
        )
        .bind(&item.content_id)
        .bind(&item.preview.0)
        .bind(&item.full.0)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted(item));
        }

        let existing = self.get_content(&item.content_id).await?.ok_or_else(|| {
            StorageError::InvariantViolation(format!(
                "content {} conflicted but could not be read back",
                item.content_id
            ))
        })?;
        Ok(InsertOutcome::AlreadyPresent(existing))
    }

    async fn get_content(&self, content_id: &str) -> StorageResult<Option<ContentItem>> {
        let row = sqlx::query(
            r#"
            SELECT content_id, preview, full_body, created_at
              FROM plangate_content_items
             WHERE content_id = $1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(content_row_to_item).transpose()
    }
}

#[async_trait]
impl UnlockStore for PostgresGateStorage {
    async fn get_unlock(&self, content_id: &str) -> StorageResult<Option<UnlockRecord>> {
        let row = sqlx::query(
            "SELECT content_id, unlocked_via, unlocked_at FROM plangate_unlocks WHERE content_id = $1",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(unlock_row_to_record).transpose()
    }

    async fn set_unlocked_if_locked(
        &self,
        content_id: &str,
        via: UnlockVia,
        at: DateTime<Utc>,
    ) -> StorageResult<UnlockTransition> {
        let result = sqlx::query(
            r#"
            INSERT INTO plangate_unlocks (content_id, unlocked_via, unlocked_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (content_id) DO NOTHING
            "#,
        )
        .bind(content_id)
        .bind(via.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(UnlockTransition::Transitioned(UnlockRecord {
                content_id: content_id.to_string(),
                unlocked_via: via,
                unlocked_at: at,
            }));
        }

        let existing = self.get_unlock(content_id).await?.ok_or_else(|| {
            StorageError::InvariantViolation(format!(
                "unlock for {content_id} conflicted but could not be read back"
            ))
        })?;
        Ok(UnlockTransition::AlreadyUnlocked(existing))
    }
}

#[async_trait]
impl EmailRecordStore for PostgresGateStorage {
    async fn insert_email_if_absent(
        &self,
        record: EmailCollectionRecord,
    ) -> StorageResult<InsertOutcome<EmailCollectionRecord>> {
        let result = sqlx::query(
            r#"
            INSERT INTO plangate_email_records
                (content_id, subject_key, subject_id, email, arm, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (content_id, subject_key) DO NOTHING
            "#,
        )
        .bind(&record.key.content_id)
        .bind(record.key.subject.storage_key())
        .bind(record.key.subject.subject_id())
        .bind(&record.email)
        .bind(record.arm.as_str())
        .bind(record.captured_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted(record));
        }

        let existing = self.fetch_email_record(&record.key).await?.ok_or_else(|| {
            StorageError::InvariantViolation(format!(
                "email record for {} conflicted but could not be read back",
                record.key.content_id
            ))
        })?;
        Ok(InsertOutcome::AlreadyPresent(existing))
    }

    async fn list_email_records(
        &self,
        content_id: &str,
    ) -> StorageResult<Vec<EmailCollectionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT content_id, subject_key, subject_id, email, arm, captured_at
              FROM plangate_email_records
             WHERE content_id = $1
             ORDER BY captured_at ASC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(email_row_to_record).collect()
    }
}

#[async_trait]
impl PaymentSessionStore for PostgresGateStorage {
    async fn record_session(&self, record: PaymentSessionRecord) -> StorageResult<()> {
        let amount: i64 = record.amount_minor.try_into().map_err(|_| {
            StorageError::Serialization("amount exceeds postgres BIGINT range".to_string())
        })?;
        let result = sqlx::query(
            r#"
            INSERT INTO plangate_payment_sessions
                (session_id, content_id, product, amount_minor, currency, redirect_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.content_id)
        .bind(&record.product)
        .bind(amount)
        .bind(&record.currency)
        .bind(&record.redirect_url)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::InvariantViolation(format!(
                "payment session {} already recorded",
                record.session_id
            )));
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<Option<PaymentSessionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, content_id, product, amount_minor, currency, redirect_url, created_at
              FROM plangate_payment_sessions
             WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(session_row_to_record).transpose()
    }

    async fn list_sessions(&self, content_id: &str) -> StorageResult<Vec<PaymentSessionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, content_id, product, amount_minor, currency, redirect_url, created_at
              FROM plangate_payment_sessions
             WHERE content_id = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(session_row_to_record).collect()
    }
}

impl GateStorage for PostgresGateStorage {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_labels_parse_back() {
        for arm in [Arm::PaymentGate, Arm::EmailGate] {
            assert_eq!(parse_arm(arm.as_str()).unwrap(), arm);
        }
        assert!(parse_arm("control").is_err());
    }
}
