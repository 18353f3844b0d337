use anyhow::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Get the raw JSON text stored under `key`.
    ///
    /// # Returns
    ///
    /// The stored document if the key exists, or `None` if it was never written.
    pub async fn get_document(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM documents WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Store a document (UPSERT).
    ///
    /// The whole value is replaced in one statement, so concurrent readers see
    /// either the previous document or the new one.
    pub async fn put_document(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a document. Returns whether a row was removed.
    pub async fn delete_document(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All document keys starting with `prefix`, ordered by key.
    ///
    /// Matching is done with `substr` rather than `LIKE` because cache keys
    /// embed URLs, which routinely contain `%` and `_`.
    pub async fn document_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM documents WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    /// Load and deserialize a document.
    ///
    /// Absent documents and documents that are not valid JSON for `T` both
    /// yield `None`; the latter is logged so a corrupted record degrades to
    /// defaults instead of making the application unusable.
    pub async fn load_document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_document(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Malformed persisted document, using defaults");
                Ok(None)
            }
        }
    }

    /// Serialize and store a document.
    pub async fn store_document<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.put_document(key, &json).await
    }
}
