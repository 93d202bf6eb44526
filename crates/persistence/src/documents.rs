//! Document and chunk repository

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use wiki_agent_core::{Chunk, Document, SourceKind};

use crate::client::SqliteStore;
use crate::error::PersistenceError;

impl SqliteStore {
    /// Upsert a document row.
    ///
    /// Returns `true` when the stored content hash differed (or the row is
    /// new), i.e. when chunks must be rebuilt.
    pub async fn upsert_document(&self, doc: &Document) -> Result<bool, PersistenceError> {
        let existing_hash: Option<String> =
            sqlx::query("SELECT content_hash FROM documents WHERE id = ?")
                .bind(&doc.id)
                .fetch_optional(self.pool())
                .await?
                .map(|row| row.get("content_hash"));

        let changed = existing_hash.as_deref() != Some(doc.content_hash.as_str());

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_url, source_kind, title, text, last_modified, content_hash, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_url = excluded.source_url,
                source_kind = excluded.source_kind,
                title = excluded.title,
                text = excluded.text,
                last_modified = excluded.last_modified,
                content_hash = excluded.content_hash,
                tags = excluded.tags
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_url)
        .bind(doc.source_kind.as_str())
        .bind(&doc.title)
        .bind(&doc.text)
        .bind(doc.last_modified.to_rfc3339())
        .bind(&doc.content_hash)
        .bind(serde_json::to_string(&doc.tags)?)
        .execute(self.pool())
        .await?;

        Ok(changed)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(document_from_row).transpose()
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(document_from_row).collect()
    }

    /// Explicit purge: removes the document row and its chunks. Vector
    /// points are the caller's responsibility.
    pub async fn delete_document(&self, id: &str) -> Result<bool, PersistenceError> {
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a document's chunks atomically
    pub async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, ordinal, text, section_path, token_count, semantic_tags)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(&chunk.document_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(serde_json::to_string(&chunk.section_path)?)
            .bind(chunk.token_count as i64)
            .bind(serde_json::to_string(&chunk.semantic_tags)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn chunks_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<Chunk>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY ordinal")
            .bind(document_id)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(chunk_from_row).collect()
    }

    /// One chunk joined with its parent document, for search paths that
    /// only know the chunk id
    pub async fn chunk_with_document(
        &self,
        chunk_id: &Uuid,
    ) -> Result<Option<(Chunk, Document)>, PersistenceError> {
        let row = sqlx::query("SELECT document_id FROM chunks WHERE id = ?")
            .bind(chunk_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document_id: String = row.get("document_id");
        let Some(document) = self.get_document(&document_id).await? else {
            return Ok(None);
        };
        let chunk = self
            .chunks_for_document(&document_id)
            .await?
            .into_iter()
            .find(|c| &c.id == chunk_id);
        Ok(chunk.map(|c| (c, document)))
    }

    pub async fn document_count(&self) -> Result<u64, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents")
            .fetch_one(self.pool())
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Document, PersistenceError> {
    let kind: String = row.get("source_kind");
    let tags: String = row.get("tags");
    Ok(Document {
        id: row.get("id"),
        source_url: row.get("source_url"),
        source_kind: kind.parse().unwrap_or(SourceKind::Other),
        title: row.get("title"),
        text: row.get("text"),
        last_modified: parse_timestamp(row.get("last_modified")),
        content_hash: row.get("content_hash"),
        tags: serde_json::from_str(&tags)?,
    })
}

fn chunk_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Chunk, PersistenceError> {
    let id: String = row.get("id");
    let section_path: String = row.get("section_path");
    let semantic_tags: String = row.get("semantic_tags");
    Ok(Chunk {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        document_id: row.get("document_id"),
        ordinal: row.get::<i64, _>("ordinal") as u32,
        text: row.get("text"),
        section_path: serde_json::from_str(&section_path)?,
        token_count: row.get::<i64, _>("token_count") as u32,
        semantic_tags: serde_json::from_str(&semantic_tags)?,
    })
}

pub(crate) fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
