//! Table definitions

use sqlx::SqlitePool;

use crate::error::PersistenceError;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id            TEXT PRIMARY KEY,
        source_url    TEXT NOT NULL,
        source_kind   TEXT NOT NULL,
        title         TEXT NOT NULL,
        text          TEXT NOT NULL,
        last_modified TEXT NOT NULL,
        content_hash  TEXT NOT NULL,
        tags          TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id            TEXT PRIMARY KEY,
        document_id   TEXT NOT NULL REFERENCES documents(id),
        ordinal       INTEGER NOT NULL,
        text          TEXT NOT NULL,
        section_path  TEXT NOT NULL DEFAULT '[]',
        token_count   INTEGER NOT NULL,
        semantic_tags TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
    r#"
    CREATE TABLE IF NOT EXISTS alias_edges (
        term_a          TEXT NOT NULL,
        term_b          TEXT NOT NULL,
        kind            TEXT NOT NULL,
        confidence      REAL NOT NULL,
        first_seen      TEXT NOT NULL,
        last_seen       TEXT NOT NULL,
        reinforcements  INTEGER NOT NULL DEFAULT 0,
        provenance_docs TEXT NOT NULL DEFAULT '[]',
        soft_deleted    INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (term_a, term_b)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alias_edges_b ON alias_edges(term_b)",
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id            TEXT PRIMARY KEY,
        user_id       TEXT NOT NULL,
        mode          TEXT NOT NULL DEFAULT 'company',
        created_at    TEXT NOT NULL,
        last_activity TEXT NOT NULL,
        active        INTEGER NOT NULL DEFAULT 1,
        summary       TEXT
    )
    "#,
    // At most one active conversation per user
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_active_user
     ON conversations(user_id) WHERE active = 1",
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id                TEXT PRIMARY KEY,
        conversation_id   TEXT NOT NULL REFERENCES conversations(id),
        role              TEXT NOT NULL,
        content           TEXT NOT NULL,
        created_at        TEXT NOT NULL,
        sources           TEXT NOT NULL DEFAULT '[]',
        confidence        REAL,
        thinking_steps    TEXT NOT NULL DEFAULT '[]',
        prompt_tokens     INTEGER,
        completion_tokens INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation
     ON messages(conversation_id, created_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS learning_sessions (
        id                TEXT PRIMARY KEY,
        request_id        TEXT NOT NULL,
        user_id           TEXT NOT NULL,
        conversation_id   TEXT NOT NULL,
        query             TEXT NOT NULL,
        intent_type       TEXT NOT NULL,
        retrieved_count   INTEGER NOT NULL,
        conflict_count    INTEGER NOT NULL,
        confidence        REAL NOT NULL,
        prompt_tokens     INTEGER NOT NULL,
        completion_tokens INTEGER NOT NULL,
        created_at        TEXT NOT NULL
    )
    "#,
];

pub async fn create_tables(pool: &SqlitePool) -> Result<(), PersistenceError> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}
