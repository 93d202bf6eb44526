//! Alias edge repository
//!
//! Edges live in the database only; the in-memory read view is rebuilt
//! from here. Reinforcement and decay both happen through this repository
//! so the registry never writes concurrently with discovery.

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use wiki_agent_core::{alias::canonical_pair, AliasEdge, AliasKind};

use crate::client::SqliteStore;
use crate::documents::parse_timestamp;
use crate::error::PersistenceError;

/// Outcome of one decay pass
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayStats {
    pub decayed: u64,
    pub soft_deleted: u64,
}

impl SqliteStore {
    /// Insert a new edge or reinforce the existing one.
    ///
    /// Reinforcement bumps confidence by `reinforcement_step` (capped at
    /// 1.0), increments the counter and resets the decay clock.
    pub async fn observe_alias_edge(
        &self,
        edge: &AliasEdge,
        reinforcement_step: f32,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let (term_a, term_b) = canonical_pair(&edge.term_a, &edge.term_b);

        let existing = sqlx::query(
            "SELECT confidence, reinforcements, provenance_docs FROM alias_edges
             WHERE term_a = ? AND term_b = ?",
        )
        .bind(&term_a)
        .bind(&term_b)
        .fetch_optional(self.pool())
        .await?;

        match existing {
            Some(row) => {
                let confidence: f64 = row.get("confidence");
                let reinforcements: i64 = row.get("reinforcements");
                let provenance: String = row.get("provenance_docs");
                let mut docs: Vec<String> = serde_json::from_str(&provenance)?;
                for doc in &edge.provenance_docs {
                    if !docs.contains(doc) {
                        docs.push(doc.clone());
                    }
                }
                let new_confidence = (confidence as f32 + reinforcement_step).min(1.0);

                sqlx::query(
                    "UPDATE alias_edges SET confidence = ?, reinforcements = ?, last_seen = ?,
                     provenance_docs = ?, soft_deleted = 0
                     WHERE term_a = ? AND term_b = ?",
                )
                .bind(new_confidence as f64)
                .bind(reinforcements + 1)
                .bind(now.to_rfc3339())
                .bind(serde_json::to_string(&docs)?)
                .bind(&term_a)
                .bind(&term_b)
                .execute(self.pool())
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO alias_edges (term_a, term_b, kind, confidence, first_seen, last_seen,
                                             reinforcements, provenance_docs, soft_deleted)
                    VALUES (?, ?, ?, ?, ?, ?, 0, ?, 0)
                    "#,
                )
                .bind(&term_a)
                .bind(&term_b)
                .bind(edge.kind.as_str())
                .bind(edge.confidence as f64)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(serde_json::to_string(&edge.provenance_docs)?)
                .execute(self.pool())
                .await?;
            }
        }
        Ok(())
    }

    /// Every edge, optionally including soft-deleted ones (audit view)
    pub async fn list_alias_edges(
        &self,
        include_soft_deleted: bool,
    ) -> Result<Vec<AliasEdge>, PersistenceError> {
        let sql = if include_soft_deleted {
            "SELECT * FROM alias_edges ORDER BY term_a, term_b"
        } else {
            "SELECT * FROM alias_edges WHERE soft_deleted = 0 ORDER BY term_a, term_b"
        };
        let rows = sqlx::query(sql).fetch_all(self.pool()).await?;
        rows.into_iter().map(edge_from_row).collect()
    }

    /// Edges eligible for query expansion
    pub async fn expansion_edges(
        &self,
        min_confidence: f32,
    ) -> Result<Vec<AliasEdge>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM alias_edges WHERE soft_deleted = 0 AND confidence >= ?
             ORDER BY confidence DESC",
        )
        .bind(min_confidence as f64)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(edge_from_row).collect()
    }

    /// Apply the daily decay pass: edges not reinforced within
    /// `idle_days` are multiplied by `decay_factor`; edges falling below
    /// `soft_delete_floor` are soft-deleted (kept for audit).
    pub async fn decay_alias_edges(
        &self,
        now: DateTime<Utc>,
        decay_factor: f32,
        idle_days: i64,
        soft_delete_floor: f32,
    ) -> Result<DecayStats, PersistenceError> {
        let cutoff = (now - Duration::days(idle_days)).to_rfc3339();

        let decayed = sqlx::query(
            "UPDATE alias_edges SET confidence = confidence * ?
             WHERE soft_deleted = 0 AND last_seen < ?",
        )
        .bind(decay_factor as f64)
        .bind(&cutoff)
        .execute(self.pool())
        .await?
        .rows_affected();

        let soft_deleted = sqlx::query(
            "UPDATE alias_edges SET soft_deleted = 1
             WHERE soft_deleted = 0 AND confidence < ?",
        )
        .bind(soft_delete_floor as f64)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(DecayStats {
            decayed,
            soft_deleted,
        })
    }
}

fn edge_from_row(row: sqlx::sqlite::SqliteRow) -> Result<AliasEdge, PersistenceError> {
    let kind: String = row.get("kind");
    let provenance: String = row.get("provenance_docs");
    Ok(AliasEdge {
        term_a: row.get("term_a"),
        term_b: row.get("term_b"),
        kind: kind.parse().unwrap_or(AliasKind::Cooccurrence),
        confidence: row.get::<f64, _>("confidence") as f32,
        first_seen: parse_timestamp(row.get("first_seen")),
        last_seen: parse_timestamp(row.get("last_seen")),
        reinforcements: row.get::<i64, _>("reinforcements") as u32,
        provenance_docs: serde_json::from_str(&provenance)?,
        soft_deleted: row.get::<i64, _>("soft_deleted") != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: &str, b: &str, confidence: f32) -> AliasEdge {
        AliasEdge::new(a, b, AliasKind::Parenthetical, confidence, Utc::now())
    }

    #[tokio::test]
    async fn observation_reinforces_existing_edge() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let now = Utc::now();

        store
            .observe_alias_edge(&edge("sre", "stallions", 0.7), 0.10, now)
            .await
            .unwrap();
        store
            .observe_alias_edge(&edge("stallions", "sre", 0.7), 0.10, now)
            .await
            .unwrap();

        let edges = store.list_alias_edges(false).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].reinforcements, 1);
        assert!((edges[0].confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn confidence_caps_at_one() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let now = Utc::now();
        store
            .observe_alias_edge(&edge("a b", "c d", 0.95), 0.10, now)
            .await
            .unwrap();
        store
            .observe_alias_edge(&edge("a b", "c d", 0.95), 0.10, now)
            .await
            .unwrap();
        let edges = store.list_alias_edges(false).await.unwrap();
        assert_eq!(edges[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn decay_skips_recent_edges_and_soft_deletes_weak_ones() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let now = Utc::now();
        let stale = now - Duration::days(30);

        // Fresh edge: untouched by decay
        store
            .observe_alias_edge(&edge("fresh", "edge one", 0.5), 0.10, now)
            .await
            .unwrap();
        // Stale edge above the floor: decays
        store
            .observe_alias_edge(&edge("stale", "edge two", 0.5), 0.10, stale)
            .await
            .unwrap();
        // Stale edge near the floor: decays then soft-deletes
        store
            .observe_alias_edge(&edge("weak", "edge three", 0.10), 0.10, stale)
            .await
            .unwrap();

        let stats = store
            .decay_alias_edges(now, 0.97, 7, 0.10)
            .await
            .unwrap();
        assert_eq!(stats.decayed, 2);
        assert_eq!(stats.soft_deleted, 1);

        let active = store.list_alias_edges(false).await.unwrap();
        assert_eq!(active.len(), 2);
        let fresh = active
            .iter()
            .find(|e| e.term_a == "fresh" || e.term_b == "fresh")
            .unwrap();
        assert!((fresh.confidence - 0.5).abs() < 1e-6);

        // Soft-deleted edge still visible in the audit view
        let all = store.list_alias_edges(true).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|e| e.soft_deleted));

        // Decay never produces negative confidence
        for e in &all {
            assert!(e.confidence >= 0.0);
        }
    }

    #[tokio::test]
    async fn expansion_excludes_low_confidence() {
        let store = SqliteStore::connect_in_memory().await.unwrap();
        let now = Utc::now();
        store
            .observe_alias_edge(&edge("strong", "pair one", 0.9), 0.10, now)
            .await
            .unwrap();
        store
            .observe_alias_edge(&edge("weak", "pair two", 0.2), 0.10, now)
            .await
            .unwrap();

        let edges = store.expansion_edges(0.30).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].term_a == "strong" || edges[0].term_b == "strong");
    }
}
