//! Background maintenance workers
//!
//! Alias decay and the idle-conversation sweeper run on their own tasks
//! and never touch the request path.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use wiki_agent_config::Settings;
use wiki_agent_persistence::SqliteStore;
use wiki_agent_rag::AliasRegistry;

const DECAY_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Spawn the daily alias-decay task and the hourly idle sweeper
pub fn spawn_background_workers(
    settings: Arc<Settings>,
    store: SqliteStore,
    aliases: Arc<AliasRegistry>,
) {
    {
        let settings = Arc::clone(&settings);
        let store = store.clone();
        let aliases = Arc::clone(&aliases);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DECAY_INTERVAL);
            // The first tick fires immediately; skip it so startup is quiet
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store
                    .decay_alias_edges(
                        Utc::now(),
                        settings.alias.decay_factor,
                        settings.alias.decay_interval_days,
                        wiki_agent_config::constants::alias::SOFT_DELETE_FLOOR,
                    )
                    .await
                {
                    Ok(stats) => {
                        tracing::info!(
                            decayed = stats.decayed,
                            soft_deleted = stats.soft_deleted,
                            "Alias decay pass complete"
                        );
                        if let Err(error) =
                            aliases.reload(&store, settings.alias.min_confidence).await
                        {
                            tracing::warn!(%error, "Alias registry reload failed after decay");
                        }
                    }
                    Err(error) => tracing::warn!(%error, "Alias decay pass failed"),
                }
            }
        });
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff =
                Utc::now() - ChronoDuration::seconds(settings.conversation.idle_timeout_s as i64);
            match store.close_idle_conversations(cutoff).await {
                Ok(0) => {}
                Ok(closed) => tracing::info!(closed, "Idle conversations deactivated"),
                Err(error) => tracing::warn!(%error, "Idle sweep failed"),
            }
        }
    });
}
