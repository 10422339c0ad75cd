//! Offline editing followed by a manual sync against the in-memory store.
//!
//! Run with:
//! ```bash
//! cargo run -p core-service --example offline_sync
//!
//! # JSON logs
//! cargo run -p core-service --example offline_sync -- json
//! ```

use bridge_traits::{Clock, FixedIdentity, LogLevel, SystemClock};
use core_records::{Game, RecordPayload, SyncableRecord, Team};
use core_runtime::config::CoreConfig;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_service::CoreService;
use core_sync::SyncConfig;
use provider_memory::InMemoryRemoteStore;
use std::env;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let format = match env::args().nth(1).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };
    init_logging(LoggingConfig::default().with_format(format).with_level(LogLevel::Debug))?;

    let remote = Arc::new(InMemoryRemoteStore::new());
    let config = CoreConfig::builder()
        .in_memory_database()
        .remote_store(remote.clone())
        .identity_provider(Arc::new(FixedIdentity::signed_in("coach-demo")))
        .build()?;
    let core = CoreService::bootstrap(config, SyncConfig::default()).await?;

    let clock = SystemClock;
    let records = core.records();
    let falcons = records
        .save(SyncableRecord::new_local(
            RecordPayload::Team(Team {
                name: "Falcons".to_string(),
                season: Some("Spring".to_string()),
                coach: Some("Sam".to_string()),
            }),
            clock.now_millis(),
        ))
        .await?;
    records
        .save(SyncableRecord::new_local(
            RecordPayload::Game(Game {
                team_id: falcons.local_id,
                opponent: "Owls".to_string(),
                scheduled_at: clock.now_millis() + 86_400_000,
                location: Some("North Field".to_string()),
                team_score: None,
                opponent_score: None,
            }),
            clock.now_millis(),
        ))
        .await?;

    let summary = core
        .start_manual_sync(|progress| {
            info!(from = %progress.from, to = %progress.phase, "Progress");
        })
        .await?;

    info!(
        outcome = summary.outcome.as_str(),
        synced = summary.synced(),
        queued = summary.queued,
        commits = remote.commit_count().await,
        "Sync finished"
    );
    info!(stats = ?core.queue_statistics().await?, "Retry queue");

    core.shutdown().await;
    Ok(())
}
