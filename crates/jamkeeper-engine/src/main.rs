//! Headless Jamkeeper engine.
//!
//! Wires the event store, the derby reducers, and the game context factory
//! together, starts one game, and keeps its realtime clock running until
//! interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$JAMKEEPER_CONFIG` (default `jamkeeper.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the event store and the game context factory
//! 4. Create a game and load its context, which starts its clock
//! 5. Start the first jam at the current tick
//! 6. Wait for ctrl-c, log the final state, and unload the game

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use jamkeeper_core::{
    EngineConfig, EventBus, GameContextFactory, LogFormat, LoggingConfig, SystemTickSource,
    TickSource,
};
use jamkeeper_db::{EventStore, InMemoryEventStore};
use jamkeeper_reducers::derby_registry;
use jamkeeper_types::{EventBody, GameId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

const DEFAULT_CONFIG_PATH: &str = "jamkeeper.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, game bring-up, or the shutdown
/// signal fails.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration. Logging depends on it, so report afterwards.
    let config_path = config_path(std::env::var("JAMKEEPER_CONFIG").ok());
    let config_found = config_path.exists();
    let config = if config_found {
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::parse("")?
    };

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("jamkeeper-engine starting");
    if config_found {
        info!(path = %config_path.display(), "configuration loaded");
    } else {
        info!(path = %config_path.display(), "config file not found, using defaults");
    }
    info!(
        clock_interval_ms = config.engine.clock_interval_ms,
        keyframe_interval = config.engine.keyframe_interval,
        max_keyframes = config.engine.max_keyframes,
        period_duration_ms = config.rules.period_duration_ms,
        jam_duration_ms = config.rules.jam_duration_ms,
        "engine configured"
    );

    // 3. Create the store and the factory.
    let store = Arc::new(InMemoryEventStore::new());
    let tick_source: Arc<dyn TickSource> = Arc::new(SystemTickSource);
    let factory = Arc::new(GameContextFactory::new(
        config.engine.clone(),
        Arc::clone(&store) as Arc<dyn EventStore>,
        derby_registry(config.rules),
        tick_source,
    ));
    let bus = EventBus::new(Arc::clone(&factory));

    // 4. Create a game and bring it up.
    let game_id = GameId::new();
    store.create_game(game_id).await;
    let context = factory.get_game(game_id).await?;
    info!(%game_id, realtime = context.clock().is_realtime(), "game loaded");

    // 5. Start the first jam.
    let outcome = bus
        .add_event_at_current_tick(game_id, EventBody::JamStarted)
        .await?;
    if outcome.is_recorded() {
        info!(%game_id, tick = outcome.event().tick(), "first jam started");
    } else {
        warn!(%game_id, "first jam start was not recorded");
    }

    // 6. Run until interrupted.
    info!(%game_id, "engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|source| EngineError::Signal { source })?;

    let snapshot = context.lock().await.state().snapshot_json()?;
    info!(
        %game_id,
        events = store.event_count(game_id).await,
        state = %serde_json::to_string(&snapshot)?,
        "final state"
    );
    factory.unload_game(game_id).await;
    info!("jamkeeper-engine shutdown complete");
    Ok(())
}

/// Resolve the config path from the `JAMKEEPER_CONFIG` value, if set.
fn config_path(from_env: Option<String>) -> PathBuf {
    from_env
        .filter(|path| !path.trim().is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_when_unset_or_blank() {
        assert_eq!(config_path(None), PathBuf::from("jamkeeper.yaml"));
        assert_eq!(config_path(Some("  ".to_owned())), PathBuf::from("jamkeeper.yaml"));
    }

    #[test]
    fn config_path_uses_env_value() {
        assert_eq!(
            config_path(Some("/etc/jamkeeper/game.yaml".to_owned())),
            PathBuf::from("/etc/jamkeeper/game.yaml")
        );
    }
}
