//! Application State
//!
//! Process-wide state for one execution context: database, configuration and
//! the insight engine built from them.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use insight_sync_llm::{create_provider, LlmProvider};

use crate::models::settings::{AppConfig, SettingsUpdate};
use crate::services::insights::InsightEngine;
use crate::storage::{ConfigService, Database, LocalCache};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::local_cache_path;

/// Application state shared by the CLI commands
pub struct AppState {
    /// SQLite database with connection pool
    database: Arc<RwLock<Option<Database>>>,
    /// Configuration service for app settings
    config: Arc<RwLock<Option<ConfigService>>>,
    /// Insight engine for this execution context
    engine: Arc<RwLock<Option<Arc<InsightEngine>>>>,
    /// Whether the state has been initialized
    initialized: Arc<RwLock<bool>>,
}

impl AppState {
    /// Create a new uninitialized app state
    pub fn new() -> Self {
        Self {
            database: Arc::new(RwLock::new(None)),
            config: Arc::new(RwLock::new(None)),
            engine: Arc::new(RwLock::new(None)),
            initialized: Arc::new(RwLock::new(false)),
        }
    }

    /// Initialize all services from the default locations
    pub async fn initialize(&self) -> AppResult<()> {
        if *self.initialized.read().await {
            return Ok(());
        }
        let config = ConfigService::new()?;
        let provider_config = config
            .get_config()
            .provider_config()
            .map_err(AppError::config)?;
        let provider = create_provider(provider_config)?;
        self.initialize_with(config, Database::new()?, provider, Arc::new(SystemClock))
            .await
    }

    /// Initialize from explicit parts.
    pub async fn initialize_with(
        &self,
        config: ConfigService,
        database: Database,
        provider: Arc<dyn LlmProvider>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<()> {
        let mut initialized = self.initialized.write().await;
        if *initialized {
            return Ok(());
        }

        let app_config = config.get_config_clone();
        let context_id = context_id_for(&app_config);
        let local = local_tier_for(&app_config, &context_id)?;
        let engine = InsightEngine::new(&app_config, database.clone(), provider, clock, local, context_id)?;

        *self.database.write().await = Some(database);
        *self.config.write().await = Some(config);
        *self.engine.write().await = Some(Arc::new(engine));

        *initialized = true;
        info!("[AppState] Initialized");
        Ok(())
    }

    /// The insight engine, once initialized
    pub async fn engine(&self) -> AppResult<Arc<InsightEngine>> {
        let guard = self.engine.read().await;
        match &*guard {
            Some(engine) => Ok(Arc::clone(engine)),
            None => Err(AppError::internal("Insight engine not initialized")),
        }
    }

    /// Check if database is healthy
    pub fn is_database_healthy(&self) -> bool {
        // Use try_read to avoid blocking
        if let Ok(guard) = self.database.try_read() {
            if let Some(ref db) = *guard {
                return db.is_healthy();
            }
        }
        false
    }

    /// Check if config is healthy
    pub fn is_config_healthy(&self) -> bool {
        if let Ok(guard) = self.config.try_read() {
            if let Some(ref config) = *guard {
                return config.is_healthy();
            }
        }
        false
    }

    /// Get the current configuration
    pub async fn get_config(&self) -> AppResult<AppConfig> {
        let guard = self.config.read().await;
        match &*guard {
            Some(config) => Ok(config.get_config_clone()),
            None => Err(AppError::config("Config service not initialized")),
        }
    }

    /// Update the configuration. The running engine keeps its settings until
    /// the next start.
    pub async fn update_config(&self, update: SettingsUpdate) -> AppResult<AppConfig> {
        let mut guard = self.config.write().await;
        match &mut *guard {
            Some(config) => config.update_config(update),
            None => Err(AppError::config("Config service not initialized")),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// The configured context name, or a fresh id for this run.
fn context_id_for(config: &AppConfig) -> String {
    config
        .context_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// A snapshot is only useful to a context that keeps its id across runs.
fn local_tier_for(config: &AppConfig, context_id: &str) -> AppResult<LocalCache> {
    if !config.local_cache_snapshot {
        return Ok(LocalCache::new());
    }
    if config.context_name.as_deref().map_or(true, |name| name.trim().is_empty()) {
        warn!("[AppState] local_cache_snapshot needs context_name; keeping the local tier in memory");
        return Ok(LocalCache::new());
    }
    Ok(LocalCache::with_snapshot(local_cache_path(context_id)?, context_id))
}
