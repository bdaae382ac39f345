use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{
    BuiltinDialect, ConnectionProfile, DialectService, OraclePoolService, PoolService,
    SessionManager, SessionRegistry, SqlDialect,
};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::utils::{credential_store, AppConfig};
use crate::workbench::{
    AutosaveSettings, EventSink, ScriptStore, Workbench, WorkbenchOptions,
};

/// Process-wide services shared by every workbench tab.
pub struct App {
    config: AppConfig,
    pool: Arc<dyn PoolService>,
    registry: Arc<SessionRegistry>,
    dialect: Arc<dyn DialectService>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self::with_pool(config, Arc::new(OraclePoolService::new()))
    }

    pub fn with_pool(config: AppConfig, pool: Arc<dyn PoolService>) -> Self {
        Self {
            config,
            pool,
            registry: Arc::new(SessionRegistry::new()),
            dialect: Arc::new(BuiltinDialect),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Look up a saved profile (or the last used one) and fill its password
    /// from the keyring when none is set.
    pub fn resolve_profile(&self, name: Option<&str>) -> WorkbenchResult<ConnectionProfile> {
        let name = name
            .or(self.config.last_connection.as_deref())
            .ok_or_else(|| WorkbenchError::Config("no connection profile selected".to_string()))?;
        let mut profile = self
            .config
            .get_connection_by_name(name)
            .cloned()
            .ok_or_else(|| {
                WorkbenchError::Config(format!("no connection profile named `{name}`"))
            })?;

        if profile.password.is_empty() {
            match credential_store::get_password(&profile.name) {
                Ok(Some(password)) => profile.password = password,
                Ok(None) => {}
                Err(err) => warn!("{err}"),
            }
        }
        Ok(profile)
    }

    pub fn open_workbench(
        &self,
        dialect: SqlDialect,
        store: Arc<dyn ScriptStore>,
        events: EventSink,
    ) -> Workbench {
        let session = Arc::new(SessionManager::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.registry),
            dialect,
        ));
        let options = WorkbenchOptions {
            autosave: AutosaveSettings {
                enabled: self.config.autosave_enabled,
                delay: self.config.autosave_delay(),
            },
            max_cell_display_chars: self.config.max_cell_display_chars,
        };
        Workbench::new(session, Arc::clone(&self.dialect), store, options, events)
    }

    /// Forget process-scoped session state and close every pool.
    pub async fn shutdown(&self) {
        self.registry.clear();
        if let Err(err) = self.pool.close_all().await {
            warn!("Failed to close connection pools: {err}");
        }
        info!("Application shut down");
    }
}
