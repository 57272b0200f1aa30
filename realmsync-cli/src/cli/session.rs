//! Workspace session: the databases opened for one CLI invocation

use anyhow::{Context, Result, anyhow};
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, TableLayout};
use crate::promote::{SqliteTarget, WorkspaceLocks};
use crate::resilience::ResilienceConfig;
use crate::snapshot::{DatabaseRegistry, Snapshot, SqliteSnapshot};

pub struct Session {
    pub config: Config,
    pub layout: TableLayout,
    /// Shared by every promotion started from this session
    pub locks: WorkspaceLocks,
    registry: DatabaseRegistry,
    pools: BTreeMap<String, SqlitePool>,
    /// Databases that failed to open, with the reason
    failures: BTreeMap<String, String>,
}

impl Session {
    /// Open every database declared in `config`
    ///
    /// A database that fails to open is remembered and reported when a
    /// command asks for it.
    pub async fn open(config: Config) -> Result<Self> {
        let layout = config.table_layout()?;
        let mut registry = DatabaseRegistry::new();
        let mut pools = BTreeMap::new();
        let mut failures = BTreeMap::new();

        for (name, url) in &config.databases {
            match SqliteSnapshot::connect(name.clone(), url, config.compare.pool_size).await {
                Ok(snapshot) => {
                    pools.insert(name.clone(), snapshot.pool().clone());
                    registry.register(Arc::new(snapshot));
                }
                Err(e) => {
                    log::warn!("{:#}", e);
                    failures.insert(name.clone(), format!("{:#}", e));
                }
            }
        }

        Ok(Self {
            config,
            layout,
            locks: WorkspaceLocks::new(),
            registry,
            pools,
            failures,
        })
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig::from_config(&self.config)
    }

    pub fn snapshot(&self, name: &str) -> Result<Arc<dyn Snapshot>> {
        self.registry.get_database(name).ok_or_else(|| self.unavailable(name))
    }

    pub fn target(&self, name: &str) -> Result<SqliteTarget> {
        let pool = self.pool(name)?;
        Ok(SqliteTarget::new(name, pool.clone()))
    }

    fn pool(&self, name: &str) -> Result<&SqlitePool> {
        self.pools.get(name).ok_or_else(|| self.unavailable(name))
    }

    fn unavailable(&self, name: &str) -> anyhow::Error {
        match self.failures.get(name) {
            Some(reason) => anyhow!("Database '{}' could not be opened: {}", name, reason),
            None => anyhow!(
                "Unknown database '{}'. Known databases: {}",
                name,
                self.registry.get_all_database_names().join(", ")
            ),
        }
    }

    /// Source and target snapshots of a comparison
    pub fn pair(&self, source: &str, target: &str) -> Result<(Arc<dyn Snapshot>, Arc<dyn Snapshot>)> {
        if source == target {
            log::warn!("Source and target are both '{}'", source);
        }
        let source = self.snapshot(source).context("Source database")?;
        let target = self.snapshot(target).context("Target database")?;
        Ok((source, target))
    }
}
