//! Engine context
//!
//! `Engine` owns everything that used to be process-wide: the logger and its
//! segment registry, the checkpoint driver, the rollback node pool, and the
//! transaction manager. It is built once per environment directory and torn
//! down by `close`.
//!
//! # Open sequence
//!
//! ```text
//! 1. Create the environment directory, load or write tidewal.toml
//! 2. Take the exclusive environment lock
//! 3. Create the log directory
//! 4. Run the log upgrader (any error aborts open)
//! 5. Open the logger after the newest entry on disk
//! 6. Build the rollback node pool and the transaction manager
//! ```
//!
//! `close` drains the pool, checkpoints, and writes the clean-shutdown record.
//! An engine dropped without `close` leaves a dirty log behind, which the
//! next open treats as a crash.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tidewal_concurrency::{
    MemoryBlockStore, RollbackBlockStore, RollbackNodePool, TransactionError, TransactionManager,
};
use tidewal_core::Lsn;
use tidewal_durability::{
    CheckpointDriver, CheckpointError, CheckpointInfo, CheckpointReason, LogCheckpointer, LogError,
    LogUpgrader, Logger, UpgradeError, UpgradeOutcome,
};
use tracing::{error, info};

use crate::config::{ConfigError, EngineConfig, CONFIG_FILE_NAME};

/// Lock file held for the lifetime of an open engine.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Loading or validating `tidewal.toml` failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The log could not be verified or upgraded
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    /// Log I/O failed
    #[error(transparent)]
    Log(#[from] LogError),

    /// A checkpoint failed
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A transaction operation failed
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// The rollback block store failed
    #[error("rollback store error: {0}")]
    Store(#[from] tidewal_core::Error),

    /// Creating a directory or the lock file failed
    #[error("'{path}': {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Another engine holds the environment
    #[error("environment '{0}' is already in use")]
    Locked(PathBuf),

    /// The logger was still shared when the engine closed
    #[error("logger still in use at close")]
    LoggerInUse,
}

/// Collaborators an engine is built around.
pub struct EngineParts {
    /// Checkpoint driver used for the upgrade and for `Engine::checkpoint`
    pub checkpointer: Arc<dyn CheckpointDriver>,
    /// Block manager rollback nodes live in
    pub block_store: Arc<dyn RollbackBlockStore>,
}

impl Default for EngineParts {
    fn default() -> Self {
        EngineParts {
            checkpointer: Arc::new(LogCheckpointer::new()),
            block_store: Arc::new(MemoryBlockStore::new()),
        }
    }
}

/// An open environment.
pub struct Engine {
    env_dir: PathBuf,
    log_dir: PathBuf,
    config: EngineConfig,
    upgrade: UpgradeOutcome,
    checkpointer: Arc<dyn CheckpointDriver>,
    pool: Arc<RollbackNodePool>,
    logger: Arc<Logger>,
    transactions: TransactionManager,
    lock_file: File,
}

impl Engine {
    /// Open the environment at `env_dir` using its `tidewal.toml`.
    ///
    /// A missing config file is created with defaults.
    pub fn open<P: AsRef<Path>>(env_dir: P) -> Result<Self, EngineError> {
        let env_dir = env_dir.as_ref();
        create_dir(env_dir)?;

        let config_path = env_dir.join(CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&config_path)?;
        let config = EngineConfig::from_file(&config_path)?;

        Self::open_inner(env_dir, config, EngineParts::default())
    }

    /// Open the environment with an explicit configuration and collaborators.
    ///
    /// The configuration is written to `tidewal.toml` so that a later
    /// `Engine::open` picks up the same settings.
    pub fn open_with<P: AsRef<Path>>(
        env_dir: P,
        config: EngineConfig,
        parts: EngineParts,
    ) -> Result<Self, EngineError> {
        let env_dir = env_dir.as_ref();
        config.validate()?;
        create_dir(env_dir)?;
        config.write_to_file(&env_dir.join(CONFIG_FILE_NAME))?;

        Self::open_inner(env_dir, config, parts)
    }

    fn open_inner(
        env_dir: &Path,
        config: EngineConfig,
        parts: EngineParts,
    ) -> Result<Self, EngineError> {
        let lock_file = lock_env(env_dir)?;

        let log_dir = config.resolved_log_dir(env_dir);
        create_dir(&log_dir)?;

        let log_config = config.log_config();
        let mut upgrader = LogUpgrader::new(log_config.clone(), Arc::clone(&parts.checkpointer));
        let upgrade = match upgrader.run(env_dir, &log_dir) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    target: "tidewal::engine",
                    env = %env_dir.display(),
                    trail = ?upgrader.trail(),
                    error = %e,
                    "Refusing to open environment"
                );
                return Err(e.into());
            }
        };

        let logger = Arc::new(Logger::open_existing(&log_dir, log_config)?);
        let pool = Arc::new(RollbackNodePool::new(
            config.rollback_node_cache_size,
            Arc::clone(&parts.block_store),
        ));
        let transactions =
            TransactionManager::new(Arc::clone(&logger), Arc::clone(&pool), parts.block_store);

        info!(
            target: "tidewal::engine",
            env = %env_dir.display(),
            log_dir = %log_dir.display(),
            upgraded = upgrade.did_upgrade,
            next_lsn = logger.last_lsn().next().as_u64(),
            last_xid = logger.last_xid().as_u64(),
            segments = logger.num_segments(),
            "Engine opened"
        );

        Ok(Engine {
            env_dir: env_dir.to_path_buf(),
            log_dir,
            config,
            upgrade,
            checkpointer: parts.checkpointer,
            pool,
            logger,
            transactions,
            lock_file,
        })
    }

    /// Take a checkpoint and trim the log behind it.
    pub fn checkpoint(&self, reason: CheckpointReason) -> Result<CheckpointInfo, EngineError> {
        Ok(self.checkpointer.run_checkpoint(&self.logger, reason)?)
    }

    /// What the startup upgrade check did.
    pub fn upgrade_outcome(&self) -> &UpgradeOutcome {
        &self.upgrade
    }

    /// Shared pool of idle rollback nodes.
    pub fn rollback_pool(&self) -> &RollbackNodePool {
        &self.pool
    }

    /// The log writer.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Begins and finishes transactions.
    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Environment directory.
    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    /// Resolved log directory.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shut down cleanly.
    ///
    /// Returns the LSN of the clean-shutdown record.
    pub fn close(self) -> Result<Lsn, EngineError> {
        let Engine {
            env_dir,
            checkpointer,
            pool,
            logger,
            transactions,
            lock_file,
            ..
        } = self;

        let drained = pool.drain()?;
        let checkpoint = checkpointer.run_checkpoint(&logger, CheckpointReason::Shutdown)?;

        drop(transactions);
        let logger = Arc::try_unwrap(logger).map_err(|_| EngineError::LoggerInUse)?;
        let shutdown_lsn = logger.close()?;

        info!(
            target: "tidewal::engine",
            env = %env_dir.display(),
            rollback_nodes_freed = drained,
            segments_trimmed = checkpoint.segments_trimmed,
            shutdown_lsn = shutdown_lsn.as_u64(),
            "Engine closed"
        );
        drop(lock_file);
        Ok(shutdown_lsn)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("env_dir", &self.env_dir)
            .field("log_dir", &self.log_dir)
            .field("config", &self.config)
            .field("upgrade", &self.upgrade)
            .field("pool", &self.pool)
            .finish()
    }
}

fn create_dir(path: &Path) -> Result<(), EngineError> {
    std::fs::create_dir_all(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn lock_env(env_dir: &Path) -> Result<File, EngineError> {
    let path = env_dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|source| EngineError::Io { path, source })?;
    fs2::FileExt::try_lock_exclusive(&file)
        .map_err(|_| EngineError::Locked(env_dir.to_path_buf()))?;
    Ok(file)
}
