//! Shared engine handles.
//!
//! Higher layers open one engine per logical index. An [`EngineRegistry`]
//! owns those handles so every caller asking for the same name shares one
//! [`Engine`] and its directory lock.

use crate::config::Config;
use crate::engine::Engine;
use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Engines opened under one root directory.
///
/// # Example
///
/// ```rust,ignore
/// let registry = EngineRegistry::new("data", Config::default());
/// let users = registry.open("users")?;
/// let same = registry.open("users")?;
/// assert!(Arc::ptr_eq(&users, &same));
/// ```
#[derive(Debug)]
pub struct EngineRegistry {
    root: PathBuf,
    config: Config,
    engines: RwLock<HashMap<String, Arc<Engine>>>,
}

impl EngineRegistry {
    /// Creates an empty registry for engines under `root`.
    pub fn new(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory engines are opened under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the engine `name`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Any error from [`Engine::open_with_config`].
    pub fn open(&self, name: &str) -> CoreResult<Arc<Engine>> {
        if let Some(engine) = self.engines.read().get(name) {
            return Ok(Arc::clone(engine));
        }

        let mut engines = self.engines.write();
        if let Some(engine) = engines.get(name) {
            return Ok(Arc::clone(engine));
        }
        let engine = Arc::new(Engine::open_with_config(&self.root, name, self.config.clone())?);
        engines.insert(name.to_owned(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Returns the engine `name` if it is open.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Engine>> {
        self.engines.read().get(name).cloned()
    }

    /// Names of the open engines, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Closes and forgets the engine `name`.
    ///
    /// Returns `false` if it was not open. Handles still held elsewhere
    /// see `EngineClosed` afterwards.
    ///
    /// # Errors
    ///
    /// Any error from [`Engine::close`].
    pub fn close(&self, name: &str) -> CoreResult<bool> {
        let engine = self.engines.write().remove(name);
        match engine {
            Some(engine) => {
                engine.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every engine.
    ///
    /// All engines are closed even if some fail; the first error is
    /// returned.
    ///
    /// # Errors
    ///
    /// The first error from [`Engine::close`].
    pub fn close_all(&self) -> CoreResult<()> {
        let engines: Vec<(String, Arc<Engine>)> = self.engines.write().drain().collect();
        let mut first_error = None;
        for (name, engine) in engines {
            if let Err(err) = engine.close() {
                warn!(engine = %name, error = %err, "failed to close engine");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
