//! Module registry and lifecycle driver.
//!
//! Modules are kept in registration order. That order drives every
//! lifecycle pass: register and initialize run forward, close and shutdown
//! run in reverse. [`ModuleRegistry::boot`] derives the order from declared
//! dependencies instead of from the caller's list position.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::module::instance::{Module, ModuleState};

#[derive(Default)]
struct Inner {
    list: Vec<Arc<Module>>,
    index: HashMap<String, usize>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    inner: RwLock<Inner>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `module` and run its register hook.
    ///
    /// Fails on a duplicate name. A failing hook leaves the module in the
    /// registry; startup is expected to abort.
    pub fn register(&self, module: Module) -> Result<Arc<Module>> {
        let module = Arc::new(module);
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if inner.index.contains_key(module.name()) {
                return Err(CoreError::DuplicateModule(module.name().to_string()));
            }
            let position = inner.list.len();
            inner.index.insert(module.name().to_string(), position);
            inner.list.push(module.clone());
        }
        module.transition(ModuleState::Registered)?;
        // The lock is released: the hook looks up earlier modules.
        module.run_register(self)?;
        debug!(module = %module.name(), "Module registered");
        Ok(module)
    }

    /// Find a registered module by name.
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.index.get(name).map(|&i| inner.list[i].clone())
    }

    /// Like [`get`](Self::get), but a missing module is an error.
    pub fn lookup(&self, name: &str) -> Result<Arc<Module>> {
        self.get(name)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))
    }

    /// Registered modules in registration order.
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .list
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .list
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Initialize every module in registration order, then mark them all
    /// running and freeze attachment layouts.
    #[instrument(skip(self))]
    pub fn initialize_all(&self) -> Result<()> {
        let modules = self.modules();
        for module in &modules {
            module.transition(ModuleState::Initialized)?;
            module.run_initialize()?;
            debug!(module = %module.name(), "Module initialized");
        }
        for module in &modules {
            module.transition(ModuleState::Running)?;
            module.seal_layouts();
        }
        info!(count = modules.len(), "Modules running");
        Ok(())
    }

    /// Close running modules in reverse registration order.
    pub fn close_all(&self) {
        for module in self.modules().iter().rev() {
            match module.transition(ModuleState::Closed) {
                Ok(()) => module.run_close(),
                Err(e) => warn!(module = %module.name(), error = %e, "Skipping close"),
            }
        }
    }

    /// Shut closed modules down in reverse registration order.
    pub fn shutdown_all(&self) {
        for module in self.modules().iter().rev() {
            match module.transition(ModuleState::Shutdown) {
                Ok(()) => module.run_shutdown(),
                Err(e) => warn!(module = %module.name(), error = %e, "Skipping shutdown"),
            }
        }
    }

    /// Mark every module destroyed and empty the registry.
    pub fn destroy(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for module in inner.list.iter().rev() {
            if let Err(e) = module.transition(ModuleState::Destroyed) {
                debug!(module = %module.name(), error = %e, "Already destroyed");
            }
        }
        inner.list.clear();
        inner.index.clear();
    }

    /// Two-phase boot: order `modules` so every module follows its declared
    /// dependencies, register them in that order, then initialize all.
    ///
    /// Modules without a dependency relation keep their relative order.
    #[instrument(skip_all, fields(count = modules.len()))]
    pub fn boot(modules: Vec<Module>) -> Result<Self> {
        let ordered = dependency_order(modules)?;
        let registry = Self::new();
        for module in ordered {
            registry.register(module)?;
        }
        registry.initialize_all()?;
        Ok(registry)
    }
}

/// Stable topological sort over `depends_on`.
fn dependency_order(modules: Vec<Module>) -> Result<Vec<Module>> {
    let mut names = HashSet::new();
    for module in &modules {
        if !names.insert(module.name().to_string()) {
            return Err(CoreError::DuplicateModule(module.name().to_string()));
        }
    }
    for module in &modules {
        if let Some(missing) = module.depends_on().iter().find(|d| !names.contains(*d)) {
            return Err(CoreError::MissingDependency {
                module: module.name().to_string(),
                dependency: missing.clone(),
            });
        }
    }

    let mut pending: Vec<Option<Module>> = modules.into_iter().map(Some).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while ordered.len() < pending.len() {
        // First pending module whose dependencies are all placed.
        let next = pending.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|m| m.depends_on().iter().all(|d| placed.contains(d)))
        });
        let Some(index) = next else {
            let stuck = pending
                .iter()
                .flatten()
                .next()
                .map(|m| m.name().to_string())
                .unwrap_or_default();
            return Err(CoreError::DependencyCycle(stuck));
        };
        if let Some(module) = pending[index].take() {
            placed.insert(module.name().to_string());
            ordered.push(module);
        }
    }
    Ok(ordered)
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .modules()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}
