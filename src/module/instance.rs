//! Module descriptor.
//!
//! A [`Module`] is a named subsystem with opaque instance state, lifecycle
//! hooks, a callback table, record layouts other modules may attach to, and
//! the modules it depends on.

use std::any::Any;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::error::constants::ERR_NAME_TOO_LONG;
use crate::error::{CoreError, Result};
use crate::module::attachment::{AttachmentKey, Record, RecordTable};
use crate::module::callback::CallbackTable;
use crate::module::registry::ModuleRegistry;
use crate::module::stream::{ModuleStream, StreamHook};

/// Longest accepted module name, in bytes.
pub const MAX_MODULE_NAME: usize = 40;

pub type RegisterHook = Box<dyn Fn(&Module, &ModuleRegistry) -> Result<()> + Send + Sync>;
pub type InitializeHook = Box<dyn Fn(&Module) -> Result<()> + Send + Sync>;
pub type TeardownHook = Box<dyn Fn(&Module) + Send + Sync>;

/// Lifecycle hooks. Every hook is optional.
#[derive(Default)]
pub struct Hooks {
    register: Option<RegisterHook>,
    initialize: Option<InitializeHook>,
    close: Option<TeardownHook>,
    shutdown: Option<TeardownHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs right after the module is inserted. May only look up modules
    /// registered earlier.
    pub fn on_register<F>(mut self, f: F) -> Self
    where
        F: Fn(&Module, &ModuleRegistry) -> Result<()> + Send + Sync + 'static,
    {
        self.register = Some(Box::new(f));
        self
    }

    /// Runs once every module is registered.
    pub fn on_initialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&Module) -> Result<()> + Send + Sync + 'static,
    {
        self.initialize = Some(Box::new(f));
        self
    }

    /// Runs in reverse registration order while siblings are still alive.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Module) + Send + Sync + 'static,
    {
        self.close = Some(Box::new(f));
        self
    }

    /// Runs last, in reverse registration order.
    pub fn on_shutdown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Module) + Send + Sync + 'static,
    {
        self.shutdown = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("register", &self.register.is_some())
            .field("initialize", &self.initialize.is_some())
            .field("close", &self.close.is_some())
            .field("shutdown", &self.shutdown.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Created,
    Registered,
    Initialized,
    Running,
    Closed,
    Shutdown,
    Destroyed,
}

impl ModuleState {
    pub fn name(self) -> &'static str {
        match self {
            ModuleState::Created => "Created",
            ModuleState::Registered => "Registered",
            ModuleState::Initialized => "Initialized",
            ModuleState::Running => "Running",
            ModuleState::Closed => "Closed",
            ModuleState::Shutdown => "Shutdown",
            ModuleState::Destroyed => "Destroyed",
        }
    }

    /// States advance one step at a time; destruction is allowed from anywhere.
    pub fn can_transition(self, to: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, to),
            (Created, Registered)
                | (Registered, Initialized)
                | (Initialized, Running)
                | (Running, Closed)
                | (Closed, Shutdown)
        ) || (to == Destroyed && self != Destroyed)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Module {
    name: String,
    state: Mutex<ModuleState>,
    instance: Mutex<Box<dyn Any + Send>>,
    hooks: Hooks,
    depends_on: Vec<String>,
    callbacks: CallbackTable,
    records: RecordTable,
}

impl Module {
    /// Create a module whose instance state starts as `S::default()`.
    pub fn create<S: Any + Send + Default>(name: &str, hooks: Hooks) -> Result<Self> {
        if name.is_empty() || name.len() > MAX_MODULE_NAME {
            return Err(CoreError::Wiring(ERR_NAME_TOO_LONG));
        }
        debug!(module = name, "Module created");
        Ok(Self {
            name: name.to_string(),
            state: Mutex::new(ModuleState::Created),
            instance: Mutex::new(Box::new(S::default())),
            hooks,
            depends_on: Vec::new(),
            callbacks: CallbackTable::new(name),
            records: RecordTable::new(name),
        })
    }

    /// Declare modules that must be registered before this one.
    pub fn with_dependencies(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transition(&self, to: ModuleState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                module: self.name.clone(),
                from: state.name(),
                to: to.name(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Run `f` over the instance state.
    pub fn with_state<S: Any, R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        let mut instance = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        match instance.downcast_mut::<S>() {
            Some(state) => Ok(f(state)),
            None => Err(CoreError::StateTypeMismatch {
                module: self.name.clone(),
            }),
        }
    }

    pub(crate) fn run_register(&self, registry: &ModuleRegistry) -> Result<()> {
        match &self.hooks.register {
            Some(hook) => hook(self, registry).map_err(|e| self.hook_failed("register", e)),
            None => Ok(()),
        }
    }

    pub(crate) fn run_initialize(&self) -> Result<()> {
        match &self.hooks.initialize {
            Some(hook) => hook(self).map_err(|e| self.hook_failed("initialize", e)),
            None => Ok(()),
        }
    }

    pub(crate) fn run_close(&self) {
        if let Some(hook) = &self.hooks.close {
            hook(self);
        }
    }

    pub(crate) fn run_shutdown(&self) {
        if let Some(hook) = &self.hooks.shutdown {
            hook(self);
        }
    }

    fn hook_failed(&self, hook: &'static str, err: CoreError) -> CoreError {
        match err {
            // Already attributed by a nested hook.
            e @ CoreError::HookFailed { .. } => e,
            e => CoreError::HookFailed {
                module: self.name.clone(),
                hook,
                reason: e.to_string(),
            },
        }
    }

    // Callbacks

    /// Subscribe `handler` to this module's callback `id` on behalf of
    /// `subscriber`.
    pub fn add_callback<E, F>(&self, id: u32, subscriber: &str, handler: F) -> Result<()>
    where
        E: Any,
        F: Fn(&mut E) -> bool + Send + Sync + 'static,
    {
        self.callbacks.add(id, subscriber, handler)
    }

    /// Dispatch `event` to every subscriber of `id`. `false` means vetoed.
    pub fn enum_callback<E: Any>(&self, id: u32, event: &mut E) -> bool {
        self.callbacks.enumerate(id, event)
    }

    pub fn enum_callback_indexed<E: Any>(&self, id: u32, event: &mut E, index: usize) -> bool {
        self.callbacks.enumerate_indexed(id, event, index)
    }

    pub fn callback_count(&self, id: u32) -> usize {
        self.callbacks.count(id)
    }

    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    // Records and attachments

    /// Declare the base record of `kind`. Its size is `size_of::<T>()`.
    pub fn set_record_layout<T, C, D>(&self, kind: u32, ctor: C, dtor: D) -> Result<()>
    where
        T: Any + Send,
        C: Fn() -> T + Send + Sync + 'static,
        D: Fn(&mut T) + Send + Sync + 'static,
    {
        self.records.set_layout(kind, ctor, dtor)
    }

    /// Reserve a `T` on every record of `kind` on behalf of `requester`.
    ///
    /// The returned key's offset is the record size before this call.
    pub fn attach_data<T, C, D>(
        &self,
        kind: u32,
        requester: &str,
        ctor: C,
        dtor: D,
    ) -> Result<AttachmentKey<T>>
    where
        T: Any + Send,
        C: Fn() -> T + Send + Sync + 'static,
        D: Fn(&mut T) + Send + Sync + 'static,
    {
        self.records.attach(kind, requester, ctor, dtor)
    }

    /// [`attach_data`](Self::attach_data) with `T::default()` and no destructor.
    pub fn attach_default<T>(&self, kind: u32, requester: &str) -> Result<AttachmentKey<T>>
    where
        T: Any + Send + Default,
    {
        self.records.attach(kind, requester, T::default, |_: &mut T| {})
    }

    pub fn record_size(&self, kind: u32) -> Result<usize> {
        self.records.size(kind)
    }

    pub fn record_base_size(&self, kind: u32) -> Result<usize> {
        self.records.base_size(kind)
    }

    pub fn attachment_count(&self, kind: u32) -> Result<usize> {
        self.records.attachment_count(kind)
    }

    pub fn attachers(&self, kind: u32) -> Result<Vec<String>> {
        self.records.attachers(kind)
    }

    /// Construct a record: base first, then attachments in attachment order.
    pub fn create_record(&self, kind: u32) -> Result<Record> {
        self.records.create(kind)
    }

    /// Destroy a record: attachment destructors in order, then the base.
    pub fn destroy_record(&self, record: Record) -> Result<()> {
        self.records.destroy(record)
    }

    pub fn layouts_sealed(&self) -> bool {
        self.records.is_sealed()
    }

    pub(crate) fn seal_layouts(&self) {
        self.records.seal();
    }

    // Config stream

    /// Register read/write hooks for `module_name`'s block in streams of
    /// `kind` records.
    pub fn stream_add_callback<R, W>(
        &self,
        kind: u32,
        module_name: &str,
        read: R,
        write: W,
    ) -> Result<()>
    where
        R: Fn(&mut Record, &mut ModuleStream) -> Result<()> + Send + Sync + 'static,
        W: Fn(&Record, &mut ModuleStream) -> Result<()> + Send + Sync + 'static,
    {
        self.records
            .add_stream(kind, StreamHook::new(module_name, read, write))
    }

    /// Write every registered module block for `record`, then `EnumEnd`.
    pub fn stream_enum_write(&self, kind: u32, stream: &mut ModuleStream, record: &Record) -> Result<()> {
        let layout = self.records.layout(kind)?;
        stream.enum_write(&layout.streams, record)
    }

    /// Hand each module block up to `EnumEnd` to its registered reader.
    pub fn stream_enum_read(
        &self,
        kind: u32,
        stream: &mut ModuleStream,
        record: &mut Record,
    ) -> Result<()> {
        let layout = self.records.layout(kind)?;
        stream.enum_read(&layout.streams, record)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("depends_on", &self.depends_on)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
