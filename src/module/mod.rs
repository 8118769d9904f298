//! # Module Framework
//!
//! Named subsystems wired together at startup without compile-time coupling.
//!
//! ## Components
//! - **Instance**: module descriptor, lifecycle hooks and state machine
//! - **Registry**: registration, lookup by name, ordered lifecycle passes, dependency boot
//! - **Callback**: per-module observer lists with veto short-circuit
//! - **Attachment**: typed per-entity extension of another module's records
//! - **Stream**: section/key/value persistence hooks per record kind
//!
//! ## Lifecycle
//! ```text
//! Created -> Registered -> Initialized -> Running -> Closed -> Shutdown -> Destroyed
//! ```
//! Register and initialize run in registration order; close and shutdown run
//! in reverse. Attachment layouts are sealed when modules start running.
//!
//! ## Example
//! ```rust
//! use realm_core::module::{Hooks, Module, ModuleRegistry};
//!
//! #[derive(Default)]
//! struct Stats { hp: u32 }
//!
//! const CHARACTER: u32 = 0;
//!
//! let owner = Module::create::<()>(
//!     "character",
//!     Hooks::new().on_register(|m, _| m.set_record_layout(CHARACTER, || 0u64, |_| {})),
//! )
//! .unwrap();
//! let stats = Module::create::<()>(
//!     "stats",
//!     Hooks::new().on_register(|m, registry| {
//!         let owner = registry.lookup("character")?;
//!         owner.attach_default::<Stats>(CHARACTER, m.name())?;
//!         Ok(())
//!     }),
//! )
//! .unwrap()
//! .with_dependencies(&["character"]);
//!
//! let registry = ModuleRegistry::boot(vec![stats, owner]).unwrap();
//! let character = registry.lookup("character").unwrap();
//! assert_eq!(character.attachment_count(CHARACTER).unwrap(), 1);
//! ```

pub mod attachment;
pub mod callback;
pub mod instance;
pub mod registry;
pub mod stream;

pub use attachment::{
    get_attached_data, get_attached_data_mut, AttachmentKey, Record, MAX_ATTACHMENTS,
    MAX_RECORD_KINDS,
};
pub use callback::{CallbackTable, MAX_CALLBACK_COUNT, MAX_CALLBACK_ID};
pub use instance::{Hooks, Module, ModuleState, MAX_MODULE_NAME};
pub use registry::ModuleRegistry;
pub use stream::{ModuleStream, StreamMode, ENUM_END_KEY, MODULE_DATA_KEY};
