//! Per-entity record extension.
//!
//! A module owning an entity kind (characters, items, connections) declares
//! the kind's base record with [`Module::set_record_layout`]. Other modules
//! reserve private per-entity state on that kind with
//! [`Module::attach_data`] and get back an [`AttachmentKey`]. Every record
//! the owner creates carries one slot per attachment, constructed and
//! destroyed together with the base.
//!
//! Keys carry the byte offset the attachment would have in a flat record:
//! the running sum of the base size and every earlier attachment. The
//! offsets are stable once layouts are sealed and are used to find the slot;
//! the storage itself is a typed side-table, never raw memory.
//!
//! [`Module::set_record_layout`]: crate::module::Module::set_record_layout
//! [`Module::attach_data`]: crate::module::Module::attach_data

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::constants::{ERR_LAYOUT_SEALED, ERR_NO_RECORD_LAYOUT, ERR_RECORD_MISMATCH};
use crate::error::{CoreError, Result};
use crate::module::stream::StreamHook;

/// Record kinds per module.
pub const MAX_RECORD_KINDS: u32 = 8;

/// Attachments per record kind.
pub const MAX_ATTACHMENTS: usize = 32;

type CtorFn = dyn Fn() -> Box<dyn Any + Send> + Send + Sync;
type DtorFn = dyn Fn(&mut (dyn Any + Send)) + Send + Sync;

fn erase_ctor<T, C>(ctor: C) -> Arc<CtorFn>
where
    T: Any + Send,
    C: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(move || Box::new(ctor()) as Box<dyn Any + Send>)
}

fn erase_dtor<T, D>(dtor: D) -> Arc<DtorFn>
where
    T: Any + Send,
    D: Fn(&mut T) + Send + Sync + 'static,
{
    Arc::new(move |value: &mut (dyn Any + Send)| {
        if let Some(value) = value.downcast_mut::<T>() {
            dtor(value);
        }
    })
}

/// Typed handle to one attachment on a record kind.
pub struct AttachmentKey<T> {
    offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    /// Offset of the attachment within the owner's record.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttachmentKey<T> {}

impl<T> PartialEq for AttachmentKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for AttachmentKey<T> {}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentKey")
            .field("offset", &self.offset)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

#[derive(Clone)]
struct Slot {
    offset: usize,
    module: String,
    ctor: Arc<CtorFn>,
    dtor: Arc<DtorFn>,
}

#[derive(Clone)]
pub(crate) struct Layout {
    base_size: usize,
    base_ctor: Arc<CtorFn>,
    base_dtor: Arc<DtorFn>,
    slots: Vec<Slot>,
    size: usize,
    pub(crate) streams: Vec<StreamHook>,
}

/// One entity record: the owner's base value plus every attachment.
pub struct Record {
    kind: u32,
    base: Box<dyn Any + Send>,
    // Sorted by offset.
    slots: Vec<(usize, Box<dyn Any + Send>)>,
}

impl Record {
    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn base<T: Any>(&self) -> Option<&T> {
        self.base.downcast_ref::<T>()
    }

    pub fn base_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.base.downcast_mut::<T>()
    }

    /// Number of attachment slots this record was built with.
    pub fn attached_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_index(&self, offset: usize) -> Option<usize> {
        self.slots.binary_search_by_key(&offset, |(o, _)| *o).ok()
    }

    /// The attachment behind `key`, if this record carries it.
    pub fn get_attached_data<T: Any>(&self, key: AttachmentKey<T>) -> Option<&T> {
        let index = self.slot_index(key.offset)?;
        self.slots[index].1.downcast_ref::<T>()
    }

    pub fn get_attached_data_mut<T: Any>(&mut self, key: AttachmentKey<T>) -> Option<&mut T> {
        let index = self.slot_index(key.offset)?;
        self.slots[index].1.downcast_mut::<T>()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("kind", &self.kind)
            .field("offsets", &self.slots.iter().map(|(o, _)| *o).collect::<Vec<_>>())
            .finish()
    }
}

/// Free-function form of [`Record::get_attached_data`].
pub fn get_attached_data<T: Any>(record: &Record, key: AttachmentKey<T>) -> Option<&T> {
    record.get_attached_data(key)
}

/// Free-function form of [`Record::get_attached_data_mut`].
pub fn get_attached_data_mut<T: Any>(record: &mut Record, key: AttachmentKey<T>) -> Option<&mut T> {
    record.get_attached_data_mut(key)
}

/// Record layouts of one module, indexed by record kind.
pub(crate) struct RecordTable {
    owner: String,
    kinds: RwLock<Vec<Option<Arc<Layout>>>>,
    sealed: AtomicBool,
}

impl RecordTable {
    pub(crate) fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            kinds: RwLock::new(vec![None; MAX_RECORD_KINDS as usize]),
            sealed: AtomicBool::new(false),
        }
    }

    fn check_kind(&self, kind: u32) -> Result<usize> {
        if kind >= MAX_RECORD_KINDS {
            return Err(CoreError::RecordKindOutOfRange {
                module: self.owner.clone(),
                kind,
            });
        }
        Ok(kind as usize)
    }

    fn check_open(&self) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(CoreError::Wiring(ERR_LAYOUT_SEALED));
        }
        Ok(())
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub(crate) fn set_layout<T, C, D>(&self, kind: u32, ctor: C, dtor: D) -> Result<()>
    where
        T: Any + Send,
        C: Fn() -> T + Send + Sync + 'static,
        D: Fn(&mut T) + Send + Sync + 'static,
    {
        let index = self.check_kind(kind)?;
        self.check_open()?;
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        // Attachment offsets depend on the base size, so the base is fixed
        // once anything is attached.
        let streams = match kinds[index].as_ref() {
            Some(old) if !old.slots.is_empty() => {
                return Err(CoreError::Wiring(
                    "Record layout cannot change after data is attached",
                ));
            }
            Some(old) => old.streams.clone(),
            None => Vec::new(),
        };
        let base_size = size_of::<T>();
        kinds[index] = Some(Arc::new(Layout {
            base_size,
            base_ctor: erase_ctor(ctor),
            base_dtor: erase_dtor(dtor),
            slots: Vec::new(),
            size: base_size,
            streams,
        }));
        debug!(owner = %self.owner, kind, base_size, "Record layout declared");
        Ok(())
    }

    pub(crate) fn attach<T, C, D>(
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
        let index = self.check_kind(kind)?;
        self.check_open()?;
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        let layout = kinds[index]
            .as_mut()
            .ok_or(CoreError::Wiring(ERR_NO_RECORD_LAYOUT))?;
        if layout.slots.len() >= MAX_ATTACHMENTS {
            return Err(CoreError::AttachmentCapacity {
                module: self.owner.clone(),
                kind,
            });
        }
        let layout = Arc::make_mut(layout);
        let offset = layout.size;
        // Zero-sized attachments still get a distinct offset.
        let size = size_of::<T>().max(1);
        layout.size += size;
        layout.slots.push(Slot {
            offset,
            module: requester.to_string(),
            ctor: erase_ctor(ctor),
            dtor: erase_dtor(dtor),
        });
        debug!(owner = %self.owner, kind, requester, offset, size, "Data attached");
        Ok(AttachmentKey {
            offset,
            _marker: PhantomData,
        })
    }

    pub(crate) fn layout(&self, kind: u32) -> Result<Arc<Layout>> {
        let index = self.check_kind(kind)?;
        let kinds = self.kinds.read().unwrap_or_else(PoisonError::into_inner);
        kinds[index]
            .clone()
            .ok_or(CoreError::Wiring(ERR_NO_RECORD_LAYOUT))
    }

    pub(crate) fn add_stream(&self, kind: u32, hook: StreamHook) -> Result<()> {
        let index = self.check_kind(kind)?;
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        let layout = kinds[index]
            .as_mut()
            .ok_or(CoreError::Wiring(ERR_NO_RECORD_LAYOUT))?;
        Arc::make_mut(layout).streams.push(hook);
        Ok(())
    }

    /// Flat size of a record: base plus every attachment.
    pub(crate) fn size(&self, kind: u32) -> Result<usize> {
        Ok(self.layout(kind)?.size)
    }

    pub(crate) fn base_size(&self, kind: u32) -> Result<usize> {
        Ok(self.layout(kind)?.base_size)
    }

    pub(crate) fn attachment_count(&self, kind: u32) -> Result<usize> {
        Ok(self.layout(kind)?.slots.len())
    }

    /// Modules holding attachments on `kind`, in attachment order.
    pub(crate) fn attachers(&self, kind: u32) -> Result<Vec<String>> {
        Ok(self
            .layout(kind)?
            .slots
            .iter()
            .map(|s| s.module.clone())
            .collect())
    }

    pub(crate) fn create(&self, kind: u32) -> Result<Record> {
        let layout = self.layout(kind)?;
        let base = (layout.base_ctor)();
        let slots = layout
            .slots
            .iter()
            .map(|slot| (slot.offset, (slot.ctor)()))
            .collect();
        Ok(Record { kind, base, slots })
    }

    pub(crate) fn destroy(&self, mut record: Record) -> Result<()> {
        let layout = self.layout(record.kind)?;
        if record.slots.len() > layout.slots.len() {
            return Err(CoreError::Wiring(ERR_RECORD_MISMATCH));
        }
        for (slot, (offset, value)) in layout.slots.iter().zip(record.slots.iter_mut()) {
            if slot.offset != *offset {
                return Err(CoreError::Wiring(ERR_RECORD_MISMATCH));
            }
            (slot.dtor)(&mut **value);
        }
        (layout.base_dtor)(&mut *record.base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Character {
        id: u32,
    }

    #[test]
    fn test_offsets_are_running_sum() {
        let table = RecordTable::new("character");
        table
            .set_layout(0, Character::default, |_| {})
            .expect("layout");
        let a = table
            .attach(0, "buff", || 0u64, |_| {})
            .expect("attach a");
        let b = table
            .attach(0, "mail", || 0u32, |_| {})
            .expect("attach b");
        let c = table.attach(0, "flag", || (), |_| {}).expect("attach c");

        assert_eq!(a.offset(), size_of::<Character>());
        assert_eq!(b.offset(), a.offset() + 8);
        assert_eq!(c.offset(), b.offset() + 4);
        assert_eq!(table.size(0).expect("size"), c.offset() + 1);
    }

    #[test]
    fn test_records_do_not_alias() {
        let table = RecordTable::new("item");
        table.set_layout(1, || 5u16, |_| {}).expect("layout");
        let a = table.attach(1, "x", || 1u32, |_| {}).expect("attach");
        let b = table.attach(1, "y", || 2u32, |_| {}).expect("attach");

        let mut record = table.create(1).expect("create");
        *record.get_attached_data_mut(a).expect("a") = 10;
        assert_eq!(record.get_attached_data(a), Some(&10));
        assert_eq!(record.get_attached_data(b), Some(&2));
        assert_eq!(record.base::<u16>(), Some(&5));
    }

    #[test]
    fn test_destroy_runs_attachments_then_base() {
        let order = Arc::new(RwLock::new(Vec::new()));
        let table = RecordTable::new("character");
        let o = order.clone();
        table
            .set_layout(0, Character::default, move |c: &mut Character| {
                o.write().unwrap().push(format!("base{}", c.id));
            })
            .expect("layout");
        for name in ["first", "second"] {
            let o = order.clone();
            table
                .attach(0, name, || 0u8, move |_| o.write().unwrap().push(name.to_string()))
                .expect("attach");
        }
        let record = table.create(0).expect("create");
        table.destroy(record).expect("destroy");
        assert_eq!(*order.read().unwrap(), vec!["first", "second", "base0"]);
    }

    #[test]
    fn test_capacity_and_seal() {
        let table = RecordTable::new("npc");
        assert!(matches!(
            table.attach(0, "x", || 0u8, |_| {}),
            Err(CoreError::Wiring(_))
        ));
        table.set_layout(0, || (), |_| {}).expect("layout");
        for _ in 0..MAX_ATTACHMENTS {
            table.attach(0, "x", || 0u8, |_| {}).expect("attach");
        }
        assert!(matches!(
            table.attach(0, "x", || 0u8, |_| {}),
            Err(CoreError::AttachmentCapacity { .. })
        ));
        assert!(matches!(
            table.attach(MAX_RECORD_KINDS, "x", || 0u8, |_| {}),
            Err(CoreError::RecordKindOutOfRange { .. })
        ));

        let sealed = RecordTable::new("npc");
        sealed.set_layout(0, || (), |_| {}).expect("layout");
        sealed.seal();
        assert!(sealed.attach(0, "x", || 0u8, |_| {}).is_err());
    }

    #[test]
    fn test_ctor_runs_per_record() {
        let made = Arc::new(AtomicUsize::new(0));
        let table = RecordTable::new("party");
        table.set_layout(0, || (), |_| {}).expect("layout");
        let m = made.clone();
        table
            .attach(
                0,
                "x",
                move || m.fetch_add(1, Ordering::Relaxed),
                |_| {},
            )
            .expect("attach");
        let _r1 = table.create(0).expect("create");
        let _r2 = table.create(0).expect("create");
        assert_eq!(made.load(Ordering::Relaxed), 2);
    }
}
