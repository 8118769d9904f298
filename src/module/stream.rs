//! Module config stream.
//!
//! An ordered `[section]` / `key=value` document used to persist records.
//! The owner of a record kind writes its own values, then calls
//! [`Module::stream_enum_write`] so every module that registered a stream
//! hook on the kind can append its values after a `ModuleDataN=<module>`
//! marker. Reading walks the markers and hands each block to the hook of the
//! module it names, so a reader never sees another module's keys.
//!
//! ```text
//! [1001]
//! Name=Arden
//! ModuleData1=buff
//! Stacks=3
//! ModuleData2=mail
//! Unread=0
//! EnumEnd=0
//! ```
//!
//! [`Module::stream_enum_write`]: crate::module::Module::stream_enum_write

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{CoreError, Result};
use crate::module::attachment::Record;

/// Key prefix of the per-module marker.
pub const MODULE_DATA_KEY: &str = "ModuleData";

/// Key that terminates an enumeration.
pub const ENUM_END_KEY: &str = "EnumEnd";

pub type StreamReadFn = dyn Fn(&mut Record, &mut ModuleStream) -> Result<()> + Send + Sync;
pub type StreamWriteFn = dyn Fn(&Record, &mut ModuleStream) -> Result<()> + Send + Sync;

#[derive(Clone)]
pub(crate) struct StreamHook {
    module: String,
    read: Arc<StreamReadFn>,
    write: Arc<StreamWriteFn>,
}

impl StreamHook {
    pub(crate) fn new<R, W>(module: &str, read: R, write: W) -> Self
    where
        R: Fn(&mut Record, &mut ModuleStream) -> Result<()> + Send + Sync + 'static,
        W: Fn(&Record, &mut ModuleStream) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            module: module.to_string(),
            read: Arc::new(read),
            write: Arc::new(write),
        }
    }
}

/// How `write_value` treats a key that already exists in the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Replace the existing value.
    #[default]
    Unique,
    /// Append another entry with the same key.
    Duplicates,
}

#[derive(Debug, Clone, Default)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

fn is_marker(key: &str) -> bool {
    key.starts_with(MODULE_DATA_KEY) || key.starts_with(ENUM_END_KEY)
}

#[derive(Debug, Clone, Default)]
pub struct ModuleStream {
    sections: Vec<Section>,
    section: Option<usize>,
    // Index of the current value; `None` is before the first one.
    cursor: Option<usize>,
    module_data_index: u32,
    mode: StreamMode,
}

impl ModuleStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document. Blank lines and lines starting with `;` or `#` are
    /// skipped; keys may repeat.
    pub fn parse(text: &str) -> Result<Self> {
        let mut stream = Self::new();
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                stream.sections.push(Section {
                    name: name.trim().to_string(),
                    entries: Vec::new(),
                });
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                CoreError::Stream(format!("line {}: expected key=value", number + 1))
            })?;
            let section = stream.sections.last_mut().ok_or_else(|| {
                CoreError::Stream(format!("line {}: value outside of a section", number + 1))
            })?;
            section
                .entries
                .push((key.trim().to_string(), value.trim().to_string()));
        }
        debug!(sections = stream.sections.len(), "Module stream parsed");
        Ok(stream)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_string())?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: StreamMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Select `name`, adding it if missing. Resets the read cursor and the
    /// marker counter.
    pub fn set_section_name(&mut self, name: &str) {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        self.select(index);
    }

    /// Select the section at `index` and return its name.
    pub fn read_section_name(&mut self, index: usize) -> Option<&str> {
        if index >= self.sections.len() {
            return None;
        }
        self.select(index);
        Some(&self.sections[index].name)
    }

    fn select(&mut self, index: usize) {
        self.section = Some(index);
        self.cursor = None;
        self.module_data_index = 0;
    }

    pub fn section_name(&self) -> Option<&str> {
        self.section.map(|i| self.sections[i].name.as_str())
    }

    fn current(&self) -> Option<&Section> {
        self.section.map(|i| &self.sections[i])
    }

    fn current_mut(&mut self) -> Result<&mut Section> {
        match self.section {
            Some(i) => Ok(&mut self.sections[i]),
            None => Err(CoreError::Stream("no section selected".to_string())),
        }
    }

    /// Write `key=value` into the selected section.
    pub fn write_value<V: fmt::Display>(&mut self, key: &str, value: V) -> Result<()> {
        let mode = self.mode;
        let section = self.current_mut()?;
        let value = value.to_string();
        if mode == StreamMode::Unique {
            if let Some(entry) = section.entries.iter_mut().find(|(k, _)| k == key) {
                entry.1 = value;
                return Ok(());
            }
        }
        section.entries.push((key.to_string(), value));
        Ok(())
    }

    /// Advance to the next value of the section. Stops at module markers so
    /// a hook only reads its own block.
    pub fn read_next_value(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        match self.current().and_then(|s| s.entries.get(next)) {
            Some((key, _)) if !is_marker(key) => {
                self.cursor = Some(next);
                true
            }
            _ => false,
        }
    }

    pub fn read_prev_value(&mut self) -> bool {
        let Some(prev) = self.cursor.and_then(|c| c.checked_sub(1)) else {
            return false;
        };
        match self.current().and_then(|s| s.entries.get(prev)) {
            Some((key, _)) if !is_marker(key) => {
                self.cursor = Some(prev);
                true
            }
            _ => false,
        }
    }

    fn entry(&self) -> Option<&(String, String)> {
        let cursor = self.cursor?;
        self.current()?.entries.get(cursor)
    }

    pub fn value_name(&self) -> Option<&str> {
        self.entry().map(|(k, _)| k.as_str())
    }

    pub fn value(&self) -> Option<&str> {
        self.entry().map(|(_, v)| v.as_str())
    }

    /// Parse the current value.
    pub fn get<T: FromStr>(&self) -> Option<T> {
        self.value()?.parse().ok()
    }

    /// Look up `key` in the selected section without moving the cursor.
    pub fn find(&self, key: &str) -> Option<&str> {
        self.current()?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Append one block per hook. Blocks always append, whatever the mode,
    /// so two modules writing the same key keep separate entries.
    pub(crate) fn enum_write(&mut self, hooks: &[StreamHook], record: &Record) -> Result<()> {
        let mode = std::mem::replace(&mut self.mode, StreamMode::Duplicates);
        let written = self.write_blocks(hooks, record);
        self.mode = mode;
        written
    }

    fn write_blocks(&mut self, hooks: &[StreamHook], record: &Record) -> Result<()> {
        for hook in hooks {
            self.module_data_index += 1;
            let key = format!("{MODULE_DATA_KEY}{}", self.module_data_index);
            self.write_value(&key, &hook.module)?;
            (hook.write)(record, self)?;
            trace!(module = %hook.module, "Stream block written");
        }
        self.write_value(ENUM_END_KEY, 0)
    }

    pub(crate) fn enum_read(&mut self, hooks: &[StreamHook], record: &mut Record) -> Result<()> {
        let mut index = self.cursor.map_or(0, |c| c + 1);
        loop {
            let Some((key, value)) = self
                .current()
                .and_then(|s| s.entries.get(index))
                .cloned()
            else {
                return Ok(());
            };
            if key.starts_with(MODULE_DATA_KEY) {
                self.cursor = Some(index);
                match hooks.iter().find(|h| h.module == value) {
                    Some(hook) => {
                        (hook.read)(record, self)?;
                        trace!(module = %hook.module, "Stream block read");
                    }
                    None => debug!(module = %value, "No stream hook for module block"),
                }
            } else if key.starts_with(ENUM_END_KEY) {
                self.cursor = Some(index);
                return Ok(());
            }
            index = self.cursor.map_or(index, |c| c.max(index)) + 1;
        }
    }
}

impl fmt::Display for ModuleStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in &section.entries {
                writeln!(f, "{key}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let text = "[1]\nName=Arden\nLevel = 12\n\n; comment\n[2]\nName=Bryn\n";
        let mut stream = ModuleStream::parse(text).expect("parse");
        assert_eq!(stream.section_count(), 2);
        assert_eq!(stream.read_section_name(0), Some("1"));
        assert!(stream.read_next_value());
        assert_eq!(stream.value_name(), Some("Name"));
        assert!(stream.read_next_value());
        assert_eq!(stream.get::<u32>(), Some(12));
        assert!(!stream.read_next_value());
        assert!(stream.read_prev_value());
        assert_eq!(stream.value(), Some("Arden"));

        let again = ModuleStream::parse(&stream.to_string()).expect("reparse");
        assert_eq!(again.to_string(), stream.to_string());
    }

    #[test]
    fn test_parse_errors() {
        assert!(ModuleStream::parse("Name=x").is_err());
        assert!(ModuleStream::parse("[a]\nnot a pair").is_err());
    }

    #[test]
    fn test_write_modes() {
        let mut stream = ModuleStream::new();
        assert!(stream.write_value("a", 1).is_err());
        stream.set_section_name("s");
        stream.write_value("a", 1).expect("write");
        stream.write_value("a", 2).expect("write");
        assert_eq!(stream.find("a"), Some("2"));

        stream.set_mode(StreamMode::Duplicates);
        stream.write_value("a", 3).expect("write");
        assert_eq!(stream.to_string(), "[s]\na=2\na=3\n");
    }

    #[test]
    fn test_next_value_stops_at_markers() {
        let mut stream = ModuleStream::parse("[s]\nx=1\nModuleData1=buff\ny=2\n").expect("parse");
        stream.set_section_name("s");
        assert!(stream.read_next_value());
        assert!(!stream.read_next_value());
        assert_eq!(stream.value_name(), Some("x"));
    }
}
