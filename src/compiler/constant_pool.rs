//! Constant pool shared by the generator and the emitter
//!
//! Entries are interned: asking twice for the same field or method returns the
//! same index. Indices are handed out in first-use order, which is stable
//! because functions are generated one at a time in declaration order.

use super::ir::{LogicalType, StorageClass};
use super::registry::MethodInfo;
use std::collections::BTreeMap;
use std::fmt;

/// Constant pool entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpEntryKind {
    /// Class reference
    ClassRef,
    /// Instance method (constructor) reference
    InstanceMethodRef,
    /// Superclass method reference
    SuperMethodRef,
    /// Static method reference
    StaticMethodRef,
    /// Static field reference
    StaticFieldRef,
    /// Virtual method reference
    VirtualMethodRef,
}

impl CpEntryKind {
    /// JCA keyword (class references carry a leading dot)
    pub fn keyword(&self) -> &'static str {
        match self {
            CpEntryKind::ClassRef => ".classRef",
            CpEntryKind::InstanceMethodRef => "instanceMethodRef",
            CpEntryKind::SuperMethodRef => "superMethodRef",
            CpEntryKind::StaticMethodRef => "staticMethodRef",
            CpEntryKind::StaticFieldRef => "staticFieldRef",
            CpEntryKind::VirtualMethodRef => "virtualMethodRef",
        }
    }
}

/// One constant pool entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpEntry {
    /// Entry type
    pub kind: CpEntryKind,
    /// Entry text as written to JCA
    pub value: String,
    /// Human-readable note
    pub comment: Option<String>,
}

impl fmt::Display for CpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {};", self.kind.keyword(), self.value)?;
        if let Some(comment) = &self.comment {
            write!(f, " // {}", comment)?;
        }
        Ok(())
    }
}

/// Append-only, interned constant pool
#[derive(Debug, Clone)]
pub struct ConstantPool {
    class_name: String,
    entries: Vec<CpEntry>,
    interned: BTreeMap<String, u16>,
    imports: Vec<String>,
}

fn jca_array_type(elem: LogicalType) -> &'static str {
    match elem {
        LogicalType::Byte => "byte[]",
        LogicalType::Int => "int[]",
        _ => "short[]",
    }
}

impl ConstantPool {
    /// Empty pool for the class that owns the generated methods
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            entries: Vec::new(),
            interned: BTreeMap::new(),
            imports: Vec::new(),
        }
    }

    /// Owning class name
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Add an entry unconditionally
    pub fn add(&mut self, entry: CpEntry) -> u16 {
        let idx = self.entries.len() as u16;
        self.entries.push(entry);
        idx
    }

    /// Return the index recorded for `key`, adding `entry` on first use
    pub fn intern(&mut self, key: &str, entry: impl FnOnce() -> CpEntry) -> u16 {
        if let Some(&idx) = self.interned.get(key) {
            return idx;
        }
        let idx = self.add(entry());
        self.interned.insert(key.to_string(), idx);
        idx
    }

    /// Static array field backing a shared or read-only storage class
    pub fn storage_array(&mut self, class: StorageClass) -> u16 {
        let elem = class.element_type().unwrap_or(LogicalType::Short);
        let owner = self.class_name.clone();
        self.intern(&format!("field:{}", class.name()), || CpEntry {
            kind: CpEntryKind::StaticFieldRef,
            value: format!("{} {}/{}", jca_array_type(elem), owner, class.name()),
            comment: Some(class.name().to_string()),
        })
    }

    /// Short static holding an offload stack pointer
    pub fn stack_pointer(&mut self, class: StorageClass) -> u16 {
        let name = class.stack_pointer_name().unwrap_or("SP");
        let owner = self.class_name.clone();
        self.intern(&format!("field:{}", name), || CpEntry {
            kind: CpEntryKind::StaticFieldRef,
            value: format!("short {}/{}", owner, name),
            comment: Some(name.to_string()),
        })
    }

    /// Read-only table of one constant array (or one constant struct field,
    /// keyed `array$field`)
    pub fn const_table(&mut self, key: &str, class: StorageClass) -> u16 {
        let elem = class.element_type().unwrap_or(LogicalType::Short);
        let owner = self.class_name.clone();
        self.intern(&format!("const:{}", key), || CpEntry {
            kind: CpEntryKind::StaticFieldRef,
            value: format!("{} {}/{}", jca_array_type(elem), owner, key),
            comment: Some(key.to_string()),
        })
    }

    /// A method of the owning class
    pub fn user_method(&mut self, name: &str, descriptor: &str) -> u16 {
        let owner = self.class_name.clone();
        self.intern(&format!("method:{}", name), || CpEntry {
            kind: CpEntryKind::StaticMethodRef,
            value: format!("{}/{}{}", owner, name, descriptor),
            comment: None,
        })
    }

    /// A platform API method, as `package_index.class_token.method_token(desc)`
    pub fn api_method(&mut self, method: &MethodInfo) -> u16 {
        let key = format!("api:{}.{}", method.class_name, method.method_name);
        if let Some(&idx) = self.interned.get(&key) {
            return idx;
        }
        let pkg = self.track_package(method.package());
        let kind = if method.is_static {
            CpEntryKind::StaticMethodRef
        } else {
            CpEntryKind::VirtualMethodRef
        };
        let entry = CpEntry {
            kind,
            value: format!(
                "{}.{}.{}{}",
                pkg, method.class_token, method.method_token, method.descriptor
            ),
            comment: Some(format!(
                "{}.{}{}",
                method.simple_class(),
                method.method_name,
                method.descriptor
            )),
        };
        self.intern(&key, || entry)
    }

    /// Import index of a package, recording it on first use
    pub fn track_package(&mut self, package: &str) -> usize {
        match self.imports.iter().position(|p| p == package) {
            Some(idx) => idx,
            None => {
                self.imports.push(package.to_string());
                self.imports.len() - 1
            }
        }
    }

    /// Imported packages in import-index order
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Entry at an index
    pub fn get(&self, idx: u16) -> Option<&CpEntry> {
        self.entries.get(idx as usize)
    }

    /// All entries in index order
    pub fn entries(&self) -> &[CpEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
