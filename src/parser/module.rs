//! Parsed, immutable representation of one WebAssembly module.
//!
//! A [`Module`] holds only headers and constant data; all mutable run-time
//! state (memories, tables, mutable globals) lives in the
//! [`crate::runtime::link::Runtime`] that instantiates it.
//!
//! Index spaces follow the binary format's "imports occupy the first slots"
//! rule without special-casing: for each of the four kinds there is a flat
//! vector of [`IndexEntry`] records mapping a module-local index to either
//! an import entry or a defined object.

use crate::parser::opcode::OpcodeRec;
use crate::runtime::value::TypedValue;
use std::collections::HashMap;
use std::fmt;

/// Wasm page size in bytes (64 KiB).
pub const PAGE_SIZE: u32 = 65536;

/// Maximum number of linear-memory pages (4 GiB total).
pub const MAX_PAGES: u32 = 65536;

/// Value types, including the two sentinels used by the type checker:
/// `Void` for empty block signatures and `Any` for the polymorphic stack on
/// unreachable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    Void,
    Any,
}

impl ValueType {
    /// Decode a value-type byte. Only the four concrete types are accepted.
    pub fn decode(byte: u8) -> Option<ValueType> {
        match byte {
            0x7f => Some(ValueType::I32),
            0x7e => Some(ValueType::I64),
            0x7d => Some(ValueType::F32),
            0x7c => Some(ValueType::F64),
            _ => None,
        }
    }

    /// Decode an inline block-type byte (`0x40` for empty, else a value
    /// type).
    pub fn decode_block_type(byte: u8) -> Option<ValueType> {
        match byte {
            0x40 => Some(ValueType::Void),
            _ => ValueType::decode(byte),
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(
            self,
            ValueType::I32 | ValueType::I64 | ValueType::F32 | ValueType::F64
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Void => "void",
            ValueType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Resizable limits for memories and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub initial: u32,
    pub max: Option<u32>,
    pub shared: bool,
}

impl Limits {
    pub fn new(initial: u32, max: Option<u32>) -> Limits {
        Limits {
            initial,
            max,
            shared: false,
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "initial={} max={}", self.initial, max),
            None => write!(f, "initial={}", self.initial),
        }
    }
}

/// A function signature: ordered parameter and result types.
///
/// Wasm 1.0 allows at most one result, but results are kept as a sequence
/// for block signatures and forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Signature {
        Signature { params, results }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> ")?;
        if self.results.is_empty() {
            write!(f, "nil")
        } else {
            for (i, r) in self.results.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", r)?;
            }
            Ok(())
        }
    }
}

/// The four kinds of importable/exportable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    pub fn decode(byte: u8) -> Option<ExternalKind> {
        match byte {
            0x00 => Some(ExternalKind::Func),
            0x01 => Some(ExternalKind::Table),
            0x02 => Some(ExternalKind::Memory),
            0x03 => Some(ExternalKind::Global),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExternalKind::Func => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
        }
    }
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind-specific import payload.
#[derive(Debug, Clone)]
pub enum ImportKind {
    Func { sig_index: u32 },
    Table { limits: Limits },
    Memory { limits: Limits },
    Global { value_type: ValueType, mutable: bool },
}

impl ImportKind {
    pub fn external_kind(&self) -> ExternalKind {
        match self {
            ImportKind::Func { .. } => ExternalKind::Func,
            ImportKind::Table { .. } => ExternalKind::Table,
            ImportKind::Memory { .. } => ExternalKind::Memory,
            ImportKind::Global { .. } => ExternalKind::Global,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{} kind = {}",
            self.module,
            self.field,
            self.kind.external_kind()
        )
    }
}

/// A defined function: signature, flattened local types (parameters first)
/// and the lowered opcode stream produced by the decode+typecheck pass.
#[derive(Debug)]
pub struct Func {
    pub sig_index: u32,
    /// Parameter types followed by declared local types.
    pub types: Vec<ValueType>,
    pub param_count: u32,
    pub opcodes: Vec<OpcodeRec>,
}

impl Func {
    pub fn new(sig_index: u32) -> Func {
        Func {
            sig_index,
            types: Vec::new(),
            param_count: 0,
            opcodes: Vec::new(),
        }
    }

    /// Total locals, parameters included.
    pub fn local_count(&self) -> u32 {
        self.types.len() as u32
    }
}

/// A defined table. The element type is always `anyfunc` in Wasm 1.0.
#[derive(Debug, Clone)]
pub struct Table {
    pub limits: Limits,
}

/// A defined linear memory.
#[derive(Debug, Clone)]
pub struct Memory {
    pub limits: Limits,
}

/// A defined global with its init expression already evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Global {
    pub value: TypedValue,
    pub mutable: bool,
}

/// One slot of an index space: whether the module-local index refers to an
/// import or a defined object, and whether it is exported.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// Position in `imports` when `import`, otherwise in the defined-object
    /// vector of the same kind.
    pub index: u32,
    pub import: bool,
    pub exported: bool,
}

impl IndexEntry {
    pub fn defined(index: u32) -> IndexEntry {
        IndexEntry {
            index,
            import: false,
            exported: false,
        }
    }

    pub fn imported(index: u32) -> IndexEntry {
        IndexEntry {
            index,
            import: true,
            exported: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub kind: ExternalKind,
    pub name: String,
    /// Module-local index into the kind's index space.
    pub index: u32,
}

/// An element segment with its offset expression pre-evaluated.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table: u32,
    pub offset: u32,
    pub funcs: Vec<u32>,
}

/// A data segment with its offset expression pre-evaluated.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub memory: u32,
    pub offset: u32,
    pub bytes: Vec<u8>,
}

/// Parsed module, immutable after load.
#[derive(Debug, Default)]
pub struct Module {
    /// Caller-supplied name under which the module was loaded.
    pub name: String,

    pub types: Vec<Signature>,
    pub imports: Vec<Import>,

    pub funcs: Vec<Func>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub globals: Vec<Global>,

    pub func_index: Vec<IndexEntry>,
    pub global_index: Vec<IndexEntry>,
    pub memory_index: Vec<IndexEntry>,
    pub table_index: Vec<IndexEntry>,

    pub exports: Vec<Export>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,

    pub start: Option<u32>,

    /// Debug names from the `name` custom section.
    pub module_name: Option<String>,
    pub func_names: HashMap<u32, String>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            ..Module::default()
        }
    }

    pub fn has_memory(&self) -> bool {
        !self.memory_index.is_empty()
    }

    pub fn has_table(&self) -> bool {
        !self.table_index.is_empty()
    }

    /// Signature of the function at a module-local index, looking through
    /// imports.
    pub fn func_signature(&self, index: u32) -> Option<&Signature> {
        let entry = self.func_index.get(index as usize)?;
        let sig_index = if entry.import {
            match &self.imports.get(entry.index as usize)?.kind {
                ImportKind::Func { sig_index } => *sig_index,
                _ => return None,
            }
        } else {
            self.funcs.get(entry.index as usize)?.sig_index
        };
        self.types.get(sig_index as usize)
    }

    /// `(type, mutable)` of the global at a module-local index, looking
    /// through imports.
    pub fn global_type(&self, index: u32) -> Option<(ValueType, bool)> {
        let entry = self.global_index.get(index as usize)?;
        if entry.import {
            match &self.imports.get(entry.index as usize)?.kind {
                ImportKind::Global {
                    value_type,
                    mutable,
                } => Some((*value_type, *mutable)),
                _ => None,
            }
        } else {
            let global = self.globals.get(entry.index as usize)?;
            Some((global.value.value_type, global.mutable))
        }
    }

    /// Defined function behind a module-local index, `None` for imports.
    pub fn func(&self, index: u32) -> Option<&Func> {
        let entry = self.func_index.get(index as usize)?;
        if entry.import {
            None
        } else {
            self.funcs.get(entry.index as usize)
        }
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Export name of a function index, if any; falls back to the `name`
    /// section.
    pub fn func_name(&self, index: u32) -> Option<&str> {
        self.exports
            .iter()
            .find(|e| e.kind == ExternalKind::Func && e.index == index)
            .map(|e| e.name.as_str())
            .or_else(|| self.func_names.get(&index).map(String::as_str))
    }

    /// Human-readable section summary for the CLI `dump` command.
    pub fn to_details_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Type[{}]:\n", self.types.len()));
        for (i, sig) in self.types.iter().enumerate() {
            out.push_str(&format!(" - type[{}] {}\n", i, sig));
        }
        if !self.imports.is_empty() {
            out.push_str(&format!("Import[{}]:\n", self.imports.len()));
            for (i, import) in self.imports.iter().enumerate() {
                out.push_str(&format!(" - import[{}] {}\n", i, import));
            }
        }
        out.push_str(&format!("Function[{}]:\n", self.func_index.len()));
        for (i, entry) in self.func_index.iter().enumerate() {
            let sig = self
                .func_signature(i as u32)
                .map(|s| s.to_string())
                .unwrap_or_default();
            let name = self
                .func_name(i as u32)
                .map(|n| format!(" <{}>", n))
                .unwrap_or_default();
            let origin = if entry.import { " (import)" } else { "" };
            out.push_str(&format!(" - func[{}] {}{}{}\n", i, sig, name, origin));
        }
        if !self.memory_index.is_empty() {
            out.push_str(&format!("Memory[{}]:\n", self.memory_index.len()));
            for (i, memory) in self.memories.iter().enumerate() {
                out.push_str(&format!(" - memory[{}] {}\n", i, memory.limits));
            }
        }
        if !self.table_index.is_empty() {
            out.push_str(&format!("Table[{}]:\n", self.table_index.len()));
            for (i, table) in self.tables.iter().enumerate() {
                out.push_str(&format!(" - table[{}] anyfunc {}\n", i, table.limits));
            }
        }
        out.push_str(&format!("Export[{}]:\n", self.exports.len()));
        for export in &self.exports {
            out.push_str(&format!(
                " - {}[{}] -> \"{}\"\n",
                export.kind, export.index, export.name
            ));
        }
        if let Some(start) = self.start {
            out.push_str(&format!("Start: func[{}]\n", start));
        }
        out
    }
}
