//! Binary format decoder.
//!
//! [`parse`] reads a `.wasm` byte stream into a frozen
//! [`module::Module`], running validation and the per-function
//! decode+typecheck+lower pass as it goes. Sections other than Custom must
//! appear in strictly ascending id order; every section carries a declared
//! size and reads are confined to it.
//!
//! Global, element and data init-expressions are evaluated inline during
//! the parse; `get_global` init-expressions resolve against the
//! [`Environment`]'s view of previously loaded modules.

pub mod lower;
pub mod module;
pub mod opcode;
pub mod reader;
pub mod typecheck;

use crate::runtime::environment::Environment;
use crate::runtime::value::TypedValue;
use module::{
    DataSegment, ElementSegment, Export, ExternalKind, Func, Global, Import, ImportKind,
    IndexEntry, Limits, Memory, Module, Signature, Table, ValueType, MAX_PAGES,
};
use reader::{ReadError, Reader};
use std::collections::HashSet;
use thiserror::Error;
use typecheck::TypeError;

const WASM_MAGIC: u32 = 0x6d73_6100;
const WASM_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("bad magic number 0x{0:08x}")]
    BadMagic(u32),
    #[error("unsupported version {0}")]
    BadVersion(u32),
    #[error("section {0} out of order")]
    SectionOutOfOrder(u8),
    #[error("unknown section id {0}")]
    UnknownSection(u8),
    #[error("section {id} size mismatch: ended at {pos}, expected {end}")]
    SectionSize { id: u8, pos: usize, end: usize },
    #[error("unknown opcode 0x{prefix:02x} 0x{byte:02x}")]
    UnknownOpcode { prefix: u8, byte: u8 },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("{0}")]
    Malformed(String),
}

/// Reader configuration (spec: `stop_on_first_error` is the default mode;
/// otherwise a failed section is skipped to its declared end and parsing
/// continues, the module still failing at the end).
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub stop_on_first_error: bool,
}

impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions {
            stop_on_first_error: true,
        }
    }
}

/// Parse a binary module. Errors are reported to the Environment's error
/// sink tagged `"Reader"` in addition to being returned.
pub fn parse(
    env: &Environment,
    name: &str,
    bytes: &[u8],
    options: &ReadOptions,
) -> Result<Module, LoadError> {
    match parse_inner(env, name, bytes, options) {
        Ok(module) => Ok(module),
        Err(e) => {
            env.report("Reader", &format!("{}: {}", name, e));
            Err(e)
        }
    }
}

fn parse_inner(
    env: &Environment,
    name: &str,
    bytes: &[u8],
    options: &ReadOptions,
) -> Result<Module, LoadError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_u32()?;
    if magic != WASM_MAGIC {
        return Err(LoadError::BadMagic(magic));
    }
    let version = reader.read_u32()?;
    if version != WASM_VERSION {
        return Err(LoadError::BadVersion(version));
    }

    let mut module = Module::new(name);
    let mut last_section = 0u8;
    let mut deferred: Option<LoadError> = None;

    while !reader.is_empty() {
        let id = reader.read_u8()?;
        let size = reader.read_var_u32()? as usize;
        if size > reader.remaining() {
            return Err(LoadError::Malformed(format!(
                "not enough bytes left for section {}: expected {}, got {}",
                id,
                size,
                reader.remaining()
            )));
        }
        let sec_end = reader.pos() + size;

        let result = (|| -> Result<(), LoadError> {
            if id != 0 {
                if id > 11 {
                    return Err(LoadError::UnknownSection(id));
                }
                if id <= last_section {
                    return Err(LoadError::SectionOutOfOrder(id));
                }
                last_section = id;
            }
            read_section(env, &mut module, &mut reader, id, sec_end)?;
            if reader.pos() != sec_end {
                return Err(LoadError::SectionSize {
                    id,
                    pos: reader.pos(),
                    end: sec_end,
                });
            }
            Ok(())
        })();

        if let Err(e) = result {
            if options.stop_on_first_error {
                return Err(e);
            }
            // Skipped sections still surface their diagnostics; only the
            // first error is returned at the end.
            env.report("Reader", &format!("{}: {}", name, e));
            deferred.get_or_insert(e);
            reader.seek(sec_end);
        }
    }

    if let Some(e) = deferred {
        return Err(e);
    }

    // Every defined function must have received a body from the code
    // section.
    for (i, func) in module.funcs.iter().enumerate() {
        if func.opcodes.is_empty() {
            return Err(LoadError::Malformed(format!("function {} has no body", i)));
        }
    }

    Ok(module)
}

fn read_section(
    env: &Environment,
    module: &mut Module,
    reader: &mut Reader<'_>,
    id: u8,
    sec_end: usize,
) -> Result<(), LoadError> {
    match id {
        0 => read_section_custom(module, reader, sec_end),
        1 => read_section_type(module, reader),
        2 => read_section_import(module, reader),
        3 => read_section_function(module, reader),
        4 => read_section_table(module, reader),
        5 => read_section_memory(module, reader),
        6 => read_section_global(env, module, reader),
        7 => read_section_export(module, reader),
        8 => read_section_start(module, reader),
        9 => read_section_elem(env, module, reader),
        10 => read_section_code(module, reader, sec_end),
        11 => read_section_data(env, module, reader),
        _ => Err(LoadError::UnknownSection(id)),
    }
}

fn read_value_type(reader: &mut Reader<'_>) -> Result<ValueType, LoadError> {
    let byte = reader.read_u8()?;
    ValueType::decode(byte)
        .ok_or_else(|| LoadError::Malformed(format!("invalid value type 0x{:02x}", byte)))
}

fn read_limits(reader: &mut Reader<'_>) -> Result<Limits, LoadError> {
    let flags = reader.read_var_u32()?;
    if flags > 3 {
        return Err(LoadError::Malformed(format!(
            "invalid limits flags 0x{:x}",
            flags
        )));
    }
    let has_max = flags & 0x1 != 0;
    let shared = flags & 0x2 != 0;
    let initial = reader.read_var_u32()?;
    let max = if has_max {
        Some(reader.read_var_u32()?)
    } else {
        None
    };
    if let Some(max) = max {
        if initial > max {
            return Err(LoadError::Malformed(format!(
                "limits initial {} exceeds max {}",
                initial, max
            )));
        }
    }
    Ok(Limits {
        initial,
        max,
        shared,
    })
}

fn check_memory_limits(limits: &Limits) -> Result<(), LoadError> {
    if limits.initial > MAX_PAGES {
        return Err(LoadError::Malformed(format!(
            "memory initial size {} exceeds {} pages",
            limits.initial, MAX_PAGES
        )));
    }
    if let Some(max) = limits.max {
        if max > MAX_PAGES {
            return Err(LoadError::Malformed(format!(
                "memory max size {} exceeds {} pages",
                max, MAX_PAGES
            )));
        }
    }
    if limits.shared && limits.max.is_none() {
        return Err(LoadError::Malformed(
            "shared memory must have a max size".into(),
        ));
    }
    Ok(())
}

fn check_one_table(module: &Module) -> Result<(), LoadError> {
    if module.has_table() {
        return Err(LoadError::Malformed(
            "only one table allowed per module".into(),
        ));
    }
    Ok(())
}

fn check_one_memory(module: &Module) -> Result<(), LoadError> {
    if module.has_memory() {
        return Err(LoadError::Malformed(
            "only one memory allowed per module".into(),
        ));
    }
    Ok(())
}

fn read_elem_type(reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let byte = reader.read_u8()?;
    if byte != 0x70 {
        return Err(LoadError::Malformed(format!(
            "table element type must be anyfunc, got 0x{:02x}",
            byte
        )));
    }
    Ok(())
}

fn read_section_type(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let form = reader.read_u8()?;
        if form != 0x60 {
            return Err(LoadError::Malformed(format!(
                "expected function type form 0x60, got 0x{:02x}",
                form
            )));
        }
        let param_count = reader.read_var_u32()?;
        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(read_value_type(reader)?);
        }
        let result_count = reader.read_var_u32()?;
        if result_count > 1 {
            return Err(LoadError::Malformed(format!(
                "function type has {} results, at most 1 allowed",
                result_count
            )));
        }
        let mut results = Vec::with_capacity(result_count as usize);
        for _ in 0..result_count {
            results.push(read_value_type(reader)?);
        }
        module.types.push(Signature::new(params, results));
    }
    Ok(())
}

fn read_section_import(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let import_module = reader.read_string()?;
        let field = reader.read_string()?;
        let kind_byte = reader.read_u8()?;
        let kind = ExternalKind::decode(kind_byte).ok_or_else(|| {
            LoadError::Malformed(format!("invalid import kind 0x{:02x}", kind_byte))
        })?;
        let import_pos = module.imports.len() as u32;
        let kind = match kind {
            ExternalKind::Func => {
                let sig_index = reader.read_var_u32()?;
                if sig_index as usize >= module.types.len() {
                    return Err(LoadError::Malformed(format!(
                        "import signature index {} out of range",
                        sig_index
                    )));
                }
                module.func_index.push(IndexEntry::imported(import_pos));
                ImportKind::Func { sig_index }
            }
            ExternalKind::Table => {
                check_one_table(module)?;
                read_elem_type(reader)?;
                let limits = read_limits(reader)?;
                if limits.shared {
                    return Err(LoadError::Malformed("tables cannot be shared".into()));
                }
                module.table_index.push(IndexEntry::imported(import_pos));
                ImportKind::Table { limits }
            }
            ExternalKind::Memory => {
                check_one_memory(module)?;
                let limits = read_limits(reader)?;
                check_memory_limits(&limits)?;
                module.memory_index.push(IndexEntry::imported(import_pos));
                ImportKind::Memory { limits }
            }
            ExternalKind::Global => {
                let value_type = read_value_type(reader)?;
                let mut_byte = reader.read_u8()?;
                if mut_byte > 1 {
                    return Err(LoadError::Malformed(format!(
                        "invalid global mutability 0x{:02x}",
                        mut_byte
                    )));
                }
                module.global_index.push(IndexEntry::imported(import_pos));
                ImportKind::Global {
                    value_type,
                    mutable: mut_byte == 1,
                }
            }
        };
        module.imports.push(Import {
            module: import_module,
            field,
            kind,
        });
    }
    Ok(())
}

fn read_section_function(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let sig_index = reader.read_var_u32()?;
        if sig_index as usize >= module.types.len() {
            return Err(LoadError::Malformed(format!(
                "function signature index {} out of range",
                sig_index
            )));
        }
        module.funcs.push(Func::new(sig_index));
        module
            .func_index
            .push(IndexEntry::defined(module.funcs.len() as u32 - 1));
    }
    Ok(())
}

fn read_section_table(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        check_one_table(module)?;
        read_elem_type(reader)?;
        let limits = read_limits(reader)?;
        if limits.shared {
            return Err(LoadError::Malformed("tables cannot be shared".into()));
        }
        module.tables.push(Table { limits });
        module
            .table_index
            .push(IndexEntry::defined(module.tables.len() as u32 - 1));
    }
    Ok(())
}

fn read_section_memory(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        check_one_memory(module)?;
        let limits = read_limits(reader)?;
        check_memory_limits(&limits)?;
        module.memories.push(Memory { limits });
        module
            .memory_index
            .push(IndexEntry::defined(module.memories.len() as u32 - 1));
    }
    Ok(())
}

fn read_section_global(
    env: &Environment,
    module: &mut Module,
    reader: &mut Reader<'_>,
) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let value_type = read_value_type(reader)?;
        let mut_byte = reader.read_u8()?;
        if mut_byte > 1 {
            return Err(LoadError::Malformed(format!(
                "invalid global mutability 0x{:02x}",
                mut_byte
            )));
        }
        let value = eval_init_expr(env, module, reader, value_type)?;
        module.globals.push(Global {
            value,
            mutable: mut_byte == 1,
        });
        module
            .global_index
            .push(IndexEntry::defined(module.globals.len() as u32 - 1));
    }
    Ok(())
}

fn read_section_export(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    let mut seen = HashSet::new();
    for _ in 0..count {
        let name = reader.read_string()?;
        if !seen.insert(name.clone()) {
            return Err(LoadError::Malformed(format!(
                "duplicate export name \"{}\"",
                name
            )));
        }
        let kind_byte = reader.read_u8()?;
        let kind = ExternalKind::decode(kind_byte).ok_or_else(|| {
            LoadError::Malformed(format!("invalid export kind 0x{:02x}", kind_byte))
        })?;
        let index = reader.read_var_u32()?;
        let space = match kind {
            ExternalKind::Func => &mut module.func_index,
            ExternalKind::Table => &mut module.table_index,
            ExternalKind::Memory => &mut module.memory_index,
            ExternalKind::Global => &mut module.global_index,
        };
        let entry = space.get_mut(index as usize).ok_or_else(|| {
            LoadError::Malformed(format!("export {} index {} out of range", kind, index))
        })?;
        entry.exported = true;
        module.exports.push(Export { kind, name, index });
    }
    Ok(())
}

fn read_section_start(module: &mut Module, reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let index = reader.read_var_u32()?;
    if index as usize >= module.func_index.len() {
        return Err(LoadError::Malformed(format!(
            "start function index {} out of range",
            index
        )));
    }
    module.start = Some(index);
    Ok(())
}

fn read_section_elem(
    env: &Environment,
    module: &mut Module,
    reader: &mut Reader<'_>,
) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let table = reader.read_var_u32()?;
        if table != 0 || !module.has_table() {
            return Err(LoadError::Malformed(format!(
                "element segment table index {} is invalid",
                table
            )));
        }
        let offset = eval_init_expr(env, module, reader, ValueType::I32)?;
        let num = reader.read_var_u32()?;
        let mut funcs = Vec::with_capacity(num as usize);
        for _ in 0..num {
            let index = reader.read_var_u32()?;
            if index as usize >= module.func_index.len() {
                return Err(LoadError::Malformed(format!(
                    "element segment function index {} out of range",
                    index
                )));
            }
            funcs.push(index);
        }
        module.elements.push(ElementSegment {
            table,
            offset: offset.value.as_u32(),
            funcs,
        });
    }
    Ok(())
}

fn read_section_code(
    module: &mut Module,
    reader: &mut Reader<'_>,
    sec_end: usize,
) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    if count as usize != module.funcs.len() {
        return Err(LoadError::Malformed(format!(
            "function count mismatch: code section has {}, function section has {}",
            count,
            module.funcs.len()
        )));
    }
    for i in 0..count as usize {
        let body_size = reader.read_var_u32()? as usize;
        let body_end = reader.pos() + body_size;
        if body_end > sec_end {
            return Err(LoadError::Malformed(format!(
                "function body {} overruns the code section",
                i
            )));
        }

        let sig_index = module.funcs[i].sig_index as usize;
        let mut types = module.types[sig_index].params.clone();
        let param_count = types.len() as u32;

        let decl_count = reader.read_var_u32()?;
        for _ in 0..decl_count {
            let n = reader.read_var_u32()?;
            let t = read_value_type(reader)?;
            if types.len() + n as usize > u32::MAX as usize {
                return Err(LoadError::Malformed("too many locals".into()));
            }
            types.extend(std::iter::repeat(t).take(n as usize));
        }
        module.funcs[i].types = types;
        module.funcs[i].param_count = param_count;

        let opcodes = lower::Lowerer::lower(module, i, reader, body_end)?;
        module.funcs[i].opcodes = opcodes;
    }
    Ok(())
}

fn read_section_data(
    env: &Environment,
    module: &mut Module,
    reader: &mut Reader<'_>,
) -> Result<(), LoadError> {
    let count = reader.read_var_u32()?;
    for _ in 0..count {
        let memory = reader.read_var_u32()?;
        if memory != 0 || !module.has_memory() {
            return Err(LoadError::Malformed(format!(
                "data segment memory index {} is invalid",
                memory
            )));
        }
        let offset = eval_init_expr(env, module, reader, ValueType::I32)?;
        let size = reader.read_var_u32()? as usize;
        let bytes = reader.read_bytes(size)?.to_vec();
        module.data.push(DataSegment {
            memory,
            offset: offset.value.as_u32(),
            bytes,
        });
    }
    Ok(())
}

fn read_section_custom(
    module: &mut Module,
    reader: &mut Reader<'_>,
    sec_end: usize,
) -> Result<(), LoadError> {
    let name = reader.read_string()?;
    if name == "name" {
        read_name_section(module, reader, sec_end)?;
    } else {
        tracing::debug!(section = %name, "skipping custom section");
    }
    reader.seek(sec_end);
    Ok(())
}

fn read_name_section(
    module: &mut Module,
    reader: &mut Reader<'_>,
    sec_end: usize,
) -> Result<(), LoadError> {
    while reader.pos() < sec_end {
        let sub_id = reader.read_u8()?;
        let sub_size = reader.read_var_u32()? as usize;
        let sub_end = reader.pos() + sub_size;
        if sub_end > sec_end {
            return Err(LoadError::Malformed(
                "name subsection overruns the custom section".into(),
            ));
        }
        match sub_id {
            0 => {
                module.module_name = Some(reader.read_string()?);
            }
            1 => {
                let count = reader.read_var_u32()?;
                for _ in 0..count {
                    let index = reader.read_var_u32()?;
                    let name = reader.read_string()?;
                    if index as usize >= module.func_index.len() {
                        return Err(LoadError::Malformed(format!(
                            "function name index {} out of range",
                            index
                        )));
                    }
                    module.func_names.insert(index, name);
                }
            }
            2 => {
                // Local names are validated (indices and UTF-8) but not
                // retained.
                let func_count = reader.read_var_u32()?;
                for _ in 0..func_count {
                    let index = reader.read_var_u32()?;
                    if index as usize >= module.func_index.len() {
                        return Err(LoadError::Malformed(format!(
                            "local name function index {} out of range",
                            index
                        )));
                    }
                    let local_count = reader.read_var_u32()?;
                    for _ in 0..local_count {
                        let _local = reader.read_var_u32()?;
                        let _name = reader.read_string()?;
                    }
                }
            }
            _ => {
                tracing::debug!(sub_id, "skipping name subsection");
            }
        }
        reader.seek(sub_end);
    }
    Ok(())
}

fn eval_init_expr(
    env: &Environment,
    module: &Module,
    reader: &mut Reader<'_>,
    expected: ValueType,
) -> Result<TypedValue, LoadError> {
    let opcode = reader.read_u8()?;
    let value = match opcode {
        0x41 => TypedValue::i32(reader.read_var_s32()?),
        0x42 => TypedValue::i64(reader.read_var_s64()?),
        0x43 => TypedValue::f32_bits(reader.read_f32_bits()?),
        0x44 => TypedValue::f64_bits(reader.read_f64_bits()?),
        0x23 => {
            let index = reader.read_var_u32()?;
            let entry = module.global_index.get(index as usize).ok_or_else(|| {
                LoadError::Malformed(format!("init_expr global index {} out of range", index))
            })?;
            if !entry.import {
                return Err(LoadError::Malformed(
                    "init_expr get_global must reference an imported global".into(),
                ));
            }
            let import = &module.imports[entry.index as usize];
            let (value_type, mutable) = match &import.kind {
                ImportKind::Global {
                    value_type,
                    mutable,
                } => (*value_type, *mutable),
                _ => unreachable!("global index space points at a non-global import"),
            };
            if mutable {
                return Err(LoadError::Malformed(
                    "init_expr get_global must reference an immutable global".into(),
                ));
            }
            let value = env
                .get_global_value(&import.module, &import.field)
                .ok_or_else(|| {
                    LoadError::Malformed(format!(
                        "init_expr global {}::{} is not resolvable",
                        import.module, import.field
                    ))
                })?;
            if value.value_type != value_type {
                return Err(LoadError::Malformed(format!(
                    "init_expr global {}::{} has type {}, expected {}",
                    import.module, import.field, value.value_type, value_type
                )));
            }
            value
        }
        _ => {
            return Err(LoadError::Malformed(format!(
                "unsupported init_expr opcode 0x{:02x}",
                opcode
            )))
        }
    };
    let end = reader.read_u8()?;
    if end != 0x0b {
        return Err(LoadError::Malformed(
            "init_expr is not terminated by end".into(),
        ));
    }
    if value.value_type != expected {
        return Err(LoadError::Malformed(format!(
            "init_expr has type {}, expected {}",
            value.value_type, expected
        )));
    }
    Ok(value)
}
