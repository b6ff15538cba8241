//! The Runtime: links an [`Environment`]'s modules into runnable instances.
//!
//! Linking runs in four phases:
//!
//! 1. *Pre-link* host modules into [`RuntimeModule`]s (globals copied into
//!    the Runtime's pool, functions registered in the global function
//!    space).
//! 2. *Materialize* every defined function, table, memory and global of
//!    every Wasm module. Mutable defined globals are copied into the pool
//!    so later linking references a mutable cell.
//! 3. *Resolve* imports by name, recursively when a module re-exports
//!    another module's import (a visited set turns cycles into errors),
//!    consulting the [`LinkingPolicy`] for names a host module does not
//!    provide.
//! 4. *Initialize* memories from data segments and tables from element
//!    segments, strictly bounds-checked.
//!
//! All cross-object references are indices into Runtime-owned pools; the
//! function space assigns every function (defined or host) a global
//! address, which is also what table elements hold.

use crate::parser::module::{ExternalKind, Func, ImportKind, Limits, Module, Signature};
use crate::parser::opcode::INVALID_INDEX;
use crate::runtime::environment::{Environment, HostFunc};
use crate::runtime::memory::RuntimeMemory;
use crate::runtime::thread::Thread;
use crate::runtime::trace;
use crate::runtime::value::{TypedValue, Value};
use crate::runtime::{ThreadResult, Trap};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("import {module}::{field}: module not found")]
    UnknownModule { module: String, field: String },
    #[error("import {module}::{field}: no such export")]
    UnknownImport { module: String, field: String },
    #[error("import {module}::{field}: expected a {expected}")]
    KindMismatch {
        module: String,
        field: String,
        expected: ExternalKind,
    },
    #[error("import {module}::{field}: signature mismatch")]
    SignatureMismatch { module: String, field: String },
    #[error("import {module}::{field}: global type mismatch")]
    GlobalTypeMismatch { module: String, field: String },
    #[error("import {module}::{field}: mutable globals cannot be imported")]
    MutableGlobalImport { module: String, field: String },
    #[error("import {module}::{field}: invalid object index")]
    ImportCycle { module: String, field: String },
    #[error("import {module}::{field}: refused by linking policy")]
    PolicyRefused { module: String, field: String },
    #[error("module {module}: data segment {segment} is out of bounds")]
    DataSegmentOutOfBounds { module: String, segment: usize },
    #[error("module {module}: element segment {segment} is out of bounds")]
    ElemSegmentOutOfBounds { module: String, segment: usize },
}

/// A function instance in the Runtime's global function space: either a
/// defined Wasm function together with its owning instance, or a host
/// function (from the Environment, or policy-created and pool-owned).
#[derive(Clone, Copy)]
pub enum FuncInstance<'env> {
    Defined { instance: usize, func: &'env Func },
    Host(&'env HostFunc),
    PoolHost(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeGlobal {
    pub value: TypedValue,
    pub mutable: bool,
}

/// A runtime table. Entries are global function addresses;
/// `INVALID_INDEX` marks uninitialized slots.
#[derive(Debug)]
pub struct RuntimeTable {
    pub limits: Limits,
    pub entries: Vec<u32>,
}

impl RuntimeTable {
    pub fn new(limits: Limits) -> RuntimeTable {
        let entries = vec![INVALID_INDEX; limits.initial as usize];
        RuntimeTable { limits, entries }
    }

    /// Raise the current size to at least `size` entries (linker use, when
    /// an importer requires a larger initial size).
    pub fn ensure_size(&mut self, size: u32) {
        if size as usize > self.entries.len() {
            self.entries.resize(size as usize, INVALID_INDEX);
            self.limits.initial = size;
        }
    }
}

/// One linked instance: per-kind vectors of indices into Runtime pools
/// (globals, memories, tables) or into the global function space.
pub struct RuntimeModule<'env> {
    pub name: String,
    pub funcs: Vec<u32>,
    pub globals: Vec<u32>,
    pub memories: Vec<u32>,
    pub tables: Vec<u32>,
    pub exports: HashMap<String, (u32, ExternalKind)>,
    /// Backing module; `None` for host modules.
    pub module: Option<&'env Module>,
}

impl<'env> RuntimeModule<'env> {
    fn new(name: &str, module: Option<&'env Module>) -> RuntimeModule<'env> {
        RuntimeModule {
            name: name.to_string(),
            funcs: Vec::new(),
            globals: Vec::new(),
            memories: Vec::new(),
            tables: Vec::new(),
            exports: HashMap::new(),
            module,
        }
    }
}

pub type ImportFuncCallback = Box<dyn Fn(&crate::parser::module::Import, &Signature) -> Option<HostFunc>>;
pub type ImportGlobalCallback = Box<dyn Fn(&crate::parser::module::Import) -> Option<RuntimeGlobal>>;
pub type ImportMemoryCallback = Box<dyn Fn(&crate::parser::module::Import, &mut RuntimeMemory) -> bool>;
pub type ImportTableCallback = Box<dyn Fn(&crate::parser::module::Import, &mut RuntimeTable) -> bool>;
pub type InitMemoryCallback = Box<dyn Fn(&str, &str, &mut RuntimeMemory) -> bool>;
pub type InitTableCallback = Box<dyn Fn(&str, &str, &mut RuntimeTable) -> bool>;

/// Optional callbacks filling imports a host module does not provide, and
/// post-link initializers for host-owned memories and tables.
#[derive(Default)]
pub struct LinkingPolicy {
    pub func: Option<ImportFuncCallback>,
    pub global: Option<ImportGlobalCallback>,
    pub memory: Option<ImportMemoryCallback>,
    pub table: Option<ImportTableCallback>,
    pub memory_init: Option<InitMemoryCallback>,
    pub table_init: Option<InitTableCallback>,
}

/// Linking policy plus interpreter stack sizes.
pub struct LinkingThreadOptions {
    pub policy: LinkingPolicy,
    pub value_stack_size: usize,
    pub call_stack_size: usize,
}

impl Default for LinkingThreadOptions {
    fn default() -> LinkingThreadOptions {
        LinkingThreadOptions {
            policy: LinkingPolicy::default(),
            value_stack_size: Thread::DEFAULT_VALUE_STACK_SIZE,
            call_stack_size: Thread::DEFAULT_CALL_STACK_SIZE,
        }
    }
}

/// Handle to a callable function resolved through an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncHandle {
    pub(crate) addr: u32,
}

pub struct Runtime<'env> {
    pub(crate) env: &'env Environment,
    pub(crate) modules: Vec<RuntimeModule<'env>>,
    by_name: HashMap<String, usize>,
    pub(crate) funcs: Vec<FuncInstance<'env>>,
    pub(crate) globals: Vec<RuntimeGlobal>,
    pub(crate) memories: Vec<RuntimeMemory>,
    pub(crate) tables: Vec<RuntimeTable>,
    pub(crate) host_pool: Vec<HostFunc>,
    thread: Option<Thread<'env>>,
}

impl<'env> Runtime<'env> {
    /// Link every module in the Environment and return a runnable Runtime.
    pub fn init(
        env: &'env Environment,
        options: LinkingThreadOptions,
    ) -> Result<Runtime<'env>, LinkError> {
        let mut runtime = Runtime {
            env,
            modules: Vec::new(),
            by_name: HashMap::new(),
            funcs: Vec::new(),
            globals: Vec::new(),
            memories: Vec::new(),
            tables: Vec::new(),
            host_pool: Vec::new(),
            thread: Some(Thread::new(
                options.value_stack_size,
                options.call_stack_size,
            )),
        };
        let result = (|| {
            runtime.prelink_host_modules();
            runtime.materialize_defined();
            runtime.resolve_imports(&options.policy)?;
            runtime.initialize_segments(&options.policy)
        })();
        if let Err(e) = &result {
            env.report("Runtime", &e.to_string());
        }
        result.map(|_| runtime)
    }

    // --- phase 1 ---------------------------------------------------------

    fn prelink_host_modules(&mut self) {
        let env = self.env;
        for (name, host) in env.host_modules() {
            let id = self.modules.len();
            let mut rm = RuntimeModule::new(name, None);
            for (i, (field, func)) in host.funcs.iter().enumerate() {
                let addr = self.funcs.len() as u32;
                self.funcs.push(FuncInstance::Host(func));
                rm.funcs.push(addr);
                rm.exports
                    .insert(field.clone(), (i as u32, ExternalKind::Func));
            }
            for (i, (field, global)) in host.globals.iter().enumerate() {
                let pool = self.globals.len() as u32;
                self.globals.push(RuntimeGlobal {
                    value: global.value,
                    mutable: global.mutable,
                });
                rm.globals.push(pool);
                rm.exports
                    .insert(field.clone(), (i as u32, ExternalKind::Global));
            }
            tracing::debug!(module = %name, funcs = rm.funcs.len(), globals = rm.globals.len(), "pre-linked host module");
            self.by_name.insert(name.clone(), id);
            self.modules.push(rm);
        }
    }

    // --- phase 2 ---------------------------------------------------------

    fn materialize_defined(&mut self) {
        let env = self.env;
        for (name, module) in env.modules() {
            let id = self.modules.len();
            let mut rm = RuntimeModule::new(name, Some(module));

            for entry in &module.func_index {
                if entry.import {
                    rm.funcs.push(INVALID_INDEX);
                } else {
                    let addr = self.funcs.len() as u32;
                    self.funcs.push(FuncInstance::Defined {
                        instance: id,
                        func: &module.funcs[entry.index as usize],
                    });
                    rm.funcs.push(addr);
                }
            }
            for entry in &module.global_index {
                if entry.import {
                    rm.globals.push(INVALID_INDEX);
                } else {
                    let global = &module.globals[entry.index as usize];
                    let pool = self.globals.len() as u32;
                    self.globals.push(RuntimeGlobal {
                        value: global.value,
                        mutable: global.mutable,
                    });
                    rm.globals.push(pool);
                }
            }
            for entry in &module.memory_index {
                if entry.import {
                    rm.memories.push(INVALID_INDEX);
                } else {
                    let memory = &module.memories[entry.index as usize];
                    let pool = self.memories.len() as u32;
                    self.memories.push(RuntimeMemory::new(memory.limits));
                    rm.memories.push(pool);
                }
            }
            for entry in &module.table_index {
                if entry.import {
                    rm.tables.push(INVALID_INDEX);
                } else {
                    let table = &module.tables[entry.index as usize];
                    let pool = self.tables.len() as u32;
                    self.tables.push(RuntimeTable::new(table.limits));
                    rm.tables.push(pool);
                }
            }
            for export in &module.exports {
                rm.exports
                    .insert(export.name.clone(), (export.index, export.kind));
            }
            tracing::debug!(module = %name, funcs = rm.funcs.len(), "materialized module");
            self.by_name.insert(name.clone(), id);
            self.modules.push(rm);
        }
    }

    // --- phase 3 ---------------------------------------------------------

    fn resolve_imports(&mut self, policy: &LinkingPolicy) -> Result<(), LinkError> {
        for id in 0..self.modules.len() {
            let Some(module) = self.modules[id].module else {
                continue;
            };
            for local in 0..module.func_index.len() {
                if module.func_index[local].import {
                    self.resolve_func(id, local, &mut HashSet::new(), policy)?;
                }
            }
            for local in 0..module.global_index.len() {
                if module.global_index[local].import {
                    self.resolve_global(id, local, &mut HashSet::new(), policy)?;
                }
            }
            for local in 0..module.memory_index.len() {
                if module.memory_index[local].import {
                    self.resolve_memory(id, local, &mut HashSet::new(), policy)?;
                }
            }
            for local in 0..module.table_index.len() {
                if module.table_index[local].import {
                    self.resolve_table(id, local, &mut HashSet::new(), policy)?;
                }
            }
        }
        Ok(())
    }

    fn import_of(module: &Module, kind: ExternalKind, local: usize) -> &crate::parser::module::Import {
        let space = match kind {
            ExternalKind::Func => &module.func_index,
            ExternalKind::Table => &module.table_index,
            ExternalKind::Memory => &module.memory_index,
            ExternalKind::Global => &module.global_index,
        };
        &module.imports[space[local].index as usize]
    }

    /// Locate the source instance and export slot for an import, recording
    /// the visit for cycle detection.
    fn locate_export(
        &self,
        import: &crate::parser::module::Import,
        kind: ExternalKind,
    ) -> Result<Option<(usize, u32)>, LinkError> {
        let src_id = *self.by_name.get(&import.module).ok_or_else(|| {
            LinkError::UnknownModule {
                module: import.module.clone(),
                field: import.field.clone(),
            }
        })?;
        match self.modules[src_id].exports.get(&import.field) {
            Some(&(local, export_kind)) => {
                if export_kind != kind {
                    return Err(LinkError::KindMismatch {
                        module: import.module.clone(),
                        field: import.field.clone(),
                        expected: kind,
                    });
                }
                Ok(Some((src_id, local)))
            }
            None if self.modules[src_id].module.is_none() => Ok(None),
            None => Err(LinkError::UnknownImport {
                module: import.module.clone(),
                field: import.field.clone(),
            }),
        }
    }

    fn func_signature_of(&self, addr: u32) -> &Signature {
        match &self.funcs[addr as usize] {
            FuncInstance::Defined { instance, func } => {
                let module = self.modules[*instance]
                    .module
                    .expect("defined function in a host module");
                &module.types[func.sig_index as usize]
            }
            FuncInstance::Host(host) => &host.sig,
            FuncInstance::PoolHost(index) => &self.host_pool[*index].sig,
        }
    }

    fn resolve_func(
        &mut self,
        id: usize,
        local: usize,
        visited: &mut HashSet<(usize, usize)>,
        policy: &LinkingPolicy,
    ) -> Result<u32, LinkError> {
        let existing = self.modules[id].funcs[local];
        if existing != INVALID_INDEX {
            return Ok(existing);
        }
        let module = self.modules[id].module.expect("unlinked slot in host module");
        let import = Self::import_of(module, ExternalKind::Func, local);
        let sig_index = match import.kind {
            ImportKind::Func { sig_index } => sig_index,
            _ => unreachable!("func index space points at a non-func import"),
        };
        let expected = &module.types[sig_index as usize];

        if !visited.insert((id, local)) {
            return Err(LinkError::ImportCycle {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }

        let addr = match self.locate_export(import, ExternalKind::Func)? {
            Some((src_id, src_local)) => {
                let addr = self.modules[src_id].funcs[src_local as usize];
                if addr != INVALID_INDEX {
                    addr
                } else {
                    self.resolve_func(src_id, src_local as usize, visited, policy)?
                }
            }
            None => {
                // The host module does not provide this name; ask the
                // policy to fill the slot.
                let src_id = self.by_name[&import.module];
                let filler = policy.func.as_ref().ok_or_else(|| LinkError::UnknownImport {
                    module: import.module.clone(),
                    field: import.field.clone(),
                })?;
                let host_func = filler(import, expected).ok_or_else(|| LinkError::PolicyRefused {
                    module: import.module.clone(),
                    field: import.field.clone(),
                })?;
                let pool = self.host_pool.len();
                self.host_pool.push(host_func);
                let addr = self.funcs.len() as u32;
                self.funcs.push(FuncInstance::PoolHost(pool));
                let rm = &mut self.modules[src_id];
                let local_index = rm.funcs.len() as u32;
                rm.funcs.push(addr);
                rm.exports
                    .insert(import.field.clone(), (local_index, ExternalKind::Func));
                addr
            }
        };

        if self.func_signature_of(addr) != expected {
            return Err(LinkError::SignatureMismatch {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }
        self.modules[id].funcs[local] = addr;
        Ok(addr)
    }

    fn resolve_global(
        &mut self,
        id: usize,
        local: usize,
        visited: &mut HashSet<(usize, usize)>,
        policy: &LinkingPolicy,
    ) -> Result<u32, LinkError> {
        let existing = self.modules[id].globals[local];
        if existing != INVALID_INDEX {
            return Ok(existing);
        }
        let module = self.modules[id].module.expect("unlinked slot in host module");
        let import = Self::import_of(module, ExternalKind::Global, local);
        let (expected_type, mutable) = match import.kind {
            ImportKind::Global {
                value_type,
                mutable,
            } => (value_type, mutable),
            _ => unreachable!("global index space points at a non-global import"),
        };
        if mutable {
            return Err(LinkError::MutableGlobalImport {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }
        if !visited.insert((id, local)) {
            return Err(LinkError::ImportCycle {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }

        let pool = match self.locate_export(import, ExternalKind::Global)? {
            Some((src_id, src_local)) => {
                let pool = self.modules[src_id].globals[src_local as usize];
                if pool != INVALID_INDEX {
                    pool
                } else {
                    self.resolve_global(src_id, src_local as usize, visited, policy)?
                }
            }
            None => {
                let src_id = self.by_name[&import.module];
                let filler = policy.global.as_ref().ok_or_else(|| LinkError::UnknownImport {
                    module: import.module.clone(),
                    field: import.field.clone(),
                })?;
                let global = filler(import).ok_or_else(|| LinkError::PolicyRefused {
                    module: import.module.clone(),
                    field: import.field.clone(),
                })?;
                let pool = self.globals.len() as u32;
                self.globals.push(global);
                let rm = &mut self.modules[src_id];
                let local_index = rm.globals.len() as u32;
                rm.globals.push(pool);
                rm.exports
                    .insert(import.field.clone(), (local_index, ExternalKind::Global));
                pool
            }
        };

        if self.globals[pool as usize].value.value_type != expected_type {
            return Err(LinkError::GlobalTypeMismatch {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }
        self.modules[id].globals[local] = pool;
        Ok(pool)
    }

    fn resolve_memory(
        &mut self,
        id: usize,
        local: usize,
        visited: &mut HashSet<(usize, usize)>,
        policy: &LinkingPolicy,
    ) -> Result<u32, LinkError> {
        let existing = self.modules[id].memories[local];
        if existing != INVALID_INDEX {
            return Ok(existing);
        }
        let module = self.modules[id].module.expect("unlinked slot in host module");
        let import = Self::import_of(module, ExternalKind::Memory, local);
        let limits = match import.kind {
            ImportKind::Memory { limits } => limits,
            _ => unreachable!("memory index space points at a non-memory import"),
        };
        if !visited.insert((id, local)) {
            return Err(LinkError::ImportCycle {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }

        let pool = match self.locate_export(import, ExternalKind::Memory)? {
            Some((src_id, src_local)) => {
                let pool = self.modules[src_id].memories[src_local as usize];
                if pool != INVALID_INDEX {
                    pool
                } else {
                    self.resolve_memory(src_id, src_local as usize, visited, policy)?
                }
            }
            None => {
                let src_id = self.by_name[&import.module];
                let filler = policy.memory.as_ref().ok_or_else(|| LinkError::UnknownImport {
                    module: import.module.clone(),
                    field: import.field.clone(),
                })?;
                let mut memory = RuntimeMemory::new(limits);
                if !filler(import, &mut memory) {
                    return Err(LinkError::PolicyRefused {
                        module: import.module.clone(),
                        field: import.field.clone(),
                    });
                }
                let pool = self.memories.len() as u32;
                self.memories.push(memory);
                let rm = &mut self.modules[src_id];
                let local_index = rm.memories.len() as u32;
                rm.memories.push(pool);
                rm.exports
                    .insert(import.field.clone(), (local_index, ExternalKind::Memory));
                pool
            }
        };

        // The importer's initial size is a minimum: raise the provider when
        // it declared a smaller one.
        self.memories[pool as usize].ensure_pages(limits.initial);
        self.modules[id].memories[local] = pool;
        Ok(pool)
    }

    fn resolve_table(
        &mut self,
        id: usize,
        local: usize,
        visited: &mut HashSet<(usize, usize)>,
        policy: &LinkingPolicy,
    ) -> Result<u32, LinkError> {
        let existing = self.modules[id].tables[local];
        if existing != INVALID_INDEX {
            return Ok(existing);
        }
        let module = self.modules[id].module.expect("unlinked slot in host module");
        let import = Self::import_of(module, ExternalKind::Table, local);
        let limits = match import.kind {
            ImportKind::Table { limits } => limits,
            _ => unreachable!("table index space points at a non-table import"),
        };
        if !visited.insert((id, local)) {
            return Err(LinkError::ImportCycle {
                module: import.module.clone(),
                field: import.field.clone(),
            });
        }

        let pool = match self.locate_export(import, ExternalKind::Table)? {
            Some((src_id, src_local)) => {
                let pool = self.modules[src_id].tables[src_local as usize];
                if pool != INVALID_INDEX {
                    pool
                } else {
                    self.resolve_table(src_id, src_local as usize, visited, policy)?
                }
            }
            None => {
                let src_id = self.by_name[&import.module];
                let filler = policy.table.as_ref().ok_or_else(|| LinkError::UnknownImport {
                    module: import.module.clone(),
                    field: import.field.clone(),
                })?;
                let mut table = RuntimeTable::new(limits);
                if !filler(import, &mut table) {
                    return Err(LinkError::PolicyRefused {
                        module: import.module.clone(),
                        field: import.field.clone(),
                    });
                }
                let pool = self.tables.len() as u32;
                self.tables.push(table);
                let rm = &mut self.modules[src_id];
                let local_index = rm.tables.len() as u32;
                rm.tables.push(pool);
                rm.exports
                    .insert(import.field.clone(), (local_index, ExternalKind::Table));
                pool
            }
        };

        self.tables[pool as usize].ensure_size(limits.initial);
        self.modules[id].tables[local] = pool;
        Ok(pool)
    }

    // --- phase 4 ---------------------------------------------------------

    fn initialize_segments(&mut self, policy: &LinkingPolicy) -> Result<(), LinkError> {
        for id in 0..self.modules.len() {
            let Some(module) = self.modules[id].module else {
                continue;
            };
            for (i, segment) in module.data.iter().enumerate() {
                let pool = self.modules[id].memories[segment.memory as usize] as usize;
                self.memories[pool]
                    .init_data(segment.offset, &segment.bytes)
                    .map_err(|_| LinkError::DataSegmentOutOfBounds {
                        module: module.name.clone(),
                        segment: i,
                    })?;
            }
            for (i, segment) in module.elements.iter().enumerate() {
                let pool = self.modules[id].tables[segment.table as usize] as usize;
                let end = segment.offset as usize + segment.funcs.len();
                if end > self.tables[pool].entries.len() {
                    return Err(LinkError::ElemSegmentOutOfBounds {
                        module: module.name.clone(),
                        segment: i,
                    });
                }
                for (k, func_local) in segment.funcs.iter().enumerate() {
                    let addr = self.modules[id].funcs[*func_local as usize];
                    self.tables[pool].entries[segment.offset as usize + k] = addr;
                }
            }
        }

        // Host-owned memories and tables are handed to the policy's init
        // callbacks.
        for id in 0..self.modules.len() {
            if self.modules[id].module.is_some() {
                continue;
            }
            let name = self.modules[id].name.clone();
            let exports: Vec<(String, u32, ExternalKind)> = self.modules[id]
                .exports
                .iter()
                .map(|(field, &(local, kind))| (field.clone(), local, kind))
                .collect();
            for (field, local, kind) in exports {
                match kind {
                    ExternalKind::Memory => {
                        if let Some(init) = &policy.memory_init {
                            let pool = self.modules[id].memories[local as usize] as usize;
                            init(&name, &field, &mut self.memories[pool]);
                        }
                    }
                    ExternalKind::Table => {
                        if let Some(init) = &policy.table_init {
                            let pool = self.modules[id].tables[local as usize] as usize;
                            init(&name, &field, &mut self.tables[pool]);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    // --- call surface ----------------------------------------------------

    pub fn environment(&self) -> &'env Environment {
        self.env
    }

    /// Handle to an exported function, host exports included.
    pub fn get_export_func(&self, module: &str, name: &str) -> Option<FuncHandle> {
        let id = *self.by_name.get(module)?;
        let &(local, kind) = self.modules[id].exports.get(name)?;
        if kind != ExternalKind::Func {
            return None;
        }
        let addr = *self.modules[id].funcs.get(local as usize)?;
        if addr == INVALID_INDEX {
            return None;
        }
        Some(FuncHandle { addr })
    }

    /// Handle to a module's start function, if it declares one.
    pub fn start_func(&self, module: &str) -> Option<FuncHandle> {
        let id = *self.by_name.get(module)?;
        let start = self.modules[id].module?.start?;
        let addr = *self.modules[id].funcs.get(start as usize)?;
        if addr == INVALID_INDEX {
            return None;
        }
        Some(FuncHandle { addr })
    }

    pub fn func_signature(&self, func: FuncHandle) -> &Signature {
        self.func_signature_of(func.addr)
    }

    pub fn get_global(&self, module: &str, name: &str) -> Option<TypedValue> {
        let id = *self.by_name.get(module)?;
        let &(local, kind) = self.modules[id].exports.get(name)?;
        if kind != ExternalKind::Global {
            return None;
        }
        let pool = *self.modules[id].globals.get(local as usize)?;
        Some(self.globals[pool as usize].value)
    }

    /// Write an exported mutable global. Returns false for unknown names,
    /// non-global exports and immutable globals.
    pub fn set_global(&mut self, module: &str, name: &str, value: Value) -> bool {
        let Some(&id) = self.by_name.get(module) else {
            return false;
        };
        let Some(&(local, kind)) = self.modules[id].exports.get(name) else {
            return false;
        };
        if kind != ExternalKind::Global {
            return false;
        }
        let Some(&pool) = self.modules[id].globals.get(local as usize) else {
            return false;
        };
        let global = &mut self.globals[pool as usize];
        if !global.mutable {
            return false;
        }
        global.value.value = value;
        true
    }

    /// Call an exported function. On a trap the stack trace is pushed to
    /// the error sink and false is returned; on success `values` holds the
    /// results.
    pub fn call(&mut self, func: FuncHandle, values: &mut Vec<TypedValue>) -> bool {
        match self.call_inner(func, values, false) {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    /// Trap-silent call variant: no error-stream emission, the outcome is
    /// returned instead.
    pub fn call_safe(&mut self, func: FuncHandle, values: &mut Vec<TypedValue>) -> ThreadResult {
        self.call_inner(func, values, true)
    }

    fn call_inner(
        &mut self,
        func: FuncHandle,
        values: &mut Vec<TypedValue>,
        silent: bool,
    ) -> ThreadResult {
        let sig = self.func_signature_of(func.addr).clone();
        if values.len() != sig.params.len()
            || values
                .iter()
                .zip(&sig.params)
                .any(|(v, p)| v.value_type != *p)
        {
            if !silent {
                self.env.report("Thread", "argument type mismatch");
            }
            return Err(Trap::ArgumentTypeMismatch);
        }

        match self.funcs[func.addr as usize] {
            FuncInstance::Defined { instance, func } => {
                let mut thread = self
                    .thread
                    .take()
                    .unwrap_or_else(|| Thread::new(Thread::DEFAULT_VALUE_STACK_SIZE, Thread::DEFAULT_CALL_STACK_SIZE));
                let result = thread.run(self, instance, func, &sig, values);
                if let Err(trap) = result {
                    if !silent {
                        let trace = trace::render_stack_trace(&thread, self, 64, 8);
                        self.env
                            .report("Thread", &format!("trap: {}\n{}", trap, trace));
                    }
                }
                // Stacks are reset to empty after every call chain.
                thread.reset();
                self.thread = Some(thread);
                result
            }
            FuncInstance::Host(host) => Self::call_host_direct(host, &sig, values),
            FuncInstance::PoolHost(index) => {
                Self::call_host_direct(&self.host_pool[index], &sig, values)
            }
        }
    }

    fn call_host_direct(
        host: &HostFunc,
        sig: &Signature,
        values: &mut Vec<TypedValue>,
    ) -> ThreadResult {
        let results = (host.callback)(host, values).map_err(|_| Trap::HostTrapped)?;
        if results.len() != sig.results.len()
            || results
                .iter()
                .zip(&sig.results)
                .any(|(r, t)| r.value_type != *t)
        {
            return Err(Trap::HostResultTypeMismatch);
        }
        values.clear();
        values.extend(results);
        Ok(())
    }
}
