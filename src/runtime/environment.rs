//! Registry of loaded modules and host-provided modules.
//!
//! The [`Environment`] owns every parsed [`Module`] and every
//! [`HostModule`]. It is populated up front; a
//! [`crate::runtime::link::Runtime`] then links the whole set into runnable
//! instances. An `env` host module is always present.

use crate::parser::module::{Module, Signature, ValueType};
use crate::parser::{self, LoadError, ReadOptions};
use crate::runtime::value::TypedValue;
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum depth for chasing re-exported globals while evaluating
/// init-expressions.
const MAX_GLOBAL_RESOLVE_DEPTH: u32 = 16;

/// Error signalled by a host function; translated to
/// [`crate::runtime::Trap::HostTrapped`] by the interpreter.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// Host function callback. Receives the call arguments and returns the
/// results, which the interpreter validates against the declared signature.
pub type HostCallback =
    Box<dyn Fn(&HostFunc, &[TypedValue]) -> Result<Vec<TypedValue>, HostError>>;

pub struct HostFunc {
    pub name: String,
    pub sig: Signature,
    pub callback: HostCallback,
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostFunc {{ name: {:?}, sig: {} }}", self.name, self.sig)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HostGlobal {
    pub value: TypedValue,
    pub mutable: bool,
}

/// A module provided by the embedder: named functions and globals.
#[derive(Default)]
pub struct HostModule {
    pub(crate) funcs: BTreeMap<String, HostFunc>,
    pub(crate) globals: BTreeMap<String, HostGlobal>,
}

impl HostModule {
    pub fn add_func(
        &mut self,
        name: &str,
        params: Vec<ValueType>,
        results: Vec<ValueType>,
        callback: HostCallback,
    ) {
        self.funcs.insert(
            name.to_string(),
            HostFunc {
                name: name.to_string(),
                sig: Signature::new(params, results),
                callback,
            },
        );
    }

    pub fn add_global(&mut self, name: &str, value: TypedValue, mutable: bool) {
        self.globals
            .insert(name.to_string(), HostGlobal { value, mutable });
    }
}

/// Sink for tagged diagnostics (`"Reader"`, `"Runtime"`, `"Thread"`).
pub type ErrorSink = Box<dyn Fn(&str, &str)>;

pub struct Environment {
    modules: BTreeMap<String, Module>,
    host_modules: BTreeMap<String, HostModule>,
    sink: ErrorSink,
}

impl Default for Environment {
    fn default() -> Environment {
        Environment::new()
    }
}

impl Environment {
    pub fn new() -> Environment {
        let mut host_modules = BTreeMap::new();
        host_modules.insert("env".to_string(), HostModule::default());
        Environment {
            modules: BTreeMap::new(),
            host_modules,
            sink: Box::new(|tag, message| {
                tracing::error!(target: "wazm", "{}: {}", tag, message);
            }),
        }
    }

    /// Replace the error sink. Diagnostics carry a tag identifying the
    /// producer and a free-form message.
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.sink = sink;
    }

    pub(crate) fn report(&self, tag: &str, message: &str) {
        (self.sink)(tag, message);
    }

    /// Parse `bytes` and register the module under `name`.
    pub fn load_module(&mut self, name: &str, bytes: &[u8]) -> Result<&Module, LoadError> {
        self.load_module_with(name, bytes, &ReadOptions::default())
    }

    pub fn load_module_with(
        &mut self,
        name: &str,
        bytes: &[u8],
        options: &ReadOptions,
    ) -> Result<&Module, LoadError> {
        let module = parser::parse(&*self, name, bytes, options)?;
        self.modules.insert(name.to_string(), module);
        Ok(&self.modules[name])
    }

    /// Create (or fetch) a host module under `name`.
    pub fn make_host_module(&mut self, name: &str) -> &mut HostModule {
        self.host_modules.entry(name.to_string()).or_default()
    }

    /// The always-present `env` host module.
    pub fn env_module(&mut self) -> &mut HostModule {
        self.make_host_module("env")
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn host_module(&self, name: &str) -> Option<&HostModule> {
        self.host_modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&String, &Module)> {
        self.modules.iter()
    }

    pub fn host_modules(&self) -> impl Iterator<Item = (&String, &HostModule)> {
        self.host_modules.iter()
    }

    /// Resolve the value of an exported global, following re-exported
    /// imports up to a fixed depth. Used by the reader when evaluating
    /// `get_global` init-expressions.
    pub fn get_global_value(&self, module: &str, field: &str) -> Option<TypedValue> {
        self.get_global_value_at(module, field, MAX_GLOBAL_RESOLVE_DEPTH)
    }

    fn get_global_value_at(&self, module: &str, field: &str, depth: u32) -> Option<TypedValue> {
        if depth == 0 {
            return None;
        }
        if let Some(host) = self.host_modules.get(module) {
            return host.globals.get(field).map(|g| g.value);
        }
        let module = self.modules.get(module)?;
        let export = module.export(field)?;
        if export.kind != crate::parser::module::ExternalKind::Global {
            return None;
        }
        let entry = module.global_index.get(export.index as usize)?;
        if entry.import {
            let import = module.imports.get(entry.index as usize)?;
            self.get_global_value_at(&import.module, &import.field, depth - 1)
        } else {
            module
                .globals
                .get(entry.index as usize)
                .map(|global| global.value)
        }
    }
}
