//! A WebAssembly 1.0 interpreter written in Rust.
//!
//! wazm loads binary modules, links them against host-provided imports and
//! other modules, validates their code, and executes exported functions
//! against shared linear memory, tables and globals.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder. Reads `.wasm` bytes into a
//!   [`parser::module::Module`], type checking and lowering every function
//!   body in the same pass.
//! - [`runtime`] -- The [`runtime::Environment`] registry, the
//!   [`runtime::Runtime`] linker, and the [`runtime::Thread`] interpreter.
//!
//! # Example
//!
//! Load a module, link it, and call an exported function:
//!
//! ```no_run
//! use wazm::runtime::{Environment, LinkingThreadOptions, Runtime, TypedValue};
//!
//! let bytes = std::fs::read("add.wasm").unwrap();
//! let mut env = Environment::new();
//! env.load_module("add", &bytes).unwrap();
//!
//! let mut runtime = Runtime::init(&env, LinkingThreadOptions::default()).unwrap();
//! let add = runtime.get_export_func("add", "add").unwrap();
//! let mut values = vec![TypedValue::i32(2), TypedValue::i32(3)];
//! assert!(runtime.call(add, &mut values));
//! assert_eq!(values[0].value.as_i32(), 5);
//! ```
//!
//! # Specification
//!
//! Targets the [WebAssembly 1.0 specification](https://webassembly.github.io/spec/core/)
//! plus the sign-extension and saturating-conversion opcodes and the atomic
//! opcode surface (single-threaded semantics; `wait`/`wake` trap).

pub mod parser;
pub mod runtime;
