//! Stack-trace rendering for trapped calls.
//!
//! Each frame prints the instance name, the resolved function name
//! (exports first, then the `name` section, then the import metadata),
//! every local with its type, raw bits and decimal value, and a window of
//! lowered opcodes leading up to the current opcode pointer.

use crate::parser::module::{Func, Module, ValueType};
use crate::runtime::link::Runtime;
use crate::runtime::thread::Thread;
use crate::runtime::value::{TypedValue, Value};
use fhex::ToHex;
use std::fmt::Write;

/// Render the thread's call stack, innermost frame first. `max_unwind`
/// bounds the frame count, `max_opcodes` the opcode window per frame.
pub fn render_stack_trace(
    thread: &Thread<'_>,
    rt: &Runtime<'_>,
    max_unwind: usize,
    max_opcodes: usize,
) -> String {
    let mut out = String::new();
    for (depth, frame) in thread.frames().iter().rev().take(max_unwind).enumerate() {
        let instance = &rt.modules[frame.instance];
        let func_name = instance
            .module
            .and_then(|m| resolve_func_name(m, frame.func))
            .unwrap_or("?");
        let _ = writeln!(out, "#{} {}!{}", depth, instance.name, func_name);

        for (i, t) in frame.func.types.iter().enumerate() {
            if let Some(value) = thread.value(frame.base + i) {
                let _ = writeln!(out, "  local[{}] {} = {}", i, t, render_value(*t, value));
            }
        }

        let first = frame.pc.saturating_sub(max_opcodes);
        for pc in first..frame.pc.min(frame.func.opcodes.len()) {
            let rec = frame.func.opcodes[pc];
            let _ = writeln!(out, "  {:6}: {:?}", pc, rec);
        }
    }
    out
}

fn resolve_func_name<'m>(module: &'m Module, func: &Func) -> Option<&'m str> {
    let defined_index = module
        .funcs
        .iter()
        .position(|candidate| std::ptr::eq(candidate, func))?;
    let local = module
        .func_index
        .iter()
        .position(|entry| !entry.import && entry.index as usize == defined_index)?;
    module.func_name(local as u32)
}

fn render_value(t: ValueType, value: Value) -> String {
    match t {
        ValueType::I32 => format!("0x{:08x} {}", value.as_u32(), value.as_i32()),
        ValueType::I64 => format!("0x{:016x} {}", value.as_u64(), value.as_i64()),
        ValueType::F32 => format!(
            "0x{:08x} {}",
            value.f32_bits(),
            value.as_f32().to_hex()
        ),
        ValueType::F64 => format!(
            "0x{:016x} {}",
            value.f64_bits(),
            value.as_f64().to_hex()
        ),
        _ => format!("{}", TypedValue::new(t, value)),
    }
}
