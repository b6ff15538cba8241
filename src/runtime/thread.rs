//! The interpreter: a value-stack + call-stack machine over lowered opcode
//! streams.
//!
//! Both stacks are preallocated; overflowing either is a trap
//! (`ValueStackExhausted` / `CallStackExhausted`), not an allocation.
//! Branches carry pre-resolved opcode indices, so control flow reduces to
//! assignments of the opcode pointer; the `End` records at branch targets
//! perform the drop-keep label unwind.

use crate::parser::module::Func;
use crate::parser::opcode::{Opcode, OpcodeRec, INVALID_INDEX};
use crate::runtime::environment::HostFunc;
use crate::runtime::link::{FuncInstance, Runtime};
use crate::runtime::numeric::{self, f32b, f64b};
use crate::runtime::value::{TypedValue, Value};
use crate::runtime::Trap;
use crate::parser::module::Signature;

/// One frame of the call stack.
#[derive(Clone, Copy)]
pub(crate) struct Frame<'env> {
    pub instance: usize,
    pub func: &'env Func,
    /// Value-stack position of the frame's first local (parameters first).
    pub base: usize,
    pub pc: usize,
}

pub struct Thread<'env> {
    values: Vec<Value>,
    top: usize,
    frames: Vec<Frame<'env>>,
    max_frames: usize,
}

macro_rules! binop {
    ($self:ident, $pop:ident, $push:ident, $f:expr) => {{
        let b = $self.$pop();
        let a = $self.$pop();
        $self.$push(($f)(a, b))?;
    }};
}

macro_rules! trapping_binop {
    ($self:ident, $pop:ident, $push:ident, $f:expr) => {{
        let b = $self.$pop();
        let a = $self.$pop();
        $self.$push(($f)(a, b)?)?;
    }};
}

macro_rules! cmp {
    ($self:ident, $pop:ident, $f:expr) => {{
        let b = $self.$pop();
        let a = $self.$pop();
        $self.push_u32(($f)(a, b) as u32)?;
    }};
}

macro_rules! unop {
    ($self:ident, $pop:ident, $push:ident, $f:expr) => {{
        let v = $self.$pop();
        $self.$push(($f)(v))?;
    }};
}

// i{32,64}.{div,rem}_{s,u} trap semantics.

fn i32_div_s(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    if a == i32::MIN && b == -1 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(a.wrapping_div(b))
}

fn i32_rem_s(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    // MIN % -1 is 0, not an overflow.
    Ok(a.wrapping_rem(b))
}

fn u32_div(a: u32, b: u32) -> Result<u32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a / b)
}

fn u32_rem(a: u32, b: u32) -> Result<u32, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a % b)
}

fn i64_div_s(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    if a == i64::MIN && b == -1 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(a.wrapping_div(b))
}

fn i64_rem_s(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a.wrapping_rem(b))
}

fn u64_div(a: u64, b: u64) -> Result<u64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a / b)
}

fn u64_rem(a: u64, b: u64) -> Result<u64, Trap> {
    if b == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(a % b)
}

impl<'env> Thread<'env> {
    pub const DEFAULT_VALUE_STACK_SIZE: usize = 1024;
    pub const DEFAULT_CALL_STACK_SIZE: usize = 256;

    pub fn new(value_stack_size: usize, call_stack_size: usize) -> Thread<'env> {
        Thread {
            values: vec![Value::default(); value_stack_size],
            top: 0,
            frames: Vec::with_capacity(call_stack_size),
            max_frames: call_stack_size,
        }
    }

    pub fn reset(&mut self) {
        self.top = 0;
        self.frames.clear();
    }

    pub fn stack_depth(&self) -> usize {
        self.top
    }

    pub(crate) fn frames(&self) -> &[Frame<'env>] {
        &self.frames
    }

    pub(crate) fn value(&self, index: usize) -> Option<Value> {
        if index < self.top {
            Some(self.values[index])
        } else {
            None
        }
    }

    /// Run `func` against its instance. `values` holds the arguments on
    /// entry and the results on a successful return.
    pub fn run(
        &mut self,
        rt: &mut Runtime<'env>,
        instance: usize,
        func: &'env Func,
        sig: &Signature,
        values: &mut Vec<TypedValue>,
    ) -> Result<(), Trap> {
        self.reset();
        for value in values.iter() {
            self.push(value.value)?;
        }
        self.push_frame(instance, func)?;
        self.exec(rt)?;
        values.clear();
        for (i, t) in sig.results.iter().enumerate() {
            values.push(TypedValue::new(*t, self.values[i]));
        }
        Ok(())
    }

    // --- stack primitives -------------------------------------------------

    #[inline]
    fn push(&mut self, value: Value) -> Result<(), Trap> {
        if self.top == self.values.len() {
            return Err(Trap::ValueStackExhausted);
        }
        self.values[self.top] = value;
        self.top += 1;
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> Value {
        debug_assert!(self.top > 0);
        self.top -= 1;
        self.values[self.top]
    }

    #[inline]
    fn top_value(&self) -> Value {
        debug_assert!(self.top > 0);
        self.values[self.top - 1]
    }

    #[inline]
    fn pop_u32(&mut self) -> u32 {
        self.pop().as_u32()
    }

    #[inline]
    fn pop_i32(&mut self) -> i32 {
        self.pop().as_i32()
    }

    #[inline]
    fn pop_u64(&mut self) -> u64 {
        self.pop().as_u64()
    }

    #[inline]
    fn pop_i64(&mut self) -> i64 {
        self.pop().as_i64()
    }

    #[inline]
    fn pop_f32_bits(&mut self) -> u32 {
        self.pop().f32_bits()
    }

    #[inline]
    fn pop_f64_bits(&mut self) -> u64 {
        self.pop().f64_bits()
    }

    #[inline]
    fn push_u32(&mut self, v: u32) -> Result<(), Trap> {
        self.push(Value::from_u32(v))
    }

    #[inline]
    fn push_i32(&mut self, v: i32) -> Result<(), Trap> {
        self.push(Value::from_i32(v))
    }

    #[inline]
    fn push_u64(&mut self, v: u64) -> Result<(), Trap> {
        self.push(Value::from_u64(v))
    }

    #[inline]
    fn push_i64(&mut self, v: i64) -> Result<(), Trap> {
        self.push(Value::from_i64(v))
    }

    #[inline]
    fn push_f32_bits(&mut self, bits: u32) -> Result<(), Trap> {
        self.push(Value::from_f32_bits(bits))
    }

    #[inline]
    fn push_f64_bits(&mut self, bits: u64) -> Result<(), Trap> {
        self.push(Value::from_f64_bits(bits))
    }

    // --- frames -----------------------------------------------------------

    fn push_frame(&mut self, instance: usize, func: &'env Func) -> Result<(), Trap> {
        if self.frames.len() == self.max_frames {
            return Err(Trap::CallStackExhausted);
        }
        let params = func.param_count as usize;
        debug_assert!(self.top >= params);
        let base = self.top - params;
        self.frames.push(Frame {
            instance,
            func,
            base,
            pc: 0,
        });
        // Declared locals beyond the parameters start out zero.
        for _ in params..func.types.len() {
            self.push(Value::default())?;
        }
        Ok(())
    }

    fn call_function(
        &mut self,
        rt: &Runtime<'env>,
        frame: &mut Frame<'env>,
        addr: u32,
    ) -> Result<(), Trap> {
        match rt.funcs[addr as usize] {
            FuncInstance::Defined { instance, func } => {
                let current = self.frames.len() - 1;
                self.frames[current] = *frame;
                self.push_frame(instance, func)?;
                *frame = self.frames[self.frames.len() - 1];
                Ok(())
            }
            FuncInstance::Host(host) => self.call_host(host),
            FuncInstance::PoolHost(index) => {
                let host = &rt.host_pool[index];
                self.call_host(host)
            }
        }
    }

    /// Host call protocol: arguments are copied out of the value stack,
    /// the callback runs synchronously, and its results are validated
    /// against the declared signature before being pushed back.
    fn call_host(&mut self, host: &HostFunc) -> Result<(), Trap> {
        let params = host.sig.params.len();
        debug_assert!(self.top >= params);
        let base = self.top - params;
        let mut args = Vec::with_capacity(params);
        for (i, t) in host.sig.params.iter().enumerate() {
            args.push(TypedValue::new(*t, self.values[base + i]));
        }
        self.top = base;
        let results = (host.callback)(host, &args).map_err(|_| Trap::HostTrapped)?;
        if results.len() != host.sig.results.len() {
            return Err(Trap::HostResultTypeMismatch);
        }
        for (result, expected) in results.iter().zip(&host.sig.results) {
            if result.value_type != *expected {
                return Err(Trap::HostResultTypeMismatch);
            }
            self.push(result.value)?;
        }
        Ok(())
    }

    // --- memory helpers ---------------------------------------------------

    #[inline]
    fn mem_pool(rt: &Runtime<'env>, frame: &Frame<'env>) -> usize {
        rt.modules[frame.instance].memories[0] as usize
    }

    #[inline]
    fn effective_addr(&mut self, rec: OpcodeRec) -> u64 {
        self.pop_u32() as u64 + rec.v1() as u64
    }

    #[inline]
    fn atomic_addr(&mut self, rec: OpcodeRec) -> Result<u64, Trap> {
        let addr = self.effective_addr(rec);
        let natural = rec.opcode.memory_size() as u64;
        if addr % natural != 0 {
            return Err(Trap::AtomicMemoryAccessUnaligned);
        }
        Ok(addr)
    }

    fn atomic_rmw32(
        &mut self,
        rt: &mut Runtime<'env>,
        frame: &Frame<'env>,
        rec: OpcodeRec,
        op: fn(u32, u32) -> u32,
    ) -> Result<(), Trap> {
        let operand = self.pop_u32();
        let addr = self.atomic_addr(rec)?;
        let pool = Self::mem_pool(rt, frame);
        let memory = &mut rt.memories[pool];
        let old = match rec.opcode.memory_size() {
            1 => {
                let old = memory.read_u8(addr)? as u32;
                memory.write_u8(addr, op(old, operand) as u8)?;
                old
            }
            2 => {
                let old = memory.read_u16(addr)? as u32;
                memory.write_u16(addr, op(old, operand) as u16)?;
                old
            }
            _ => {
                let old = memory.read_u32(addr)?;
                memory.write_u32(addr, op(old, operand))?;
                old
            }
        };
        self.push_u32(old)
    }

    fn atomic_rmw64(
        &mut self,
        rt: &mut Runtime<'env>,
        frame: &Frame<'env>,
        rec: OpcodeRec,
        op: fn(u64, u64) -> u64,
    ) -> Result<(), Trap> {
        let operand = self.pop_u64();
        let addr = self.atomic_addr(rec)?;
        let pool = Self::mem_pool(rt, frame);
        let memory = &mut rt.memories[pool];
        let old = match rec.opcode.memory_size() {
            1 => {
                let old = memory.read_u8(addr)? as u64;
                memory.write_u8(addr, op(old, operand) as u8)?;
                old
            }
            2 => {
                let old = memory.read_u16(addr)? as u64;
                memory.write_u16(addr, op(old, operand) as u16)?;
                old
            }
            4 => {
                let old = memory.read_u32(addr)? as u64;
                memory.write_u32(addr, op(old, operand) as u32)?;
                old
            }
            _ => {
                let old = memory.read_u64(addr)?;
                memory.write_u64(addr, op(old, operand))?;
                old
            }
        };
        self.push_u64(old)
    }

    fn atomic_cmpxchg32(
        &mut self,
        rt: &mut Runtime<'env>,
        frame: &Frame<'env>,
        rec: OpcodeRec,
    ) -> Result<(), Trap> {
        let replacement = self.pop_u32();
        let expected = self.pop_u32();
        let addr = self.atomic_addr(rec)?;
        let pool = Self::mem_pool(rt, frame);
        let memory = &mut rt.memories[pool];
        let old = match rec.opcode.memory_size() {
            1 => {
                let old = memory.read_u8(addr)? as u32;
                if old == expected {
                    memory.write_u8(addr, replacement as u8)?;
                }
                old
            }
            2 => {
                let old = memory.read_u16(addr)? as u32;
                if old == expected {
                    memory.write_u16(addr, replacement as u16)?;
                }
                old
            }
            _ => {
                let old = memory.read_u32(addr)?;
                if old == expected {
                    memory.write_u32(addr, replacement)?;
                }
                old
            }
        };
        self.push_u32(old)
    }

    fn atomic_cmpxchg64(
        &mut self,
        rt: &mut Runtime<'env>,
        frame: &Frame<'env>,
        rec: OpcodeRec,
    ) -> Result<(), Trap> {
        let replacement = self.pop_u64();
        let expected = self.pop_u64();
        let addr = self.atomic_addr(rec)?;
        let pool = Self::mem_pool(rt, frame);
        let memory = &mut rt.memories[pool];
        let old = match rec.opcode.memory_size() {
            1 => {
                let old = memory.read_u8(addr)? as u64;
                if old == expected {
                    memory.write_u8(addr, replacement as u8)?;
                }
                old
            }
            2 => {
                let old = memory.read_u16(addr)? as u64;
                if old == expected {
                    memory.write_u16(addr, replacement as u16)?;
                }
                old
            }
            4 => {
                let old = memory.read_u32(addr)? as u64;
                if old == expected {
                    memory.write_u32(addr, replacement as u32)?;
                }
                old
            }
            _ => {
                let old = memory.read_u64(addr)?;
                if old == expected {
                    memory.write_u64(addr, replacement)?;
                }
                old
            }
        };
        self.push_u64(old)
    }

    // --- the dispatch loop ------------------------------------------------

    fn exec(&mut self, rt: &mut Runtime<'env>) -> Result<(), Trap> {
        let mut frame = self.frames[self.frames.len() - 1];
        let result = self.dispatch(rt, &mut frame);
        if result.is_err() {
            // Keep the trapping frame's opcode pointer visible for the
            // stack-trace printer.
            if let Some(top) = self.frames.last_mut() {
                *top = frame;
            }
        }
        result
    }

    fn dispatch(&mut self, rt: &mut Runtime<'env>, frame: &mut Frame<'env>) -> Result<(), Trap> {
        use Opcode::*;

        loop {
            let rec = frame.func.opcodes[frame.pc];
            frame.pc += 1;

            match rec.opcode {
                // -- control --
                Unreachable => return Err(Trap::Unreachable),
                If => {
                    if self.pop_u32() == 0 {
                        frame.pc = rec.v1() as usize;
                    }
                }
                Else | Br => {
                    frame.pc = rec.v1() as usize;
                }
                BrIf => {
                    if self.pop_u32() != 0 {
                        frame.pc = rec.v1() as usize;
                    }
                }
                BrTable => {
                    let count = rec.v1();
                    let key = self.pop_u32();
                    let index = key.min(count);
                    let entry = frame.func.opcodes[frame.pc + index as usize];
                    frame.pc = entry.v1() as usize;
                }
                End => {
                    // Label unwind: drop everything above the label's entry
                    // height, keeping the top result values.
                    let stack_base =
                        frame.base + frame.func.types.len() + rec.v1() as usize;
                    let keep = rec.v2() as usize;
                    for i in 0..keep {
                        self.values[stack_base + i] = self.values[self.top - keep + i];
                    }
                    self.top = stack_base + keep;
                }
                Return => {
                    let results = rec.v1() as usize;
                    let base = frame.base;
                    for i in 0..results {
                        self.values[base + i] = self.values[self.top - results + i];
                    }
                    self.top = base + results;
                    self.frames.pop();
                    match self.frames.last() {
                        Some(caller) => *frame = *caller,
                        None => return Ok(()),
                    }
                }
                Call => {
                    let addr = rt.modules[frame.instance].funcs[rec.v1() as usize];
                    self.call_function(rt, frame, addr)?;
                }
                CallIndirect => {
                    let key = self.pop_u32();
                    let module = &rt.modules[frame.instance];
                    let table = &rt.tables[module.tables[rec.v2() as usize] as usize];
                    let addr = *table
                        .entries
                        .get(key as usize)
                        .ok_or(Trap::UndefinedTableIndex)?;
                    if addr == INVALID_INDEX {
                        return Err(Trap::UninitializedTableElement);
                    }
                    let expected = &module
                        .module
                        .expect("call_indirect outside a wasm module")
                        .types[rec.v1() as usize];
                    if rt.func_signature(crate::runtime::link::FuncHandle { addr }) != expected {
                        return Err(Trap::IndirectCallSignatureMismatch);
                    }
                    self.call_function(rt, frame, addr)?;
                }

                // -- parametric --
                Drop => {
                    self.pop();
                }
                Select => {
                    let cond = self.pop_u32();
                    let false_value = self.pop();
                    let true_value = self.pop();
                    self.push(if cond != 0 { true_value } else { false_value })?;
                }

                // -- variables --
                GetLocal => {
                    let value = self.values[frame.base + rec.v1() as usize];
                    self.push(value)?;
                }
                SetLocal => {
                    let value = self.pop();
                    self.values[frame.base + rec.v1() as usize] = value;
                }
                TeeLocal => {
                    self.values[frame.base + rec.v1() as usize] = self.top_value();
                }
                GetGlobal => {
                    let pool = rt.modules[frame.instance].globals[rec.v1() as usize] as usize;
                    self.push(rt.globals[pool].value.value)?;
                }
                SetGlobal => {
                    let pool = rt.modules[frame.instance].globals[rec.v1() as usize] as usize;
                    rt.globals[pool].value.value = self.pop();
                }

                // -- loads --
                I32Load => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u32(addr)?;
                    self.push_u32(v)?;
                }
                I64Load => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u64(addr)?;
                    self.push_u64(v)?;
                }
                F32Load => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u32(addr)?;
                    self.push_f32_bits(v)?;
                }
                F64Load => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u64(addr)?;
                    self.push_f64_bits(v)?;
                }
                I32Load8S => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u8(addr)?;
                    self.push_i32(v as i8 as i32)?;
                }
                I32Load8U => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u8(addr)?;
                    self.push_u32(v as u32)?;
                }
                I32Load16S => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u16(addr)?;
                    self.push_i32(v as i16 as i32)?;
                }
                I32Load16U => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u16(addr)?;
                    self.push_u32(v as u32)?;
                }
                I64Load8S => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u8(addr)?;
                    self.push_i64(v as i8 as i64)?;
                }
                I64Load8U => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u8(addr)?;
                    self.push_u64(v as u64)?;
                }
                I64Load16S => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u16(addr)?;
                    self.push_i64(v as i16 as i64)?;
                }
                I64Load16U => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u16(addr)?;
                    self.push_u64(v as u64)?;
                }
                I64Load32S => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u32(addr)?;
                    self.push_i64(v as i32 as i64)?;
                }
                I64Load32U => {
                    let addr = self.effective_addr(rec);
                    let v = rt.memories[Self::mem_pool(rt, frame)].read_u32(addr)?;
                    self.push_u64(v as u64)?;
                }

                // -- stores --
                I32Store => {
                    let value = self.pop_u32();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u32(addr, value)?;
                }
                I64Store => {
                    let value = self.pop_u64();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u64(addr, value)?;
                }
                F32Store => {
                    let value = self.pop_f32_bits();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u32(addr, value)?;
                }
                F64Store => {
                    let value = self.pop_f64_bits();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u64(addr, value)?;
                }
                I32Store8 => {
                    let value = self.pop_u32();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u8(addr, value as u8)?;
                }
                I32Store16 => {
                    let value = self.pop_u32();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u16(addr, value as u16)?;
                }
                I64Store8 => {
                    let value = self.pop_u64();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u8(addr, value as u8)?;
                }
                I64Store16 => {
                    let value = self.pop_u64();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u16(addr, value as u16)?;
                }
                I64Store32 => {
                    let value = self.pop_u64();
                    let addr = self.effective_addr(rec);
                    let pool = Self::mem_pool(rt, frame);
                    rt.memories[pool].write_u32(addr, value as u32)?;
                }

                CurrentMemory => {
                    let pages = rt.memories[Self::mem_pool(rt, frame)].pages();
                    self.push_u32(pages)?;
                }
                GrowMemory => {
                    let delta = self.pop_u32();
                    let pool = Self::mem_pool(rt, frame);
                    let result = rt.memories[pool].grow(delta);
                    self.push_i32(result)?;
                }

                // -- constants --
                I32Const => self.push_u32(rec.v1())?,
                I64Const => self.push_u64(rec.v64())?,
                F32Const => self.push_f32_bits(rec.v1())?,
                F64Const => self.push_f64_bits(rec.v64())?,

                // -- i32 compare/test --
                I32Eqz => unop!(self, pop_u32, push_u32, |v: u32| (v == 0) as u32),
                I32Eq => cmp!(self, pop_u32, |a, b| a == b),
                I32Ne => cmp!(self, pop_u32, |a, b| a != b),
                I32LtS => cmp!(self, pop_i32, |a, b| a < b),
                I32LtU => cmp!(self, pop_u32, |a, b| a < b),
                I32GtS => cmp!(self, pop_i32, |a, b| a > b),
                I32GtU => cmp!(self, pop_u32, |a, b| a > b),
                I32LeS => cmp!(self, pop_i32, |a, b| a <= b),
                I32LeU => cmp!(self, pop_u32, |a, b| a <= b),
                I32GeS => cmp!(self, pop_i32, |a, b| a >= b),
                I32GeU => cmp!(self, pop_u32, |a, b| a >= b),

                // -- i64 compare/test --
                I64Eqz => unop!(self, pop_u64, push_u32, |v: u64| (v == 0) as u32),
                I64Eq => cmp!(self, pop_u64, |a, b| a == b),
                I64Ne => cmp!(self, pop_u64, |a, b| a != b),
                I64LtS => cmp!(self, pop_i64, |a, b| a < b),
                I64LtU => cmp!(self, pop_u64, |a, b| a < b),
                I64GtS => cmp!(self, pop_i64, |a, b| a > b),
                I64GtU => cmp!(self, pop_u64, |a, b| a > b),
                I64LeS => cmp!(self, pop_i64, |a, b| a <= b),
                I64LeU => cmp!(self, pop_u64, |a, b| a <= b),
                I64GeS => cmp!(self, pop_i64, |a, b| a >= b),
                I64GeU => cmp!(self, pop_u64, |a, b| a >= b),

                // -- float compares --
                F32Eq => cmp!(self, pop_f32, |a, b| a == b),
                F32Ne => cmp!(self, pop_f32, |a, b| a != b),
                F32Lt => cmp!(self, pop_f32, |a, b| a < b),
                F32Gt => cmp!(self, pop_f32, |a, b| a > b),
                F32Le => cmp!(self, pop_f32, |a, b| a <= b),
                F32Ge => cmp!(self, pop_f32, |a, b| a >= b),
                F64Eq => cmp!(self, pop_f64, |a, b| a == b),
                F64Ne => cmp!(self, pop_f64, |a, b| a != b),
                F64Lt => cmp!(self, pop_f64, |a, b| a < b),
                F64Gt => cmp!(self, pop_f64, |a, b| a > b),
                F64Le => cmp!(self, pop_f64, |a, b| a <= b),
                F64Ge => cmp!(self, pop_f64, |a, b| a >= b),

                // -- i32 arithmetic --
                I32Clz => unop!(self, pop_u32, push_u32, |v: u32| v.leading_zeros()),
                I32Ctz => unop!(self, pop_u32, push_u32, |v: u32| v.trailing_zeros()),
                I32Popcnt => unop!(self, pop_u32, push_u32, |v: u32| v.count_ones()),
                I32Add => binop!(self, pop_u32, push_u32, u32::wrapping_add),
                I32Sub => binop!(self, pop_u32, push_u32, u32::wrapping_sub),
                I32Mul => binop!(self, pop_u32, push_u32, u32::wrapping_mul),
                I32DivS => trapping_binop!(self, pop_i32, push_i32, i32_div_s),
                I32DivU => trapping_binop!(self, pop_u32, push_u32, u32_div),
                I32RemS => trapping_binop!(self, pop_i32, push_i32, i32_rem_s),
                I32RemU => trapping_binop!(self, pop_u32, push_u32, u32_rem),
                I32And => binop!(self, pop_u32, push_u32, |a, b| a & b),
                I32Or => binop!(self, pop_u32, push_u32, |a, b| a | b),
                I32Xor => binop!(self, pop_u32, push_u32, |a, b| a ^ b),
                I32Shl => binop!(self, pop_u32, push_u32, |a: u32, b: u32| a.wrapping_shl(b)),
                I32ShrS => {
                    let b = self.pop_u32();
                    let a = self.pop_i32();
                    self.push_i32(a.wrapping_shr(b))?;
                }
                I32ShrU => binop!(self, pop_u32, push_u32, |a: u32, b: u32| a.wrapping_shr(b)),
                I32Rotl => binop!(self, pop_u32, push_u32, |a: u32, b: u32| a.rotate_left(b)),
                I32Rotr => binop!(self, pop_u32, push_u32, |a: u32, b: u32| a.rotate_right(b)),

                // -- i64 arithmetic --
                I64Clz => unop!(self, pop_u64, push_u64, |v: u64| v.leading_zeros() as u64),
                I64Ctz => unop!(self, pop_u64, push_u64, |v: u64| v.trailing_zeros() as u64),
                I64Popcnt => unop!(self, pop_u64, push_u64, |v: u64| v.count_ones() as u64),
                I64Add => binop!(self, pop_u64, push_u64, u64::wrapping_add),
                I64Sub => binop!(self, pop_u64, push_u64, u64::wrapping_sub),
                I64Mul => binop!(self, pop_u64, push_u64, u64::wrapping_mul),
                I64DivS => trapping_binop!(self, pop_i64, push_i64, i64_div_s),
                I64DivU => trapping_binop!(self, pop_u64, push_u64, u64_div),
                I64RemS => trapping_binop!(self, pop_i64, push_i64, i64_rem_s),
                I64RemU => trapping_binop!(self, pop_u64, push_u64, u64_rem),
                I64And => binop!(self, pop_u64, push_u64, |a, b| a & b),
                I64Or => binop!(self, pop_u64, push_u64, |a, b| a | b),
                I64Xor => binop!(self, pop_u64, push_u64, |a, b| a ^ b),
                I64Shl => binop!(self, pop_u64, push_u64, |a: u64, b: u64| a
                    .wrapping_shl(b as u32)),
                I64ShrS => {
                    let b = self.pop_u64();
                    let a = self.pop_i64();
                    self.push_i64(a.wrapping_shr(b as u32))?;
                }
                I64ShrU => binop!(self, pop_u64, push_u64, |a: u64, b: u64| a
                    .wrapping_shr(b as u32)),
                I64Rotl => binop!(self, pop_u64, push_u64, |a: u64, b: u64| a
                    .rotate_left(b as u32)),
                I64Rotr => binop!(self, pop_u64, push_u64, |a: u64, b: u64| a
                    .rotate_right(b as u32)),

                // -- f32 arithmetic --
                F32Abs => unop!(self, pop_f32_bits, push_f32_bits, |v: u32| v
                    & !f32b::SIGN_MASK),
                F32Neg => unop!(self, pop_f32_bits, push_f32_bits, |v: u32| v
                    ^ f32b::SIGN_MASK),
                F32Ceil => {
                    unop!(self, pop_f32_bits, push_f32_bits, |v| numeric::f32_unop(v, f32::ceil))
                }
                F32Floor => unop!(self, pop_f32_bits, push_f32_bits, |v| numeric::f32_unop(
                    v,
                    f32::floor
                )),
                F32Trunc => unop!(self, pop_f32_bits, push_f32_bits, |v| numeric::f32_unop(
                    v,
                    f32::trunc
                )),
                F32Nearest => unop!(self, pop_f32_bits, push_f32_bits, |v| numeric::f32_unop(
                    v,
                    f32::round_ties_even
                )),
                F32Sqrt => {
                    unop!(self, pop_f32_bits, push_f32_bits, |v| numeric::f32_unop(v, f32::sqrt))
                }
                F32Add => binop!(self, pop_f32_bits, push_f32_bits, |a, b| {
                    numeric::f32_binop(a, b, |x, y| x + y)
                }),
                F32Sub => binop!(self, pop_f32_bits, push_f32_bits, |a, b| {
                    numeric::f32_binop(a, b, |x, y| x - y)
                }),
                F32Mul => binop!(self, pop_f32_bits, push_f32_bits, |a, b| {
                    numeric::f32_binop(a, b, |x, y| x * y)
                }),
                F32Div => binop!(self, pop_f32_bits, push_f32_bits, numeric::f32_div),
                F32Min => binop!(self, pop_f32_bits, push_f32_bits, numeric::f32_min),
                F32Max => binop!(self, pop_f32_bits, push_f32_bits, numeric::f32_max),
                F32Copysign => binop!(self, pop_f32_bits, push_f32_bits, |a: u32, b: u32| {
                    (a & !f32b::SIGN_MASK) | (b & f32b::SIGN_MASK)
                }),

                // -- f64 arithmetic --
                F64Abs => unop!(self, pop_f64_bits, push_f64_bits, |v: u64| v
                    & !f64b::SIGN_MASK),
                F64Neg => unop!(self, pop_f64_bits, push_f64_bits, |v: u64| v
                    ^ f64b::SIGN_MASK),
                F64Ceil => {
                    unop!(self, pop_f64_bits, push_f64_bits, |v| numeric::f64_unop(v, f64::ceil))
                }
                F64Floor => unop!(self, pop_f64_bits, push_f64_bits, |v| numeric::f64_unop(
                    v,
                    f64::floor
                )),
                F64Trunc => unop!(self, pop_f64_bits, push_f64_bits, |v| numeric::f64_unop(
                    v,
                    f64::trunc
                )),
                F64Nearest => unop!(self, pop_f64_bits, push_f64_bits, |v| numeric::f64_unop(
                    v,
                    f64::round_ties_even
                )),
                F64Sqrt => {
                    unop!(self, pop_f64_bits, push_f64_bits, |v| numeric::f64_unop(v, f64::sqrt))
                }
                F64Add => binop!(self, pop_f64_bits, push_f64_bits, |a, b| {
                    numeric::f64_binop(a, b, |x, y| x + y)
                }),
                F64Sub => binop!(self, pop_f64_bits, push_f64_bits, |a, b| {
                    numeric::f64_binop(a, b, |x, y| x - y)
                }),
                F64Mul => binop!(self, pop_f64_bits, push_f64_bits, |a, b| {
                    numeric::f64_binop(a, b, |x, y| x * y)
                }),
                F64Div => binop!(self, pop_f64_bits, push_f64_bits, numeric::f64_div),
                F64Min => binop!(self, pop_f64_bits, push_f64_bits, numeric::f64_min),
                F64Max => binop!(self, pop_f64_bits, push_f64_bits, numeric::f64_max),
                F64Copysign => binop!(self, pop_f64_bits, push_f64_bits, |a: u64, b: u64| {
                    (a & !f64b::SIGN_MASK) | (b & f64b::SIGN_MASK)
                }),

                // -- conversions --
                I32WrapI64 => unop!(self, pop_u64, push_u32, |v: u64| v as u32),
                I32TruncSF32 => {
                    let v = self.pop_f32_bits();
                    self.push_u32(numeric::i32_trunc_f32(v)?)?;
                }
                I32TruncUF32 => {
                    let v = self.pop_f32_bits();
                    self.push_u32(numeric::u32_trunc_f32(v)?)?;
                }
                I32TruncSF64 => {
                    let v = self.pop_f64_bits();
                    self.push_u32(numeric::i32_trunc_f64(v)?)?;
                }
                I32TruncUF64 => {
                    let v = self.pop_f64_bits();
                    self.push_u32(numeric::u32_trunc_f64(v)?)?;
                }
                I64ExtendSI32 => unop!(self, pop_i32, push_i64, |v: i32| v as i64),
                I64ExtendUI32 => unop!(self, pop_u32, push_u64, |v: u32| v as u64),
                I64TruncSF32 => {
                    let v = self.pop_f32_bits();
                    self.push_u64(numeric::i64_trunc_f32(v)?)?;
                }
                I64TruncUF32 => {
                    let v = self.pop_f32_bits();
                    self.push_u64(numeric::u64_trunc_f32(v)?)?;
                }
                I64TruncSF64 => {
                    let v = self.pop_f64_bits();
                    self.push_u64(numeric::i64_trunc_f64(v)?)?;
                }
                I64TruncUF64 => {
                    let v = self.pop_f64_bits();
                    self.push_u64(numeric::u64_trunc_f64(v)?)?;
                }
                I32TruncSSatF32 => {
                    unop!(self, pop_f32_bits, push_u32, numeric::i32_trunc_sat_f32)
                }
                I32TruncUSatF32 => {
                    unop!(self, pop_f32_bits, push_u32, numeric::u32_trunc_sat_f32)
                }
                I32TruncSSatF64 => {
                    unop!(self, pop_f64_bits, push_u32, numeric::i32_trunc_sat_f64)
                }
                I32TruncUSatF64 => {
                    unop!(self, pop_f64_bits, push_u32, numeric::u32_trunc_sat_f64)
                }
                I64TruncSSatF32 => {
                    unop!(self, pop_f32_bits, push_u64, numeric::i64_trunc_sat_f32)
                }
                I64TruncUSatF32 => {
                    unop!(self, pop_f32_bits, push_u64, numeric::u64_trunc_sat_f32)
                }
                I64TruncSSatF64 => {
                    unop!(self, pop_f64_bits, push_u64, numeric::i64_trunc_sat_f64)
                }
                I64TruncUSatF64 => {
                    unop!(self, pop_f64_bits, push_u64, numeric::u64_trunc_sat_f64)
                }
                F32ConvertSI32 => {
                    unop!(self, pop_i32, push_f32_bits, |v: i32| (v as f32).to_bits())
                }
                F32ConvertUI32 => {
                    unop!(self, pop_u32, push_f32_bits, |v: u32| (v as f32).to_bits())
                }
                F32ConvertSI64 => {
                    unop!(self, pop_i64, push_f32_bits, |v: i64| (v as f32).to_bits())
                }
                F32ConvertUI64 => {
                    unop!(self, pop_u64, push_f32_bits, |v: u64| (v as f32).to_bits())
                }
                F32DemoteF64 => {
                    unop!(self, pop_f64_bits, push_f32_bits, numeric::f32_demote_f64)
                }
                F64ConvertSI32 => {
                    unop!(self, pop_i32, push_f64_bits, |v: i32| (v as f64).to_bits())
                }
                F64ConvertUI32 => {
                    unop!(self, pop_u32, push_f64_bits, |v: u32| (v as f64).to_bits())
                }
                F64ConvertSI64 => {
                    unop!(self, pop_i64, push_f64_bits, |v: i64| (v as f64).to_bits())
                }
                F64ConvertUI64 => {
                    unop!(self, pop_u64, push_f64_bits, |v: u64| (v as f64).to_bits())
                }
                F64PromoteF32 => {
                    unop!(self, pop_f32_bits, push_f64_bits, numeric::f64_promote_f32)
                }
                I32ReinterpretF32 => unop!(self, pop_f32_bits, push_u32, |v| v),
                I64ReinterpretF64 => unop!(self, pop_f64_bits, push_u64, |v| v),
                F32ReinterpretI32 => unop!(self, pop_u32, push_f32_bits, |v| v),
                F64ReinterpretI64 => unop!(self, pop_u64, push_f64_bits, |v| v),

                // -- sign extension --
                I32Extend8S => unop!(self, pop_u32, push_i32, |v: u32| v as u8 as i8 as i32),
                I32Extend16S => unop!(self, pop_u32, push_i32, |v: u32| v as u16 as i16 as i32),
                I64Extend8S => unop!(self, pop_u64, push_i64, |v: u64| v as u8 as i8 as i64),
                I64Extend16S => unop!(self, pop_u64, push_i64, |v: u64| v as u16 as i16 as i64),
                I64Extend32S => unop!(self, pop_u64, push_i64, |v: u64| v as u32 as i32 as i64),

                // -- atomics --
                // wait/wake are reserved: decoded and validated, but
                // executing one traps.
                AtomicWake | I32AtomicWait | I64AtomicWait => return Err(Trap::Unreachable),

                I32AtomicLoad | I32AtomicLoad8U | I32AtomicLoad16U => {
                    let addr = self.atomic_addr(rec)?;
                    let memory = &rt.memories[Self::mem_pool(rt, frame)];
                    let v = match rec.opcode.memory_size() {
                        1 => memory.read_u8(addr)? as u32,
                        2 => memory.read_u16(addr)? as u32,
                        _ => memory.read_u32(addr)?,
                    };
                    self.push_u32(v)?;
                }
                I64AtomicLoad | I64AtomicLoad8U | I64AtomicLoad16U | I64AtomicLoad32U => {
                    let addr = self.atomic_addr(rec)?;
                    let memory = &rt.memories[Self::mem_pool(rt, frame)];
                    let v = match rec.opcode.memory_size() {
                        1 => memory.read_u8(addr)? as u64,
                        2 => memory.read_u16(addr)? as u64,
                        4 => memory.read_u32(addr)? as u64,
                        _ => memory.read_u64(addr)?,
                    };
                    self.push_u64(v)?;
                }
                I32AtomicStore | I32AtomicStore8 | I32AtomicStore16 => {
                    let value = self.pop_u32();
                    let addr = self.atomic_addr(rec)?;
                    let pool = Self::mem_pool(rt, frame);
                    let memory = &mut rt.memories[pool];
                    match rec.opcode.memory_size() {
                        1 => memory.write_u8(addr, value as u8)?,
                        2 => memory.write_u16(addr, value as u16)?,
                        _ => memory.write_u32(addr, value)?,
                    }
                }
                I64AtomicStore | I64AtomicStore8 | I64AtomicStore16 | I64AtomicStore32 => {
                    let value = self.pop_u64();
                    let addr = self.atomic_addr(rec)?;
                    let pool = Self::mem_pool(rt, frame);
                    let memory = &mut rt.memories[pool];
                    match rec.opcode.memory_size() {
                        1 => memory.write_u8(addr, value as u8)?,
                        2 => memory.write_u16(addr, value as u16)?,
                        4 => memory.write_u32(addr, value as u32)?,
                        _ => memory.write_u64(addr, value)?,
                    }
                }

                I32AtomicRmwAdd | I32AtomicRmw8UAdd | I32AtomicRmw16UAdd => {
                    self.atomic_rmw32(rt, frame, rec, u32::wrapping_add)?;
                }
                I32AtomicRmwSub | I32AtomicRmw8USub | I32AtomicRmw16USub => {
                    self.atomic_rmw32(rt, frame, rec, u32::wrapping_sub)?;
                }
                I32AtomicRmwAnd | I32AtomicRmw8UAnd | I32AtomicRmw16UAnd => {
                    self.atomic_rmw32(rt, frame, rec, |a, b| a & b)?;
                }
                I32AtomicRmwOr | I32AtomicRmw8UOr | I32AtomicRmw16UOr => {
                    self.atomic_rmw32(rt, frame, rec, |a, b| a | b)?;
                }
                I32AtomicRmwXor | I32AtomicRmw8UXor | I32AtomicRmw16UXor => {
                    self.atomic_rmw32(rt, frame, rec, |a, b| a ^ b)?;
                }
                I32AtomicRmwXchg | I32AtomicRmw8UXchg | I32AtomicRmw16UXchg => {
                    self.atomic_rmw32(rt, frame, rec, |_, b| b)?;
                }
                I64AtomicRmwAdd | I64AtomicRmw8UAdd | I64AtomicRmw16UAdd
                | I64AtomicRmw32UAdd => {
                    self.atomic_rmw64(rt, frame, rec, u64::wrapping_add)?;
                }
                I64AtomicRmwSub | I64AtomicRmw8USub | I64AtomicRmw16USub
                | I64AtomicRmw32USub => {
                    self.atomic_rmw64(rt, frame, rec, u64::wrapping_sub)?;
                }
                I64AtomicRmwAnd | I64AtomicRmw8UAnd | I64AtomicRmw16UAnd
                | I64AtomicRmw32UAnd => {
                    self.atomic_rmw64(rt, frame, rec, |a, b| a & b)?;
                }
                I64AtomicRmwOr | I64AtomicRmw8UOr | I64AtomicRmw16UOr | I64AtomicRmw32UOr => {
                    self.atomic_rmw64(rt, frame, rec, |a, b| a | b)?;
                }
                I64AtomicRmwXor | I64AtomicRmw8UXor | I64AtomicRmw16UXor
                | I64AtomicRmw32UXor => {
                    self.atomic_rmw64(rt, frame, rec, |a, b| a ^ b)?;
                }
                I64AtomicRmwXchg | I64AtomicRmw8UXchg | I64AtomicRmw16UXchg
                | I64AtomicRmw32UXchg => {
                    self.atomic_rmw64(rt, frame, rec, |_, b| b)?;
                }
                I32AtomicRmwCmpxchg | I32AtomicRmw8UCmpxchg | I32AtomicRmw16UCmpxchg => {
                    self.atomic_cmpxchg32(rt, frame, rec)?;
                }
                I64AtomicRmwCmpxchg | I64AtomicRmw8UCmpxchg | I64AtomicRmw16UCmpxchg
                | I64AtomicRmw32UCmpxchg => {
                    self.atomic_cmpxchg64(rt, frame, rec)?;
                }

                // Structural opcodes never survive lowering.
                Nop | Block | Loop => unreachable!("{} is not emitted", rec.opcode),
            }
        }
    }
}

// Float comparisons pop as floats for IEEE semantics (NaN compares false,
// ne compares true).
impl<'env> Thread<'env> {
    #[inline]
    fn pop_f32(&mut self) -> f32 {
        f32::from_bits(self.pop_f32_bits())
    }

    #[inline]
    fn pop_f64(&mut self) -> f64 {
        f64::from_bits(self.pop_f64_bits())
    }
}
