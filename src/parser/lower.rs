//! Per-function decode + typecheck + lowering pass.
//!
//! Structured control flow is flattened into a branch-resolved opcode
//! stream. Every label plants an interpreter-internal `End` record carrying
//! `(stack_base, result_count)`; branches always land on such a record, so
//! the drop-keep unwind happens at the target, for forward edges and loop
//! back-edges alike. Branch-family records are emitted with an invalid
//! target and registered on a fixup list; a single pass at end-of-function
//! resolves them to the label's `End` position (or the loop origin).

use crate::parser::module::{Module, ValueType};
use crate::parser::opcode::{Opcode, OpcodeRec, INVALID_INDEX};
use crate::parser::reader::Reader;
use crate::parser::typecheck::{LabelKind, TypeChecker};
use crate::parser::LoadError;

struct Label {
    results: u32,
    /// Operand-stack height at label entry.
    stack: u32,
    /// Position of the label's `End` record, set at label pop.
    offset: u32,
    /// Position of the loop-head `End` record; `INVALID_INDEX` for
    /// non-loop labels.
    origin: u32,
    /// Emit position of the owning `If`, until its false-edge is patched.
    if_pos: Option<usize>,
}

struct Fixup {
    pos: usize,
    label: usize,
}

pub struct Lowerer<'m> {
    module: &'m Module,
    checker: TypeChecker,
    opcodes: Vec<OpcodeRec>,
    labels: Vec<Label>,
    label_stack: Vec<usize>,
    fixups: Vec<Fixup>,
    result_count: u32,
}

impl<'m> Lowerer<'m> {
    /// Lower the body of `module.funcs[defined_index]`. The reader is
    /// positioned after the local declarations; `body_end` is the declared
    /// end of the body.
    pub fn lower(
        module: &'m Module,
        defined_index: usize,
        reader: &mut Reader<'_>,
        body_end: usize,
    ) -> Result<Vec<OpcodeRec>, LoadError> {
        let func = &module.funcs[defined_index];
        let sig = module
            .types
            .get(func.sig_index as usize)
            .ok_or_else(|| LoadError::Malformed("function signature index out of range".into()))?;

        let mut lowerer = Lowerer {
            module,
            checker: TypeChecker::new(),
            opcodes: Vec::new(),
            labels: Vec::new(),
            label_stack: Vec::new(),
            fixups: Vec::new(),
            result_count: sig.results.len() as u32,
        };
        lowerer.checker.begin_function(sig);
        lowerer.push_label(sig.results.len() as u32, 0, INVALID_INDEX);
        lowerer.run(defined_index, reader, body_end)?;
        lowerer.resolve_fixups()?;
        Ok(lowerer.opcodes)
    }

    fn run(
        &mut self,
        defined_index: usize,
        reader: &mut Reader<'_>,
        body_end: usize,
    ) -> Result<(), LoadError> {
        loop {
            if reader.pos() >= body_end {
                return Err(LoadError::Malformed(
                    "function body is not terminated by end".into(),
                ));
            }
            if self.step(defined_index, reader)? {
                break;
            }
        }
        if reader.pos() != body_end {
            return Err(LoadError::Malformed(format!(
                "function body size mismatch: ended at {}, expected {}",
                reader.pos(),
                body_end
            )));
        }
        Ok(())
    }

    fn emit(&mut self, opcode: Opcode, v1: u32, v2: u32) -> usize {
        self.opcodes.push(OpcodeRec::with_pair(opcode, v1, v2));
        self.opcodes.len() - 1
    }

    fn emit64(&mut self, opcode: Opcode, value: u64) {
        self.opcodes.push(OpcodeRec::with_u64(opcode, value));
    }

    fn push_label(&mut self, results: u32, stack: u32, origin: u32) -> usize {
        self.labels.push(Label {
            results,
            stack,
            offset: INVALID_INDEX,
            origin,
            if_pos: None,
        });
        self.label_stack.push(self.labels.len() - 1);
        self.labels.len() - 1
    }

    fn label_at(&self, depth: u32) -> Result<usize, LoadError> {
        let len = self.label_stack.len();
        if (depth as usize) < len {
            Ok(self.label_stack[len - 1 - depth as usize])
        } else {
            Err(LoadError::Malformed(format!(
                "branch depth {} exceeds label stack",
                depth
            )))
        }
    }

    fn branch(&mut self, opcode: Opcode, depth: u32) -> Result<(), LoadError> {
        let label = self.label_at(depth)?;
        let pos = self.emit(opcode, INVALID_INDEX, 0);
        self.fixups.push(Fixup { pos, label });
        Ok(())
    }

    fn resolve_fixups(&mut self) -> Result<(), LoadError> {
        for fixup in &self.fixups {
            let label = &self.labels[fixup.label];
            let target = if label.origin != INVALID_INDEX {
                label.origin
            } else {
                label.offset
            };
            if target == INVALID_INDEX {
                return Err(LoadError::Malformed("unresolved branch target".into()));
            }
            self.opcodes[fixup.pos].set_v1(target);
        }
        Ok(())
    }

    fn block_signature(reader: &mut Reader<'_>) -> Result<Vec<ValueType>, LoadError> {
        let byte = reader.read_u8()?;
        match ValueType::decode_block_type(byte) {
            Some(ValueType::Void) => Ok(Vec::new()),
            Some(t) => Ok(vec![t]),
            None => Err(LoadError::Malformed(format!(
                "invalid block signature type 0x{:02x}",
                byte
            ))),
        }
    }

    fn local_type(&self, defined_index: usize, index: u32) -> Result<ValueType, LoadError> {
        self.module.funcs[defined_index]
            .types
            .get(index as usize)
            .copied()
            .ok_or_else(|| LoadError::Malformed(format!("invalid local index {}", index)))
    }

    fn check_memory(&self, opcode: Opcode) -> Result<(), LoadError> {
        if self.module.has_memory() {
            Ok(())
        } else {
            Err(LoadError::Malformed(format!(
                "{} requires an imported or defined memory",
                opcode
            )))
        }
    }

    /// Alignment immediates larger than the natural alignment are allowed
    /// (warning only); atomic accesses must match it exactly.
    fn read_mem_arg(
        &self,
        reader: &mut Reader<'_>,
        opcode: Opcode,
        atomic: bool,
    ) -> Result<u32, LoadError> {
        let align_log2 = reader.read_var_u32()?;
        let offset = reader.read_var_u32()?;
        let natural = opcode.memory_size();
        if atomic {
            if align_log2 >= 32 || (1u32 << align_log2) != natural {
                return Err(LoadError::Malformed(format!(
                    "alignment of {} must equal natural alignment ({})",
                    opcode, natural
                )));
            }
        } else if align_log2 >= 32 || (1u32 << align_log2) > natural {
            tracing::warn!(
                opcode = opcode.name(),
                align_log2,
                natural,
                "alignment exceeds natural alignment"
            );
        }
        Ok(offset)
    }

    /// Decode one instruction; returns true when the function-level `end`
    /// was consumed.
    fn step(&mut self, defined_index: usize, reader: &mut Reader<'_>) -> Result<bool, LoadError> {
        use Opcode::*;
        use ValueType::{F32, F64, I32, I64};

        let byte = reader.read_u8()?;
        let opcode = if byte == 0xfc || byte == 0xfe {
            let sub = reader.read_var_u32()?;
            u8::try_from(sub)
                .ok()
                .and_then(|sub| Opcode::decode(byte, sub))
                .ok_or(LoadError::UnknownOpcode {
                    prefix: byte,
                    byte: sub as u8,
                })?
        } else {
            Opcode::decode(0, byte).ok_or(LoadError::UnknownOpcode {
                prefix: 0,
                byte,
            })?
        };

        match opcode {
            Unreachable => {
                self.checker.on_unreachable()?;
                self.emit(opcode, 0, 0);
            }
            Nop => {}
            Block => {
                let sig = Self::block_signature(reader)?;
                self.checker.on_block(&sig);
                let stack = self.checker.stack_height() as u32;
                self.push_label(sig.len() as u32, stack, INVALID_INDEX);
            }
            Loop => {
                let sig = Self::block_signature(reader)?;
                self.checker.on_loop(&sig);
                let stack = self.checker.stack_height() as u32;
                // The loop head carries its own unwind record so that
                // back-edges drop any values accumulated past the entry
                // height.
                let origin = self.emit(End, stack, 0) as u32;
                self.push_label(sig.len() as u32, stack, origin);
            }
            If => {
                let sig = Self::block_signature(reader)?;
                self.checker.on_if(&sig)?;
                let stack = self.checker.stack_height() as u32;
                let label = self.push_label(sig.len() as u32, stack, INVALID_INDEX);
                let pos = self.emit(If, INVALID_INDEX, 0);
                self.labels[label].if_pos = Some(pos);
            }
            Else => {
                self.checker.on_else()?;
                let label = *self
                    .label_stack
                    .last()
                    .ok_or_else(|| LoadError::Malformed("else outside of if".into()))?;
                let pos = self.emit(Else, INVALID_INDEX, 0);
                self.fixups.push(Fixup { pos, label });
                let if_pos = self.labels[label]
                    .if_pos
                    .take()
                    .ok_or_else(|| LoadError::Malformed("duplicate else".into()))?;
                let else_start = self.opcodes.len() as u32;
                self.opcodes[if_pos].set_v1(else_start);
            }
            End => {
                let kind = self.checker.on_end()?;
                let label = self
                    .label_stack
                    .pop()
                    .ok_or_else(|| LoadError::Malformed("end with no open block".into()))?;
                let (stack, results) = (self.labels[label].stack, self.labels[label].results);
                let end_pos = self.emit(End, stack, results) as u32;
                self.labels[label].offset = end_pos;
                if let Some(if_pos) = self.labels[label].if_pos.take() {
                    self.opcodes[if_pos].set_v1(end_pos);
                }
                if kind == LabelKind::Func {
                    self.emit(Return, self.result_count, 0);
                    return Ok(true);
                }
            }
            Br => {
                let depth = reader.read_var_u32()?;
                self.checker.on_br(depth)?;
                self.branch(Br, depth)?;
            }
            BrIf => {
                let depth = reader.read_var_u32()?;
                self.checker.on_br_if(depth)?;
                self.branch(BrIf, depth)?;
            }
            BrTable => {
                let count = reader.read_var_u32()?;
                let mut depths = Vec::with_capacity(count as usize + 1);
                for _ in 0..count {
                    depths.push(reader.read_var_u32()?);
                }
                depths.push(reader.read_var_u32()?); // default target
                self.checker.on_br_table(&depths)?;
                // Flat emit: header + count+1 inline target records.
                self.emit(BrTable, count, 0);
                for depth in depths {
                    self.branch(Br, depth)?;
                }
            }
            Return => {
                self.checker.on_return()?;
                self.emit(Return, self.result_count, 0);
            }
            Call => {
                let index = reader.read_var_u32()?;
                let sig = self
                    .module
                    .func_signature(index)
                    .ok_or_else(|| {
                        LoadError::Malformed(format!("invalid function index {}", index))
                    })?
                    .clone();
                self.checker.on_call(&sig)?;
                self.emit(Call, index, 0);
            }
            CallIndirect => {
                let sig_index = reader.read_var_u32()?;
                let table_index = reader.read_var_u32()?;
                if table_index != 0 {
                    return Err(LoadError::Malformed(
                        "call_indirect table index must be 0".into(),
                    ));
                }
                if !self.module.has_table() {
                    return Err(LoadError::Malformed(
                        "found call_indirect operator, but no table".into(),
                    ));
                }
                let sig = self
                    .module
                    .types
                    .get(sig_index as usize)
                    .ok_or_else(|| {
                        LoadError::Malformed(format!("invalid signature index {}", sig_index))
                    })?
                    .clone();
                self.checker.on_call_indirect(&sig)?;
                self.emit(CallIndirect, sig_index, table_index);
            }

            Drop => {
                self.checker.on_drop()?;
                self.emit(opcode, 0, 0);
            }
            Select => {
                self.checker.on_select()?;
                self.emit(opcode, 0, 0);
            }

            GetLocal => {
                let index = reader.read_var_u32()?;
                let t = self.local_type(defined_index, index)?;
                self.checker.on_get_local(t);
                self.emit(opcode, index, 0);
            }
            SetLocal => {
                let index = reader.read_var_u32()?;
                let t = self.local_type(defined_index, index)?;
                self.checker.on_set_local(t)?;
                self.emit(opcode, index, 0);
            }
            TeeLocal => {
                let index = reader.read_var_u32()?;
                let t = self.local_type(defined_index, index)?;
                self.checker.on_tee_local(t)?;
                self.emit(opcode, index, 0);
            }
            GetGlobal => {
                let index = reader.read_var_u32()?;
                let (t, _) = self.module.global_type(index).ok_or_else(|| {
                    LoadError::Malformed(format!("invalid global index {}", index))
                })?;
                self.checker.on_get_global(t);
                self.emit(opcode, index, 0);
            }
            SetGlobal => {
                let index = reader.read_var_u32()?;
                let (t, mutable) = self.module.global_type(index).ok_or_else(|| {
                    LoadError::Malformed(format!("invalid global index {}", index))
                })?;
                if !mutable {
                    return Err(LoadError::Malformed(format!(
                        "can't set_global on immutable global at index {}",
                        index
                    )));
                }
                self.checker.on_set_global(t)?;
                self.emit(opcode, index, 0);
            }

            I32Load | I32Load8S | I32Load8U | I32Load16S | I32Load16U => {
                self.lower_load(reader, opcode, I32, false)?;
            }
            I64Load | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S
            | I64Load32U => {
                self.lower_load(reader, opcode, I64, false)?;
            }
            F32Load => self.lower_load(reader, opcode, F32, false)?,
            F64Load => self.lower_load(reader, opcode, F64, false)?,

            I32Store | I32Store8 | I32Store16 => self.lower_store(reader, opcode, I32, false)?,
            I64Store | I64Store8 | I64Store16 | I64Store32 => {
                self.lower_store(reader, opcode, I64, false)?;
            }
            F32Store => self.lower_store(reader, opcode, F32, false)?,
            F64Store => self.lower_store(reader, opcode, F64, false)?,

            CurrentMemory => {
                self.check_memory(opcode)?;
                let reserved = reader.read_var_u32()?;
                if reserved != 0 {
                    return Err(LoadError::Malformed(
                        "current_memory memory index must be 0".into(),
                    ));
                }
                self.checker.on_current_memory();
                self.emit(opcode, 0, 0);
            }
            GrowMemory => {
                self.check_memory(opcode)?;
                let reserved = reader.read_var_u32()?;
                if reserved != 0 {
                    return Err(LoadError::Malformed(
                        "grow_memory memory index must be 0".into(),
                    ));
                }
                self.checker.on_grow_memory()?;
                self.emit(opcode, 0, 0);
            }

            I32Const => {
                let value = reader.read_var_s32()?;
                self.checker.on_const(I32);
                self.emit(opcode, value as u32, 0);
            }
            I64Const => {
                let value = reader.read_var_s64()?;
                self.checker.on_const(I64);
                self.emit64(opcode, value as u64);
            }
            F32Const => {
                let bits = reader.read_f32_bits()?;
                self.checker.on_const(F32);
                self.emit(opcode, bits, 0);
            }
            F64Const => {
                let bits = reader.read_f64_bits()?;
                self.checker.on_const(F64);
                self.emit64(opcode, bits);
            }

            I32Eqz => {
                self.checker.on_test(I32)?;
                self.emit(opcode, 0, 0);
            }
            I64Eqz => {
                self.checker.on_test(I64)?;
                self.emit(opcode, 0, 0);
            }

            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU => {
                self.checker.on_compare(I32)?;
                self.emit(opcode, 0, 0);
            }
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS
            | I64GeU => {
                self.checker.on_compare(I64)?;
                self.emit(opcode, 0, 0);
            }
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => {
                self.checker.on_compare(F32)?;
                self.emit(opcode, 0, 0);
            }
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => {
                self.checker.on_compare(F64)?;
                self.emit(opcode, 0, 0);
            }

            I32Clz | I32Ctz | I32Popcnt | I32Extend8S | I32Extend16S => {
                self.checker.on_unary(I32)?;
                self.emit(opcode, 0, 0);
            }
            I64Clz | I64Ctz | I64Popcnt | I64Extend8S | I64Extend16S | I64Extend32S => {
                self.checker.on_unary(I64)?;
                self.emit(opcode, 0, 0);
            }
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => {
                self.checker.on_unary(F32)?;
                self.emit(opcode, 0, 0);
            }
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => {
                self.checker.on_unary(F64)?;
                self.emit(opcode, 0, 0);
            }

            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotl | I32Rotr => {
                self.checker.on_binary(I32)?;
                self.emit(opcode, 0, 0);
            }
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotl | I64Rotr => {
                self.checker.on_binary(I64)?;
                self.emit(opcode, 0, 0);
            }
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => {
                self.checker.on_binary(F32)?;
                self.emit(opcode, 0, 0);
            }
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
                self.checker.on_binary(F64)?;
                self.emit(opcode, 0, 0);
            }

            I32WrapI64 => self.lower_convert(opcode, I32, I64)?,
            I32TruncSF32 | I32TruncUF32 | I32TruncSSatF32 | I32TruncUSatF32 => {
                self.lower_convert(opcode, I32, F32)?;
            }
            I32TruncSF64 | I32TruncUF64 | I32TruncSSatF64 | I32TruncUSatF64 => {
                self.lower_convert(opcode, I32, F64)?;
            }
            I64ExtendSI32 | I64ExtendUI32 => self.lower_convert(opcode, I64, I32)?,
            I64TruncSF32 | I64TruncUF32 | I64TruncSSatF32 | I64TruncUSatF32 => {
                self.lower_convert(opcode, I64, F32)?;
            }
            I64TruncSF64 | I64TruncUF64 | I64TruncSSatF64 | I64TruncUSatF64 => {
                self.lower_convert(opcode, I64, F64)?;
            }
            F32ConvertSI32 | F32ConvertUI32 | F32ReinterpretI32 => {
                self.lower_convert(opcode, F32, I32)?;
            }
            F32ConvertSI64 | F32ConvertUI64 => self.lower_convert(opcode, F32, I64)?,
            F32DemoteF64 => self.lower_convert(opcode, F32, F64)?,
            F64ConvertSI32 | F64ConvertUI32 => self.lower_convert(opcode, F64, I32)?,
            F64ConvertSI64 | F64ConvertUI64 | F64ReinterpretI64 => {
                self.lower_convert(opcode, F64, I64)?;
            }
            F64PromoteF32 => self.lower_convert(opcode, F64, F32)?,
            I32ReinterpretF32 => self.lower_convert(opcode, I32, F32)?,
            I64ReinterpretF64 => self.lower_convert(opcode, I64, F64)?,

            AtomicWake => {
                self.check_memory(opcode)?;
                let offset = self.read_mem_arg(reader, opcode, true)?;
                self.checker.on_atomic_wake()?;
                self.emit(opcode, offset, 0);
            }
            I32AtomicWait => {
                self.check_memory(opcode)?;
                let offset = self.read_mem_arg(reader, opcode, true)?;
                self.checker.on_atomic_wait(I32)?;
                self.emit(opcode, offset, 0);
            }
            I64AtomicWait => {
                self.check_memory(opcode)?;
                let offset = self.read_mem_arg(reader, opcode, true)?;
                self.checker.on_atomic_wait(I64)?;
                self.emit(opcode, offset, 0);
            }

            I32AtomicLoad | I32AtomicLoad8U | I32AtomicLoad16U => {
                self.lower_load(reader, opcode, I32, true)?;
            }
            I64AtomicLoad | I64AtomicLoad8U | I64AtomicLoad16U | I64AtomicLoad32U => {
                self.lower_load(reader, opcode, I64, true)?;
            }
            I32AtomicStore | I32AtomicStore8 | I32AtomicStore16 => {
                self.lower_store(reader, opcode, I32, true)?;
            }
            I64AtomicStore | I64AtomicStore8 | I64AtomicStore16 | I64AtomicStore32 => {
                self.lower_store(reader, opcode, I64, true)?;
            }

            I32AtomicRmwAdd | I32AtomicRmw8UAdd | I32AtomicRmw16UAdd | I32AtomicRmwSub
            | I32AtomicRmw8USub | I32AtomicRmw16USub | I32AtomicRmwAnd | I32AtomicRmw8UAnd
            | I32AtomicRmw16UAnd | I32AtomicRmwOr | I32AtomicRmw8UOr | I32AtomicRmw16UOr
            | I32AtomicRmwXor | I32AtomicRmw8UXor | I32AtomicRmw16UXor | I32AtomicRmwXchg
            | I32AtomicRmw8UXchg | I32AtomicRmw16UXchg => {
                self.lower_atomic_rmw(reader, opcode, I32)?;
            }
            I64AtomicRmwAdd | I64AtomicRmw8UAdd | I64AtomicRmw16UAdd | I64AtomicRmw32UAdd
            | I64AtomicRmwSub | I64AtomicRmw8USub | I64AtomicRmw16USub | I64AtomicRmw32USub
            | I64AtomicRmwAnd | I64AtomicRmw8UAnd | I64AtomicRmw16UAnd | I64AtomicRmw32UAnd
            | I64AtomicRmwOr | I64AtomicRmw8UOr | I64AtomicRmw16UOr | I64AtomicRmw32UOr
            | I64AtomicRmwXor | I64AtomicRmw8UXor | I64AtomicRmw16UXor | I64AtomicRmw32UXor
            | I64AtomicRmwXchg | I64AtomicRmw8UXchg | I64AtomicRmw16UXchg
            | I64AtomicRmw32UXchg => {
                self.lower_atomic_rmw(reader, opcode, I64)?;
            }
            I32AtomicRmwCmpxchg | I32AtomicRmw8UCmpxchg | I32AtomicRmw16UCmpxchg => {
                self.lower_atomic_cmpxchg(reader, opcode, I32)?;
            }
            I64AtomicRmwCmpxchg | I64AtomicRmw8UCmpxchg | I64AtomicRmw16UCmpxchg
            | I64AtomicRmw32UCmpxchg => {
                self.lower_atomic_cmpxchg(reader, opcode, I64)?;
            }
        }
        Ok(false)
    }

    fn lower_load(
        &mut self,
        reader: &mut Reader<'_>,
        opcode: Opcode,
        result: ValueType,
        atomic: bool,
    ) -> Result<(), LoadError> {
        self.check_memory(opcode)?;
        let offset = self.read_mem_arg(reader, opcode, atomic)?;
        self.checker.on_load(result)?;
        self.emit(opcode, offset, 0);
        Ok(())
    }

    fn lower_store(
        &mut self,
        reader: &mut Reader<'_>,
        opcode: Opcode,
        operand: ValueType,
        atomic: bool,
    ) -> Result<(), LoadError> {
        self.check_memory(opcode)?;
        let offset = self.read_mem_arg(reader, opcode, atomic)?;
        self.checker.on_store(operand)?;
        self.emit(opcode, offset, 0);
        Ok(())
    }

    fn lower_atomic_rmw(
        &mut self,
        reader: &mut Reader<'_>,
        opcode: Opcode,
        t: ValueType,
    ) -> Result<(), LoadError> {
        self.check_memory(opcode)?;
        let offset = self.read_mem_arg(reader, opcode, true)?;
        self.checker.on_atomic_rmw(t)?;
        self.emit(opcode, offset, 0);
        Ok(())
    }

    fn lower_atomic_cmpxchg(
        &mut self,
        reader: &mut Reader<'_>,
        opcode: Opcode,
        t: ValueType,
    ) -> Result<(), LoadError> {
        self.check_memory(opcode)?;
        let offset = self.read_mem_arg(reader, opcode, true)?;
        self.checker.on_atomic_cmpxchg(t)?;
        self.emit(opcode, offset, 0);
        Ok(())
    }

    fn lower_convert(
        &mut self,
        opcode: Opcode,
        result: ValueType,
        operand: ValueType,
    ) -> Result<(), LoadError> {
        self.checker.on_convert(result, operand)?;
        self.emit(opcode, 0, 0);
        Ok(())
    }
}
