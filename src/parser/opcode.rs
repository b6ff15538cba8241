//! WebAssembly opcode enumeration and the lowered instruction record.
//!
//! Every opcode of the Wasm 1.0 binary format is represented here, including
//! the `0xfc` saturating-truncation family and the `0xfe` atomic family.
//! `End` doubles as the interpreter-internal unwind record emitted by the
//! lowering pass; it never carries its binary-format meaning in a lowered
//! opcode stream.

use std::fmt;

/// Sentinel index used for unresolved branch targets and uninitialized
/// table elements.
pub const INVALID_INDEX: u32 = u32::MAX;

macro_rules! define_opcodes {
    ($( $name:ident => $prefix:literal, $code:literal, $memsize:literal, $text:literal; )*) => {
        /// All opcodes understood by the decoder and the interpreter.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $name, )*
        }

        impl Opcode {
            /// Decode an opcode from its prefix byte (0 for unprefixed) and
            /// its code byte.
            pub fn decode(prefix: u8, code: u8) -> Option<Opcode> {
                match (prefix, code) {
                    $( ($prefix, $code) => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            /// The opcode's text-format name.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $text, )*
                }
            }

            /// Natural width in bytes of the memory access performed by this
            /// opcode, or 0 for opcodes that do not touch memory.
            pub fn memory_size(&self) -> u32 {
                match self {
                    $( Opcode::$name => $memsize, )*
                }
            }

            /// Prefix byte, or 0 for single-byte encodings.
            pub fn prefix(&self) -> u8 {
                match self {
                    $( Opcode::$name => $prefix, )*
                }
            }
        }
    };
}

define_opcodes! {
    // Control
    Unreachable => 0, 0x00, 0, "unreachable";
    Nop => 0, 0x01, 0, "nop";
    Block => 0, 0x02, 0, "block";
    Loop => 0, 0x03, 0, "loop";
    If => 0, 0x04, 0, "if";
    Else => 0, 0x05, 0, "else";
    End => 0, 0x0b, 0, "end";
    Br => 0, 0x0c, 0, "br";
    BrIf => 0, 0x0d, 0, "br_if";
    BrTable => 0, 0x0e, 0, "br_table";
    Return => 0, 0x0f, 0, "return";
    Call => 0, 0x10, 0, "call";
    CallIndirect => 0, 0x11, 0, "call_indirect";

    // Parametric
    Drop => 0, 0x1a, 0, "drop";
    Select => 0, 0x1b, 0, "select";

    // Variable
    GetLocal => 0, 0x20, 0, "get_local";
    SetLocal => 0, 0x21, 0, "set_local";
    TeeLocal => 0, 0x22, 0, "tee_local";
    GetGlobal => 0, 0x23, 0, "get_global";
    SetGlobal => 0, 0x24, 0, "set_global";

    // Memory loads
    I32Load => 0, 0x28, 4, "i32.load";
    I64Load => 0, 0x29, 8, "i64.load";
    F32Load => 0, 0x2a, 4, "f32.load";
    F64Load => 0, 0x2b, 8, "f64.load";
    I32Load8S => 0, 0x2c, 1, "i32.load8_s";
    I32Load8U => 0, 0x2d, 1, "i32.load8_u";
    I32Load16S => 0, 0x2e, 2, "i32.load16_s";
    I32Load16U => 0, 0x2f, 2, "i32.load16_u";
    I64Load8S => 0, 0x30, 1, "i64.load8_s";
    I64Load8U => 0, 0x31, 1, "i64.load8_u";
    I64Load16S => 0, 0x32, 2, "i64.load16_s";
    I64Load16U => 0, 0x33, 2, "i64.load16_u";
    I64Load32S => 0, 0x34, 4, "i64.load32_s";
    I64Load32U => 0, 0x35, 4, "i64.load32_u";

    // Memory stores
    I32Store => 0, 0x36, 4, "i32.store";
    I64Store => 0, 0x37, 8, "i64.store";
    F32Store => 0, 0x38, 4, "f32.store";
    F64Store => 0, 0x39, 8, "f64.store";
    I32Store8 => 0, 0x3a, 1, "i32.store8";
    I32Store16 => 0, 0x3b, 2, "i32.store16";
    I64Store8 => 0, 0x3c, 1, "i64.store8";
    I64Store16 => 0, 0x3d, 2, "i64.store16";
    I64Store32 => 0, 0x3e, 4, "i64.store32";

    CurrentMemory => 0, 0x3f, 0, "current_memory";
    GrowMemory => 0, 0x40, 0, "grow_memory";

    // Constants
    I32Const => 0, 0x41, 0, "i32.const";
    I64Const => 0, 0x42, 0, "i64.const";
    F32Const => 0, 0x43, 0, "f32.const";
    F64Const => 0, 0x44, 0, "f64.const";

    // i32 comparisons
    I32Eqz => 0, 0x45, 0, "i32.eqz";
    I32Eq => 0, 0x46, 0, "i32.eq";
    I32Ne => 0, 0x47, 0, "i32.ne";
    I32LtS => 0, 0x48, 0, "i32.lt_s";
    I32LtU => 0, 0x49, 0, "i32.lt_u";
    I32GtS => 0, 0x4a, 0, "i32.gt_s";
    I32GtU => 0, 0x4b, 0, "i32.gt_u";
    I32LeS => 0, 0x4c, 0, "i32.le_s";
    I32LeU => 0, 0x4d, 0, "i32.le_u";
    I32GeS => 0, 0x4e, 0, "i32.ge_s";
    I32GeU => 0, 0x4f, 0, "i32.ge_u";

    // i64 comparisons
    I64Eqz => 0, 0x50, 0, "i64.eqz";
    I64Eq => 0, 0x51, 0, "i64.eq";
    I64Ne => 0, 0x52, 0, "i64.ne";
    I64LtS => 0, 0x53, 0, "i64.lt_s";
    I64LtU => 0, 0x54, 0, "i64.lt_u";
    I64GtS => 0, 0x55, 0, "i64.gt_s";
    I64GtU => 0, 0x56, 0, "i64.gt_u";
    I64LeS => 0, 0x57, 0, "i64.le_s";
    I64LeU => 0, 0x58, 0, "i64.le_u";
    I64GeS => 0, 0x59, 0, "i64.ge_s";
    I64GeU => 0, 0x5a, 0, "i64.ge_u";

    // f32 comparisons
    F32Eq => 0, 0x5b, 0, "f32.eq";
    F32Ne => 0, 0x5c, 0, "f32.ne";
    F32Lt => 0, 0x5d, 0, "f32.lt";
    F32Gt => 0, 0x5e, 0, "f32.gt";
    F32Le => 0, 0x5f, 0, "f32.le";
    F32Ge => 0, 0x60, 0, "f32.ge";

    // f64 comparisons
    F64Eq => 0, 0x61, 0, "f64.eq";
    F64Ne => 0, 0x62, 0, "f64.ne";
    F64Lt => 0, 0x63, 0, "f64.lt";
    F64Gt => 0, 0x64, 0, "f64.gt";
    F64Le => 0, 0x65, 0, "f64.le";
    F64Ge => 0, 0x66, 0, "f64.ge";

    // i32 arithmetic
    I32Clz => 0, 0x67, 0, "i32.clz";
    I32Ctz => 0, 0x68, 0, "i32.ctz";
    I32Popcnt => 0, 0x69, 0, "i32.popcnt";
    I32Add => 0, 0x6a, 0, "i32.add";
    I32Sub => 0, 0x6b, 0, "i32.sub";
    I32Mul => 0, 0x6c, 0, "i32.mul";
    I32DivS => 0, 0x6d, 0, "i32.div_s";
    I32DivU => 0, 0x6e, 0, "i32.div_u";
    I32RemS => 0, 0x6f, 0, "i32.rem_s";
    I32RemU => 0, 0x70, 0, "i32.rem_u";
    I32And => 0, 0x71, 0, "i32.and";
    I32Or => 0, 0x72, 0, "i32.or";
    I32Xor => 0, 0x73, 0, "i32.xor";
    I32Shl => 0, 0x74, 0, "i32.shl";
    I32ShrS => 0, 0x75, 0, "i32.shr_s";
    I32ShrU => 0, 0x76, 0, "i32.shr_u";
    I32Rotl => 0, 0x77, 0, "i32.rotl";
    I32Rotr => 0, 0x78, 0, "i32.rotr";

    // i64 arithmetic
    I64Clz => 0, 0x79, 0, "i64.clz";
    I64Ctz => 0, 0x7a, 0, "i64.ctz";
    I64Popcnt => 0, 0x7b, 0, "i64.popcnt";
    I64Add => 0, 0x7c, 0, "i64.add";
    I64Sub => 0, 0x7d, 0, "i64.sub";
    I64Mul => 0, 0x7e, 0, "i64.mul";
    I64DivS => 0, 0x7f, 0, "i64.div_s";
    I64DivU => 0, 0x80, 0, "i64.div_u";
    I64RemS => 0, 0x81, 0, "i64.rem_s";
    I64RemU => 0, 0x82, 0, "i64.rem_u";
    I64And => 0, 0x83, 0, "i64.and";
    I64Or => 0, 0x84, 0, "i64.or";
    I64Xor => 0, 0x85, 0, "i64.xor";
    I64Shl => 0, 0x86, 0, "i64.shl";
    I64ShrS => 0, 0x87, 0, "i64.shr_s";
    I64ShrU => 0, 0x88, 0, "i64.shr_u";
    I64Rotl => 0, 0x89, 0, "i64.rotl";
    I64Rotr => 0, 0x8a, 0, "i64.rotr";

    // f32 arithmetic
    F32Abs => 0, 0x8b, 0, "f32.abs";
    F32Neg => 0, 0x8c, 0, "f32.neg";
    F32Ceil => 0, 0x8d, 0, "f32.ceil";
    F32Floor => 0, 0x8e, 0, "f32.floor";
    F32Trunc => 0, 0x8f, 0, "f32.trunc";
    F32Nearest => 0, 0x90, 0, "f32.nearest";
    F32Sqrt => 0, 0x91, 0, "f32.sqrt";
    F32Add => 0, 0x92, 0, "f32.add";
    F32Sub => 0, 0x93, 0, "f32.sub";
    F32Mul => 0, 0x94, 0, "f32.mul";
    F32Div => 0, 0x95, 0, "f32.div";
    F32Min => 0, 0x96, 0, "f32.min";
    F32Max => 0, 0x97, 0, "f32.max";
    F32Copysign => 0, 0x98, 0, "f32.copysign";

    // f64 arithmetic
    F64Abs => 0, 0x99, 0, "f64.abs";
    F64Neg => 0, 0x9a, 0, "f64.neg";
    F64Ceil => 0, 0x9b, 0, "f64.ceil";
    F64Floor => 0, 0x9c, 0, "f64.floor";
    F64Trunc => 0, 0x9d, 0, "f64.trunc";
    F64Nearest => 0, 0x9e, 0, "f64.nearest";
    F64Sqrt => 0, 0x9f, 0, "f64.sqrt";
    F64Add => 0, 0xa0, 0, "f64.add";
    F64Sub => 0, 0xa1, 0, "f64.sub";
    F64Mul => 0, 0xa2, 0, "f64.mul";
    F64Div => 0, 0xa3, 0, "f64.div";
    F64Min => 0, 0xa4, 0, "f64.min";
    F64Max => 0, 0xa5, 0, "f64.max";
    F64Copysign => 0, 0xa6, 0, "f64.copysign";

    // Conversions
    I32WrapI64 => 0, 0xa7, 0, "i32.wrap/i64";
    I32TruncSF32 => 0, 0xa8, 0, "i32.trunc_s/f32";
    I32TruncUF32 => 0, 0xa9, 0, "i32.trunc_u/f32";
    I32TruncSF64 => 0, 0xaa, 0, "i32.trunc_s/f64";
    I32TruncUF64 => 0, 0xab, 0, "i32.trunc_u/f64";
    I64ExtendSI32 => 0, 0xac, 0, "i64.extend_s/i32";
    I64ExtendUI32 => 0, 0xad, 0, "i64.extend_u/i32";
    I64TruncSF32 => 0, 0xae, 0, "i64.trunc_s/f32";
    I64TruncUF32 => 0, 0xaf, 0, "i64.trunc_u/f32";
    I64TruncSF64 => 0, 0xb0, 0, "i64.trunc_s/f64";
    I64TruncUF64 => 0, 0xb1, 0, "i64.trunc_u/f64";
    F32ConvertSI32 => 0, 0xb2, 0, "f32.convert_s/i32";
    F32ConvertUI32 => 0, 0xb3, 0, "f32.convert_u/i32";
    F32ConvertSI64 => 0, 0xb4, 0, "f32.convert_s/i64";
    F32ConvertUI64 => 0, 0xb5, 0, "f32.convert_u/i64";
    F32DemoteF64 => 0, 0xb6, 0, "f32.demote/f64";
    F64ConvertSI32 => 0, 0xb7, 0, "f64.convert_s/i32";
    F64ConvertUI32 => 0, 0xb8, 0, "f64.convert_u/i32";
    F64ConvertSI64 => 0, 0xb9, 0, "f64.convert_s/i64";
    F64ConvertUI64 => 0, 0xba, 0, "f64.convert_u/i64";
    F64PromoteF32 => 0, 0xbb, 0, "f64.promote/f32";
    I32ReinterpretF32 => 0, 0xbc, 0, "i32.reinterpret/f32";
    I64ReinterpretF64 => 0, 0xbd, 0, "i64.reinterpret/f64";
    F32ReinterpretI32 => 0, 0xbe, 0, "f32.reinterpret/i32";
    F64ReinterpretI64 => 0, 0xbf, 0, "f64.reinterpret/i64";

    // Sign extension
    I32Extend8S => 0, 0xc0, 0, "i32.extend8_s";
    I32Extend16S => 0, 0xc1, 0, "i32.extend16_s";
    I64Extend8S => 0, 0xc2, 0, "i64.extend8_s";
    I64Extend16S => 0, 0xc3, 0, "i64.extend16_s";
    I64Extend32S => 0, 0xc4, 0, "i64.extend32_s";

    // Saturating truncation (0xfc prefix)
    I32TruncSSatF32 => 0xfc, 0x00, 0, "i32.trunc_s:sat/f32";
    I32TruncUSatF32 => 0xfc, 0x01, 0, "i32.trunc_u:sat/f32";
    I32TruncSSatF64 => 0xfc, 0x02, 0, "i32.trunc_s:sat/f64";
    I32TruncUSatF64 => 0xfc, 0x03, 0, "i32.trunc_u:sat/f64";
    I64TruncSSatF32 => 0xfc, 0x04, 0, "i64.trunc_s:sat/f32";
    I64TruncUSatF32 => 0xfc, 0x05, 0, "i64.trunc_u:sat/f32";
    I64TruncSSatF64 => 0xfc, 0x06, 0, "i64.trunc_s:sat/f64";
    I64TruncUSatF64 => 0xfc, 0x07, 0, "i64.trunc_u:sat/f64";

    // Atomics (0xfe prefix)
    AtomicWake => 0xfe, 0x00, 4, "atomic.wake";
    I32AtomicWait => 0xfe, 0x01, 4, "i32.atomic.wait";
    I64AtomicWait => 0xfe, 0x02, 8, "i64.atomic.wait";
    I32AtomicLoad => 0xfe, 0x10, 4, "i32.atomic.load";
    I64AtomicLoad => 0xfe, 0x11, 8, "i64.atomic.load";
    I32AtomicLoad8U => 0xfe, 0x12, 1, "i32.atomic.load8_u";
    I32AtomicLoad16U => 0xfe, 0x13, 2, "i32.atomic.load16_u";
    I64AtomicLoad8U => 0xfe, 0x14, 1, "i64.atomic.load8_u";
    I64AtomicLoad16U => 0xfe, 0x15, 2, "i64.atomic.load16_u";
    I64AtomicLoad32U => 0xfe, 0x16, 4, "i64.atomic.load32_u";
    I32AtomicStore => 0xfe, 0x17, 4, "i32.atomic.store";
    I64AtomicStore => 0xfe, 0x18, 8, "i64.atomic.store";
    I32AtomicStore8 => 0xfe, 0x19, 1, "i32.atomic.store8";
    I32AtomicStore16 => 0xfe, 0x1a, 2, "i32.atomic.store16";
    I64AtomicStore8 => 0xfe, 0x1b, 1, "i64.atomic.store8";
    I64AtomicStore16 => 0xfe, 0x1c, 2, "i64.atomic.store16";
    I64AtomicStore32 => 0xfe, 0x1d, 4, "i64.atomic.store32";
    I32AtomicRmwAdd => 0xfe, 0x1e, 4, "i32.atomic.rmw.add";
    I64AtomicRmwAdd => 0xfe, 0x1f, 8, "i64.atomic.rmw.add";
    I32AtomicRmw8UAdd => 0xfe, 0x20, 1, "i32.atomic.rmw8_u.add";
    I32AtomicRmw16UAdd => 0xfe, 0x21, 2, "i32.atomic.rmw16_u.add";
    I64AtomicRmw8UAdd => 0xfe, 0x22, 1, "i64.atomic.rmw8_u.add";
    I64AtomicRmw16UAdd => 0xfe, 0x23, 2, "i64.atomic.rmw16_u.add";
    I64AtomicRmw32UAdd => 0xfe, 0x24, 4, "i64.atomic.rmw32_u.add";
    I32AtomicRmwSub => 0xfe, 0x25, 4, "i32.atomic.rmw.sub";
    I64AtomicRmwSub => 0xfe, 0x26, 8, "i64.atomic.rmw.sub";
    I32AtomicRmw8USub => 0xfe, 0x27, 1, "i32.atomic.rmw8_u.sub";
    I32AtomicRmw16USub => 0xfe, 0x28, 2, "i32.atomic.rmw16_u.sub";
    I64AtomicRmw8USub => 0xfe, 0x29, 1, "i64.atomic.rmw8_u.sub";
    I64AtomicRmw16USub => 0xfe, 0x2a, 2, "i64.atomic.rmw16_u.sub";
    I64AtomicRmw32USub => 0xfe, 0x2b, 4, "i64.atomic.rmw32_u.sub";
    I32AtomicRmwAnd => 0xfe, 0x2c, 4, "i32.atomic.rmw.and";
    I64AtomicRmwAnd => 0xfe, 0x2d, 8, "i64.atomic.rmw.and";
    I32AtomicRmw8UAnd => 0xfe, 0x2e, 1, "i32.atomic.rmw8_u.and";
    I32AtomicRmw16UAnd => 0xfe, 0x2f, 2, "i32.atomic.rmw16_u.and";
    I64AtomicRmw8UAnd => 0xfe, 0x30, 1, "i64.atomic.rmw8_u.and";
    I64AtomicRmw16UAnd => 0xfe, 0x31, 2, "i64.atomic.rmw16_u.and";
    I64AtomicRmw32UAnd => 0xfe, 0x32, 4, "i64.atomic.rmw32_u.and";
    I32AtomicRmwOr => 0xfe, 0x33, 4, "i32.atomic.rmw.or";
    I64AtomicRmwOr => 0xfe, 0x34, 8, "i64.atomic.rmw.or";
    I32AtomicRmw8UOr => 0xfe, 0x35, 1, "i32.atomic.rmw8_u.or";
    I32AtomicRmw16UOr => 0xfe, 0x36, 2, "i32.atomic.rmw16_u.or";
    I64AtomicRmw8UOr => 0xfe, 0x37, 1, "i64.atomic.rmw8_u.or";
    I64AtomicRmw16UOr => 0xfe, 0x38, 2, "i64.atomic.rmw16_u.or";
    I64AtomicRmw32UOr => 0xfe, 0x39, 4, "i64.atomic.rmw32_u.or";
    I32AtomicRmwXor => 0xfe, 0x3a, 4, "i32.atomic.rmw.xor";
    I64AtomicRmwXor => 0xfe, 0x3b, 8, "i64.atomic.rmw.xor";
    I32AtomicRmw8UXor => 0xfe, 0x3c, 1, "i32.atomic.rmw8_u.xor";
    I32AtomicRmw16UXor => 0xfe, 0x3d, 2, "i32.atomic.rmw16_u.xor";
    I64AtomicRmw8UXor => 0xfe, 0x3e, 1, "i64.atomic.rmw8_u.xor";
    I64AtomicRmw16UXor => 0xfe, 0x3f, 2, "i64.atomic.rmw16_u.xor";
    I64AtomicRmw32UXor => 0xfe, 0x40, 4, "i64.atomic.rmw32_u.xor";
    I32AtomicRmwXchg => 0xfe, 0x41, 4, "i32.atomic.rmw.xchg";
    I64AtomicRmwXchg => 0xfe, 0x42, 8, "i64.atomic.rmw.xchg";
    I32AtomicRmw8UXchg => 0xfe, 0x43, 1, "i32.atomic.rmw8_u.xchg";
    I32AtomicRmw16UXchg => 0xfe, 0x44, 2, "i32.atomic.rmw16_u.xchg";
    I64AtomicRmw8UXchg => 0xfe, 0x45, 1, "i64.atomic.rmw8_u.xchg";
    I64AtomicRmw16UXchg => 0xfe, 0x46, 2, "i64.atomic.rmw16_u.xchg";
    I64AtomicRmw32UXchg => 0xfe, 0x47, 4, "i64.atomic.rmw32_u.xchg";
    I32AtomicRmwCmpxchg => 0xfe, 0x48, 4, "i32.atomic.rmw.cmpxchg";
    I64AtomicRmwCmpxchg => 0xfe, 0x49, 8, "i64.atomic.rmw.cmpxchg";
    I32AtomicRmw8UCmpxchg => 0xfe, 0x4a, 1, "i32.atomic.rmw8_u.cmpxchg";
    I32AtomicRmw16UCmpxchg => 0xfe, 0x4b, 2, "i32.atomic.rmw16_u.cmpxchg";
    I64AtomicRmw8UCmpxchg => 0xfe, 0x4c, 1, "i64.atomic.rmw8_u.cmpxchg";
    I64AtomicRmw16UCmpxchg => 0xfe, 0x4d, 2, "i64.atomic.rmw16_u.cmpxchg";
    I64AtomicRmw32UCmpxchg => 0xfe, 0x4e, 4, "i64.atomic.rmw32_u.cmpxchg";
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single lowered instruction.
///
/// The payload is one 64-bit immediate, readable either whole (`v64`) or as
/// a pair of 32-bit halves (`v1`/`v2`), matching whichever form the opcode
/// was emitted with. Branch-family records hold their resolved target
/// opcode-vector index in `v1`; `End` holds `(stack_base, result_count)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OpcodeRec {
    pub opcode: Opcode,
    value: u64,
}

impl OpcodeRec {
    pub fn with_pair(opcode: Opcode, v1: u32, v2: u32) -> OpcodeRec {
        OpcodeRec {
            opcode,
            value: (v1 as u64) | ((v2 as u64) << 32),
        }
    }

    pub fn with_u64(opcode: Opcode, value: u64) -> OpcodeRec {
        OpcodeRec { opcode, value }
    }

    #[inline]
    pub fn v1(&self) -> u32 {
        self.value as u32
    }

    #[inline]
    pub fn v2(&self) -> u32 {
        (self.value >> 32) as u32
    }

    #[inline]
    pub fn v64(&self) -> u64 {
        self.value
    }

    pub fn set_v1(&mut self, v1: u32) {
        self.value = (self.value & !0xffff_ffff) | (v1 as u64);
    }
}

impl fmt::Debug for OpcodeRec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.opcode.name(), self.v1(), self.v2())
    }
}
