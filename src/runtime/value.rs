//! Runtime value representation.
//!
//! A [`Value`] is a raw 64-bit cell. Floats are stored as their IEEE-754
//! bit patterns so that NaN payloads survive every operation that does not
//! arithmetically transform them (loads, stores, `select`, locals, globals,
//! `copysign`).

use crate::parser::module::ValueType;
use fhex::ToHex;
use std::fmt;

/// An untyped 64-bit value cell.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Value(u64);

impl Value {
    pub fn from_i32(v: i32) -> Value {
        Value(v as u32 as u64)
    }

    pub fn from_u32(v: u32) -> Value {
        Value(v as u64)
    }

    pub fn from_i64(v: i64) -> Value {
        Value(v as u64)
    }

    pub fn from_u64(v: u64) -> Value {
        Value(v)
    }

    pub fn from_f32(v: f32) -> Value {
        Value(v.to_bits() as u64)
    }

    pub fn from_f64(v: f64) -> Value {
        Value(v.to_bits())
    }

    pub fn from_f32_bits(bits: u32) -> Value {
        Value(bits as u64)
    }

    pub fn from_f64_bits(bits: u64) -> Value {
        Value(bits)
    }

    pub fn as_i32(&self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn as_u32(&self) -> u32 {
        self.0 as u32
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn f32_bits(&self) -> u32 {
        self.0 as u32
    }

    pub fn f64_bits(&self) -> u64 {
        self.0
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value(0x{:016x})", self.0)
    }
}

/// A value paired with its concrete type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue {
    pub value_type: ValueType,
    pub value: Value,
}

impl TypedValue {
    pub fn new(value_type: ValueType, value: Value) -> TypedValue {
        TypedValue { value_type, value }
    }

    pub fn i32(v: i32) -> TypedValue {
        TypedValue::new(ValueType::I32, Value::from_i32(v))
    }

    pub fn i64(v: i64) -> TypedValue {
        TypedValue::new(ValueType::I64, Value::from_i64(v))
    }

    pub fn f32(v: f32) -> TypedValue {
        TypedValue::new(ValueType::F32, Value::from_f32(v))
    }

    pub fn f64(v: f64) -> TypedValue {
        TypedValue::new(ValueType::F64, Value::from_f64(v))
    }

    pub fn f32_bits(bits: u32) -> TypedValue {
        TypedValue::new(ValueType::F32, Value::from_f32_bits(bits))
    }

    pub fn f64_bits(bits: u64) -> TypedValue {
        TypedValue::new(ValueType::F64, Value::from_f64_bits(bits))
    }

    /// Zero of the given type, used for local initialization.
    pub fn zero(value_type: ValueType) -> TypedValue {
        TypedValue::new(value_type, Value::default())
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type {
            ValueType::I32 => write!(f, "i32:{}", self.value.as_i32()),
            ValueType::I64 => write!(f, "i64:{}", self.value.as_i64()),
            ValueType::F32 => write!(f, "f32:{}", self.value.as_f32().to_hex()),
            ValueType::F64 => write!(f, "f64:{}", self.value.as_f64().to_hex()),
            other => write!(f, "{}", other),
        }
    }
}
