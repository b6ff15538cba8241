//! Stack-polymorphic type checker for function bodies.
//!
//! Runs in lockstep with the lowering pass: every decoded instruction is
//! checked against the current type stack before it is emitted. Unreachable
//! code makes the stack polymorphic: the affected label is flagged, the
//! type stack is reset to the label's entry height, and queries below that
//! height answer [`ValueType::Any`] instead of failing.

use crate::parser::module::{Signature, ValueType};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("type mismatch in {context}: expected {expected}, got {actual}")]
    Mismatch {
        context: &'static str,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("type stack underflow in {0}")]
    Underflow(&'static str),
    #[error("invalid label depth {0}")]
    InvalidDepth(u32),
    #[error("type stack at end of {0} has {1} extra value(s)")]
    ExtraValues(&'static str, usize),
    #[error("else outside of if")]
    ElseOutsideIf,
    #[error("end with no open block")]
    EndOutsideBlock,
    #[error("if without else cannot have a result")]
    IfResultWithoutElse,
    #[error("select operands must have the same type: {0} vs {1}")]
    SelectMismatch(ValueType, ValueType),
    #[error("br_table targets have inconsistent result types")]
    BrTableMismatch,
}

/// Kind of structured block a label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug)]
struct Label {
    kind: LabelKind,
    results: Vec<ValueType>,
    /// Type-stack height at label entry.
    limit: usize,
    unreachable: bool,
}

#[derive(Debug, Default)]
pub struct TypeChecker {
    stack: Vec<ValueType>,
    labels: Vec<Label>,
}

impl TypeChecker {
    pub fn new() -> TypeChecker {
        TypeChecker::default()
    }

    /// Current operand-stack height, as the lowering pass records it in
    /// label records.
    pub fn stack_height(&self) -> usize {
        self.stack.len()
    }

    fn push_label(&mut self, kind: LabelKind, results: Vec<ValueType>) {
        self.labels.push(Label {
            kind,
            results,
            limit: self.stack.len(),
            unreachable: false,
        });
    }

    fn label(&self, depth: u32) -> Result<&Label, TypeError> {
        let len = self.labels.len();
        if (depth as usize) < len {
            Ok(&self.labels[len - 1 - depth as usize])
        } else {
            Err(TypeError::InvalidDepth(depth))
        }
    }

    /// Branch arity of a label: loops receive no values on a back-edge in
    /// Wasm 1.0, every other label receives its results.
    fn br_types(&self, depth: u32) -> Result<Vec<ValueType>, TypeError> {
        let label = self.label(depth)?;
        Ok(if label.kind == LabelKind::Loop {
            Vec::new()
        } else {
            label.results.clone()
        })
    }

    fn top_label(&mut self) -> Result<&mut Label, TypeError> {
        self.labels.last_mut().ok_or(TypeError::EndOutsideBlock)
    }

    fn set_unreachable(&mut self) -> Result<(), TypeError> {
        let label = self.top_label()?;
        label.unreachable = true;
        let limit = label.limit;
        self.stack.truncate(limit);
        Ok(())
    }

    fn check(
        context: &'static str,
        actual: ValueType,
        expected: ValueType,
    ) -> Result<(), TypeError> {
        if actual == expected || actual == ValueType::Any || expected == ValueType::Any {
            Ok(())
        } else {
            Err(TypeError::Mismatch {
                context,
                expected,
                actual,
            })
        }
    }

    fn peek(&self, depth: usize, context: &'static str) -> Result<ValueType, TypeError> {
        let label = self.labels.last().ok_or(TypeError::Underflow(context))?;
        let avail = self.stack.len() - label.limit;
        if depth < avail {
            Ok(self.stack[self.stack.len() - 1 - depth])
        } else if label.unreachable {
            Ok(ValueType::Any)
        } else {
            Err(TypeError::Underflow(context))
        }
    }

    fn pop_any(&mut self, context: &'static str) -> Result<ValueType, TypeError> {
        let label = self.labels.last().ok_or(TypeError::Underflow(context))?;
        if self.stack.len() > label.limit {
            Ok(self.stack.pop().unwrap_or(ValueType::Any))
        } else if label.unreachable {
            Ok(ValueType::Any)
        } else {
            Err(TypeError::Underflow(context))
        }
    }

    fn pop_and_check(
        &mut self,
        expected: ValueType,
        context: &'static str,
    ) -> Result<(), TypeError> {
        let actual = self.pop_any(context)?;
        Self::check(context, actual, expected)
    }

    fn push(&mut self, t: ValueType) {
        self.stack.push(t);
    }

    fn push_types(&mut self, types: &[ValueType]) {
        self.stack.extend_from_slice(types);
    }

    /// Peek-check the stack against `sig` without popping.
    fn check_signature(
        &self,
        sig: &[ValueType],
        context: &'static str,
    ) -> Result<(), TypeError> {
        for (i, expected) in sig.iter().rev().enumerate() {
            let actual = self.peek(i, context)?;
            Self::check(context, actual, *expected)?;
        }
        Ok(())
    }

    fn pop_and_check_signature(
        &mut self,
        sig: &[ValueType],
        context: &'static str,
    ) -> Result<(), TypeError> {
        for expected in sig.iter().rev() {
            self.pop_and_check(*expected, context)?;
        }
        Ok(())
    }

    fn check_stack_end(&self, context: &'static str) -> Result<(), TypeError> {
        let label = match self.labels.last() {
            Some(label) => label,
            None => return Ok(()),
        };
        if self.stack.len() != label.limit && !label.unreachable {
            return Err(TypeError::ExtraValues(
                context,
                self.stack.len() - label.limit,
            ));
        }
        Ok(())
    }

    // --- control ---------------------------------------------------------

    pub fn begin_function(&mut self, sig: &Signature) {
        self.stack.clear();
        self.labels.clear();
        self.push_label(LabelKind::Func, sig.results.clone());
    }

    pub fn on_block(&mut self, results: &[ValueType]) {
        self.push_label(LabelKind::Block, results.to_vec());
    }

    pub fn on_loop(&mut self, results: &[ValueType]) {
        self.push_label(LabelKind::Loop, results.to_vec());
    }

    pub fn on_if(&mut self, results: &[ValueType]) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "if")?;
        self.push_label(LabelKind::If, results.to_vec());
        Ok(())
    }

    pub fn on_else(&mut self) -> Result<(), TypeError> {
        let (kind, results, limit) = {
            let label = self.labels.last().ok_or(TypeError::ElseOutsideIf)?;
            (label.kind, label.results.clone(), label.limit)
        };
        if kind != LabelKind::If {
            return Err(TypeError::ElseOutsideIf);
        }
        self.pop_and_check_signature(&results, "if true branch")?;
        self.check_stack_end("if true branch")?;
        self.stack.truncate(limit);
        let label = self.top_label()?;
        label.kind = LabelKind::Else;
        label.unreachable = false;
        Ok(())
    }

    /// Close the innermost label. Returns its kind so the lowering pass can
    /// tell the function label from nested blocks.
    pub fn on_end(&mut self) -> Result<LabelKind, TypeError> {
        let (kind, results, limit) = {
            let label = self.labels.last().ok_or(TypeError::EndOutsideBlock)?;
            (label.kind, label.results.clone(), label.limit)
        };
        if kind == LabelKind::If && !results.is_empty() {
            return Err(TypeError::IfResultWithoutElse);
        }
        self.pop_and_check_signature(&results, "block end")?;
        self.check_stack_end("block end")?;
        self.stack.truncate(limit);
        self.labels.pop();
        self.push_types(&results);
        Ok(kind)
    }

    pub fn on_br(&mut self, depth: u32) -> Result<(), TypeError> {
        let types = self.br_types(depth)?;
        self.check_signature(&types, "br")?;
        self.set_unreachable()
    }

    pub fn on_br_if(&mut self, depth: u32) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "br_if")?;
        let types = self.br_types(depth)?;
        self.pop_and_check_signature(&types, "br_if")?;
        self.push_types(&types);
        Ok(())
    }

    /// Check a complete `br_table`: the key plus every target, which must
    /// all share one branch arity.
    pub fn on_br_table(&mut self, depths: &[u32]) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "br_table key")?;
        let mut expected: Option<Vec<ValueType>> = None;
        for &depth in depths {
            let types = self.br_types(depth)?;
            match &expected {
                None => {
                    self.check_signature(&types, "br_table")?;
                    expected = Some(types);
                }
                Some(e) => {
                    if *e != types {
                        return Err(TypeError::BrTableMismatch);
                    }
                }
            }
        }
        self.set_unreachable()
    }

    pub fn on_return(&mut self) -> Result<(), TypeError> {
        let results = self
            .labels
            .first()
            .map(|l| l.results.clone())
            .unwrap_or_default();
        self.pop_and_check_signature(&results, "return")?;
        self.set_unreachable()
    }

    pub fn on_unreachable(&mut self) -> Result<(), TypeError> {
        self.set_unreachable()
    }

    pub fn on_call(&mut self, sig: &Signature) -> Result<(), TypeError> {
        self.pop_and_check_signature(&sig.params, "call")?;
        self.push_types(&sig.results);
        Ok(())
    }

    pub fn on_call_indirect(&mut self, sig: &Signature) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "call_indirect key")?;
        self.pop_and_check_signature(&sig.params, "call_indirect")?;
        self.push_types(&sig.results);
        Ok(())
    }

    // --- parametric ------------------------------------------------------

    pub fn on_drop(&mut self) -> Result<(), TypeError> {
        self.pop_any("drop").map(|_| ())
    }

    pub fn on_select(&mut self) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "select")?;
        let t2 = self.pop_any("select")?;
        let t1 = self.pop_any("select")?;
        let result = if t1 == ValueType::Any {
            t2
        } else if t2 == ValueType::Any {
            t1
        } else if t1 == t2 {
            t1
        } else {
            return Err(TypeError::SelectMismatch(t1, t2));
        };
        self.push(result);
        Ok(())
    }

    // --- variables -------------------------------------------------------

    pub fn on_get_local(&mut self, t: ValueType) {
        self.push(t);
    }

    pub fn on_set_local(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "set_local")
    }

    pub fn on_tee_local(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "tee_local")?;
        self.push(t);
        Ok(())
    }

    pub fn on_get_global(&mut self, t: ValueType) {
        self.push(t);
    }

    pub fn on_set_global(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "set_global")
    }

    // --- memory ----------------------------------------------------------

    pub fn on_load(&mut self, result: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "load address")?;
        self.push(result);
        Ok(())
    }

    pub fn on_store(&mut self, operand: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(operand, "store value")?;
        self.pop_and_check(ValueType::I32, "store address")
    }

    pub fn on_current_memory(&mut self) {
        self.push(ValueType::I32);
    }

    pub fn on_grow_memory(&mut self) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "grow_memory")?;
        self.push(ValueType::I32);
        Ok(())
    }

    pub fn on_atomic_rmw(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "atomic rmw value")?;
        self.pop_and_check(ValueType::I32, "atomic rmw address")?;
        self.push(t);
        Ok(())
    }

    pub fn on_atomic_cmpxchg(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "atomic cmpxchg replacement")?;
        self.pop_and_check(t, "atomic cmpxchg expected")?;
        self.pop_and_check(ValueType::I32, "atomic cmpxchg address")?;
        self.push(t);
        Ok(())
    }

    pub fn on_atomic_wait(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I64, "atomic wait timeout")?;
        self.pop_and_check(t, "atomic wait expected")?;
        self.pop_and_check(ValueType::I32, "atomic wait address")?;
        self.push(ValueType::I32);
        Ok(())
    }

    pub fn on_atomic_wake(&mut self) -> Result<(), TypeError> {
        self.pop_and_check(ValueType::I32, "atomic wake count")?;
        self.pop_and_check(ValueType::I32, "atomic wake address")?;
        self.push(ValueType::I32);
        Ok(())
    }

    // --- numeric ---------------------------------------------------------

    pub fn on_const(&mut self, t: ValueType) {
        self.push(t);
    }

    pub fn on_unary(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "unary operand")?;
        self.push(t);
        Ok(())
    }

    pub fn on_binary(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "binary operand")?;
        self.pop_and_check(t, "binary operand")?;
        self.push(t);
        Ok(())
    }

    pub fn on_compare(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "compare operand")?;
        self.pop_and_check(t, "compare operand")?;
        self.push(ValueType::I32);
        Ok(())
    }

    pub fn on_test(&mut self, t: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(t, "test operand")?;
        self.push(ValueType::I32);
        Ok(())
    }

    pub fn on_convert(&mut self, result: ValueType, operand: ValueType) -> Result<(), TypeError> {
        self.pop_and_check(operand, "conversion operand")?;
        self.push(result);
        Ok(())
    }
}
