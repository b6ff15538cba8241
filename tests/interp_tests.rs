//! End-to-end execution tests: call protocol, trap semantics, control flow,
//! linking and host functions.

mod common;

use common::*;
use wazm::parser::module::ValueType;
use wazm::runtime::environment::{HostError, HostFunc};
use wazm::runtime::link::LinkError;
use wazm::runtime::{
    Environment, LinkingPolicy, LinkingThreadOptions, Runtime, Trap, TypedValue,
};

fn env_with(bytes: &[u8]) -> Environment {
    let mut env = Environment::new();
    env.load_module("m", bytes).expect("module should load");
    env
}

fn instantiate(env: &Environment) -> Runtime<'_> {
    Runtime::init(env, LinkingThreadOptions::default()).expect("linking should succeed")
}

fn call(
    rt: &mut Runtime<'_>,
    name: &str,
    args: Vec<TypedValue>,
) -> Result<Vec<TypedValue>, Trap> {
    let func = rt.get_export_func("m", name).expect("export should exist");
    let mut values = args;
    rt.call_safe(func, &mut values).map(|_| values)
}

// --- spec scenarios -------------------------------------------------------

#[test]
fn test_identity() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x0b]); // get_local 0
    b.export_func("id", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let r = call(&mut rt, "id", vec![TypedValue::i32(0x12345678)]).unwrap();
    assert_eq!(r.len(), 1);
    assert_eq!(r[0].value.as_i32(), 0x12345678);
}

#[test]
fn test_factorial_recursion() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    // if (i32.eqz n) { 1 } else { n * fact(n - 1) }
    let f = b.add_func(
        t,
        &[],
        &[
            0x20, 0x00, // get_local 0
            0x45, // i32.eqz
            0x04, 0x7f, // if i32
            0x41, 0x01, // i32.const 1
            0x05, // else
            0x20, 0x00, // get_local 0
            0x20, 0x00, // get_local 0
            0x41, 0x01, // i32.const 1
            0x6b, // i32.sub
            0x10, 0x00, // call 0
            0x6c, // i32.mul
            0x0b, // end
            0x0b, // end
        ],
    );
    b.export_func("fact", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let r = call(&mut rt, "fact", vec![TypedValue::i32(5)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 120);
    let r = call(&mut rt, "fact", vec![TypedValue::i32(0)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 1);
    let r = call(&mut rt, "fact", vec![TypedValue::i32(10)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 3628800);
}

#[test]
fn test_division_traps() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32, I32], &[I32]);
    let div = b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0x6d, 0x0b]); // i32.div_s
    let rem = b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0x6f, 0x0b]); // i32.rem_s
    b.export_func("div", div);
    b.export_func("rem", rem);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(
        call(&mut rt, "div", vec![TypedValue::i32(10), TypedValue::i32(0)]),
        Err(Trap::IntegerDivideByZero)
    );
    assert_eq!(
        call(
            &mut rt,
            "div",
            vec![TypedValue::i32(i32::MIN), TypedValue::i32(-1)]
        ),
        Err(Trap::IntegerOverflow)
    );
    let r = call(&mut rt, "div", vec![TypedValue::i32(7), TypedValue::i32(2)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 3);

    // MIN % -1 is 0, not a trap.
    let r = call(
        &mut rt,
        "rem",
        vec![TypedValue::i32(i32::MIN), TypedValue::i32(-1)],
    )
    .unwrap();
    assert_eq!(r[0].value.as_i32(), 0);
    assert_eq!(
        call(&mut rt, "rem", vec![TypedValue::i32(1), TypedValue::i32(0)]),
        Err(Trap::IntegerDivideByZero)
    );
}

#[test]
fn test_nan_canonicalization_on_add() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[F32, F32], &[F32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0x92, 0x0b]); // f32.add
    b.export_func("nan_add", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    // Signalling NaN + infinity must come back quiet.
    let r = call(
        &mut rt,
        "nan_add",
        vec![
            TypedValue::f32_bits(0x7f80_0001),
            TypedValue::f32_bits(0x7f80_0000),
        ],
    )
    .unwrap();
    let bits = r[0].value.f32_bits();
    assert_eq!(bits & 0x7fc0_0000, 0x7fc0_0000, "got 0x{:08x}", bits);
}

#[test]
fn test_memory_bounds() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    b.add_memory(1, None);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x28, 0x02, 0x00, 0x0b]); // i32.load
    b.export_func("load_at", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    // The last in-bounds 4-byte read.
    let r = call(&mut rt, "load_at", vec![TypedValue::i32(65532)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 0);
    assert_eq!(
        call(&mut rt, "load_at", vec![TypedValue::i32(65533)]),
        Err(Trap::MemoryAccessOutOfBounds)
    );
}

#[test]
fn test_call_indirect_dispatch() {
    let mut b = ModuleBuilder::new();
    let t_ii = b.add_type(&[I32], &[I32]);
    let t_dispatch = b.add_type(&[I32, I32], &[I32]);
    let t_void = b.add_type(&[], &[]);
    let add1 = b.add_func(t_ii, &[], &[0x20, 0x00, 0x41, 0x01, 0x6a, 0x0b]);
    let dbl = b.add_func(t_ii, &[], &[0x20, 0x00, 0x41, 0x02, 0x6c, 0x0b]);
    let noop = b.add_func(t_void, &[], &[0x0b]);
    // dispatch(key, x): x -> table[key]
    let dispatch = b.add_func(
        t_dispatch,
        &[],
        &body(&[&[0x20, 0x01, 0x20, 0x00, 0x11], &uleb(t_ii), &[0x00, 0x0b]]),
    );
    b.add_table(4, None);
    b.add_elem(0, &[add1, dbl, noop]);
    b.export_func("dispatch", dispatch);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let args = |key, x| vec![TypedValue::i32(key), TypedValue::i32(x)];
    assert_eq!(
        call(&mut rt, "dispatch", args(0, 5)).unwrap()[0].value.as_i32(),
        6
    );
    assert_eq!(
        call(&mut rt, "dispatch", args(1, 5)).unwrap()[0].value.as_i32(),
        10
    );
    assert_eq!(
        call(&mut rt, "dispatch", args(2, 5)),
        Err(Trap::IndirectCallSignatureMismatch)
    );
    assert_eq!(
        call(&mut rt, "dispatch", args(3, 5)),
        Err(Trap::UninitializedTableElement)
    );
    assert_eq!(
        call(&mut rt, "dispatch", args(9, 5)),
        Err(Trap::UndefinedTableIndex)
    );
}

// --- numeric edges --------------------------------------------------------

#[test]
fn test_trunc_traps_and_saturating_variant() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[F32], &[I32]);
    let trunc = b.add_func(t, &[], &[0x20, 0x00, 0xa8, 0x0b]); // i32.trunc_s/f32
    let sat = b.add_func(t, &[], &[0x20, 0x00, 0xfc, 0x00, 0x0b]); // i32.trunc_s:sat/f32
    b.export_func("trunc", trunc);
    b.export_func("sat", sat);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let inf = TypedValue::f32_bits(0x7f80_0000);
    let neg_inf = TypedValue::f32_bits(0xff80_0000);
    let nan = TypedValue::f32_bits(0x7fc0_0000);

    assert_eq!(call(&mut rt, "trunc", vec![inf]), Err(Trap::IntegerOverflow));
    assert_eq!(
        call(&mut rt, "trunc", vec![neg_inf]),
        Err(Trap::IntegerOverflow)
    );
    assert_eq!(
        call(&mut rt, "trunc", vec![nan]),
        Err(Trap::InvalidConversionToInteger)
    );
    let r = call(&mut rt, "trunc", vec![TypedValue::f32(-2.7)]).unwrap();
    assert_eq!(r[0].value.as_i32(), -2);

    assert_eq!(call(&mut rt, "sat", vec![inf]).unwrap()[0].value.as_i32(), i32::MAX);
    assert_eq!(
        call(&mut rt, "sat", vec![neg_inf]).unwrap()[0].value.as_i32(),
        i32::MIN
    );
    assert_eq!(call(&mut rt, "sat", vec![nan]).unwrap()[0].value.as_i32(), 0);
}

#[test]
fn test_wrap_extend_round_trip() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    // i32.wrap(i64.extend_s(x)) == x
    let f = b.add_func(t, &[], &[0x20, 0x00, 0xac, 0xa7, 0x0b]);
    b.export_func("roundtrip", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    for x in [0, 1, -1, i32::MIN, i32::MAX, 0x1234_5678] {
        let r = call(&mut rt, "roundtrip", vec![TypedValue::i32(x)]).unwrap();
        assert_eq!(r[0].value.as_i32(), x);
    }
}

#[test]
fn test_reinterpret_preserves_nan_payload() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[F32], &[F32]);
    // i32.reinterpret/f32 then f32.reinterpret/i32
    let f = b.add_func(t, &[], &[0x20, 0x00, 0xbc, 0xbe, 0x0b]);
    b.export_func("rr", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    for bits in [0x7f80_0001u32, 0xffc0_1234, 0x0000_0001, 0x8000_0000] {
        let r = call(&mut rt, "rr", vec![TypedValue::f32_bits(bits)]).unwrap();
        assert_eq!(r[0].value.f32_bits(), bits);
    }
}

#[test]
fn test_sign_extension_ops() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0xc0, 0x0b]); // i32.extend8_s
    b.export_func("ext8", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let r = call(&mut rt, "ext8", vec![TypedValue::i32(0x80)]).unwrap();
    assert_eq!(r[0].value.as_i32(), -128);
    let r = call(&mut rt, "ext8", vec![TypedValue::i32(0x7f)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 127);
}

// --- control flow ---------------------------------------------------------

#[test]
fn test_if_else_both_arms() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    // abs: if (x < 0) { 0 - x } else { x }
    let f = b.add_func(
        t,
        &[],
        &[
            0x20, 0x00, 0x41, 0x00, 0x48, // get_local 0; i32.const 0; i32.lt_s
            0x04, 0x7f, // if i32
            0x41, 0x00, 0x20, 0x00, 0x6b, // i32.const 0; get_local 0; i32.sub
            0x05, // else
            0x20, 0x00, // get_local 0
            0x0b, 0x0b,
        ],
    );
    b.export_func("abs", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "abs", vec![TypedValue::i32(-5)]).unwrap()[0].value.as_i32(), 5);
    assert_eq!(call(&mut rt, "abs", vec![TypedValue::i32(7)]).unwrap()[0].value.as_i32(), 7);
}

#[test]
fn test_br_out_of_then_arm() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    // block i32 { if (x) { i32.const 1; br 1 } i32.const 2 }
    let f = b.add_func(
        t,
        &[],
        &[
            0x02, 0x7f, // block i32
            0x20, 0x00, // get_local 0
            0x04, 0x40, // if void
            0x41, 0x01, // i32.const 1
            0x0c, 0x01, // br 1 (out of the block, past the else-less end)
            0x0b, // end if
            0x41, 0x02, // i32.const 2
            0x0b, // end block
            0x0b,
        ],
    );
    b.export_func("f", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![TypedValue::i32(1)]).unwrap()[0].value.as_i32(), 1);
    assert_eq!(call(&mut rt, "f", vec![TypedValue::i32(0)]).unwrap()[0].value.as_i32(), 2);
}

#[test]
fn test_loop_with_backedge() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    // sum 1..=n by counting n down into a local accumulator.
    let f = b.add_func(
        t,
        &[(1, I32)], // local 1: acc
        &[
            0x02, 0x40, // block
            0x03, 0x40, // loop
            0x20, 0x00, 0x45, // get_local 0; i32.eqz
            0x0d, 0x01, // br_if 1
            0x20, 0x01, 0x20, 0x00, 0x6a, 0x21, 0x01, // acc += n
            0x20, 0x00, 0x41, 0x01, 0x6b, 0x21, 0x00, // n -= 1
            0x0c, 0x00, // br 0 (back-edge)
            0x0b, // end loop
            0x0b, // end block
            0x20, 0x01, // get_local acc
            0x0b,
        ],
    );
    b.export_func("sum", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "sum", vec![TypedValue::i32(100)]).unwrap()[0].value.as_i32(), 5050);
    assert_eq!(call(&mut rt, "sum", vec![TypedValue::i32(0)]).unwrap()[0].value.as_i32(), 0);
    // Enough iterations to catch a back-edge that leaks stack slots.
    assert_eq!(
        call(&mut rt, "sum", vec![TypedValue::i32(100000)]).unwrap()[0].value.as_i32(),
        705082704 // sum wraps mod 2^32
    );
}

#[test]
fn test_br_table() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    let f = b.add_func(
        t,
        &[],
        &[
            0x02, 0x40, // block (2)
            0x02, 0x40, // block (1)
            0x02, 0x40, // block (0)
            0x20, 0x00, // get_local 0
            0x0e, 0x02, 0x00, 0x01, 0x02, // br_table [0 1] default 2
            0x0b, // end (0)
            0x41, 0x0a, 0x0f, // i32.const 10; return
            0x0b, // end (1)
            0x41, 0x14, 0x0f, // i32.const 20; return
            0x0b, // end (2)
            0x41, 0x1e, // i32.const 30
            0x0b,
        ],
    );
    b.export_func("pick", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "pick", vec![TypedValue::i32(0)]).unwrap()[0].value.as_i32(), 10);
    assert_eq!(call(&mut rt, "pick", vec![TypedValue::i32(1)]).unwrap()[0].value.as_i32(), 20);
    assert_eq!(call(&mut rt, "pick", vec![TypedValue::i32(2)]).unwrap()[0].value.as_i32(), 30);
    assert_eq!(call(&mut rt, "pick", vec![TypedValue::i32(-1)]).unwrap()[0].value.as_i32(), 30);
}

#[test]
fn test_block_result_via_br() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    let f = b.add_func(
        t,
        &[],
        &[
            0x02, 0x7f, // block i32
            0x41, 0x2a, // i32.const 42
            0x0c, 0x00, // br 0
            0x41, 0x07, // dead code after the branch
            0x0b, // end block
            0x0b,
        ],
    );
    b.export_func("f", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![]).unwrap()[0].value.as_i32(), 42);
}

#[test]
fn test_select_preserves_bits() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[F32]);
    let f = b.add_func(
        t,
        &[],
        &body(&[
            &[0x43],
            &0x7f80_0001u32.to_le_bytes(), // f32.const sNaN #1
            &[0x43],
            &0x7fc0_5555u32.to_le_bytes(), // f32.const NaN #2
            &[0x20, 0x00, 0x1b, 0x0b],     // get_local 0; select
        ]),
    );
    b.export_func("sel", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let r = call(&mut rt, "sel", vec![TypedValue::i32(1)]).unwrap();
    assert_eq!(r[0].value.f32_bits(), 0x7f80_0001);
    let r = call(&mut rt, "sel", vec![TypedValue::i32(0)]).unwrap();
    assert_eq!(r[0].value.f32_bits(), 0x7fc0_5555);
}

#[test]
fn test_unreachable_traps() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    let f = b.add_func(t, &[], &[0x00, 0x0b]);
    b.export_func("f", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![]), Err(Trap::Unreachable));
}

// --- memory ---------------------------------------------------------------

#[test]
fn test_grow_memory() {
    let mut b = ModuleBuilder::new();
    let t_grow = b.add_type(&[I32], &[I32]);
    let t_size = b.add_type(&[], &[I32]);
    b.add_memory(1, Some(2));
    let grow = b.add_func(t_grow, &[], &[0x20, 0x00, 0x40, 0x00, 0x0b]);
    let size = b.add_func(t_size, &[], &[0x3f, 0x00, 0x0b]);
    b.export_func("grow", grow);
    b.export_func("size", size);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "size", vec![]).unwrap()[0].value.as_i32(), 1);
    assert_eq!(call(&mut rt, "grow", vec![TypedValue::i32(1)]).unwrap()[0].value.as_i32(), 1);
    // Past the declared max: -1, memory unchanged.
    assert_eq!(call(&mut rt, "grow", vec![TypedValue::i32(1)]).unwrap()[0].value.as_i32(), -1);
    assert_eq!(call(&mut rt, "size", vec![]).unwrap()[0].value.as_i32(), 2);
}

#[test]
fn test_data_segment_and_loads() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    b.add_memory(1, None);
    b.add_data(16, b"hi");
    let load8 = b.add_func(t, &[], &[0x20, 0x00, 0x2d, 0x00, 0x00, 0x0b]); // i32.load8_u
    b.export_func("load8", load8);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(
        call(&mut rt, "load8", vec![TypedValue::i32(16)]).unwrap()[0].value.as_i32(),
        b'h' as i32
    );
    assert_eq!(
        call(&mut rt, "load8", vec![TypedValue::i32(17)]).unwrap()[0].value.as_i32(),
        b'i' as i32
    );
    assert_eq!(call(&mut rt, "load8", vec![TypedValue::i32(18)]).unwrap()[0].value.as_i32(), 0);
}

#[test]
fn test_store_load_round_trip() {
    let mut b = ModuleBuilder::new();
    let t_store = b.add_type(&[I32, I64], &[]);
    let t_load = b.add_type(&[I32], &[I64]);
    b.add_memory(1, None);
    let store = b.add_func(t_store, &[], &[0x20, 0x00, 0x20, 0x01, 0x37, 0x03, 0x00, 0x0b]);
    let load = b.add_func(t_load, &[], &[0x20, 0x00, 0x29, 0x03, 0x00, 0x0b]);
    b.export_func("store", store);
    b.export_func("load", load);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    call(
        &mut rt,
        "store",
        vec![TypedValue::i32(8), TypedValue::i64(-0x1234_5678_9abc_def0)],
    )
    .unwrap();
    let r = call(&mut rt, "load", vec![TypedValue::i32(8)]).unwrap();
    assert_eq!(r[0].value.as_i64(), -0x1234_5678_9abc_def0);
}

// --- globals --------------------------------------------------------------

#[test]
fn test_globals() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    let g = b.add_global(I32, true, &[0x41, 0x0a]); // i32.const 10
    b.export_global("g", g);
    let get = b.add_func(t, &[], &[0x23, 0x00, 0x0b]);
    let inc = b.add_func(t, &[], &[0x23, 0x00, 0x41, 0x01, 0x6a, 0x24, 0x00, 0x23, 0x00, 0x0b]);
    b.export_func("get", get);
    b.export_func("inc", inc);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "get", vec![]).unwrap()[0].value.as_i32(), 10);
    assert_eq!(call(&mut rt, "inc", vec![]).unwrap()[0].value.as_i32(), 11);
    assert_eq!(rt.get_global("m", "g").unwrap().value.as_i32(), 11);

    assert!(rt.set_global("m", "g", wazm::runtime::Value::from_i32(99)));
    assert_eq!(call(&mut rt, "get", vec![]).unwrap()[0].value.as_i32(), 99);
    assert!(!rt.set_global("m", "missing", wazm::runtime::Value::from_i32(0)));
}

#[test]
fn test_global_import_and_init_expr() {
    let mut env = Environment::new();
    env.make_host_module("host")
        .add_global("base", TypedValue::i32(42), false);

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.import_global("host", "base", I32, false);
    // Defined global initialized from the imported one.
    let derived = b.add_global(I32, false, &[0x23, 0x00]);
    b.export_global("derived", derived + 1); // global index space: import is 0
    let read = b.add_func(t, &[], &[0x23, 0x00, 0x0b]);
    b.export_func("read", read);
    env.load_module("m", &b.build()).unwrap();
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "read", vec![]).unwrap()[0].value.as_i32(), 42);
    assert_eq!(rt.get_global("m", "derived").unwrap().value.as_i32(), 42);
}

#[test]
fn test_mutable_global_import_rejected() {
    let mut env = Environment::new();
    env.make_host_module("host")
        .add_global("g", TypedValue::i32(1), true);

    let mut b = ModuleBuilder::new();
    b.import_global("host", "g", I32, true);
    env.load_module("m", &b.build()).unwrap();

    match Runtime::init(&env, LinkingThreadOptions::default()) {
        Err(LinkError::MutableGlobalImport { .. }) => {}
        other => panic!("expected MutableGlobalImport, got {:?}", other.err()),
    }
}

// --- host functions -------------------------------------------------------

#[test]
fn test_host_function_call() {
    let mut env = Environment::new();
    env.make_host_module("host").add_func(
        "add1",
        vec![ValueType::I32],
        vec![ValueType::I32],
        Box::new(|_, args| Ok(vec![TypedValue::i32(args[0].value.as_i32() + 1)])),
    );

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    b.import_func("host", "add1", t);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x10, 0x00, 0x0b]);
    b.export_func("call_it", f);
    env.load_module("m", &b.build()).unwrap();
    let mut rt = instantiate(&env);

    let r = call(&mut rt, "call_it", vec![TypedValue::i32(41)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 42);

    // Host exports are directly callable too.
    let add1 = rt.get_export_func("host", "add1").unwrap();
    let mut values = vec![TypedValue::i32(1)];
    assert!(rt.call_safe(add1, &mut values).is_ok());
    assert_eq!(values[0].value.as_i32(), 2);
}

#[test]
fn test_host_function_trap() {
    let mut env = Environment::new();
    env.make_host_module("host").add_func(
        "boom",
        vec![],
        vec![],
        Box::new(|_, _| Err(HostError("nope".to_string()))),
    );

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.import_func("host", "boom", t);
    let f = b.add_func(t, &[], &[0x10, 0x00, 0x0b]);
    b.export_func("f", f);
    env.load_module("m", &b.build()).unwrap();
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![]), Err(Trap::HostTrapped));
}

#[test]
fn test_host_result_type_mismatch() {
    let mut env = Environment::new();
    env.make_host_module("host").add_func(
        "bad",
        vec![],
        vec![ValueType::I32],
        Box::new(|_, _| Ok(vec![TypedValue::f32(1.0)])),
    );

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.import_func("host", "bad", t);
    let f = b.add_func(t, &[], &[0x10, 0x00, 0x0b]);
    b.export_func("f", f);
    env.load_module("m", &b.build()).unwrap();
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![]), Err(Trap::HostResultTypeMismatch));
}

#[test]
fn test_linking_policy_fills_missing_host_import() {
    let mut env = Environment::new();
    env.make_host_module("host");

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.import_func("host", "mystery", t);
    let f = b.add_func(t, &[], &[0x10, 0x00, 0x0b]);
    b.export_func("f", f);
    env.load_module("m", &b.build()).unwrap();

    let options = LinkingThreadOptions {
        policy: LinkingPolicy {
            func: Some(Box::new(|import, sig| {
                Some(HostFunc {
                    name: import.field.clone(),
                    sig: sig.clone(),
                    callback: Box::new(|_, _| Ok(vec![TypedValue::i32(7)])),
                })
            })),
            ..LinkingPolicy::default()
        },
        ..LinkingThreadOptions::default()
    };
    let mut rt = Runtime::init(&env, options).unwrap();
    assert_eq!(call(&mut rt, "f", vec![]).unwrap()[0].value.as_i32(), 7);
}

#[test]
fn test_unresolved_host_import_without_policy() {
    let mut env = Environment::new();
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    b.import_func("env", "missing", t);
    env.load_module("m", &b.build()).unwrap();

    match Runtime::init(&env, LinkingThreadOptions::default()) {
        Err(LinkError::UnknownImport { .. }) => {}
        other => panic!("expected UnknownImport, got {:?}", other.err()),
    }
}

// --- cross-module linking -------------------------------------------------

#[test]
fn test_cross_module_call_chain_with_computation() {
    let mut env = Environment::new();

    // zcore: get() -> 10
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    let f = b.add_func(t, &[], &[0x41, 0x0a, 0x0b]);
    b.export_func("get", f);
    env.load_module("zcore", &b.build()).unwrap();

    // binner: imports zcore.get, adds 100, exports get2; also re-exports
    // the import directly.
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    let imported = b.import_func("zcore", "get", t);
    let f = b.add_func(
        t,
        &[],
        &body(&[&[0x10, 0x00, 0x41], &sleb32(100), &[0x6a, 0x0b]]),
    );
    b.export_func("get2", f);
    b.export_func("reexport", imported);
    env.load_module("binner", &b.build()).unwrap();

    // aouter: imports binner.get2, adds 1000. Resolved before binner, so
    // the resolver has to chase the chain recursively.
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    b.import_func("binner", "get2", t);
    b.import_func("binner", "reexport", t);
    let run = b.add_func(
        t,
        &[],
        &body(&[&[0x10, 0x00, 0x41], &sleb32(1000), &[0x6a, 0x0b]]),
    );
    let via_reexport = b.add_func(t, &[], &[0x10, 0x01, 0x0b]);
    b.export_func("run", run);
    b.export_func("via_reexport", via_reexport);
    env.load_module("aouter", &b.build()).unwrap();

    let mut rt = instantiate(&env);
    let run = rt.get_export_func("aouter", "run").unwrap();
    let mut values = Vec::new();
    rt.call_safe(run, &mut values).unwrap();
    assert_eq!(values[0].value.as_i32(), 1110);

    let via = rt.get_export_func("aouter", "via_reexport").unwrap();
    let mut values = Vec::new();
    rt.call_safe(via, &mut values).unwrap();
    assert_eq!(values[0].value.as_i32(), 10);
}

#[test]
fn test_import_signature_mismatch() {
    let mut env = Environment::new();

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[I32]);
    let f = b.add_func(t, &[], &[0x41, 0x01, 0x0b]);
    b.export_func("f", f);
    env.load_module("a", &b.build()).unwrap();

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]); // wrong: () -> ()
    b.import_func("a", "f", t);
    env.load_module("buser", &b.build()).unwrap();

    match Runtime::init(&env, LinkingThreadOptions::default()) {
        Err(LinkError::SignatureMismatch { .. }) => {}
        other => panic!("expected SignatureMismatch, got {:?}", other.err()),
    }
}

#[test]
fn test_import_cycle_detected() {
    let mut env = Environment::new();

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    let imported = b.import_func("cyc2", "y", t);
    b.export_func("x", imported);
    env.load_module("cyc1", &b.build()).unwrap();

    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    let imported = b.import_func("cyc1", "x", t);
    b.export_func("y", imported);
    env.load_module("cyc2", &b.build()).unwrap();

    match Runtime::init(&env, LinkingThreadOptions::default()) {
        Err(LinkError::ImportCycle { .. }) => {}
        other => panic!("expected ImportCycle, got {:?}", other.err()),
    }
}

#[test]
fn test_memory_import_shares_and_raises_initial() {
    let mut env = Environment::new();

    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    b.add_data(0, b"shared");
    b.export_memory("mem", 0);
    env.load_module("prov", &b.build()).unwrap();

    let mut b = ModuleBuilder::new();
    let t_size = b.add_type(&[], &[I32]);
    let t_load = b.add_type(&[I32], &[I32]);
    // Importer requires 2 pages; the provider declared 1, which is raised.
    b.import_memory("prov", "mem", 2, None);
    let size = b.add_func(t_size, &[], &[0x3f, 0x00, 0x0b]);
    let load8 = b.add_func(t_load, &[], &[0x20, 0x00, 0x2d, 0x00, 0x00, 0x0b]);
    b.export_func("size", size);
    b.export_func("load8", load8);
    env.load_module("user", &b.build()).unwrap();

    let mut rt = Runtime::init(&env, LinkingThreadOptions::default()).unwrap();
    let size = rt.get_export_func("user", "size").unwrap();
    let mut values = Vec::new();
    rt.call_safe(size, &mut values).unwrap();
    assert_eq!(values[0].value.as_i32(), 2);

    let load8 = rt.get_export_func("user", "load8").unwrap();
    let mut values = vec![TypedValue::i32(0)];
    rt.call_safe(load8, &mut values).unwrap();
    assert_eq!(values[0].value.as_i32(), b's' as i32);
}

#[test]
fn test_elem_segment_overflow_rejected() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    let f = b.add_func(t, &[], &[0x0b]);
    b.add_table(1, None);
    b.add_elem(1, &[f]); // one past the end
    let mut env = Environment::new();
    env.load_module("m", &b.build()).unwrap();

    match Runtime::init(&env, LinkingThreadOptions::default()) {
        Err(LinkError::ElemSegmentOutOfBounds { .. }) => {}
        other => panic!("expected ElemSegmentOutOfBounds, got {:?}", other.err()),
    }
}

#[test]
fn test_data_segment_overflow_rejected() {
    let mut b = ModuleBuilder::new();
    b.add_memory(1, None);
    b.add_data(65535, &[1, 2]);
    let mut env = Environment::new();
    env.load_module("m", &b.build()).unwrap();

    match Runtime::init(&env, LinkingThreadOptions::default()) {
        Err(LinkError::DataSegmentOutOfBounds { .. }) => {}
        other => panic!("expected DataSegmentOutOfBounds, got {:?}", other.err()),
    }
}

// --- call surface ---------------------------------------------------------

#[test]
fn test_argument_type_mismatch() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x0b]);
    b.export_func("id", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    // Wrong count.
    assert_eq!(call(&mut rt, "id", vec![]), Err(Trap::ArgumentTypeMismatch));
    // Wrong type.
    assert_eq!(
        call(&mut rt, "id", vec![TypedValue::f32(1.0)]),
        Err(Trap::ArgumentTypeMismatch)
    );
    assert!(rt.get_export_func("m", "nope").is_none());
}

#[test]
fn test_start_function() {
    let mut b = ModuleBuilder::new();
    let t_void = b.add_type(&[], &[]);
    let g = b.add_global(I32, true, &[0x41, 0x00]);
    b.export_global("flag", g);
    let start = b.add_func(t_void, &[], &[0x41, 0x01, 0x24, 0x00, 0x0b]);
    b.set_start(start);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    // Start invocation is the host's responsibility post-link.
    assert_eq!(rt.get_global("m", "flag").unwrap().value.as_i32(), 0);
    let start = rt.start_func("m").unwrap();
    let mut values = Vec::new();
    rt.call_safe(start, &mut values).unwrap();
    assert_eq!(rt.get_global("m", "flag").unwrap().value.as_i32(), 1);
}

#[test]
fn test_call_stack_exhaustion() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    let f = b.add_func(t, &[], &[0x10, 0x00, 0x0b]); // calls itself forever
    b.export_func("f", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![]), Err(Trap::CallStackExhausted));
}

#[test]
fn test_value_stack_exhaustion() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[], &[]);
    // Push 2000 constants, then drop them all; the default value stack
    // holds 1024.
    let mut code = Vec::new();
    for _ in 0..2000 {
        code.extend_from_slice(&[0x41, 0x00]);
    }
    for _ in 0..2000 {
        code.push(0x1a);
    }
    code.push(0x0b);
    let f = b.add_func(t, &[], &code);
    b.export_func("f", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(call(&mut rt, "f", vec![]), Err(Trap::ValueStackExhausted));
}

#[test]
fn test_runtime_usable_after_trap() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32, I32], &[I32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0x6d, 0x0b]);
    b.export_func("div", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(
        call(&mut rt, "div", vec![TypedValue::i32(1), TypedValue::i32(0)]),
        Err(Trap::IntegerDivideByZero)
    );
    let r = call(&mut rt, "div", vec![TypedValue::i32(9), TypedValue::i32(3)]).unwrap();
    assert_eq!(r[0].value.as_i32(), 3);
}

// --- atomics --------------------------------------------------------------

#[test]
fn test_atomic_rmw_add() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32, I32], &[I32]);
    b.add_memory(1, None);
    let f = b.add_func(
        t,
        &[],
        &[0x20, 0x00, 0x20, 0x01, 0xfe, 0x1e, 0x02, 0x00, 0x0b], // i32.atomic.rmw.add
    );
    b.export_func("aadd", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let args = |addr, v| vec![TypedValue::i32(addr), TypedValue::i32(v)];
    assert_eq!(call(&mut rt, "aadd", args(0, 5)).unwrap()[0].value.as_i32(), 0);
    assert_eq!(call(&mut rt, "aadd", args(0, 3)).unwrap()[0].value.as_i32(), 5);
    // Atomic accesses must be naturally aligned.
    assert_eq!(
        call(&mut rt, "aadd", args(2, 1)),
        Err(Trap::AtomicMemoryAccessUnaligned)
    );
}

#[test]
fn test_atomic_wait_is_reserved() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[I32], &[I32]);
    b.add_memory(1, None);
    let f = b.add_func(
        t,
        &[],
        &[
            0x20, 0x00, // get_local 0 (address)
            0x41, 0x00, // i32.const 0 (expected)
            0x42, 0x00, // i64.const 0 (timeout)
            0xfe, 0x01, 0x02, 0x00, // i32.atomic.wait
            0x0b,
        ],
    );
    b.export_func("wait", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    assert_eq!(
        call(&mut rt, "wait", vec![TypedValue::i32(0)]),
        Err(Trap::Unreachable)
    );
}

// --- float semantics end-to-end -------------------------------------------

#[test]
fn test_f32_min_signed_zero() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[F32, F32], &[F32]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0x96, 0x0b]); // f32.min
    b.export_func("min", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let r = call(
        &mut rt,
        "min",
        vec![TypedValue::f32(0.0), TypedValue::f32(-0.0)],
    )
    .unwrap();
    assert_eq!(r[0].value.f32_bits(), (-0.0f32).to_bits());
}

#[test]
fn test_f64_div_by_zero() {
    let mut b = ModuleBuilder::new();
    let t = b.add_type(&[F64, F64], &[F64]);
    let f = b.add_func(t, &[], &[0x20, 0x00, 0x20, 0x01, 0xa3, 0x0b]); // f64.div
    b.export_func("div", f);
    let env = env_with(&b.build());
    let mut rt = instantiate(&env);

    let r = call(
        &mut rt,
        "div",
        vec![TypedValue::f64(1.0), TypedValue::f64(0.0)],
    )
    .unwrap();
    assert_eq!(r[0].value.f64_bits(), 0x7ff0_0000_0000_0000);
    let r = call(
        &mut rt,
        "div",
        vec![TypedValue::f64(-1.0), TypedValue::f64(0.0)],
    )
    .unwrap();
    assert_eq!(r[0].value.f64_bits(), 0xfff0_0000_0000_0000);
    let r = call(
        &mut rt,
        "div",
        vec![TypedValue::f64(0.0), TypedValue::f64(0.0)],
    )
    .unwrap();
    assert_eq!(r[0].value.f64_bits(), 0x7ff8_0000_0000_0000);
}
