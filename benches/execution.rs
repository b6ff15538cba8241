//! Interpreter benchmarks: instruction dispatch, call overhead and decode
//! throughput.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use wazm::runtime::{Environment, LinkingThreadOptions, Runtime, TypedValue};

fn uleb(mut v: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Single-function module: magic, one type, one exported function.
fn module_with_func(params: &[u8], results: &[u8], locals: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    let mut types = vec![0x01, 0x60];
    types.extend(uleb(params.len() as u32));
    types.extend_from_slice(params);
    types.extend(uleb(results.len() as u32));
    types.extend_from_slice(results);
    out.push(1);
    out.extend(uleb(types.len() as u32));
    out.extend_from_slice(&types);

    out.extend_from_slice(&[3, 2, 1, 0]);
    out.extend_from_slice(&[7, 7, 1, 3, b'r', b'u', b'n', 0x00, 0x00]);

    let mut body = uleb(locals.len() as u32);
    for (count, value_type) in locals {
        body.extend(uleb(*count));
        body.push(*value_type);
    }
    body.extend_from_slice(code);
    let mut code_section = vec![0x01];
    code_section.extend(uleb(body.len() as u32));
    code_section.extend_from_slice(&body);
    out.push(10);
    out.extend(uleb(code_section.len() as u32));
    out.extend_from_slice(&code_section);
    out
}

/// run(n): loop counting n down to zero, returning the iteration count.
fn countdown_module() -> Vec<u8> {
    module_with_func(
        &[0x7f],
        &[0x7f],
        &[(1, 0x7f)],
        &[
            0x02, 0x40, // block
            0x03, 0x40, // loop
            0x20, 0x00, 0x45, // get_local 0; i32.eqz
            0x0d, 0x01, // br_if 1
            0x20, 0x01, 0x41, 0x01, 0x6a, 0x21, 0x01, // count += 1
            0x20, 0x00, 0x41, 0x01, 0x6b, 0x21, 0x00, // n -= 1
            0x0c, 0x00, // br 0
            0x0b, 0x0b, // end loop; end block
            0x20, 0x01, // get_local count
            0x0b,
        ],
    )
}

/// run(n): naive recursive fibonacci.
fn fib_module() -> Vec<u8> {
    module_with_func(
        &[0x7f],
        &[0x7f],
        &[],
        &[
            0x20, 0x00, 0x41, 0x02, 0x48, // n < 2
            0x04, 0x7f, // if i32
            0x20, 0x00, // n
            0x05, // else
            0x20, 0x00, 0x41, 0x01, 0x6b, 0x10, 0x00, // fib(n - 1)
            0x20, 0x00, 0x41, 0x02, 0x6b, 0x10, 0x00, // fib(n - 2)
            0x6a, // i32.add
            0x0b, 0x0b,
        ],
    )
}

fn run(rt: &mut Runtime<'_>, n: i32) -> i32 {
    let func = rt.get_export_func("bench", "run").expect("export");
    let mut values = vec![TypedValue::i32(n)];
    rt.call_safe(func, &mut values).expect("call should succeed");
    values[0].value.as_i32()
}

fn verify_modules() {
    let mut env = Environment::new();
    env.load_module("bench", &countdown_module()).unwrap();
    let mut rt = Runtime::init(&env, LinkingThreadOptions::default()).unwrap();
    assert_eq!(run(&mut rt, 1000), 1000);

    let mut env = Environment::new();
    env.load_module("bench", &fib_module()).unwrap();
    let mut rt = Runtime::init(&env, LinkingThreadOptions::default()).unwrap();
    assert_eq!(run(&mut rt, 10), 55);
    assert_eq!(run(&mut rt, 20), 6765);
}

fn bench_dispatch(c: &mut Criterion) {
    let bytes = countdown_module();
    let mut env = Environment::new();
    env.load_module("bench", &bytes).unwrap();

    let mut group = c.benchmark_group("dispatch");
    for iterations in [1_000, 10_000, 100_000] {
        group.bench_with_input(
            BenchmarkId::new("countdown", iterations),
            &iterations,
            |b, &n| {
                let mut rt = Runtime::init(&env, LinkingThreadOptions::default()).unwrap();
                b.iter(|| black_box(run(&mut rt, n)));
            },
        );
    }
    group.finish();
}

fn bench_call_overhead(c: &mut Criterion) {
    let bytes = fib_module();
    let mut env = Environment::new();
    env.load_module("bench", &bytes).unwrap();

    let mut group = c.benchmark_group("call_overhead");
    for n in [10, 15, 20] {
        group.bench_with_input(BenchmarkId::new("fib_recursive", n), &n, |b, &n| {
            let mut rt = Runtime::init(&env, LinkingThreadOptions::default()).unwrap();
            b.iter(|| black_box(run(&mut rt, n)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let bytes = fib_module();
    c.bench_function("decode/fib", |b| {
        b.iter(|| {
            let mut env = Environment::new();
            env.load_module("bench", black_box(&bytes)).map(|_| ()).unwrap();
        })
    });
}

fn verify_and_bench(c: &mut Criterion) {
    verify_modules();
    bench_dispatch(c);
    bench_call_overhead(c);
    bench_decode(c);
}

criterion_group!(benches, verify_and_bench);
criterion_main!(benches);
