//! Force dominance analysis benchmarks.
//!
//! Measures fixed-point convergence and full-pass cost over generated
//! closure shapes.
//!
//! Run with: cargo bench --bench force_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use hazec::ir::{ClosureVersion, InstrKind, Terminator, Ty};
use hazec::opt::{ForceDominance, ForceDominanceAnalysis};

/// A closure forcing each of `n` parameters in order.
fn generate_chain(n: usize) -> ClosureVersion {
    let mut cv = ClosureVersion::new("chain", n);
    let entry = cv.entry;
    let mut last = cv.push(entry, InstrKind::Const { value: 0 }, Ty::Value);
    for i in 0..n {
        let arg = cv.push(entry, InstrKind::LdArg { index: i }, Ty::Lazy);
        last = cv.push(
            entry,
            InstrKind::Force {
                arg,
                env: None,
                strict: false,
            },
            Ty::Value,
        );
    }
    cv.set_terminator(entry, Terminator::Return { value: last });
    cv
}

/// A ladder of diamonds, each arm forcing a fresh promise handle.
fn generate_diamonds(n: usize) -> ClosureVersion {
    let mut cv = ClosureVersion::new("diamonds", 0);
    let mut current = cv.entry;
    let env = cv.push(
        current,
        InstrKind::MkEnv {
            parent: None,
            values: vec![],
            stub: false,
            context: false,
        },
        Ty::Env,
    );
    for _ in 0..n {
        let pb = cv.new_block();
        cv.push(pb, InstrKind::LdFunctionEnv, Ty::Env);
        let c = cv.push(pb, InstrKind::Const { value: 1 }, Ty::Value);
        cv.set_terminator(pb, Terminator::Return { value: c });
        let prom = cv.new_promise(pb);

        let a = cv.push(
            current,
            InstrKind::MkArg {
                promise: prom,
                env,
                eager: None,
            },
            Ty::Lazy,
        );
        let cond = cv.push(current, InstrKind::Const { value: 1 }, Ty::Value);
        let left = cv.new_block();
        let right = cv.new_block();
        let join = cv.new_block();
        cv.set_terminator(
            current,
            Terminator::Branch {
                cond,
                on_true: left,
                on_false: right,
            },
        );
        cv.push(
            left,
            InstrKind::Force {
                arg: a,
                env: None,
                strict: false,
            },
            Ty::Value,
        );
        cv.set_terminator(left, Terminator::Goto { target: join });
        cv.set_terminator(right, Terminator::Goto { target: join });
        cv.push(
            join,
            InstrKind::Force {
                arg: a,
                env: None,
                strict: false,
            },
            Ty::Value,
        );
        current = join;
    }
    let ret = cv.push(current, InstrKind::Const { value: 0 }, Ty::Value);
    cv.set_terminator(current, Terminator::Return { value: ret });
    cv
}

fn bench_analysis_convergence(c: &mut Criterion) {
    let mut group = c.benchmark_group("analysis_convergence");
    for size in [10, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::new("chain", size), size, |b, &size| {
            let cv = generate_chain(size);
            b.iter(|| black_box(ForceDominanceAnalysis::run(&cv).result().clone()));
        });
        group.bench_with_input(BenchmarkId::new("diamonds", size), size, |b, &size| {
            let cv = generate_diamonds(size);
            b.iter(|| black_box(ForceDominanceAnalysis::run(&cv).result().clone()));
        });
    }
    group.finish();
}

fn bench_full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pass");
    for size in [10, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::new("chain", size), size, |b, &size| {
            b.iter(|| {
                let mut cv = generate_chain(size);
                ForceDominance::new().apply(&mut cv);
                black_box(cv.properties.is_eager)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_analysis_convergence, bench_full_pass);
criterion_main!(benches);
