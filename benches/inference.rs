use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use kyrolog::runtime::{KyroRuntime, RuntimeConfig};
use kyrolog::{Atom, EngineConfig, KnowledgeBase, KyroIR, Term};

fn atom(functor: &str, args: Vec<Term>) -> Atom {
    Atom::new(functor, args).unwrap()
}

fn person(i: usize) -> Term {
    Term::constant(format!("p{i}"))
}

/// A parent chain `p0 → p1 → … → p{len}` with the usual ancestor rules.
fn ancestor_chain(len: usize) -> KnowledgeBase {
    let kb = KnowledgeBase::new(EngineConfig::default().with_audit_after_write(false)).unwrap();
    kb.batch(|w| {
        for i in 0..len {
            w.fact(atom("Parent", vec![person(i), person(i + 1)]), Some("registry"), 1.0)?;
        }
        let (x, y, z) = (Term::var("X"), Term::var("Y"), Term::var("Z"));
        w.rule(
            vec![atom("Parent", vec![x.clone(), y.clone()])],
            atom("Ancestor", vec![x.clone(), y.clone()]),
            None,
            1.0,
        )?;
        w.rule(
            vec![
                atom("Parent", vec![x.clone(), z.clone()]),
                atom("Ancestor", vec![z, y.clone()]),
            ],
            atom("Ancestor", vec![x, y]),
            None,
            1.0,
        )?;
        Ok(())
    })
    .unwrap();
    kb
}

fn bench_backward_chaining(c: &mut Criterion) {
    let mut group = c.benchmark_group("inference/backward");
    group.throughput(Throughput::Elements(1));

    let kb = ancestor_chain(64);
    group.bench_function("ancestors_of_p0_chain_64", |b| {
        let goal = atom("Ancestor", vec![person(0), Term::var("Y")]);
        b.iter(|| kb.prove_all(vec![goal.clone()]).unwrap().count());
    });

    group.bench_function("first_answer_chain_64", |b| {
        let goal = atom("Ancestor", vec![Term::var("X"), person(64)]);
        b.iter(|| kb.prove_all(vec![goal.clone()]).unwrap().next());
    });

    group.finish();
}

fn bench_default_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("inference/defaults");
    group.throughput(Throughput::Elements(1));

    group.bench_function("fresh_default_belief", |b| {
        b.iter_custom(|iters| {
            // Beliefs are cached, so each sample starts from a new base.
            let kb = KnowledgeBase::new(EngineConfig::default()).unwrap();
            let bird = |t: Term| atom("Bird", vec![t]);
            let flies = |t: Term| atom("Flies", vec![t]);
            kb.assert_default(vec![bird(Term::var("X"))], vec![flies(Term::var("X"))], flies(Term::var("X")), None, 0.9)
                .unwrap();
            for i in 0..iters {
                kb.assert_fact(bird(person(i as usize)), None, 1.0).unwrap();
            }

            let start = Instant::now();
            for i in 0..iters {
                let _ = kb.prove_default(flies(person(i as usize))).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_audit(c: &mut Criterion) {
    let mut group = c.benchmark_group("inference/audit");
    group.throughput(Throughput::Elements(128));

    group.bench_function("resolve_128_contradictions", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let kb = KnowledgeBase::new(EngineConfig::default().with_audit_after_write(false)).unwrap();
                kb.batch(|w| {
                    for i in 0..128 {
                        let p = atom("Active", vec![person(i)]);
                        w.fact(p.negate(), Some("audit log"), 0.9)?;
                        w.fact(p, Some("heartbeat"), 0.4)?;
                    }
                    Ok(())
                })
                .unwrap();

                let start = Instant::now();
                black_box(kb.audit().unwrap());
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

fn bench_runtime_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime");
    group.throughput(Throughput::Elements(1));

    let runtime = KyroRuntime::new(ancestor_chain(16), RuntimeConfig::default()).unwrap();
    let ir = KyroIR::query(vec![atom("Ancestor", vec![person(0), Term::var("Y")])]);
    group.bench_function("reader_query_chain_16", |b| {
        b.iter(|| runtime.execute(ir.clone()).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_backward_chaining,
    bench_default_derivation,
    bench_audit,
    bench_runtime_query
);
criterion_main!(benches);
