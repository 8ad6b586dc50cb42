//! Flow table lookup benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flowpath::{Context, Flow, Key, Result, Table, TableKind};

fn noop(_table: &Table, _ctx: &mut Context<'_>) -> Result<()> {
    Ok(())
}

fn bench_exact_find(c: &mut Criterion) {
    let table = Table::new(0, TableKind::Exact, 4096, 4).unwrap();
    for i in 0u32..4096 {
        table
            .insert(Key::new(&i.to_be_bytes()).unwrap(), Flow::from_fn(noop))
            .unwrap();
    }

    let hit = Key::new(&42u32.to_be_bytes()).unwrap();
    c.bench_function("exact_find_hit", |b| {
        b.iter(|| black_box(table.find(black_box(&hit))))
    });

    let miss = Key::new(&0xFFFF_FFFFu32.to_be_bytes()).unwrap();
    c.bench_function("exact_find_miss", |b| {
        b.iter(|| black_box(table.find(black_box(&miss))))
    });
}

fn bench_insert_erase(c: &mut Criterion) {
    let table = Table::new(0, TableKind::Exact, 4096, 4).unwrap();
    let key = Key::new(&[1, 2, 3, 4]).unwrap();

    c.bench_function("insert_then_erase", |b| {
        b.iter(|| {
            table
                .insert(black_box(key.clone()), Flow::from_fn(noop))
                .unwrap();
            table.erase(black_box(&key));
        })
    });
}

criterion_group!(benches, bench_exact_find, bench_insert_erase);
criterion_main!(benches);
