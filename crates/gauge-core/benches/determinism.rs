use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gauge_core::{compile, fingerprint, CategoryId, Engine, InMemoryStore, Mode, UserId};

const DECISION: &str = "\
w = get_weight_by_date(today)
waist = get_measurement_by_name_and_date('Waist', today)
print('weight', w, 'waist', waist)
decision = w is not None and waist is not None and w > 80 and waist < 90
";

const RESULTS: &str = "\
for m in get_measurements_by_category_name('Waist'):
    results.append({'date': m.date, 'value': round(m.value / 2.54, 2)})
print(len(results), 'rows')
";

fn store(today: NaiveDate) -> InMemoryStore {
    let mut store = InMemoryStore::new()
        .with_category(UserId(1), CategoryId(3), "Waist", "cm")
        .with_weight(UserId(1), today, 84.5);
    for offset in 0..60 {
        let date = today - chrono::Duration::days(offset);
        store = store.with_measurement(UserId(1), CategoryId(3), date, 80.0 + offset as f64 / 10.0);
    }
    store
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile.results", |b| {
        b.iter(|| compile(black_box(RESULTS), Mode::Results))
    });
    c.bench_function("fingerprint.results", |b| {
        b.iter(|| fingerprint(black_box(RESULTS)))
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let today = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
    let store = store(today);
    let engine = Engine::default();

    c.bench_function("engine.evaluate_decision", |b| {
        b.iter(|| engine.evaluate_decision(black_box(DECISION), &store, UserId(1), today))
    });
    c.bench_function("engine.compute_results", |b| {
        b.iter(|| engine.compute_results(black_box(RESULTS), CategoryId(3), &store, UserId(1)))
    });
}

criterion_group!(benches, bench_compile, bench_evaluate);
criterion_main!(benches);
