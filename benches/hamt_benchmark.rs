use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hamt::Hamt;

const WORD_COUNT: usize = 1000;

fn words() -> Vec<String> {
    (0..WORD_COUNT).map(|i| format!("word-{i}")).collect()
}

fn bench_ephemeral_set(c: &mut Criterion) {
    let words = words();
    c.bench_function("hamt_ephemeral_set_1000", |b| {
        b.iter(|| {
            let mut trie: Hamt<&str, usize> = Hamt::new();
            for (i, word) in words.iter().enumerate() {
                trie.set(word.as_str(), i).unwrap();
            }
            black_box(trie.len());
        });
    });
}

fn bench_get_hit(c: &mut Criterion) {
    let words = words();
    let mut trie: Hamt<&str, usize> = Hamt::new();
    for (i, word) in words.iter().enumerate() {
        trie.set(word.as_str(), i).unwrap();
    }
    c.bench_function("hamt_get_hit_1000", |b| {
        b.iter(|| {
            for word in &words {
                black_box(trie.get(&word.as_str()));
            }
        });
    });
}

fn bench_ephemeral_remove(c: &mut Criterion) {
    let words = words();
    c.bench_function("hamt_ephemeral_remove_1000", |b| {
        b.iter(|| {
            let mut trie: Hamt<&str, usize> = Hamt::new();
            for (i, word) in words.iter().enumerate() {
                trie.set(word.as_str(), i).unwrap();
            }
            for word in &words {
                black_box(trie.remove(&word.as_str()).unwrap());
            }
        });
    });
}

fn bench_persistent_set_chain(c: &mut Criterion) {
    let words = words();
    c.bench_function("hamt_persistent_pset_chain_1000", |b| {
        b.iter(|| {
            let mut trie: Hamt<&str, usize> = Hamt::new();
            for (i, word) in words.iter().enumerate() {
                trie = trie.pset(word.as_str(), i).unwrap();
            }
            black_box(trie.len());
        });
    });
}

fn bench_iterate(c: &mut Criterion) {
    let words = words();
    let mut trie: Hamt<&str, usize> = Hamt::new();
    for (i, word) in words.iter().enumerate() {
        trie.set(word.as_str(), i).unwrap();
    }
    c.bench_function("hamt_iterate_1000", |b| {
        b.iter(|| {
            for pair in trie.iter() {
                black_box(pair);
            }
        });
    });
}

criterion_group!(
    benches,
    bench_ephemeral_set,
    bench_get_hit,
    bench_ephemeral_remove,
    bench_persistent_set_chain,
    bench_iterate,
);
criterion_main!(benches);
