use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indoc::indoc;
use mreplace::{edit_distance, replace, BlockAnchorMatcher, Matcher};

// --- Similarity Benchmarks ---

fn similarity_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Similarity");

    group.bench_function("edit_distance_short_lines", |b| {
        b.iter(|| {
            edit_distance(
                black_box("    let value = compute_something(input);"),
                black_box("    let value = compute_something_else(input, extra);"),
            )
        })
    });

    group.finish();
}

// --- Replacing Benchmarks ---

/// Helper struct to keep the setup for each benchmark together.
struct ReplaceBenchSetup {
    content: String,
    old: String,
    new: String,
}

fn replacing_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Replacing");

    // --- Benchmark 1: Exact match on a large document ---
    let mut large_content = String::new();
    for i in 0..10000 {
        large_content.push_str(&format!("This is line number {}\n", i));
    }
    let exact_setup = ReplaceBenchSetup {
        content: large_content.clone(),
        old: "This is line number 5000\nThis is line number 5001\n".to_string(),
        new: "THIS LINE WAS CHANGED\n".to_string(),
    };

    group.bench_function("exact_match_large_document", |b| {
        b.iter(|| {
            black_box(replace(
                black_box(&exact_setup.content),
                black_box(&exact_setup.old),
                black_box(&exact_setup.new),
                false,
            ))
        });
    });

    // --- Benchmark 2: Re-indented block on a large document ---
    let indented_setup = ReplaceBenchSetup {
        content: large_content
            .lines()
            .map(|l| format!("    {}\n", l))
            .collect(),
        old: "This is line number 5000\nThis is line number 5001".to_string(),
        new: "    CHANGED".to_string(),
    };

    group.bench_function("line_trimmed_large_document", |b| {
        b.iter(|| {
            black_box(replace(
                black_box(&indented_setup.content),
                black_box(&indented_setup.old),
                black_box(&indented_setup.new),
                false,
            ))
        });
    });

    // --- Benchmark 3: Many competing anchor blocks ---
    let block = indoc! {"
        fn duplicate() {
            let greeting = \"hello\";
            println!(\"{}\", greeting);
        }
    "};
    let competing_content = block.repeat(500);
    let competing_old = indoc! {"
        fn duplicate() {
            let greeting = \"goodbye\";
            println!(\"{}\", greeting);
        }
    "};

    group.bench_function("block_anchor_500_candidates", |b| {
        let matcher = BlockAnchorMatcher::default();
        b.iter(|| {
            black_box(matcher.find_candidates(
                black_box(&competing_content),
                black_box(competing_old),
            ))
        });
    });

    // --- Benchmark 4: Ambiguous pattern, full cascade ---
    group.bench_function("ambiguous_full_cascade", |b| {
        b.iter(|| {
            black_box(replace(
                black_box(&competing_content),
                black_box("println!"),
                black_box("eprintln!"),
                false,
            ))
        });
    });

    group.finish();
}

criterion_group!(benches, similarity_benches, replacing_benches);
criterion_main!(benches);
