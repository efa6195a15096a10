#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use handlebars::Handlebars;

mod utils;

fn handlebars_benchmark(c: &mut Criterion) {
    let mut handlebars = Handlebars::new();
    handlebars
        .register_partial("signature", utils::SIGNATURE)
        .unwrap();
    handlebars
        .register_template_string("profile", utils::PROFILE)
        .unwrap();

    let contexts = utils::generate_random_contexts(100);

    utils::print_binary_size();

    let mut group = c.benchmark_group("Template Rendering");
    group.sample_size(50);

    group.bench_function("handlebars_render", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(handlebars.render("profile", context).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, handlebars_benchmark);
criterion_main!(benches);
