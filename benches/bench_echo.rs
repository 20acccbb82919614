#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    reason = "benchmark"
)]

use std::{hint::black_box, sync::Arc};

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use echo_prompt::{AiJudge, Context, Echo, EchoConfig, OperatorError, Template, parse};
use futures::executor::block_on;
use serde_json::Value;

mod utils;

/// Answers instantly, so the benchmark measures the engine rather than a
/// model round trip.
struct KeywordJudge;

#[async_trait]
impl AiJudge for KeywordJudge {
    async fn judge(&self, value: &Value, _question: &str) -> Result<bool, OperatorError> {
        Ok(value.as_str().is_some_and(|text| text.contains("refund")))
    }
}

fn echo_benchmark(c: &mut Criterion) {
    let engine = Echo::new()
        .with_ai_judge(Arc::new(KeywordJudge))
        .with_config(EchoConfig::default().trim(true).collapse_newlines(true));

    // Load the template from file
    let source = include_str!("support_prompt.echo");
    let template = Template::parse(source).unwrap();

    // Generate 100 random contexts
    let contexts: Vec<Context> = utils::generate_random_contexts(100)
        .into_iter()
        .map(|json| Context::from_value(json).unwrap())
        .collect();

    let mut group = c.benchmark_group("Template Rendering");
    group.sample_size(50);

    group.bench_function("echo_parse", |b| {
        b.iter(|| black_box(parse(black_box(source))));
    });

    group.bench_function("echo_render", |b| {
        b.iter(|| {
            for context in &contexts {
                black_box(block_on(engine.render_template(&template, context)).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, echo_benchmark);
criterion_main!(benches);
