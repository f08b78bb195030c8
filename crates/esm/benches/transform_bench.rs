//! 🏎️ How fast does a document go from "scrolled" to "ready for _bulk"?
//!
//! Run with `cargo bench -p esm`. The numbers are per document, so multiply by
//! however many million you're about to migrate and then go make coffee.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Map, json};

use esm::MigrationConfig;
use esm::common::{BulkBatch, BulkEntry, ClusterVersionInfo, Document, WriteMode};
use esm::transforms::{EgressTransform, ElasticsearchBulk, FieldTransformer};

fn sample_document(n: usize) -> Document {
    let mut source = Map::new();
    source.insert("user".to_string(), json!(format!("user-{n}")));
    source.insert("message".to_string(), json!("the quick brown fox jumps over the lazy dog ".repeat(8)));
    source.insert("retweets".to_string(), json!(n * 3));
    source.insert(
        "geo".to_string(),
        json!({"lat": 52.37, "lon": 4.89, "tags": ["a", "b", "c"]}),
    );
    Document::new("tweets", source)
        .with_type("tweet")
        .with_id(n.to_string())
        .with_routing(format!("user-{}", n % 16))
}

fn field_transformer(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_transformer");
    group.throughput(Throughput::Elements(1));

    let passthrough = FieldTransformer::new(&MigrationConfig::default(), None);
    let busy = FieldTransformer::new(
        &MigrationConfig {
            fields: vec!["user".to_string(), "message".to_string(), "geo".to_string()],
            rename: vec![("user".to_string(), "author".to_string())],
            type_override: Some("_doc".to_string()),
            drop_routing: true,
            ..MigrationConfig::default()
        },
        Some("tweets-v2".to_string()),
    );
    let document = sample_document(42);

    group.bench_function("passthrough", |b| {
        b.iter(|| passthrough.apply(black_box(document.clone())))
    });
    group.bench_function("allow_list_rename_override", |b| {
        b.iter(|| busy.apply(black_box(document.clone())))
    });
    group.finish();
}

fn bulk_encoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_encoder");
    let document = sample_document(7);

    for version in ["5.6.16", "6.8.23", "7.17.0"] {
        let Some(target) = ClusterVersionInfo::parse(version) else {
            continue;
        };
        let encoder = ElasticsearchBulk::new(WriteMode::Create, target);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("encode", version), &document, |b, doc| {
            b.iter(|| encoder.transform_document(black_box(doc)))
        });
    }

    // -- 🧺 a whole 1000-document batch, admitted and rendered like a bulk worker would
    let Some(target) = ClusterVersionInfo::parse("7.17.0") else {
        return;
    };
    let encoder = ElasticsearchBulk::new(WriteMode::Index, target);
    let documents: Vec<Document> = (0..1_000).map(sample_document).collect();
    group.throughput(Throughput::Elements(documents.len() as u64));
    group.bench_function("batch_of_1000", |b| {
        b.iter(|| {
            let mut batch = BulkBatch::new(documents.len(), 5 * 1024 * 1024);
            for document in &documents {
                let Ok(encoded) = encoder.transform_document(document) else {
                    continue;
                };
                if !batch.fits(encoded.len()) {
                    break;
                }
                batch.push(BulkEntry {
                    document: document.clone(),
                    encoded,
                });
            }
            black_box(batch.render())
        })
    });
    group.finish();
}

criterion_group!(benches, field_transformer, bulk_encoder);
criterion_main!(benches);
