//! Query construction and in-process search benchmarks
//!
//! Run with: `cargo bench -p murmur-core`
//!
//! - Elasticsearch body construction for a fully populated search query
//! - Ranked search and cursor export over a 5000-document `MemoryIndex`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use murmur_core::search::{ExportQuery, MemoryIndex, SearchIndex, SearchQuery};
use serde_json::json;
use tokio::runtime::Runtime;

const DOCUMENTS: i64 = 5_000;

fn full_query() -> SearchQuery {
    SearchQuery {
        name: Some("community garden".to_string()),
        schema: Some("organizations".to_string()),
        last_updated: Some(1_700_000_000),
        lat: Some(52.52),
        lon: Some(13.40),
        range: Some("25km".to_string()),
        country: Some("DE".to_string()),
        tags: Some("food,garden".to_string()),
        page: 3,
        page_size: 50,
        ..SearchQuery::default()
    }
}

async fn seeded_index() -> MemoryIndex {
    let index = MemoryIndex::default();
    for i in 0..DOCUMENTS {
        let url = format!("https://node{}.example.org/profile.json", i);
        let doc = json!({
            "name": if i % 3 == 0 { "Community Garden" } else { "Neighbourhood Kitchen" },
            "profile_url": url,
            "last_updated": 1_700_000_000 + i,
            "status": "posted",
            "country": if i % 2 == 0 { "DE" } else { "FR" },
            "tags": ["food", format!("tag{}", i % 50)],
            "linked_schemas": ["organizations-v1.0.0"],
            "geolocation": { "lat": 52.0 + (i % 100) as f64 / 100.0, "lon": 13.0 + (i % 70) as f64 / 100.0 },
        });
        index
            .index_by_id(&format!("id-{}", i), &doc)
            .await
            .expect("memory index never fails");
    }
    index
}

fn bench_query_bodies(c: &mut Criterion) {
    let query = full_query();

    let mut group = c.benchmark_group("query_body");
    group.bench_function("search", |b| {
        b.iter(|| black_box(query.search_body("AUTO")))
    });
    group.bench_function("map", |b| b.iter(|| black_box(query.map_body("AUTO"))));
    group.finish();
}

/// Full scan and rank of the in-process index
fn bench_memory_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let index = rt.block_on(seeded_index());
    let query = SearchQuery {
        name: Some("garden".to_string()),
        tags: Some("food".to_string()),
        page_size: 30,
        ..SearchQuery::default()
    };

    let mut group = c.benchmark_group("memory_index");
    group.sample_size(20);
    group.bench_function("search_5000", |b| {
        b.iter(|| rt.block_on(async { black_box(index.search(&query).await.unwrap()) }))
    });
    group.bench_function("export_all_5000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut cursor = None;
                loop {
                    let page = index
                        .export(&ExportQuery {
                            page_size: 1_000,
                            search_after: cursor,
                            ..ExportQuery::default()
                        })
                        .await
                        .unwrap();
                    if page.result.is_empty() || page.sort.is_none() {
                        break;
                    }
                    cursor = page.sort;
                }
            })
        })
    });
    group.finish();
}

criterion_group!(benches, bench_query_bodies, bench_memory_search);
criterion_main!(benches);
