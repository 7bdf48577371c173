use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use document_store::{
    DocumentId, DocumentStore, DocumentStoreExt, InMemoryDocumentStore, SessionOptions,
};

fn saga_state(lines: usize) -> serde_json::Value {
    serde_json::json!({
        "id": "OrderProcessor/00000000-0000-0000-0000-000000000001",
        "state": {
            "messages": (0..lines).map(|i| format!("line-{i}")).collect::<Vec<_>>()
        }
    })
}

fn bench_store_and_flush(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("session/store_and_flush", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
                let mut session = store.open_session(SessionOptions::optimistic());
                session
                    .store(DocumentId::from_parts("OrderProcessor", 1), &saga_state(3))
                    .unwrap();
                session.save_changes().await.unwrap();
            });
        });
    });
}

fn bench_load_update_flush(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
    let id = DocumentId::from_parts("OrderProcessor", 1);

    rt.block_on(async {
        let mut session = store.open_session(SessionOptions::optimistic());
        session.store(id.clone(), &saga_state(10)).unwrap();
        session.save_changes().await.unwrap();
    });

    c.bench_function("session/load_update_flush", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut session = store.open_session(SessionOptions::optimistic());
                let state: Option<serde_json::Value> = session.load(&id).await.unwrap();
                session.store(id.clone(), &state).unwrap();
                session.save_changes().await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_store_and_flush, bench_load_update_flush);
criterion_main!(benches);
