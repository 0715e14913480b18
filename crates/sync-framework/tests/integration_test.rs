use serde_json::json;
use std::sync::{Arc, Mutex};
use sync_framework::mock::{MockStore, MockTransport};
use sync_framework::store::MESSAGE_SERVICE_UNAVAILABLE;
use sync_framework::{
    Collection, CollectionEvent, FieldSpec, JsonStore, JsonStoreOptions, Method, Model, ModelEvent,
    ModelId, ModelSchema, Notify, Origin, RequestOutcome, SortKey, SortOrder, SyncError,
};

// --- Fixtures ---

fn counter_schema() -> Arc<ModelSchema> {
    ModelSchema::builder("counter")
        .field(FieldSpec::string("name"))
        .field(FieldSpec::number("count").with_default(json!(0)))
        .build()
}

fn record_model_events(model: &Model) -> Arc<Mutex<Vec<ModelEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    model.listen(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

fn count_changed(collection: &Collection) -> Arc<Mutex<usize>> {
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    collection.listen(move |event| {
        if matches!(event, CollectionEvent::Changed) {
            *sink.lock().unwrap() += 1;
        }
    });
    count
}

// --- Models ---

/// A fresh model holds defaults; each top-level write fires exactly one
/// update listing what changed.
#[test]
fn test_model_defaults_set_and_update() {
    let model = Model::new(counter_schema()).expect("Failed to create model");
    assert_eq!(model.snapshot().unwrap(), json!({"name": null, "count": 0}));

    let events = record_model_events(&model);

    model.set(&json!({"name": "x"}), Notify::Emit).unwrap();
    model.update(&json!({"count": 5}), Notify::Emit).unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ModelEvent::Updated {
                changed: vec!["name".to_string()],
                origin: Origin::Direct,
            },
            ModelEvent::Updated {
                changed: vec!["count".to_string()],
                origin: Origin::Direct,
            },
        ]
    );
    assert_eq!(model.snapshot().unwrap(), json!({"name": "x", "count": 5}));
}

/// Whatever was set can be read back.
#[test]
fn test_model_round_trip() {
    let model = Model::new(counter_schema()).unwrap();
    let values = json!({"id": "c-1", "name": "requests", "count": 12});
    model.set(&values, Notify::Emit).unwrap();

    let snapshot = model.snapshot().unwrap();
    for (key, value) in values.as_object().unwrap() {
        assert_eq!(&snapshot[key], value, "key {key}");
    }
}

#[test]
fn test_invalid_bulk_set_applies_nothing() {
    let model = Model::new(counter_schema()).unwrap();
    let events = record_model_events(&model);

    let result = model.set(&json!({"name": "ok", "count": "many"}), Notify::Emit);
    assert!(result.is_err());
    assert_eq!(model.get("name").unwrap(), json!(null));
    assert!(events.lock().unwrap().is_empty());
}

/// A replace that would reset a required field without a default fails
/// before the id or any other field moves.
#[test]
fn test_bulk_set_missing_required_field_applies_nothing() {
    let schema = ModelSchema::builder("quota")
        .field(FieldSpec::number("count"))
        .field(FieldSpec::string("name").required().with_default(json!("n")))
        .field(FieldSpec::string("label").required())
        .build();
    let model = Model::new(schema).unwrap();
    let events = record_model_events(&model);

    let result = model.set(&json!({"id": 7, "count": 1}), Notify::Emit);
    assert_eq!(result, Err(SyncError::NotNullable("label".into())));
    assert_eq!(model.get("count").unwrap(), json!(null));
    assert_eq!(model.id(), None);
    assert!(events.lock().unwrap().is_empty());

    model
        .set(&json!({"id": 7, "count": 1, "label": "gold"}), Notify::Emit)
        .unwrap();
    assert_eq!(model.id(), Some(ModelId::from(7)));
    assert_eq!(model.get("name").unwrap(), json!("n"));
    assert_eq!(events.lock().unwrap().len(), 1);
}

// --- Collections ---

#[test]
fn test_collection_add_collapses_on_id() {
    let collection = Collection::new(counter_schema());
    let first = collection
        .add_model(json!({"id": 7, "name": "a"}), Notify::Emit)
        .unwrap();
    assert!(collection
        .get_model_by_id(&ModelId::from(7))
        .unwrap()
        .ptr_eq(&first));

    let second = collection
        .add_model(json!({"id": 7, "name": "b"}), Notify::Emit)
        .unwrap();
    assert!(second.ptr_eq(&first));
    assert_eq!(collection.len(), 1);
    assert_eq!(first.get("name").unwrap(), json!("b"));
}

/// Reconciling against a shorter listing disposes what vanished and updates
/// the survivors in place.
#[test]
fn test_collection_set_reconciles() {
    let collection = Collection::new(counter_schema());
    collection
        .set(
            vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})],
            Notify::Emit,
        )
        .unwrap();
    let one = collection.get_model_by_id(&ModelId::from(1)).unwrap();
    let two = collection.get_model_by_id(&ModelId::from(2)).unwrap();

    collection
        .set(vec![json!({"id": 1, "name": "a2"})], Notify::Emit)
        .unwrap();

    assert_eq!(collection.len(), 1);
    assert!(two.is_disposed());
    let survivor = collection.get_model_by_id(&ModelId::from(1)).unwrap();
    assert!(survivor.ptr_eq(&one));
    assert_eq!(one.get("name").unwrap(), json!("a2"));
}

#[test]
fn test_collection_set_twice_is_quiet() {
    let collection = Collection::new(counter_schema());
    let listing = vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})];
    collection.set(listing.clone(), Notify::Emit).unwrap();

    let changed = count_changed(&collection);
    assert!(!collection.set(listing, Notify::Emit).unwrap());
    assert_eq!(*changed.lock().unwrap(), 0);
}

#[test]
fn test_collection_update_never_removes() {
    let collection = Collection::new(counter_schema());
    collection
        .set(
            vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})],
            Notify::Emit,
        )
        .unwrap();

    collection
        .update(vec![json!({"id": 3, "name": "c"})], Notify::Emit)
        .unwrap();
    assert_eq!(collection.len(), 3);
}

#[test]
fn test_sort_twice_fires_once() {
    let collection = Collection::new(counter_schema());
    collection
        .set(
            vec![
                json!({"id": 1, "name": "c"}),
                json!({"id": 2, "name": "a"}),
                json!({"id": 3, "name": "b"}),
            ],
            Notify::Emit,
        )
        .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    collection.listen(move |event| {
        let name = match event {
            CollectionEvent::Changed => "changed",
            CollectionEvent::Sorted => "sorted",
            _ => "other",
        };
        sink.lock().unwrap().push(name);
    });

    assert!(collection.sort(SortKey::property("name"), SortOrder::Ascending));
    assert!(!collection.sort(SortKey::property("name"), SortOrder::Ascending));
    assert_eq!(*events.lock().unwrap(), vec!["changed", "sorted"]);

    let names: Vec<_> = collection.map(|model| model.get("name").unwrap());
    assert_eq!(names, vec![json!("a"), json!("b"), json!("c")]);
}

/// A bad id anywhere in the listing rejects the whole reconcile.
#[test]
fn test_collection_set_with_invalid_id_applies_nothing() {
    let collection = Collection::new(counter_schema());
    collection
        .set(vec![json!({"id": 1}), json!({"id": 2})], Notify::Emit)
        .unwrap();
    let changed = count_changed(&collection);

    let result = collection.set(
        vec![json!({"id": 3, "count": 3}), json!({"id": true, "count": 4})],
        Notify::Emit,
    );
    assert!(matches!(result, Err(SyncError::InvalidInput(_))));
    assert_eq!(collection.len(), 2);
    assert!(collection.get_model_by_id(&ModelId::from(1)).is_some());
    assert!(collection.get_model_by_id(&ModelId::from(3)).is_none());
    assert_eq!(*changed.lock().unwrap(), 0);
}

// --- Stores ---

/// Records with unusable ids are skipped; the rest of the payload lands.
#[tokio::test]
async fn test_sync_payload_skips_records_with_invalid_ids() {
    let collection = Collection::new(counter_schema());
    let store = MockStore::named("counters");
    store.expect_fetch().return_sync(json!([
        {"id": 1, "name": "a"},
        {"id": true, "name": "b"},
        {"id": 2, "name": "c"}
    ]));
    collection.bind_store(Arc::new(store.clone())).unwrap();

    assert_eq!(collection.fetch(None).await.unwrap(), RequestOutcome::Synced);
    assert_eq!(collection.len(), 2);
    assert!(collection.get_model_by_id(&ModelId::from(2)).is_some());
    store.verify();
}

#[tokio::test]
async fn test_fetch_then_save_new_model_rekeys_collection() {
    let collection = Collection::new(counter_schema());
    let list_store = MockStore::named("counters");
    list_store
        .expect_fetch()
        .return_sync(json!([{"id": 1, "name": "a"}]));
    collection.bind_store(Arc::new(list_store.clone())).unwrap();
    collection.fetch(None).await.unwrap();

    let model_store = MockStore::named("counter");
    model_store
        .expect_save()
        .return_sync(json!({"id": 9, "name": "fresh", "count": 0}));
    let fresh = collection
        .add_model(json!({"name": "fresh"}), Notify::Emit)
        .unwrap();
    fresh.bind_store(Arc::new(model_store.clone())).unwrap();

    assert_eq!(fresh.save(None).await.unwrap(), RequestOutcome::Synced);
    assert_eq!(fresh.id(), Some(ModelId::from(9)));
    assert!(collection
        .get_model_by_id(&ModelId::from(9))
        .unwrap()
        .ptr_eq(&fresh));
    assert_eq!(model_store.saved(), vec![json!({"name": "fresh", "count": 0})]);

    list_store.verify();
    model_store.verify();
}

#[tokio::test]
async fn test_unavailable_error_uses_fixed_message() {
    let transport = MockTransport::new();
    transport
        .expect(Method::Get, "https://api/counters")
        .respond(503, json!({"serviceUnavailable": {"message": "nope"}}));
    let store = JsonStore::new(Arc::new(transport.clone()), "https://api/counters")
        .with_options(JsonStoreOptions::default());

    let collection = Collection::new(counter_schema());
    collection.bind_store(Arc::new(store)).unwrap();
    let outcome = collection.fetch(None).await.unwrap();

    let failure = outcome.failure().expect("expected an error outcome");
    assert_eq!(failure.status, 503);
    assert_eq!(failure.message(), MESSAGE_SERVICE_UNAVAILABLE);
    assert!(collection.has_error());
    assert!(!collection.is_loading());
    transport.verify();
}
