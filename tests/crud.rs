use docbase_core::dbs::{CollectionConfig, Datastore, UpdateOptions};
use docbase_core::doc::{DefaultValue, FieldKind, FieldSpec, Id, Schema};
use docbase_core::err::Error;
use docbase_core::idx::{IndexDef, IndexOptions};
use serde_json::json;
use serial_test::serial;
use temp_dir::TempDir;

#[tokio::test]
async fn round_trip_preserves_the_document() {
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(CollectionConfig::new("docs")).await.unwrap();
	let doc = ds
		.insert("docs", json!({ "id": 1, "nested": { "a": [1, 2, { "b": true }] } }))
		.await
		.unwrap();
	let found = ds.find("docs", &json!({ "id": 1 })).unwrap();
	assert_eq!(found.len(), 1);
	assert_eq!(found[0], doc);
}

#[tokio::test]
async fn unique_index_on_update_is_atomic() {
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(
		CollectionConfig::new("users")
			.with_index(IndexDef::new("idx_email", "email", IndexOptions::unique())),
	)
	.await
	.unwrap();
	ds.insert("users", json!({ "id": 1, "email": "a" })).await.unwrap();
	ds.insert("users", json!({ "id": 2, "email": "b" })).await.unwrap();

	let err = ds
		.update("users", &json!({ "id": 2 }), &json!({ "email": "a" }), true)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::IndexKeyExists { .. }));
	// The stored document for id 2 still has its original email
	let doc = ds.find_by_id("users", &Id::from(2)).unwrap().unwrap();
	assert_eq!(doc.fields["email"], json!("b"));
	// Both index entries are intact
	assert_eq!(ds.find_by("users", "email", &json!("a")).unwrap()[0].id, Id::from(1));
	assert_eq!(ds.find_by("users", "email", &json!("b")).unwrap()[0].id, Id::from(2));
}

#[tokio::test]
async fn upsert_applies_schema_defaults() {
	let schema = Schema::new()
		.field("name", FieldSpec::new(FieldKind::String).required())
		.field(
			"status",
			FieldSpec::new(FieldKind::String).with_default(DefaultValue::Static(json!("new"))),
		)
		.field("createdAt", FieldSpec::new(FieldKind::DateTime).with_default(DefaultValue::Now));
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(CollectionConfig::new("tasks").with_schema(schema)).await.unwrap();

	let outcome = ds
		.update_atomic(
			"tasks",
			&json!({ "name": "x" }),
			&json!({ "$set": { "priority": 5 } }),
			UpdateOptions::new().upsert(),
		)
		.await
		.unwrap();
	assert!(outcome.upserted);
	assert_eq!(outcome.upserted_ids.len(), 1);

	let doc = ds.first("tasks").unwrap().unwrap();
	assert_eq!(doc.fields["name"], json!("x"));
	assert_eq!(doc.fields["priority"], json!(5));
	assert_eq!(doc.fields["status"], json!("new"));
	assert!(doc.fields["createdAt"].is_string());
}

#[tokio::test]
async fn push_composite_inserts_sorts_and_slices() {
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(CollectionConfig::new("docs")).await.unwrap();
	ds.insert("docs", json!({ "id": 1, "items": [3, 1, 2] })).await.unwrap();
	ds.update(
		"docs",
		&json!({ "id": 1 }),
		&json!({ "$push": { "items": {
			"$each": [5, 4],
			"$position": 0,
			"$sort": 1,
			"$slice": 4
		} } }),
		false,
	)
	.await
	.unwrap();
	let doc = ds.find_by_id("docs", &Id::from(1)).unwrap().unwrap();
	assert_eq!(doc.fields["items"], json!([1, 2, 3, 4]));
}

#[tokio::test]
async fn index_backed_range_queries() {
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(
		CollectionConfig::new("readings")
			.with_index(IndexDef::new("idx_value", "value", IndexOptions::default())),
	)
	.await
	.unwrap();
	for i in 0..100 {
		ds.insert("readings", json!({ "id": i, "value": i * 10 })).await.unwrap();
	}
	let found = ds.find("readings", &json!({ "value": { "$gte": 100, "$lt": 150 } })).unwrap();
	assert_eq!(found.len(), 5);
	assert_eq!(ds.lowest("readings", "value").unwrap().unwrap().id, Id::from(0));
	assert_eq!(ds.greatest("readings", "value").unwrap().unwrap().id, Id::from(99));
}

#[tokio::test]
async fn unknown_collection_is_reported() {
	let ds = Datastore::new(":memory:").await.unwrap();
	assert!(matches!(
		ds.find("nope", &json!({})),
		Err(Error::CollectionNotFound(_))
	));
}

#[tokio::test]
#[serial]
async fn file_backed_datastore_reopens_from_the_manifest() {
	let tmp = TempDir::new().unwrap();
	let root = tmp.path().to_string_lossy().into_owned();
	let schema = Schema::new().field("email", FieldSpec::new(FieldKind::String).required());
	{
		let mut ds = Datastore::new(&root).await.unwrap();
		ds.define_collection(
			CollectionConfig::new("users")
				.with_adapter(docbase_core::kvs::AdapterKind::File)
				.with_schema(schema)
				.with_index(IndexDef::new("idx_email", "email", IndexOptions::unique())),
		)
		.await
		.unwrap();
		ds.insert("users", json!({ "id": 1, "email": "a" })).await.unwrap();
		ds.insert("users", json!({ "id": 2, "email": "b" })).await.unwrap();
		ds.shutdown().await.unwrap();
	}
	{
		let mut ds = Datastore::new(&root).await.unwrap();
		assert_eq!(ds.list_collections(), vec!["users".to_owned()]);
		// Documents and indexes were rebuilt from storage
		assert_eq!(ds.collection("users").unwrap().len(), 2);
		assert_eq!(ds.list_indexes("users").unwrap().len(), 1);
		let err = ds.insert("users", json!({ "id": 3, "email": "a" })).await.unwrap_err();
		assert!(matches!(err, Error::IndexKeyExists { .. }));
		// The restored schema still validates
		let err = ds.insert("users", json!({ "id": 4 })).await.unwrap_err();
		assert!(matches!(err, Error::SchemaViolation { .. }));
	}
}

#[tokio::test]
#[serial]
async fn dropped_collections_leave_no_files() {
	let tmp = TempDir::new().unwrap();
	let root = tmp.path().to_string_lossy().into_owned();
	let mut ds = Datastore::new(&root).await.unwrap();
	ds.define_collection(
		CollectionConfig::new("tmp").with_adapter(docbase_core::kvs::AdapterKind::File),
	)
	.await
	.unwrap();
	ds.insert("tmp", json!({ "id": 1 })).await.unwrap();
	ds.drop_collection("tmp").await.unwrap();
	assert!(matches!(ds.collection("tmp"), Err(Error::CollectionNotFound(_))));
	// Reopening shows no trace of the collection
	let ds = Datastore::new(&root).await.unwrap();
	assert!(ds.list_collections().is_empty());
}
