use docbase_core::dbs::{CollectionConfig, Datastore, TransactionOptions};
use docbase_core::doc::Id;
use docbase_core::err::Error;
use serde_json::json;

async fn orders_db() -> Datastore {
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(CollectionConfig::new("orders")).await.unwrap();
	ds
}

fn statuses(ds: &Datastore) -> Vec<String> {
	ds.collection("orders")
		.unwrap()
		.iter()
		.map(|d| d.fields["status"].as_str().unwrap().to_owned())
		.collect()
}

#[tokio::test]
async fn nested_savepoints_roll_back_partially() {
	let mut ds = orders_db().await;
	ds.insert("orders", json!({ "id": 1, "status": "pending" })).await.unwrap();
	ds.start_transaction(TransactionOptions::new()).unwrap();

	ds.create_savepoint("level-1").unwrap();
	ds.insert("orders", json!({ "id": 2, "status": "processing" })).await.unwrap();
	let level2 = ds.create_savepoint("level-2").unwrap();
	ds.insert("orders", json!({ "id": 3, "status": "shipped" })).await.unwrap();
	ds.create_savepoint("level-3").unwrap();
	ds.insert("orders", json!({ "id": 4, "status": "delivered" })).await.unwrap();

	ds.rollback_to_savepoint(level2).unwrap();

	assert_eq!(statuses(&ds), vec!["pending".to_owned(), "processing".to_owned()]);
	assert_eq!(ds.list_savepoints().unwrap(), vec!["level-1".to_owned(), "level-2".to_owned()]);

	ds.commit_transaction().await.unwrap();
	assert_eq!(statuses(&ds), vec!["pending".to_owned(), "processing".to_owned()]);
}

#[tokio::test]
async fn rollback_restores_documents_and_indexes() {
	let mut ds = Datastore::new(":memory:").await.unwrap();
	ds.define_collection(CollectionConfig::new("users")).await.unwrap();
	ds.create_index("users", "idx_email", "email", docbase_core::idx::IndexOptions::unique())
		.await
		.unwrap();
	ds.insert("users", json!({ "id": 1, "email": "a" })).await.unwrap();

	ds.start_transaction(TransactionOptions::new()).unwrap();
	let sp = ds.create_savepoint("before-churn").unwrap();
	ds.remove("users", &json!({ "id": 1 })).await.unwrap();
	ds.insert("users", json!({ "id": 2, "email": "a" })).await.unwrap();
	ds.rollback_to_savepoint(sp).unwrap();

	// The index must have returned to its exact prior mapping
	let found = ds.find_by("users", "email", &json!("a")).unwrap();
	assert_eq!(found.len(), 1);
	assert_eq!(found[0].id, Id::from(1));
	// And the unique slot is held by the original document again
	let err = ds.insert("users", json!({ "id": 3, "email": "a" })).await.unwrap_err();
	assert!(matches!(err, Error::IndexKeyExists { .. }));
	ds.commit_transaction().await.unwrap();
}

#[tokio::test]
async fn savepoint_name_collision_is_rejected() {
	let mut ds = orders_db().await;
	ds.start_transaction(TransactionOptions::new()).unwrap();
	ds.create_savepoint("sp").unwrap();
	let err = ds.create_savepoint("sp").unwrap_err();
	assert!(matches!(err, Error::DuplicateSavepointName(_)));
	// The stack is unchanged
	assert_eq!(ds.list_savepoints().unwrap().len(), 1);
}

#[tokio::test]
async fn release_is_not_idempotent_but_safe() {
	let mut ds = orders_db().await;
	ds.insert("orders", json!({ "id": 1, "status": "pending" })).await.unwrap();
	ds.start_transaction(TransactionOptions::new()).unwrap();
	let sp = ds.create_savepoint("sp").unwrap();
	ds.insert("orders", json!({ "id": 2, "status": "new" })).await.unwrap();

	ds.release_savepoint(sp).unwrap();
	// Releasing does not touch documents
	assert_eq!(ds.collection("orders").unwrap().len(), 2);
	// A second release fails cleanly without corrupting state
	let err = ds.release_savepoint(sp).unwrap_err();
	assert!(matches!(err, Error::NoSavepointsFound | Error::SavepointNotFound(_)));
	assert_eq!(ds.collection("orders").unwrap().len(), 2);
	ds.commit_transaction().await.unwrap();
}

#[tokio::test]
async fn savepoint_methods_require_a_transaction() {
	let mut ds = orders_db().await;
	assert!(matches!(ds.create_savepoint("sp"), Err(Error::NoActiveTransaction)));
	assert!(matches!(ds.list_savepoints(), Err(Error::NoActiveTransaction)));
	assert!(matches!(
		ds.rollback_to_savepoint(uuid::Uuid::new_v4()),
		Err(Error::NoActiveTransaction)
	));
	assert!(matches!(
		ds.release_savepoint(uuid::Uuid::new_v4()),
		Err(Error::NoActiveTransaction)
	));
}

#[tokio::test]
async fn savepoint_info_describes_the_entry() {
	let mut ds = orders_db().await;
	let txid = ds.start_transaction(TransactionOptions::new()).unwrap();
	let sp = ds.create_savepoint("checkpoint").unwrap();
	let info = ds.savepoint_info(sp).unwrap();
	assert_eq!(info.savepoint_id, sp);
	assert_eq!(info.name, "checkpoint");
	assert_eq!(info.transaction_id, txid);
	assert_eq!(info.collections_count, 1);
	ds.commit_transaction().await.unwrap();
}

#[tokio::test]
async fn rollback_to_unknown_savepoint_fails() {
	let mut ds = orders_db().await;
	ds.start_transaction(TransactionOptions::new()).unwrap();
	let err = ds.rollback_to_savepoint(uuid::Uuid::new_v4()).unwrap_err();
	assert!(matches!(err, Error::NoSavepointsFound));
	ds.create_savepoint("sp").unwrap();
	let err = ds.rollback_to_savepoint(uuid::Uuid::new_v4()).unwrap_err();
	assert!(matches!(err, Error::SavepointNotFound(_)));
	ds.commit_transaction().await.unwrap();
}

#[tokio::test]
async fn rollback_target_survives_for_reuse() {
	let mut ds = orders_db().await;
	ds.start_transaction(TransactionOptions::new()).unwrap();
	let sp = ds.create_savepoint("sp").unwrap();
	ds.insert("orders", json!({ "id": 1, "status": "a" })).await.unwrap();
	ds.rollback_to_savepoint(sp).unwrap();
	assert_eq!(ds.collection("orders").unwrap().len(), 0);
	ds.insert("orders", json!({ "id": 2, "status": "b" })).await.unwrap();
	// The same savepoint can be rolled back to again
	ds.rollback_to_savepoint(sp).unwrap();
	assert_eq!(ds.collection("orders").unwrap().len(), 0);
	ds.commit_transaction().await.unwrap();
}
