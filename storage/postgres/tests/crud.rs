mod common;

use std::time::Duration;

use anyhow::Result;
use common::{document, filter, update, TestDatabase};
use futures_util::TryStreamExt;
use mongres_ql::{Document, DocumentId, FieldPath, Filter, Value};
use mongres_storage_postgres::{Error, FindOptions, PoolConfig, PoolRegistry, PostgresCollection, SortDirection};
use serde_json::json;

fn json_of(document: Document) -> serde_json::Value { document.into_value().into() }

#[tokio::test]
async fn test_insert_and_find_by_id() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    let inserted = people.insert_one(document(json!({ "name": "Anita", "age": 25, "address": { "city": "Wonderland" } }))).await?;
    let found = people.find_one(&Filter::by_id(&inserted.inserted_id)).await?.expect("document exists");

    assert_eq!(found.id, inserted.inserted_id);
    assert_eq!(
        json_of(found),
        json!({ "_id": inserted.inserted_id.to_string(), "name": "Anita", "age": 25, "address": { "city": "Wonderland" } })
    );
    Ok(())
}

#[tokio::test]
async fn test_caller_supplied_id_is_kept() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    let inserted = people.insert_one(document(json!({ "_id": "65f1c0ffee0000000000abcd", "name": "Bob" }))).await?;
    assert_eq!(inserted.inserted_id.as_str(), "65f1c0ffee0000000000abcd");

    let found = people.find_one(&filter(json!({ "_id": "65f1c0ffee0000000000abcd" }))).await?;
    assert_eq!(found.and_then(|d| d.get("name").cloned()), Some(Value::from("Bob")));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_is_rejected() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    let first = people.insert_one(document(json!({ "name": "Anita" }))).await?;
    let again = Document::new(first.inserted_id.clone(), document(json!({ "name": "Impostor" })).data);

    match people.insert_one(again).await {
        Err(Error::DuplicateKey { collection, id }) => {
            assert_eq!(collection, "people");
            assert_eq!(id, first.inserted_id.to_string());
        }
        other => panic!("expected a duplicate key error, got {other:?}"),
    }

    // the original is untouched
    let found = people.find_one(&Filter::by_id(&first.inserted_id)).await?.expect("document exists");
    assert_eq!(found.get("name"), Some(&Value::from("Anita")));
    Ok(())
}

#[tokio::test]
async fn test_set_then_find() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    let id = people.insert_one(document(json!({ "name": "Anita", "age": 25 }))).await?.inserted_id;
    let result = people.update_one(&Filter::by_id(&id), &update(json!({ "$set": { "age": 31 } }))).await?;
    assert_eq!((result.matched_count, result.modified_count), (1, 1));

    let found = people.find_one(&Filter::by_id(&id)).await?.expect("document exists");
    assert_eq!(json_of(found), json!({ "_id": id.to_string(), "name": "Anita", "age": 31 }));
    Ok(())
}

#[tokio::test]
async fn test_delete_twice() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    let id = people.insert_one(document(json!({ "name": "Anita" }))).await?.inserted_id;
    assert_eq!(people.delete_one(&Filter::by_id(&id)).await?.deleted_count, 1);
    assert!(people.find_one(&Filter::by_id(&id)).await?.is_none());
    assert_eq!(people.delete_one(&Filter::by_id(&id)).await?.deleted_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_range_query() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    people
        .insert_many(vec![
            document(json!({ "name": "Forty", "age": 40 })),
            document(json!({ "name": "FortyFive", "age": 45 })),
            document(json!({ "name": "Fifty", "age": 50 })),
        ])
        .await?;

    assert_eq!(common::names(&people, json!({ "age": { "$gte": 45 } })).await?, vec!["Fifty", "FortyFive"]);
    assert_eq!(people.count_documents(&filter(json!({ "age": { "$gte": 45 } }))).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_insert_many_is_atomic() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    let existing = people.insert_one(document(json!({ "name": "Anita" }))).await?.inserted_id;
    let batch = vec![
        document(json!({ "name": "Bob" })),
        Document::new(existing.clone(), document(json!({ "name": "Clash" })).data),
        document(json!({ "name": "Carol" })),
    ];
    assert!(matches!(people.insert_many(batch).await, Err(Error::DuplicateKey { .. })));
    assert_eq!(people.count_documents(&Filter::all()).await?, 1);

    let result = people.insert_many(vec![document(json!({ "name": "Bob" })), document(json!({ "name": "Carol" }))]).await?;
    assert_eq!(result.inserted_ids.len(), 2);
    assert_eq!(people.count_documents(&Filter::all()).await?, 3);

    assert!(people.insert_many(Vec::new()).await?.inserted_ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_insert_many_spans_batches() -> Result<()> {
    let db = TestDatabase::start().await?;
    let numbers = db.collection("numbers").await?;

    let documents: Vec<Document> = (0..2500).map(|n| document(json!({ "n": n }))).collect();
    let ids: Vec<DocumentId> = documents.iter().map(|d| d.id.clone()).collect();
    let result = numbers.insert_many(documents).await?;

    assert_eq!(result.inserted_ids, ids);
    assert_eq!(numbers.count_documents(&Filter::all()).await?, 2500);
    assert_eq!(numbers.count_documents(&filter(json!({ "n": { "$gte": 2000 } }))).await?, 500);
    Ok(())
}

#[tokio::test]
async fn test_sort_skip_limit() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    people
        .insert_many(vec![
            document(json!({ "name": "Alice", "age": 30 })),
            document(json!({ "name": "Bob", "age": 25 })),
            document(json!({ "name": "Carol", "age": 35 })),
            document(json!({ "name": "Dave", "age": 28 })),
        ])
        .await?;

    let age = FieldPath::parse("age")?;
    let names = |documents: Vec<Document>| -> Vec<String> {
        documents.iter().filter_map(|d| d.get("name").and_then(Value::as_str).map(str::to_owned)).collect()
    };

    let ascending = people.find(Filter::all()).sort(age.clone(), SortDirection::Ascending).to_array().await?;
    assert_eq!(names(ascending), vec!["Bob", "Dave", "Alice", "Carol"]);

    let page = people.find(Filter::all()).sort(age.clone(), SortDirection::Descending).skip(1).limit(2).to_array().await?;
    assert_eq!(names(page), vec!["Alice", "Dave"]);

    let options = FindOptions::default().sort(age, SortDirection::Ascending).limit(1);
    let youngest = people.find_with(filter(json!({ "age": { "$gt": 26 } })), options).to_array().await?;
    assert_eq!(names(youngest), vec!["Dave"]);
    Ok(())
}

#[tokio::test]
async fn test_stream_matches_to_array() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    people.insert_many((0..50).map(|n| document(json!({ "n": n, "even": n % 2 == 0 }))).collect()).await?;

    let cursor = people.find(filter(json!({ "even": true }))).sort(FieldPath::parse("n")?, SortDirection::Ascending);
    let collected = cursor.to_array().await?;
    let streamed: Vec<Document> = cursor.stream().await?.try_collect().await?;

    assert_eq!(collected.len(), 25);
    assert_eq!(streamed, collected);
    Ok(())
}

#[tokio::test]
async fn test_update_and_delete_many() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    people
        .insert_many(vec![
            document(json!({ "name": "Alice", "team": "red" })),
            document(json!({ "name": "Bob", "team": "red" })),
            document(json!({ "name": "Carol", "team": "blue" })),
        ])
        .await?;

    let result = people.update_many(&filter(json!({ "team": "red" })), &update(json!({ "$set": { "active": true } }))).await?;
    assert_eq!((result.matched_count, result.modified_count), (2, 2));
    assert_eq!(common::names(&people, json!({ "active": true })).await?, vec!["Alice", "Bob"]);

    let result = people.update_one(&filter(json!({ "team": "red" })), &update(json!({ "$set": { "picked": 1 } }))).await?;
    assert_eq!(result.matched_count, 1);
    assert_eq!(people.count_documents(&filter(json!({ "picked": 1 }))).await?, 1);

    let result = people.update_many(&filter(json!({ "team": "green" })), &update(json!({ "$set": { "active": true } }))).await?;
    assert_eq!((result.matched_count, result.modified_count), (0, 0));

    assert_eq!(people.delete_one(&filter(json!({ "team": "red" }))).await?.deleted_count, 1);
    assert_eq!(people.delete_many(&Filter::all()).await?.deleted_count, 2);
    assert_eq!(people.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_queries_before_any_insert() -> Result<()> {
    let db = TestDatabase::start().await?;
    let empty = db.collection("never_written").await?;

    assert!(empty.find_one(&Filter::all()).await?.is_none());
    assert_eq!(empty.count_documents(&Filter::all()).await?, 0);
    assert_eq!(empty.delete_many(&Filter::all()).await?.deleted_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_dropped_table_is_recreated() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;
    people.insert_one(document(json!({ "name": "Anita" }))).await?;

    db.raw_client().await?.batch_execute(r#"DROP TABLE "people""#).await?;

    assert_eq!(people.count_documents(&Filter::all()).await?, 0);
    people.insert_one(document(json!({ "name": "Bob" }))).await?;
    assert_eq!(common::names(&people, json!({})).await?, vec!["Bob"]);
    Ok(())
}

#[tokio::test]
async fn test_collections_share_one_pool() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;
    let pets = db.collection("pets").await?;

    assert!(people.pool().same_pool(pets.pool()));
    people.insert_one(document(json!({ "name": "Anita" }))).await?;
    assert_eq!(pets.count_documents(&Filter::all()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_collection_name() -> Result<()> {
    let db = TestDatabase::start().await?;
    let pool = db.registry.acquire_pool(&db.target).await?;
    assert!(matches!(PostgresCollection::new(pool.clone(), "people; drop table x"), Err(Error::InvalidCollectionName(_))));
    assert!(matches!(PostgresCollection::new(pool, ""), Err(Error::InvalidCollectionName(_))));
    Ok(())
}

#[tokio::test]
async fn test_released_pool_is_not_connected() -> Result<()> {
    let db = TestDatabase::start().await?;
    let people = db.collection("people").await?;

    assert_eq!(db.registry.release_all().await, 1);
    assert!(matches!(people.count_documents(&Filter::all()).await, Err(Error::NotConnected { .. })));
    Ok(())
}

#[tokio::test]
async fn test_held_stream_exhausts_a_single_connection_pool() -> Result<()> {
    let db = TestDatabase::start().await?;
    let registry = PoolRegistry::new(PoolConfig::default().max_size(1).connection_timeout(Duration::from_millis(300)));
    let people = PostgresCollection::new(registry.acquire_pool(&db.target).await?, "people")?;
    people.insert_many(vec![document(json!({ "name": "Anita" })), document(json!({ "name": "Bob" }))]).await?;

    let mut stream = people.find(Filter::all()).stream().await?;
    assert!(stream.try_next().await?.is_some());

    match tokio::time::timeout(Duration::from_secs(5), people.count_documents(&Filter::all())).await? {
        Err(Error::PoolExhausted { timeout, .. }) => assert_eq!(timeout, Duration::from_millis(300)),
        other => panic!("expected an exhausted pool, got {other:?}"),
    }

    drop(stream);
    assert_eq!(people.count_documents(&Filter::all()).await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_schemas_keep_same_named_collections_apart() -> Result<()> {
    let db = TestDatabase::start().await?;
    let pool = db.registry.acquire_pool(&db.target).await?;
    let app = PostgresCollection::with_schema(pool.clone(), "app", "people")?;
    let other = PostgresCollection::with_schema(pool.clone(), "other", "people")?;
    let unqualified = PostgresCollection::new(pool.clone(), "people")?;

    app.insert_one(document(json!({ "name": "Anita" }))).await?;
    other.insert_many(vec![document(json!({ "name": "Bob" })), document(json!({ "name": "Carol" }))]).await?;

    assert_eq!(app.schema(), Some("app"));
    assert_eq!(common::names(&app, json!({})).await?, vec!["Anita"]);
    assert_eq!(common::names(&other, json!({})).await?, vec!["Bob", "Carol"]);
    assert_eq!(unqualified.count_documents(&Filter::all()).await?, 0);

    // a dropped schema comes back along with the table
    db.raw_client().await?.batch_execute(r#"DROP SCHEMA "app" CASCADE"#).await?;
    assert_eq!(app.count_documents(&Filter::all()).await?, 0);
    app.insert_one(document(json!({ "name": "Dora" }))).await?;
    assert_eq!(common::names(&app, json!({})).await?, vec!["Dora"]);
    assert_eq!(other.count_documents(&Filter::all()).await?, 2);

    assert!(matches!(PostgresCollection::with_schema(pool.clone(), "pg_catalog", "people"), Err(Error::InvalidDatabaseName(_))));
    assert!(matches!(PostgresCollection::with_schema(pool, "app; drop", "people"), Err(Error::InvalidDatabaseName(_))));
    Ok(())
}
