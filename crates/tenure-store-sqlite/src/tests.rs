//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use tenure_core::{
  Error as CoreError,
  allocator::SurrogateKey,
  clock::FixedClock,
  engine::VersioningEngine,
  entity::{ColumnMeta, Dimension, EntityMeta, EntityType},
  hash::row_hash,
  key::BusinessKey,
  store::{ChangeSet, Closure, DimensionStore},
  value::{ColumnType, Record, Value},
  version::VersionRow,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn t(s: &str) -> DateTime<Utc> { s.parse().unwrap() }

fn customer() -> EntityMeta {
  EntityMeta::type2("customer")
    .describe("Customer master data")
    .column(ColumnMeta::new("customer_id", ColumnType::Integer).business_key())
    .column(ColumnMeta::new("name", ColumnType::Varchar).tracked().not_null())
    .column(ColumnMeta::new("score", ColumnType::Double).tracked())
    .column(ColumnMeta::new("active", ColumnType::Boolean).tracked())
    .column(ColumnMeta::new("signup", ColumnType::Date).tracked())
    .column(ColumnMeta::new("seen_at", ColumnType::Timestamp))
}

fn version(dim: &Dimension, surrogate: i64, id: i64, name: &str, from: &str) -> VersionRow {
  let attributes: Record = [
    ("name".to_owned(), Value::from(name)),
    ("score".to_owned(), Value::Float(1.5)),
    ("active".to_owned(), Value::Bool(true)),
    ("signup".to_owned(), Value::Date(NaiveDate::from_ymd_opt(2023, 5, 17).unwrap())),
    ("seen_at".to_owned(), Value::Timestamp(t("2024-01-01T12:30:00.123456789Z"))),
  ]
  .into();
  VersionRow {
    surrogate_key: SurrogateKey(surrogate),
    business_key:  BusinessKey::new(vec![Value::Int(id)]),
    row_hash:      row_hash(&attributes, dim.tracked_columns().iter().map(|c| c.name.as_str())),
    attributes,
    valid_from:    t(from),
    valid_to:      None,
    is_current:    true,
    load_date:     t(from),
  }
}

fn key(id: i64) -> BusinessKey { BusinessKey::new(vec![Value::Int(id)]) }

// ─── Metadata ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn register_and_read_back_entity() {
  let s = store().await;
  assert!(s.register_entity(customer()).await.unwrap());

  let fetched = s.entity("customer").await.unwrap().unwrap();
  assert_eq!(fetched, customer());
  assert!(s.entity("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn reregistering_is_idempotent_but_changes_conflict() {
  let s = store().await;
  assert!(s.register_entity(customer()).await.unwrap());
  assert!(!s.register_entity(customer()).await.unwrap());

  let changed = customer().column(ColumnMeta::new("email", ColumnType::Varchar));
  let err = s.register_entity(changed).await.unwrap_err();
  assert!(matches!(err, Error::Core(CoreError::EntityConflict(_))));
}

#[tokio::test]
async fn lists_all_entity_types() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();
  s.register_entity(
    EntityMeta::new("fact_sales", EntityType::Fact)
      .column(ColumnMeta::new("amount", "DECIMAL(10,2)".parse().unwrap())),
  )
  .await
  .unwrap();

  let all = s.list_entities().await.unwrap();
  let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
  assert_eq!(names, ["customer", "fact_sales"]);
  assert_eq!(all[1].columns[0].data_type, ColumnType::Double);
}

#[tokio::test]
async fn rejects_invalid_and_reserved_entities() {
  let s = store().await;
  let no_key = EntityMeta::type2("orphan").column(ColumnMeta::new("x", ColumnType::Integer));
  assert!(matches!(
    s.register_entity(no_key).await,
    Err(Error::Core(CoreError::MissingBusinessKey(_)))
  ));

  let reserved = EntityMeta::new("entity_metadata", EntityType::Dimension);
  assert!(matches!(
    s.register_entity(reserved).await,
    Err(Error::Core(CoreError::InvalidIdentifier { .. }))
  ));
}

#[tokio::test]
async fn names_differing_only_in_case_are_rejected() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();

  let mut shouting = customer();
  shouting.name = "Customer".to_owned();
  assert!(matches!(
    s.register_entity(shouting).await,
    Err(Error::Core(CoreError::InvalidIdentifier { .. }))
  ));
  assert!(s.entity("Customer").await.unwrap().is_none());

  // Facts create no table but still may not shadow a dimension.
  let fact = EntityMeta::new("CUSTOMER", EntityType::Fact)
    .column(ColumnMeta::new("amount", ColumnType::Double));
  assert!(matches!(
    s.register_entity(fact).await,
    Err(Error::Core(CoreError::InvalidIdentifier { .. }))
  ));

  // The original dimension keeps its own chain.
  let dim = Dimension::try_from(&customer()).unwrap();
  let mut changes = ChangeSet::new("customer");
  changes.inserts.push(version(&dim, 1, 1, "Alice", "2024-01-01T00:00:00Z"));
  s.commit(&dim, changes).await.unwrap();
  assert_eq!(s.list_entities().await.unwrap().len(), 1);
  assert_eq!(s.current_rows(&dim).await.unwrap().len(), 1);
}

#[tokio::test]
async fn entity_may_not_take_an_index_name() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();

  for name in ["customer__history", "Customer__Current"] {
    let clash = EntityMeta::type2(name)
      .column(ColumnMeta::new("id", ColumnType::Integer).business_key())
      .column(ColumnMeta::new("name", ColumnType::Varchar));
    assert!(
      matches!(
        s.register_entity(clash).await,
        Err(Error::Core(CoreError::InvalidIdentifier { .. }))
      ),
      "{name}"
    );
  }

  // And a dimension whose indexes would shadow an existing table.
  let base = EntityMeta::type2("orders")
    .column(ColumnMeta::new("id", ColumnType::Integer).business_key())
    .column(ColumnMeta::new("total", ColumnType::Double));
  let taken = EntityMeta::type2("orders__current")
    .column(ColumnMeta::new("id", ColumnType::Integer).business_key())
    .column(ColumnMeta::new("total", ColumnType::Double));
  s.register_entity(taken).await.unwrap();
  assert!(matches!(
    s.register_entity(base).await,
    Err(Error::Core(CoreError::InvalidIdentifier { .. }))
  ));
}

// ─── Versions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn versions_round_trip_every_column_type() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();
  let dim = Dimension::try_from(&customer()).unwrap();

  let row = version(&dim, 1, 42, "Alice", "2024-01-01T00:00:00Z");
  let mut changes = ChangeSet::new("customer");
  changes.inserts.push(row.clone());
  let ack = s.commit(&dim, changes).await.unwrap();
  assert_eq!(ack.inserted, 1);

  let current = s.read_current_rows(&dim, &[key(42), key(7)]).await.unwrap();
  assert_eq!(current, vec![row]);
}

#[tokio::test]
async fn closure_and_insert_commit_together() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();
  let dim = Dimension::try_from(&customer()).unwrap();

  let mut first = ChangeSet::new("customer");
  first.inserts.push(version(&dim, 100, 1, "Alice", "2024-01-01T00:00:00Z"));
  s.commit(&dim, first).await.unwrap();

  let mut second = ChangeSet::new("customer");
  second.closures.push(Closure {
    surrogate_key: SurrogateKey(100),
    business_key:  key(1),
    valid_to:      t("2024-02-01T00:00:00Z"),
  });
  second.inserts.push(version(&dim, 101, 1, "Bob", "2024-02-01T00:00:00Z"));
  second.last_surrogate_key = Some(SurrogateKey(101));
  let ack = s.commit(&dim, second).await.unwrap();
  assert_eq!((ack.closed, ack.inserted), (1, 1));

  let history = s.history(&dim, &key(1)).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].valid_to, Some(t("2024-02-01T00:00:00Z")));
  assert!(!history[0].is_current);
  assert!(history[1].is_current);

  let jan = s.as_of(&dim, t("2024-01-15T00:00:00Z")).await.unwrap();
  assert_eq!(jan[0].attributes["name"], Value::from("Alice"));
  let feb = s.as_of(&dim, t("2024-02-01T00:00:00Z")).await.unwrap();
  assert_eq!(feb[0].attributes["name"], Value::from("Bob"));
}

#[tokio::test]
async fn stale_closure_rolls_back_the_whole_commit() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();
  let dim = Dimension::try_from(&customer()).unwrap();

  let mut first = ChangeSet::new("customer");
  first.inserts.push(version(&dim, 1, 1, "Alice", "2024-01-01T00:00:00Z"));
  s.commit(&dim, first).await.unwrap();

  let mut stale = ChangeSet::new("customer");
  stale.inserts.push(version(&dim, 2, 2, "Carol", "2024-02-01T00:00:00Z"));
  stale.closures.push(Closure {
    surrogate_key: SurrogateKey(99),
    business_key:  key(1),
    valid_to:      t("2024-02-01T00:00:00Z"),
  });
  let err = s.commit(&dim, stale).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)));
  assert!(CoreError::from(err).is_retryable());

  let current = s.current_rows(&dim).await.unwrap();
  assert_eq!(current.len(), 1);
  assert_eq!(current[0].surrogate_key, SurrogateKey(1));
}

#[tokio::test]
async fn second_current_row_violates_unique_index() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();
  let dim = Dimension::try_from(&customer()).unwrap();

  let mut first = ChangeSet::new("customer");
  first.inserts.push(version(&dim, 1, 1, "Alice", "2024-01-01T00:00:00Z"));
  s.commit(&dim, first).await.unwrap();

  let mut racing = ChangeSet::new("customer");
  racing.inserts.push(version(&dim, 2, 1, "Bob", "2024-02-01T00:00:00Z"));
  assert!(matches!(s.commit(&dim, racing).await, Err(Error::Conflict(_))));
  assert_eq!(s.history(&dim, &key(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn surrogate_high_water_mark_is_persisted() {
  let s = store().await;
  s.register_entity(customer()).await.unwrap();
  let dim = Dimension::try_from(&customer()).unwrap();
  assert_eq!(s.last_surrogate_key(&dim).await.unwrap(), None);

  let mut changes = ChangeSet::new("customer");
  changes.inserts.push(version(&dim, 5, 1, "Alice", "2024-01-01T00:00:00Z"));
  changes.last_surrogate_key = Some(SurrogateKey(9));
  s.commit(&dim, changes).await.unwrap();
  assert_eq!(s.last_surrogate_key(&dim).await.unwrap(), Some(SurrogateKey(9)));

  // The mark never moves backwards.
  let mut lower = ChangeSet::new("customer");
  lower.inserts.push(version(&dim, 6, 2, "Bob", "2024-01-01T00:00:00Z"));
  lower.last_surrogate_key = Some(SurrogateKey(6));
  s.commit(&dim, lower).await.unwrap();
  assert_eq!(s.last_surrogate_key(&dim).await.unwrap(), Some(SurrogateKey(9)));
}

// ─── Engine over SQLite ──────────────────────────────────────────────────────

#[tokio::test]
async fn engine_versions_through_sqlite() {
  let clock = Arc::new(FixedClock::new(t("2024-01-01T00:00:00Z")));
  let engine = VersioningEngine::new(Arc::new(store().await)).with_clock(clock.clone());
  engine.register_entity(customer()).await.unwrap();

  let batch: Vec<Record> = serde_json::from_str(
    r#"[
      {"customer_id": 1, "name": "Alice", "score": 1, "active": "yes", "signup": "2023-05-17"},
      {"customer_id": 2, "name": "Carol", "score": 2.5, "active": false, "signup": null}
    ]"#,
  )
  .unwrap();
  let out = engine.apply("customer", batch.clone()).await.unwrap();
  assert_eq!(out.inserted, 2);

  clock.advance(TimeDelta::days(1));
  let again = engine.apply("customer", batch).await.unwrap();
  assert_eq!((again.inserted, again.closed), (0, 0));
  assert_eq!(again.stats.unchanged_rows, 2);

  clock.advance(TimeDelta::days(1));
  let changed: Vec<Record> = serde_json::from_str(
    r#"[{"customer_id": 1, "name": "Alicia", "score": 1, "active": true, "signup": "2023-05-17"},
        {"customer_id": 1, "name": "Alicia", "score": 2, "active": true, "signup": "2023-05-17"}]"#,
  )
  .unwrap();
  let out = engine.apply("customer", changed).await.unwrap();
  assert_eq!((out.closed, out.inserted), (1, 2));

  let history = engine.history("customer", vec![Value::Int(1)]).await.unwrap();
  assert_eq!(history.len(), 3);
  assert_eq!(history.iter().filter(|r| r.is_current).count(), 1);
  assert_eq!(history[1].valid_from, history[1].valid_to.unwrap());
  assert!(history.windows(2).all(|w| w[0].surrogate_key < w[1].surrogate_key));

  // A fresh engine over the same store continues the key sequence.
  let reopened = VersioningEngine::new(Arc::clone(engine.store())).with_clock(clock.clone());
  clock.advance(TimeDelta::days(1));
  reopened
    .apply("customer", serde_json::from_str(r#"[{"customer_id": 3, "name": "Dan", "score": null, "active": null, "signup": null}]"#).unwrap())
    .await
    .unwrap();
  let dan = reopened.history("customer", vec![Value::Int(3)]).await.unwrap();
  assert_eq!(dan[0].surrogate_key, SurrogateKey(5));
}
