//! Transactions around model operations, run against the in-memory store.

mod support;

use breakwater::model::{AttributeSpec, ModelDefinition, ModelRegistry};
use breakwater::query::QueryError;
use breakwater::transaction::{transaction, IsolationLevel, TransactionRunner};
use serde_json::json;
use std::sync::Arc;
use support::MemoryStore;

fn registry() -> Arc<ModelRegistry> {
    ModelRegistry::builder()
        .model(
            ModelDefinition::new("Account")
                .table_name("accounts")
                .with_attribute("id", AttributeSpec::number().auto_increment())
                .with_attribute("owner", AttributeSpec::string())
                .with_attribute("balance", AttributeSpec::number()),
        )
        .build()
        .unwrap()
}

fn store() -> MemoryStore {
    MemoryStore::new()
        .table("accounts", &["id", "owner", "balance"])
        .unique("accounts", "owner")
}

#[test]
fn test_commit_keeps_every_write() {
    let registry = registry();
    let db = store();
    let accounts = registry.model("Account").unwrap();

    let created = transaction(&db, |conn| {
        accounts
            .create(json!({ "owner": "ann", "balance": 10 }))
            .using_connection(conn)
            .exec(&db)?;
        accounts
            .create(json!({ "owner": "bob", "balance": 5 }))
            .using_connection(conn)
            .exec(&db)?;
        accounts.count(()).using_connection(conn).exec(&db)
    })
    .unwrap();

    assert_eq!(created.count(), Some(2));
    assert_eq!(db.rows("accounts").len(), 2);
    let statements = db.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
    assert_eq!((db.leased(), db.released()), (1, 1));
}

#[test]
fn test_failed_unit_rolls_back_and_returns_its_error() {
    let registry = registry();
    let db = store();
    let accounts = registry.model("Account").unwrap();
    accounts
        .create(json!({ "owner": "ann", "balance": 10 }))
        .exec(&db)
        .unwrap();

    let result = transaction(&db, |conn| {
        accounts
            .update_one(1, json!({ "balance": 0 }))
            .using_connection(conn)
            .exec(&db)?;
        accounts
            .create(json!({ "owner": "ann", "balance": 1 }))
            .using_connection(conn)
            .exec(&db)
    });

    let err = result.unwrap_err();
    assert_eq!(err.storage().and_then(|e| e.code()), Some("23505"));
    assert_eq!(db.rows("accounts")[0]["balance"], json!(10));
    assert_eq!(db.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(db.leased(), db.released());
}

#[test]
fn test_unit_error_type_is_preserved() {
    #[derive(Debug)]
    enum TransferError {
        Insufficient,
        Query(QueryError),
    }

    impl From<QueryError> for TransferError {
        fn from(err: QueryError) -> Self {
            TransferError::Query(err)
        }
    }

    impl From<breakwater::TransactionError> for TransferError {
        fn from(err: breakwater::TransactionError) -> Self {
            TransferError::Query(err.into())
        }
    }

    let registry = registry();
    let db = store();
    let accounts = registry.model("Account").unwrap();
    accounts
        .create_each(vec![
            json!({ "owner": "ann", "balance": 3 }),
            json!({ "owner": "bob", "balance": 0 }),
        ])
        .exec(&db)
        .unwrap();

    let result: Result<(), TransferError> = TransactionRunner::new(&db)
        .isolation(IsolationLevel::Serializable)
        .run(|conn| {
            accounts
                .update_one(json!({ "owner": "bob" }), json!({ "balance": 5 }))
                .using_connection(conn)
                .exec(&db)?;
            let ann = accounts
                .find_one(json!({ "owner": "ann" }))
                .using_connection(conn)
                .exec(&db)?
                .into_record();
            match ann {
                Some(row) if row["balance"].as_i64() >= Some(5) => Ok(()),
                _ => Err(TransferError::Insufficient),
            }
        });

    assert!(matches!(result, Err(TransferError::Insufficient)));
    assert_eq!(db.statements()[1], "BEGIN ISOLATION LEVEL SERIALIZABLE");
    assert_eq!(db.rows("accounts")[1]["balance"], json!(0));
}
