mod common;

use common::{account_row, accounts, accounts_schema, db};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use relorm::{
    AttributeRule, ColumnType, ModelDef, OrmResult, Record, RecordHooks, Row, Rule, TableSchema,
    TxOps, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn insert_merges_generated_key_into_snapshot() {
    let db = db();
    let def = accounts();
    db.connection()
        .push_rows(vec![Row::from_pairs([("id", Value::BigInt(42))])]);

    let mut r = def.new_record();
    r.set("name", "ann").unwrap();
    assert!(r.insert(&db, true, None).await.unwrap());

    assert_eq!(
        db.connection().statements(),
        vec![r#"INSERT INTO "accounts" ("name") VALUES ($1) RETURNING "id""#]
    );
    assert_eq!(r.get("id"), Some(&Value::BigInt(42)));
    let old = r.old_attributes().unwrap();
    assert_eq!(old.keys().collect::<Vec<_>>(), ["name", "id"]);
    assert!(!old.contains_key("balance"));
    assert!(!r.is_new_record());
}

#[tokio::test]
async fn insert_of_subset_only_claims_written_columns() {
    let db = db();
    let def = accounts();
    db.connection()
        .push_rows(vec![Row::from_pairs([("id", Value::BigInt(7))])]);

    let mut r = def.new_record();
    r.set("name", "ann").unwrap();
    r.set("balance", 5).unwrap();
    assert!(r.insert(&db, true, Some(&["balance"])).await.unwrap());

    assert_eq!(
        db.connection().statements(),
        vec![r#"INSERT INTO "accounts" ("balance") VALUES ($1) RETURNING "id""#]
    );
    assert!(r.is_attribute_changed("name"));
    assert!(!r.is_attribute_changed("balance"));
}

#[tokio::test]
async fn insert_with_supplied_key_skips_returning() {
    let db = db();
    let def = accounts();
    let mut r = def.new_record();
    r.set_attributes([("id", Value::BigInt(9)), ("name", Value::from("x"))])
        .unwrap();
    assert!(r.insert(&db, false, None).await.unwrap());
    assert_eq!(
        db.connection().statements(),
        vec![r#"INSERT INTO "accounts" ("id", "name") VALUES ($1, $2)"#]
    );
}

#[tokio::test]
async fn failed_insert_leaves_record_new() {
    let db = db();
    let def = accounts();
    db.connection().fail_on("INSERT", "duplicate key");

    let mut r = def.new_record();
    r.set("name", "ann").unwrap();
    assert!(r.insert(&db, true, None).await.is_err());
    assert!(r.is_new_record());
    assert_eq!(r.get("id"), None);
}

#[tokio::test]
async fn update_without_changes_issues_no_sql() {
    let db = db();
    let def = accounts();
    let mut r = def.instantiate(account_row(1, "a", 10, 1));

    assert_eq!(r.update(&db, true, None).await.unwrap(), Some(0));
    assert!(db.connection().statements().is_empty());
}

#[tokio::test]
async fn update_writes_only_dirty_columns() {
    let db = db();
    let def = accounts();
    let mut r = def.instantiate(account_row(1, "a", 10, 1));
    r.set("name", "b").unwrap();
    r.set("balance", 10).unwrap();

    assert_eq!(r.update(&db, true, None).await.unwrap(), Some(1));
    assert_eq!(
        db.connection().statements(),
        vec![r#"UPDATE "accounts" SET "name" = $1 WHERE "id" = $2"#]
    );
    assert_eq!(
        db.connection().params(0),
        vec![Value::from("b"), Value::BigInt(1)]
    );
    assert_eq!(r.old_attribute("name"), Some(&Value::from("b")));
    assert!(r.dirty_attributes(None).is_empty());
}

#[tokio::test]
async fn update_restricted_to_names() {
    let db = db();
    let def = accounts();
    let mut r = def.instantiate(account_row(1, "a", 10, 1));
    r.set("name", "b").unwrap();
    r.set("balance", 20).unwrap();

    r.update(&db, false, Some(&["balance"])).await.unwrap();
    assert_eq!(
        db.connection().statements(),
        vec![r#"UPDATE "accounts" SET "balance" = $1 WHERE "id" = $2"#]
    );
    assert!(r.is_attribute_changed("name"));
}

#[tokio::test]
async fn delete_is_terminal() {
    let db = db();
    let def = accounts();
    let mut r = def.instantiate(account_row(1, "a", 10, 1));

    assert_eq!(r.delete(&db).await.unwrap(), Some(1));
    assert_eq!(
        db.connection().statements(),
        vec![r#"DELETE FROM "accounts" WHERE "id" = $1"#]
    );
    assert!(r.old_attributes().is_none());

    db.connection().clear();
    r.set("name", "ghost").unwrap();
    let err = r.update(&db, false, None).await.unwrap_err();
    assert!(err.is_config());
    assert!(r.delete(&db).await.unwrap_err().is_config());
    assert!(db.connection().statements().is_empty());
}

#[tokio::test]
async fn delete_of_missing_row_without_lock_succeeds() {
    let db = db();
    let def = accounts();
    db.connection().push_affected(0);
    let mut r = def.instantiate(account_row(1, "a", 10, 1));

    assert_eq!(r.delete(&db).await.unwrap(), Some(0));
    assert!(r.is_new_record());
}

#[tokio::test]
async fn validation_failure_performs_no_io() {
    let db = db();
    let def = ModelDef::new(accounts_schema())
        .rule(AttributeRule::new(["name"], Rule::Required))
        .rule(AttributeRule::new(["balance"], Rule::Range { min: Some(0.0), max: None }))
        .transactional("default", TxOps::ALL)
        .build()
        .unwrap();

    let mut r = def.new_record();
    r.set("balance", -5).unwrap();
    assert!(!r.insert(&db, true, None).await.unwrap());
    assert!(!r.save(&db, true, None).await.unwrap());
    assert!(db.connection().statements().is_empty());

    let fields: Vec<_> = r.errors().iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, ["name", "balance"]);
}

#[tokio::test]
async fn scenario_selects_rules() {
    let db = db();
    let def = ModelDef::new(accounts_schema())
        .rule(AttributeRule::new(["name"], Rule::Required).on(["signup"]))
        .build()
        .unwrap();
    db.connection()
        .push_rows(vec![Row::from_pairs([("id", Value::BigInt(1))])]);

    let mut r = def.new_record();
    r.set_scenario("signup");
    assert!(!r.insert(&db, true, None).await.unwrap());

    r.set_scenario("import");
    assert!(r.insert(&db, true, None).await.unwrap());
}

#[tokio::test]
async fn save_dispatches_on_state() {
    let db = db();
    let def = accounts();
    db.connection()
        .push_rows(vec![Row::from_pairs([("id", Value::BigInt(3))])]);

    let mut r = def.new_record();
    r.set("name", "ann").unwrap();
    assert!(r.save(&db, true, None).await.unwrap());
    r.set("name", "bob").unwrap();
    assert!(r.save(&db, true, None).await.unwrap());

    let stmts = db.connection().statements();
    assert!(stmts[0].starts_with("INSERT"));
    assert_eq!(stmts[1], r#"UPDATE "accounts" SET "name" = $1 WHERE "id" = $2"#);
}

#[derive(Default)]
struct Audit {
    saved: AtomicUsize,
    found: AtomicUsize,
}

struct AuditHooks(Arc<Audit>);

impl RecordHooks for AuditHooks {
    fn before_save(&self, record: &mut Record, insert: bool) -> OrmResult<bool> {
        if insert && record.get("balance").is_none() {
            record.set("balance", 0)?;
        }
        Ok(record.get("name") != Some(&Value::from("blocked")))
    }

    fn after_save(&self, _record: &Record, _insert: bool, _changed: &IndexMap<String, Value>) {
        self.0.saved.fetch_add(1, Ordering::SeqCst);
    }

    fn before_delete(&self, record: &Record) -> OrmResult<bool> {
        Ok(record.get("balance") == Some(&Value::BigInt(0)))
    }

    fn after_find(&self, record: &mut Record) {
        self.0.found.fetch_add(1, Ordering::SeqCst);
        record.set_scenario("loaded");
    }
}

#[tokio::test]
async fn hooks_veto_and_observe() {
    let db = db();
    let audit = Arc::new(Audit::default());
    let def = ModelDef::new(accounts_schema())
        .hooks(AuditHooks(Arc::clone(&audit)))
        .build()
        .unwrap();

    let mut blocked = def.new_record();
    blocked.set("name", "blocked").unwrap();
    assert!(!blocked.insert(&db, true, None).await.unwrap());
    assert!(db.connection().statements().is_empty());

    db.connection()
        .push_rows(vec![Row::from_pairs([("id", Value::BigInt(1))])]);
    let mut ok = def.new_record();
    ok.set("name", "ann").unwrap();
    assert!(ok.insert(&db, true, None).await.unwrap());
    assert_eq!(ok.old_attribute("balance"), Some(&Value::BigInt(0)));
    assert_eq!(audit.saved.load(Ordering::SeqCst), 1);

    let mut rich = def.instantiate(account_row(2, "rich", 100, 1));
    assert_eq!(rich.delete(&db).await.unwrap(), None);

    db.connection().push_rows(vec![account_row(2, "rich", 100, 1)]);
    let found = def.find().all(&db).await.unwrap();
    assert_eq!(found[0].scenario(), "loaded");
    assert_eq!(audit.found.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_reloads_by_primary_key() {
    let db = db();
    let def = accounts();
    let mut r = def.instantiate(account_row(1, "a", 10, 1));
    r.set("name", "local").unwrap();

    db.connection().push_rows(vec![account_row(1, "remote", 12, 2)]);
    assert!(r.refresh(&db).await.unwrap());
    assert_eq!(
        db.connection().statements(),
        vec![r#"SELECT * FROM "accounts" WHERE "id" = $1 LIMIT 1"#]
    );
    assert_eq!(r.get("name"), Some(&Value::from("remote")));
    assert!(r.dirty_attributes(None).is_empty());

    assert!(!r.refresh(&db).await.unwrap());
}

#[tokio::test]
async fn update_counters_adjusts_attributes() {
    let db = db();
    let def = accounts();
    let mut r = def.instantiate(account_row(1, "a", 10, 1));

    assert!(r.update_counters(&db, [("balance", 5)]).await.unwrap());
    assert_eq!(
        db.connection().statements(),
        vec![r#"UPDATE "accounts" SET "balance" = "balance" + $1 WHERE "id" = $2"#]
    );
    assert_eq!(r.get("balance"), Some(&Value::BigInt(15)));
    assert_eq!(r.old_attribute("balance"), Some(&Value::BigInt(15)));

    db.connection().push_affected(0);
    assert!(!r.update_counters(&db, [("balance", 1)]).await.unwrap());
    assert_eq!(r.get("balance"), Some(&Value::BigInt(15)));
}

#[tokio::test]
async fn static_writes() {
    let db = db();
    let def = accounts();
    db.connection().push_affected(4);

    let mut values = IndexMap::new();
    values.insert("balance".to_string(), Value::BigInt(0));
    let n = def
        .update_all(&db, &values, relorm::Condition::lt("balance", 0))
        .await
        .unwrap();
    assert_eq!(n, 4);
    def.delete_all(&db, relorm::Condition::and([])).await.unwrap();
    assert_eq!(
        db.connection().statements(),
        vec![
            r#"UPDATE "accounts" SET "balance" = $1 WHERE "balance" < $2"#,
            r#"DELETE FROM "accounts""#,
        ]
    );
}

fn entries() -> Arc<ModelDef> {
    ModelDef::new(
        TableSchema::new("entries")
            .column("id", ColumnType::BigInt)
            .auto_increment()
            .column("account_id", ColumnType::BigInt)
            .column("amount", ColumnType::BigInt)
            .primary_key(["id"]),
    )
    .build()
    .unwrap()
}

#[tokio::test]
async fn relations_follow_link_columns() {
    let db = db();
    let account = accounts().instantiate(account_row(5, "a", 10, 1));
    let entries = entries();

    db.connection().push_rows(vec![
        Row::from_pairs([("id", 1_i64), ("account_id", 5), ("amount", 3)]),
        Row::from_pairs([("id", 2_i64), ("account_id", 5), ("amount", 4)]),
    ]);
    let many = account
        .has_many(&entries, &[("account_id", "id")])
        .all(&db)
        .await
        .unwrap();
    assert_eq!(many.len(), 2);
    assert_eq!(many[1].get("amount"), Some(&Value::BigInt(4)));

    account
        .has_one(&entries, &[("account_id", "id")])
        .one(&db)
        .await
        .unwrap();
    assert_eq!(
        db.connection().statements(),
        vec![
            r#"SELECT * FROM "entries" WHERE "account_id" = $1"#,
            r#"SELECT * FROM "entries" WHERE "account_id" = $1 LIMIT 1"#,
        ]
    );
}

#[tokio::test]
async fn link_sets_foreign_key_and_saves() {
    let db = db();
    let account = accounts().instantiate(account_row(5, "a", 10, 1));
    let mut entry = entries().new_record();
    entry.set("amount", 12).unwrap();
    db.connection()
        .push_rows(vec![Row::from_pairs([("id", Value::BigInt(77))])]);

    assert!(
        account
            .link(&db, &mut entry, &[("account_id", "id")])
            .await
            .unwrap()
    );
    assert_eq!(entry.get("account_id"), Some(&Value::BigInt(5)));
    assert_eq!(
        db.connection().statements(),
        vec![r#"INSERT INTO "entries" ("amount", "account_id") VALUES ($1, $2) RETURNING "id""#]
    );

    let unsaved = accounts().new_record();
    let err = unsaved
        .link(&db, &mut entries().new_record(), &[("account_id", "id")])
        .await
        .unwrap_err();
    assert!(err.is_config());
}
