mod common;

use common::{MockConnection, db};
use futures_util::TryStreamExt;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use relorm::{
    Condition, Db, HookAction, OrmError, Query, QueryContext, QueryHook, QueryResult, QueryType,
    Row, Value,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn user(id: i64, name: &str) -> Row {
    Row::from_pairs([("id", Value::BigInt(id)), ("name", Value::from(name))])
}

fn scalar(v: impl Into<Value>) -> Vec<Row> {
    vec![Row::from_pairs([("value", v.into())])]
}

#[tokio::test]
async fn all_and_one() {
    let db = db();
    db.connection().push_rows(vec![user(1, "ann"), user(2, "bob")]);
    let q = Query::new().from("users").where_(Condition::eq("active", true));

    let rows = q.all(&db).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("name"), Some(&Value::from("bob")));

    assert!(q.one(&db).await.unwrap().is_none());
    assert_eq!(
        db.connection().statements(),
        vec![
            r#"SELECT * FROM "users" WHERE "active" = $1"#,
            r#"SELECT * FROM "users" WHERE "active" = $1 LIMIT 1"#,
        ]
    );
}

#[tokio::test]
async fn typed_rows_decode_the_first_column() {
    let db = db();
    db.connection().push_rows(vec![user(1, "ann"), user(2, "bob")]);
    db.connection().push_rows(scalar("seven"));
    let q = Query::new().select(["id"]).from("users");

    let ids: Vec<i64> = q.all_as(&db).await.unwrap();
    assert_eq!(ids, vec![1, 2]);

    let err = q.one_as::<i64, _>(&db).await.unwrap_err();
    assert!(matches!(err, OrmError::Decode { .. }));
    assert!(q.one_as::<i64, _>(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn scalar_distinguishes_no_row_from_null() {
    let db = db();
    let q = Query::new().select(["name"]).from("users");

    assert_eq!(q.scalar(&db).await.unwrap(), None);
    db.connection().push_rows(scalar(Value::Null));
    assert_eq!(q.scalar(&db).await.unwrap(), Some(Value::Null));
}

#[tokio::test]
async fn column_and_indexed_results() {
    let db = db();
    db.connection().push_rows(vec![
        Row::from_pairs([("name", "ann")]),
        Row::from_pairs([("name", "bob")]),
    ]);
    let names = Query::new()
        .select(["name"])
        .from("users")
        .column(&db)
        .await
        .unwrap();
    assert_eq!(names, vec![Value::from("ann"), Value::from("bob")]);

    db.connection().push_rows(vec![
        Row::from_pairs([("name", "ann"), ("id", "1")]),
        Row::from_pairs([("name", "bob"), ("id", "2")]),
        Row::from_pairs([("name", "bo2"), ("id", "2")]),
    ]);
    let by_id = Query::new()
        .select(["name"])
        .from("users")
        .index_by("id")
        .column_indexed(&db)
        .await
        .unwrap();
    assert_eq!(by_id.len(), 2);
    assert_eq!(by_id["2"], Value::from("bo2"));
    assert_eq!(
        db.connection().statements()[1],
        r#"SELECT "name", "id" FROM "users""#
    );

    db.connection().push_rows(vec![user(1, "ann"), user(2, "bob")]);
    let rows = Query::new()
        .from("users")
        .index_by_fn(|row| row.get("name").map(Value::to_key_string).unwrap_or_default())
        .all_indexed(&db)
        .await
        .unwrap();
    assert_eq!(rows.keys().collect::<Vec<_>>(), ["ann", "bob"]);

    let err = Query::new().from("users").all_indexed(&db).await.unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn count_wraps_grouped_query() {
    let db = db();
    db.connection().push_rows(scalar(3_i64));
    let n = Query::new()
        .from("users")
        .group_by(["country"])
        .count(&db, "*")
        .await
        .unwrap();

    assert_eq!(n, 3);
    assert_eq!(
        db.connection().statements(),
        vec![r#"SELECT COUNT(*) FROM (SELECT * FROM "users" GROUP BY "country") AS "c""#]
    );
}

#[tokio::test]
async fn count_drops_ordering_and_paging() {
    let db = db();
    let n = Query::new()
        .from("users")
        .eq("active", true)
        .order_by("name")
        .limit(10)
        .count(&db, "id")
        .await
        .unwrap();

    assert_eq!(n, 0);
    assert_eq!(
        db.connection().statements(),
        vec![r#"SELECT COUNT("id") FROM "users" WHERE "active" = $1"#]
    );
}

#[tokio::test]
async fn other_aggregates() {
    let db = db();
    let q = Query::new().from("accounts");
    db.connection().push_rows(scalar(Value::Decimal(Decimal::new(30, 0))));
    db.connection().push_rows(scalar(7.5));
    db.connection().push_rows(scalar(1_i64));
    db.connection().push_rows(scalar(20_i64));

    assert_eq!(
        q.sum(&db, "balance").await.unwrap(),
        Value::Decimal(Decimal::new(30, 0))
    );
    assert_eq!(q.average(&db, "balance").await.unwrap(), Some(7.5));
    assert_eq!(q.min(&db, "balance").await.unwrap(), Value::BigInt(1));
    assert_eq!(q.max(&db, "balance").await.unwrap(), Value::BigInt(20));
    assert_eq!(q.sum(&db, "balance").await.unwrap(), Value::Null);

    assert_eq!(
        db.connection().statements(),
        vec![
            r#"SELECT SUM("balance") FROM "accounts""#,
            r#"SELECT AVG("balance") FROM "accounts""#,
            r#"SELECT MIN("balance") FROM "accounts""#,
            r#"SELECT MAX("balance") FROM "accounts""#,
            r#"SELECT SUM("balance") FROM "accounts""#,
        ]
    );
}

#[tokio::test]
async fn exists_wraps_query() {
    let db = db();
    db.connection().push_rows(scalar(true));
    let q = Query::new().from("users").eq("id", 1);

    assert!(q.exists(&db).await.unwrap());
    assert!(!q.exists(&db).await.unwrap());
    assert_eq!(
        db.connection().statements()[0],
        r#"SELECT EXISTS(SELECT * FROM "users" WHERE "id" = $1)"#
    );
}

#[tokio::test]
async fn batches_page_until_short_page() {
    let db = db();
    db.connection().push_rows(vec![user(1, "a"), user(2, "b")]);
    db.connection().push_rows(vec![user(3, "c")]);

    let q = Query::new().from("users").order_by("id");
    let mut batches = q.batch(&db, 2);
    assert_eq!(batches.next().await.unwrap().map(|b| b.len()), Some(2));
    assert_eq!(batches.next().await.unwrap().map(|b| b.len()), Some(1));
    assert!(batches.next().await.unwrap().is_none());
    assert!(batches.next().await.unwrap().is_none());

    assert_eq!(
        db.connection().statements(),
        vec![
            r#"SELECT * FROM "users" ORDER BY "id" ASC LIMIT 2"#,
            r#"SELECT * FROM "users" ORDER BY "id" ASC LIMIT 2 OFFSET 2"#,
        ]
    );
}

#[tokio::test]
async fn batches_honour_existing_limit_and_offset() {
    let db = db();
    db.connection().push_rows(vec![user(1, "a"), user(2, "b")]);
    db.connection().push_rows(vec![user(3, "c")]);

    let q = Query::new().from("users").limit(3).offset(10);
    let rows: Vec<Vec<Row>> = q.batch(&db, 2).into_stream().try_collect().await.unwrap();
    assert_eq!(rows.iter().map(Vec::len).collect::<Vec<_>>(), [2, 1]);
    assert_eq!(
        db.connection().statements(),
        vec![
            r#"SELECT * FROM "users" LIMIT 2 OFFSET 10"#,
            r#"SELECT * FROM "users" LIMIT 1 OFFSET 12"#,
        ]
    );
}

#[tokio::test]
async fn each_yields_single_rows() {
    let db = db();
    db.connection().push_rows(vec![user(1, "a"), user(2, "b")]);
    db.connection().push_rows(vec![user(3, "c")]);

    let mut each = Query::new().from("users").each(&db, 2);
    let mut ids = Vec::new();
    while let Some(row) = each.next().await.unwrap() {
        ids.push(row.get("id").cloned().unwrap());
    }
    assert_eq!(ids, vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)]);

    let empty: Vec<Row> = Query::new()
        .from("users")
        .each(&db, 2)
        .into_stream()
        .try_collect()
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn zero_batch_size_is_rejected() {
    let db = db();
    let mut batches = Query::new().from("users").batch(&db, 0);
    assert!(batches.next().await.unwrap_err().is_config());
    assert!(batches.next().await.unwrap().is_none());
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(QueryType, String)>>,
}

impl QueryHook for Recorder {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        if ctx.query_type == QueryType::Delete {
            return HookAction::Abort("deletes are disabled".into());
        }
        HookAction::Continue
    }

    fn after_query(&self, ctx: &QueryContext, _duration: Duration, result: &QueryResult) {
        let outcome = match result {
            QueryResult::Rows(n) => format!("rows:{n}"),
            QueryResult::Affected(n) => format!("affected:{n}"),
            QueryResult::Error(e) => format!("error:{e}"),
        };
        self.seen.lock().unwrap().push((ctx.query_type, outcome));
    }
}

struct Shared(Arc<Recorder>);

impl QueryHook for Shared {
    fn before_query(&self, ctx: &QueryContext) -> HookAction {
        self.0.before_query(ctx)
    }

    fn after_query(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        self.0.after_query(ctx, duration, result)
    }
}

#[tokio::test]
async fn hooks_observe_and_veto() {
    let recorder = Arc::new(Recorder::default());
    let db = Db::new(MockConnection::new()).add_hook(Shared(Arc::clone(&recorder)));
    db.connection().push_rows(vec![user(1, "a")]);

    Query::new().from("users").all(&db).await.unwrap();
    let def = common::accounts();
    let err = def
        .delete_all(&db, Condition::eq("id", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Aborted(_)));

    assert_eq!(db.connection().statements().len(), 1);
    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![(QueryType::Select, "rows:1".to_string())]
    );
}
