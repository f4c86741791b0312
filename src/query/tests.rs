use super::*;
use crate::database::{Config, Database, DatabaseError};
use crate::record::{ColumnDef, DataType, RowKey, Schema, TableSchema, Value};

fn schema() -> Schema {
    Schema::new(1)
        .with_table(TableSchema::new(
            "Dog",
            vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::new("age", DataType::Int),
            ],
        ))
        .with_table(TableSchema::new(
            "Person",
            vec![
                ColumnDef::new("name", DataType::String).indexed(),
                ColumnDef::new("age", DataType::Int).indexed(),
                ColumnDef::new("years", DataType::Int),
                ColumnDef::new("score", DataType::Double).nullable(),
                ColumnDef::new("nickname", DataType::String).nullable(),
                ColumnDef::link("dog", "Dog"),
                ColumnDef::link_list("dogs", "Dog"),
            ],
        ))
}

fn open() -> Database {
    Database::open(Config::in_memory().with_schema(schema())).unwrap()
}

fn person(
    name: &str,
    age: i64,
    score: Option<f64>,
    nickname: Option<&str>,
    dog: Option<RowKey>,
    dogs: Vec<RowKey>,
) -> Vec<Value> {
    vec![
        Value::from(name),
        Value::Int(age),
        Value::Int(age),
        Value::from(score),
        Value::from(nickname),
        Value::from(dog),
        Value::LinkList(dogs),
    ]
}

/// Five people, two dogs
fn small() -> (Database, Vec<RowKey>, RowKey, RowKey) {
    let db = open();
    let (people, rex, fido) = db
        .write(|txn| {
            let rex = txn.create_row("Dog", vec![Value::from("rex"), Value::Int(3)])?;
            let fido = txn.create_row("Dog", vec![Value::from("fido"), Value::Int(10)])?;
            let rows = vec![
                person("Alice", 30, Some(1.0), Some("Al"), Some(rex), vec![rex, fido]),
                person("alfred", 41, Some(3.0), None, None, vec![]),
                person("Bob", 25, None, None, Some(fido), vec![fido]),
                person("bobby", 19, Some(3.0), None, None, vec![]),
                person("Carol", 52, Some(2.0), None, None, vec![]),
            ];
            let mut people = Vec::new();
            for row in rows {
                people.push(txn.create_row("Person", row)?);
            }
            Ok((people, rex, fido))
        })
        .unwrap();
    (db, people, rex, fido)
}

fn names(db: &Database, query: &Query) -> Vec<String> {
    let snapshot = db.latest();
    query
        .find_all(&snapshot)
        .unwrap()
        .keys()
        .iter()
        .map(|k| match snapshot.get("Person", *k, "name").unwrap() {
            Value::String(s) => s,
            other => panic!("unexpected {:?}", other),
        })
        .collect()
}

#[test]
fn test_person_scenario() {
    let db = open();
    db.write(|txn| {
        for i in 0..120 {
            txn.create_row("Person", person(&format!("p{}", i), i, None, None, None, vec![]))?;
        }
        Ok(())
    })
    .unwrap();
    let snapshot = db.latest();

    // `age` is indexed, `years` holds the same values without an index
    for column in ["age", "years"] {
        let people = Query::new("Person");
        assert_eq!(people.clone().equal_to(column, 33).count(&snapshot).unwrap(), 1);
        assert_eq!(people.clone().between(column, 20, 50).count(&snapshot).unwrap(), 31);
        assert_eq!(
            people
                .clone()
                .greater_than_or_equal(column, 20)
                .less_than(column, 50)
                .count(&snapshot)
                .unwrap(),
            30
        );
        assert_eq!(people.clone().less_than(column, 10).count(&snapshot).unwrap(), 10);
        assert_eq!(people.clone().greater_than(column, 118).count(&snapshot).unwrap(), 1);
        assert_eq!(people.clone().less_than_or_equal(column, 0).count(&snapshot).unwrap(), 1);
        assert_eq!(people.clone().not_equal_to(column, 5).count(&snapshot).unwrap(), 119);
    }

    let indexed = Query::new("Person").between("age", 20, 50).find_all(&snapshot).unwrap();
    let scanned = Query::new("Person").between("years", 20, 50).find_all(&snapshot).unwrap();
    assert_eq!(indexed.keys(), scanned.keys());
    assert!(indexed.keys().windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_string_operators() {
    let (db, ..) = small();
    let q = || Query::new("Person");

    assert_eq!(names(&db, &q().begins_with("name", "al")), vec!["alfred"]);
    assert_eq!(
        names(&db, &q().begins_with_case("name", "al", Case::Insensitive)),
        vec!["Alice", "alfred"]
    );
    assert_eq!(names(&db, &q().contains("name", "ob")), vec!["Bob", "bobby"]);
    assert_eq!(names(&db, &q().ends_with("name", "ol")), vec!["Carol"]);
    assert_eq!(names(&db, &q().ends_with_case("name", "OL", Case::Insensitive)), vec!["Carol"]);
    assert_eq!(names(&db, &q().like("name", "b?b*")), vec!["bobby"]);
    assert_eq!(
        names(&db, &q().like_case("name", "b?b*", Case::Insensitive)),
        vec!["Bob", "bobby"]
    );
    assert_eq!(names(&db, &q().equal_to_case("name", "BOB", Case::Insensitive)), vec!["Bob"]);
    assert_eq!(names(&db, &q().equal_to("name", "BOB")), Vec::<String>::new());
    assert_eq!(q().not_equal_to("name", "Bob").count(&db.latest()).unwrap(), 4);
    assert_eq!(
        names(&db, &q().in_values("name", vec![Value::from("Carol"), Value::from("Bob")])),
        vec!["Bob", "Carol"]
    );
}

#[test]
fn test_nulls() {
    let (db, ..) = small();
    let snapshot = db.latest();
    let q = || Query::new("Person");

    assert_eq!(q().is_null("nickname").count(&snapshot).unwrap(), 4);
    assert_eq!(names(&db, &q().is_not_null("nickname")), vec!["Alice"]);
    assert_eq!(q().equal_to("nickname", Value::Null).count(&snapshot).unwrap(), 4);

    // ordering never matches NULL, inequality does
    assert_eq!(q().greater_than("score", 0).count(&snapshot).unwrap(), 4);
    assert_eq!(names(&db, &q().not_equal_to("score", 3.0)), vec!["Alice", "Bob", "Carol"]);
    assert_eq!(q().between("score", 1, 3).count(&snapshot).unwrap(), 4);
}

#[test]
fn test_link_paths() {
    let (db, _, rex, _) = small();
    let q = || Query::new("Person");

    assert_eq!(names(&db, &q().equal_to("dog.name", "rex")), vec!["Alice"]);
    assert_eq!(names(&db, &q().greater_than("dogs.age", 5)), vec!["Alice", "Bob"]);
    assert_eq!(names(&db, &q().equal_to("dogs.name", "rex")), vec!["Alice"]);
    assert_eq!(names(&db, &q().is_null("dog")), vec!["alfred", "bobby", "Carol"]);
    assert_eq!(names(&db, &q().equal_to("dog.name", Value::Null)), vec!["alfred", "bobby", "Carol"]);
    assert_eq!(names(&db, &q().is_empty("dogs")), vec!["alfred", "bobby", "Carol"]);
    assert_eq!(names(&db, &q().is_not_empty("dogs")), vec!["Alice", "Bob"]);
    assert_eq!(q().not().equal_to("dog.name", "rex").count(&db.latest()).unwrap(), 4);
    assert_eq!(names(&db, &q().equal_to("dog", rex)), vec!["Alice"]);

    db.write(|txn| txn.delete_row("Dog", rex)).unwrap();
    assert_eq!(q().equal_to("dog.name", "rex").count(&db.latest()).unwrap(), 0);
    assert_eq!(q().is_null("dog").count(&db.latest()).unwrap(), 4);
    assert_eq!(names(&db, &q().is_not_empty("dogs")), vec!["Alice", "Bob"]);
}

#[test]
fn test_groups() {
    let (db, ..) = small();
    let query = Query::new("Person")
        .greater_than("age", 20)
        .begin_group()
        .begins_with("name", "A")
        .or()
        .equal_to("dog.name", "fido")
        .end_group();
    assert_eq!(names(&db, &query), vec!["Alice", "Bob"]);

    let query = Query::new("Person")
        .not()
        .begin_group()
        .less_than("age", 26)
        .or()
        .greater_than("age", 50)
        .end_group();
    assert_eq!(names(&db, &query), vec!["Alice", "alfred"]);
}

#[test]
fn test_sort_distinct_limit() {
    let (db, ..) = small();
    let snapshot = db.latest();
    let people = Query::new("Person");

    assert_eq!(
        names(&db, &people.clone().sort("score", SortOrder::Ascending)),
        vec!["Bob", "Alice", "Carol", "alfred", "bobby"]
    );
    assert_eq!(
        names(&db, &people.clone().sort("score", SortOrder::Descending)),
        vec!["alfred", "bobby", "Carol", "Alice", "Bob"]
    );
    assert_eq!(
        names(
            &db,
            &people
                .clone()
                .sort("score", SortOrder::Descending)
                .sort("age", SortOrder::Ascending)
        ),
        vec!["bobby", "alfred", "Carol", "Alice", "Bob"]
    );
    assert_eq!(
        names(&db, &people.clone().sort("score", SortOrder::Ascending).distinct("score")),
        vec!["Bob", "Alice", "Carol", "alfred"]
    );
    assert_eq!(
        names(&db, &people.clone().sort("score", SortOrder::Ascending).limit(2)),
        vec!["Bob", "Alice"]
    );

    let sorted = people
        .find_all_sorted(&snapshot, &[("age", SortOrder::Descending)])
        .unwrap();
    assert_eq!(
        snapshot.get("Person", sorted.keys()[0], "name").unwrap(),
        Value::from("Carol")
    );

    let first = people
        .clone()
        .sort("age", SortOrder::Ascending)
        .find_first(&snapshot)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.get("Person", first, "name").unwrap(), Value::from("bobby"));
    assert_eq!(people.clone().limit(0).find_first(&snapshot).unwrap(), None);
}

#[test]
fn test_distinct_treats_signed_zero_and_nan_as_equal() {
    let db = open();
    db.write(|txn| {
        for (name, score) in [
            ("pos", 0.0),
            ("neg", -0.0),
            ("nan", f64::NAN),
            ("other-nan", -f64::NAN),
            ("one", 1.0),
        ] {
            txn.create_row("Person", person(name, 20, Some(score), None, None, vec![]))?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(
        names(&db, &Query::new("Person").distinct("score")),
        vec!["pos", "nan", "one"]
    );
}

#[test]
fn test_aggregates() {
    let (db, ..) = small();
    let snapshot = db.latest();
    let all = Query::new("Person").find_all(&snapshot).unwrap();

    assert_eq!(all.count(), 5);
    assert_eq!(all.sum("score").unwrap(), Value::Double(9.0));
    assert_eq!(all.sum("age").unwrap(), Value::Int(167));
    assert_eq!(all.min("score").unwrap(), Some(Value::Double(1.0)));
    assert_eq!(all.max("age").unwrap(), Some(Value::Int(52)));
    assert_eq!(all.average("score").unwrap(), Some(2.25));
    assert!(matches!(all.sum("name"), Err(QueryError::InvalidQuery(_))));
    assert_eq!(all.records().unwrap().len(), 5);

    let none = Query::new("Person").greater_than("age", 100).find_all(&snapshot).unwrap();
    assert!(none.is_empty());
    assert_eq!(none.sum("age").unwrap(), Value::Int(0));
    assert_eq!(none.min("age").unwrap(), None);
    assert_eq!(none.average("age").unwrap(), None);
}

#[test]
fn test_invalid_queries() {
    let (db, ..) = small();
    let snapshot = db.latest();
    let invalid = |query: Query| {
        assert!(
            matches!(query.count(&snapshot), Err(QueryError::InvalidQuery(_))),
            "{:?} should not compile",
            query
        );
    };

    invalid(Query::new("Nope"));
    invalid(Query::new("Person").equal_to("missing", 1));
    invalid(Query::new("Person").equal_to("age", "x"));
    invalid(Query::new("Person").greater_than("name", "a"));
    invalid(Query::new("Person").is_null("age"));
    invalid(Query::new("Person").equal_to("age", Value::Null));
    invalid(Query::new("Person").contains("age", "1"));
    invalid(Query::new("Person").equal_to("name.first", 1));
    invalid(Query::new("Person").is_empty("age"));
    invalid(Query::new("Person").sort("dog.name", SortOrder::Ascending));
    invalid(Query::new("Person").distinct("dogs"));
    invalid(Query::new("Person").or().equal_to("age", 1));
    invalid(Query::new("Person").begin_group().equal_to("age", 1));

    // numeric columns accept any numeric literal
    assert_eq!(Query::new("Person").equal_to("age", 30.0).count(&snapshot).unwrap(), 1);
}

#[test]
fn test_parsed_queries() {
    let (db, ..) = small();
    let snapshot = db.latest();

    let parsed = Query::parse("Person", "age > 20 AND (name BEGINSWITH[c] 'a' OR dog.name == $0)", &[
        Value::from("fido"),
    ])
    .unwrap();
    assert_eq!(names(&db, &parsed), vec!["Alice", "alfred", "Bob"]);

    let parsed = Query::parse("Person", "score != null SORT(score DESC, age) LIMIT(2)", &[]).unwrap();
    assert_eq!(names(&db, &parsed), vec!["bobby", "alfred"]);

    let parsed = Query::parse("Person", "NOT dogs.age > 5 DISTINCT(score)", &[]).unwrap();
    assert_eq!(names(&db, &parsed), vec!["alfred", "Carol"]);

    let parsed = Query::parse("Person", "name LIKE[c] 'B*'", &[]).unwrap();
    assert_eq!(parsed.count(&snapshot).unwrap(), 2);

    assert!(matches!(
        Query::parse("Person", "name ==", &[]),
        Err(QueryError::Syntax(_))
    ));
    let unknown = Query::parse("Person", "height > 3", &[]).unwrap();
    assert!(matches!(unknown.count(&snapshot), Err(QueryError::InvalidQuery(_))));
}

#[test]
fn test_results_are_stable_per_snapshot() {
    let (db, ..) = small();
    let query = Query::new("Person").greater_than("age", 20);
    let read = db.begin_read();
    let before = query.find_all(&read).unwrap().into_keys();
    assert_eq!(query.find_all(&read).unwrap().into_keys(), before);

    db.write(|txn| {
        txn.create_row("Person", person("Dave", 60, None, None, None, vec![]))?;
        Ok(())
    })
    .unwrap();

    assert_eq!(query.find_all(&read).unwrap().into_keys(), before);
    assert_eq!(query.count(&db.latest()).unwrap(), before.len() + 1);
}

#[test]
fn test_compiled_query_rejects_changed_schema() {
    let (db, ..) = small();
    let compiled = Query::new("Person")
        .equal_to("years", 30)
        .compile(db.latest().schema())
        .unwrap();
    assert_eq!(compiled.execute(&db.latest()).unwrap().len(), 1);

    db.write(|txn| txn.remove_column("Person", "years")).unwrap();
    assert!(matches!(
        compiled.execute(&db.latest()),
        Err(QueryError::InvalidQuery(_))
    ));

    let err = db
        .subscribe(Query::new("Person").equal_to("years", 1), |_| {})
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Query(QueryError::InvalidQuery(_))));
}
