//! Unit tests for request compilation.

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

#[fixture]
fn catalog() -> SchemaCatalog {
    SchemaCatalog::with_contents(Schema::from_tables([
        ("shop", "users", &["id", "name", "age", "status"][..]),
        ("shop", "orders", &["id", "user_id", "total"][..]),
        ("archive", "users", &["id", "name"][..]),
    ]))
}

fn list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => panic!("expected a list, got {other}"),
    }
}

fn read(table: &str) -> ReadQuery {
    ReadQuery {
        table: table.to_owned(),
        ..ReadQuery::default()
    }
}

#[rstest]
fn compiles_filtered_ordered_limited_read(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        filter: list(json!(["where", {"age >": 18}])),
        order: vec![OrderSpec {
            column: String::from("name"),
            order: String::from("ASC"),
        }],
        limit: 5,
        ..read("users")
    };

    let compiled = compiler.select(&query).expect("compile");

    assert_eq!(
        compiled.sql,
        "SELECT * FROM users WHERE (age > ?) ORDER BY name ASC LIMIT 5"
    );
    assert_eq!(compiled.params, vec![json!(18)]);
    assert_eq!(compiled.target, TableRef::new("shop", "users"));
}

#[rstest]
fn negated_where_in_binds_each_member_in_order(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        filter: list(json!(["where-in", "not", {"column": "id", "in": [3, 1, 2]}])),
        ..read("users")
    };

    let compiled = compiler.select(&query).expect("compile");

    assert_eq!(compiled.sql, "SELECT * FROM users WHERE id NOT IN (?, ?, ?)");
    assert_eq!(compiled.params, vec![json!(3), json!(1), json!(2)]);
}

#[rstest]
fn clauses_combine_with_and_unless_or_precedes(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        filter: list(json!([
            "where", {"age >=": 21, "status": "active"},
            "or", {"name": "root"},
            "like", "not", {"name": "test%"}
        ])),
        ..read("users")
    };

    let compiled = compiler.select(&query).expect("compile");

    assert_eq!(
        compiled.sql,
        "SELECT * FROM users WHERE (age >= ?) AND (status = ?) OR (name = ?) AND name NOT LIKE ?"
    );
    assert_eq!(
        compiled.params,
        vec![json!(21), json!("active"), json!("root"), json!("test%")]
    );
}

#[rstest]
fn compiles_projection_join_group_having(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        select: list(json!(["users.*", {"orders.total": "spent"}, "name"])),
        distinct: true,
        joins: vec![JoinSpec {
            table: String::from("orders"),
            conditions: vec![
                String::from("orders.user_id = users.id"),
                String::from("orders.total > \"100\""),
            ],
            kind: String::from("left outer"),
        }],
        group: vec![String::from("name")],
        having: list(json!([{"age <": 65}, "or", {"age": 99}])),
        order: vec![OrderSpec {
            column: String::from("id"),
            order: String::from("random"),
        }],
        limit: 10,
        offset: 20,
        ..read("users")
    };

    let compiled = compiler.select(&query).expect("compile");

    assert_eq!(
        compiled.sql,
        "SELECT DISTINCT users.*, orders.total AS spent, name FROM users \
         LEFT OUTER JOIN orders ON orders.user_id = users.id AND orders.total > ? \
         GROUP BY name HAVING (age < ?) OR (age = ?) ORDER BY RANDOM() LIMIT 10 OFFSET 20"
    );
    assert_eq!(compiled.params, vec![json!("100"), json!(65), json!(99)]);
}

#[rstest]
fn tables_outside_the_default_database_render_qualified(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let compiled = compiler.select(&read("archive.users")).expect("compile");
    assert_eq!(compiled.sql, "SELECT * FROM archive.users");
    assert_eq!(compiled.target, TableRef::new("archive", "users"));
}

#[rstest]
#[case::unknown_table(read("payments"))]
#[case::unknown_database(read("nowhere.users"))]
#[case::over_qualified(read("a.b.c"))]
#[case::unknown_filter_column(ReadQuery {
    filter: vec![json!("where"), json!({"email": "x"})],
    ..read("users")
})]
#[case::unknown_projection(ReadQuery { select: vec![json!("email")], ..read("users") })]
#[case::unknown_group(ReadQuery { group: vec![String::from("total")], ..read("users") })]
fn unknown_identifiers_fail_compilation(catalog: SchemaCatalog, #[case] query: ReadQuery) {
    let compiler = Compiler::new(&catalog, "shop");
    assert!(matches!(
        compiler.select(&query),
        Err(CompileError::IdentifierInvalid { .. })
    ));
}

#[rstest]
#[case::token_first_clause(json!([{"age": 1}]))]
#[case::unknown_token(json!(["where", "nor", {"age": 1}]))]
#[case::bad_operator(json!(["where", {"age ~": 1}]))]
#[case::too_many_fields(json!(["where", {"age > x": 1}]))]
#[case::negated_where(json!(["where", "not", {"age": 1}]))]
#[case::empty_clause(json!(["where", {}]))]
#[case::in_without_list(json!(["where-in", {"column": "id", "in": 4}]))]
#[case::in_empty_list(json!(["where-in", {"column": "id", "in": []}]))]
#[case::scalar_entry(json!(["where", 4]))]
fn malformed_filters_are_rejected(catalog: SchemaCatalog, #[case] filter: Value) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        filter: list(filter),
        ..read("users")
    };
    assert!(matches!(
        compiler.select(&query),
        Err(CompileError::FilterMalformed { .. })
    ));
}

#[rstest]
#[case::join_type(JoinSpec {
    table: String::from("orders"),
    conditions: vec![String::from("orders.user_id = users.id")],
    kind: String::from("cross"),
})]
#[case::join_condition_shape(JoinSpec {
    table: String::from("orders"),
    conditions: vec![String::from("orders.user_id=users.id")],
    kind: String::from("inner"),
})]
#[case::join_without_conditions(JoinSpec {
    table: String::from("orders"),
    conditions: Vec::new(),
    kind: String::from("inner"),
})]
fn malformed_joins_are_rejected(catalog: SchemaCatalog, #[case] join: JoinSpec) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        joins: vec![join],
        ..read("users")
    };
    assert!(matches!(
        compiler.select(&query),
        Err(CompileError::FilterMalformed { .. })
    ));
}

#[rstest]
#[case::having_not(ReadQuery { having: vec![json!("not"), json!({"age": 1})], ..read("users") })]
#[case::order_keyword(ReadQuery {
    order: vec![OrderSpec { column: String::from("age"), order: String::from("UP") }],
    ..read("users")
})]
#[case::negative_limit(ReadQuery { limit: -1, ..read("users") })]
#[case::alias_injection(ReadQuery { select: vec![json!({"name": "n; DROP"})], ..read("users") })]
fn malformed_read_portions_are_rejected(catalog: SchemaCatalog, #[case] query: ReadQuery) {
    let compiler = Compiler::new(&catalog, "shop");
    assert!(matches!(
        compiler.select(&query),
        Err(CompileError::FilterMalformed { .. })
    ));
}

#[rstest]
fn offset_without_limit_is_dropped(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = ReadQuery {
        offset: 5,
        ..read("users")
    };
    assert_eq!(compiler.select(&query).expect("compile").sql, "SELECT * FROM users");
}

#[rstest]
fn write_without_filter_inserts_sorted_columns(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = WriteQuery {
        table: String::from("users"),
        data: [(String::from("name"), json!("ada")), (String::from("age"), json!(36))]
            .into_iter()
            .collect(),
        filter: Vec::new(),
    };

    let compiled = compiler.write(&query).expect("compile");

    assert_eq!(compiled.sql, "INSERT INTO users (age, name) VALUES (?, ?)");
    assert_eq!(compiled.params, vec![json!(36), json!("ada")]);
}

#[rstest]
fn write_with_filter_updates_and_binds_data_first(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = WriteQuery {
        table: String::from("users"),
        data: [(String::from("status"), json!("banned"))].into_iter().collect(),
        filter: list(json!(["where", {"id": 7}])),
    };

    let compiled = compiler.write(&query).expect("compile");

    assert_eq!(compiled.sql, "UPDATE users SET status = ? WHERE (id = ?)");
    assert_eq!(compiled.params, vec![json!("banned"), json!(7)]);
}

#[rstest]
#[case::no_data(WriteQuery { table: String::from("users"), ..WriteQuery::default() })]
fn writes_need_data(catalog: SchemaCatalog, #[case] query: WriteQuery) {
    let compiler = Compiler::new(&catalog, "shop");
    assert!(matches!(
        compiler.write(&query),
        Err(CompileError::FilterMalformed { .. })
    ));
}

#[rstest]
fn write_rejects_unknown_columns(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = WriteQuery {
        table: String::from("users"),
        data: [(String::from("password"), json!("x"))].into_iter().collect(),
        filter: Vec::new(),
    };
    assert!(matches!(
        compiler.write(&query),
        Err(CompileError::IdentifierInvalid { .. })
    ));
}

#[rstest]
#[case(json!([]))]
#[case(json!(["where"]))]
fn delete_without_predicates_is_unbounded(catalog: SchemaCatalog, #[case] filter: Value) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = DeleteQuery {
        table: String::from("users"),
        filter: list(filter),
    };
    assert!(matches!(
        compiler.delete(&query),
        Err(CompileError::UnboundedDelete)
    ));
}

#[rstest]
fn delete_binds_filter_values_in_order(catalog: SchemaCatalog) {
    let compiler = Compiler::new(&catalog, "shop");
    let query = DeleteQuery {
        table: String::from("users"),
        filter: list(json!(["where", {"age <": 18}, "where-in", {"column": "status", "in": ["new", "idle"]}])),
    };

    let compiled = compiler.delete(&query).expect("compile");

    assert_eq!(
        compiled.sql,
        "DELETE FROM users WHERE (age < ?) AND status IN (?, ?)"
    );
    assert_eq!(compiled.params, vec![json!(18), json!("new"), json!("idle")]);
}

#[rstest]
#[case("INSERT INTO orders (id) VALUES (1)", RawFollowUp::Invalidate(TableRef::new("shop", "orders")))]
#[case("UPDATE archive.users SET name = 'x'", RawFollowUp::Invalidate(TableRef::new("archive", "users")))]
#[case("CREATE TABLE shop.t (id INTEGER)", RawFollowUp::RefreshDatabase(String::from("shop")))]
#[case("DROP TABLE orders", RawFollowUp::RefreshDatabase(String::from("shop")))]
#[case("ALTER TABLE users RENAME TO people", RawFollowUp::RefreshDatabase(String::from("shop")))]
#[case("DROP DATABASE archive", RawFollowUp::RefreshAll)]
#[case("SELECT 1", RawFollowUp::Nothing)]
fn raw_plans_name_their_follow_up(
    catalog: SchemaCatalog,
    #[case] sql: &str,
    #[case] expected: RawFollowUp,
) {
    let compiler = Compiler::new(&catalog, "shop");
    let statement = RawStatement::inspect(sql).expect("inspect");
    assert_eq!(compiler.plan_raw(&statement).expect("plan").follow_up, expected);
}

#[rstest]
#[case("INSERT INTO payments (id) VALUES (1)")]
#[case("CREATE TABLE nowhere.t (id INTEGER)")]
#[case("DROP DATABASE nowhere")]
fn raw_plans_reject_unknown_objects(catalog: SchemaCatalog, #[case] sql: &str) {
    let compiler = Compiler::new(&catalog, "shop");
    let statement = RawStatement::inspect(sql).expect("inspect");
    assert!(matches!(
        compiler.plan_raw(&statement),
        Err(CompileError::IdentifierInvalid { .. })
    ));
}
