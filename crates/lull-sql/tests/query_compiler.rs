//! Behaviour tests for the query compiler.

use std::cell::RefCell;

use lull_sql::{
    CompileError, CompiledQuery, Compiler, DeleteQuery, OrderSpec, ReadQuery, Schema,
    SchemaCatalog,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

#[derive(Default)]
struct World {
    catalog: Option<SchemaCatalog>,
    outcome: Option<Result<CompiledQuery, CompileError>>,
}

impl World {
    fn compiler(&self) -> Compiler<'_> {
        let catalog = self.catalog.as_ref().expect("catalog configured");
        Compiler::new(catalog, "shop")
    }

    fn compiled(&self) -> &CompiledQuery {
        match self.outcome.as_ref().expect("compilation attempted") {
            Ok(compiled) => compiled,
            Err(error) => panic!("compilation failed: {error}"),
        }
    }
}

fn filter(text: &str) -> Vec<Value> {
    match serde_json::from_str(text).expect("filter JSON") {
        Value::Array(items) => items,
        other => panic!("filter must be a list, got {other}"),
    }
}

fn category(error: &CompileError) -> &'static str {
    match error {
        CompileError::IdentifierInvalid { .. } => "identifier_invalid",
        CompileError::FilterMalformed { .. } => "filter_malformed",
        CompileError::UnboundedDelete => "unbounded_delete",
        CompileError::Catalog(_) => "internal",
    }
}

#[fixture]
fn world() -> RefCell<World> {
    RefCell::new(World::default())
}

#[given("a catalog where database \"{database}\" has table \"{table}\" with columns \"{columns}\"")]
fn given_catalog(world: &RefCell<World>, database: String, table: String, columns: String) {
    let columns = columns.split(',').collect::<Vec<_>>();
    let schema = Schema::from_tables([(database.as_str(), table.as_str(), columns.as_slice())]);
    world.borrow_mut().catalog = Some(SchemaCatalog::with_contents(schema));
}

#[when(
    "I compile a read of \"{table}\" with filter '{items}' ordered by \"{column}\" \"{order}\" limited to {limit}"
)]
fn when_compile_ordered_read(
    world: &RefCell<World>,
    table: String,
    items: String,
    column: String,
    order: String,
    limit: i64,
) {
    let query = ReadQuery {
        table,
        filter: filter(&items),
        order: vec![OrderSpec { column, order }],
        limit,
        ..ReadQuery::default()
    };
    let outcome = world.borrow().compiler().select(&query);
    world.borrow_mut().outcome = Some(outcome);
}

#[when("I compile a read of \"{table}\" with filter '{items}'")]
fn when_compile_read(world: &RefCell<World>, table: String, items: String) {
    let query = ReadQuery {
        table,
        filter: filter(&items),
        ..ReadQuery::default()
    };
    let outcome = world.borrow().compiler().select(&query);
    world.borrow_mut().outcome = Some(outcome);
}

#[when("I compile a delete from \"{table}\" with filter '{items}'")]
fn when_compile_delete(world: &RefCell<World>, table: String, items: String) {
    let query = DeleteQuery {
        table,
        filter: filter(&items),
    };
    let outcome = world.borrow().compiler().delete(&query);
    world.borrow_mut().outcome = Some(outcome);
}

#[then("the SQL is \"{sql}\"")]
fn then_sql(world: &RefCell<World>, sql: String) {
    assert_eq!(world.borrow().compiled().sql, sql);
}

#[then("the bound values are \"{values}\"")]
fn then_values(world: &RefCell<World>, values: String) {
    let expected: Vec<Value> =
        serde_json::from_str(&values.replace("\\\"", "\"")).expect("values JSON");
    assert_eq!(world.borrow().compiled().params, expected);
}

#[then("compilation fails with \"{code}\"")]
fn then_fails(world: &RefCell<World>, code: String) {
    let world = world.borrow();
    match world.outcome.as_ref().expect("compilation attempted") {
        Ok(compiled) => panic!("expected failure, compiled {}", compiled.sql),
        Err(error) => assert_eq!(category(error), code),
    }
}

#[scenario(
    path = "tests/features/query_compiler.feature",
    name = "Filtered read with ordering and limit"
)]
fn filtered_read(world: RefCell<World>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_compiler.feature",
    name = "Negated membership test"
)]
fn negated_membership(world: RefCell<World>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_compiler.feature",
    name = "Unknown columns never reach SQL"
)]
fn unknown_columns(world: RefCell<World>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_compiler.feature",
    name = "Deletes require a filter"
)]
fn deletes_require_filter(world: RefCell<World>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_compiler.feature",
    name = "Deletes bind filter values in order"
)]
fn deletes_bind_in_order(world: RefCell<World>) {
    drop(world);
}
