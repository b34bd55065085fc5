//! Unit tests for module registration, setup and parameter binding.

use std::fs;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use lull_config::{Config, Settings};

use super::*;
use crate::dispatch::DispatchError;
use crate::marshal::ValueKind;
use crate::tests::support::{HealthEvent, RecordingHealthReporter};
use crate::users::CallerId;

#[derive(Debug, Default)]
struct Greeting {
    name: String,
    times: i64,
}

crate::decode_record!(Greeting { name => "name", times => "times" });

#[derive(Debug, Default)]
struct Echo {
    label: &'static str,
    seen: Mutex<Option<Settings>>,
    fail_setup: bool,
}

impl Echo {
    fn named(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            ..Self::default()
        })
    }

    fn seen(&self) -> Option<Settings> {
        self.seen.lock().expect("settings lock").clone()
    }
}

impl Module for Echo {
    fn name(&self) -> &'static str {
        self.label
    }

    fn setup(&self, settings: &Settings) -> Result<(), ModuleError> {
        *self.seen.lock().expect("settings lock") = Some(settings.clone());
        if self.fail_setup {
            return Err("refusing to start".into());
        }
        Ok(())
    }

    fn methods(self: Arc<Self>) -> Vec<MethodEntry> {
        vec![
            MethodEntry::binary("Add", |_: &CallContext, left: f64, right: f64| {
                Ok::<_, DispatchError>(left + right)
            }),
            MethodEntry::unary("Shout", |_: &CallContext, text: String| {
                Ok::<_, DispatchError>(text.to_uppercase())
            }),
            MethodEntry::record("Greet", |_: &CallContext, greeting: Greeting| {
                Ok::<_, DispatchError>(vec![greeting.name; usize::try_from(greeting.times).unwrap_or(0)])
            }),
            MethodEntry::nullary("Whoami", |context: &CallContext| {
                Ok::<_, DispatchError>(context.caller.get())
            }),
        ]
    }
}

struct ConfigDir {
    _dir: TempDir,
    config: Config,
}

impl ConfigDir {
    fn write_module(&self, module: &str, contents: &str) {
        let path = self.config.module_config_path(module);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create modules.d");
        }
        fs::write(path, contents).expect("write module options");
    }
}

#[fixture]
fn config_dir() -> ConfigDir {
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
    let config = Config {
        config_dir: root.join("etc"),
        data_dir: root.join("data"),
        ..Config::default()
    };
    ConfigDir { _dir: dir, config }
}

fn context(module: &'static str, method: &'static str) -> CallContext {
    CallContext {
        caller: CallerId::new(5),
        authkey: String::from("key"),
        module,
        method,
    }
}

#[rstest]
fn modules_without_option_files_are_removed(config_dir: ConfigDir) {
    config_dir.write_module("Echo", "[echo]\nvolume = 3\n");
    let mut registry = ModuleRegistry::new();
    registry.register(Echo::named("Echo")).register(Echo::named("Mute"));
    let reporter = RecordingHealthReporter::default();

    let table = registry
        .setup(&config_dir.config, &reporter)
        .expect("setup succeeds");

    assert!(table.contains_module("echo"));
    assert!(!table.contains_module("mute"));
    assert!(table.lookup("Mute", "Shout").is_none());
    assert_eq!(
        reporter.events(),
        [
            HealthEvent::ModuleReady {
                module: String::from("Echo"),
                methods: 4
            },
            HealthEvent::ModuleRemoved(String::from("Mute")),
        ]
    );
}

#[rstest]
fn module_options_override_global_settings(config_dir: ConfigDir) {
    config_dir.write_module(
        "echo",
        "[echo]\nvolume = 3\n\n[directories]\ndata = \"/srv/echo\"\n",
    );
    let echo = Echo::named("Echo");
    let mut registry = ModuleRegistry::new();
    registry.register(echo.clone());

    registry
        .setup(&config_dir.config, &RecordingHealthReporter::default())
        .expect("setup succeeds");

    let seen = echo.seen().expect("setup ran");
    assert_eq!(seen.integer("echo", "volume").expect("volume"), 3);
    assert_eq!(seen.string("directories", "data").expect("data"), "/srv/echo");
    assert_eq!(
        seen.string("directories", "config").expect("config"),
        config_dir.config.config_dir().as_str()
    );
}

#[rstest]
fn failing_initializers_abort_setup(config_dir: ConfigDir) {
    config_dir.write_module("broken", "");
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(Echo {
        label: "Broken",
        fail_setup: true,
        ..Echo::default()
    }));
    let reporter = RecordingHealthReporter::default();

    let error = registry
        .setup(&config_dir.config, &reporter)
        .expect_err("setup fails");

    assert!(matches!(error, SetupError::Module { .. }));
    assert_eq!(error.module(), "Broken");
    assert_eq!(
        reporter.events(),
        [HealthEvent::ModuleFailed(String::from("Broken"))]
    );
}

#[rstest]
fn unreadable_option_files_abort_setup(config_dir: ConfigDir) {
    config_dir.write_module("echo", "[echo\nvolume = ");
    let mut registry = ModuleRegistry::new();
    registry.register(Echo::named("Echo"));

    let error = registry
        .setup(&config_dir.config, &RecordingHealthReporter::default())
        .expect_err("setup fails");
    assert!(matches!(error, SetupError::Settings { .. }));
}

#[rstest]
fn re_registering_replaces_the_module() {
    let mut registry = ModuleRegistry::new();
    registry.register(Echo::named("Echo")).register(Echo::named("ECHO"));
    assert_eq!(registry.names().collect::<Vec<_>>(), ["ECHO"]);
}

#[rstest]
#[case("echo", "shout")]
#[case("ECHO", "Shout")]
#[case("Echo", "SHOUT")]
fn lookups_ignore_case(#[case] module: &str, #[case] method: &str) {
    let mut registry = ModuleRegistry::new();
    registry.register(Echo::named("Echo"));
    let table = registry.freeze();

    let (canonical, entry) = table.lookup(module, method).expect("method found");
    assert_eq!(canonical, "Echo");
    assert_eq!(entry.name(), "Shout");
}

#[rstest]
fn setup_is_not_remotely_callable() {
    let mut registry = ModuleRegistry::new();
    registry.register(Echo::named("Echo"));
    assert!(registry.freeze().lookup("Echo", "Setup").is_none());
}

fn entry(method: &str) -> MethodEntry {
    let mut registry = ModuleRegistry::new();
    registry.register(Echo::named("Echo"));
    let table = registry.freeze();
    table.lookup("Echo", method).expect("method").1.clone()
}

#[rstest]
#[case(json!([1, 2.5]), json!(3.5))]
#[case(json!([2, 2]), json!(4.0))]
fn positional_calls_accept_matching_kinds(#[case] params: Value, #[case] expected: Value) {
    let result = entry("Add")
        .call(&context("Echo", "Add"), &params)
        .expect("call succeeds");
    assert_eq!(result, expected);
}

#[rstest]
#[case(json!([1]), 2, 1)]
#[case(json!([1, 2, 3]), 2, 3)]
#[case(Value::Null, 2, 0)]
fn positional_arity_is_checked_before_invocation(
    #[case] params: Value,
    #[case] expected: usize,
    #[case] found: usize,
) {
    let error = entry("Add")
        .call(&context("Echo", "Add"), &params)
        .expect_err("arity mismatch");
    assert!(matches!(
        error,
        DispatchError::ArityMismatch { expected: e, found: f, .. } if e == expected && f == found
    ));
}

#[rstest]
fn positional_kinds_are_checked_per_position() {
    let error = entry("Add")
        .call(&context("Echo", "Add"), &json!([1, "two"]))
        .expect_err("kind mismatch");
    assert_eq!(
        error.to_string(),
        "parameter #1 for method 'Echo.Add' should be float, is string"
    );
}

#[rstest]
fn positional_methods_reject_maps() {
    let error = entry("Shout")
        .call(&context("Echo", "Shout"), &json!({"text": "hi"}))
        .expect_err("map rejected");
    assert!(matches!(
        error,
        DispatchError::TypeMismatch {
            position: None,
            found: ValueKind::Map,
            ..
        }
    ));
}

#[rstest]
#[case(json!({"NAME": "ada", "times": 2}))]
#[case(json!({"name": "ada", "Times": 2.0}))]
fn record_methods_bind_maps(#[case] params: Value) {
    let result = entry("Greet")
        .call(&context("Echo", "Greet"), &params)
        .expect("call succeeds");
    assert_eq!(result, json!(["ada", "ada"]));
}

#[rstest]
fn record_leaf_mismatches_fall_back_to_defaults() {
    let result = entry("Greet")
        .call(&context("Echo", "Greet"), &json!({"name": 7, "times": 1}))
        .expect("lenient call");
    assert_eq!(result, json!([""]));
}

#[rstest]
#[case(json!("ada"), None, ValueKind::String)]
#[case(json!([3]), Some(0), ValueKind::Integer)]
#[case(json!([{"name": "ada", "times": 2}]), Some(0), ValueKind::Map)]
fn record_methods_reject_non_maps(
    #[case] params: Value,
    #[case] position: Option<usize>,
    #[case] found: ValueKind,
) {
    let error = entry("Greet")
        .call(&context("Echo", "Greet"), &params)
        .expect_err("not a record");
    assert!(matches!(
        error,
        DispatchError::TypeMismatch { position: p, found: f, .. } if p == position && f == found
    ));
}

#[rstest]
fn record_fields_refuse_lists() {
    let error = entry("Greet")
        .call(&context("Echo", "Greet"), &json!({"name": ["ada"], "times": 1}))
        .expect_err("list onto a string field");
    assert!(matches!(
        error,
        DispatchError::TypeMismatch {
            position: None,
            found: ValueKind::List,
            ref expected,
            ..
        } if expected.contains("name")
    ));
}

#[rstest]
fn record_methods_reject_multiple_positional_values() {
    let error = entry("Greet")
        .call(&context("Echo", "Greet"), &json!([{}, {}]))
        .expect_err("arity mismatch");
    assert_eq!(error.code(), "arity_mismatch");
}

#[rstest]
fn nullary_methods_see_the_caller() {
    let result = entry("Whoami")
        .call(&context("Echo", "Whoami"), &json!([]))
        .expect("call succeeds");
    assert_eq!(result, json!(5));
}
