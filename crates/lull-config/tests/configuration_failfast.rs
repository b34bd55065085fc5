//! Configuration errors stop loading instead of falling back to defaults.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use ortho_config::{OrthoConfig, OrthoError};
use rstest::rstest;
use tempfile::TempDir;

use lull_config::Config;

fn load(flags: &[&str]) -> Result<Config, String> {
    let args = std::iter::once("lulld")
        .chain(flags.iter().copied())
        .map(OsString::from)
        .collect::<Vec<_>>();
    Config::load_from_iter(args).map_err(|error| error.to_string())
}

fn load_file(contents: &str) -> (TempDir, PathBuf, Result<Config, std::sync::Arc<OrthoError>>) {
    let scratch = TempDir::new().expect("create temp dir");
    let path = scratch.path().join("lulld.toml");
    fs::write(&path, contents).expect("write config file");
    let args = vec![
        OsString::from("lulld"),
        OsString::from("--config-path"),
        path.clone().into_os_string(),
    ];
    let outcome = Config::load_from_iter(args);
    (scratch, path, outcome)
}

fn names_file(error: &OrthoError, path: &Path) -> bool {
    match error {
        OrthoError::File { path: failing, .. } => failing == path,
        OrthoError::Aggregate(errors) => errors.iter().any(|inner| names_file(inner, path)),
        _ => false,
    }
}

#[rstest]
#[case::unknown_transport(&["--listen", "carrier-pigeon://loft"])]
#[case::tcp_without_port(&["--listen", "tcp://127.0.0.1"])]
#[case::unix_without_path(&["--listen", "unix://"])]
#[case::negative_cap(&["--max-connections", "-3"])]
#[case::unknown_log_format(&["--log-format", "yaml"])]
fn invalid_flags_are_rejected(#[case] flags: &[&str]) {
    let outcome = load(flags);
    assert!(outcome.is_err(), "{flags:?} loaded as {outcome:?}");
}

#[rstest]
#[case::bare_word_value("max_connections = not_a_number")]
#[case::unterminated_table("listen = { transport = \"tcp\" host = \"127.0.0.1\" }")]
fn unreadable_files_name_the_failing_path(#[case] contents: &str) {
    let (_scratch, path, outcome) = load_file(contents);
    let error = outcome.expect_err("loading must fail");
    assert!(
        names_file(&error, &path),
        "error does not point at {}: {error}",
        path.display()
    );
}

#[rstest]
#[case::cap_is_not_a_number("max_connections = \"many\"")]
#[case::listener_is_not_a_socket("listen = \"http://127.0.0.1:80\"")]
#[case::unknown_log_format("log_format = \"yaml\"")]
fn mistyped_file_values_are_rejected(#[case] contents: &str) {
    let (_scratch, _path, outcome) = load_file(contents);
    assert!(outcome.is_err(), "{contents:?} loaded as {outcome:?}");
}

#[rstest]
fn a_valid_file_still_loads() {
    let (_scratch, _path, outcome) =
        load_file("listen = \"tcp://127.0.0.1:7400\"\nmax_connections = 8\n");
    let config = outcome.expect("valid file");
    assert_eq!(config.listen().to_string(), "tcp://127.0.0.1:7400");
    assert_eq!(config.max_connections(), Some(8));
}
