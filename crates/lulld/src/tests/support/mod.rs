//! Shared doubles and steps for the behaviour suites.

mod config_loader;
mod reporter;

use rstest::fixture;
use rstest_bdd_macros::given;

pub use config_loader::{LoaderChoice, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};

#[fixture]
pub fn loader() -> LoaderChoice {
    LoaderChoice::default()
}

#[given("a failing configuration loader")]
fn given_failing_loader(loader: &LoaderChoice) {
    loader.fail();
}
