//! `lulld user` administration subcommand.
//!
//! Operators manage the caller table offline: the subcommand opens the same
//! user store the daemon reads and prints one line per outcome.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use lull_config::Config;
use ortho_config::OrthoConfig;
use thiserror::Error;

use crate::users::{CallerId, UserStore, UserStoreError};

/// Command-line interface of `lulld user`.
#[derive(Parser, Debug)]
#[command(name = "lulld user", disable_help_subcommand = true)]
pub(crate) struct UserCli {
    /// Data directory holding the user store. Defaults to the configured one.
    #[arg(long, value_name = "DIR")]
    pub(crate) data_dir: Option<Utf8PathBuf>,
    #[command(subcommand)]
    pub(crate) action: UserAction,
}

/// User table operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum UserAction {
    /// Creates a user and prints its id and authkey.
    Add {
        /// Uses this authkey instead of generating one.
        #[arg(long)]
        authkey: Option<String>,
    },
    /// Removes a user and their options.
    Remove {
        /// Id of the user to remove.
        id: i64,
    },
    /// Lists every user.
    List,
}

#[derive(Debug, Error)]
enum AdminError {
    #[error("unable to load configuration: {0}")]
    Config(String),
    #[error("unable to open the user store: {0}")]
    Open(#[source] UserStoreError),
    #[error("unable to add user: {0}")]
    Add(#[source] UserStoreError),
    #[error("unable to remove user: {0}")]
    Remove(#[source] UserStoreError),
    #[error("unable to list users: {0}")]
    List(#[source] UserStoreError),
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Returns true when `args` (including the program name) select `lulld user`.
#[must_use]
pub fn is_user_command(args: &[OsString]) -> bool {
    args.get(1).is_some_and(|word| word == "user")
}

/// Runs `lulld user ...`; `args` start with the program name.
pub fn run_user_command<W: Write, E: Write>(
    args: Vec<OsString>,
    stdout: &mut W,
    stderr: &mut E,
) -> ExitCode {
    let cli = match UserCli::try_parse_from(args.into_iter().skip(1)) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = write!(stderr, "{error}");
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    match execute(cli, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "lulld: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(cli: UserCli, stdout: &mut W) -> Result<(), AdminError> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::load_from_iter([OsString::from("lulld")])
            .map_err(|error| AdminError::Config(error.to_string()))?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&data_dir)?;
    let store = UserStore::open(&data_dir).map_err(AdminError::Open)?;
    match cli.action {
        UserAction::Add { authkey } => {
            let (id, authkey) = match authkey {
                Some(authkey) => {
                    let id = store.add_user(&authkey).map_err(AdminError::Add)?;
                    (id, authkey)
                }
                None => store.create_user().map_err(AdminError::Add)?,
            };
            writeln!(
                stdout,
                "User with id '{}', authkey '{authkey}' added successfully.",
                id.get()
            )?;
        }
        UserAction::Remove { id } => {
            store
                .remove_user(CallerId::new(id))
                .map_err(AdminError::Remove)?;
            writeln!(stdout, "User with id '{id}' removed successfully.")?;
        }
        UserAction::List => {
            writeln!(stdout, "#\tID\tAuthkey")?;
            let users = store.list().map_err(AdminError::List)?;
            for (position, (id, authkey)) in users.iter().enumerate() {
                writeln!(stdout, "{}\t{}\t{authkey}", position + 1, id.get())?;
            }
        }
    }
    Ok(())
}
