use std::ffi::OsString;
use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = std::env::args_os().collect::<Vec<OsString>>();
    if lulld::is_user_command(&args) {
        return lulld::run_user_command(args, &mut io::stdout().lock(), &mut io::stderr().lock());
    }
    match lulld::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("lulld: {error}");
            ExitCode::FAILURE
        }
    }
}
