//! snoopd daemon entry point: resolves the project data directory, then
//! hands off to the Supervisor for the full startup sequence (spec §4.7).

mod pidfile;
mod retention;
mod signals;
mod supervisor;

use std::path::PathBuf;

use snoopd_common::paths::ProjectPaths;

#[tokio::main]
async fn main() {
    let override_dir = parse_data_dir_override();
    let start = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let paths = ProjectPaths::resolve(&start, override_dir.as_deref());

    if let Err(failure) = supervisor::run(paths).await {
        eprintln!("snoopd: startup failed: {failure:?}");
        std::process::exit(failure.exit_code());
    }
}

/// Accepts `--data-dir <path>` as the only recognized flag; everything else
/// is ignored so front-ends can pass through their own arguments untouched.
fn parse_data_dir_override() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--data-dir" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
