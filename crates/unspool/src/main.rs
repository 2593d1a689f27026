use std::process::ExitCode;

use clap::Parser;

mod cli;

fn main() -> ExitCode {
    let app = cli::App::parse();
    cli::init_logging(app.verbose);

    match cli::run(&app) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("unspool: {err:#}");
            ExitCode::FAILURE
        }
    }
}
