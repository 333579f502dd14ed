//
// main.rs
// dcmsort
//
// Entry point: parses arguments, wires up logging, runs the pipeline, and maps the outcome to an exit code.
//

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use dcmsort::{cli, logging, Cli};

fn main() -> ExitCode {
    let args = Cli::parse();

    // The guard flushes the file layer on exit; it must live to the end.
    let _guard = match logging::init(args.verbose) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Failed to set up logging: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    match cli::run(&args) {
        Ok(summary) => {
            if args.json {
                match summary.to_json() {
                    Ok(json) => println!("{}", json),
                    Err(err) => {
                        error!("Failed to serialize the run summary: {}", err);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print!("{}", summary);
            }
            summary.exit_code()
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
