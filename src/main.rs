use rsake::cli::{EXIT_BUILD_FAILED, EXIT_SUCCESS, EXIT_USAGE};
use std::process;

fn main() {
    let code = match rsake::cli::run() {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_BUILD_FAILED,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    };
    process::exit(code);
}
