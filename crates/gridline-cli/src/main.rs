use std::process::ExitCode;

fn main() -> ExitCode {
    match gridline_core::run(std::env::args_os().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gridline: {err:#}");
            ExitCode::FAILURE
        }
    }
}
