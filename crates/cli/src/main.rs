use std::process::ExitCode;

fn main() -> ExitCode {
    mockops_cli::run()
}
