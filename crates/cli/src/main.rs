use std::process::ExitCode;

fn main() -> ExitCode {
    havitush_cli::run()
}
