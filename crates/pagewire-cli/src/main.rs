use std::process::ExitCode;

fn main() -> ExitCode {
    pagewire_cli::run()
}
