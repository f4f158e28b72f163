use std::process::ExitCode;

fn main() -> ExitCode {
    vaxel_cli::run()
}
