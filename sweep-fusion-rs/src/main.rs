use std::process::ExitCode;

fn main() -> ExitCode {
    sweep_fusion::cli::run()
}
