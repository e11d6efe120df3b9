use std::process::ExitCode;

fn main() -> ExitCode {
    stream_capture::run()
}
