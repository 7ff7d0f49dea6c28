#![forbid(unsafe_code)]

fn main() {
    std::process::exit(sms_triage_cli::run());
}
