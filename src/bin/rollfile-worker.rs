/*!
A worker process for `rollfile::ProcessWriter`.

The worker reads its configuration from the environment, so it's started by `ProcessWriter::spawn` rather than by hand.
*/

#[cfg(unix)]
fn main() -> Result<(), rollfile::Error> {
    rollfile::process::run_worker_from_env()
}

#[cfg(not(unix))]
fn main() {
    eprintln!("rollfile-worker is only supported on unix platforms");
    std::process::exit(1);
}
