#![cfg(unix)]

use std::{collections::BTreeSet, fs, thread, time::Duration};

use chrono::{Local, TimeZone};
use rollfile::{Config, ProcessWriter, Writer as _};

const WORKER: &str = env!("CARGO_BIN_EXE_rollfile-worker");

#[test]
fn concurrent_writes_survive_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");

    let writer = ProcessWriter::spawn(&Config::new(&path), WORKER).unwrap();

    thread::scope(|s| {
        for producer in 0..4 {
            let writer = &writer;

            s.spawn(move || {
                for line in 0..250 {
                    writer.write(&format!("producer-{producer}-line-{line}\n"));
                }
            });
        }
    });

    writer.close().unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    let lines = contents.lines().map(str::to_owned).collect::<Vec<_>>();

    assert_eq!(1000, lines.len());

    let expected = (0..4)
        .flat_map(|producer| (0..250).map(move |line| format!("producer-{producer}-line-{line}")))
        .collect::<BTreeSet<_>>();

    assert_eq!(expected, lines.into_iter().collect::<BTreeSet<_>>());
}

#[test]
fn connected_writers_share_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");

    let owner = ProcessWriter::spawn(&Config::new(&path), WORKER).unwrap();
    let connected = ProcessWriter::connect(owner.socket()).unwrap();

    for i in 0..10 {
        owner.write(&format!("owner {i}\n"));
        connected.write(&format!("connected {i}\n"));
    }

    connected.close().unwrap();
    owner.close().unwrap();

    let contents = fs::read_to_string(&path).unwrap();

    let owner_lines = contents
        .lines()
        .filter(|line| line.starts_with("owner"))
        .collect::<Vec<_>>();
    let connected_lines = contents
        .lines()
        .filter(|line| line.starts_with("connected"))
        .collect::<Vec<_>>();

    // Each connection is written in order
    assert_eq!(
        (0..10).map(|i| format!("owner {i}")).collect::<Vec<_>>(),
        owner_lines
    );
    assert_eq!(
        (0..10).map(|i| format!("connected {i}")).collect::<Vec<_>>(),
        connected_lines
    );

    assert!(!owner.socket().exists());
}

#[test]
fn flush_and_close_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");

    let mut config = Config::new(&path);
    config.compression = Some("gz".to_owned());

    let writer = ProcessWriter::spawn(&config, WORKER).unwrap();

    writer.write("line\n");
    assert!(writer.blocking_flush(Duration::from_secs(10)));

    writer.close().unwrap();
    writer.close().unwrap();

    // The worker compresses the file as it closes it
    assert!(!path.exists());
    assert!(dir.path().join("app.log.gz").exists());
}

#[test]
fn records_keep_the_time_they_were_written() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::new(dir.path().join("app.{time:YYYY-MM-DD}.log"));
    config.delay = true;

    let writer = ProcessWriter::spawn(&config, WORKER).unwrap();

    writer.write_at(
        "line\n",
        Local.with_ymd_and_hms(2001, 6, 1, 12, 0, 0).unwrap(),
    );

    writer.close().unwrap();

    // The worker names the file from the record's time, not the time it received it
    assert_eq!(
        "line\n",
        fs::read_to_string(dir.path().join("app.2001-06-01.log")).unwrap()
    );
}

#[test]
fn invalid_config_fails_before_spawning() {
    let mut config = Config::new("app.log");
    config.rotation = Some(rollfile::RotationConfig::Spec("sometimes".to_owned()));

    let err = ProcessWriter::spawn(&config, WORKER).err().unwrap();

    assert!(err.is_config());
}
