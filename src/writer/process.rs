/*!
A [`Writer`] backed by a worker process.

The worker owns the [`LogFile`] and listens on a Unix domain socket. Producers in any process connect to the socket and send it framed text, which the worker writes in the order it arrives on each connection.

Frames are a one byte tag, a little-endian `u32` payload length, and the payload. A write frame carries the record's timestamp as little-endian `i64` microseconds since the Unix epoch, followed by UTF8 text. A stop frame has no payload and asks the worker to finish writing and exit.
*/

use std::{
    env,
    io::{self, BufWriter, Read, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    process::{self, Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};

use crate::{internal_metrics::InternalMetrics, Config, Error, LogFile, Writer};

/**
The environment variable a worker reads its JSON [`Config`] from.
*/
pub const CONFIG_ENV: &str = "ROLLFILE_WORKER_CONFIG";

/**
The environment variable a worker reads the path of its socket from.
*/
pub const SOCKET_ENV: &str = "ROLLFILE_WORKER_SOCKET";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_READ_TIMEOUT: Duration = Duration::from_millis(50);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const TAG_WRITE: u8 = 0;
const TAG_STOP: u8 = 1;
const HEADER_LEN: usize = 5;
const TIME_LEN: usize = 8;

/**
A [`Writer`] that forwards text to a worker process over a Unix domain socket.

The writer that spawned the worker owns it. Closing the owner writes everything it queued, then stops the worker, which closes its [`LogFile`]. Writers created with [`ProcessWriter::connect`] only close their own connection.

Dropping a [`ProcessWriter`] closes it.
*/
pub struct ProcessWriter {
    socket: PathBuf,
    sender: rollfile_batcher::Sender<Vec<(String, DateTime<Local>)>>,
    metrics: Arc<InternalMetrics>,
    running: Mutex<Option<Running>>,
}

struct Running {
    forwarder: thread::JoinHandle<BufWriter<UnixStream>>,
    worker: Option<Child>,
}

impl ProcessWriter {
    /**
    Spawn a worker process that writes to a log file described by `config`.

    The `worker` is an executable that calls [`run_worker_from_env`], like the `rollfile-worker` binary.
    */
    pub fn spawn(config: &Config, worker: impl AsRef<Path>) -> Result<Self, Error> {
        // Catch invalid policies here instead of in the worker
        config.builder()?;

        let socket = env::temp_dir().join(format!(
            "rollfile-{}-{:08x}.sock",
            process::id(),
            rand::random::<u32>()
        ));

        let mut child = Command::new(worker.as_ref())
            .env(CONFIG_ENV, config.to_json()?)
            .env(SOCKET_ENV, &socket)
            .stdin(Stdio::null())
            .spawn()?;

        let stream = match connect_to_worker(&socket, &mut child) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();

                return Err(err);
            }
        };

        emit::debug!(
            rt: emit::runtime::internal(),
            "spawned worker {pid} listening on {socket}",
            pid: child.id(),
            #[emit::as_debug]
            socket,
        );

        ProcessWriter::start(socket, stream, Some(child))
    }

    /**
    Connect to the worker listening on `socket`.
    */
    pub fn connect(socket: impl AsRef<Path>) -> Result<Self, Error> {
        let socket = socket.as_ref().to_owned();
        let stream = UnixStream::connect(&socket)?;

        ProcessWriter::start(socket, stream, None)
    }

    /**
    The path of the socket the worker is listening on.

    Pass this path to [`ProcessWriter::connect`] in other processes to write to the same file.
    */
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /**
    Get an iterator over the internal metrics of the writer and its queue.
    */
    pub fn sample_metrics(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
        self.metrics.sample().chain(self.sender.sample_metrics())
    }

    fn start(socket: PathBuf, stream: UnixStream, worker: Option<Child>) -> Result<Self, Error> {
        let metrics = Arc::new(InternalMetrics::default());

        let (sender, receiver) = rollfile_batcher::unbounded::<Vec<(String, DateTime<Local>)>>();

        let forwarder = thread::Builder::new()
            .name("rollfile-forwarder".into())
            .spawn({
                let metrics = metrics.clone();
                let mut stream = BufWriter::new(stream);
                let mut buf = Vec::new();

                move || {
                    receiver.blocking_exec(|batch| {
                        buf.clear();

                        let count = batch.len();
                        for (text, time) in batch {
                            if let Err(err) = (Frame::Write { text, time }).encode(&mut buf) {
                                metrics.writer_forward_failed.increment();

                                emit::warn!(
                                    rt: emit::runtime::internal(),
                                    "failed to encode text for the worker: {err}",
                                    err,
                                );
                            }
                        }

                        if let Err(err) = stream.write_all(&buf).and_then(|()| stream.flush()) {
                            metrics.writer_forward_failed.increment_by(count);

                            emit::warn!(
                                rt: emit::runtime::internal(),
                                "failed to forward {count} writes to the worker: {err}",
                                count,
                                err,
                            );
                        }
                    });

                    stream
                }
            })?;

        Ok(ProcessWriter {
            socket,
            sender,
            metrics,
            running: Mutex::new(Some(Running { forwarder, worker })),
        })
    }
}

impl Writer for ProcessWriter {
    fn write_at(&self, text: &str, time: DateTime<Local>) {
        if !self.sender.send((text.to_owned(), time)) {
            self.metrics.writer_dropped.increment();
        }
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        rollfile_batcher::sync::blocking_flush(&self.sender, timeout)
    }

    fn close(&self) -> Result<(), Error> {
        self.sender.close();

        let Some(running) = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return Ok(());
        };

        let mut stream = running
            .forwarder
            .join()
            .map_err(|_| Error::io("the forwarding thread panicked"))?;

        let Some(mut worker) = running.worker else {
            return Ok(());
        };

        let stopped = send_stop(&mut stream);
        drop(stream);

        let status = worker.wait()?;
        stopped?;

        if !status.success() {
            return Err(Error::io(format!("the worker exited with {status}")));
        }

        Ok(())
    }
}

impl Drop for ProcessWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            emit::warn!(
                rt: emit::runtime::internal(),
                "failed to close writer: {err}",
                err,
            );
        }
    }
}

fn send_stop(stream: &mut BufWriter<UnixStream>) -> io::Result<()> {
    let mut buf = Vec::new();
    Frame::Stop.encode(&mut buf)?;

    stream.write_all(&buf)?;
    stream.flush()
}

fn connect_to_worker(socket: &Path, worker: &mut Child) -> Result<UnixStream, Error> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;

    loop {
        match UnixStream::connect(socket) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if let Some(status) = worker.try_wait()? {
                    return Err(Error::io(format!(
                        "the worker exited with {status} before accepting connections"
                    )));
                }

                if Instant::now() >= deadline {
                    return Err(err.into());
                }

                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/**
Run a worker using the configuration and socket path in the [`CONFIG_ENV`] and [`SOCKET_ENV`] environment variables.

This is the entry point for executables passed to [`ProcessWriter::spawn`].
*/
pub fn run_worker_from_env() -> Result<(), Error> {
    let config = env::var(CONFIG_ENV)
        .map_err(|err| Error::config(format!("failed to read {CONFIG_ENV}: {err}")))?;

    let socket = env::var_os(SOCKET_ENV)
        .ok_or_else(|| Error::config(format!("failed to read {SOCKET_ENV}: not present")))?;

    run_worker(Path::new(&socket), &Config::from_json(&config)?)
}

/**
Open the log file described by `config` and write text sent to `socket` to it.

The worker runs until it receives a stop frame or the process that started it exits. It then writes any text still arriving on open connections, closes the log file, and removes the socket.
*/
pub fn run_worker(socket: &Path, config: &Config) -> Result<(), Error> {
    let mut file = config.builder()?.open()?;

    let listener = UnixListener::bind(socket)?;
    listener.set_nonblocking(true)?;

    let parent = std::os::unix::process::parent_id();
    let stopping = Arc::new(AtomicBool::new(false));

    let (frames, received) = mpsc::channel();

    while !stopping.load(Ordering::Relaxed) {
        accept_pending(&listener, &frames, &stopping)?;

        if let Ok(frame) = received.recv_timeout(POLL_INTERVAL) {
            write_frame(&mut file, frame, &stopping);

            while let Ok(frame) = received.try_recv() {
                write_frame(&mut file, frame, &stopping);
            }
        }

        if std::os::unix::process::parent_id() != parent {
            emit::debug!(
                rt: emit::runtime::internal(),
                "stopping because the process that started the worker exited",
            );

            stopping.store(true, Ordering::Relaxed);
        }
    }

    // Connections made before stopping may still be waiting to be accepted
    accept_pending(&listener, &frames, &stopping)?;

    drop(listener);
    let _ = std::fs::remove_file(socket);

    // Readers hang up once their connections close or go idle
    drop(frames);
    for frame in received {
        write_frame(&mut file, frame, &stopping);
    }

    file.close()
}

fn accept_pending(
    listener: &UnixListener,
    frames: &mpsc::Sender<Frame>,
    stopping: &Arc<AtomicBool>,
) -> Result<(), Error> {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let frames = frames.clone();
                let stopping = stopping.clone();

                thread::Builder::new()
                    .name("rollfile-reader".into())
                    .spawn(move || read_frames(stream, frames, stopping))?;
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(err) => {
                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to accept a connection: {err}",
                    err,
                );

                return Ok(());
            }
        }
    }
}

fn write_frame(file: &mut LogFile, frame: Frame, stopping: &AtomicBool) {
    match frame {
        Frame::Write { text, time } => {
            if let Err(err) = file.write_at(&text, time) {
                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to write to {path}: {err}",
                    #[emit::as_debug]
                    path: file.path(),
                    err,
                );
            }
        }
        Frame::Stop => stopping.store(true, Ordering::Relaxed),
    }
}

fn read_frames(mut stream: UnixStream, frames: mpsc::Sender<Frame>, stopping: Arc<AtomicBool>) {
    if let Err(err) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(IDLE_READ_TIMEOUT)))
    {
        emit::warn!(
            rt: emit::runtime::internal(),
            "failed to configure a connection: {err}",
            err,
        );

        return;
    }

    let mut buf = Vec::new();
    let mut chunk = [0; 8192];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);

                loop {
                    match Frame::decode(&mut buf) {
                        Ok(Some(frame)) => {
                            if frames.send(frame).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            emit::warn!(
                                rt: emit::runtime::internal(),
                                "dropping a connection that sent an invalid frame: {err}",
                                err,
                            );

                            return;
                        }
                    }
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                if stopping.load(Ordering::Relaxed) {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(err) => {
                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to read from a connection: {err}",
                    err,
                );

                return;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Write { text: String, time: DateTime<Local> },
    Stop,
}

impl Frame {
    fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        let (tag, time, text) = match self {
            Frame::Write { text, time } => (
                TAG_WRITE,
                Some(time.timestamp_micros().to_le_bytes()),
                text.as_bytes(),
            ),
            Frame::Stop => (TAG_STOP, None, &[][..]),
        };

        let payload_len = time.map(|time| time.len()).unwrap_or(0) + text.len();
        let len = u32::try_from(payload_len).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "frames must be smaller than 4GiB")
        })?;

        buf.push(tag);
        buf.extend_from_slice(&len.to_le_bytes());
        if let Some(time) = time {
            buf.extend_from_slice(&time);
        }
        buf.extend_from_slice(text);

        Ok(())
    }

    fn decode(buf: &mut Vec<u8>) -> io::Result<Option<Frame>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;

        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let tag = buf[0];
        let payload = buf.drain(..HEADER_LEN + len).skip(HEADER_LEN).collect::<Vec<_>>();

        match tag {
            TAG_WRITE => {
                if payload.len() < TIME_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "write frames must start with a timestamp",
                    ));
                }

                let (time, text) = payload.split_at(TIME_LEN);

                let mut micros = [0; TIME_LEN];
                micros.copy_from_slice(time);

                let time = DateTime::from_timestamp_micros(i64::from_le_bytes(micros))
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "timestamp out of range")
                    })?
                    .with_timezone(&Local);

                let text = String::from_utf8(text.to_vec())
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Some(Frame::Write { text, time }))
            }
            TAG_STOP => Ok(Some(Frame::Stop)),
            tag => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown frame tag {tag}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn write(text: &str) -> Frame {
        Frame::Write {
            text: text.to_owned(),
            time: Local.with_ymd_and_hms(2024, 3, 7, 12, 30, 15).unwrap(),
        }
    }

    #[test]
    fn decode_partial_frames() {
        let mut encoded = Vec::new();
        write("hello").encode(&mut encoded).unwrap();
        Frame::Stop.encode(&mut encoded).unwrap();

        let mut buf = Vec::new();
        let mut decoded = Vec::new();

        // Feed one byte at a time, like a slow connection
        for byte in encoded {
            buf.push(byte);

            while let Some(frame) = Frame::decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }

        assert_eq!(vec![write("hello"), Frame::Stop], decoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_invalid_frames() {
        let mut buf = vec![7, 0, 0, 0, 0];
        assert!(Frame::decode(&mut buf).is_err());

        let mut buf = vec![TAG_WRITE, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xfe];
        assert!(Frame::decode(&mut buf).is_err());

        // Too short to hold a timestamp
        let mut buf = vec![TAG_WRITE, 2, 0, 0, 0, b'h', b'i'];
        assert!(Frame::decode(&mut buf).is_err());
    }

    #[test]
    fn worker_in_thread() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("worker.sock");
        let log = dir.path().join("app.2024.log");

        let worker = thread::spawn({
            let socket = socket.clone();
            let mut config = Config::new(dir.path().join("app.{time:YYYY}.log"));
            config.delay = true;

            move || run_worker(&socket, &config)
        });

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        let mut stream = loop {
            match UnixStream::connect(&socket) {
                Ok(stream) => break stream,
                Err(_) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Err(err) => panic!("{err}"),
            }
        };

        let mut buf = Vec::new();
        write("one\n").encode(&mut buf).unwrap();
        write("two\n").encode(&mut buf).unwrap();
        Frame::Stop.encode(&mut buf).unwrap();

        stream.write_all(&buf).unwrap();
        drop(stream);

        worker.join().unwrap().unwrap();

        assert_eq!("one\ntwo\n", std::fs::read_to_string(&log).unwrap());
        assert!(!socket.exists());
    }
}
