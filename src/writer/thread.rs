/*!
A [`Writer`] backed by a background thread.
*/

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use chrono::{DateTime, Local};

use crate::{internal_metrics::InternalMetrics, Error, LogFile, Writer};

/**
A [`Writer`] that owns a [`LogFile`] on a dedicated background thread.

Text is written in the order it was queued. Errors writing to the file are reported through `emit`'s internal runtime and the writer's metrics, and don't stop later writes.

Dropping a [`ThreadWriter`] closes it, waiting for queued text to be written.
*/
pub struct ThreadWriter {
    sender: rollfile_batcher::Sender<Vec<(String, DateTime<Local>)>>,
    metrics: Arc<InternalMetrics>,
    handle: Mutex<Option<thread::JoinHandle<Result<(), Error>>>>,
}

impl ThreadWriter {
    /**
    Move `file` onto a new background thread.
    */
    pub fn spawn(file: LogFile) -> Result<Self, Error> {
        let metrics = file.metrics();

        let (sender, receiver) = rollfile_batcher::unbounded::<Vec<(String, DateTime<Local>)>>();

        let handle = thread::Builder::new().name("rollfile-writer".into()).spawn({
            let metrics = metrics.clone();
            let mut file = file;

            move || {
                receiver.blocking_exec(|batch| {
                    for (text, time) in batch {
                        if let Err(err) = file.write_at(&text, time) {
                            metrics.writer_write_failed.increment();

                            emit::warn!(
                                rt: emit::runtime::internal(),
                                "failed to write to {path}: {err}",
                                #[emit::as_debug]
                                path: file.path(),
                                err,
                            );
                        }
                    }
                });

                file.close()
            }
        })?;

        Ok(ThreadWriter {
            sender,
            metrics,
            handle: Mutex::new(Some(handle)),
        })
    }

    /**
    Get an iterator over the internal metrics of the writer, its queue, and its file.
    */
    pub fn sample_metrics(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
        self.metrics.sample().chain(self.sender.sample_metrics())
    }
}

impl Writer for ThreadWriter {
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

        let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return Ok(());
        };

        handle
            .join()
            .map_err(|_| Error::io("the writer thread panicked"))?
    }
}

impl Drop for ThreadWriter {
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
