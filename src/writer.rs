/*!
The [`Writer`] type.

Writers own a [`crate::LogFile`] on a dedicated worker and accept text from any number of producers without blocking them on file IO.
*/

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};

use crate::Error;

pub mod thread;

#[cfg(unix)]
pub mod process;

/**
A queue of text to write to a log file.
*/
pub trait Writer {
    /**
    Queue `text` to be written, timestamped now.

    This method doesn't wait for `text` to reach the file. Text written after the writer is closed is discarded.
    */
    fn write(&self, text: &str) {
        self.write_at(text, Local::now())
    }

    /**
    Queue `text` to be written, timestamped `time`.

    The file sees `time` instead of the time the text is dequeued, so a backlog doesn't push records across a rotation boundary.
    */
    fn write_at(&self, text: &str, time: DateTime<Local>);

    /**
    Block until all text written before this call has been handed to the file, or until `timeout` elapses.

    This method returns `false` if the timeout elapsed.
    */
    fn blocking_flush(&self, timeout: Duration) -> bool;

    /**
    Stop accepting text, write everything still queued, then close the file.

    Closing a writer that's already closed does nothing.
    */
    fn close(&self) -> Result<(), Error>;
}

impl<'a, T: Writer + ?Sized> Writer for &'a T {
    fn write(&self, text: &str) {
        (**self).write(text)
    }

    fn write_at(&self, text: &str, time: DateTime<Local>) {
        (**self).write_at(text, time)
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        (**self).blocking_flush(timeout)
    }

    fn close(&self) -> Result<(), Error> {
        (**self).close()
    }
}

impl<'a, T: Writer + ?Sized + 'a> Writer for Box<T> {
    fn write(&self, text: &str) {
        (**self).write(text)
    }

    fn write_at(&self, text: &str, time: DateTime<Local>) {
        (**self).write_at(text, time)
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        (**self).blocking_flush(timeout)
    }

    fn close(&self) -> Result<(), Error> {
        (**self).close()
    }
}

impl<'a, T: Writer + ?Sized + 'a> Writer for Arc<T> {
    fn write(&self, text: &str) {
        (**self).write(text)
    }

    fn write_at(&self, text: &str, time: DateTime<Local>) {
        (**self).write_at(text, time)
    }

    fn blocking_flush(&self, timeout: Duration) -> bool {
        (**self).blocking_flush(timeout)
    }

    fn close(&self) -> Result<(), Error> {
        (**self).close()
    }
}
