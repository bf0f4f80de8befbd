use std::{fmt, io};

/**
An error configuring or operating on a log file.

Errors are either configuration errors, raised while building a policy or a [`crate::LogFile`], or IO errors, raised by the filesystem while writing, rotating, compressing, or deleting files.
*/
pub struct Error {
    kind: ErrorKind,
    inner: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    Config,
    Io,
}

impl Error {
    pub(crate) fn config(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error {
            kind: ErrorKind::Config,
            inner: e.into(),
        }
    }

    pub(crate) fn io(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error {
            kind: ErrorKind::Io,
            inner: e.into(),
        }
    }

    /**
    Whether this error was caused by an invalid rotation, retention, compression, or path specification.
    */
    pub fn is_config(&self) -> bool {
        self.kind == ErrorKind::Config
    }

    /**
    Whether this error was raised by the filesystem.
    */
    pub fn is_io(&self) -> bool {
        self.kind == ErrorKind::Io
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}
