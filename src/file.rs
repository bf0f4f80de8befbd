/*!
The [`LogFile`] type.
*/

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use chrono::{DateTime, Local};

use crate::{
    compression::Compression,
    ctime,
    internal_metrics::InternalMetrics,
    path::{collision_free_path, path_str, split_ext, PathTemplate},
    retention::{self, Retention},
    rotation::Rotation,
    Error,
};

/**
A pending write, passed to [`Rotation::custom`] predicates.
*/
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    text: &'a str,
    time: DateTime<Local>,
}

impl<'a> Message<'a> {
    /**
    The text about to be written.
    */
    pub fn text(&self) -> &'a str {
        self.text
    }

    /**
    The time the text was written at.
    */
    pub fn time(&self) -> DateTime<Local> {
        self.time
    }
}

/**
The file a pending write is about to go to, passed to [`Rotation::custom`] predicates.
*/
#[derive(Debug, Clone, Copy)]
pub struct OpenFile<'a> {
    path: &'a Path,
    len: u64,
}

impl<'a> OpenFile<'a> {
    /**
    The path of the file.
    */
    pub fn path(&self) -> &'a Path {
        self.path
    }

    /**
    The length of the file in bytes.
    */
    pub fn len(&self) -> u64 {
        self.len
    }

    /**
    Whether the file is empty.
    */
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/**
A builder for a [`LogFile`].

Use [`LogFile::builder`] to begin a [`Builder`].
*/
#[derive(Debug)]
pub struct Builder {
    path: PathBuf,
    rotation: Option<Rotation>,
    retention: Option<Retention>,
    compression: Option<Compression>,
    delay: bool,
    options: FileOptions,
}

#[derive(Debug, Clone, Copy)]
struct FileOptions {
    append: bool,
    #[cfg(unix)]
    mode: Option<u32>,
}

const DEFAULT_DELAY: bool = false;
const DEFAULT_APPEND: bool = true;

impl Builder {
    /**
    Create a builder for a log file at `path`.

    The `path` is a template that may embed a `{time}` placeholder. See [`PathTemplate`] for details.

    It will use the following defaults:

    - No rotation, retention, or compression.
    - Open the file immediately.
    - Append to existing files.
    */
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Builder {
            path: path.into(),
            rotation: None,
            retention: None,
            compression: None,
            delay: DEFAULT_DELAY,
            options: FileOptions {
                append: DEFAULT_APPEND,
                #[cfg(unix)]
                mode: None,
            },
        }
    }

    /**
    When to roll over to a new file.
    */
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /**
    Which old files to delete after rotating or closing.
    */
    pub fn retention(mut self, retention: Retention) -> Self {
        self.retention = Some(retention);
        self
    }

    /**
    How to compress files after rotating or closing.
    */
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /**
    Whether to wait until the first write to create the file.
    */
    pub fn delay(mut self, delay: bool) -> Self {
        self.delay = delay;
        self
    }

    /**
    Whether to append to an existing file instead of truncating it.
    */
    pub fn append(mut self, append: bool) -> Self {
        self.options.append = append;
        self
    }

    /**
    The permissions to create new files with.
    */
    #[cfg(unix)]
    pub fn mode(mut self, mode: u32) -> Self {
        self.options.mode = Some(mode);
        self
    }

    /**
    Complete the builder, returning a [`LogFile`].

    This method fails if the path template is invalid, or if the file can't be created when it isn't delayed.
    */
    pub fn open(self) -> Result<LogFile, Error> {
        let template = PathTemplate::parse(&self.path)?;

        let mut file = LogFile {
            template,
            options: self.options,
            rotation: self.rotation,
            retention: self.retention,
            compression: self.compression,
            active: None,
            metrics: Arc::new(InternalMetrics::default()),
        };

        if !self.delay {
            file.open_new(Local::now())?;
        }

        Ok(file)
    }
}

/**
A log file that rotates, compresses, and cleans up after itself.

Writes go directly to the underlying file. Before each write the file is checked against the path it was opened at, and reopened if it was moved or deleted by another process. The configured [`Rotation`] then decides whether to roll over to a new file first.

A [`LogFile`] isn't synchronized. Use a [`crate::ThreadWriter`] or [`crate::ProcessWriter`] to share one between threads or processes.
*/
pub struct LogFile {
    template: PathTemplate,
    options: FileOptions,
    rotation: Option<Rotation>,
    retention: Option<Retention>,
    compression: Option<Compression>,
    active: Option<ActiveFile>,
    metrics: Arc<InternalMetrics>,
}

struct ActiveFile {
    file: File,
    path: PathBuf,
    id: Option<FileId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId {
    dev: u64,
    ino: u64,
}

impl LogFile {
    /**
    Create a builder for a log file at `path`.
    */
    pub fn builder(path: impl Into<PathBuf>) -> Builder {
        Builder::new(path)
    }

    /**
    The path of the file currently being written to.

    This method returns `None` before the first write to a delayed file, and after the file is closed.
    */
    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|active| &*active.path)
    }

    /**
    Write `text` to the file, timestamped now.

    Returns the number of characters written.
    */
    pub fn write(&mut self, text: &str) -> Result<usize, Error> {
        self.write_at(text, Local::now())
    }

    /**
    Write `text` to the file, timestamped `time`.

    The timestamp is used by time-based rotation and to name any new file. Returns the number of characters written.
    */
    pub fn write_at(&mut self, text: &str, time: DateTime<Local>) -> Result<usize, Error> {
        if self.active.is_none() {
            self.open_new(time)?;
        } else {
            self.reopen_if_replaced()?;
        }

        let rotate = match (&mut self.rotation, &self.active) {
            (Some(rotation), Some(active)) => {
                // Other handles may append to the same file
                let len = active.file.metadata()?.len();

                rotation.should_rotate(
                    &Message { text, time },
                    &OpenFile {
                        path: &active.path,
                        len,
                    },
                )
            }
            _ => false,
        };

        if rotate {
            self.rotate(time)?;
        }

        let Some(active) = &mut self.active else {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no file is open").into());
        };

        match active.file.write_all(text.as_bytes()) {
            Ok(()) => Ok(text.chars().count()),
            Err(err) => {
                self.metrics.file_write_failed.increment();

                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to write to {path}: {err}",
                    #[emit::as_debug]
                    path: active.path,
                    err,
                );

                Err(err.into())
            }
        }
    }

    /**
    Flush the file currently being written to.
    */
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Some(active) = &mut self.active {
            active.file.flush()?;
        }

        Ok(())
    }

    /**
    Close the file, then compress it and apply retention.

    A new file is created if the [`LogFile`] is written to again. Closing a file that isn't open does nothing.
    */
    pub fn close(&mut self) -> Result<(), Error> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };

        active.file.flush()?;
        drop(active.file);

        self.metrics.file_close.increment();

        emit::debug!(
            rt: emit::runtime::internal(),
            "closed {path}",
            #[emit::as_debug]
            path: active.path,
        );

        self.finish(&active.path)
    }

    /**
    Get an iterator over the internal metrics of this file.
    */
    pub fn sample_metrics(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
        self.metrics.sample()
    }

    pub(crate) fn metrics(&self) -> Arc<InternalMetrics> {
        self.metrics.clone()
    }

    fn open_new(&mut self, time: DateTime<Local>) -> Result<(), Error> {
        let path = self.template.resolve(&time.fixed_offset());

        self.open_at(path)
    }

    fn open_at(&mut self, path: PathBuf) -> Result<(), Error> {
        match open(&path, self.options) {
            Ok(active) => {
                self.metrics.file_create.increment();

                emit::debug!(
                    rt: emit::runtime::internal(),
                    "created {path}",
                    #[emit::as_debug]
                    path: active.path,
                );

                self.active = Some(active);

                Ok(())
            }
            Err(err) => {
                self.metrics.file_create_failed.increment();

                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to create {path}: {err}",
                    #[emit::as_debug]
                    path,
                    err,
                );

                Err(err.into())
            }
        }
    }

    fn reopen_if_replaced(&mut self) -> Result<(), Error> {
        let Some(active) = &self.active else {
            return Ok(());
        };

        let replaced = match fs::metadata(&active.path) {
            Ok(metadata) => file_id(&metadata) != active.id,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => return Err(err.into()),
        };

        if !replaced {
            return Ok(());
        }

        let Some(active) = self.active.take() else {
            return Ok(());
        };

        drop(active.file);

        self.metrics.file_reopen.increment();

        emit::debug!(
            rt: emit::runtime::internal(),
            "reopening {path} after it was moved or deleted",
            #[emit::as_debug]
            path: active.path,
        );

        self.open_at(active.path)
    }

    fn rotate(&mut self, time: DateTime<Local>) -> Result<(), Error> {
        let Some(mut active) = self.active.take() else {
            return self.open_new(time);
        };

        active.file.flush()?;
        drop(active.file);

        let new_path = self.template.resolve(&time.fixed_offset());

        let mut finished = active.path;

        if new_path == finished {
            let created = ctime::store()
                .get(&finished)
                .unwrap_or_else(|_| SystemTime::now());

            let (root, ext) = split_ext(path_str(&finished)?);
            let renamed = collision_free_path(root, ext, created);

            fs::rename(&finished, &renamed)?;
            self.metrics.file_rename.increment();

            finished = renamed;
        }

        self.metrics.file_rotate.increment();

        emit::debug!(
            rt: emit::runtime::internal(),
            "rotated {path} to {new_path}",
            #[emit::as_debug]
            path: finished,
            #[emit::as_debug]
            new_path,
        );

        self.finish(&finished)?;

        self.open_at(new_path)?;

        if let Some(active) = &self.active {
            ctime::store().set(&active.path, SystemTime::now());
        }

        Ok(())
    }

    /**
    Compress a file that's no longer being written to, then apply retention.
    */
    fn finish(&mut self, path: &Path) -> Result<(), Error> {
        if let Some(compression) = &mut self.compression {
            if path.exists() {
                match compression.apply(path) {
                    Ok(()) => self.metrics.file_compress.increment(),
                    Err(err) => {
                        self.metrics.file_compress_failed.increment();

                        emit::warn!(
                            rt: emit::runtime::internal(),
                            "failed to compress {path}: {err}",
                            #[emit::as_debug]
                            path: path.to_path_buf(),
                            err,
                        );

                        return Err(err.into());
                    }
                }
            }
        }

        if let Some(retention) = &mut self.retention {
            let candidates = retention::candidates(self.template.glob_patterns());

            match retention.apply(&candidates) {
                Ok(deleted) => self.metrics.file_delete.increment_by(deleted),
                Err(err) => {
                    self.metrics.file_retention_failed.increment();

                    emit::warn!(
                        rt: emit::runtime::internal(),
                        "failed to apply retention to {path}: {err}",
                        #[emit::as_debug]
                        path: path.to_path_buf(),
                        err,
                    );

                    return Err(err.into());
                }
            }
        }

        Ok(())
    }
}

impl fmt::Debug for LogFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFile")
            .field("template", &self.template)
            .field("path", &self.path())
            .field("rotation", &self.rotation)
            .field("retention", &self.retention)
            .field("compression", &self.compression)
            .finish()
    }
}

fn open(path: &Path, options: FileOptions) -> io::Result<ActiveFile> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut open = OpenOptions::new();

    if options.append {
        open.append(true);
    } else {
        open.write(true).truncate(true);
    }

    open.create(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;

        if let Some(mode) = options.mode {
            open.mode(mode);
        }
    }

    let file = open.open(path)?;
    let metadata = file.metadata()?;

    Ok(ActiveFile {
        file,
        path: path.to_owned(),
        id: file_id(&metadata),
    })
}

#[cfg(unix)]
fn file_id(metadata: &fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt as _;

    Some(FileId {
        dev: metadata.dev(),
        ino: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_: &fs::Metadata) -> Option<FileId> {
    None
}
