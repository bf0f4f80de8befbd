/*!
Rotating, retained, compressed log files.

`rollfile` persists already-formatted text to log files. A [`LogFile`] decides when to roll over to a new file, compresses files it's finished with, and deletes old files according to a retention policy. A [`Writer`] moves a [`LogFile`] onto a dedicated worker so any number of threads, or processes, can write to it without interleaving.

# Getting started

Add `rollfile` to your `Cargo.toml`:

```toml
[dependencies.rollfile]
version = "0.1.0"
```

Open a log file and write to it:

```
# fn main() -> Result<(), rollfile::Error> {
# let dir = tempfile::tempdir()?;
# let path = dir.path().join("app.log");
use rollfile::{Compression, LogFile, Retention, Rotation};

let mut file = LogFile::builder(path)
    .rotation(Rotation::parse("100 MB")?)
    .retention(Retention::count(10))
    .compression(Compression::parse("gz")?)
    .open()?;

file.write("a message\n")?;

file.close()?;
# Ok(())
# }
```

Share it between threads:

```
# fn main() -> Result<(), rollfile::Error> {
# let dir = tempfile::tempdir()?;
# let path = dir.path().join("app.log");
use rollfile::{LogFile, ThreadWriter, Writer as _};

let writer = ThreadWriter::spawn(LogFile::builder(path).open()?)?;

std::thread::scope(|s| {
    for i in 0..4 {
        let writer = &writer;

        s.spawn(move || writer.write(&format!("from thread {i}\n")));
    }
});

writer.close()?;
# Ok(())
# }
```

# Path templates

The path of a log file may embed the time it was created with a `{time}` placeholder, like `logs/app.{time}.log`. A format can be given after a colon, like `{time:YYYY-MM-DD}`. Without one, times are formatted as `%Y-%m-%d_%H-%M-%S_%f`. Literal braces are written as `{{` and `}}`.

A format is either a sequence of `%` directives, interpreted by `chrono`'s strftime implementation with `%f` meaning microseconds, or a sequence of tokens:

| Token | Output |
| ----- | ------ |
| `YYYY`, `YY` | year, 2-digit year |
| `Q` | quarter |
| `MMMM`, `MMM`, `MM`, `M` | month name, abbreviated month name, zero-padded month, month |
| `DDDD`, `DDD` | zero-padded day of year, day of year |
| `DD`, `D` | zero-padded day of month, day of month |
| `dddd`, `ddd`, `d`, `E` | weekday name, abbreviated weekday name, weekday from Monday = 0, ISO weekday |
| `HH`, `H`, `hh`, `h` | 24-hour, 12-hour |
| `mm`, `m`, `ss`, `s` | minute, second |
| `S` to `SSSSSS` | fraction of a second with 1 to 6 digits |
| `A` | `AM` or `PM` |
| `Z`, `ZZ`, `zz` | offset as `+HH:MM`, offset as `+HHMM`, `UTC` or the offset |
| `X`, `x` | unix seconds, unix microseconds |

Text inside `[brackets]` is copied literally. A trailing `!UTC` converts the time to UTC before formatting.

# When files roll

Before each write, the [`Rotation`] configured for the file decides whether to roll over first. The active file is closed and a new path is resolved from the template. If the new path is the same as the old one, the old file is renamed to `{root}.{created}{ext}`, where `created` is its creation time, adding a counter like `{root}.{created}.2{ext}` if that name is taken. The old file is then compressed and retention is applied, before a new file is opened.

Closing a [`LogFile`] compresses it and applies retention too.

# Files replaced by other processes

Before each write the active file is checked against the path it was opened at. If another process moved or deleted it, such as an external log rotation tool, the file is reopened at the same path.

# Diagnostics

Failures that can't be returned to a caller, like a worker failing to write, are reported through `emit`'s internal runtime. Counters for file and queue activity can be sampled with [`LogFile::sample_metrics`] and the writers' `sample_metrics` methods.
*/

#![deny(missing_docs)]

mod compression;
mod config;
mod ctime;
mod datetime;
mod error;
mod file;
mod internal_metrics;
mod parse;
mod path;
mod retention;
mod rotation;
mod writer;

pub use self::{
    compression::Compression,
    config::{Config, RetentionConfig, RotationConfig},
    ctime::{store as creation_time_store, BirthTime, CreationTimeStore, ModifiedTime},
    error::Error,
    file::{Builder, LogFile, Message, OpenFile},
    parse::Frequency,
    path::PathTemplate,
    retention::Retention,
    rotation::Rotation,
    writer::{thread::ThreadWriter, Writer},
};

#[cfg(unix)]
pub use self::{ctime::ExtendedAttribute, writer::process::ProcessWriter};

#[cfg(windows)]
pub use self::ctime::FileTimes;

#[cfg(unix)]
pub use self::writer::process;
