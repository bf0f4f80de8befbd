/*!
Tracking when log files were created.

Time-based rotation anchors its first boundary to the creation time of the active file, so a process that restarts keeps rolling files over on the same schedule. Platforms differ in whether creation times exist and whether they can be set, so one [`CreationTimeStore`] is picked for the process the first time it's needed.
*/

use std::{fs, io, path::Path, sync::OnceLock, time::SystemTime};

/**
Get and set the creation time of files.
*/
pub trait CreationTimeStore: Send + Sync {
    /**
    Get the creation time of the file at `path`.

    Stores that don't have a creation time for the file fall back to its modification time.
    */
    fn get(&self, path: &Path) -> io::Result<SystemTime>;

    /**
    Record `created` as the creation time of the file at `path`.

    Failures are ignored. Creation times only refine time-based rotation.
    */
    fn set(&self, path: &Path, created: SystemTime);
}

/**
The store used for this process.
*/
pub fn store() -> &'static dyn CreationTimeStore {
    static STORE: OnceLock<Box<dyn CreationTimeStore>> = OnceLock::new();

    &**STORE.get_or_init(detect)
}

#[cfg(windows)]
fn detect() -> Box<dyn CreationTimeStore> {
    Box::new(FileTimes)
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
fn detect() -> Box<dyn CreationTimeStore> {
    Box::new(BirthTime)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn detect() -> Box<dyn CreationTimeStore> {
    if xattr::SUPPORTED_PLATFORM {
        Box::new(ExtendedAttribute)
    } else {
        Box::new(ModifiedTime)
    }
}

#[cfg(not(any(
    windows,
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    target_os = "linux",
    target_os = "android",
)))]
fn detect() -> Box<dyn CreationTimeStore> {
    Box::new(ModifiedTime)
}

/**
Use the birth time reported by the filesystem.

Birth times can't be set, so [`CreationTimeStore::set`] does nothing.
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct BirthTime;

impl CreationTimeStore for BirthTime {
    fn get(&self, path: &Path) -> io::Result<SystemTime> {
        let metadata = fs::metadata(path)?;

        metadata.created().or_else(|_| metadata.modified())
    }

    fn set(&self, _: &Path, _: SystemTime) {}
}

/**
Use the creation time maintained by Windows, which can also be set.

Setting the creation time works around Windows reusing the creation time of a file that was renamed away and recreated under the same name.
*/
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTimes;

#[cfg(windows)]
impl CreationTimeStore for FileTimes {
    fn get(&self, path: &Path) -> io::Result<SystemTime> {
        let metadata = fs::metadata(path)?;

        metadata.created().or_else(|_| metadata.modified())
    }

    fn set(&self, path: &Path, created: SystemTime) {
        use std::os::windows::fs::FileTimesExt as _;

        let _ = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_times(fs::FileTimes::new().set_created(created)));
    }
}

/**
Emulate creation times with an extended attribute.

The attribute holds the creation time as fractional unix seconds. Files without the attribute report their modification time.
*/
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedAttribute;

#[cfg(unix)]
const CREATION_TIME_ATTR: &str = "user.rollfile_crtime";

#[cfg(unix)]
impl CreationTimeStore for ExtendedAttribute {
    fn get(&self, path: &Path) -> io::Result<SystemTime> {
        let stored = xattr::get(path, CREATION_TIME_ATTR)
            .ok()
            .flatten()
            .and_then(|value| String::from_utf8(value).ok())
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0);

        match stored {
            Some(secs) => Ok(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(secs)),
            None => fs::metadata(path)?.modified(),
        }
    }

    fn set(&self, path: &Path, created: SystemTime) {
        let Ok(since_epoch) = created.duration_since(SystemTime::UNIX_EPOCH) else {
            return;
        };

        let value = format!("{:.6}", since_epoch.as_secs_f64());

        let _ = xattr::set(path, CREATION_TIME_ATTR, value.as_bytes());
    }
}

/**
Use the modification time as a stand-in for the creation time.

Modification times can't be pinned without affecting rotation, so [`CreationTimeStore::set`] does nothing.
*/
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifiedTime;

impl CreationTimeStore for ModifiedTime {
    fn get(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    fn set(&self, _: &Path, _: SystemTime) {}
}
