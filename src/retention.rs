/*!
Deciding which old log files to delete.
*/

use std::{
    cmp::Reverse,
    collections::BTreeSet,
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, SystemTime},
};

use crate::{parse, Error};

/**
A policy for which log files to keep.

Retention runs after a file is rotated or closed, against every regular file matching the glob patterns of the log file's path template. That includes the active file.
*/
pub struct Retention {
    kind: Kind,
}

enum Kind {
    Count(usize),
    Age(Duration),
    Custom(Box<dyn FnMut(&[PathBuf]) -> io::Result<()> + Send>),
}

impl Retention {
    /**
    Keep the `keep` most recently modified files and delete the rest.

    Files modified at the same time are ordered by path.
    */
    pub fn count(keep: usize) -> Self {
        Retention {
            kind: Kind::Count(keep),
        }
    }

    /**
    Delete files that were last modified at least `max_age` ago.
    */
    pub fn age(max_age: Duration) -> Self {
        Retention {
            kind: Kind::Age(max_age),
        }
    }

    /**
    Pass the set of matching files to `retain`, which is responsible for deleting any of them.
    */
    pub fn custom(retain: impl FnMut(&[PathBuf]) -> io::Result<()> + Send + 'static) -> Self {
        Retention {
            kind: Kind::Custom(Box::new(retain)),
        }
    }

    /**
    Parse a maximum age from a human-readable duration, like `"10 days"`.
    */
    pub fn parse(retention: &str) -> Result<Self, Error> {
        match parse::parse_duration(retention)? {
            Some(max_age) => Ok(Retention::age(max_age)),
            None => Err(Error::config(format!(
                "cannot parse retention from: '{retention}'"
            ))),
        }
    }

    /**
    Delete files that shouldn't be kept, returning the number of files deleted.

    Custom policies always report zero.
    */
    pub(crate) fn apply(&mut self, files: &[PathBuf]) -> io::Result<usize> {
        self.apply_at(files, SystemTime::now())
    }

    fn apply_at(&mut self, files: &[PathBuf], now: SystemTime) -> io::Result<usize> {
        match self.kind {
            Kind::Count(keep) => {
                let mut by_age = Vec::with_capacity(files.len());
                for path in files {
                    if let Some(modified) = modified(path)? {
                        by_age.push((modified, path));
                    }
                }

                by_age.sort_by_key(|(modified, path)| (Reverse(*modified), *path));

                let mut deleted = 0;
                for (_, path) in by_age.into_iter().skip(keep) {
                    deleted += delete(path)?;
                }

                Ok(deleted)
            }
            Kind::Age(max_age) => {
                let Some(cutoff) = now.checked_sub(max_age) else {
                    return Ok(0);
                };

                let mut deleted = 0;
                for path in files {
                    if matches!(modified(path)?, Some(modified) if modified <= cutoff) {
                        deleted += delete(path)?;
                    }
                }

                Ok(deleted)
            }
            Kind::Custom(ref mut retain) => {
                retain(files)?;

                Ok(0)
            }
        }
    }
}

impl FromStr for Retention {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Retention::parse(s)
    }
}

impl fmt::Debug for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Count(keep) => f.debug_tuple("Count").field(&keep).finish(),
            Kind::Age(max_age) => f.debug_tuple("Age").field(&max_age).finish(),
            Kind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/**
Find the regular files matching any of `patterns`.

The result is sorted and has no duplicates, even if a file matches multiple patterns.
*/
pub(crate) fn candidates(patterns: &[String]) -> Vec<PathBuf> {
    let mut found = BTreeSet::new();

    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(err) => {
                emit::warn!(
                    rt: emit::runtime::internal(),
                    "failed to search for log files matching {pattern}: {err}",
                    #[emit::as_display]
                    pattern,
                    err,
                );

                continue;
            }
        };

        for path in paths.flatten() {
            if path.is_file() {
                found.insert(path);
            }
        }
    }

    found.into_iter().collect()
}

fn modified(path: &Path) -> io::Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.modified()?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn delete(path: &Path) -> io::Result<usize> {
    match fs::remove_file(path) {
        Ok(()) => {
            emit::debug!(
                rt: emit::runtime::internal(),
                "deleted {path}",
                #[emit::as_debug]
                path: path.to_path_buf(),
            );

            Ok(1)
        }
        // Another process sharing the same files got there first
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use filetime::FileTime;

    fn touch(path: &Path, modified: SystemTime) {
        fs::write(path, b"log").unwrap();
        filetime::set_file_mtime(path, FileTime::from_system_time(modified)).unwrap();
    }

    #[test]
    fn count_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();

        let files = (0..5)
            .map(|i| {
                let path = dir.path().join(format!("app.{i}.log"));
                touch(&path, now - Duration::from_secs(60 * i));
                path
            })
            .collect::<Vec<_>>();

        let deleted = Retention::count(2).apply(&files).unwrap();

        assert_eq!(3, deleted);
        assert!(files[0].exists());
        assert!(files[1].exists());
        assert!(!files[2].exists());
        assert!(!files[3].exists());
        assert!(!files[4].exists());
    }

    #[test]
    fn count_orders_ties_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();

        let files = ["c.log", "a.log", "b.log"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                touch(&path, now);
                path
            })
            .collect::<Vec<_>>();

        Retention::count(1).apply(&files).unwrap();

        assert!(dir.path().join("a.log").exists());
        assert!(!dir.path().join("b.log").exists());
        assert!(!dir.path().join("c.log").exists());
    }

    #[test]
    fn age_deletes_at_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let old = dir.path().join("old.log");
        let exact = dir.path().join("exact.log");
        let young = dir.path().join("young.log");

        touch(&old, now - Duration::from_secs(7200));
        touch(&exact, now - Duration::from_secs(3600));
        touch(&young, now - Duration::from_secs(60));

        let deleted = Retention::age(Duration::from_secs(3600))
            .apply_at(&[old.clone(), exact.clone(), young.clone()], now)
            .unwrap();

        assert_eq!(2, deleted);
        assert!(!old.exists());
        assert!(!exact.exists());
        assert!(young.exists());
    }

    #[test]
    fn files_deleted_by_others_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();

        let kept = dir.path().join("app.1.log");
        let old = dir.path().join("app.2.log");
        let gone = dir.path().join("app.3.log");

        touch(&kept, now);
        touch(&old, now - Duration::from_secs(7200));

        let files = [kept.clone(), old.clone(), gone.clone()];

        assert_eq!(1, Retention::count(1).apply(&files).unwrap());
        assert!(kept.exists());
        assert!(!old.exists());

        touch(&old, now - Duration::from_secs(7200));

        assert_eq!(
            1,
            Retention::age(Duration::from_secs(3600))
                .apply(&files)
                .unwrap()
        );
        assert!(kept.exists());
        assert!(!old.exists());
    }

    #[test]
    fn custom_receives_candidates() {
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("app.log"), b"").unwrap();
        fs::write(dir.path().join("app.2024.log"), b"").unwrap();
        fs::write(dir.path().join("app.log.gz"), b"").unwrap();
        fs::write(dir.path().join("other.log"), b"").unwrap();
        fs::create_dir(dir.path().join("app.d.log")).unwrap();

        let root = glob::Pattern::escape(dir.path().join("app").to_str().unwrap());
        let patterns = vec![
            format!("{root}.log"),
            format!("{root}.log.*"),
            format!("{root}.*.log"),
            format!("{root}.*.log.*"),
        ];

        let found = candidates(&patterns);

        let mut seen = Vec::new();
        Retention::custom(move |files| {
            seen.extend_from_slice(files);
            assert_eq!(3, seen.len());
            Ok(())
        })
        .apply(&found)
        .unwrap();

        assert_eq!(
            vec![
                dir.path().join("app.2024.log"),
                dir.path().join("app.log"),
                dir.path().join("app.log.gz"),
            ],
            found
        );
    }

    #[test]
    fn parse_age() {
        assert!(format!("{:?}", Retention::parse("10 days").unwrap()).starts_with("Age"));
        assert!(Retention::parse("10").unwrap_err().is_config());
    }
}
