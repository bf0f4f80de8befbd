/*!
Templates for log file paths.
*/

use std::{
    env, io,
    path::{self, Component, Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, FixedOffset, Local};

use crate::{datetime::TimeFormat, Error};

/**
A path to a log file that may embed a `{time}` placeholder.

The placeholder is substituted with the time a file is created, formatted using the token language described in the crate root documentation. A format can be given after a colon, like `{time:YYYY-MM-DD}`. Literal braces are written as `{{` and `}}`.

Relative templates are resolved against the current directory when the template is parsed.
*/
#[derive(Debug, Clone)]
pub struct PathTemplate {
    segments: Vec<Segment>,
    glob_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Time(TimeFormat),
}

impl PathTemplate {
    /**
    Parse a path template.

    This method fails if the path isn't valid UTF8, contains an unknown or malformed placeholder, or contains an invalid time format.
    */
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let absolute = if path.is_absolute() {
            path.to_owned()
        } else {
            env::current_dir()?.join(path)
        };

        let mut normalized = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => (),
                Component::ParentDir => {
                    normalized.pop();
                }
                component => normalized.push(component),
            }
        }

        let template = normalized
            .to_str()
            .ok_or_else(|| Error::config(format!("paths must be valid UTF8: {path:?}")))?;

        let segments = parse_segments(template)?;
        let glob_patterns = glob_patterns(&segments);

        Ok(PathTemplate {
            segments,
            glob_patterns,
        })
    }

    /**
    Resolve the template into a concrete path for a file created at `now`.
    */
    pub fn resolve(&self, now: &DateTime<FixedOffset>) -> PathBuf {
        let mut path = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Time(format) => path.push_str(&format.format(now)),
            }
        }

        PathBuf::from(path)
    }

    /**
    Glob patterns matching files that belong to this template.

    The patterns cover the template itself, the template with any suffix, and, when the template has an extension, files with extra parts inserted before the extension. There are 2 patterns for templates without an extension and 4 for templates with one.
    */
    pub fn glob_patterns(&self) -> &[String] {
        &self.glob_patterns
    }

    /**
    Whether the template embeds a time placeholder.
    */
    pub fn has_time(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Time(_)))
    }
}

fn parse_segments(template: &str) -> Result<Vec<Segment>, Error> {
    let mut segments = Vec::new();
    let mut literal = String::new();

    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(Error::config(format!(
                    "single '}}' encountered in path template '{template}'"
                )))
            }
            '{' => {
                let mut field = String::new();

                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(Error::config(format!(
                                "unterminated placeholder in path template '{template}'"
                            )))
                        }
                    }
                }

                let (name, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));

                if name != "time" {
                    return Err(Error::config(format!(
                        "unknown placeholder '{{{name}}}' in path template '{template}'"
                    )));
                }

                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }

                segments.push(Segment::Time(TimeFormat::parse(spec)?));
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

fn glob_patterns(segments: &[Segment]) -> Vec<String> {
    let mut escaped = String::new();

    for segment in segments {
        match segment {
            Segment::Literal(literal) => escaped.push_str(&glob::Pattern::escape(literal)),
            Segment::Time(_) => escaped.push('*'),
        }
    }

    let (root, ext) = split_ext(&escaped);

    if ext.is_empty() {
        return vec![escaped.clone(), format!("{escaped}.*")];
    }

    vec![
        escaped.clone(),
        format!("{escaped}.*"),
        format!("{root}.*{ext}"),
        format!("{root}.*{ext}.*"),
    ]
}

/**
Split a path into its root and extension, where the extension includes its leading dot.

Leading dots in the file name don't start an extension, so `.profile` has none.
*/
pub(crate) fn split_ext(path: &str) -> (&str, &str) {
    let name_start = path
        .char_indices()
        .filter(|(_, c)| path::is_separator(*c))
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);

    let name = &path[name_start..];

    match name.rfind('.') {
        Some(dot) if name[..dot].chars().any(|c| c != '.') => {
            path.split_at(name_start + dot)
        }
        _ => (path, ""),
    }
}

/**
Find an unused path for a file created at `created`.

The path is `{root}.{created}{ext}`, or `{root}.{created}.{n}{ext}` with `n` counting up from 2 if that path is already taken.
*/
pub(crate) fn collision_free_path(root: &str, ext: &str, created: SystemTime) -> PathBuf {
    let created = DateTime::<Local>::from(created).fixed_offset();
    let date = TimeFormat::default_file_format().format(&created);

    let mut renamed = PathBuf::from(format!("{root}.{date}{ext}"));
    let mut counter = 1;

    while renamed.exists() {
        counter += 1;
        renamed = PathBuf::from(format!("{root}.{date}.{counter}{ext}"));
    }

    renamed
}

pub(crate) fn path_str(path: &Path) -> io::Result<&str> {
    path.to_str().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("paths must be valid UTF8: {path:?}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use chrono::TimeZone;

    #[test]
    fn glob_patterns_with_ext() {
        let template = PathTemplate::parse("/var/log/app.{time:YYYY}.log").unwrap();

        assert_eq!(
            vec![
                "/var/log/app.*.log",
                "/var/log/app.*.log.*",
                "/var/log/app.*.*.log",
                "/var/log/app.*.*.log.*",
            ],
            template.glob_patterns()
        );
    }

    #[test]
    fn glob_patterns_without_ext() {
        let template = PathTemplate::parse("/var/log/[app]/current").unwrap();

        assert_eq!(
            vec!["/var/log/[[]app[]]/current", "/var/log/[[]app[]]/current.*"],
            template.glob_patterns()
        );
        assert!(!template.has_time());
    }

    #[test]
    fn resolve_time() {
        let template = PathTemplate::parse("/logs/{{app}}-{time:YYYY-MM-DD}.log").unwrap();

        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .unwrap();

        assert_eq!(
            PathBuf::from("/logs/{app}-2024-01-02.log"),
            template.resolve(&now)
        );
        assert!(template.has_time());
    }

    #[test]
    fn resolve_relative() {
        let template = PathTemplate::parse("./logs/../app.log").unwrap();

        let now = Local::now().fixed_offset();

        assert_eq!(
            env::current_dir().unwrap().join("app.log"),
            template.resolve(&now)
        );
    }

    #[test]
    fn parse_invalid() {
        for template in [
            "/logs/{date}.log",
            "/logs/{time.log",
            "/logs/}.log",
            "/logs/{time:SSSSSSSS}.log",
        ] {
            assert!(
                PathTemplate::parse(template).unwrap_err().is_config(),
                "{}",
                template
            );
        }
    }

    #[test]
    fn split_ext_like_file_names() {
        assert_eq!(("/a/b", ".log"), split_ext("/a/b.log"));
        assert_eq!(("/a/b.log", ".gz"), split_ext("/a/b.log.gz"));
        assert_eq!(("/a/.profile", ""), split_ext("/a/.profile"));
        assert_eq!(("/a.d/b", ""), split_ext("/a.d/b"));
    }

    #[test]
    fn collision_free_path_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        let root = root.to_str().unwrap();

        let created = SystemTime::now();

        let first = collision_free_path(root, ".log", created);
        fs::write(&first, b"1").unwrap();

        let second = collision_free_path(root, ".log", created);
        fs::write(&second, b"2").unwrap();

        let third = collision_free_path(root, ".log", created);

        let first = first.to_str().unwrap().to_owned();
        let (first_root, _) = split_ext(&first);

        assert_eq!(PathBuf::from(format!("{first_root}.2.log")), second);
        assert_eq!(PathBuf::from(format!("{first_root}.3.log")), third);
    }
}
