/*!
Serializable configuration for a [`LogFile`].
*/

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{Builder, Compression, Error, LogFile, Retention, Rotation};

/**
A serializable description of a [`LogFile`].

Configuration can only describe the built-in rotation, retention, and compression policies. It's what a [`crate::ProcessWriter`] passes to its worker process.

```
let config = rollfile::Config::from_json(r#"{
    "path": "logs/app.{time:YYYY-MM-DD}.log",
    "rotation": "100 MB",
    "retention": 10,
    "compression": "gz"
}"#)?;

let builder = config.builder()?;
# Ok::<(), rollfile::Error>(())
```
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /**
    The path template for the file.
    */
    pub path: PathBuf,
    /**
    When to rotate the file.
    */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationConfig>,
    /**
    Which old files to keep.
    */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionConfig>,
    /**
    The compression format for closed files, like `gz`.
    */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /**
    Whether to append to existing files.
    */
    #[serde(default = "default_append")]
    pub append: bool,
    /**
    Whether to wait until the first write to create the file.
    */
    #[serde(default)]
    pub delay: bool,
    /**
    The permissions to create new files with. Ignored on non-unix platforms.
    */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

/**
A rotation, either as a maximum size in bytes or a string for [`Rotation::parse`].
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RotationConfig {
    /**
    Rotate when the file would grow beyond this many bytes.
    */
    Size(u64),
    /**
    A human-readable rotation, like `"100 MB"` or `"monday at 12:00"`.
    */
    Spec(String),
}

/**
A retention, either as a number of files to keep or a string for [`Retention::parse`].
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetentionConfig {
    /**
    Keep this many of the most recently modified files.
    */
    Count(usize),
    /**
    A human-readable maximum age, like `"10 days"`.
    */
    Age(String),
}

fn default_append() -> bool {
    true
}

impl Config {
    /**
    Create a configuration for a file at `path` with no rotation, retention, or compression.
    */
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Config {
            path: path.into(),
            rotation: None,
            retention: None,
            compression: None,
            append: default_append(),
            delay: false,
            mode: None,
        }
    }

    /**
    Parse a configuration from JSON.
    */
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::config)
    }

    /**
    Serialize the configuration to JSON.
    */
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(Error::config)
    }

    /**
    Validate the configuration, returning a [`Builder`] for the file it describes.
    */
    pub fn builder(&self) -> Result<Builder, Error> {
        let mut builder = LogFile::builder(&self.path)
            .append(self.append)
            .delay(self.delay);

        match &self.rotation {
            Some(RotationConfig::Size(max_bytes)) => {
                builder = builder.rotation(Rotation::size(*max_bytes))
            }
            Some(RotationConfig::Spec(spec)) => builder = builder.rotation(Rotation::parse(spec)?),
            None => (),
        }

        match &self.retention {
            Some(RetentionConfig::Count(keep)) => {
                builder = builder.retention(Retention::count(*keep))
            }
            Some(RetentionConfig::Age(spec)) => {
                builder = builder.retention(Retention::parse(spec)?)
            }
            None => (),
        }

        if let Some(ext) = &self.compression {
            builder = builder.compression(Compression::parse(ext)?);
        }

        #[cfg(unix)]
        if let Some(mode) = self.mode {
            builder = builder.mode(mode);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full() {
        let config = Config::from_json(
            r#"{
                "path": "/var/log/app.log",
                "rotation": 1048576,
                "retention": "1 week",
                "compression": "zip",
                "append": false,
                "delay": true,
                "mode": 384
            }"#,
        )
        .unwrap();

        assert_eq!(Some(RotationConfig::Size(1_048_576)), config.rotation);
        assert_eq!(
            Some(RetentionConfig::Age("1 week".to_owned())),
            config.retention
        );
        assert_eq!(Some("zip"), config.compression.as_deref());
        assert!(!config.append);
        assert!(config.delay);
        assert_eq!(Some(0o600), config.mode);

        config.builder().unwrap();
    }

    #[test]
    fn parse_defaults() {
        let config = Config::from_json(r#"{"path": "app.log"}"#).unwrap();

        assert_eq!(Config::new("app.log"), config);
        assert!(config.append);
    }

    #[test]
    fn json_roundtrip() {
        let mut config = Config::new("/var/log/app.{time}.log");
        config.rotation = Some(RotationConfig::Spec("daily".to_owned()));
        config.retention = Some(RetentionConfig::Count(3));

        assert_eq!(config, Config::from_json(&config.to_json().unwrap()).unwrap());
    }

    #[test]
    fn invalid_policies() {
        for json in [
            r#"{"path": "app.log", "rotation": "sometimes"}"#,
            r#"{"path": "app.log", "retention": "forever"}"#,
            r#"{"path": "app.log", "compression": "rar"}"#,
        ] {
            let config = Config::from_json(json).unwrap();

            assert!(config.builder().unwrap_err().is_config(), "{}", json);
        }

        assert!(Config::from_json(r#"{"path": "app.log", "rotate": 1}"#)
            .unwrap_err()
            .is_config());
    }
}
