/*!
Compressing log files once they're closed.
*/

use std::{
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
    time::SystemTime,
};

use crate::{
    ctime,
    path::{collision_free_path, path_str, split_ext},
    Error,
};

/**
A policy for compressing closed log files.

The compressed file is written next to the original as `{path}.{ext}` and the original is removed.
*/
pub struct Compression {
    kind: Kind,
}

enum Kind {
    Codec { ext: &'static str, codec: Codec },
    Custom(Box<dyn FnMut(&Path) -> io::Result<()> + Send>),
}

#[derive(Debug, Clone, Copy)]
enum Codec {
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Tar,
    TarGzip,
    TarBzip2,
    TarXz,
    Zip,
}

const CODECS: [(&str, Codec); 9] = [
    ("gz", Codec::Gzip),
    ("bz2", Codec::Bzip2),
    ("xz", Codec::Xz),
    ("lzma", Codec::Lzma),
    ("tar", Codec::Tar),
    ("tar.gz", Codec::TarGzip),
    ("tar.bz2", Codec::TarBzip2),
    ("tar.xz", Codec::TarXz),
    ("zip", Codec::Zip),
];

impl Compression {
    /**
    Compress files with the format named by `ext`.

    Supported formats are `gz`, `bz2`, `xz`, `lzma`, `tar`, `tar.gz`, `tar.bz2`, `tar.xz`, and `zip`. Surrounding whitespace and leading dots are ignored, so `".tar.gz"` is the same as `"tar.gz"`.
    */
    pub fn parse(ext: &str) -> Result<Self, Error> {
        let ext = ext.trim().trim_start_matches('.');

        let (ext, codec) = CODECS
            .iter()
            .find(|(known, _)| *known == ext)
            .ok_or_else(|| Error::config(format!("invalid compression format: '{ext}'")))?;

        Ok(Compression {
            kind: Kind::Codec {
                ext: *ext,
                codec: *codec,
            },
        })
    }

    /**
    Compress files with `compress`, which is responsible for removing the original.
    */
    pub fn custom(compress: impl FnMut(&Path) -> io::Result<()> + Send + 'static) -> Self {
        Compression {
            kind: Kind::Custom(Box::new(compress)),
        }
    }

    /**
    Compress the closed file at `path`.

    If a previously compressed file already occupies the target path, it's renamed out of the way first.
    */
    pub(crate) fn apply(&mut self, path: &Path) -> io::Result<()> {
        match self.kind {
            Kind::Codec { ext, codec } => {
                let source = path_str(path)?;
                let target = PathBuf::from(format!("{source}.{ext}"));

                if target.exists() {
                    let created = ctime::store()
                        .get(&target)
                        .unwrap_or_else(|_| SystemTime::now());

                    let (root, ext_before) = split_ext(source);
                    let renamed = collision_free_path(root, &format!("{ext_before}.{ext}"), created);

                    fs::rename(&target, &renamed)?;
                }

                codec.compress(path, &target)?;
                fs::remove_file(path)?;

                emit::debug!(
                    rt: emit::runtime::internal(),
                    "compressed {path} to {target}",
                    #[emit::as_debug]
                    path: path.to_path_buf(),
                    #[emit::as_debug]
                    target,
                );

                Ok(())
            }
            Kind::Custom(ref mut compress) => compress(path),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Compression::parse(s)
    }
}

impl fmt::Debug for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Codec { ext, .. } => f.debug_tuple("Codec").field(&ext).finish(),
            Kind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Codec {
    fn compress(self, source: &Path, target: &Path) -> io::Result<()> {
        let name = source
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing file name"))?;

        let output = File::create(target)?;

        match self {
            Codec::Gzip => {
                let mut output = gzip(output);
                io::copy(&mut File::open(source)?, &mut output)?;
                output.finish()?;
            }
            Codec::Bzip2 => {
                let mut output = bzip2(output);
                io::copy(&mut File::open(source)?, &mut output)?;
                output.finish()?;
            }
            Codec::Xz => {
                let mut output = xz(output);
                io::copy(&mut File::open(source)?, &mut output)?;
                output.finish()?;
            }
            Codec::Lzma => {
                let mut output = lzma(output)?;
                io::copy(&mut File::open(source)?, &mut output)?;
                output.finish()?;
            }
            Codec::Tar => {
                tar(output, source, name)?;
            }
            Codec::TarGzip => {
                tar(gzip(output), source, name)?.finish()?;
            }
            Codec::TarBzip2 => {
                tar(bzip2(output), source, name)?.finish()?;
            }
            Codec::TarXz => {
                tar(xz(output), source, name)?.finish()?;
            }
            Codec::Zip => {
                let name = name.to_str().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "paths must be valid UTF8")
                })?;

                let mut archive = zip::ZipWriter::new(output);

                archive
                    .start_file(
                        name,
                        zip::write::SimpleFileOptions::default()
                            .compression_method(zip::CompressionMethod::Deflated),
                    )
                    .map_err(io::Error::other)?;

                io::copy(&mut File::open(source)?, &mut archive)?;

                archive.finish().map_err(io::Error::other)?;
            }
        }

        Ok(())
    }
}

fn gzip(output: File) -> flate2::write::GzEncoder<File> {
    flate2::write::GzEncoder::new(output, flate2::Compression::default())
}

fn bzip2(output: File) -> bzip2::write::BzEncoder<File> {
    bzip2::write::BzEncoder::new(output, bzip2::Compression::default())
}

fn xz(output: File) -> xz2::write::XzEncoder<File> {
    xz2::write::XzEncoder::new(output, 6)
}

fn lzma(output: File) -> io::Result<xz2::write::XzEncoder<File>> {
    let options = xz2::stream::LzmaOptions::new_preset(6).map_err(io::Error::other)?;
    let stream = xz2::stream::Stream::new_lzma_encoder(&options).map_err(io::Error::other)?;

    Ok(xz2::write::XzEncoder::new_stream(output, stream))
}

fn tar<W: Write>(output: W, source: &Path, name: &std::ffi::OsStr) -> io::Result<W> {
    let mut archive = tar::Builder::new(output);

    archive.append_path_with_name(source, name)?;

    archive.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    #[test]
    fn gz_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        fs::write(&path, b"first line\nsecond line\n").unwrap();

        Compression::parse("gz").unwrap().apply(&path).unwrap();

        assert!(!path.exists());

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(File::open(dir.path().join("app.log.gz")).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();

        assert_eq!("first line\nsecond line\n", decoded);
    }

    #[test]
    fn tar_gz_contains_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        fs::write(&path, b"archived").unwrap();

        Compression::parse(" .tar.gz").unwrap().apply(&path).unwrap();

        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(
            File::open(dir.path().join("app.log.tar.gz")).unwrap(),
        ));

        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();

        assert_eq!(Path::new("app.log"), entry.path().unwrap());

        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();

        assert_eq!("archived", contents);
        assert!(entries.next().is_none());
    }

    #[test]
    fn every_codec_replaces_source() {
        let dir = tempfile::tempdir().unwrap();

        for (ext, _) in CODECS {
            let path = dir.path().join(format!("{}.log", ext.replace('.', "-")));
            fs::write(&path, b"some log output").unwrap();

            Compression::parse(ext).unwrap().apply(&path).unwrap();

            let target = PathBuf::from(format!("{}.{ext}", path.to_str().unwrap()));

            assert!(!path.exists(), "{}", ext);
            assert!(fs::metadata(&target).unwrap().len() > 0, "{}", ext);
        }
    }

    #[test]
    fn existing_target_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let target = dir.path().join("app.log.gz");

        fs::write(&target, b"previous").unwrap();
        fs::write(&path, b"current").unwrap();

        Compression::parse("gz").unwrap().apply(&path).unwrap();

        let renamed = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name != "app.log.gz")
            .collect::<Vec<_>>();

        assert_eq!(1, renamed.len());
        assert!(renamed[0].starts_with("app."));
        assert!(renamed[0].ends_with(".log.gz"));
        assert_eq!(b"previous", &*fs::read(dir.path().join(&renamed[0])).unwrap());
    }

    #[test]
    fn unknown_format() {
        assert!(Compression::parse("rar").unwrap_err().is_config());
    }
}
