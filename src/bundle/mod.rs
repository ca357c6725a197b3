//! Artifact Bundler
//! ======================
//!
//! Walks a working directory in deterministic depth-first order and
//! produces a reproducible gzipped tar, then streams it to standard output
//! on demand.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to {action} at {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        #[serde(serialize_with = "crate::error::io_error_to_string")]
        source: std::io::Error,
    },

    #[error("short or long copy while bundling {path}: expected {expected} bytes, copied {copied}")]
    ShortCopy {
        path: String,
        expected: u64,
        copied: u64,
    },
}

pub type Result<T> = std::result::Result<T, BundleError>;

/// Builds a deterministic gzipped tar of `artifacts_dir` at `bundle_path`.
/// Creates `artifacts_dir` if missing; an empty directory produces a
/// valid, zero-entry tar.gz. Symlinks are skipped entirely. Logs the final
/// size and hex SHA-256 fingerprint of the compressed stream.
pub fn bundle(artifacts_dir: impl AsRef<Path>, bundle_path: impl AsRef<Path>) -> Result<()> {
    let artifacts_dir = artifacts_dir.as_ref();
    let bundle_path = bundle_path.as_ref();

    std::fs::create_dir_all(artifacts_dir).map_err(|e| BundleError::Io {
        action: "create artifacts directory",
        path: artifacts_dir.display().to_string(),
        source: e,
    })?;

    if let Some(parent) = bundle_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| BundleError::Io {
                action: "create bundle parent directory",
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }

    let file = File::create(bundle_path).map_err(|e| BundleError::Io {
        action: "create",
        path: bundle_path.display().to_string(),
        source: e,
    })?;

    let hasher = std::sync::Arc::new(std::sync::Mutex::new(Sha256::new()));
    let sink = HashingWriter {
        inner: file,
        hasher: hasher.clone(),
    };
    let gz = GzEncoder::new(sink, Compression::default());
    let mut tar = tar::Builder::new(gz);

    write_entries(&mut tar, artifacts_dir)?;

    let gz = tar.into_inner().map_err(|e| BundleError::Io {
        action: "close tar stream for",
        path: bundle_path.display().to_string(),
        source: e,
    })?;
    let sink = gz.finish().map_err(|e| BundleError::Io {
        action: "close gzip stream for",
        path: bundle_path.display().to_string(),
        source: e,
    })?;
    let file = sink.inner;
    file.sync_all().map_err(|e| BundleError::Io {
        action: "sync",
        path: bundle_path.display().to_string(),
        source: e,
    })?;

    let digest = hasher.lock().expect("hasher mutex poisoned").clone().finalize();
    let size = std::fs::metadata(bundle_path)
        .map(|m| m.len())
        .unwrap_or(0);
    tracing::info!(
        path = %bundle_path.display(),
        size,
        sha256 = %hex_digest(&digest),
        "artifact bundle written"
    );

    Ok(())
}

fn write_entries<W: Write>(tar: &mut tar::Builder<W>, root: &Path) -> Result<()> {
    let entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BundleError::Io {
            action: "walk",
            path: root.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;

    for entry in entries {
        let file_type = entry.file_type();
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walked entry is under root")
            .to_path_buf();
        let rel_name = forward_slash(&rel);

        if file_type.is_symlink() {
            continue;
        } else if file_type.is_dir() {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            let meta = entry.metadata().map_err(|e| BundleError::Io {
                action: "stat",
                path: entry.path().display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            header.set_size(0);
            header.set_mode(mode_of(&meta));
            header.set_cksum();
            tar.append_data(&mut header, format!("{rel_name}/"), std::io::empty())
                .map_err(|e| BundleError::Io {
                    action: "append directory entry for",
                    path: entry.path().display().to_string(),
                    source: e,
                })?;
        } else if file_type.is_file() {
            let meta = entry.metadata().map_err(|e| BundleError::Io {
                action: "stat",
                path: entry.path().display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;
            let expected = meta.len();
            let mut header = tar::Header::new_gnu();
            header.set_size(expected);
            header.set_mode(mode_of(&meta));
            header.set_cksum();

            let mut file = File::open(entry.path()).map_err(|e| BundleError::Io {
                action: "open",
                path: entry.path().display().to_string(),
                source: e,
            })?;
            let mut limited = (&mut file).take(expected);
            let mut counting = CountingReader {
                inner: &mut limited,
                count: 0,
            };
            tar.append_data(&mut header, &rel_name, &mut counting)
                .map_err(|e| BundleError::Io {
                    action: "append file entry for",
                    path: entry.path().display().to_string(),
                    source: e,
                })?;
            if counting.count != expected {
                return Err(BundleError::ShortCopy {
                    path: entry.path().display().to_string(),
                    expected,
                    copied: counting.count,
                });
            }
        } else {
            tracing::debug!(path = %entry.path().display(), "skipping non-regular, non-directory entry");
        }
    }

    Ok(())
}

/// Opens the already-built bundle and streams it unmodified to `out`. On
/// EOF writes a resume byte through the pause FIFO so a sibling supervisor
/// waiting in `wait` mode can shut down. A failure to write the resume
/// byte is logged but does not roll back the copy.
pub fn export(bundle_path: impl AsRef<Path>, pause_fifo_path: impl AsRef<Path>, mut out: impl Write) -> Result<()> {
    let bundle_path = bundle_path.as_ref();
    let mut file = File::open(bundle_path).map_err(|e| BundleError::Io {
        action: "open",
        path: bundle_path.display().to_string(),
        source: e,
    })?;
    std::io::copy(&mut file, &mut out).map_err(|e| BundleError::Io {
        action: "stream",
        path: bundle_path.display().to_string(),
        source: e,
    })?;

    if let Err(e) = crate::pause::resume(pause_fifo_path.as_ref()) {
        tracing::warn!(error = %e, "failed to write resume byte after export");
    }

    Ok(())
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

fn forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

struct HashingWriter<W> {
    inner: W,
    hasher: std::sync::Arc<std::sync::Mutex<Sha256>>,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.lock().expect("hasher mutex poisoned").update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_directory_produces_valid_empty_tar() {
        let artifacts = tempdir().unwrap();
        let out = tempdir().unwrap().path().join("bundle.tar.gz");
        bundle(artifacts.path(), &out).unwrap();

        let file = File::open(&out).unwrap();
        let gz = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(gz);
        let count = archive.entries().unwrap().count();
        assert_eq!(count, 0);
    }

    #[test]
    fn bundle_round_trip_preserves_content() {
        let artifacts = tempdir().unwrap();
        std::fs::create_dir_all(artifacts.path().join("logs")).unwrap();
        std::fs::write(artifacts.path().join("logs/run.log"), b"log\n").unwrap();

        let out = tempdir().unwrap().path().join("bundle.tar.gz");
        bundle(artifacts.path(), &out).unwrap();

        let untar_dir = tempdir().unwrap();
        let file = File::open(&out).unwrap();
        let gz = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(gz);
        archive.unpack(untar_dir.path()).unwrap();

        let content = std::fs::read_to_string(untar_dir.path().join("logs/run.log")).unwrap();
        assert_eq!(content, "log\n");
    }

    #[test]
    fn symlinks_are_skipped() {
        let artifacts = tempdir().unwrap();
        std::fs::write(artifacts.path().join("real.txt"), b"hi").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(
            artifacts.path().join("real.txt"),
            artifacts.path().join("link.txt"),
        )
        .unwrap();

        let out = tempdir().unwrap().path().join("bundle.tar.gz");
        bundle(artifacts.path(), &out).unwrap();

        let file = File::open(&out).unwrap();
        let gz = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(gz);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.contains("real.txt")));
        assert!(!names.iter().any(|n| n.contains("link.txt")));
    }

    #[test]
    fn re_bundle_is_byte_identical_content_set() {
        let artifacts = tempdir().unwrap();
        std::fs::write(artifacts.path().join("a.txt"), b"a").unwrap();
        std::fs::write(artifacts.path().join("b.txt"), b"b").unwrap();

        let dest = tempdir().unwrap();
        let first = dest.path().join("first.tar.gz");
        let second = dest.path().join("second.tar.gz");
        bundle(artifacts.path(), &first).unwrap();
        bundle(artifacts.path(), &second).unwrap();

        let names_of = |p: &Path| {
            let file = File::open(p).unwrap();
            let gz = flate2::read::GzDecoder::new(file);
            let mut archive = tar::Archive::new(gz);
            let mut names: Vec<String> = archive
                .entries()
                .unwrap()
                .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        };
        assert_eq!(names_of(&first), names_of(&second));
    }
}
