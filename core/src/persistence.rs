//! Persistence: crash-safe file writes
//!
//! Pid files and diagnostic dumps are written via write-to-temp + fsync +
//! rename, so readers never observe a partially written file.

use crate::{CoreError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn io_context(e: std::io::Error, context: String) -> CoreError {
    let message = format!("{}: {}", context, e);
    CoreError::IoError(std::io::Error::new(e.kind(), message))
}

/// Temp file next to `path`, unique per process and call
fn temp_path(path: &Path) -> PathBuf {
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(path.file_name().unwrap_or_default());
    tmp_name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(tmp_name)
}

/// Atomically replace `path` with `contents`.
///
/// Steps:
/// - Ensure the parent directory exists
/// - Write to a uniquely named temp file in the same directory
/// - `flush` + `sync_all` on the temp file
/// - `rename` temp file over the destination
/// - Best-effort fsync of the directory to persist rename
pub fn write_file_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            io_context(e, format!("Failed to create directory {}", parent.display()))
        })?;
    }

    let tmp_path = temp_path(path);
    let written = write_synced(&tmp_path, contents).and_then(|()| {
        fs::rename(&tmp_path, path).map_err(|e| {
            io_context(
                e,
                format!(
                    "Failed to replace {} with {}",
                    path.display(),
                    tmp_path.display()
                ),
            )
        })
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
        return written;
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

fn write_synced(tmp_path: &Path, contents: &[u8]) -> Result<()> {
    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(tmp_path)
        .map_err(|e| io_context(e, format!("Failed to open temp file {}", tmp_path.display())))?;
    f.write_all(contents)
        .and_then(|()| f.flush())
        .and_then(|()| f.sync_all())
        .map_err(|e| io_context(e, format!("Failed to write temp file {}", tmp_path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("value.txt");

        write_file_atomic(&path, b"first\n").expect("write ok");
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\n");

        write_file_atomic(&path, b"second\n").expect("rewrite ok");
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn unwritable_destination_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let err = write_file_atomic(blocker.join("child.txt"), b"y").unwrap_err();
        assert!(format!("{}", err).contains("Failed to create directory"));
    }

    #[test]
    fn concurrent_writers_do_not_share_a_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.txt");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        write_file_atomic(&path, format!("writer {}\n", i).as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("writer ") && contents.ends_with('\n'));
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1, "temp files must not be left behind");
    }
}
