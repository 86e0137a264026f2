// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-safe single-file JSON persistence (§4.1.1): write-temp + fsync +
//! rename + parent-directory fsync.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

pub fn object_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Serialize `value` and durably replace the file at `path` (which lives
/// under `dir`). `dir` must be the file's own parent directory.
pub fn write_atomic<T: Serialize>(dir: &Path, path: &Path, value: &T) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    io::Write::write_all(&mut tmp, &bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // fsync the parent directory so the rename itself survives a crash.
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

pub fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Deserialize every `*.json` file directly under `dir`, skipping (and
/// reporting via the callback) any file that fails to parse.
pub fn scan<T: DeserializeOwned>(
    dir: &Path,
    mut on_malformed: impl FnMut(&Path, &serde_json::Error),
) -> io::Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path)?;
        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => out.push(value),
            Err(e) => on_malformed(&path, &e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn write_atomic_then_scan_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = object_path(tmp.path(), "a");
        write_atomic(tmp.path(), &path, &Point { x: 1, y: 2 }).unwrap();

        let scanned: Vec<Point> = scan(tmp.path(), |_, _| panic!("unexpected malformed")).unwrap();
        assert_eq!(scanned, vec![Point { x: 1, y: 2 }]);
    }

    #[test]
    fn scan_skips_malformed_files_and_reports_them() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("bad.json"), b"not json").unwrap();
        write_atomic(tmp.path(), &object_path(tmp.path(), "good"), &Point { x: 3, y: 4 }).unwrap();

        let mut malformed = Vec::new();
        let scanned: Vec<Point> = scan(tmp.path(), |p, _| malformed.push(p.to_path_buf())).unwrap();

        assert_eq!(scanned, vec![Point { x: 3, y: 4 }]);
        assert_eq!(malformed.len(), 1);
    }

    #[test]
    fn remove_is_idempotent_for_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        remove(&tmp.path().join("missing.json")).unwrap();
    }
}
