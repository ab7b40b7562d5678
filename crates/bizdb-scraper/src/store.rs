//! Crawl output files.
//!
//! [`ResultStore`] is a JSON array deduplicated by `title`, rewritten whole
//! on every append so a rerun over the same partition adds nothing new. The
//! rewrite goes through a temp file in the same directory and a rename, so
//! the file on disk is always a complete array.
//! [`ErrorLog`] is JSON Lines and records every failure, repeats included.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::StoreError;

const DEDUP_KEY: &str = "title";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored entries. A missing file is empty and an unreadable one is
    /// logged and treated as empty. A corrupt file keeps whatever complete
    /// entries precede the damage.
    #[must_use]
    pub fn load(&self) -> Vec<Value> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "unreadable result file; starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                let salvaged = salvage_entries(&raw);
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    salvaged = salvaged.len(),
                    "corrupt result file; keeping complete entries"
                );
                salvaged
            }
        }
    }

    /// Append `record` unless an entry with the same title is already stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be serialized or the file
    /// cannot be written.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<AppendOutcome, StoreError> {
        let value = serde_json::to_value(record).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        let title = value.get(DEDUP_KEY).cloned().unwrap_or(Value::Null);

        let mut entries = self.load();
        if entries
            .iter()
            .any(|e| e.get(DEDUP_KEY).unwrap_or(&Value::Null) == &title)
        {
            tracing::debug!(path = %self.path.display(), %title, "duplicate title; skipping");
            return Ok(AppendOutcome::Duplicate);
        }

        entries.push(value);
        let body = serde_json::to_string_pretty(&entries).map_err(|source| {
            StoreError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;
        write_atomic(&self.path, body.as_bytes())?;
        tracing::debug!(path = %self.path.display(), %title, entries = entries.len(), "result stored");
        Ok(AppendOutcome::Appended)
    }
}

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the entry cannot be serialized or written.
    pub fn append<T: Serialize>(&self, entry: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        line.push('\n');

        ensure_parent(&self.path)?;
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        Ok(())
    }

    /// Every parseable line; blank and malformed lines are skipped.
    #[must_use]
    pub fn read_all(&self) -> Vec<Value> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

/// Complete entries at the front of a damaged JSON array.
fn salvage_entries(raw: &str) -> Vec<Value> {
    let Some(mut rest) = raw.trim_start().strip_prefix('[') else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                entries.push(value);
                rest = &rest[consumed..];
            }
            _ => return entries,
        }
    }
}

/// Replace `path` with `contents` via a sibling temp file and a rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(contents).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use bizdb_core::{ErrorEntry, ErrorKind, ScrapedItem};

    use super::*;

    fn item(title: &str) -> ScrapedItem {
        ScrapedItem {
            title: title.to_owned(),
            query: format!("{title} Gangnam-gu Teheran-ro"),
            ..ScrapedItem::default()
        }
    }

    #[test]
    fn same_title_twice_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("crawl_output_0.json"));

        assert_eq!(store.append(&item("Seoul BBQ")).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.append(&item("Seoul BBQ")).unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn distinct_titles_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("out.json"));
        store.append(&item("B")).unwrap();
        store.append(&item("A")).unwrap();

        let titles: Vec<String> = store
            .load()
            .iter()
            .map(|e| e["title"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("nested/deeper/out.json"));
        store.append(&item("Seoul BBQ")).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        fs::write(&path, "[{\"title\": \"half").unwrap();
        let store = ResultStore::new(&path);

        assert!(store.load().is_empty());
        assert_eq!(store.append(&item("Seoul BBQ")).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn torn_last_entry_keeps_earlier_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let store = ResultStore::new(&path);
        for title in ["A", "B", "C"] {
            store.append(&item(title)).unwrap();
        }
        let full = fs::read(&path).unwrap();
        fs::write(&path, &full[..full.len() - 5]).unwrap();

        store.append(&item("D")).unwrap();

        let titles: Vec<String> = store
            .load()
            .iter()
            .map(|e| e["title"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(titles, vec!["A", "B", "D"]);
    }

    #[test]
    fn rewrite_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("out.json"));
        store.append(&item("A")).unwrap();
        store.append(&item("B")).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("out.json")]);
        assert_eq!(store.load().len(), 2);
    }

    #[test]
    fn error_log_keeps_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path().join("errors/error_log_0.jsonl"));
        let entry = ErrorEntry::new(ErrorKind::NoStore, "Seoul BBQ", "Gangnam-gu", "no results");

        log.append(&entry).unwrap();
        log.append(&entry).unwrap();

        let lines = log.read_all();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "no_store");
        assert_eq!(lines[1]["title"], "Seoul BBQ");
    }

    #[test]
    fn unwritable_path_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let store = ResultStore::new(dir.path());
        let err = store.append(&item("Seoul BBQ")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
