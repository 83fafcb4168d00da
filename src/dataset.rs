//! Dataset accumulation and persistence
//!
//! Pipeline output is buffered in a [`DatasetSession`] until it is flushed to
//! a JSON array on disk. Image datasets merge into an existing file, text
//! datasets overwrite.

use crate::models::{ImageRecord, TextRecord};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSummary {
    pub path: PathBuf,
    /// Records flushed from the buffer.
    pub written: usize,
    /// Records in the file after the save.
    pub total: usize,
}

/// In-memory record buffers for one working session.
#[derive(Debug)]
pub struct DatasetSession {
    id: Uuid,
    text_records: Vec<TextRecord>,
    image_records: Vec<ImageRecord>,
}

impl Default for DatasetSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            text_records: Vec::new(),
            image_records: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Buffer text records; returns the buffered total.
    pub fn push_text(&mut self, records: Vec<TextRecord>) -> usize {
        self.text_records.extend(records);
        self.text_records.len()
    }

    /// Buffer image records; returns the buffered total.
    pub fn push_images(&mut self, records: Vec<ImageRecord>) -> usize {
        self.image_records.extend(records);
        self.image_records.len()
    }

    pub fn text_records(&self) -> &[TextRecord] {
        &self.text_records
    }

    pub fn image_records(&self) -> &[ImageRecord] {
        &self.image_records
    }

    /// Write the text buffer to `path`, replacing the file, then clear it.
    pub fn save_text(&mut self, path: &Path) -> Result<SaveSummary> {
        if self.text_records.is_empty() {
            return Err(Error::NothingToSave);
        }

        write_json_atomic(path, &self.text_records)?;
        let written = self.text_records.len();
        self.text_records.clear();

        info!(session = %self.id, "Text dataset saved: {} ({} records)", path.display(), written);
        Ok(SaveSummary {
            path: path.to_path_buf(),
            written,
            total: written,
        })
    }

    /// Merge the image buffer into the dataset at `path`, then clear it.
    pub fn save_images(&mut self, path: &Path) -> Result<SaveSummary> {
        if self.image_records.is_empty() {
            return Err(Error::NothingToSave);
        }

        let existing = load_existing_images(path)?;
        let pending: Vec<ImageRecord> = self.image_records.clone();
        let before = existing.len();
        let merged = merge_image_records(existing, pending)?;

        write_json_atomic(path, &merged)?;
        let written = merged.len() - before;
        self.image_records.clear();

        info!(
            session = %self.id,
            "Image dataset saved: {} ({} new, {} total)",
            path.display(),
            written,
            merged.len()
        );
        Ok(SaveSummary {
            path: path.to_path_buf(),
            written,
            total: merged.len(),
        })
    }
}

/// Append `new` records to `existing`, renumbering them after the highest
/// existing id. Records with a blank field are dropped first.
///
/// Existing entries keep their order and any extra fields; their ids are
/// coerced to integers (0 when not numeric). Fails when the next id would
/// not fit in a `u64`.
pub fn merge_image_records(existing: Vec<Value>, new: Vec<ImageRecord>) -> Result<Vec<Value>> {
    let mut merged = existing;
    let mut max_id = 0u64;

    for item in merged.iter_mut() {
        if let Value::Object(fields) = item {
            let id = coerce_id(fields.get("id"));
            fields.insert("id".to_string(), Value::from(id));
            max_id = max_id.max(id);
        }
    }

    let mut next_id = max_id;
    for mut record in new.into_iter().filter(ImageRecord::is_complete) {
        next_id = next_id
            .checked_add(1)
            .ok_or_else(|| Error::Invariant("Image ID overflow".to_string()))?;
        record.id = next_id;
        merged.push(serde_json::json!({
            "id": record.id,
            "image_path": record.image_path,
            "description": record.description,
        }));
    }

    Ok(merged)
}

fn coerce_id(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Load the existing image dataset.
///
/// A missing or empty file is no data. A malformed file is copied to
/// `<file>.bak` and treated as no data.
fn load_existing_images(path: &Path) -> Result<Vec<Value>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Vec<Value>>(&content) {
        Ok(existing) => {
            info!("Loaded {} existing records from {}", existing.len(), path.display());
            Ok(existing)
        }
        Err(e) => {
            let backup = backup_path(path);
            fs::copy(path, &backup)?;
            warn!(
                "Existing dataset {} is malformed ({}); backed up to {} and starting fresh",
                path.display(),
                e,
                backup.display()
            );
            Ok(Vec::new())
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

/// Pretty-print `value` to a temp file beside `path` and rename it into place.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn image(id: u64, path: &str, description: &str) -> ImageRecord {
        ImageRecord {
            id,
            image_path: path.to_string(),
            description: description.to_string(),
        }
    }

    fn ids(values: &[Value]) -> Vec<u64> {
        values.iter().map(|v| v["id"].as_u64().unwrap()).collect()
    }

    #[test]
    fn test_merge_continues_after_existing_max() {
        let existing = vec![
            serde_json::json!({"id": 7, "image_path": "/a.png", "description": "a"}),
            serde_json::json!({"id": 3, "image_path": "/b.png", "description": "b"}),
        ];
        let merged = merge_image_records(
            existing,
            vec![image(1, "/c.png", "c"), image(2, "/d.png", "d")],
        )
        .unwrap();

        assert_eq!(ids(&merged), vec![7, 3, 8, 9]);
        assert_eq!(merged[0]["image_path"], "/a.png");
        assert_eq!(merged[2]["image_path"], "/c.png");
        assert_eq!(merged[3]["image_path"], "/d.png");
    }

    #[test]
    fn test_merge_coerces_existing_ids() {
        let existing = vec![
            serde_json::json!({"id": " 12 ", "image_path": "/a.png", "description": "a"}),
            serde_json::json!({"id": "abc", "image_path": "/b.png", "description": "b"}),
            serde_json::json!({"image_path": "/c.png", "description": "c", "tag": "kept"}),
        ];
        let merged = merge_image_records(existing, vec![image(1, "/d.png", "d")]).unwrap();

        assert_eq!(ids(&merged), vec![12, 0, 0, 13]);
        assert_eq!(merged[2]["tag"], "kept");
    }

    #[test]
    fn test_merge_into_nothing_starts_at_one() {
        let merged = merge_image_records(
            Vec::new(),
            vec![image(5, "/a.png", "a"), image(9, "/b.png", "b")],
        )
        .unwrap();
        assert_eq!(ids(&merged), vec![1, 2]);
    }

    #[test]
    fn test_merge_drops_blank_records_before_numbering() {
        let merged = merge_image_records(
            Vec::new(),
            vec![
                image(1, "/a.png", "a"),
                image(2, "/b.png", "   "),
                image(3, "", "c"),
                image(4, "/d.png", "d"),
            ],
        )
        .unwrap();

        assert_eq!(ids(&merged), vec![1, 2]);
        assert_eq!(merged[1]["image_path"], "/d.png");
    }

    #[test]
    fn test_merge_after_max_id_is_an_error() {
        let existing = vec![serde_json::json!({
            "id": u64::MAX,
            "image_path": "/last.png",
            "description": "last"
        })];

        let result = merge_image_records(existing, vec![image(1, "/a.png", "a")]);

        assert!(matches!(result, Err(Error::Invariant(_))));
    }

    #[test]
    fn test_merge_at_max_id_without_new_records_is_fine() {
        let existing = vec![serde_json::json!({
            "id": u64::MAX,
            "image_path": "/last.png",
            "description": "last"
        })];

        let merged = merge_image_records(existing, vec![image(1, "/a.png", " ")]).unwrap();

        assert_eq!(ids(&merged), vec![u64::MAX]);
    }

    #[test]
    fn test_save_images_overflow_keeps_file_and_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image_dataset.json");
        let original = format!(
            r#"[{{"id": {}, "image_path": "/last.png", "description": "last"}}]"#,
            u64::MAX
        );
        fs::write(&path, &original).unwrap();

        let mut session = DatasetSession::new();
        session.push_images(vec![image(1, "/a.png", "a")]);

        assert!(session.save_images(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert_eq!(session.image_records().len(), 1);
    }

    #[test]
    fn test_save_images_round_trip_excludes_blank_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image_dataset.json");
        let mut session = DatasetSession::new();
        session.push_images(vec![image(1, "/a.png", "a cat"), image(2, "/b.png", " ")]);

        let summary = session.save_images(&path).unwrap();

        assert_eq!(summary.written, 1);
        assert!(session.image_records().is_empty());
        let reloaded: Vec<ImageRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded, vec![image(1, "/a.png", "a cat")]);
    }

    #[test]
    fn test_save_images_merges_with_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image_dataset.json");
        fs::write(
            &path,
            r#"[{"id": "7", "image_path": "/old.png", "description": "old"}]"#,
        )
        .unwrap();

        let mut session = DatasetSession::new();
        session.push_images(vec![image(1, "/new1.png", "n1"), image(2, "/new2.png", "n2")]);
        let summary = session.save_images(&path).unwrap();

        assert_eq!(summary.total, 3);
        let reloaded: Vec<ImageRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            reloaded,
            vec![
                image(7, "/old.png", "old"),
                image(8, "/new1.png", "n1"),
                image(9, "/new2.png", "n2"),
            ]
        );
    }

    #[test]
    fn test_empty_existing_file_is_no_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image_dataset.json");
        fs::write(&path, "  \n").unwrap();

        let mut session = DatasetSession::new();
        session.push_images(vec![image(4, "/a.png", "a")]);
        session.save_images(&path).unwrap();

        let reloaded: Vec<ImageRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded, vec![image(1, "/a.png", "a")]);
    }

    #[test]
    fn test_malformed_existing_file_is_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image_dataset.json");
        fs::write(&path, "{not json").unwrap();

        let mut session = DatasetSession::new();
        session.push_images(vec![image(1, "/a.png", "a")]);
        session.save_images(&path).unwrap();

        let backup = dir.path().join("image_dataset.json.bak");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{not json");
        let reloaded: Vec<ImageRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_save_text_writes_pretty_utf8_and_clears() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("text_dataset.json");
        let mut session = DatasetSession::new();
        session.push_text(vec![TextRecord::new("潮汐", "月亮牵引海水。")]);

        let summary = session.save_text(&path).unwrap();

        assert_eq!(summary.written, 1);
        assert!(session.text_records().is_empty());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"instruction\": \"潮汐\""));
        assert!(content.contains("\n  {"));
        let reloaded: Vec<TextRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(reloaded, vec![TextRecord::new("潮汐", "月亮牵引海水。")]);
    }

    #[test]
    fn test_save_text_overwrites_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("text_dataset.json");
        let mut session = DatasetSession::new();

        session.push_text(vec![TextRecord::new("a", "first")]);
        session.save_text(&path).unwrap();
        session.push_text(vec![TextRecord::new("b", "second")]);
        session.save_text(&path).unwrap();

        let reloaded: Vec<TextRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded, vec![TextRecord::new("b", "second")]);
    }

    #[test]
    fn test_saving_empty_buffer_is_an_error() {
        let dir = tempdir().unwrap();
        let mut session = DatasetSession::new();

        assert!(matches!(
            session.save_text(&dir.path().join("t.json")),
            Err(Error::NothingToSave)
        ));
        assert!(matches!(
            session.save_images(&dir.path().join("i.json")),
            Err(Error::NothingToSave)
        ));
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut first = DatasetSession::new();
        let second = DatasetSession::new();

        first.push_text(vec![TextRecord::new("a", "b")]);

        assert_ne!(first.id(), second.id());
        assert_eq!(first.text_records().len(), 1);
        assert!(second.text_records().is_empty());
    }
}
