use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::event::{Event, EventId, FieldMapping, PartitionedRecords, partition_records};
use crate::session::EventSource;

/// JSONL event store. Records keep the host's field names; events are
/// mapped on open and written back through the same mapping. Records of
/// unchanged events, and records that cannot be placed, are written back
/// exactly as loaded.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub events_path: PathBuf,
    pub undo_path: PathBuf,
    mapping: FieldMapping,
    tz: Tz,
    events: Vec<Event>,
    /// As-loaded event and its source record, by tracking token.
    sources: HashMap<Uuid, (Event, Value)>,
    unplaced: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoEntry {
    records: Vec<Value>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir, mapping, tz))]
    pub fn open(data_dir: &Path, mapping: FieldMapping, tz: Tz) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let events_path = data_dir.join("events.data");
        let undo_path = data_dir.join("undo.data");

        if !events_path.exists() {
            fs::write(&events_path, "")?;
        }
        if !undo_path.exists() {
            fs::write(&undo_path, "")?;
        }

        let records = load_jsonl(&events_path).context("failed to load events.data")?;
        let mut store = Self {
            data_dir,
            events_path,
            undo_path,
            mapping,
            tz,
            events: Vec::new(),
            sources: HashMap::new(),
            unplaced: Vec::new(),
        };
        store.load_records(&records);

        info!(
            data_dir = %store.data_dir.display(),
            events = %store.events_path.display(),
            undo = %store.undo_path.display(),
            count = store.events.len(),
            unplaced = store.unplaced.len(),
            "opened datastore"
        );
        Ok(store)
    }

    fn load_records(&mut self, records: &[Value]) {
        let PartitionedRecords { placed, unplaced } =
            partition_records(records, &self.mapping, &self.tz);
        self.events = placed.iter().map(|(event, _)| event.clone()).collect();
        self.sources = placed
            .into_iter()
            .map(|(event, record)| (event.guid, (event, record)))
            .collect();
        self.unplaced = unplaced;
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Next free numeric id, counting records that could not be placed.
    pub fn next_id(&self) -> i64 {
        let unplaced_ids = self
            .unplaced
            .iter()
            .filter_map(|record| record.get(&self.mapping.id))
            .filter_map(EventId::from_value);
        self.events
            .iter()
            .filter_map(|event| event.id.clone())
            .chain(unplaced_ids)
            .filter_map(|id| match id {
                EventId::Number(id) => Some(id),
                EventId::Text(_) => None,
            })
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Resolves a CLI reference: a domain id, or a guid prefix.
    pub fn find(&self, reference: &str) -> Option<&Event> {
        let reference = reference.trim();
        self.events
            .iter()
            .find(|event| event.id.as_ref().is_some_and(|id| id.matches(reference)))
            .or_else(|| {
                let prefix = reference.to_ascii_lowercase();
                if prefix.len() < 4 {
                    return None;
                }
                self.events
                    .iter()
                    .find(|event| event.guid.to_string().starts_with(&prefix))
            })
    }

    fn records(&self) -> Vec<Value> {
        self.events
            .iter()
            .map(|event| match self.sources.get(&event.guid) {
                Some((loaded, record)) if loaded == event => record.clone(),
                _ => Value::Object(event.to_record(&self.mapping)),
            })
            .chain(self.unplaced.iter().cloned())
            .collect()
    }

    #[tracing::instrument(skip(self))]
    fn persist(&self) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.events_path, &self.records()).context("failed to save events.data")
    }

    #[tracing::instrument(skip(self))]
    fn push_current_undo_snapshot(&self) -> anyhow::Result<()> {
        let mut entries = load_undo_entries(&self.undo_path)?;
        entries.push(UndoEntry {
            records: self.records(),
        });
        save_undo_entries(&self.undo_path, &entries)
    }

    /// Restores the state before the last mutation. Returns `false` when
    /// there is nothing to undo.
    #[tracing::instrument(skip(self))]
    pub fn undo(&mut self) -> anyhow::Result<bool> {
        let mut entries = load_undo_entries(&self.undo_path)?;
        let Some(entry) = entries.pop() else {
            return Ok(false);
        };
        save_undo_entries(&self.undo_path, &entries)?;
        save_jsonl_atomic(&self.events_path, &entry.records)
            .context("failed to restore events.data")?;
        self.load_records(&entry.records);
        info!(count = self.events.len(), "restored undo snapshot");
        Ok(true)
    }
}

impl EventSource for DataStore {
    #[tracing::instrument(skip(self, event), fields(guid = %event.guid))]
    fn add_event(&mut self, mut event: Event) -> anyhow::Result<Event> {
        self.push_current_undo_snapshot()?;
        if event.id.is_none() {
            event.id = Some(EventId::Number(self.next_id()));
        }
        self.events.push(event.clone());
        self.events.sort_by(|a, b| a.start.cmp(&b.start));
        self.persist()?;
        Ok(event)
    }

    #[tracing::instrument(skip(self, event), fields(guid = %event.guid))]
    fn save_event(&mut self, event: Event) -> anyhow::Result<()> {
        let idx = self
            .events
            .iter()
            .position(|existing| existing.guid == event.guid)
            .ok_or_else(|| anyhow!("event not found in store: {}", event.guid))?;
        self.push_current_undo_snapshot()?;
        self.events[idx] = event;
        self.events.sort_by(|a, b| a.start.cmp(&b.start));
        self.persist()
    }

    #[tracing::instrument(skip(self), fields(guid = %guid))]
    fn delete_event(&mut self, guid: Uuid) -> anyhow::Result<Option<Event>> {
        let Some(idx) = self.events.iter().position(|event| event.guid == guid) else {
            return Ok(None);
        };
        self.push_current_undo_snapshot()?;
        let removed = self.events.remove(idx);
        self.sources.remove(&guid);
        self.persist()?;
        Ok(Some(removed))
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Value>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: Value = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic(path: &Path, records: &[Value]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for record in records {
        let serialized = serde_json::to_string(record)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[tracing::instrument(skip(path))]
fn load_undo_entries(path: &Path) -> anyhow::Result<Vec<UndoEntry>> {
    debug!(file = %path.display(), "loading undo entries");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: UndoEntry = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(entry);
    }

    Ok(out)
}

#[tracing::instrument(skip(path, entries))]
fn save_undo_entries(path: &Path, entries: &[UndoEntry]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = entries.len(), "saving undo entries");
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for entry in entries {
        let serialized = serde_json::to_string(entry)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, d)
            .and_then(|date| date.and_hms_opt(h, 0, 0))
            .expect("valid datetime")
    }

    fn open(dir: &Path) -> DataStore {
        DataStore::open(dir, FieldMapping::default(), chrono_tz::UTC).expect("open store")
    }

    #[test]
    fn add_assigns_ids_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());

        let first = store
            .add_event(Event::new("standup", at(16, 9), at(16, 10)))
            .expect("add first");
        let second = store
            .add_event(Event::new("review", at(16, 11), at(16, 12)))
            .expect("add second");
        assert_eq!(first.id, Some(EventId::Number(1)));
        assert_eq!(second.id, Some(EventId::Number(2)));

        let reopened = open(dir.path());
        assert_eq!(reopened.events().len(), 2);
        assert_eq!(reopened.find("2").map(|event| event.subject.as_str()), Some("review"));
    }

    #[test]
    fn extra_fields_survive_rewrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("events.data"),
            concat!(
                r#"{"id":7,"subject":"Board","startTime":"2026-02-16T09:00:00","#,
                r#""endTime":"2026-02-16T10:00:00","color":"teal"}"#,
            ),
        )
        .expect("seed events");

        let mut store = open(dir.path());
        let mut event = store.events()[0].clone();
        event.subject = "Board meeting".to_string();
        store.save_event(event).expect("save");

        let raw = fs::read_to_string(dir.path().join("events.data")).expect("read back");
        let record: Value = serde_json::from_str(raw.trim()).expect("json line");
        assert_eq!(record["color"], "teal");
        assert_eq!(record["subject"], "Board meeting");
        assert_eq!(record["id"], 7);
    }

    #[test]
    fn untouched_records_keep_their_timestamp_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let epoch = concat!(
            r#"{"endTime":1771236000000,"id":1,"startTime":1771232400000,"#,
            r#""subject":"Epoch"}"#,
        );
        let offset = concat!(
            r#"{"endTime":"2026-02-17T10:00:00+02:00","id":2,"#,
            r#""startTime":"2026-02-17T09:00:00+02:00","subject":"Offset"}"#,
        );
        fs::write(dir.path().join("events.data"), format!("{epoch}\n{offset}\n"))
            .expect("seed events");

        let mut store = open(dir.path());
        let mut moved = store.find("2").cloned().expect("offset event");
        moved.subject = "Offset moved".to_string();
        store.save_event(moved).expect("save");

        let raw = fs::read_to_string(dir.path().join("events.data")).expect("read back");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&epoch));
        let rewritten = lines
            .iter()
            .find(|line| line.contains("Offset moved"))
            .expect("mutated record");
        assert!(!rewritten.contains("+02:00"));
    }

    #[test]
    fn undo_restores_previous_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let added = store
            .add_event(Event::new("standup", at(16, 9), at(16, 10)))
            .expect("add");
        store.delete_event(added.guid).expect("delete");
        assert!(store.events().is_empty());

        assert!(store.undo().expect("undo delete"));
        assert_eq!(store.events().len(), 1);
        assert!(store.undo().expect("undo add"));
        assert!(store.events().is_empty());
        assert!(!store.undo().expect("nothing left"));
    }

    #[test]
    fn delete_unknown_guid_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        assert!(store.delete_event(Uuid::new_v4()).expect("delete").is_none());
        assert!(!store.undo().expect("no snapshot"));
    }
}
