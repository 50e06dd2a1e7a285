//! JSONL snapshot export and import.
//!
//! A snapshot is one JSON object per line: a single `meta` record, then
//! features, tasks and dependencies, each group sorted by name. Keys are
//! sorted, separators are compact and non-ASCII text is `\uXXXX`-escaped, so
//! two exports of the same graph are byte-identical.

use crate::storage;
use crate::store::{Entity, Store, StoreError, insert_dependency};
use crate::types::{Dependency, Feature, Status, Task};
use eyre::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Snapshot format version written to and required from the meta record.
pub const SCHEMA_VERSION: &str = "1";

/// `generated_at` of a graph with no features and no tasks.
const EPOCH: &str = "1970-01-01T00:00:00.000000Z";

const RECORD_ORDER: [&str; 4] = ["meta", "feature", "task", "dependency"];

/// How an import treats the destination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Replace whatever the destination holds.
    Overwrite,
    /// Import only into an empty destination.
    MergeIfAbsent,
}

/// Counts of imported records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub features: usize,
    pub tasks: usize,
    pub dependencies: usize,
}

/// Malformed snapshot or refused import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    InvalidJson { line: usize, message: String },
    NotAnObject { line: usize },
    MissingRecordType { line: usize },
    UnknownRecordType { line: usize, record_type: String },
    OutOfOrder { line: usize, record_type: String },
    DuplicateMeta { line: usize },
    MissingMeta,
    UnsupportedVersion(String),
    MissingGeneratedAt,
    InvalidRecord { line: usize, message: String },
    DestinationNotEmpty,
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::InvalidJson { line, message } => write!(f, "invalid JSON on line {}: {}", line, message),
            SnapshotError::NotAnObject { line } => write!(f, "record on line {} must be an object", line),
            SnapshotError::MissingRecordType { line } => {
                write!(f, "field 'record_type' must be a non-empty string on line {}", line)
            }
            SnapshotError::UnknownRecordType { line, record_type } => {
                write!(f, "invalid record_type '{}' on line {}", record_type, line)
            }
            SnapshotError::OutOfOrder { line, record_type } => {
                write!(f, "record ordering violation on line {}: {}", line, record_type)
            }
            SnapshotError::DuplicateMeta { line } => {
                write!(f, "snapshot must contain only one meta record (second on line {})", line)
            }
            SnapshotError::MissingMeta => write!(f, "snapshot must start with a meta record"),
            SnapshotError::UnsupportedVersion(v) => write!(f, "unsupported snapshot schema version: {}", v),
            SnapshotError::MissingGeneratedAt => write!(f, "meta record must include generated_at"),
            SnapshotError::InvalidRecord { line, message } => write!(f, "invalid record on line {}: {}", line, message),
            SnapshotError::DestinationNotEmpty => {
                write!(f, "destination store is not empty; use overwrite to replace it")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct MetaRecord {
    #[serde(default)]
    schema_version: Option<String>,
    #[serde(default)]
    generated_at: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FeatureRecord {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    created_at: String,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskRecord {
    name: String,
    description: String,
    #[serde(default, alias = "specification")]
    details: Option<String>,
    feature_name: String,
    priority: u8,
    status: String,
    #[serde(default = "default_true")]
    tests_required: bool,
    created_at: String,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
}

fn default_true() -> bool {
    true
}

impl From<&Feature> for FeatureRecord {
    fn from(f: &Feature) -> Self {
        Self {
            name: f.name.clone(),
            description: f.description.clone(),
            enabled: f.enabled,
            created_at: f.created_at.clone(),
            updated_at: Some(f.updated_at.clone()),
        }
    }
}

impl From<FeatureRecord> for Feature {
    fn from(r: FeatureRecord) -> Self {
        let updated_at = r.updated_at.unwrap_or_else(|| r.created_at.clone());
        Self {
            name: r.name,
            description: r.description,
            enabled: r.enabled,
            created_at: r.created_at,
            updated_at,
        }
    }
}

impl From<&Task> for TaskRecord {
    fn from(t: &Task) -> Self {
        Self {
            name: t.name.clone(),
            description: t.description.clone(),
            details: t.details.clone(),
            feature_name: t.feature_name.clone(),
            priority: t.priority,
            status: t.status.as_str().to_string(),
            tests_required: t.tests_required,
            created_at: t.created_at.clone(),
            updated_at: Some(t.updated_at.clone()),
            started_at: t.started_at.clone(),
            completed_at: t.completed_at.clone(),
        }
    }
}

impl TaskRecord {
    fn into_task(self) -> Result<Task, StoreError> {
        let status = self.status.parse::<Status>()?;
        let updated_at = self.updated_at.unwrap_or_else(|| self.created_at.clone());
        Ok(Task {
            name: self.name,
            description: self.description,
            details: self.details,
            feature_name: self.feature_name,
            priority: self.priority,
            tests_required: self.tests_required,
            status,
            created_at: self.created_at,
            updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Compact formatter that escapes every non-ASCII character as `\uXXXX`
/// (UTF-16 surrogate pairs above the BMP).
struct AsciiFormatter;

impl serde_json::ser::Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if c.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// Serialize one record as a sorted-key, ASCII-only JSON line.
fn encode_record<T: Serialize>(record_type: &str, record: &T) -> Result<Vec<u8>> {
    let Value::Object(fields) = serde_json::to_value(record)? else {
        eyre::bail!("{} record did not serialize to an object", record_type);
    };
    let mut sorted: BTreeMap<String, Value> = fields.into_iter().collect();
    sorted.insert("record_type".to_string(), Value::String(record_type.to_string()));

    let mut line = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut line, AsciiFormatter);
    sorted.serialize(&mut ser)?;
    line.push(b'\n');
    Ok(line)
}

/// Write the whole graph visible through `conn` as snapshot lines.
pub fn write_snapshot<W: Write>(conn: &Connection, out: &mut W) -> Result<()> {
    let generated_at = storage::latest_update(conn)?.unwrap_or_else(|| EPOCH.to_string());
    let meta = MetaRecord {
        schema_version: Some(SCHEMA_VERSION.to_string()),
        generated_at: Some(generated_at),
        source: Some("sqlite".to_string()),
    };
    out.write_all(&encode_record("meta", &meta)?)?;

    for feature in storage::list_features(conn, None)? {
        out.write_all(&encode_record("feature", &FeatureRecord::from(&feature))?)?;
    }
    for task in storage::tasks_by_name(conn)? {
        out.write_all(&encode_record("task", &TaskRecord::from(&task))?)?;
    }
    for dep in storage::list_edges(conn, None)? {
        out.write_all(&encode_record("dependency", &dep)?)?;
    }
    out.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A parsed, order-checked snapshot. Field values are not validated yet.
#[derive(Debug)]
pub struct ParsedSnapshot {
    pub generated_at: String,
    features: Vec<(usize, FeatureRecord)>,
    tasks: Vec<(usize, TaskRecord)>,
    dependencies: Vec<(usize, Dependency)>,
}

impl ParsedSnapshot {
    pub fn summary(&self) -> ImportSummary {
        ImportSummary {
            features: self.features.len(),
            tasks: self.tasks.len(),
            dependencies: self.dependencies.len(),
        }
    }
}

fn snapshot_err(e: SnapshotError) -> eyre::Report {
    eyre::eyre!(e)
}

fn decode<T: for<'de> Deserialize<'de>>(line: usize, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        snapshot_err(SnapshotError::InvalidRecord {
            line,
            message: e.to_string(),
        })
    })
}

/// Parse every line of a snapshot, checking structure and record order.
pub fn parse_snapshot<R: BufRead>(reader: R) -> Result<ParsedSnapshot> {
    let mut meta: Option<MetaRecord> = None;
    let mut features = Vec::new();
    let mut tasks = Vec::new();
    let mut dependencies = Vec::new();
    let mut current = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line.context("Failed to read snapshot")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(trimmed).map_err(|e| {
            snapshot_err(SnapshotError::InvalidJson {
                line: line_number,
                message: e.to_string(),
            })
        })?;
        let Value::Object(mut fields) = value else {
            return Err(snapshot_err(SnapshotError::NotAnObject { line: line_number }));
        };

        let record_type = match fields.remove("record_type") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err(snapshot_err(SnapshotError::MissingRecordType { line: line_number })),
        };
        let Some(order) = RECORD_ORDER.iter().position(|r| *r == record_type) else {
            return Err(snapshot_err(SnapshotError::UnknownRecordType {
                line: line_number,
                record_type,
            }));
        };
        if order < current {
            return Err(snapshot_err(SnapshotError::OutOfOrder {
                line: line_number,
                record_type,
            }));
        }
        if order > 0 && meta.is_none() {
            return Err(snapshot_err(SnapshotError::MissingMeta));
        }
        current = order;

        let body = Value::Object(fields);
        match order {
            0 => {
                if meta.is_some() {
                    return Err(snapshot_err(SnapshotError::DuplicateMeta { line: line_number }));
                }
                meta = Some(decode(line_number, body)?);
            }
            1 => features.push((line_number, decode(line_number, body)?)),
            2 => tasks.push((line_number, decode(line_number, body)?)),
            _ => dependencies.push((line_number, decode(line_number, body)?)),
        }
    }

    let meta = meta.ok_or_else(|| snapshot_err(SnapshotError::MissingMeta))?;
    let version = meta.schema_version.unwrap_or_default();
    if version != SCHEMA_VERSION {
        return Err(snapshot_err(SnapshotError::UnsupportedVersion(version)));
    }
    let generated_at = meta
        .generated_at
        .filter(|g| !g.is_empty())
        .ok_or_else(|| snapshot_err(SnapshotError::MissingGeneratedAt))?;

    Ok(ParsedSnapshot {
        generated_at,
        features,
        tasks,
        dependencies,
    })
}

/// Replace the contents of the store visible through `conn` with `parsed`.
///
/// Runs inside the caller's transaction; any error leaves it to roll back.
fn load_snapshot(conn: &Connection, parsed: ParsedSnapshot) -> Result<ImportSummary> {
    let summary = parsed.summary();
    storage::clear_all(conn)?;

    for (line, record) in parsed.features {
        let feature = Feature::from(record);
        feature
            .validate()
            .map_err(|e| eyre::eyre!(StoreError::Validation(e)))
            .with_context(|| format!("Invalid feature on snapshot line {}", line))?;
        if storage::feature_exists(conn, &feature.name)? {
            return Err(eyre::eyre!(StoreError::DuplicateName {
                entity: Entity::Feature,
                name: feature.name,
            }));
        }
        storage::insert_feature(conn, &feature)?;
    }
    storage::ensure_default_feature(conn)?;

    for (line, record) in parsed.tasks {
        let task = record
            .into_task()
            .and_then(|t| t.validate().map(|_| t).map_err(StoreError::from))
            .map_err(|e| eyre::eyre!(e))
            .with_context(|| format!("Invalid task on snapshot line {}", line))?;
        if storage::task_exists(conn, &task.name)? {
            return Err(eyre::eyre!(StoreError::DuplicateName {
                entity: Entity::Task,
                name: task.name,
            }));
        }
        if !storage::feature_exists(conn, &task.feature_name)? {
            return Err(eyre::eyre!(StoreError::NotFound {
                entity: Entity::Feature,
                name: task.feature_name,
            }));
        }
        storage::insert_task(conn, &task)?;
    }

    for (line, dep) in parsed.dependencies {
        insert_dependency(conn, &dep.task_name, &dep.depends_on_task_name)
            .with_context(|| format!("Invalid dependency on snapshot line {}", line))?;
    }

    Ok(summary)
}

impl Store {
    /// Write a snapshot of the whole graph.
    pub fn export_snapshot<W: Write>(&self, mut out: W) -> Result<()> {
        let tx = self.storage().begin_read()?;
        write_snapshot(&tx, &mut out)
    }

    /// Snapshot of the whole graph as a string.
    pub fn export_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.export_snapshot(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Write a snapshot file, replacing `path` atomically.
    ///
    /// The snapshot is written to a uniquely named temp file next to `path`
    /// that is removed again if anything fails before the rename.
    pub fn export_to_path(&self, path: &Path) -> Result<()> {
        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
                parent
            }
            None => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        self.export_snapshot(BufWriter::new(tmp.as_file_mut()))?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!("Exported snapshot to {}", path.display());
        Ok(())
    }

    /// Import a snapshot. All records load in one transaction: either the
    /// whole snapshot lands or the store is unchanged.
    pub fn import_snapshot<R: BufRead>(&mut self, reader: R, mode: ImportMode) -> Result<ImportSummary> {
        let parsed = parse_snapshot(reader)?;

        let tx = self.storage_mut().begin_write()?;
        if mode == ImportMode::MergeIfAbsent && !storage::is_empty(&tx)? {
            return Err(snapshot_err(SnapshotError::DestinationNotEmpty));
        }
        let summary = load_snapshot(&tx, parsed)?;
        tx.commit().context("Failed to commit snapshot import")?;

        info!(
            "Imported snapshot: {} features, {} tasks, {} dependencies",
            summary.features, summary.tasks, summary.dependencies
        );
        self.after_commit();
        Ok(summary)
    }

    /// Import a snapshot file.
    pub fn import_from_path(&mut self, path: &Path, mode: ImportMode) -> Result<ImportSummary> {
        let file = fs::File::open(path).with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        self.import_snapshot(BufReader::new(file), mode)
    }
}
