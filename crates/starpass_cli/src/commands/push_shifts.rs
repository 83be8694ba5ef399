//! Push-shifts command implementation.

use super::{print_plan, print_report, CommandResult, InputError, OutputFormat};
use starpass_client::HttpClient;
use starpass_protocol::shifts::{ShiftLayout, ShiftRow};
use starpass_protocol::{plan_shift_batches, ApiRequest, BodySchema, Fields, LocalRecord};
use starpass_sync::{BatchSynchronizer, CancellationToken};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Inputs of one push-shifts run.
#[derive(Debug, Clone, Default)]
pub struct ShiftPush {
    /// CSV file with one shift per row.
    pub input: PathBuf,
    /// Column layout of the CSV.
    pub layout: ShiftLayout,
    /// Schema each per-need body must satisfy.
    pub schema: Option<BodySchema>,
    /// Where to write the grouped payload as JSON.
    pub output: Option<PathBuf>,
    /// Plan only.
    pub dry_run: bool,
}

/// Reads the shift layout from the environment.
///
/// Unset variables keep the default column names. `DROP_COLUMNS` and
/// `KEEP_COLUMNS` are comma separated.
pub fn layout_from_env() -> ShiftLayout {
    layout_from(|name| std::env::var(name).ok())
}

fn layout_from(var: impl Fn(&str) -> Option<String>) -> ShiftLayout {
    let set = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let list = |name: &str| {
        set(name).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        })
    };

    let mut layout = ShiftLayout::default();
    if let Some(column) = set("GROUP_BY_COLUMN") {
        layout.group_by = column;
    }
    if let Some(column) = set("START_DATE_COLUMN") {
        layout.start_date = column;
    }
    if let Some(column) = set("START_TIME_COLUMN") {
        layout.start_time = column;
    }
    if let Some(column) = set("START_COLUMN") {
        layout.start = column;
    }
    if let Some(key) = set("SHIFTS_DICT_KEY_NAME") {
        layout.shifts_key = key;
    }
    if let Some(columns) = list("DROP_COLUMNS") {
        layout = layout.with_drop_columns(columns);
    }
    if let Some(columns) = list("KEEP_COLUMNS") {
        layout = layout.with_keep_columns(columns);
    }
    layout
}

/// Path of the shift schema named by `JSON_SCHEMA_DIR` and
/// `JSON_SCHEMA_SHIFT_FILE`, if the file variable is set.
pub fn schema_path_from_env() -> Option<PathBuf> {
    schema_path_from(|name| std::env::var(name).ok())
}

fn schema_path_from(var: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let file = var("JSON_SCHEMA_SHIFT_FILE").filter(|v| !v.trim().is_empty())?;
    let file = file.trim();
    match var("JSON_SCHEMA_DIR").filter(|v| !v.trim().is_empty()) {
        Some(dir) => Some(Path::new(dir.trim()).join(file)),
        None => Some(PathBuf::from(file)),
    }
}

/// Loads and compiles a JSON Schema file.
pub fn load_schema(path: &Path) -> CommandResult<BodySchema> {
    let text = fs::read_to_string(path)?;
    let schema = BodySchema::from_json(&text).map_err(|e| InputError::Malformed {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(schema)
}

/// Writes the grouped payload as a JSON array, one object per need.
pub fn write_payload(path: &Path, batches: &[LocalRecord]) -> CommandResult<()> {
    let payload: Vec<&Fields> = batches.iter().map(|batch| &batch.fields).collect();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &payload)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Reads shift rows from a CSV file with a header row.
pub fn read_rows(path: &Path) -> CommandResult<Vec<ShiftRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<ShiftRow>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Runs the push-shifts command.
///
/// Bodies failing the schema are reported as validation failures and never
/// sent; the other needs still go out.
pub fn run<C: HttpClient>(
    sync: &BatchSynchronizer<C>,
    push: &ShiftPush,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CommandResult<()> {
    let layout = &push.layout;
    let rows = read_rows(&push.input)?;
    let batches = plan_shift_batches(&rows, layout)?;
    let mut map = layout.field_map();
    if let Some(schema) = &push.schema {
        map = map.with_schema(schema.clone());
    }
    info!(rows = rows.len(), needs = batches.len(), "planned shift batches");

    if let Some(path) = &push.output {
        write_payload(path, &batches)?;
        info!(path = %path.display(), "wrote shift payload");
    }

    if push.dry_run {
        let plans = sync.plan(&batches, &map);
        return print_plan(out, sync, &plans, format, |request| {
            shift_count(request, &layout.shifts_key).map(|n| format!("{n} shifts"))
        });
    }

    let report = sync.push(&batches, &map, &CancellationToken::new())?;
    print_report(out, &report, format)
}

fn shift_count(request: &ApiRequest, shifts_key: &str) -> Option<usize> {
    request
        .body
        .as_ref()?
        .get(shifts_key)?
        .as_array()
        .map(Vec::len)
}
