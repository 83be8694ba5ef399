//! Push command implementation.

use super::{print_plan, print_report, CommandResult, InputError, OutputFormat};
use serde_json::Value;
use starpass_client::HttpClient;
use starpass_protocol::{FieldMap, LocalRecord};
use starpass_sync::{BatchSynchronizer, CancellationToken};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// Reads a JSON array of objects. An `id` field becomes the remote id.
pub fn read_records(path: &Path) -> CommandResult<Vec<LocalRecord>> {
    let malformed = |message: String| InputError::Malformed {
        path: path.display().to_string(),
        message,
    };

    let value: Value = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let Value::Array(items) = value else {
        return Err(malformed("expected a JSON array of objects".into()).into());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            LocalRecord::from_value(item).map_err(|e| -> Box<dyn std::error::Error> {
                malformed(format!("element {index}: {e}")).into()
            })
        })
        .collect()
}

/// Runs the push command.
pub fn run<C: HttpClient>(
    sync: &BatchSynchronizer<C>,
    collection: &str,
    input: &Path,
    dry_run: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CommandResult<()> {
    let records = read_records(input)?;
    let map = FieldMap::new(collection);

    if dry_run {
        let plans = sync.plan(&records, &map);
        return print_plan(out, sync, &plans, format, |_| None);
    }

    let report = sync.push(&records, &map, &CancellationToken::new())?;
    print_report(out, &report, format)
}
