//! Pull command implementation.

use super::{CommandResult, OutputFormat};
use serde::Serialize;
use starpass_client::HttpClient;
use starpass_protocol::{FieldMap, LocalRecord};
use starpass_sync::{BatchSynchronizer, CancellationToken, SyncReport};
use std::io::Write;

#[derive(Serialize)]
struct PullOutput<'a> {
    report: &'a SyncReport,
    records: &'a [LocalRecord],
}

/// Parses a `key=value` filter argument.
pub fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

/// Runs the pull command.
pub fn run<C: HttpClient>(
    sync: &BatchSynchronizer<C>,
    collection: &str,
    filters: &[(String, String)],
    format: OutputFormat,
    out: &mut dyn Write,
) -> CommandResult<()> {
    let map = FieldMap::new(collection);
    let report = sync.pull(&map, filters, &[], &CancellationToken::new())?;

    match format {
        OutputFormat::Json => {
            let document = PullOutput {
                report: &report,
                records: report.pulled(),
            };
            serde_json::to_writer_pretty(&mut *out, &document)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{}", report.summary())?;
            for record in report.pulled() {
                let id = record.remote_id.as_ref().map_or("-", |id| id.as_str());
                writeln!(out, "{id}\t{}", serde_json::Value::Object(record.fields.clone()))?;
            }
            for (_, failure) in report.failures() {
                writeln!(out, "  pull stopped: {failure}")?;
            }
        }
    }
    Ok(())
}
