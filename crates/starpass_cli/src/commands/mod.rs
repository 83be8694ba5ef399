//! CLI command implementations.
//!
//! Commands take the synchronizer and an output sink so they can run against
//! the in-memory service in tests.

pub mod deactivate_users;
pub mod pull;
pub mod push;
pub mod push_shifts;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use starpass_client::{ClientConfig, HttpClient, ReqwestClient, Transport};
use starpass_protocol::ApiRequest;
use starpass_sync::{BatchSynchronizer, SyncConfig, SyncFailure, SyncReport};
use std::io::Write;
use thiserror::Error;

/// Result type for commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Input problems detected before anything is sent.
#[derive(Debug, Error)]
pub enum InputError {
    /// The input file does not have the expected shape.
    #[error("{path}: {message}")]
    Malformed {
        /// Offending file.
        path: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One summary line plus failures.
    Text,
    /// The full report as JSON.
    Json,
}

/// Builds a synchronizer from the environment.
///
/// Runs start by probing `GET /users?per_page=1`, so a bad token or base URL
/// aborts before any record is processed.
pub fn connect() -> CommandResult<BatchSynchronizer<ReqwestClient>> {
    let config = ClientConfig::from_env()?;
    let client = ReqwestClient::new(&config.user_agent)?;
    let transport = Transport::new(config, client);
    let probe = ApiRequest::get("/users").with_query("per_page", "1");
    Ok(BatchSynchronizer::new(
        transport,
        SyncConfig::default().with_probe(probe),
    ))
}

/// Prints a report in the requested format.
pub fn print_report(
    out: &mut dyn Write,
    report: &SyncReport,
    format: OutputFormat,
) -> CommandResult<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, report)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "{}", report.summary())?;
            for (entry, failure) in report.failures() {
                match &entry.remote_id {
                    Some(id) => writeln!(out, "  #{} (id {id}): {failure}", entry.index)?,
                    None => writeln!(out, "  #{}: {failure}", entry.index)?,
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PlannedRequest<'a> {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Prints planned requests without sending them.
///
/// `note` adds a short description to each request, e.g. a shift count.
pub fn print_plan<C, F>(
    out: &mut dyn Write,
    sync: &BatchSynchronizer<C>,
    plans: &[Result<ApiRequest, SyncFailure>],
    format: OutputFormat,
    note: F,
) -> CommandResult<()>
where
    C: HttpClient,
    F: Fn(&ApiRequest) -> Option<String>,
{
    let base_url = sync.transport().base_url();
    let planned: Vec<PlannedRequest<'_>> = plans
        .iter()
        .enumerate()
        .map(|(index, plan)| match plan {
            Ok(request) => PlannedRequest {
                index,
                method: Some(request.method.as_str()),
                url: Some(request.url(base_url)),
                note: note(request),
                body: request.body.as_ref(),
                error: None,
            },
            Err(failure) => PlannedRequest {
                index,
                method: None,
                url: None,
                note: None,
                body: None,
                error: Some(failure.to_string()),
            },
        })
        .collect();

    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &planned)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "dry run: {} request(s) planned, nothing sent", planned.len())?;
            for plan in &planned {
                if let Some(error) = &plan.error {
                    writeln!(out, "  #{}: {error}", plan.index)?;
                    continue;
                }
                let method = plan.method.unwrap_or_default();
                let url = plan.url.as_deref().unwrap_or_default();
                match &plan.note {
                    Some(note) => writeln!(out, "  #{} {method} {url} ({note})", plan.index)?,
                    None => writeln!(out, "  #{} {method} {url}", plan.index)?,
                }
                if let Some(body) = plan.body {
                    writeln!(out, "    {body}")?;
                }
            }
        }
    }
    Ok(())
}
