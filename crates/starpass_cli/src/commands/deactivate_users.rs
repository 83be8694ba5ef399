//! Deactivate-users command implementation.

use super::{print_report, CommandResult, OutputFormat};
use starpass_client::HttpClient;
use starpass_protocol::RemoteId;
use starpass_sync::{BatchSynchronizer, CancellationToken, LookupResult};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

const USERS: &str = "/users";
const EMAIL_FILTER: &str = "user_email";

/// Reads one email address per line, skipping blanks and repeats.
pub fn read_emails(path: &Path) -> CommandResult<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let mut seen = HashSet::new();
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && seen.insert(line.to_ascii_lowercase()))
        .map(String::from)
        .collect())
}

/// Runs the deactivate-users command.
///
/// Ids are looked up by email first. With `dry_run` the found ids are listed
/// (and written to `ids_out`) but nothing is deleted.
pub fn run<C: HttpClient>(
    sync: &BatchSynchronizer<C>,
    emails_path: &Path,
    ids_out: Option<&Path>,
    dry_run: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CommandResult<()> {
    let emails = read_emails(emails_path)?;
    let cancel = CancellationToken::new();
    let lookups = sync.lookup_ids(USERS, EMAIL_FILTER, &emails, &cancel);

    let mut ids: Vec<RemoteId> = Vec::new();
    for lookup in &lookups {
        match &lookup.result {
            LookupResult::Found(id) => ids.push(id.clone()),
            LookupResult::NotFound => {
                warn!(email = %lookup.value, "no user with this email");
                writeln!(out, "not found: {}", lookup.value)?;
            }
            LookupResult::Failed(failure) => {
                writeln!(out, "lookup failed for {}: {failure}", lookup.value)?;
            }
            LookupResult::Cancelled => {
                writeln!(out, "lookup cancelled for {}", lookup.value)?;
            }
        }
    }
    info!(emails = emails.len(), found = ids.len(), "looked up users");

    if let Some(path) = ids_out {
        let mut listing = String::new();
        for id in &ids {
            listing.push_str(id.as_str());
            listing.push('\n');
        }
        fs::write(path, listing)?;
    }

    if dry_run {
        writeln!(out, "dry run: would deactivate {} user(s)", ids.len())?;
        for id in &ids {
            writeln!(out, "  DELETE {USERS}/{id}")?;
        }
        return Ok(());
    }

    let report = sync.delete(USERS, &ids, &cancel)?;
    print_report(out, &report, format)
}
