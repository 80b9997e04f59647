//! Acquiring the requested (instance, patch) pairs.
//!
//! Requests arrive either as a JSON document (a local path or a URL)
//! containing `{instance_id, patch}` records, or interactively as a
//! list of instance ids with one patch path/URL each. A malformed
//! request document aborts the run; an unreachable patch body only
//! skips its instance, with a warning.

use std::io::{BufRead, Write, stdin, stdout};
use std::path::Path;

use color_eyre::{Result, eyre::Context};
use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};

/// One requested (instance, patch) pair. The patch is the full diff
/// text, never a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub instance_id: String,
    pub patch: String,
}

/// A record in a request document. `patch` may be null for instances
/// the submitter produced no candidate for; those are skipped.
#[derive(Debug, Deserialize)]
struct RequestRecord {
    instance_id: String,
    #[serde(default)]
    patch: Option<String>,
}

/// Load submissions from a request document at a local path or URL.
#[tracing::instrument]
pub fn from_document(location: &str) -> Result<Vec<Submission>> {
    let content = fetch_text(location)
        .with_context(|| format!("read request document {location:?}"))?;
    let records: Vec<RequestRecord> = serde_json::from_str(&content)
        .with_context(|| format!("parse request document {location:?}"))?;

    let mut submissions = Vec::new();
    for record in records {
        match record.patch {
            Some(patch) => submissions.push(Submission {
                instance_id: record.instance_id,
                patch,
            }),
            None => {
                tracing::warn!(instance_id = %record.instance_id, "no patch in request; skipping");
            }
        }
    }
    Ok(submissions)
}

/// Prompt for instance ids and one patch location each on stdin.
pub fn interactive() -> Result<Vec<Submission>> {
    let mut input = stdin().lock();
    print!("Enter instance ids separated by space: ");
    stdout().flush().context("flush prompt")?;

    let mut line = String::new();
    input.read_line(&mut line).context("read instance ids")?;
    let instance_ids: Vec<String> = line.split_whitespace().map(str::to_string).collect();

    let mut located = Vec::new();
    for instance_id in instance_ids {
        print!("Enter patch file or URL for {instance_id}: ");
        stdout().flush().context("flush prompt")?;
        let mut location = String::new();
        input.read_line(&mut location).context("read patch location")?;
        located.push((instance_id, location.trim().to_string()));
    }

    Ok(resolve_patches(located))
}

/// Resolve patch locations to patch bodies, skipping pairs whose body
/// cannot be fetched. Per-identifier isolation: one bad location never
/// aborts the run.
pub fn resolve_patches(located: Vec<(String, String)>) -> Vec<Submission> {
    let mut submissions = Vec::new();
    for (instance_id, location) in located {
        match fetch_text(&location) {
            Ok(patch) => submissions.push(Submission { instance_id, patch }),
            Err(report) => {
                tracing::warn!(%instance_id, %location, "failed to fetch patch; skipping");
                println!(
                    "  {} could not fetch patch for {}: {report:#}",
                    "!".yellow(),
                    instance_id.bold()
                );
            }
        }
    }
    submissions
}

/// Read a text body from a local path, or over HTTP when no such file
/// exists.
fn fetch_text(location: &str) -> Result<String> {
    if Path::new(location).exists() {
        return std::fs::read_to_string(location)
            .with_context(|| format!("read file {location:?}"));
    }
    let response = reqwest::blocking::get(location)
        .with_context(|| format!("fetch {location:?}"))?
        .error_for_status()
        .with_context(|| format!("fetch {location:?}"))?;
    response.text().with_context(|| format!("read body of {location:?}"))
}
