//! CLI command handlers.

mod config;
mod get;
mod post;

pub use config::run_config;
pub use get::run_get;
pub use post::run_post;

use netq_core::{Job, JobStatus};

/// clap value parser for `--field key=value`.
pub fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// One summary line per job: status, size, elapsed, URL.
fn summary_line(job: &Job) -> String {
    match job.result() {
        Some(r) => {
            let status = match (&r.status, &r.error) {
                (JobStatus::Failed, Some(e)) => format!("failed ({})", e),
                (status, _) => format!("{:?}", status).to_lowercase(),
            };
            format!(
                "{:<24} {:>10} {:>8}ms  {}",
                status,
                r.data.len(),
                r.elapsed.as_millis(),
                job.url()
            )
        }
        None => format!("{:<24} {:>10} {:>10}  {}", "pending", "-", "-", job.url()),
    }
}
