//! `netq post` – submit a form and print the response.

use anyhow::{bail, Result};
use netq_core::{Dispatcher, FormData, Request};
use std::io::Write;

use super::summary_line;

pub fn run_post(dispatcher: &Dispatcher, url: String, fields: Vec<(String, String)>) -> Result<()> {
    let form: FormData = fields.into_iter().collect();
    tracing::debug!("posting to {}: {}", url, form);

    let job = dispatcher.download(Request::post(url, form))?;
    job.start()?;
    job.wait();

    match job.result() {
        Some(r) if r.is_success() => {
            let mut out = std::io::stdout().lock();
            out.write_all(&r.data)?;
            out.flush()?;
            Ok(())
        }
        _ => bail!("{}", summary_line(&job)),
    }
}
