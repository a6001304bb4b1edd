//! `netq get` – fetch URLs as one group.

use anyhow::{bail, Result};
use netq_core::Dispatcher;
use std::io::Write;

use super::summary_line;

pub fn run_get(dispatcher: &Dispatcher, urls: Vec<String>, body: bool) -> Result<()> {
    let count = urls.len();
    let group = dispatcher.download_many(urls)?;
    group.start()?;
    group.wait();

    let jobs = group.jobs();
    if body {
        let mut out = std::io::stdout().lock();
        for job in &jobs {
            if let Some(r) = job.result() {
                out.write_all(&r.data)?;
            }
        }
        out.flush()?;
    } else {
        println!("{:<24} {:>10} {:>10}  {}", "STATUS", "BYTES", "TIME", "URL");
        for job in &jobs {
            println!("{}", summary_line(job));
        }
    }

    let failed = jobs
        .iter()
        .filter(|j| !j.result().map_or(false, |r| r.is_success()))
        .count();
    if failed > 0 {
        bail!("{} of {} fetches did not succeed", failed, count);
    }
    Ok(())
}
