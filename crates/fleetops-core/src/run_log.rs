//! Plain-text run log artifacts.
//!
//! A log file summarises one workflow run: a header with the run's
//! identity and outcome, then each job and its numbered steps.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::gateway::{RunConclusion, WorkflowRun};

const WIDTH: usize = 80;

fn conclusion_str(conclusion: Option<RunConclusion>) -> &'static str {
    conclusion.map_or("None", RunConclusion::as_str)
}

/// Render the log text for `run`.
pub fn render(service: &str, run: &WorkflowRun) -> String {
    let heavy = "=".repeat(WIDTH);
    let light = "-".repeat(WIDTH);
    let mut out = String::new();

    out.push_str(&format!("Workflow Logs for {service}\n"));
    out.push_str(&format!("{heavy}\n"));
    out.push_str(&format!("Repository: {}\n", run.repository));
    out.push_str(&format!("Run ID: {}\n", run.run_id));
    out.push_str(&format!("Status: {}\n", run.status));
    out.push_str(&format!("Conclusion: {}\n", conclusion_str(run.conclusion)));
    out.push_str(&format!("URL: {}\n", run.url));
    out.push_str(&format!("{heavy}\n\n"));

    for job in &run.jobs {
        out.push_str(&format!("\n{heavy}\n"));
        out.push_str(&format!("Job: {}\n", job.name));
        out.push_str(&format!("{heavy}\n"));
        out.push_str(&format!("Status: {}\n", job.status));
        out.push_str(&format!("Conclusion: {}\n\n", conclusion_str(job.conclusion)));
        out.push_str("Steps:\n");
        out.push_str(&format!("{light}\n"));
        for (i, step) in job.steps.iter().enumerate() {
            out.push_str(&format!("\n{}. {}\n", i + 1, step.name));
            out.push_str(&format!("   Status: {}\n", step.status));
            out.push_str(&format!("   Conclusion: {}\n", conclusion_str(step.conclusion)));
        }
    }
    out
}

/// `<service>_<run_id>_<YYYYmmdd_HHMMSS>` without extension.
pub fn file_stem(service: &str, run_id: u64, at: DateTime<Local>) -> String {
    format!("{service}_{run_id}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Write `content` to a new file in `dir`, never replacing an existing
/// one: on a name clash `_1`, `_2`, … is appended to the stem.
pub async fn write_unique(dir: &Path, stem: &str, content: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("{stem}.log")
        } else {
            format!("{stem}_{attempt}.log")
        };
        let path = dir.join(name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
