use std::{
    fmt::Display,
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, TimeZone};
use itertools::Itertools;
use serde::Serialize;

use crate::types::RunResult;

pub const RECURSIVE_HEADER: &str = "=====recursive responses=====";
pub const FINAL_HEADER: &str = "======final response=====";

/// Renders a run as the exported markdown document.
pub fn assemble(result: &RunResult) -> String {
    let chunks = result
        .chunk_summaries
        .iter()
        .sorted_by_key(|s| s.chunk_id)
        .map(|s| s.content.as_str())
        .join("\n\n");

    let mut document = format!("{RECURSIVE_HEADER}\n\n{chunks}");
    if let Some(final_summary) = &result.final_summary {
        document.push_str(&format!("\n\n{FINAL_HEADER}\n\n{}", final_summary.content));
    }
    document
}

pub fn suggested_filename<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("summary_{}.md", at.format("%Y-%m-%d_%H-%M"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedArtifact {
    pub content: String,
    pub filename: String,
}

pub fn export<Tz>(result: &RunResult, at: &DateTime<Tz>) -> ExportedArtifact
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    ExportedArtifact {
        content: assemble(result),
        filename: suggested_filename(at),
    }
}

/// Destination for exported artifacts.
pub trait ArtifactSink {
    fn save(
        &self,
        artifact: &ExportedArtifact,
    ) -> impl Future<Output = anyhow::Result<PathBuf>> + Send;
}

/// Writes artifacts as files into one directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirectorySink {
    #[tracing::instrument(skip_all, fields(filename = %artifact.filename))]
    async fn save(&self, artifact: &ExportedArtifact) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.dir.join(&artifact.filename);
        tokio::fs::write(&path, artifact.content.as_bytes())
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to write artifact"))
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(path = %path.display(), "Saved summary");
        Ok(path)
    }
}
