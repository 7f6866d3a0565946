//! `classify`: runs server log lines through the classifier.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::cli::output::{output, CommandOutput};
use crate::cli::relay::render;
use crate::cli::types::ClassifyArgs;
use crate::domain::models::{ClassifiedLine, ConsoleLine};
use crate::services::log_classifier::{classify, extract_port, extract_version_and_pid};

/// What the classifier made of a log.
#[derive(Debug, Default, Serialize)]
pub struct ClassifyOutput {
    pub lines: usize,
    pub records: usize,
    pub caused_by: usize,
    pub stack_frames: usize,
    pub unclassified: usize,
    pub started_confirmations: usize,
    pub ports: Vec<u16>,
    pub version: Option<String>,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classified: Vec<ClassifiedLine>,
}

impl ClassifyOutput {
    fn add(&mut self, line: ClassifiedLine, keep: bool) {
        self.lines += 1;
        match &line {
            ClassifiedLine::Record(record) => {
                self.records += 1;
                if record.is_started_confirmation {
                    self.started_confirmations += 1;
                }
                if let Some(port) = extract_port(&record.section, &record.message) {
                    self.ports.push(port);
                }
                if self.version.is_none() {
                    if let Some(info) = extract_version_and_pid(&record.section, &record.message) {
                        self.version = Some(info.version);
                        self.pid = Some(info.pid);
                    }
                }
            }
            ClassifiedLine::CausedBy { .. } => self.caused_by += 1,
            ClassifiedLine::StackFrame { .. } => self.stack_frames += 1,
            ClassifiedLine::Unclassified { .. } => self.unclassified += 1,
        }
        if keep {
            self.classified.push(line);
        }
    }
}

impl CommandOutput for ClassifyOutput {
    fn to_human(&self) -> String {
        let mut out = String::new();
        for line in &self.classified {
            let node = line
                .record()
                .and_then(|r| r.node.clone())
                .unwrap_or_else(|| "-".to_string());
            let console_line = ConsoleLine {
                node,
                raw: String::new(),
                classified: line.clone(),
                is_error: false,
            };
            let _ = writeln!(out, "{}", render(&console_line));
        }
        let _ = writeln!(
            out,
            "{} lines: {} records, {} caused-by, {} stack frames, {} unclassified",
            self.lines, self.records, self.caused_by, self.stack_frames, self.unclassified
        );
        let _ = writeln!(out, "started confirmations: {}", self.started_confirmations);
        let ports = if self.ports.is_empty() {
            "-".to_string()
        } else {
            self.ports
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let _ = writeln!(out, "bound ports: {ports}");
        let _ = write!(
            out,
            "version: {} (pid {})",
            self.version.as_deref().unwrap_or("-"),
            self.pid.map_or_else(|| "-".to_string(), |p| p.to_string())
        );
        out
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Classifies every line of `reader`.
pub async fn summarize<R: AsyncRead + Unpin>(reader: R, keep_lines: bool) -> Result<ClassifyOutput> {
    let mut summary = ClassifyOutput::default();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("reading log input")? {
        summary.add(classify(&line), keep_lines);
    }
    Ok(summary)
}

pub async fn execute(args: ClassifyArgs, json_mode: bool) -> Result<()> {
    let summary = match &args.file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            summarize(file, args.verbose).await?
        }
        None => summarize(tokio::io::stdin(), args.verbose).await?,
    };
    output(&summary, json_mode);
    Ok(())
}
