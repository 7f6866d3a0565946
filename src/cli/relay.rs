//! Relays node output to the terminal.

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;

use crate::domain::models::{ClassifiedLine, ConsoleLine};

/// Which lines reach the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Every line
    All,
    /// Warnings, errors and anything written to stderr
    Noteworthy,
}

impl RelayMode {
    pub fn admits(self, line: &ConsoleLine) -> bool {
        self == Self::All || is_noteworthy(line)
    }
}

/// True for lines worth showing even when output is not relayed.
pub fn is_noteworthy(line: &ConsoleLine) -> bool {
    if line.is_error {
        return true;
    }
    match &line.classified {
        ClassifiedLine::Record(record) => {
            matches!(record.level.as_str(), "WARN" | "ERROR" | "FATAL")
        }
        ClassifiedLine::CausedBy { .. } => true,
        ClassifiedLine::StackFrame { .. } | ClassifiedLine::Unclassified { .. } => false,
    }
}

/// Renders one line with the node name as prefix.
pub fn render(line: &ConsoleLine) -> String {
    let node = style(format!("[{}]", line.node)).cyan();
    match &line.classified {
        ClassifiedLine::Record(record) => {
            let level = match record.level.as_str() {
                "ERROR" | "FATAL" => style(record.level.as_str()).red().bold(),
                "WARN" => style(record.level.as_str()).yellow(),
                "INFO" => style(record.level.as_str()).green(),
                _ => style(record.level.as_str()).dim(),
            };
            format!(
                "{node} {level:<5} {} {}",
                style(&record.section).dim(),
                record.message
            )
        }
        ClassifiedLine::CausedBy { exception, message } => format!(
            "{node} {} {}",
            style(format!("Caused by: {exception}:")).red(),
            message
        ),
        ClassifiedLine::StackFrame { frame } => {
            format!("{node}     {}", style(format!("at {frame}")).dim())
        }
        ClassifiedLine::Unclassified { raw } if line.is_error => {
            format!("{node} {}", style(raw).red())
        }
        ClassifiedLine::Unclassified { raw } => format!("{node} {raw}"),
    }
}

/// Prints lines from `lines` until every sender is gone. Returns how many
/// lines were printed.
///
/// While a spinner is active lines are printed above it.
pub async fn relay_console(
    mut lines: mpsc::Receiver<ConsoleLine>,
    mode: RelayMode,
    spinner: Option<ProgressBar>,
) -> usize {
    let mut printed = 0;
    while let Some(line) = lines.recv().await {
        if !mode.admits(&line) {
            continue;
        }
        let text = render(&line);
        match &spinner {
            Some(pb) if !pb.is_finished() => pb.suspend(|| eprintln!("{text}")),
            _ => eprintln!("{text}"),
        }
        printed += 1;
    }
    printed
}
