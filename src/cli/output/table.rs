//! Table output formatting for CLI commands
//!
//! Renders node status snapshots with comfy-table.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::domain::models::NodeStatus;

/// Table formatter for node listings
pub struct NodeTable {
    use_colors: bool,
    max_width: Option<u16>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// One row per node, in index order.
    pub fn format(&self, nodes: &[NodeStatus]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Node").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
            Cell::new("Port").add_attribute(Attribute::Bold),
            Cell::new("Version").add_attribute(Attribute::Bold),
            Cell::new("PID").add_attribute(Attribute::Bold),
            Cell::new("Error").add_attribute(Attribute::Bold),
        ]);

        for node in nodes {
            let state = state_label(node);
            let state_cell = if self.use_colors {
                Cell::new(state).fg(state_color(node))
            } else {
                Cell::new(state)
            };
            table.add_row(vec![
                Cell::new(&node.name),
                state_cell,
                Cell::new(optional(node.port)),
                Cell::new(node.version.as_deref().unwrap_or("-")),
                Cell::new(optional(node.process_id.or(node.launcher_pid))),
                Cell::new(
                    node.last_error
                        .as_deref()
                        .map_or_else(|| "-".to_string(), |e| super::truncate(e, 60)),
                ),
            ]);
        }

        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn state_label(node: &NodeStatus) -> &'static str {
    match (node.started, node.last_error.is_some()) {
        (true, _) => "started",
        (false, true) => "failed",
        (false, false) => "starting",
    }
}

fn state_color(node: &NodeStatus) -> Color {
    match state_label(node) {
        "started" => Color::Green,
        "failed" => Color::Red,
        _ => Color::Yellow,
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str, started: bool, error: Option<&str>) -> NodeStatus {
        NodeStatus {
            name: name.to_string(),
            desired_port: Some(9200),
            port: started.then_some(9200),
            version: started.then(|| "2.11.0".to_string()),
            process_id: started.then_some(4242),
            launcher_pid: Some(4200),
            started,
            last_error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_format_nodes() {
        let table = NodeTable::with_config(false, Some(120));
        let rendered = table.format(&[
            status("it-node-1", true, None),
            status("it-node-2", false, Some("node it-node-2 did not report started")),
        ]);
        assert!(rendered.contains("it-node-1"));
        assert!(rendered.contains("started"));
        assert!(rendered.contains("4242"));
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("4200"));
    }

    #[test]
    fn test_state_label() {
        assert_eq!(state_label(&status("a", false, None)), "starting");
        assert_eq!(state_label(&status("a", true, Some("late"))), "started");
    }
}
