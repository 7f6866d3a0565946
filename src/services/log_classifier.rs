//! Log line classifier
//!
//! Turns one raw line of server output into a [`ClassifiedLine`]. The primary
//! grammar is the server's console layout:
//!
//! ```text
//! [<date>][<LEVEL>][<section>] [<node-name>] <message>
//! ```
//!
//! Two secondary grammars (`Caused by:` lines and stack frames) only exist so
//! relayed output can be rendered nicely; readiness detection looks at
//! primary records exclusively. Nothing in here fails: lines that match no
//! grammar come back as [`ClassifiedLine::Unclassified`].

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::domain::models::{ClassifiedLine, ParsedLogRecord};

static CONSOLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(?P<date>[^\]]*)\]\[(?P<level>[^\]]*)\]\[(?P<section>[^\]]*)\](?: \[(?P<node>[^\]]*)\])?(?: (?P<message>.*))?$",
    )
    .expect("console line grammar is valid")
});

static CAUSED_BY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Caused by: (?P<exception>[^:\s]+)(?::\s?(?P<message>.*))?$")
        .expect("caused-by grammar is valid")
});

static STACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+at (?P<frame>\S.*)$").expect("stack frame grammar is valid")
});

static BOUND_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bound_address(?:es)? \{(?P<host>[^}]*):(?P<port>\d+)\}")
        .expect("bound address grammar is valid")
});

static VERSION_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"version\[(?P<version>[^\]]*)\][^,]*,\s*pid\[(?P<pid>\d+)\](?:,\s*build\[(?P<build>[^\]]*)\])?",
    )
    .expect("version grammar is valid")
});

/// Package prefixes the server prepends to logger names.
const SHORT_SECTION_PREFIXES: [&str; 2] = ["o.o.", "o.e."];
const LONG_SECTION_PREFIXES: [&str; 2] = ["org.opensearch.", "org.elasticsearch."];

/// Sections that announce node lifecycle events.
pub const NODE_SECTIONS: [&str; 1] = ["n.Node"];

/// Sections that announce the HTTP transport's bound address.
pub const HTTP_SECTIONS: [&str; 6] = [
    "h.AbstractHttpServerTransport",
    "h.n.Netty4HttpServerTransport",
    "h.HttpServer",
    "http.AbstractHttpServerTransport",
    "s.h.n.SecuritySSLNettyHttpServerTransport",
    "x.s.t.n.SecurityNetty4HttpServerTransport",
];

/// Diagnostics printed while a multi-node cluster is still electing.
pub const PEER_DISCOVERY_DIAGNOSTICS: [&str; 3] = [
    "not enough peers discovered during election",
    "not enough master nodes discovered during pinging",
    "not enough cluster-manager nodes discovered during pinging",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S,%3f";

/// Version details from the node's startup banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub pid: u32,
    pub build: Option<String>,
}

/// Classifies a single raw output line.
pub fn classify(line: &str) -> ClassifiedLine {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(record) = parse_record(line) {
        return ClassifiedLine::Record(record);
    }

    if let Some(caps) = CAUSED_BY.captures(line) {
        return ClassifiedLine::CausedBy {
            exception: caps["exception"].to_string(),
            message: caps
                .name("message")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        };
    }

    if let Some(caps) = STACK_FRAME.captures(line) {
        return ClassifiedLine::StackFrame {
            frame: caps["frame"].trim().to_string(),
        };
    }

    ClassifiedLine::Unclassified {
        raw: line.to_string(),
    }
}

/// Parses a line against the primary grammar only.
pub fn parse_record(line: &str) -> Option<ParsedLogRecord> {
    let caps = CONSOLE_LINE.captures(line)?;

    let date = caps["date"].trim().to_string();
    let section = normalize_section(caps["section"].trim());
    let message = caps
        .name("message")
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let node = caps
        .name("node")
        .map(|m| m.as_str().trim().to_string())
        .filter(|n| !n.is_empty());

    Some(ParsedLogRecord {
        timestamp: NaiveDateTime::parse_from_str(&date, TIMESTAMP_FORMAT).ok(),
        level: caps["level"].trim().to_string(),
        is_started_confirmation: is_started_confirmation(&section, &message),
        is_port_announcement: extract_port(&section, &message).is_some(),
        date,
        section,
        node,
        message,
    })
}

/// Brings a logger name into the abbreviated form the known sections use.
///
/// `o.o.h.n.Netty4HttpServerTransport` and
/// `org.opensearch.http.netty4.Netty4HttpServerTransport` both become
/// `h.n.Netty4HttpServerTransport`.
fn normalize_section(section: &str) -> String {
    if let Some(short) = SHORT_SECTION_PREFIXES
        .iter()
        .find_map(|prefix| section.strip_prefix(prefix))
    {
        return short.to_string();
    }
    let Some(long) = LONG_SECTION_PREFIXES
        .iter()
        .find_map(|prefix| section.strip_prefix(prefix))
    else {
        return section.to_string();
    };
    match long.rsplit_once('.') {
        Some((packages, class)) => {
            let mut out: String = packages
                .split('.')
                .filter_map(|package| package.chars().next())
                .flat_map(|initial| [initial, '.'])
                .collect();
            out.push_str(class);
            out
        }
        None => long.to_string(),
    }
}

fn in_node_section(section: &str) -> bool {
    NODE_SECTIONS.contains(&section)
}

/// True when the record is the node's own "started" announcement.
pub fn is_started_confirmation(section: &str, message: &str) -> bool {
    in_node_section(section) && matches!(message, "started" | "started...")
}

/// Port of the first bound address announced by an HTTP transport section.
pub fn extract_port(section: &str, message: &str) -> Option<u16> {
    if !HTTP_SECTIONS.contains(&section) || message.trim().is_empty() {
        return None;
    }
    let caps = BOUND_ADDRESS.captures(message)?;
    caps["port"].parse().ok()
}

/// Version, pid and build from the node section's startup banner.
pub fn extract_version_and_pid(section: &str, message: &str) -> Option<VersionInfo> {
    if !in_node_section(section) {
        return None;
    }
    let caps = VERSION_INFO.captures(message)?;
    Some(VersionInfo {
        version: caps["version"].trim().to_string(),
        pid: caps["pid"].parse().ok()?,
        build: caps.name("build").map(|b| b.as_str().trim().to_string()),
    })
}

/// True for the election diagnostic the assumed-started policy accepts.
pub fn is_peer_discovery_diagnostic(message: &str) -> bool {
    PEER_DISCOVERY_DIAGNOSTICS
        .iter()
        .any(|diagnostic| message.contains(diagnostic))
}
