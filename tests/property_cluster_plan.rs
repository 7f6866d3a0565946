//! Property-based tests for node planning and log classification.

use std::collections::HashSet;

use proptest::prelude::*;

use ephemeral_cluster::domain::models::{ClassifiedLine, ClusterConfiguration, ClusterFileSystem};
use ephemeral_cluster::services::log_classifier::{classify, extract_port};
use ephemeral_cluster::services::plan_nodes;

proptest! {
    #[test]
    fn prop_planned_ports_are_contiguous_and_distinct(
        count in 1u16..=9,
        start in 1024u16..60_000,
    ) {
        let mut config = ClusterConfiguration::new("prop", count, start);
        config.transport_start_port = 61_000;
        prop_assume!(config.validate().is_ok());

        let nodes = plan_nodes(&config, &ClusterFileSystem::new("/tmp/prop"));
        prop_assert_eq!(nodes.len(), usize::from(count));

        let ports: Vec<u16> = nodes.iter().filter_map(|n| n.desired_port).collect();
        let expected: Vec<u16> = (0..count).map(|i| start + i).collect();
        prop_assert_eq!(&ports, &expected);

        let names: HashSet<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        prop_assert_eq!(names.len(), nodes.len());
        for node in &nodes {
            prop_assert_eq!(&node.peers, &nodes[0].peers);
        }
    }

    #[test]
    fn prop_classify_never_panics(line in ".*") {
        let _ = classify(&line);
    }

    #[test]
    fn prop_bound_port_is_extracted(port in any::<u16>(), node in "[a-z][a-z0-9-]{0,12}") {
        let line = format!(
            "[2024-01-01T00:00:01,000][INFO ][o.o.h.AbstractHttpServerTransport] [{node}] publish_address {{127.0.0.1:{port}}}, bound_addresses {{127.0.0.1:{port}}}"
        );
        let ClassifiedLine::Record(record) = classify(&line) else {
            return Err(TestCaseError::fail("expected a record"));
        };
        prop_assert!(record.is_port_announcement);
        prop_assert_eq!(extract_port(&record.section, &record.message), Some(port));
        prop_assert_eq!(record.node.as_deref(), Some(node.as_str()));
        prop_assert!(!record.is_started_confirmation);
    }
}
