//! Built-in lifecycle tasks
//!
//! Concrete [`ClusterTask`](crate::domain::ports::ClusterTask)s for preparing
//! the ephemeral filesystem, checking the host before launch, validating a
//! running cluster and cleaning up afterwards.

pub mod directories;
pub mod preflight;
pub mod validation;

pub use directories::{CreateNodeDirectories, RemoveEphemeralDirectories};
pub use preflight::{EnsurePortsAvailable, VerifyLaunchBinary};
pub use validation::{ValidateDistinctPorts, ValidateRunningVersion};

use crate::domain::errors::Phase;
use crate::domain::models::ClusterConfiguration;
use crate::services::TaskRegistry;

/// The task lists every cluster gets unless the caller replaces them.
pub fn default_registry(config: &ClusterConfiguration) -> TaskRegistry {
    let mut registry = TaskRegistry::new()
        .with(Phase::Install, CreateNodeDirectories)
        .with(Phase::Install, VerifyLaunchBinary)
        .with(Phase::BeforeStart, EnsurePortsAvailable)
        .with(Phase::AfterStart, ValidateDistinctPorts)
        .with(Phase::Teardown, RemoveEphemeralDirectories);

    if config.version.is_some() {
        registry = registry.with(Phase::AfterStart, ValidateRunningVersion);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order() {
        let registry = default_registry(&ClusterConfiguration::default());
        assert_eq!(
            registry.names(Phase::Install),
            vec!["create-node-directories", "verify-launch-binary"]
        );
        assert_eq!(registry.names(Phase::BeforeStart), vec!["ensure-ports-available"]);
        assert_eq!(registry.names(Phase::AfterStart), vec!["validate-distinct-ports"]);
        assert_eq!(
            registry.names(Phase::Teardown),
            vec!["remove-ephemeral-directories"]
        );
    }

    #[test]
    fn test_version_check_only_when_configured() {
        let config = ClusterConfiguration {
            version: Some("2.11.0".to_string()),
            ..ClusterConfiguration::default()
        };
        assert_eq!(
            default_registry(&config).names(Phase::AfterStart),
            vec!["validate-distinct-ports", "validate-running-version"]
        );
    }
}
