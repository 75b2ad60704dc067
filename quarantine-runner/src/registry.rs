// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The registration table of publishers a pipeline can be configured with.
//!
//! The enclosing system looks publishers up here by ID instead of discovering
//! them at runtime.

use std::fmt;

/// The ID of the publisher that produces quarantine data for each run.
pub const QUARANTINE_PUBLISHER_ID: &str = "quarantine";

/// The ID of the quarantine-aware JUnit result archiver.
///
/// Quarantine records are only shown for pipelines that configure this
/// publisher.
pub const QUARANTINABLE_JUNIT_PUBLISHER_ID: &str = "quarantinable-junit";

/// The ID of the plain JUnit result archiver.
pub const JUNIT_PUBLISHER_ID: &str = "junit";

/// What a publisher does with a run's test results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherRole {
    /// Produces per-run test data (here, quarantine records).
    TestDataProducer,

    /// Consumes test results and displays quarantine state.
    QuarantineConsumer,

    /// Consumes test results without knowledge of quarantine.
    PlainConsumer,
}

/// A registered publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublisherDescriptor {
    /// The ID used to refer to this publisher in configuration.
    pub id: &'static str,

    /// A human-readable name.
    pub display_name: &'static str,

    /// The path to this publisher's help page.
    pub help_path: Option<&'static str>,

    /// What this publisher does.
    pub role: PublisherRole,
}

impl PublisherDescriptor {
    /// Returns true if this publisher displays quarantine state.
    pub fn is_quarantine_consumer(&self) -> bool {
        self.role == PublisherRole::QuarantineConsumer
    }
}

impl fmt::Display for PublisherDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// All known publishers.
pub static PUBLISHERS: &[PublisherDescriptor] = &[
    PublisherDescriptor {
        id: QUARANTINE_PUBLISHER_ID,
        display_name: "Quarantine test data",
        help_path: Some("/plugin/quarantine/help.html"),
        role: PublisherRole::TestDataProducer,
    },
    PublisherDescriptor {
        id: QUARANTINABLE_JUNIT_PUBLISHER_ID,
        display_name: "Publish JUnit test result report (with quarantine)",
        help_path: None,
        role: PublisherRole::QuarantineConsumer,
    },
    PublisherDescriptor {
        id: JUNIT_PUBLISHER_ID,
        display_name: "Publish JUnit test result report",
        help_path: None,
        role: PublisherRole::PlainConsumer,
    },
];

/// Looks up a publisher by ID.
pub fn find_publisher(id: &str) -> Option<&'static PublisherDescriptor> {
    PUBLISHERS.iter().find(|descriptor| descriptor.id == id)
}

/// Returns the IDs of all known publishers.
pub fn known_publisher_ids() -> impl Iterator<Item = &'static str> {
    PUBLISHERS.iter().map(|descriptor| descriptor.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn publisher_ids_are_unique() {
        let ids: HashSet<_> = known_publisher_ids().collect();
        assert_eq!(ids.len(), PUBLISHERS.len());
    }

    #[test]
    fn exactly_one_quarantine_consumer() {
        let consumers: Vec<_> = PUBLISHERS
            .iter()
            .filter(|descriptor| descriptor.is_quarantine_consumer())
            .collect();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].id, QUARANTINABLE_JUNIT_PUBLISHER_ID);
    }

    #[test]
    fn find_publisher_by_id() {
        let descriptor = find_publisher(QUARANTINE_PUBLISHER_ID).expect("registered");
        assert_eq!(descriptor.help_path, Some("/plugin/quarantine/help.html"));
        assert!(find_publisher("xunit").is_none());
    }
}
