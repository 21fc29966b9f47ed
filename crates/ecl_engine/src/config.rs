//! Configuration for the changelog engine.

use ecl_protocol::control::oid;
use ecl_protocol::ChangelogSchema;
use std::collections::BTreeSet;
use std::time::Duration;

/// Engine-wide configuration shared by every search.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Changelog schema used to build change and root entries.
    pub schema: ChangelogSchema,
    /// Upper bound of one blocking pull.
    pub poll_interval: Duration,
    /// Private domains never exposed through the changelog.
    pub excluded_domains: BTreeSet<String>,
    /// Critical controls tolerated even though the engine ignores them.
    pub supported_controls: BTreeSet<String>,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            schema: ChangelogSchema::default(),
            poll_interval: Duration::from_millis(500),
            excluded_domains: ["cn=admin data", "cn=schema"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            supported_controls: [oid::SERVER_SIDE_SORT, oid::VLV]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Sets the changelog schema.
    pub fn with_schema(mut self, schema: ChangelogSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the pull bound.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Adds an excluded domain.
    pub fn with_excluded_domain(mut self, domain: impl Into<String>) -> Self {
        self.excluded_domains.insert(domain.into());
        self
    }

    /// Replaces the excluded domains.
    pub fn with_excluded_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a tolerated critical control.
    pub fn with_supported_control(mut self, control_oid: impl Into<String>) -> Self {
        self.supported_controls.insert(control_oid.into());
        self
    }

    /// Returns true if a critical control with this OID is tolerated.
    pub fn supports_control(&self, control_oid: &str) -> bool {
        self.supported_controls.contains(control_oid)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecl_protocol::Dn;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.supports_control(oid::VLV));
        assert!(config.supports_control(oid::SERVER_SIDE_SORT));
        assert!(!config.supports_control(oid::ASSERTION));
        assert!(config.excluded_domains.contains("cn=schema"));
        assert_eq!(config.schema.root_dn().to_string(), "cn=changelog");
    }

    #[test]
    fn builder() {
        let schema = ChangelogSchema::new(Dn::parse("cn=changes,o=test").unwrap());
        let config = EngineConfig::new()
            .with_schema(schema.clone())
            .with_poll_interval(Duration::from_millis(20))
            .with_excluded_domains(["o=private"])
            .with_supported_control("1.2.3.4");

        assert_eq!(config.schema, schema);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.excluded_domains.len(), 1);
        assert!(config.supports_control("1.2.3.4"));
    }
}
