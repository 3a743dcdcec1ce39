//! Engine configuration.
//!
//! Configuration is applied per engine context (one per thread) via
//! [`crate::configure`]. Changing the pooling level affects objects created
//! afterwards; live nodes keep the exemption they were created with.

/// Which object classes the engine recycles through its pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    /// Nothing is recycled; every vacated slot is retired.
    None,
    /// Settlement containers are recycled; promise nodes are not.
    Internal,
    /// Containers and promise nodes are recycled.
    #[default]
    All,
}

impl Pooling {
    /// Returns true if settlement containers are recycled.
    #[must_use]
    pub const fn recycles_containers(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true if promise nodes are recycled.
    #[must_use]
    pub const fn recycles_nodes(self) -> bool {
        matches!(self, Self::All)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    /// Pooling level for engine-internal objects.
    pub pooling: Pooling,
}

impl Config {
    /// Creates the default configuration (full pooling).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pooling level.
    #[must_use]
    pub const fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pools_everything() {
        let config = Config::new();
        assert_eq!(config.pooling, Pooling::All);
        assert!(config.pooling.recycles_containers());
        assert!(config.pooling.recycles_nodes());
    }

    #[test]
    fn pooling_levels_split_object_classes() {
        assert!(!Pooling::None.recycles_containers());
        assert!(!Pooling::None.recycles_nodes());
        assert!(Pooling::Internal.recycles_containers());
        assert!(!Pooling::Internal.recycles_nodes());
    }

    #[test]
    fn builder_overrides_pooling() {
        let config = Config::new().with_pooling(Pooling::Internal);
        assert_eq!(config.pooling, Pooling::Internal);
    }
}
