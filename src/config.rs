//! Table and pool configuration.

/// Default occupancy ratio at which a table grows.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.8;

/// Default capacity multiplier applied on growth.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.2;

/// Configuration for a [`Table`](crate::Table) or [`Set`](crate::Set).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableConfig {
    /// Initial number of slots.
    pub capacity: usize,
    /// Growth triggers once `len >= capacity * load_factor` before an insert.
    pub load_factor: f64,
    /// New capacity is `max(capacity + 1, capacity * growth_factor)`.
    pub growth_factor: f64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl TableConfig {
    /// Set the initial slot count.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the load factor.
    pub fn load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor;
        self
    }

    /// Set the growth factor.
    pub fn growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// # Panics
    /// Panics if `load_factor` is outside `(0, 1]` or `growth_factor <= 1`.
    pub(crate) fn validate(&self) {
        assert!(
            self.load_factor > 0.0 && self.load_factor <= 1.0,
            "load factor must be in (0, 1], got {}",
            self.load_factor
        );
        assert!(
            self.growth_factor > 1.0,
            "growth factor must be > 1, got {}",
            self.growth_factor
        );
    }

    /// Capacity reached by one growth step from `capacity`.
    pub(crate) fn grown(&self, capacity: usize) -> usize {
        let scaled = (capacity as f64 * self.growth_factor) as usize;
        scaled.max(capacity + 1)
    }

    /// Smallest capacity that holds `n` entries without triggering growth.
    pub(crate) fn capacity_for(&self, n: usize) -> usize {
        ((n as f64 / self.load_factor).ceil() as usize).max(n)
    }
}

/// Configuration for a [`ThreadPool`](crate::ThreadPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub threads: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { threads }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_adds_at_least_one_slot() {
        let config = TableConfig::default();
        assert_eq!(config.grown(0), 1);
        assert_eq!(config.grown(1), 2);
        assert_eq!(config.grown(4), 5);
        assert_eq!(config.grown(10), 12);
        assert_eq!(config.grown(100), 120);
    }

    #[test]
    fn test_capacity_for_respects_load_factor() {
        let config = TableConfig::default();
        assert_eq!(config.capacity_for(0), 0);
        assert_eq!(config.capacity_for(8), 10);
        assert!(config.capacity_for(100) >= 125);
    }

    #[test]
    #[should_panic(expected = "load factor")]
    fn test_rejects_zero_load_factor() {
        TableConfig::default().load_factor(0.0).validate();
    }

    #[test]
    fn test_pool_default_has_threads() {
        assert!(PoolConfig::default().threads >= 1);
    }
}
