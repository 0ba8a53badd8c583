//! Implements the library configuration builder.

use std::path::{Path, PathBuf};

use crate::probe::*;

/// Structure that contains the different configuration options of a
/// [`Session`](crate::session::Session).
#[derive(Clone, Debug)]
pub struct Config {
    /// Tracer resources are reclaimed every this many completed instrumented calls.
    pub(crate) reclaim_interval: u64,
    /// Records per-call durations if set to `true`.
    pub(crate) timing: bool,
    /// Event granularity requested from the execution tracer.
    pub(crate) trace_events: TraceEvents,
    /// Upper bound on the length of a symbol name read from the runtime table.
    pub(crate) max_name_len: usize,
    /// Directory receiving memory dump files, dumps disabled if unset.
    pub(crate) dump_directory: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration builder initialized with the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

/// Configuration builder.
///
/// # Example
///
/// ```
/// use covfeed::config::Config;
///
/// let config = Config::builder()
///     .reclaim_interval(50)   // Reclaims tracer resources every 50 calls.
///     .timing(true)           // Records per-call durations.
///     .max_name_len(0x100)    // Caps symbol names at 0x100 bytes.
///     .build();
/// ```
pub struct ConfigBuilder {
    /// The inner configuration object.
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new configuration builder.
    fn new() -> Self {
        Self {
            config: Config {
                reclaim_interval: 100,
                timing: true,
                trace_events: TraceEvents::compile_only(),
                max_name_len: 0x200,
                dump_directory: None,
            },
        }
    }

    /// Returns the [`Config`] built with the current builder.
    pub fn build(self) -> Config {
        self.config
    }

    /// Sets the number of completed calls between two tracer reclamations. A value of 0 is
    /// treated as 1 (reclaim after every call).
    pub fn reclaim_interval(mut self, reclaim_interval: u64) -> Self {
        self.config.reclaim_interval = std::cmp::max(1, reclaim_interval);
        self
    }

    /// Enables per-call duration recording if set to `true`.
    pub fn timing(mut self, timing: bool) -> Self {
        self.config.timing = timing;
        self
    }

    /// Sets the event granularity requested from the execution tracer.
    pub fn trace_events(mut self, trace_events: TraceEvents) -> Self {
        self.config.trace_events = trace_events;
        self
    }

    /// Sets the upper bound on the length of a symbol name read from the runtime table.
    pub fn max_name_len(mut self, max_name_len: usize) -> Self {
        self.config.max_name_len = max_name_len;
        self
    }

    /// Sets the directory receiving memory dump files.
    pub fn dump_directory(mut self, dump_directory: impl AsRef<Path>) -> Self {
        self.config.dump_directory = Some(dump_directory.as_ref().to_owned());
        self
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.reclaim_interval, 100);
        assert!(config.timing);
        assert_eq!(config.trace_events, TraceEvents::compile_only());
        assert_eq!(config.max_name_len, 0x200);
        assert!(config.dump_directory.is_none());
    }

    #[test]
    fn config_zero_reclaim_interval_is_clamped() {
        let config = Config::builder().reclaim_interval(0).build();
        assert_eq!(config.reclaim_interval, 1);
    }
}
