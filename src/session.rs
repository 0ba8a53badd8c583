//! The control facade tying registry, feed and symbol resolution together.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::*;
use crate::error::*;
use crate::feed::*;
use crate::gosym::*;
use crate::memdump::*;
use crate::memory::*;
use crate::probe::*;
use crate::targets::*;

/// One coverage-collection session over one instrumented process.
///
/// A `Session` owns every piece of mutable state the library keeps: the target registry, the
/// coverage feed and the symbol table cache. It is the in-process contract a remote control
/// channel is expected to forward verbatim; the method names mirror the operations a harness
/// calls over that channel:
///
/// | Remote operation    | Method                                 |
/// |---------------------|----------------------------------------|
/// | `setTarget`         | [`Session::set_target`]                |
/// | `setTargets`        | [`Session::set_targets`]               |
/// | `startCoverageFeed` | [`Session::start_coverage_feed`]       |
/// | `stopCoverageFeed`  | [`Session::stop_coverage_feed`]        |
/// | `getCoverage`       | [`Session::get_coverage`]              |
/// | `clearCoverage`     | [`Session::clear_coverage`]            |
/// | `getExecTime`       | [`Session::get_exec_time`]             |
///
/// Only [`Session::start_coverage_feed`] can fail in a way the caller must treat as fatal (a
/// probe could not be placed); every other operation reports misses and validation failures as
/// data, keeping the control surface exception-free.
///
/// # Example
///
/// ```no_run
/// use covfeed::config::Config;
/// use covfeed::session::Session;
/// use covfeed::targets::TargetSpec;
///
/// # fn demo<M, P>(mem: M, engine: P) -> covfeed::error::Result<()>
/// # where M: covfeed::memory::ProcessMemory, P: covfeed::probe::Instrumentation + 'static {
/// let mut session = Session::new(Config::default(), mem, engine);
/// session.set_target(&TargetSpec::new("libtarget", "0x1000"));
/// session.start_coverage_feed()?;
/// // ... the harness sends an input to the target process ...
/// for event in session.get_coverage() {
///     println!("{}: {} block(s)", event.module, event.blocks.len());
/// }
/// session.clear_coverage();
/// session.stop_coverage_feed();
/// # Ok(())
/// # }
/// ```
pub struct Session<M: ProcessMemory, P: Instrumentation + 'static> {
    /// Session configuration.
    config: Config,
    /// View on the target process's memory.
    mem: M,
    /// Registered coverage targets.
    registry: TargetRegistry,
    /// The coverage feed controller.
    feed: CoverageFeed<P>,
    /// Cached runtime symbol table.
    symbols: SymbolTable,
}

impl<M: ProcessMemory, P: Instrumentation + 'static> Session<M, P> {
    /// Creates a new session over `mem` and `engine`.
    pub fn new(config: Config, mem: M, engine: P) -> Self {
        let feed = CoverageFeed::new(engine, &config);
        let symbols = SymbolTable::new(config.max_name_len);
        Self {
            config,
            mem,
            registry: TargetRegistry::new(),
            feed,
            symbols,
        }
    }

    // -------------------------------------------------------------------------------------------
    // Session - Target registration

    /// Registers a single coverage target. Returns `false` on a malformed spec.
    pub fn set_target(&mut self, spec: &TargetSpec) -> bool {
        self.registry.set_target(&self.mem, spec)
    }

    /// Registers a batch of coverage targets. Returns `false` on an empty or malformed batch;
    /// specs that fail to resolve are skipped. Registration is additive.
    pub fn set_targets(&mut self, specs: &[TargetSpec]) -> bool {
        self.registry.set_targets(&self.mem, specs)
    }

    /// Drops every registered target. Attached probes stay attached until
    /// [`Session::stop_coverage_feed`].
    pub fn clear_targets(&mut self) {
        self.registry.clear();
    }

    /// Returns the registered targets in registration order.
    pub fn targets(&self) -> &[TargetDescriptor] {
        self.registry.targets()
    }

    // -------------------------------------------------------------------------------------------
    // Session - Coverage feed

    /// Attaches probes to every registered target and arms the feed. Fatal if any probe can't
    /// be placed; no partial attachment survives a failure.
    pub fn start_coverage_feed(&mut self) -> Result<()> {
        let targets = self.registry.targets().to_vec();
        self.feed.start(&targets)
    }

    /// Detaches every probe, flushing and reclaiming tracer resources. Idempotent.
    pub fn stop_coverage_feed(&mut self) {
        self.feed.stop();
    }

    /// Non-destructive snapshot of the collected coverage events.
    pub fn get_coverage(&self) -> Vec<CoverageEvent> {
        self.feed.coverage()
    }

    /// Collected coverage flattened to one row per block.
    pub fn get_coverage_blocks(&self) -> Vec<CoverageBlock> {
        self.feed.coverage_blocks()
    }

    /// Empties the coverage buffer.
    pub fn clear_coverage(&self) {
        self.feed.clear();
    }

    /// One-shot read of the last completed call's duration.
    pub fn get_exec_time(&self) -> Option<Duration> {
        self.feed.exec_time()
    }

    // -------------------------------------------------------------------------------------------
    // Session - Symbol resolution

    /// Resolves a function name to an address through the runtime symbol table. `Ok(None)`
    /// covers both "no table in this process" and "name not found".
    pub fn find_symbol(&mut self, name: &str) -> Result<Option<u64>> {
        self.symbols.find_by_name(&self.mem, name)
    }

    /// Returns every runtime symbol whose name matches the regular expression `pattern`.
    pub fn find_symbols(&mut self, pattern: &str) -> Result<Vec<SymbolRecord>> {
        self.symbols.find_by_pattern(&self.mem, pattern)
    }

    // -------------------------------------------------------------------------------------------
    // Session - Diagnostics

    /// Dumps the readable memory of `module` into the configured dump directory and returns
    /// the dump file's path. Fails if no dump directory is configured.
    pub fn dump_module(&self, module: &str) -> Result<PathBuf> {
        let directory = self.config.dump_directory.as_ref().ok_or_else(|| {
            Error::Dump(DumpError::MissingDirectory("<unset>".to_string()))
        })?;
        MemoryDumper::new(directory)?.dump_module(&self.mem, module)
    }

    /// Returns the process-memory capability backing the session.
    pub fn memory(&self) -> &M {
        &self.mem
    }
}
