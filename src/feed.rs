//! The coverage feed controller: probe lifecycle, trace sessions and event buffering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::*;
use crate::error::*;
use crate::probe::*;
use crate::targets::*;

// -----------------------------------------------------------------------------------------------
// Feed - Events
// -----------------------------------------------------------------------------------------------

/// One batch of basic blocks collected during an instrumented call.
///
/// Block order inside a batch reflects the order the engine translated them, which is not
/// necessarily execution order for blocks the engine reuses across calls.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct CoverageEvent {
    /// Module of the target function whose probe produced the batch.
    pub module: String,
    /// Translated blocks, in translation order.
    pub blocks: Vec<BlockRecord>,
}

impl CoverageEvent {
    /// Flattens the event into one row per block, the shape a harness typically reduces the
    /// feed to.
    pub fn flatten(&self) -> Vec<CoverageBlock> {
        self.blocks
            .iter()
            .map(|block| CoverageBlock {
                module: self.module.clone(),
                start: block.start,
                end: block.end,
            })
            .collect()
    }
}

/// One basic block attributed to a module.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct CoverageBlock {
    /// Module of the target function whose probe recorded the block.
    pub module: String,
    /// Address of the block's first instruction.
    pub start: u64,
    /// Address past the block's last instruction.
    pub end: u64,
}

// -----------------------------------------------------------------------------------------------
// Feed - Shared state
// -----------------------------------------------------------------------------------------------

/// State shared between the control thread and the engine's callback threads.
struct FeedShared {
    /// Collected events, appended by block sinks and drained by the caller.
    buffer: Mutex<Vec<CoverageEvent>>,
    /// Live trace sessions, one per thread currently inside an instrumented call.
    sessions: Mutex<HashMap<ThreadId, Instant>>,
    /// Duration of the last completed call, consumed by the one-shot read.
    last_exec: Mutex<Option<Duration>>,
    /// Number of instrumented calls completed since the feed was created.
    calls: AtomicU64,
}

impl FeedShared {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            last_exec: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }
}

/// Appends the batches delivered for one target to the shared buffer.
struct BufferSink {
    /// Module of the target function.
    module: String,
    /// Shared feed state.
    shared: Arc<FeedShared>,
}

impl BlockSink for BufferSink {
    fn on_blocks(&self, blocks: Vec<BlockRecord>) {
        if blocks.is_empty() {
            return;
        }
        let mut buffer = self.shared.buffer.lock().unwrap();
        buffer.push(CoverageEvent {
            module: self.module.clone(),
            blocks,
        });
    }
}

/// Entry/exit callbacks of one target's probe.
struct TargetListener {
    /// Module of the target function.
    module: String,
    /// Engine driving the probe, needed to start and stop tracing from the callbacks.
    engine: Arc<dyn Instrumentation>,
    /// Shared feed state.
    shared: Arc<FeedShared>,
    /// Event granularity requested when following a thread.
    events: TraceEvents,
    /// Tracer resources are reclaimed every this many completed calls.
    reclaim_interval: u64,
    /// Whether call durations are recorded.
    timing: bool,
}

impl ProbeListener for TargetListener {
    fn on_enter(&self, thread: ThreadId) {
        {
            let mut sessions = self.shared.sessions.lock().unwrap();
            if sessions.contains_key(&thread) {
                // Reentrant call: the outer session stays authoritative, the nested entry is
                // dropped so its matching exit doesn't tear the outer trace down early.
                log::warn!("ignoring reentrant call on thread {}", thread);
                return;
            }
            sessions.insert(thread, Instant::now());
        }
        let sink = Arc::new(BufferSink {
            module: self.module.clone(),
            shared: self.shared.clone(),
        });
        if let Err(e) = self.engine.follow(thread, self.events, sink) {
            log::warn!("could not follow thread {}: {}", thread, e);
            self.shared.sessions.lock().unwrap().remove(&thread);
        }
    }

    fn on_leave(&self, thread: ThreadId) {
        let started = self.shared.sessions.lock().unwrap().remove(&thread);
        let started = match started {
            Some(started) => started,
            None => {
                // Exit of a rejected reentrant call, or the probe fired before the feed
                // armed this thread. Nothing to stop.
                log::warn!("exit without a live trace session on thread {}", thread);
                return;
            }
        };
        self.engine.unfollow(thread);
        self.engine.flush();
        if self.timing {
            *self.shared.last_exec.lock().unwrap() = Some(started.elapsed());
        }
        let calls = self.shared.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if calls % self.reclaim_interval == 0 {
            log::debug!("reclaiming tracer resources after {} call(s)", calls);
            self.engine.reclaim();
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Feed - Controller
// -----------------------------------------------------------------------------------------------

/// Controller states.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum FeedState {
    /// No probe attached.
    Idle,
    /// Probes attached, waiting for the targets to be called.
    Armed,
}

/// Drives coverage collection over a set of registered targets.
///
/// # Role of the Feed in the Harness
///
/// A fuzzing harness wants one thing from the instrumented process: which basic blocks each
/// injected input exercised. The feed provides that as a cycle the harness repeats per input:
/// arm the probes with [`CoverageFeed::start`], let the harness deliver the input (which makes
/// the target process call the probed functions), drain the events with
/// [`CoverageFeed::coverage`], and reset with [`CoverageFeed::clear`].
///
/// # Trace Sessions
///
/// Between a probe's entry and exit callback the executing thread is followed by the engine's
/// tracer at block-translation granularity. The entry callback opens a per-thread session
/// (recording the start instant when timing is enabled) and the exit callback closes it:
/// unfollow, force a flush of buffered trace events, record the elapsed time and bump the call
/// counter. Distinct threads can hold sessions concurrently; a *reentrant* call on a thread
/// that already holds one is ignored with a warning, because the trace-session model assumes
/// strict entry/exit pairing per thread.
///
/// # Resource Reclamation
///
/// Tracers accumulate bookkeeping memory across sessions. Reclaiming it on every call is too
/// costly and never reclaiming leaks, so the feed amortizes: every
/// [`reclaim_interval`](crate::config::ConfigBuilder::reclaim_interval)-th completed call (100
/// by default) triggers [`Instrumentation::reclaim`]. [`CoverageFeed::stop`] always reclaims.
pub struct CoverageFeed<P: Instrumentation + 'static> {
    /// The instrumentation engine.
    engine: Arc<P>,
    /// State shared with the engine's callback threads.
    shared: Arc<FeedShared>,
    /// Handles of the probes placed by [`CoverageFeed::start`].
    probes: Vec<ProbeHandle>,
    /// Current controller state.
    state: FeedState,
    /// Event granularity requested when following a thread.
    events: TraceEvents,
    /// Tracer resources are reclaimed every this many completed calls.
    reclaim_interval: u64,
    /// Whether call durations are recorded.
    timing: bool,
}

impl<P: Instrumentation + 'static> CoverageFeed<P> {
    /// Creates an idle feed on top of `engine`.
    pub fn new(engine: P, config: &Config) -> Self {
        Self {
            engine: Arc::new(engine),
            shared: Arc::new(FeedShared::new()),
            probes: Vec::new(),
            state: FeedState::Idle,
            events: config.trace_events,
            reclaim_interval: config.reclaim_interval,
            timing: config.timing,
        }
    }

    /// Attaches an entry/exit probe to every target and arms the feed.
    ///
    /// Attachment is all-or-nothing: if any target fails to attach, the probes already placed
    /// are detached and the error is returned, leaving the feed idle. Arming an armed feed is
    /// an error; registering more targets requires a stop/start cycle.
    pub fn start(&mut self, targets: &[TargetDescriptor]) -> Result<()> {
        if self.state == FeedState::Armed {
            return Err(ProbeError::AlreadyArmed.into());
        }
        if targets.is_empty() {
            return Err(ProbeError::NoTargets.into());
        }
        for target in targets {
            let listener = Arc::new(TargetListener {
                module: target.module.clone(),
                engine: self.engine.clone(),
                shared: self.shared.clone(),
                events: self.events,
                reclaim_interval: self.reclaim_interval,
                timing: self.timing,
            });
            match self.engine.attach(target.addr, listener) {
                Ok(handle) => self.probes.push(handle),
                Err(e) => {
                    // No partial attachment survives a failed start.
                    self.engine.detach_all();
                    self.probes.clear();
                    return Err(e);
                }
            }
        }
        log::info!("coverage feed armed with {} probe(s)", self.probes.len());
        self.state = FeedState::Armed;
        Ok(())
    }

    /// Tears the feed down: stops every live trace session, flushes and reclaims tracer
    /// resources and detaches every probe. Unconditional and idempotent; in-flight calls are
    /// cut off rather than waited for.
    pub fn stop(&mut self) {
        let threads: Vec<ThreadId> = {
            let mut sessions = self.shared.sessions.lock().unwrap();
            sessions.drain().map(|(thread, _)| thread).collect()
        };
        for thread in threads {
            self.engine.unfollow(thread);
        }
        self.engine.flush();
        self.engine.reclaim();
        self.engine.detach_all();
        if !self.probes.is_empty() {
            log::info!("coverage feed stopped, {} probe(s) detached", self.probes.len());
        }
        self.probes.clear();
        self.state = FeedState::Idle;
    }

    /// Returns a snapshot of the collected events without clearing the buffer. The snapshot
    /// contains every append completed before the call returned.
    pub fn coverage(&self) -> Vec<CoverageEvent> {
        self.shared.buffer.lock().unwrap().clone()
    }

    /// Returns the collected coverage flattened to one row per block.
    pub fn coverage_blocks(&self) -> Vec<CoverageBlock> {
        self.coverage()
            .iter()
            .flat_map(|event| event.flatten())
            .collect()
    }

    /// Empties the event buffer.
    pub fn clear(&self) {
        self.shared.buffer.lock().unwrap().clear();
    }

    /// One-shot read of the last completed call's duration: returns it and resets it to
    /// unavailable. `None` when timing is disabled or no call completed since the last read.
    pub fn exec_time(&self) -> Option<Duration> {
        self.shared.last_exec.lock().unwrap().take()
    }

    /// Number of instrumented calls completed since the feed was created.
    pub fn calls(&self) -> u64 {
        self.shared.calls.load(Ordering::Relaxed)
    }

    /// Returns `true` if probes are attached.
    pub fn is_armed(&self) -> bool {
        self.state == FeedState::Armed
    }
}

impl<P: Instrumentation + 'static> Drop for CoverageFeed<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
