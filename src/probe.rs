//! Instrumentation capability boundary: entry/exit interception and thread-scoped execution
//! tracing.

use std::fmt;
use std::sync::Arc;

use crate::error::*;

/// Identifier of a thread of the target process, as reported by the engine.
pub type ThreadId = u64;

// -----------------------------------------------------------------------------------------------
// Probe - Trace granularity
// -----------------------------------------------------------------------------------------------

/// Event classes an execution tracer can be asked to deliver.
///
/// Coverage collection only needs [`TraceEvents::compile_only`]: one event per basic block the
/// engine translates, the coarsest granularity that still yields block coverage. The finer
/// classes are kept on the contract because engines expose them and a custom consumer may want
/// them, but they come with a large overhead.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TraceEvents {
    /// Deliver an event per call instruction executed.
    pub call: bool,
    /// Deliver an event per return instruction executed.
    pub ret: bool,
    /// Deliver an event per instruction executed.
    pub exec: bool,
    /// Deliver an event per basic block executed.
    pub block: bool,
    /// Deliver an event per basic block translated by the engine.
    pub compile: bool,
}

impl TraceEvents {
    /// Block-translation events only.
    pub fn compile_only() -> Self {
        Self {
            call: false,
            ret: false,
            exec: false,
            block: false,
            compile: true,
        }
    }
}

impl Default for TraceEvents {
    fn default() -> Self {
        Self::compile_only()
    }
}

// -----------------------------------------------------------------------------------------------
// Probe - Records and handles
// -----------------------------------------------------------------------------------------------

/// One basic block reported by the execution tracer.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockRecord {
    /// Address of the block's first instruction.
    pub start: u64,
    /// Address past the block's last instruction.
    pub end: u64,
}

impl BlockRecord {
    /// Creates a new block record.
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for BlockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// Opaque handle to an active entry/exit interception at one address.
///
/// Handles are created by [`Instrumentation::attach`] and invalidated in bulk by
/// [`Instrumentation::detach_all`]; at most one probe is active per address at a time.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ProbeHandle {
    /// Probed address.
    pub addr: u64,
    /// Engine-assigned identifier of the interception.
    pub id: u64,
}

// -----------------------------------------------------------------------------------------------
// Probe - Capability traits
// -----------------------------------------------------------------------------------------------

/// Receiver of the entry/exit callbacks of a probe.
///
/// The engine may invoke these from any thread of the target process, concurrently if several
/// threads run through the probed address; implementations must synchronize their own state.
pub trait ProbeListener: Send + Sync {
    /// The probed function was entered on `thread`.
    fn on_enter(&self, thread: ThreadId);

    /// The probed function returned on `thread`.
    fn on_leave(&self, thread: ThreadId);
}

/// Receiver of the asynchronous trace output of a followed thread.
pub trait BlockSink: Send + Sync {
    /// A batch of translated blocks was delivered by the engine. Batches arrive in
    /// translation order; blocks the engine reuses are not reported twice.
    fn on_blocks(&self, blocks: Vec<BlockRecord>);
}

/// The dynamic binary instrumentation engine the library drives.
///
/// The library never touches instructions itself; everything below the operations of this trait
/// (code rewriting, trampolines, per-thread tracer state) belongs to the engine. The contract
/// mirrors what Frida-style engines expose:
///
///  * [`attach`](Instrumentation::attach) / [`detach_all`](Instrumentation::detach_all) place
///    and remove entry/exit interceptions;
///  * [`follow`](Instrumentation::follow) / [`unfollow`](Instrumentation::unfollow) scope
///    execution tracing to one thread;
///  * [`flush`](Instrumentation::flush) forces buffered trace events out to their sinks;
///  * [`reclaim`](Instrumentation::reclaim) releases tracer bookkeeping accumulated across
///    trace sessions.
pub trait Instrumentation: Send + Sync {
    /// Places an entry/exit probe at `addr`. The engine calls `listener` on every entry into and
    /// return from the probed function until [`detach_all`](Instrumentation::detach_all).
    fn attach(&self, addr: u64, listener: Arc<dyn ProbeListener>) -> Result<ProbeHandle>;

    /// Removes every probe placed through this engine instance.
    fn detach_all(&self);

    /// Starts tracing `thread`, delivering the event classes enabled in `events` to `sink`.
    /// Delivery is asynchronous and may happen on an engine-internal thread.
    fn follow(
        &self,
        thread: ThreadId,
        events: TraceEvents,
        sink: Arc<dyn BlockSink>,
    ) -> Result<()>;

    /// Stops tracing `thread`. A no-op for threads that are not followed.
    fn unfollow(&self, thread: ThreadId);

    /// Flushes trace events still buffered inside the engine out to their sinks.
    fn flush(&self);

    /// Releases tracer-internal memory accumulated across trace sessions.
    fn reclaim(&self);
}
