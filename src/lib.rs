//! Remotely driven basic-block coverage collection for dynamically instrumented processes.
//!
//! ## Overview
//!
//! `covfeed` sits between a fuzzing harness and a dynamic binary instrumentation engine. The
//! harness registers target functions, arms the coverage feed, injects inputs into the target
//! process and drains the basic blocks each input exercised. A companion module finds and
//! parses the Go runtime's in-memory function table, so targets can be named symbolically even
//! for binaries stripped of on-disk debug information.
//!
//! The engine itself is not part of the crate: everything that touches the target process goes
//! through two capability traits, [`memory::ProcessMemory`] for reads and
//! [`probe::Instrumentation`] for interception and tracing. Implement both for your engine of
//! choice and hand them to a [`session::Session`].
//!
//! ## Reading Order
//!
//! If you want a better understanding of the library's implementation and the interactions
//! between its components, it is recommended to read the documentation in the following order.
//!
//! 1. [Process Memory](memory::ProcessMemory)
//! 2. [Pattern Scanning](scanner)
//! 3. [Runtime Symbol Table](gosym::SymbolTable)
//! 4. [Target Registry](targets::TargetRegistry)
//! 5. [Instrumentation Capability](probe::Instrumentation)
//! 6. [Coverage Feed](feed::CoverageFeed)
//! 7. [Session](session::Session)
//! 8. [Config](config::Config)
//!
//! ## Getting Started
//!
//! ```no_run
//! use covfeed::config::Config;
//! use covfeed::session::Session;
//! use covfeed::targets::TargetSpec;
//!
//! # fn demo<M, P>(mem: M, engine: P) -> covfeed::error::Result<()>
//! # where M: covfeed::memory::ProcessMemory, P: covfeed::probe::Instrumentation + 'static {
//! let config = Config::builder()
//!     .reclaim_interval(100)
//!     .timing(true)
//!     .build();
//! let mut session = Session::new(config, mem, engine);
//!
//! // Register one target by raw offset and one by export name.
//! session.set_targets(&[
//!     TargetSpec::new("libtarget.so", "0x1000"),
//!     TargetSpec::new("libtarget.so", "handle_request"),
//! ]);
//!
//! session.start_coverage_feed()?;
//! // ... deliver an input to the target process ...
//! let coverage = session.get_coverage();
//! session.clear_coverage();
//! session.stop_coverage_feed();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod gosym;
pub mod memdump;
pub mod memory;
pub mod probe;
pub mod scanner;
pub mod session;
pub mod targets;

#[cfg(test)]
pub(crate) mod testutil;
