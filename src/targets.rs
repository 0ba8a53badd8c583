//! Registration and resolution of the functions designated as coverage targets.

use crate::memory::*;

/// Prefix marking a handler string as a raw address literal rather than an export name.
const ADDRESS_PREFIX: &str = "0x";

// -----------------------------------------------------------------------------------------------
// Targets - Specifications
// -----------------------------------------------------------------------------------------------

/// A caller-supplied target specification, before resolution.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TargetSpec {
    /// Module hosting the target function.
    pub module: String,
    /// Either a `0x`-prefixed hex offset from the module base, or an export name.
    pub handler: String,
    /// Optional free-form tag carried through for diagnostics (e.g. the RPC method the
    /// harness associates with this function). Never interpreted.
    pub label: Option<String>,
}

impl TargetSpec {
    /// Creates a new specification without a label.
    pub fn new(module: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            handler: handler.into(),
            label: None,
        }
    }

    /// Attaches a diagnostic label to the specification.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A registered target: a module and the absolute address the probe goes on.
///
/// Descriptors are immutable once created; resolution happens at registration time, so a
/// module unloaded afterwards surfaces as an attach failure, not as a stale lookup.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TargetDescriptor {
    /// Module hosting the target function.
    pub module: String,
    /// Absolute address of the target function.
    pub addr: u64,
}

// -----------------------------------------------------------------------------------------------
// Targets - Registry
// -----------------------------------------------------------------------------------------------

/// Holds the set of resolved coverage targets.
///
/// Registration is additive: [`set_targets`](TargetRegistry::set_targets) appends to the
/// current set and [`clear`](TargetRegistry::clear) is the only way to drop entries. A harness
/// wanting replace-on-set semantics calls `clear` first.
#[derive(Default, Debug)]
pub struct TargetRegistry {
    /// Accepted descriptors, in registration order.
    targets: Vec<TargetDescriptor>,
}

impl TargetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single target. Same semantics as
    /// [`set_targets`](TargetRegistry::set_targets) with a one-element list.
    pub fn set_target<M: ProcessMemory>(&mut self, mem: &M, spec: &TargetSpec) -> bool {
        self.set_targets(mem, std::slice::from_ref(spec))
    }

    /// Validates and registers a batch of targets.
    ///
    /// Returns `false` without touching the registry if the batch is empty or malformed (a
    /// spec with an empty module or handler string). Otherwise each spec is resolved: a
    /// `0x`-prefixed handler is parsed as a hex offset from the module base, anything else is
    /// looked up as an export of the module. Specs that fail to resolve are skipped, not
    /// errors; the batch still succeeds with whatever did resolve.
    pub fn set_targets<M: ProcessMemory>(&mut self, mem: &M, specs: &[TargetSpec]) -> bool {
        if specs.is_empty() {
            log::warn!("rejecting empty target list");
            return false;
        }
        if specs
            .iter()
            .any(|spec| spec.module.is_empty() || spec.handler.is_empty())
        {
            log::warn!("rejecting malformed target list");
            return false;
        }
        for spec in specs {
            match Self::resolve(mem, spec) {
                Some(addr) => {
                    log::info!(
                        "registered target {}!{} at {:#x}{}",
                        spec.module,
                        spec.handler,
                        addr,
                        spec.label
                            .as_deref()
                            .map(|l| format!(" ({})", l))
                            .unwrap_or_default()
                    );
                    self.targets.push(TargetDescriptor {
                        module: spec.module.clone(),
                        addr,
                    });
                }
                None => {
                    log::warn!("skipping unresolvable target {}!{}", spec.module, spec.handler)
                }
            }
        }
        true
    }

    /// Resolves a spec to an absolute address, `None` if the module, the offset literal or the
    /// export name doesn't resolve.
    fn resolve<M: ProcessMemory>(mem: &M, spec: &TargetSpec) -> Option<u64> {
        if let Some(hex) = spec.handler.strip_prefix(ADDRESS_PREFIX) {
            let offset = u64::from_str_radix(hex, 16).ok()?;
            let module = mem.module_by_name(&spec.module)?;
            Some(module.base + offset)
        } else {
            mem.find_export(&spec.module, &spec.handler)
        }
    }

    /// Returns the registered descriptors in registration order.
    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if no target is registered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Drops every registered target.
    pub fn clear(&mut self) {
        self.targets.clear();
    }
}
