//! Test doubles shared between the module tests: an in-memory process image and a scriptable
//! instrumentation engine.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::*;
use crate::memory::*;
use crate::probe::*;

// -----------------------------------------------------------------------------------------------
// Test utilities - Process memory
// -----------------------------------------------------------------------------------------------

/// A fake process image built from explicit regions, modules and exports.
#[derive(Default)]
pub struct MockProcess {
    /// Loaded modules, main executable first.
    modules: Vec<ModuleInfo>,
    /// Mapped regions and their backing bytes.
    regions: Vec<(MemoryRegion, Vec<u8>)>,
    /// Export table, keyed by (module, symbol).
    exports: HashMap<(String, String), u64>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: &str, base: u64, size: usize) {
        self.modules.push(ModuleInfo::new(name, base, size));
    }

    pub fn add_region(&mut self, base: u64, prot: Prot, data: Vec<u8>) {
        let region = MemoryRegion::new(base, data.len(), prot);
        self.regions.push((region, data));
    }

    pub fn add_export(&mut self, module: &str, name: &str, addr: u64) {
        self.exports
            .insert((module.to_string(), name.to_string()), addr);
    }
}

impl ProcessMemory for MockProcess {
    fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.clone()
    }

    fn regions(&self, prot: Prot) -> Vec<MemoryRegion> {
        self.regions
            .iter()
            .filter(|(region, _)| region.prot.contains(prot))
            .map(|(region, _)| region.clone())
            .collect()
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        for (region, data) in self.regions.iter() {
            if region.prot.get_r() && region.contains_range(addr, buf.len()) {
                let offset = (addr - region.base) as usize;
                buf.copy_from_slice(&data[offset..offset + buf.len()]);
                return Ok(());
            }
        }
        Err(MemoryError::Unreadable(addr, buf.len()).into())
    }

    fn find_export(&self, module: &str, name: &str) -> Option<u64> {
        self.exports
            .get(&(module.to_string(), name.to_string()))
            .copied()
    }
}

// -----------------------------------------------------------------------------------------------
// Test utilities - Instrumentation engine
// -----------------------------------------------------------------------------------------------

/// Non-thread-local state of a [`MockEngine`].
#[derive(Default)]
struct EngineInner {
    /// Probe listeners, keyed by probed address.
    listeners: Mutex<HashMap<u64, Arc<dyn ProbeListener>>>,
    /// Block sinks of the currently followed threads.
    followed: Mutex<HashMap<ThreadId, Arc<dyn BlockSink>>>,
    /// Addresses where `attach` is scripted to fail.
    fail_attach: Mutex<HashSet<u64>>,
    /// Next probe identifier.
    next_id: AtomicU64,
    /// Number of `flush` calls observed.
    flushes: AtomicU64,
    /// Number of `reclaim` calls observed.
    reclaims: AtomicU64,
}

/// A scriptable instrumentation engine: tests place probes through the public API and then
/// simulate the target process calling the probed functions with
/// [`fire_call`](MockEngine::fire_call) (or the finer-grained
/// [`fire_enter`](MockEngine::fire_enter) / [`deliver_blocks`](MockEngine::deliver_blocks) /
/// [`fire_leave`](MockEngine::fire_leave)).
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<EngineInner>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `attach` to fail at `addr`.
    pub fn fail_attach_at(&self, addr: u64) {
        self.inner.fail_attach.lock().unwrap().insert(addr);
    }

    /// Number of currently attached probes.
    pub fn attached(&self) -> usize {
        self.inner.listeners.lock().unwrap().len()
    }

    /// Number of currently followed threads.
    pub fn followed(&self) -> usize {
        self.inner.followed.lock().unwrap().len()
    }

    /// Number of `flush` calls observed.
    pub fn flushes(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    /// Number of `reclaim` calls observed.
    pub fn reclaims(&self) -> u64 {
        self.inner.reclaims.load(Ordering::Relaxed)
    }

    /// Simulates `thread` entering the function probed at `addr`.
    pub fn fire_enter(&self, addr: u64, thread: ThreadId) {
        let listener = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .get(&addr)
            .cloned()
            .expect("no probe attached at address");
        listener.on_enter(thread);
    }

    /// Simulates `thread` returning from the function probed at `addr`.
    pub fn fire_leave(&self, addr: u64, thread: ThreadId) {
        let listener = self
            .inner
            .listeners
            .lock()
            .unwrap()
            .get(&addr)
            .cloned()
            .expect("no probe attached at address");
        listener.on_leave(thread);
    }

    /// Delivers a batch of translated blocks to the sink following `thread`, if any.
    pub fn deliver_blocks(&self, thread: ThreadId, blocks: &[BlockRecord]) {
        let sink = self.inner.followed.lock().unwrap().get(&thread).cloned();
        if let Some(sink) = sink {
            sink.on_blocks(blocks.to_vec());
        }
    }

    /// Simulates one complete instrumented call on `thread`: entry, one block batch, exit.
    pub fn fire_call(&self, addr: u64, thread: ThreadId, blocks: &[BlockRecord]) {
        self.fire_enter(addr, thread);
        self.deliver_blocks(thread, blocks);
        self.fire_leave(addr, thread);
    }
}

impl Instrumentation for MockEngine {
    fn attach(&self, addr: u64, listener: Arc<dyn ProbeListener>) -> Result<ProbeHandle> {
        if self.inner.fail_attach.lock().unwrap().contains(&addr) {
            return Err(ProbeError::AttachFailed(addr).into());
        }
        let mut listeners = self.inner.listeners.lock().unwrap();
        if listeners.insert(addr, listener).is_some() {
            return Err(ProbeError::AttachFailed(addr).into());
        }
        Ok(ProbeHandle {
            addr,
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    fn detach_all(&self) {
        self.inner.listeners.lock().unwrap().clear();
    }

    fn follow(
        &self,
        thread: ThreadId,
        _events: TraceEvents,
        sink: Arc<dyn BlockSink>,
    ) -> Result<()> {
        self.inner.followed.lock().unwrap().insert(thread, sink);
        Ok(())
    }

    fn unfollow(&self, thread: ThreadId) {
        self.inner.followed.lock().unwrap().remove(&thread);
    }

    fn flush(&self) {
        self.inner.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn reclaim(&self) {
        self.inner.reclaims.fetch_add(1, Ordering::Relaxed);
    }
}

// -----------------------------------------------------------------------------------------------
// Test utilities - Synthetic runtime tables
// -----------------------------------------------------------------------------------------------

const PTR_SIZE: u64 = 8;
const HEADER_SIZE: u64 = 8;
const STRIDE: u64 = 2 * PTR_SIZE;

fn write_u64(image: &mut [u8], offset: u64, value: u64) {
    let offset = offset as usize;
    image[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(image: &mut [u8], offset: u64, value: u32) {
    let offset = offset as usize;
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Builds a structurally valid synthetic runtime table image for `funcs`, each entry a
/// `(name, entry address)` pair. All offsets inside the image are relative to its start, so the
/// image can be mapped at any base address.
///
/// Entries in `extra` are appended as additional records *past* the table end implied by the
/// declared count; a walker honoring the bound must never surface them.
fn build_table(funcs: &[(&str, u64)], extra: &[(&str, u64)]) -> Vec<u8> {
    let declared = funcs.len() as u64;
    let total: Vec<(&str, u64)> = funcs.iter().chain(extra).copied().collect();
    let records_start = HEADER_SIZE + PTR_SIZE;
    let funcs_start = records_start + total.len() as u64 * STRIDE;
    let names_start = funcs_start + total.len() as u64 * STRIDE;
    let names_len: usize = total.iter().map(|(name, _)| name.len() + 1).sum();
    let mut image = vec![0; names_start as usize + names_len];

    // Header: signature, then the declared record count.
    image[0..6].copy_from_slice(&[0xfb, 0xff, 0xff, 0xff, 0x00, 0x00]);
    image[6] = 1; // instruction quantum
    image[7] = PTR_SIZE as u8;
    write_u64(&mut image, HEADER_SIZE, declared);

    let mut name_cursor = names_start;
    for (i, (name, addr)) in total.iter().enumerate() {
        let record = records_start + i as u64 * STRIDE;
        let func = funcs_start + i as u64 * STRIDE;
        // Record: entry address and offset of the function structure.
        write_u64(&mut image, record, *addr);
        write_u64(&mut image, record + PTR_SIZE, func);
        // Function structure: entry address again, then the name offset.
        write_u64(&mut image, func, *addr);
        write_u32(&mut image, func + PTR_SIZE, name_cursor as u32);
        // Null-terminated name.
        let name_cursor_usize = name_cursor as usize;
        image[name_cursor_usize..name_cursor_usize + name.len()]
            .copy_from_slice(name.as_bytes());
        name_cursor += name.len() as u64 + 1;
    }
    image
}

/// A valid table image containing exactly the given functions.
pub fn pclntab_image(funcs: &[(&str, u64)]) -> Vec<u8> {
    build_table(funcs, &[])
}

/// A valid table image for `funcs` followed by one poison record past the declared end.
pub fn pclntab_image_with_poison(
    funcs: &[(&str, u64)],
    poison_name: &str,
    poison_addr: u64,
) -> Vec<u8> {
    build_table(funcs, &[(poison_name, poison_addr)])
}

/// A decoy image: the signature matches but the header cross-check fails. With `unmapped` set,
/// the offset field points outside the image so probing the candidate faults.
pub fn decoy_pclntab_image(unmapped: bool) -> Vec<u8> {
    let mut image = vec![0; 0x40];
    image[0..6].copy_from_slice(&[0xfb, 0xff, 0xff, 0xff, 0x00, 0x00]);
    write_u64(&mut image, HEADER_SIZE + PTR_SIZE, 0x1111);
    if unmapped {
        write_u64(&mut image, HEADER_SIZE + 2 * PTR_SIZE, 0x100000);
    } else {
        write_u64(&mut image, HEADER_SIZE + 2 * PTR_SIZE, 0x30);
        write_u64(&mut image, 0x30, 0x2222);
    }
    image
}
