//! Process-memory capability boundary: module and region enumeration, typed reads and export
//! resolution inside the instrumented process.

use bitfield::bitfield;

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// Memory - Regions
// -----------------------------------------------------------------------------------------------

bitfield! {
    /// Protection bits of a mapped memory region.
    #[derive(Copy, Clone, Eq, Hash, PartialEq)]
    pub struct Prot(u8);
    impl Debug;
    pub get_r, set_r: 0;
    pub get_w, set_w: 1;
    pub get_x, set_x: 2;
}

impl Prot {
    /// Creates a new protection value from individual read, write and execute bits.
    pub fn new(r: bool, w: bool, x: bool) -> Self {
        let mut prot = Prot(0);
        prot.set_r(r);
        prot.set_w(w);
        prot.set_x(x);
        prot
    }

    /// Read-only protection, the minimum required for scanning.
    pub fn r() -> Self {
        Self::new(true, false, false)
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains(&self, other: Prot) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// A mapped memory range of the target process.
///
/// Regions are produced by [`ProcessMemory::regions`] and are a snapshot of the process at
/// enumeration time; they are not expected to stay valid across module loads and unloads.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct MemoryRegion {
    /// Start address of the region.
    pub base: u64,
    /// Size of the region in bytes.
    pub size: usize,
    /// Protection bits of the region.
    pub prot: Prot,
}

impl MemoryRegion {
    /// Creates a new memory region.
    pub fn new(base: u64, size: usize, prot: Prot) -> Self {
        Self { base, size, prot }
    }

    /// Returns the first address past the region.
    pub fn end(&self) -> u64 {
        self.base + self.size as u64
    }

    /// Returns `true` if `addr` falls inside the region.
    pub fn contains(&self, addr: u64) -> bool {
        self.base <= addr && addr < self.end()
    }

    /// Returns `true` if the whole range `[addr; addr + size[` falls inside the region.
    pub fn contains_range(&self, addr: u64, size: usize) -> bool {
        self.contains(addr) && addr + size as u64 <= self.end()
    }
}

/// A module loaded in the target process.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ModuleInfo {
    /// Name of the module, as exposed by the loader (e.g. `libtarget.so`).
    pub name: String,
    /// Base address of the module's first mapping.
    pub base: u64,
    /// Total size of the module's mappings.
    pub size: usize,
}

impl ModuleInfo {
    /// Creates a new module descriptor.
    pub fn new(name: impl Into<String>, base: u64, size: usize) -> Self {
        Self {
            name: name.into(),
            base,
            size,
        }
    }

    /// Returns the first address past the module's mappings.
    pub fn end(&self) -> u64 {
        self.base + self.size as u64
    }
}

// -----------------------------------------------------------------------------------------------
// Memory - Process capability
// -----------------------------------------------------------------------------------------------

/// Read access to the instrumented process's address space.
///
/// This trait is the contract between the library and whatever gives it eyes on the target
/// process: an in-process agent reads its own address space directly, an out-of-process
/// implementation can go through `process_vm_readv`, a debugger port, or a core dump. All
/// operations are reads; the library never writes to the target.
///
/// The provided typed readers ([`read_u32`](ProcessMemory::read_u32),
/// [`read_ptr`](ProcessMemory::read_ptr), [`read_cstring`](ProcessMemory::read_cstring)) decode
/// little-endian values on top of [`read`](ProcessMemory::read) and normally don't need to be
/// overridden.
pub trait ProcessMemory: Send + Sync {
    /// Enumerates the modules loaded in the target process, main executable first.
    fn modules(&self) -> Vec<ModuleInfo>;

    /// Enumerates the mapped regions whose protection includes all bits of `prot`.
    fn regions(&self, prot: Prot) -> Vec<MemoryRegion>;

    /// Reads `buf.len()` bytes at `addr`. Fails with [`MemoryError::Unreadable`] if any byte of
    /// the range is not mapped readable.
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()>;

    /// Resolves an export of `module` to an absolute address, `None` if the module or the export
    /// doesn't exist.
    fn find_export(&self, module: &str, name: &str) -> Option<u64>;

    /// Size of a pointer in the target process.
    fn pointer_size(&self) -> usize {
        8
    }

    /// Returns the module named `name`, if loaded.
    fn module_by_name(&self, name: &str) -> Option<ModuleInfo> {
        self.modules().into_iter().find(|m| m.name == name)
    }

    /// Reads a little-endian `u32` at `addr`.
    fn read_u32(&self, addr: u64) -> Result<u32> {
        let mut buf = [0; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a little-endian `u64` at `addr`.
    fn read_u64(&self, addr: u64) -> Result<u64> {
        let mut buf = [0; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a pointer-sized little-endian value at `addr`, zero-extended to 64 bits.
    fn read_ptr(&self, addr: u64) -> Result<u64> {
        match self.pointer_size() {
            4 => Ok(self.read_u32(addr)? as u64),
            _ => self.read_u64(addr),
        }
    }

    /// Reads a null-terminated UTF-8 string at `addr`, up to `max_len` bytes.
    ///
    /// Fails with [`MemoryError::InvalidString`] if no terminator is found within `max_len`
    /// bytes or if the bytes are not valid UTF-8.
    fn read_cstring(&self, addr: u64, max_len: usize) -> Result<String> {
        const CHUNK: usize = 0x40;
        let mut bytes = Vec::new();
        let mut cursor = addr;
        while bytes.len() < max_len {
            let mut size = std::cmp::min(CHUNK, max_len - bytes.len());
            let mut buf = vec![0; size];
            // Shrink the window when it straddles the end of a mapping; the string may end
            // right before the boundary.
            while self.read(cursor, &mut buf[..size]).is_err() {
                size /= 2;
                if size == 0 {
                    return Err(MemoryError::Unreadable(cursor, 1).into());
                }
            }
            if let Some(pos) = buf[..size].iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&buf[..pos]);
                return String::from_utf8(bytes)
                    .map_err(|_| MemoryError::InvalidString(addr).into());
            }
            bytes.extend_from_slice(&buf[..size]);
            cursor += size as u64;
        }
        Err(MemoryError::InvalidString(addr).into())
    }
}
