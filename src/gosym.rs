//! Locates and parses the Go runtime's `pclntab` function table in process memory.
//!
//! # Role of the Table in the Library
//!
//! Go binaries are usually stripped of regular debug symbols, but the runtime itself needs to
//! map program counters to function names for panics and profiling. That mapping, the
//! `pclntab`, is compiled into the binary and mapped read-only at run time. By finding and
//! walking it we can resolve function names to addresses without any on-disk symbol
//! information, which is what lets a harness register coverage targets by name.
//!
//! # Locating the Table
//!
//! The table header starts with a magic number, so candidates are found with a signature scan
//! ([`PCLNTAB_SIGNATURE`]) over the readable regions of the process. The magic is only six
//! bytes and false positives are common, so every candidate is validated structurally: the
//! header stores the entry address of the first function and the offset of the first function
//! record, and both describe the same function. A candidate where
//! `*(candidate + offset) == entry` holds is the real table; everything else is a decoy. The
//! first validated candidate is cached for the lifetime of the [`SymbolTable`], since a loaded
//! table never moves.
//!
//! # Walking the Table
//!
//! The header declares a record count at a fixed offset. Each record is two pointers wide: the
//! function's entry address and the offset of its `_func` structure relative to the table base.
//! The `_func` structure in turn starts with the entry address again, followed by the offset of
//! the function's null-terminated name. The walk visits every record once, strictly bounded by
//! the end address computed from the declared count, and materializes a name-keyed map that is
//! cached for all subsequent lookups.

use std::collections::HashMap;

use regex::Regex;

use crate::error::*;
use crate::memory::*;
use crate::scanner::*;

/// Signature of the `pclntab` header for 64-bit little-endian Go binaries.
pub const PCLNTAB_SIGNATURE: &str = "FB FF FF FF 00 00";

/// Offset of the record count field from the table base.
const HEADER_SIZE: u64 = 8;

// -----------------------------------------------------------------------------------------------
// Symbols - Records
// -----------------------------------------------------------------------------------------------

/// One function resolved from the runtime table.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SymbolRecord {
    /// Function name, as stored by the compiler (e.g. `main.handleRequest`).
    pub name: String,
    /// Entry address of the function.
    pub addr: u64,
    /// Address of the function's record inside the table.
    pub record_addr: u64,
    /// Base address of the owning table.
    pub table_base: u64,
}

// -----------------------------------------------------------------------------------------------
// Symbols - Table
// -----------------------------------------------------------------------------------------------

/// Locator, walker and resolver for the runtime function table.
///
/// Both the table address and the materialized symbol map are computed once and cached;
/// dropping the `SymbolTable` is the only way to force a rescan. Lookups that find nothing
/// return `None`/empty results: a process without a Go runtime is a normal input, not an error.
pub struct SymbolTable {
    /// Validated table base address, once found.
    base: Option<u64>,
    /// Name-keyed map of resolved records, once walked.
    map: Option<HashMap<String, SymbolRecord>>,
    /// Upper bound on the length of a function name read from the table.
    max_name_len: usize,
}

impl SymbolTable {
    /// Creates an empty symbol table cache. `max_name_len` bounds the name strings read while
    /// walking, so a corrupt name offset can't trigger unbounded reads.
    pub fn new(max_name_len: usize) -> Self {
        Self {
            base: None,
            map: None,
            max_name_len,
        }
    }

    /// Finds the table's base address, scanning on the first call and returning the cached
    /// address afterwards. `Ok(None)` means no structurally valid table exists in the process.
    pub fn locate<M: ProcessMemory>(&mut self, mem: &M) -> Result<Option<u64>> {
        if self.base.is_some() {
            return Ok(self.base);
        }
        let pattern = Pattern::parse(PCLNTAB_SIGNATURE)?;
        for candidate in scan(mem, &pattern) {
            if Self::validate(mem, candidate) {
                log::info!("runtime symbol table found at {:#x}", candidate);
                self.base = Some(candidate);
                return Ok(self.base);
            }
            log::debug!("rejected symbol table candidate at {:#x}", candidate);
        }
        Ok(None)
    }

    /// Cross-checks a candidate header: the first record's entry address, read from the header,
    /// must match the entry address stored in the `_func` structure the header points to. Read
    /// faults disqualify the candidate.
    fn validate<M: ProcessMemory>(mem: &M, candidate: u64) -> bool {
        let ptr_size = mem.pointer_size() as u64;
        let fields = || -> Result<(u64, u64)> {
            let entry = mem.read_ptr(candidate + HEADER_SIZE + ptr_size)?;
            let offset = mem.read_ptr(candidate + HEADER_SIZE + 2 * ptr_size)?;
            Ok((entry, mem.read_ptr(candidate + offset)?))
        };
        matches!(fields(), Ok((entry, deref)) if entry == deref)
    }

    /// Returns the materialized symbol map, locating and walking the table on the first call.
    /// `Ok(None)` means no table was found.
    pub fn load<M: ProcessMemory>(
        &mut self,
        mem: &M,
    ) -> Result<Option<&HashMap<String, SymbolRecord>>> {
        if self.map.is_none() {
            let base = match self.locate(mem)? {
                Some(base) => base,
                None => return Ok(None),
            };
            let map = Self::walk(mem, base, self.max_name_len)?;
            log::info!("symbol table walk resolved {} function(s)", map.len());
            self.map = Some(map);
        }
        Ok(self.map.as_ref())
    }

    /// Walks the record array once and materializes the name map.
    ///
    /// The cursor is strictly bounded by the end address computed from the declared record
    /// count: nothing past the declared count is ever decoded, however inconsistent the
    /// record contents are. A record whose reads fault or whose decoded offsets point outside
    /// the table's owning region is treated as corrupt and skipped; names are not guaranteed
    /// unique in pathological tables, in which case the last record walked wins.
    fn walk<M: ProcessMemory>(
        mem: &M,
        base: u64,
        max_name_len: usize,
    ) -> Result<HashMap<String, SymbolRecord>> {
        let ptr_size = mem.pointer_size() as u64;
        let stride = 2 * ptr_size;
        let count = mem
            .read_u32(base + HEADER_SIZE)
            .map_err(|_| SymbolError::UnreadableTable(base))? as u64;
        let table_end = base + HEADER_SIZE + count * stride;
        // The owning region bounds every offset decoded from a record.
        let owner = mem
            .regions(Prot::r())
            .into_iter()
            .find(|r| r.contains(base))
            .ok_or(SymbolError::UnreadableTable(base))?;
        let mut map = HashMap::new();
        let mut cursor = base + HEADER_SIZE + ptr_size;
        while cursor < table_end {
            match Self::decode_record(mem, base, cursor, &owner, max_name_len) {
                Ok(record) => {
                    map.insert(record.name.clone(), record);
                }
                Err(e) => {
                    log::warn!("skipping corrupt symbol record at {:#x}: {}", cursor, e);
                }
            }
            cursor += stride;
        }
        Ok(map)
    }

    /// Decodes the record whose offset field sits at `cursor + ptr_size`.
    fn decode_record<M: ProcessMemory>(
        mem: &M,
        base: u64,
        cursor: u64,
        owner: &MemoryRegion,
        max_name_len: usize,
    ) -> Result<SymbolRecord> {
        let ptr_size = mem.pointer_size() as u64;
        let offset = mem.read_ptr(cursor + ptr_size)?;
        if !owner.contains(base + offset) {
            return Err(MemoryError::Unreadable(base + offset, ptr_size as usize).into());
        }
        let addr = mem.read_ptr(base + offset)?;
        let name_offset = mem.read_u32(base + offset + ptr_size)? as u64;
        if !owner.contains(base + name_offset) {
            return Err(MemoryError::Unreadable(base + name_offset, 1).into());
        }
        let name = mem.read_cstring(base + name_offset, max_name_len)?;
        Ok(SymbolRecord {
            name,
            addr,
            record_addr: base + offset,
            table_base: base,
        })
    }

    /// Exact-name lookup. `Ok(None)` covers both "no table" and "name not in the table".
    pub fn find_by_name<M: ProcessMemory>(
        &mut self,
        mem: &M,
        name: &str,
    ) -> Result<Option<u64>> {
        Ok(self
            .load(mem)?
            .and_then(|map| map.get(name))
            .map(|record| record.addr))
    }

    /// Pattern lookup: every record whose name matches the regular expression `pattern`, in
    /// unspecified order. An empty result is a miss, not an error.
    pub fn find_by_pattern<M: ProcessMemory>(
        &mut self,
        mem: &M,
        pattern: &str,
    ) -> Result<Vec<SymbolRecord>> {
        let re =
            Regex::new(pattern).map_err(|_| SymbolError::InvalidPattern(pattern.to_string()))?;
        Ok(match self.load(mem)? {
            Some(map) => map
                .values()
                .filter(|record| re.is_match(&record.name))
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }
}
