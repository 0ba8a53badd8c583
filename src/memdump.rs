//! Dumps the readable memory of a module to timestamped hexdump files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rhexdump as rh;

use crate::error::*;
use crate::memory::*;

/// Writes module memory dumps into a fixed output directory.
///
/// One dump file is produced per call, named `<module>_<timestamp>`, containing a hexdump of
/// every readable region overlapping the module's mappings. Dumps are a debugging aid for the
/// harness operator (diffing a process before and after an input, feeding a crash report), not
/// part of the coverage pipeline.
pub struct MemoryDumper {
    /// Output directory, must exist.
    directory: PathBuf,
}

impl MemoryDumper {
    /// Creates a dumper writing into `directory`. Fails if the directory doesn't exist; the
    /// dumper never creates it, to avoid spraying files at a mistyped path.
    pub fn new(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_owned();
        if !directory.is_dir() {
            return Err(DumpError::MissingDirectory(directory.display().to_string()).into());
        }
        Ok(Self { directory })
    }

    /// Generates the path of a new dump file for `module`.
    fn dump_path(&self, module: &str) -> PathBuf {
        let fmt =
            time::format_description::parse("[year][month][day]-[hour][minute][second]").unwrap();
        self.directory.join(format!(
            "{}_{}",
            module,
            time::OffsetDateTime::now_utc().format(&fmt).unwrap()
        ))
    }

    /// Dumps every readable region overlapping `module`'s mappings and returns the path of the
    /// dump file.
    pub fn dump_module<M: ProcessMemory>(&self, mem: &M, module: &str) -> Result<PathBuf> {
        let info = mem
            .module_by_name(module)
            .ok_or_else(|| MemoryError::UnknownModule(module.to_string()))?;
        let path = self.dump_path(module);
        let mut out = File::create(&path)?;
        let mut rhx = rh::Rhexdump::default();
        rhx.display_duplicate_lines(false);
        for region in mem.regions(Prot::r()) {
            let start = std::cmp::max(region.base, info.base);
            let end = std::cmp::min(region.end(), info.end());
            if start >= end {
                continue;
            }
            let mut data = vec![0; (end - start) as usize];
            if mem.read(start, &mut data).is_err() {
                log::warn!("skipping unreadable region at {:#x} while dumping", start);
                continue;
            }
            writeln!(out, "[{:#x} -> {:#x}]", start, end)?;
            writeln!(out, "{}", rhx.hexdump_offset(&data, start as u32))?;
        }
        log::info!("dumped module {} to {}", module, path.display());
        Ok(path)
    }
}
