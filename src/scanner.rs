//! Byte-pattern scanning over the readable memory of the target process.

use std::str::FromStr;

use crate::error::*;
use crate::memory::*;

/// Size of the window read from the target process in one go while scanning.
pub(crate) const SCAN_CHUNK_SIZE: usize = 0x1000;

// -----------------------------------------------------------------------------------------------
// Scanner - Pattern
// -----------------------------------------------------------------------------------------------

/// A byte pattern made of literal bytes and wildcard positions.
///
/// The textual form is a space-separated list of two-character hex tokens, `??` marking a
/// position that matches any byte:
///
/// ```
/// use covfeed::scanner::Pattern;
///
/// let pattern: Pattern = "FB FF ?? FF 00 00".parse().unwrap();
/// assert_eq!(pattern.len(), 6);
/// ```
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Pattern {
    /// One entry per pattern position, `None` for wildcards.
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Parses a pattern from its textual form.
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        for token in pattern.split_whitespace() {
            match token {
                "??" => bytes.push(None),
                t if t.len() == 2 => {
                    let byte = u8::from_str_radix(t, 16)
                        .map_err(|_| ScanError::InvalidToken(t.to_string()))?;
                    bytes.push(Some(byte));
                }
                t => return Err(ScanError::InvalidToken(t.to_string()).into()),
            }
        }
        if bytes.is_empty() {
            return Err(ScanError::EmptyPattern.into());
        }
        Ok(Self { bytes })
    }

    /// Number of bytes the pattern spans.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the pattern matches at the start of `window`.
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(p, b)| p.map_or(true, |p| p == *b))
    }

    /// Returns the offsets of all matches of the pattern in `data`.
    pub fn find_all(&self, data: &[u8]) -> Vec<usize> {
        if data.len() < self.bytes.len() {
            return Vec::new();
        }
        (0..=data.len() - self.bytes.len())
            .filter(|&i| self.matches(&data[i..]))
            .collect()
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// -----------------------------------------------------------------------------------------------
// Scanner - Region scan
// -----------------------------------------------------------------------------------------------

/// Returns the addresses of all matches of `pattern` in `region`, in ascending order.
///
/// The region is read in [`SCAN_CHUNK_SIZE`] windows overlapping by the pattern length so
/// matches straddling a window boundary are not missed. A region that can't be read contributes
/// no matches; that's a scan outcome, not an error.
pub fn scan_region<M: ProcessMemory>(
    mem: &M,
    region: &MemoryRegion,
    pattern: &Pattern,
) -> Vec<u64> {
    let mut matches = Vec::new();
    if region.size < pattern.len() {
        return matches;
    }
    let mut offset = 0;
    while offset < region.size {
        let size = std::cmp::min(SCAN_CHUNK_SIZE + pattern.len() - 1, region.size - offset);
        if size < pattern.len() {
            break;
        }
        let mut window = vec![0; size];
        if mem.read(region.base + offset as u64, &mut window).is_err() {
            log::debug!(
                "skipping unreadable window at {:#x} while scanning",
                region.base + offset as u64
            );
            break;
        }
        for pos in pattern.find_all(&window) {
            // The overlap makes the last pattern.len() - 1 positions the next window's job.
            if pos < SCAN_CHUNK_SIZE {
                matches.push(region.base + (offset + pos) as u64);
            }
        }
        offset += SCAN_CHUNK_SIZE;
    }
    matches
}

/// Returns the addresses of all matches of `pattern` across every readable region of the target
/// process.
///
/// An empty result only means the pattern was not found; unreadable regions are silently
/// skipped.
pub fn scan<M: ProcessMemory>(mem: &M, pattern: &Pattern) -> Vec<u64> {
    let mut matches = Vec::new();
    for region in mem.regions(Prot::r()) {
        matches.extend(scan_region(mem, &region, pattern));
    }
    log::debug!("pattern scan produced {} match(es)", matches.len());
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockProcess;

    #[test]
    fn scanner_pattern_parsing() {
        let pattern = Pattern::parse("FB FF ?? FF 00 00").unwrap();
        assert_eq!(pattern.len(), 6);
        assert!(pattern.matches(&[0xfb, 0xff, 0x12, 0xff, 0x00, 0x00]));
        assert!(!pattern.matches(&[0xfb, 0xff, 0x12, 0xfe, 0x00, 0x00]));
        // Too short a window can't match.
        assert!(!pattern.matches(&[0xfb, 0xff, 0x12]));
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("FB GG").is_err());
        assert!(Pattern::parse("F").is_err());
    }

    #[test]
    fn scanner_finds_all_matches() {
        let pattern = Pattern::parse("AA ?? CC").unwrap();
        let mut data = vec![0u8; 0x100];
        data[0x10..0x13].copy_from_slice(&[0xaa, 0x01, 0xcc]);
        data[0x80..0x83].copy_from_slice(&[0xaa, 0xff, 0xcc]);
        let mut mem = MockProcess::new();
        mem.add_region(0x4000, Prot::r(), data);
        assert_eq!(scan(&mem, &pattern), vec![0x4010, 0x4080]);
    }

    #[test]
    fn scanner_match_across_chunk_boundary() {
        let pattern = Pattern::parse("AA BB CC DD").unwrap();
        let mut data = vec![0u8; 3 * SCAN_CHUNK_SIZE];
        let pos = SCAN_CHUNK_SIZE - 2;
        data[pos..pos + 4].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);
        let mut mem = MockProcess::new();
        mem.add_region(0x10000, Prot::r(), data);
        assert_eq!(scan(&mem, &pattern), vec![0x10000 + pos as u64]);
    }

    #[test]
    fn scanner_no_readable_regions() {
        let pattern = Pattern::parse("AA BB").unwrap();
        let mem = MockProcess::new();
        assert!(scan(&mem, &pattern).is_empty());
    }
}
