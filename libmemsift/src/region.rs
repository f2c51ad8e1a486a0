//! Memory region records and the `/proc/<pid>/maps` enumerator.
//!
//! A [`Region`] is an immutable description of one contiguous mapping in the
//! target. Refreshing the view replaces the whole list; individual records
//! are never edited in place.

use std::fs;

use bitflags::bitflags;

use crate::addr::Address;
use crate::error::Error;

bitflags! {
    /// Page protection bits of a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXEC = 4;
    }
}

impl Protection {
    pub const READ_WRITE: Protection = Protection::READ.union(Protection::WRITE);
}

/// One contiguous mapping in the target's address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub begin: Address,
    pub end: Address,
    pub prot: Protection,
    pub shared: bool,
    /// Backing file path; empty for anonymous mappings.
    pub file: String,
    /// Free-text annotation from the kernel, e.g. `[stack]`.
    pub desc: String,
    pub offset: u64,
    pub major: u32,
    pub minor: u32,
    pub inode: u64,
    pub deleted: bool,
}

impl Region {
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.begin && addr < self.end
    }
}

/// Parse one `maps` line:
/// `BEGIN-END PERMS OFFSET MAJOR:MINOR INODE [PATH [DESC]]`.
///
/// Returns `None` for lines that do not match the expected shape; the
/// snapshot skips them rather than failing the whole table.
fn parse_line(line: &str) -> Option<Region> {
    let mut fields = line.splitn(6, [' ', '\t']).filter(|f| !f.is_empty());

    let range = fields.next()?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let dev = fields.next()?;
    let inode = fields.next()?;
    let rest = fields.next().map(str::trim).unwrap_or("");

    let (begin, end) = range.split_once('-')?;
    let begin = Address::new(usize::from_str_radix(begin, 16).ok()?);
    let end = Address::new(usize::from_str_radix(end, 16).ok()?);
    if begin >= end {
        return None;
    }

    let perms = perms.as_bytes();
    if perms.len() != 4 {
        return None;
    }
    let mut prot = Protection::empty();
    if perms[0] == b'r' {
        prot |= Protection::READ;
    }
    if perms[1] == b'w' {
        prot |= Protection::WRITE;
    }
    if perms[2] == b'x' {
        prot |= Protection::EXEC;
    }
    let shared = perms[3] == b's';

    let offset = u64::from_str_radix(offset, 16).ok()?;
    let (major, minor) = dev.split_once(':')?;
    let major = u32::from_str_radix(major, 16).ok()?;
    let minor = u32::from_str_radix(minor, 16).ok()?;
    let inode = inode.parse::<u64>().ok()?;

    // Anything starting with '/' is a backing file, with an optional trailing
    // annotation; otherwise the whole tail is the annotation.
    let (file, desc) = if rest.starts_with('/') {
        match rest.split_once(' ') {
            Some((file, desc)) => (file.to_string(), desc.trim().to_string()),
            None => (rest.to_string(), String::new()),
        }
    } else {
        (String::new(), rest.to_string())
    };
    let deleted = desc.contains("(deleted)");

    Some(Region {
        begin,
        end,
        prot,
        shared,
        file,
        desc,
        offset,
        major,
        minor,
        inode,
        deleted,
    })
}

/// Parse a whole `maps` table. Unrecognized lines are skipped.
pub fn parse_maps(text: &str) -> Vec<Region> {
    text.lines().filter_map(parse_line).collect()
}

/// Snapshot the readable region table of `pid`.
///
/// An unreadable table (no such process, no permission) is
/// [`Error::Unavailable`]; a readable but empty table is an empty vec.
pub fn snapshot(pid: i32) -> Result<Vec<Region>, Error> {
    let path = format!("/proc/{pid}/maps");
    let text = fs::read_to_string(&path).map_err(|_| Error::Unavailable(pid))?;
    Ok(parse_maps(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_backed_line() {
        let r = parse_line("00400000-0040b000 r-xp 00001000 08:01 131104 /usr/bin/cat").unwrap();
        assert_eq!(r.begin.get(), 0x400000);
        assert_eq!(r.end.get(), 0x40b000);
        assert_eq!(r.prot, Protection::READ | Protection::EXEC);
        assert!(!r.shared);
        assert_eq!(r.offset, 0x1000);
        assert_eq!((r.major, r.minor), (8, 1));
        assert_eq!(r.inode, 131104);
        assert_eq!(r.file, "/usr/bin/cat");
        assert!(r.desc.is_empty());
        assert!(!r.deleted);
    }

    #[test]
    fn parses_anonymous_and_stack_lines() {
        let r = parse_line("7ffc7ad51000-7ffc7ad72000 rw-p 00000000 00:00 0 [stack]").unwrap();
        assert_eq!(r.prot, Protection::READ_WRITE);
        assert!(r.file.is_empty());
        assert_eq!(r.desc, "[stack]");

        let r = parse_line("7f0000000000-7f0000021000 rw-s 00000000 00:00 0").unwrap();
        assert!(r.shared);
        assert!(r.desc.is_empty());
    }

    #[test]
    fn parses_deleted_mapping() {
        let r =
            parse_line("7f1000000000-7f1000001000 r--p 00000000 08:11 42 /tmp/lib.so (deleted)")
                .unwrap();
        assert_eq!(r.file, "/tmp/lib.so");
        assert!(r.deleted);
    }

    #[test]
    fn skips_garbage_lines() {
        let regions = parse_maps("not a mapping\n00400000-00401000 r--p 00000000 00:00 0\n");
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn maps_are_sorted_without_overlap() {
        let text = "\
00400000-00401000 r--p 00000000 00:00 0
00401000-00403000 rw-p 00000000 00:00 0 [heap]
";
        let regions = parse_maps(text);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].end <= regions[1].begin);
    }

    #[test]
    fn snapshot_of_self_is_nonempty() {
        let regions = snapshot(std::process::id() as i32).unwrap();
        assert!(!regions.is_empty());
    }

    #[test]
    fn snapshot_of_bogus_pid_is_unavailable() {
        assert!(matches!(snapshot(-1), Err(Error::Unavailable(_))));
    }
}
