//! Offline snapshot backend: a sidecar JSON describing the regions plus a
//! memory blob holding each region's bytes in region order, optionally
//! zstd-framed per region.
//!
//! A loaded snapshot implements [`ProcessPort`], so every scan and filter
//! works against it unchanged; writes mutate the in-memory image only.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::addr::Address;
use crate::error::Error;
use crate::process::{ProcessPort, ProcessState, RemoteRange};
use crate::region::{Protection, Region};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRegion {
    begin: u64,
    end: u64,
    prot: u32,
    shared: bool,
    file: String,
    desc: String,
    offset: u64,
    major: u32,
    minor: u32,
    inode: u64,
    deleted: bool,
    saved_size: u64,
    saved_offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotInfo {
    pid: i32,
    compressed: bool,
    memory_size: u64,
    memory_file: String,
    regions: Vec<SnapshotRegion>,
}

fn snap_err(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Snapshot(format!("{context}: {err}"))
}

/// Write a snapshot of every readable region of `port` to `<path>.json` and
/// `<path>.memory`. Regions that cannot be read in full are recorded with
/// `saved_size` zero.
pub fn save(
    port: &dyn ProcessPort,
    path: &Path,
    compressed: bool,
    level: i32,
) -> Result<(), Error> {
    let regions = port.regions()?;

    let json_path = path.with_extension("json");
    let memory_path = path.with_extension("memory");
    let mut memory_file =
        fs::File::create(&memory_path).map_err(|e| snap_err("create memory file", e))?;

    let mut entries = Vec::with_capacity(regions.len());
    let mut saved_offset = 0u64;

    for region in &regions {
        let mut saved: Option<Vec<u8>> = None;
        if region.prot.contains(Protection::READ) {
            let mut bytes = vec![0u8; region.size()];
            if port.read(region.begin, &mut bytes) == region.size() as isize {
                if compressed {
                    match zstd::bulk::compress(&bytes, level) {
                        Ok(frame) => saved = Some(frame),
                        Err(err) => {
                            log::warn!("zstd failed for region at {}: {err}", region.begin);
                        }
                    }
                } else {
                    saved = Some(bytes);
                }
            }
        }

        let saved_size = saved.as_ref().map(|s| s.len() as u64).unwrap_or(0);
        if let Some(bytes) = &saved {
            memory_file
                .write_all(bytes)
                .map_err(|e| snap_err("write memory file", e))?;
        }
        entries.push(SnapshotRegion {
            begin: region.begin.get() as u64,
            end: region.end.get() as u64,
            prot: region.prot.bits(),
            shared: region.shared,
            file: region.file.clone(),
            desc: region.desc.clone(),
            offset: region.offset,
            major: region.major,
            minor: region.minor,
            inode: region.inode,
            deleted: region.deleted,
            saved_size,
            saved_offset,
        });
        saved_offset += saved_size;
    }

    let info = SnapshotInfo {
        pid: port.pid(),
        compressed,
        memory_size: saved_offset,
        memory_file: memory_path.to_string_lossy().into_owned(),
        regions: entries,
    };
    let json = serde_json::to_string_pretty(&info).map_err(|e| snap_err("encode sidecar", e))?;
    fs::write(&json_path, json).map_err(|e| snap_err("write sidecar", e))?;
    Ok(())
}

/// A target reconstructed from a snapshot file pair. Writes land in the
/// in-memory image, so a narrowing session behaves the same over a snapshot
/// as over a live target.
pub struct SnapshotProcess {
    pid: i32,
    regions: Vec<Region>,
    /// Region bytes, parallel to `regions`; empty for unsaved or broken
    /// regions.
    memory: Mutex<Vec<Vec<u8>>>,
}

impl SnapshotProcess {
    /// Load from the sidecar JSON path. A region whose zstd frame fails to
    /// decode is kept with its protection cleared, and loading continues.
    pub fn load(sidecar: &Path) -> Result<Self, Error> {
        let json = fs::read_to_string(sidecar).map_err(|e| snap_err("read sidecar", e))?;
        let info: SnapshotInfo =
            serde_json::from_str(&json).map_err(|e| snap_err("decode sidecar", e))?;

        let mut memory_path = PathBuf::from(&info.memory_file);
        if !memory_path.exists() {
            // A moved snapshot keeps working as long as both files moved
            // together.
            if let (Some(dir), Some(name)) = (sidecar.parent(), memory_path.file_name()) {
                memory_path = dir.join(name);
            }
        }
        let mut blob =
            fs::File::open(&memory_path).map_err(|e| snap_err("open memory file", e))?;

        let mut regions = Vec::with_capacity(info.regions.len());
        let mut memory = Vec::with_capacity(info.regions.len());

        for entry in &info.regions {
            let mut region = Region {
                begin: Address::new(entry.begin as usize),
                end: Address::new(entry.end as usize),
                prot: Protection::from_bits_truncate(entry.prot),
                shared: entry.shared,
                file: entry.file.clone(),
                desc: entry.desc.clone(),
                offset: entry.offset,
                major: entry.major,
                minor: entry.minor,
                inode: entry.inode,
                deleted: entry.deleted,
            };
            let size = region.size();

            let mut bytes = Vec::new();
            if entry.saved_size > 0 {
                let mut saved = vec![0u8; entry.saved_size as usize];
                blob.seek(SeekFrom::Start(entry.saved_offset))
                    .and_then(|_| blob.read_exact(&mut saved))
                    .map_err(|e| snap_err("read memory file", e))?;
                if info.compressed {
                    match zstd::bulk::decompress(&saved, size) {
                        Ok(raw) if raw.len() == size => bytes = raw,
                        _ => {
                            // Broken frame: keep the region record, drop its
                            // contents.
                            region.prot = Protection::empty();
                        }
                    }
                } else if saved.len() == size {
                    bytes = saved;
                } else {
                    region.prot = Protection::empty();
                }
            }
            regions.push(region);
            memory.push(bytes);
        }

        Ok(SnapshotProcess {
            pid: info.pid,
            regions,
            memory: Mutex::new(memory),
        })
    }

    /// Assemble directly from parts; used by tests and by callers that build
    /// images in memory.
    pub fn from_parts(pid: i32, regions: Vec<Region>, memory: Vec<Vec<u8>>) -> Self {
        debug_assert_eq!(regions.len(), memory.len());
        SnapshotProcess {
            pid,
            regions,
            memory: Mutex::new(memory),
        }
    }

    /// Copy out of the image starting at `addr`, spanning contiguous
    /// regions. Returns the bytes produced before the first gap.
    fn copy_out(&self, addr: Address, out: &mut [u8]) -> usize {
        let memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        let mut produced = 0;
        let mut cursor = addr;
        while produced < out.len() {
            let Some(idx) = self.regions.iter().position(|r| r.contains(cursor)) else {
                break;
            };
            let bytes = &memory[idx];
            if bytes.is_empty() {
                break;
            }
            let start = cursor - self.regions[idx].begin;
            let take = (out.len() - produced).min(bytes.len() - start);
            out[produced..produced + take].copy_from_slice(&bytes[start..start + take]);
            produced += take;
            cursor += take;
        }
        produced
    }

    fn copy_in(&self, addr: Address, data: &[u8]) -> usize {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        let mut consumed = 0;
        let mut cursor = addr;
        while consumed < data.len() {
            let Some(idx) = self.regions.iter().position(|r| r.contains(cursor)) else {
                break;
            };
            let start = cursor - self.regions[idx].begin;
            let bytes = &mut memory[idx];
            if bytes.is_empty() {
                break;
            }
            let take = (data.len() - consumed).min(bytes.len() - start);
            bytes[start..start + take].copy_from_slice(&data[consumed..consumed + take]);
            consumed += take;
            cursor += take;
        }
        consumed
    }
}

impl ProcessPort for SnapshotProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn read(&self, addr: Address, buf: &mut [u8]) -> isize {
        self.copy_out(addr, buf) as isize
    }

    fn write(&self, addr: Address, buf: &[u8]) -> isize {
        self.copy_in(addr, buf) as isize
    }

    fn read_vectored(&self, local: &mut [&mut [u8]], remote: &[RemoteRange]) -> isize {
        // Bytes flow in order across both range lists; the first unreadable
        // byte or the end of the shorter side stops the transfer.
        let mut total = 0isize;
        let mut li = 0usize;
        let mut loff = 0usize;

        for range in remote {
            if li >= local.len() {
                break;
            }
            let mut scratch = vec![0u8; range.len];
            let got = self.copy_out(range.addr, &mut scratch);

            let mut produced = 0;
            while produced < got && li < local.len() {
                let slot = &mut local[li];
                let take = (got - produced).min(slot.len() - loff);
                slot[loff..loff + take].copy_from_slice(&scratch[produced..produced + take]);
                produced += take;
                loff += take;
                if loff == slot.len() {
                    li += 1;
                    loff = 0;
                }
            }
            total += produced as isize;
            if produced < range.len {
                break;
            }
        }
        total
    }

    fn write_vectored(&self, local: &[&[u8]], remote: &[RemoteRange]) -> isize {
        let mut total = 0isize;
        let mut li = 0usize;
        let mut loff = 0usize;

        for range in remote {
            if li >= local.len() {
                break;
            }
            let mut scratch = Vec::with_capacity(range.len);
            while scratch.len() < range.len && li < local.len() {
                let slot = local[li];
                let take = (range.len - scratch.len()).min(slot.len() - loff);
                scratch.extend_from_slice(&slot[loff..loff + take]);
                loff += take;
                if loff == slot.len() {
                    li += 1;
                    loff = 0;
                }
            }
            let wrote = self.copy_in(range.addr, &scratch);
            total += wrote as isize;
            if wrote < range.len {
                break;
            }
        }
        total
    }

    fn suspend(&self, _same_user_too: bool) -> bool {
        true
    }

    fn resume(&self, _same_user_too: bool) -> bool {
        true
    }

    fn state(&self) -> ProcessState {
        ProcessState::Stopped
    }

    fn regions(&self) -> Result<Vec<Region>, Error> {
        Ok(self.regions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(begin: usize, end: usize) -> Region {
        Region {
            begin: Address::new(begin),
            end: Address::new(end),
            prot: Protection::READ_WRITE,
            shared: false,
            file: String::new(),
            desc: String::new(),
            offset: 0,
            major: 0,
            minor: 0,
            inode: 0,
            deleted: false,
        }
    }

    #[test]
    fn reads_span_contiguous_regions() {
        let snap = SnapshotProcess::from_parts(
            1,
            vec![region(0x1000, 0x1004), region(0x1004, 0x1008)],
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]],
        );
        let mut buf = [0u8; 6];
        let n = snap.read(Address::new(0x1002), &mut buf);
        assert_eq!(n, 6);
        assert_eq!(buf, [3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn read_stops_at_gaps_and_unsaved_regions() {
        let snap = SnapshotProcess::from_parts(
            1,
            vec![region(0x1000, 0x1004), region(0x2000, 0x2004)],
            vec![vec![1, 2, 3, 4], Vec::new()],
        );
        let mut buf = [0u8; 8];
        assert_eq!(snap.read(Address::new(0x1000), &mut buf), 4);
        assert_eq!(snap.read(Address::new(0x2000), &mut buf), 0);
        assert_eq!(snap.read(Address::new(0x3000), &mut buf), 0);
    }

    #[test]
    fn vectored_read_crosses_local_boundaries() {
        let snap = SnapshotProcess::from_parts(
            1,
            vec![region(0x1000, 0x1008)],
            vec![vec![1, 2, 3, 4, 5, 6, 7, 8]],
        );
        let mut a = [0u8; 3];
        let mut b = [0u8; 5];
        let remote = [
            RemoteRange {
                addr: Address::new(0x1000),
                len: 4,
            },
            RemoteRange {
                addr: Address::new(0x1004),
                len: 4,
            },
        ];
        let n = snap.read_vectored(&mut [&mut a[..], &mut b[..]], &remote);
        assert_eq!(n, 8);
        assert_eq!(a, [1, 2, 3]);
        assert_eq!(b, [4, 5, 6, 7, 8]);
    }

    #[test]
    fn writes_mutate_the_image() {
        let snap = SnapshotProcess::from_parts(
            1,
            vec![region(0x1000, 0x1004)],
            vec![vec![0, 0, 0, 0]],
        );
        assert_eq!(snap.write(Address::new(0x1001), &[9, 9]), 2);
        let mut buf = [0u8; 4];
        snap.read(Address::new(0x1000), &mut buf);
        assert_eq!(buf, [0, 9, 9, 0]);
    }
}
