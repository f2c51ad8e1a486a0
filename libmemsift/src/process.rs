//! Process access ports.
//!
//! A [`ProcessPort`] is the coarse capability set the engine needs from a
//! target: bulk reads and writes over a foreign address space, stop/continue
//! signalling, runtime state, and the region table. Two backends implement
//! it: [`LiveProcess`] here (over `process_vm_readv`/`writev`) and
//! [`SnapshotProcess`](crate::snapshot::SnapshotProcess) for offline images.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::addr::Address;
use crate::error::Error;
use crate::region::Region;

/// Runtime state from `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    TracingStop,
    Dead,
    Idle,
    Unknown(char),
}

impl ProcessState {
    fn from_code(code: char) -> ProcessState {
        match code {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskSleep,
            'Z' => ProcessState::Zombie,
            'T' => ProcessState::Stopped,
            't' => ProcessState::TracingStop,
            'X' | 'x' => ProcessState::Dead,
            'I' => ProcessState::Idle,
            other => ProcessState::Unknown(other),
        }
    }
}

/// One remote range of a scatter/gather transfer.
#[derive(Debug, Clone, Copy)]
pub struct RemoteRange {
    pub addr: Address,
    pub len: usize,
}

/// Capability set over one target process.
///
/// The scalar calls mirror `read(2)` conventions: the return value is the
/// byte count actually moved, `-1` is an error, and a short count is a
/// partial success the caller must handle. The vectored calls copy bytes in
/// order, spanning range boundaries on either side, and stop at the first
/// failing byte or when the shorter side runs out.
pub trait ProcessPort: Send + Sync {
    fn pid(&self) -> i32;

    fn read(&self, addr: Address, buf: &mut [u8]) -> isize;
    fn write(&self, addr: Address, buf: &[u8]) -> isize;

    fn read_vectored(&self, local: &mut [&mut [u8]], remote: &[RemoteRange]) -> isize;
    fn write_vectored(&self, local: &[&[u8]], remote: &[RemoteRange]) -> isize;

    /// SIGSTOP the target; with `same_user_too`, every other process of the
    /// same owner first (excluding the target and this process).
    fn suspend(&self, same_user_too: bool) -> bool;
    /// SIGCONT, same fan-out rule as [`ProcessPort::suspend`].
    fn resume(&self, same_user_too: bool) -> bool;

    fn state(&self) -> ProcessState;

    fn regions(&self) -> Result<Vec<Region>, Error>;
}

/// A live target addressed by PID.
#[derive(Debug, Clone, Copy)]
pub struct LiveProcess {
    pid: libc::pid_t,
}

impl LiveProcess {
    pub fn new(pid: i32) -> Self {
        LiveProcess { pid }
    }
}

/// `process_vm_readv`/`writev` accept at most `IOV_MAX` ranges per side.
const IOV_CHUNK: usize = libc::UIO_MAXIOV as usize;

enum Direction {
    Read,
    Write,
}

/// Run one scatter/gather transfer, chunking the remote side by `IOV_CHUNK`
/// and sliding a byte cursor over the local ranges. `EINTR` and every other
/// mid-stream failure terminate the transfer with the bytes moved so far;
/// only a failure before any byte moved reports `-1`.
fn transfer(
    pid: libc::pid_t,
    dir: Direction,
    local: &[(*mut u8, usize)],
    remote: &[RemoteRange],
) -> isize {
    let mut total: isize = 0;
    // Cursor into the local ranges: index plus bytes already consumed there.
    let mut li = 0usize;
    let mut loff = 0usize;

    let mut rstart = 0usize;
    while rstart < remote.len() {
        let rchunk = &remote[rstart..remote.len().min(rstart + IOV_CHUNK)];
        let want: usize = rchunk.iter().map(|r| r.len).sum();

        let mut liov: Vec<libc::iovec> = Vec::new();
        let mut gathered = 0usize;
        let (mut i, mut off) = (li, loff);
        while gathered < want && i < local.len() && liov.len() < IOV_CHUNK {
            let (base, len) = local[i];
            let avail = len - off;
            let take = avail.min(want - gathered);
            if take > 0 {
                liov.push(libc::iovec {
                    iov_base: unsafe { base.add(off) } as *mut libc::c_void,
                    iov_len: take,
                });
            }
            gathered += take;
            if off + take == len {
                i += 1;
                off = 0;
            } else {
                off += take;
            }
        }
        if liov.is_empty() {
            break; // local side exhausted
        }

        let riov: Vec<libc::iovec> = rchunk
            .iter()
            .map(|r| libc::iovec {
                iov_base: r.addr.get() as *mut libc::c_void,
                iov_len: r.len,
            })
            .collect();

        let moved = unsafe {
            match dir {
                Direction::Read => libc::process_vm_readv(
                    pid,
                    liov.as_ptr(),
                    liov.len() as libc::c_ulong,
                    riov.as_ptr(),
                    riov.len() as libc::c_ulong,
                    0,
                ),
                Direction::Write => libc::process_vm_writev(
                    pid,
                    liov.as_ptr(),
                    liov.len() as libc::c_ulong,
                    riov.as_ptr(),
                    riov.len() as libc::c_ulong,
                    0,
                ),
            }
        };

        if moved < 0 {
            return if total == 0 { -1 } else { total };
        }
        total += moved;

        // Advance the local cursor by the bytes actually moved.
        let mut left = moved as usize;
        while left > 0 && li < local.len() {
            let avail = local[li].1 - loff;
            if left >= avail {
                left -= avail;
                li += 1;
                loff = 0;
            } else {
                loff += left;
                left = 0;
            }
        }

        if (moved as usize) < want {
            break; // partial transfer, do not probe further
        }
        rstart += rchunk.len();
    }
    total
}

/// Signal every other process owned by the same user as `pid`.
fn signal_same_user(pid: libc::pid_t, signal: libc::c_int) {
    let me = std::process::id() as libc::pid_t;
    let Ok(target_meta) = fs::metadata(format!("/proc/{pid}")) else {
        return;
    };
    let uid = target_meta.uid();

    let Ok(entries) = fs::read_dir("/proc") else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(other) = name.to_str().and_then(|s| s.parse::<libc::pid_t>().ok()) else {
            continue;
        };
        if other == pid || other == me {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if meta.uid() != uid {
            continue;
        }
        unsafe {
            libc::kill(other, signal);
        }
    }
}

impl ProcessPort for LiveProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn read(&self, addr: Address, buf: &mut [u8]) -> isize {
        let remote = [RemoteRange {
            addr,
            len: buf.len(),
        }];
        transfer(
            self.pid,
            Direction::Read,
            &[(buf.as_mut_ptr(), buf.len())],
            &remote,
        )
    }

    fn write(&self, addr: Address, buf: &[u8]) -> isize {
        let remote = [RemoteRange {
            addr,
            len: buf.len(),
        }];
        transfer(
            self.pid,
            Direction::Write,
            &[(buf.as_ptr() as *mut u8, buf.len())],
            &remote,
        )
    }

    fn read_vectored(&self, local: &mut [&mut [u8]], remote: &[RemoteRange]) -> isize {
        let ranges: Vec<(*mut u8, usize)> =
            local.iter_mut().map(|b| (b.as_mut_ptr(), b.len())).collect();
        transfer(self.pid, Direction::Read, &ranges, remote)
    }

    fn write_vectored(&self, local: &[&[u8]], remote: &[RemoteRange]) -> isize {
        let ranges: Vec<(*mut u8, usize)> = local
            .iter()
            .map(|b| (b.as_ptr() as *mut u8, b.len()))
            .collect();
        transfer(self.pid, Direction::Write, &ranges, remote)
    }

    fn suspend(&self, same_user_too: bool) -> bool {
        if same_user_too {
            signal_same_user(self.pid, libc::SIGSTOP);
        }
        unsafe { libc::kill(self.pid, libc::SIGSTOP) == 0 }
    }

    fn resume(&self, same_user_too: bool) -> bool {
        if same_user_too {
            signal_same_user(self.pid, libc::SIGCONT);
        }
        unsafe { libc::kill(self.pid, libc::SIGCONT) == 0 }
    }

    fn state(&self) -> ProcessState {
        let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", self.pid)) else {
            return ProcessState::Dead;
        };
        // `pid (comm) S ...` — comm may contain spaces and parentheses, so
        // scan from the last ')'.
        stat.rfind(')')
            .and_then(|i| stat[i + 1..].trim_start().chars().next())
            .map(ProcessState::from_code)
            .unwrap_or(ProcessState::Unknown('?'))
    }

    fn regions(&self) -> Result<Vec<Region>, Error> {
        crate::region::snapshot(self.pid)
    }
}

/// Suspend a running target for the lifetime of the guard, resume on drop.
/// Targets that are not currently running are left alone.
pub struct ScopedSuspend<'a> {
    port: Option<&'a dyn ProcessPort>,
    same_user_too: bool,
}

impl<'a> ScopedSuspend<'a> {
    pub fn new(port: &'a dyn ProcessPort, same_user_too: bool) -> Self {
        let active = port.state() == ProcessState::Running && port.suspend(same_user_too);
        ScopedSuspend {
            port: active.then_some(port),
            same_user_too,
        }
    }
}

impl Drop for ScopedSuspend<'_> {
    fn drop(&mut self) {
        if let Some(port) = self.port {
            port.resume(self.same_user_too);
        }
    }
}

/// `comm` of a PID, without the trailing newline.
pub fn read_comm(pid: i32) -> Option<String> {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// Command line of a PID with NUL separators flattened to spaces.
pub fn read_cmdline(pid: i32) -> Option<String> {
    let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let text: String = raw
        .iter()
        .map(|&b| if b == 0 { ' ' } else { b as char })
        .collect();
    Some(text.trim_end().to_string())
}

/// Find the first PID whose `comm` or executable base name matches `name`
/// (case-insensitive).
pub fn find_process_by_name(name: &str) -> Option<i32> {
    let target = name.to_ascii_lowercase();

    for entry in fs::read_dir(Path::new("/proc")).ok()?.flatten() {
        let fname = entry.file_name();
        let Some(pid) = fname.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if let Some(comm) = read_comm(pid) {
            if comm.to_ascii_lowercase() == target {
                return Some(pid);
            }
        }
        if let Ok(link) = fs::read_link(entry.path().join("exe")) {
            if let Some(base) = link.file_name().and_then(|s| s.to_str()) {
                if base.to_ascii_lowercase() == target {
                    return Some(pid);
                }
            }
        }
    }
    None
}
