//! Shared in-memory process port for integration tests.

use std::sync::Mutex;

use libmemsift::addr::Address;
use libmemsift::process::{ProcessPort, ProcessState, RemoteRange};
use libmemsift::region::{Protection, Region};
use libmemsift::Error;

/// A fake target: one or more byte images at fixed addresses, readable and
/// writable through the port interface.
pub struct MockPort {
    segments: Vec<(usize, Mutex<Vec<u8>>)>,
    prot: Protection,
}

#[allow(dead_code)]
impl MockPort {
    pub fn new(base: usize, data: Vec<u8>) -> Self {
        MockPort {
            segments: vec![(base, Mutex::new(data))],
            prot: Protection::READ_WRITE,
        }
    }

    pub fn with_segment(mut self, base: usize, data: Vec<u8>) -> Self {
        self.segments.push((base, Mutex::new(data)));
        self
    }

    pub fn poke(&self, addr: usize, bytes: &[u8]) {
        assert!(self.write(Address::new(addr), bytes) == bytes.len() as isize);
    }

    fn locate(&self, addr: usize) -> Option<(usize, &Mutex<Vec<u8>>)> {
        for (base, data) in &self.segments {
            let len = data.lock().unwrap().len();
            if addr >= *base && addr < *base + len {
                return Some((addr - *base, data));
            }
        }
        None
    }
}

impl ProcessPort for MockPort {
    fn pid(&self) -> i32 {
        0
    }

    fn read(&self, addr: Address, buf: &mut [u8]) -> isize {
        let Some((offset, data)) = self.locate(addr.get()) else {
            return 0;
        };
        let data = data.lock().unwrap();
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n as isize
    }

    fn write(&self, addr: Address, buf: &[u8]) -> isize {
        let Some((offset, data)) = self.locate(addr.get()) else {
            return -1;
        };
        let mut data = data.lock().unwrap();
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n as isize
    }

    fn read_vectored(&self, local: &mut [&mut [u8]], remote: &[RemoteRange]) -> isize {
        let mut total = 0isize;
        let mut li = 0;
        let mut loff = 0;
        for range in remote {
            if li >= local.len() {
                break;
            }
            let mut scratch = vec![0u8; range.len];
            let got = self.read(range.addr, &mut scratch);
            if got < 0 {
                break;
            }
            let got = got as usize;
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
        let mut li = 0;
        let mut loff = 0;
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
            let wrote = self.write(range.addr, &scratch);
            if wrote < 0 {
                break;
            }
            total += wrote;
            if (wrote as usize) < range.len {
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
        Ok(self
            .segments
            .iter()
            .map(|(base, data)| Region {
                begin: Address::new(*base),
                end: Address::new(*base + data.lock().unwrap().len()),
                prot: self.prot,
                shared: false,
                file: String::new(),
                desc: "[mock]".into(),
                offset: 0,
                major: 0,
                minor: 0,
                inode: 0,
                deleted: false,
            })
            .collect())
    }
}
