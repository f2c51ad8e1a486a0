//! Chunked streaming reads over one region.
//!
//! The streamer serves a region to the scan driver through the session's
//! [`ScanBuffer`] without allocating. Each successful [`next`] exposes a
//! window whose length is a multiple of the step; the `total mod step` tail
//! of each chunk is stashed in the carry slot and prepended to the next
//! window, so a strided scan never misses a stride that straddles a chunk
//! boundary.
//!
//! [`next`]: MemoryStreamer::next

use crate::addr::Address;
use crate::buffer::ScanBuffer;
use crate::error::Error;
use crate::process::ProcessPort;

pub struct MemoryStreamer<'a> {
    port: &'a dyn ProcessPort,
    arena: &'a mut [u8],
    capacity: usize,
    page: usize,

    addr: Address,
    end: Address,
    step: usize,

    /// Carry bytes currently parked in the trailing slot.
    carry: usize,
    /// Current window as arena offsets.
    win: (usize, usize),
    /// Bytes of read-ahead sitting contiguously after the window.
    tail: usize,
    win_addr: Address,
    done: bool,
}

impl<'a> MemoryStreamer<'a> {
    pub fn new(
        port: &'a dyn ProcessPort,
        buffer: &'a mut ScanBuffer,
        begin: Address,
        end: Address,
        step: usize,
    ) -> Result<Self, Error> {
        if step == 0 {
            return Err(Error::InvalidDescriptor("step must be nonzero".into()));
        }
        let capacity = buffer.capacity();
        let page = buffer.page_size();
        if step > capacity || step > page {
            return Err(Error::InvalidDescriptor(format!(
                "step {step} exceeds the streaming buffer"
            )));
        }
        if begin >= end {
            return Err(Error::InvalidDescriptor("empty address range".into()));
        }
        Ok(MemoryStreamer {
            port,
            arena: buffer.as_mut_slice(),
            capacity,
            page,
            addr: begin,
            end,
            step,
            carry: 0,
            win: (0, 0),
            tail: 0,
            win_addr: begin,
            done: false,
        })
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Target address of the first byte of the current window.
    pub fn address_begin(&self) -> Address {
        self.win_addr
    }

    /// Current window; its length is always a multiple of the step.
    pub fn window(&self) -> &[u8] {
        &self.arena[self.win.0..self.win.1]
    }

    /// Window plus the read-ahead bytes that follow it contiguously in the
    /// arena. Candidates wider than the step may extend into the read-ahead
    /// without leaving bytes that were actually read.
    pub fn lookahead(&self) -> &[u8] {
        &self.arena[self.win.0..self.win.1 + self.tail]
    }

    /// Advance one chunk. `Ok(false)` once the region is exhausted or a read
    /// comes back empty; `Err(ReadFailed)` on a read error.
    pub fn next(&mut self) -> Result<bool, Error> {
        loop {
            if self.done || self.addr >= self.end {
                return Ok(false);
            }

            let want = self.capacity.min(self.end - self.addr);
            let chunk_at = self.page;
            let n = {
                let dst = &mut self.arena[chunk_at..chunk_at + want];
                self.port.read(self.addr, dst)
            };
            if n < 0 {
                self.done = true;
                return Err(Error::ReadFailed {
                    addr: self.addr,
                    len: want,
                });
            }
            let n = n as usize;
            if n == 0 {
                self.done = true;
                return Ok(false);
            }

            // Prepend the parked carry right before the chunk.
            let win_start = chunk_at - self.carry;
            let carry_slot = self.page + self.capacity;
            self.arena.copy_within(carry_slot..carry_slot + self.carry, win_start);

            let total = self.carry + n;
            let next_carry = total % self.step;
            let keep = total - next_carry;

            self.win_addr = self.addr - self.carry;
            self.addr += n;

            // Park the new carry for the next chunk.
            let tail_at = win_start + keep;
            self.arena.copy_within(tail_at..tail_at + next_carry, carry_slot);
            self.carry = next_carry;

            if keep == 0 {
                // Less than one stride so far; read more before yielding.
                continue;
            }

            self.win = (win_start, tail_at);
            self.tail = next_carry;
            return Ok(true);
        }
    }
}
