//! Session orchestration: one target, one region snapshot, one streaming
//! buffer, one match set.

use std::sync::Arc;

use log::warn;

use crate::addr::Address;
use crate::buffer::{ScanBuffer, DEFAULT_CAPACITY};
use crate::error::Error;
use crate::expr::{Comparator, ComparatorKind, Signedness};
use crate::process::ProcessPort;
use crate::region::Region;
use crate::scanner::{run_scan, ScanContext, ScanDescriptor};
use crate::store::{ChangeOp, FilterKind, Match, MatchStore};
use crate::value::Value;

pub struct Session {
    port: Arc<dyn ProcessPort>,
    regions: Vec<Region>,
    store: MatchStore,
    buffer: ScanBuffer,
}

impl Session {
    /// A session with the default 8 MiB streaming buffer.
    pub fn new(port: Arc<dyn ProcessPort>) -> Result<Self, Error> {
        Session::with_capacity(port, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(port: Arc<dyn ProcessPort>, capacity: usize) -> Result<Self, Error> {
        Ok(Session {
            port,
            regions: Vec::new(),
            store: MatchStore::new(),
            buffer: ScanBuffer::new(capacity)?,
        })
    }

    pub fn port(&self) -> &dyn ProcessPort {
        self.port.as_ref()
    }

    /// Replace the cached region snapshot. `Ok(false)` when the table was
    /// readable but empty.
    pub fn refresh_regions(&mut self) -> Result<bool, Error> {
        self.regions = self.port.regions()?;
        Ok(!self.regions.is_empty())
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn find_region(&self, addr: Address) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Run a scan over the cached regions, appending matches.
    /// Returns the number of matches added.
    pub fn scan(&mut self, descriptor: &ScanDescriptor) -> Result<usize, Error> {
        if self.regions.is_empty() {
            self.refresh_regions()?;
        }
        let mut ctx = ScanContext {
            port: self.port.as_ref(),
            buffer: &mut self.buffer,
            regions: &self.regions,
        };
        run_scan(&mut ctx, &mut self.store, descriptor)
    }

    /// Filter the current match set with a comparator expression.
    /// Returns the number of surviving matches.
    pub fn filter(&mut self, expression: &str) -> Result<usize, Error> {
        let comparator = Comparator::parse(expression)?;
        match comparator.kind {
            ComparatorKind::None => {
                Err(Error::InvalidDescriptor("empty filter expression".into()))
            }
            kind if kind.compares_previous() => {
                let op = ChangeOp::from_comparator(kind)
                    .unwrap_or(ChangeOp::Eq);
                self.store.filter_previous(self.port.as_ref(), op)
            }
            kind if comparator.fast_path() => {
                let filter = FilterKind::from_comparator(kind)
                    .ok_or_else(|| Error::InvalidDescriptor("unsupported filter".into()))?;
                self.store.filter_constants(
                    self.port.as_ref(),
                    filter,
                    comparator.constant1.unwrap_or(0),
                    comparator.constant2.unwrap_or(0),
                )
            }
            _ => {
                if self.store.non_integer_count() > 0 {
                    warn!(
                        "complex filter expression will not be applied to {} non-integral matches",
                        self.store.non_integer_count()
                    );
                }
                let signed = comparator.compile(Signedness::Signed)?;
                let unsigned = comparator.compile(Signedness::Unsigned)?;
                self.store
                    .filter_predicate(self.port.as_ref(), &signed, &unsigned)
            }
        }
    }

    /// Re-read the current value of every match.
    pub fn update_all(&mut self) -> Result<(), Error> {
        self.store.update_all(self.port.as_ref())
    }

    /// Write a typed value into the target.
    pub fn write(&self, addr: Address, value: &Value) -> Result<(), Error> {
        let bytes = value.to_bytes();
        let written = self.port.write(addr, &bytes);
        if written != bytes.len() as isize {
            return Err(Error::WriteFailed {
                addr,
                len: bytes.len(),
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.store.reset();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&Match> {
        self.store.at(index)
    }

    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.store.iter()
    }

    /// Append a match from outside the scanner, e.g. a pointer-chase client.
    pub fn extend(&mut self, m: Match) {
        self.store.extend(m);
    }
}
