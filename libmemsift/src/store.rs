//! The match store: every location a scan accepted, with the value it held
//! when last observed.
//!
//! Filters re-read the current value of every match in one scatter/gather
//! pass, apply the predicate to `(old, new, addr)`, and retain survivors in
//! their original order with `old` replaced by `new`. A failed pass leaves
//! the store untouched; survivors are collected into a fresh vector that is
//! swapped in only at the end.

use crate::addr::Address;
use crate::comparators::FastCmp;
use crate::error::Error;
use crate::expr::ComparatorKind;
use crate::jit::JitCode;
use crate::process::{ProcessPort, RemoteRange};
use crate::value::{TypeTag, Value};

/// One discovered location.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub addr: Address,
    pub value: Value,
}

impl Match {
    pub fn tag(&self) -> TypeTag {
        self.value.tag()
    }

    pub fn size(&self) -> usize {
        self.value.size()
    }
}

/// Insertion-ordered set of matches for one session.
#[derive(Debug, Default)]
pub struct MatchStore {
    matches: Vec<Match>,
}

/// Constant filter operations, dispatched without the JIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    RangeEq,
    RangeNe,
    MaskEq,
    MaskNe,
}

impl FilterKind {
    /// The constant filter matching a comparator shape, when one exists.
    pub fn from_comparator(kind: ComparatorKind) -> Option<FilterKind> {
        Some(match kind {
            ComparatorKind::EqExpr => FilterKind::Eq,
            ComparatorKind::NeExpr => FilterKind::Ne,
            ComparatorKind::GtExpr => FilterKind::Gt,
            ComparatorKind::GeExpr => FilterKind::Ge,
            ComparatorKind::LtExpr => FilterKind::Lt,
            ComparatorKind::LeExpr => FilterKind::Le,
            ComparatorKind::EqRange => FilterKind::RangeEq,
            ComparatorKind::NeRange => FilterKind::RangeNe,
            ComparatorKind::EqMask => FilterKind::MaskEq,
            ComparatorKind::NeMask => FilterKind::MaskNe,
            _ => return None,
        })
    }
}

/// Relational ops for the operand-less filters (`=`, `!=`, `<`, …):
/// current value against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ChangeOp {
    pub fn from_comparator(kind: ComparatorKind) -> Option<ChangeOp> {
        Some(match kind {
            ComparatorKind::Eq => ChangeOp::Eq,
            ComparatorKind::Ne => ChangeOp::Ne,
            ComparatorKind::Gt => ChangeOp::Gt,
            ComparatorKind::Ge => ChangeOp::Ge,
            ComparatorKind::Lt => ChangeOp::Lt,
            ComparatorKind::Le => ChangeOp::Le,
            _ => return None,
        })
    }
}

macro_rules! typed_constant_filter {
    ($kind:expr, $c1:expr, $c2:expr, $v:expr, $t:ty) => {{
        let cmp: FastCmp<$t> = match $kind {
            FilterKind::Eq => FastCmp::Eq($c1 as $t),
            FilterKind::Ne => FastCmp::Ne($c1 as $t),
            FilterKind::Gt => FastCmp::Gt($c1 as $t),
            FilterKind::Ge => FastCmp::Ge($c1 as $t),
            FilterKind::Lt => FastCmp::Lt($c1 as $t),
            FilterKind::Le => FastCmp::Le($c1 as $t),
            FilterKind::RangeEq => FastCmp::Range {
                lo: $c1 as $t,
                hi: $c2 as $t,
                invert: false,
            },
            FilterKind::RangeNe => FastCmp::Range {
                lo: $c1 as $t,
                hi: $c2 as $t,
                invert: true,
            },
            FilterKind::MaskEq | FilterKind::MaskNe => unreachable!("handled by caller"),
        };
        cmp.accept($v)
    }};
}

impl MatchStore {
    pub fn new() -> Self {
        MatchStore::default()
    }

    pub fn extend(&mut self, m: Match) {
        self.matches.push(m);
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&Match> {
        self.matches.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.matches.iter()
    }

    pub fn reset(&mut self) {
        self.matches.clear();
    }

    /// Number of matches the complex (JIT) filter cannot apply to.
    pub fn non_integer_count(&self) -> usize {
        self.matches.iter().filter(|m| !m.tag().is_integer()).count()
    }

    /// Re-read the current bytes of every match in one gather pass.
    /// Returns the per-match byte offsets and the count of bytes actually
    /// read; matches beyond the read count keep their stale value.
    fn bulk_read(&self, port: &dyn ProcessPort) -> Result<(Vec<u8>, Vec<usize>, usize), Error> {
        let total: usize = self.matches.iter().map(Match::size).sum();
        let mut buffer = vec![0u8; total];
        let mut offsets = Vec::with_capacity(self.matches.len());

        let mut offset = 0;
        let remote: Vec<RemoteRange> = self
            .matches
            .iter()
            .map(|m| {
                offsets.push(offset);
                offset += m.size();
                RemoteRange {
                    addr: m.addr,
                    len: m.size(),
                }
            })
            .collect();

        if total == 0 {
            return Ok((buffer, offsets, 0));
        }
        let copied = port.read_vectored(&mut [&mut buffer[..]], &remote);
        if copied < 0 {
            return Err(Error::ReadFailed {
                addr: self.matches[0].addr,
                len: total,
            });
        }
        Ok((buffer, offsets, copied as usize))
    }

    /// Overwrite every match's `last_value` with the target's current bytes.
    /// Idempotent while the target is suspended.
    pub fn update_all(&mut self, port: &dyn ProcessPort) -> Result<(), Error> {
        let (buffer, offsets, copied) = self.bulk_read(port)?;
        for (m, off) in self.matches.iter_mut().zip(offsets) {
            let size = m.value.size();
            if off + size <= copied {
                m.value.overwrite(&buffer[off..off + size]);
            }
        }
        Ok(())
    }

    /// Retain matches whose *current* value passes the constant test, with
    /// the constants cast to each match's own type. `Bytes` matches are
    /// retained unmodified. Side effect on survivors: `last_value` becomes
    /// the current value.
    pub fn filter_constants(
        &mut self,
        port: &dyn ProcessPort,
        kind: FilterKind,
        c1: u64,
        c2: u64,
    ) -> Result<usize, Error> {
        let (buffer, offsets, copied) = self.bulk_read(port)?;
        self.retain_filtered(&buffer, &offsets, copied, |_old, current| {
            Some(match *current {
                Value::U8(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::U16(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::U32(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::U64(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::I8(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::I16(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::I32(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::I64(v) => typed_mask_or_constant(kind, c1, c2, v),
                Value::F32(v) => typed_float_constant(kind, c1, c2, v)?,
                Value::F64(v) => typed_float_constant(kind, c1, c2, v)?,
                Value::Bytes(_) => return None,
            })
        });
        Ok(self.len())
    }

    /// Operand-less filter: current value against the stored one.
    pub fn filter_previous(
        &mut self,
        port: &dyn ProcessPort,
        op: ChangeOp,
    ) -> Result<usize, Error> {
        let (buffer, offsets, copied) = self.bulk_read(port)?;
        self.retain_filtered(&buffer, &offsets, copied, |old, current| {
            compare_values(op, current, old)
        });
        Ok(self.len())
    }

    /// Complex predicate filter. Integral matches feed
    /// `(old, new, addr)` into the compiled code matching their signedness;
    /// floating-point and `Bytes` matches are retained unmodified (the
    /// caller surfaces the warning).
    pub fn filter_predicate(
        &mut self,
        port: &dyn ProcessPort,
        signed: &JitCode,
        unsigned: &JitCode,
    ) -> Result<usize, Error> {
        let (buffer, offsets, copied) = self.bulk_read(port)?;
        self.retain_predicate(&buffer, &offsets, copied, signed, unsigned);
        Ok(self.len())
    }

    /// Shared retain loop: `test(old, current)` returns `Some(keep)` or
    /// `None` to retain without touching the stored value (type not
    /// applicable). Matches whose bytes were not covered by the read are
    /// dropped — their location can no longer be observed.
    fn retain_filtered<F>(&mut self, buffer: &[u8], offsets: &[usize], copied: usize, test: F)
    where
        F: Fn(&Value, &Value) -> Option<bool>,
    {
        let mut kept = Vec::with_capacity(self.matches.len());
        for (mut m, &off) in std::mem::take(&mut self.matches).into_iter().zip(offsets) {
            let size = m.value.size();
            if off + size > copied {
                continue;
            }
            let bytes = &buffer[off..off + size];
            let current = match m.tag() {
                TypeTag::Bytes => Value::Bytes(bytes.to_vec().into_boxed_slice()),
                tag => match Value::from_bytes(tag, bytes, 0) {
                    Some(v) => v,
                    None => continue,
                },
            };
            match test(&m.value, &current) {
                Some(true) => {
                    m.value = current;
                    kept.push(m);
                }
                Some(false) => {}
                None => kept.push(m),
            }
        }
        self.matches = kept;
    }

    fn retain_predicate(
        &mut self,
        buffer: &[u8],
        offsets: &[usize],
        copied: usize,
        signed: &JitCode,
        unsigned: &JitCode,
    ) {
        let mut kept = Vec::with_capacity(self.matches.len());
        for (mut m, &off) in std::mem::take(&mut self.matches).into_iter().zip(offsets) {
            let size = m.value.size();
            if off + size > copied {
                continue;
            }
            if !m.tag().is_integer() {
                kept.push(m);
                continue;
            }
            let bytes = &buffer[off..off + size];
            let Some(current) = Value::from_bytes(m.tag(), bytes, 0) else {
                continue;
            };
            let (Some(old_word), Some(new_word)) = (m.value.as_word(), current.as_word()) else {
                continue;
            };
            let code = if m.tag().is_signed() { signed } else { unsigned };
            if code.call(old_word, new_word, m.addr.get() as u64) != 0 {
                m.value = current;
                kept.push(m);
            }
        }
        self.matches = kept;
    }
}

fn typed_mask_or_constant<T>(kind: FilterKind, c1: u64, c2: u64, v: T) -> bool
where
    T: MaskFilter,
{
    T::accept(kind, c1, c2, v)
}

/// Integer scalars support every constant filter including masks.
trait MaskFilter: Sized {
    fn accept(kind: FilterKind, c1: u64, c2: u64, v: Self) -> bool;
}

macro_rules! impl_mask_filter {
    ($($t:ty),*) => {$(
        impl MaskFilter for $t {
            fn accept(kind: FilterKind, c1: u64, c2: u64, v: $t) -> bool {
                match kind {
                    FilterKind::MaskEq => FastCmp::Mask {
                        value: c1 as $t,
                        mask: c2 as $t,
                        invert: false,
                    }
                    .accept(v),
                    FilterKind::MaskNe => FastCmp::Mask {
                        value: c1 as $t,
                        mask: c2 as $t,
                        invert: true,
                    }
                    .accept(v),
                    other => typed_constant_filter!(other, c1, c2, v, $t),
                }
            }
        }
    )*};
}

impl_mask_filter!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Floats take the relational and range filters; a mask filter does not
/// apply, so those retain the match untouched (`None`).
fn typed_float_constant<T>(kind: FilterKind, c1: u64, c2: u64, v: T) -> Option<bool>
where
    T: FloatFilter,
{
    T::accept(kind, c1, c2, v)
}

trait FloatFilter: Sized {
    fn accept(kind: FilterKind, c1: u64, c2: u64, v: Self) -> Option<bool>;
}

macro_rules! impl_float_filter {
    ($($t:ty),*) => {$(
        impl FloatFilter for $t {
            fn accept(kind: FilterKind, c1: u64, c2: u64, v: $t) -> Option<bool> {
                match kind {
                    FilterKind::MaskEq | FilterKind::MaskNe => None,
                    other => Some(typed_constant_filter!(other, c1, c2, v, $t)),
                }
            }
        }
    )*};
}

impl_float_filter!(f32, f64);

/// Compare two values of the same type; `None` retains the match when the
/// combination does not apply.
fn compare_values(op: ChangeOp, current: &Value, old: &Value) -> Option<bool> {
    macro_rules! ord {
        ($a:expr, $b:expr) => {
            Some(match op {
                ChangeOp::Eq => $a == $b,
                ChangeOp::Ne => $a != $b,
                ChangeOp::Gt => $a > $b,
                ChangeOp::Ge => $a >= $b,
                ChangeOp::Lt => $a < $b,
                ChangeOp::Le => $a <= $b,
            })
        };
    }
    match (current, old) {
        (Value::U8(a), Value::U8(b)) => ord!(a, b),
        (Value::U16(a), Value::U16(b)) => ord!(a, b),
        (Value::U32(a), Value::U32(b)) => ord!(a, b),
        (Value::U64(a), Value::U64(b)) => ord!(a, b),
        (Value::I8(a), Value::I8(b)) => ord!(a, b),
        (Value::I16(a), Value::I16(b)) => ord!(a, b),
        (Value::I32(a), Value::I32(b)) => ord!(a, b),
        (Value::I64(a), Value::I64(b)) => ord!(a, b),
        (Value::F32(a), Value::F32(b)) => ord!(a, b),
        (Value::F64(a), Value::F64(b)) => ord!(a, b),
        (Value::Bytes(a), Value::Bytes(b)) => ord!(a, b),
        _ => None,
    }
}
