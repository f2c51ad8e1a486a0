//! The scan driver: every candidate offset of every requested type, through
//! the streamer, against a typed fast-path comparator or a JIT predicate.

use log::warn;

use crate::addr::Address;
use crate::buffer::ScanBuffer;
use crate::comparators::FastCmp;
use crate::error::Error;
use crate::expr::{Comparator, ComparatorKind, Signedness};
use crate::jit::JitCode;
use crate::process::ProcessPort;
use crate::region::{Protection, Region};
use crate::store::{Match, MatchStore};
use crate::streamer::MemoryStreamer;
use crate::value::{TypeSet, TypeTag, Value};

/// One scan request.
#[derive(Debug, Clone)]
pub struct ScanDescriptor {
    /// Comparator text, e.g. `= 24831`, `=[10,20]`, `$new & 0xff`.
    pub expression: String,
    pub types: TypeSet,
    /// Stride in bytes; `0` means "width of the narrowest requested type".
    pub step: usize,
    /// Only regions carrying all of these bits are visited.
    pub protection: Protection,
}

impl ScanDescriptor {
    pub fn new(expression: impl Into<String>, types: TypeSet) -> Self {
        ScanDescriptor {
            expression: expression.into(),
            types,
            step: 0,
            protection: Protection::READ_WRITE,
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }
}

/// Per-type scan predicate: a pre-cast constant comparator, or compiled
/// code observing `(old = 0, new = value, addr)`.
enum Predicate<'a, T> {
    Fast(FastCmp<T>),
    Jit(&'a JitCode),
}

/// Scalar types the strided loop can decode and test.
trait ScanScalar: Copy {
    const TAG: TypeTag;
    const WIDTH: usize;
    fn read_at(buf: &[u8], offset: usize) -> Option<Self>;
    fn to_word(self) -> u64;
    fn into_value(self) -> Value;
    fn cast_constant(c: u64) -> Self;
    fn fast_accept(cmp: &FastCmp<Self>, v: Self) -> bool;
}

macro_rules! impl_scan_scalar {
    ($($t:ty => $tag:ident, $word:expr;)*) => {$(
        impl ScanScalar for $t {
            const TAG: TypeTag = TypeTag::$tag;
            const WIDTH: usize = size_of::<$t>();

            fn read_at(buf: &[u8], offset: usize) -> Option<Self> {
                let bytes = buf.get(offset..offset + Self::WIDTH)?;
                Some(<$t>::from_le_bytes(bytes.try_into().ok()?))
            }

            fn to_word(self) -> u64 {
                let f: fn($t) -> u64 = $word;
                f(self)
            }

            fn into_value(self) -> Value {
                Value::$tag(self)
            }

            fn cast_constant(c: u64) -> Self {
                c as $t
            }

            fn fast_accept(cmp: &FastCmp<$t>, v: $t) -> bool {
                cmp.accept(v)
            }
        }
    )*};
}

impl_scan_scalar! {
    u8 => U8, |v| v as u64;
    u16 => U16, |v| v as u64;
    u32 => U32, |v| v as u64;
    u64 => U64, |v| v;
    i8 => I8, |v| v as i64 as u64;
    i16 => I16, |v| v as i64 as u64;
    i32 => I32, |v| v as i64 as u64;
    i64 => I64, |v| v as i64 as u64;
    // Floats never reach the JIT path, so the word image is unused.
    f32 => F32, |_| 0;
    f64 => F64, |_| 0;
}

impl<T: ScanScalar> Predicate<'_, T> {
    #[inline]
    fn accept(&self, v: T, addr: Address) -> bool {
        match self {
            Predicate::Fast(cmp) => T::fast_accept(cmp, v),
            Predicate::Jit(code) => code.call(0, v.to_word(), addr.get() as u64) != 0,
        }
    }
}

/// Everything a scan pass needs besides the store.
pub(crate) struct ScanContext<'a> {
    pub port: &'a dyn ProcessPort,
    pub buffer: &'a mut ScanBuffer,
    pub regions: &'a [Region],
}

/// Run one scan into `store`. Returns the number of matches added.
pub(crate) fn run_scan(
    ctx: &mut ScanContext<'_>,
    store: &mut MatchStore,
    descriptor: &ScanDescriptor,
) -> Result<usize, Error> {
    if descriptor.types.is_empty() {
        return Err(Error::InvalidDescriptor("no type tag requested".into()));
    }

    let comparator = Comparator::parse(&descriptor.expression)?;
    match comparator.kind {
        ComparatorKind::None => {
            return Err(Error::InvalidDescriptor("empty filter expression".into()));
        }
        kind if kind.compares_previous() => {
            return Err(Error::InvalidDescriptor(
                "a scan has no previous value to compare against".into(),
            ));
        }
        _ => {}
    }

    let mut step = descriptor.step;
    if step == 0 {
        step = descriptor
            .types
            .narrowest_width()
            .ok_or_else(|| Error::InvalidDescriptor("no scannable type".into()))?;
        warn!("step size unspecified, using the narrowest type width {step}");
    }

    // One compiled pair serves every integral type of the pass.
    let jit = if comparator.fast_path() {
        None
    } else {
        Some((
            comparator.compile(Signedness::Signed)?,
            comparator.compile(Signedness::Unsigned)?,
        ))
    };

    let before = store.len();
    for (bit, tag) in TypeSet::SCAN_ORDER {
        if !descriptor.types.contains(bit) {
            continue;
        }
        scan_one_type(ctx, store, &comparator, jit.as_ref(), tag, step, descriptor)?;
    }
    Ok(store.len() - before)
}

fn scan_one_type(
    ctx: &mut ScanContext<'_>,
    store: &mut MatchStore,
    comparator: &Comparator,
    jit: Option<&(JitCode, JitCode)>,
    tag: TypeTag,
    step: usize,
    descriptor: &ScanDescriptor,
) -> Result<(), Error> {
    match tag {
        TypeTag::U8 => scan_typed::<u8>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::U16 => scan_typed::<u16>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::U32 => scan_typed::<u32>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::U64 => scan_typed::<u64>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::I8 => scan_typed::<i8>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::I16 => scan_typed::<i16>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::I32 => scan_typed::<i32>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::I64 => scan_typed::<i64>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::F32 => scan_typed::<f32>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::F64 => scan_typed::<f64>(ctx, store, comparator, jit, step, descriptor),
        TypeTag::Bytes => Ok(()),
    }
}

/// Constant comparator for type `T`, when the shape allows one.
fn fast_cmp_for<T: ScanScalar>(comparator: &Comparator) -> Option<FastCmp<T>> {
    let c1 = comparator.constant1?;
    Some(match comparator.kind {
        ComparatorKind::EqExpr => FastCmp::Eq(T::cast_constant(c1)),
        ComparatorKind::NeExpr => FastCmp::Ne(T::cast_constant(c1)),
        ComparatorKind::GtExpr => FastCmp::Gt(T::cast_constant(c1)),
        ComparatorKind::GeExpr => FastCmp::Ge(T::cast_constant(c1)),
        ComparatorKind::LtExpr => FastCmp::Lt(T::cast_constant(c1)),
        ComparatorKind::LeExpr => FastCmp::Le(T::cast_constant(c1)),
        ComparatorKind::EqRange | ComparatorKind::NeRange => FastCmp::Range {
            lo: T::cast_constant(c1),
            hi: T::cast_constant(comparator.constant2?),
            invert: comparator.kind == ComparatorKind::NeRange,
        },
        ComparatorKind::EqMask | ComparatorKind::NeMask => {
            if !T::TAG.is_integer() {
                return None;
            }
            FastCmp::Mask {
                value: T::cast_constant(c1),
                mask: T::cast_constant(comparator.constant2?),
                invert: comparator.kind == ComparatorKind::NeMask,
            }
        }
        _ => return None,
    })
}

fn scan_typed<T: ScanScalar>(
    ctx: &mut ScanContext<'_>,
    store: &mut MatchStore,
    comparator: &Comparator,
    jit: Option<&(JitCode, JitCode)>,
    step: usize,
    descriptor: &ScanDescriptor,
) -> Result<(), Error> {
    let predicate: Predicate<'_, T> = match jit {
        None => match fast_cmp_for::<T>(comparator) {
            Some(cmp) => Predicate::Fast(cmp),
            None => {
                warn!("{} does not support this comparator, skipping", T::TAG);
                return Ok(());
            }
        },
        Some((signed, unsigned)) => {
            if !T::TAG.is_integer() {
                warn!("complex expressions apply to integer scans only, skipping {}", T::TAG);
                return Ok(());
            }
            Predicate::Jit(if T::TAG.is_signed() { signed } else { unsigned })
        }
    };

    for region in ctx.regions {
        if !region.prot.contains(descriptor.protection) {
            continue;
        }
        let mut streamer =
            MemoryStreamer::new(ctx.port, ctx.buffer, region.begin, region.end, step)?;
        loop {
            match streamer.next() {
                Ok(true) => {}
                Ok(false) => break,
                Err(Error::ReadFailed { addr, len }) => {
                    // Abort this region, carry on with the next one.
                    warn!("read failed at {addr} ({len} bytes), skipping rest of region");
                    break;
                }
                Err(other) => return Err(other),
            }
            let base = streamer.address_begin();
            let window_len = streamer.window().len();
            let look = streamer.lookahead();

            let mut offset = 0;
            while offset < window_len {
                if let Some(v) = T::read_at(look, offset) {
                    if predicate.accept(v, base + offset) {
                        store.extend(Match {
                            addr: base + offset,
                            value: v.into_value(),
                        });
                    }
                }
                offset += step;
            }
        }
    }
    Ok(())
}
