//! End-to-end narrowing against this very process: scan, mutate the target
//! value, filter, repeat until one address remains.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr;
use std::sync::Arc;

use libmemsift::{Address, LiveProcess, ScanDescriptor, Session, TypeSet};

fn self_session() -> Session {
    let port = Arc::new(LiveProcess::new(std::process::id() as i32));
    Session::new(port).unwrap()
}

fn contains(session: &Session, addr: usize) -> bool {
    session.matches().any(|m| m.addr == Address::new(addr))
}

#[test]
fn narrow_an_i32_down_to_its_address() {
    let mut target = Box::new(24831i32);
    let addr = &*target as *const i32 as usize;
    let set = |b: &mut Box<i32>, v: i32| unsafe { ptr::write_volatile(&mut **b, v) };

    let mut session = self_session();
    let descriptor = ScanDescriptor::new("=[24830,24835]", TypeSet::I32).with_step(1);
    let added = session.scan(&descriptor).unwrap();
    assert!(added >= 1);
    assert!(contains(&session, addr), "helper not found by the scan");

    set(&mut target, 24832);
    session.filter(">").unwrap();
    assert!(contains(&session, addr), "lost after the '>' filter");

    set(&mut target, 24831);
    session.filter("<").unwrap();
    assert!(contains(&session, addr), "lost after the '<' filter");

    set(&mut target, 0x203751);
    let left = session.filter("$new=0x203751").unwrap();
    assert_eq!(left, 1);
    assert_eq!(session.at(0).unwrap().addr, Address::new(addr));
    assert_eq!(session.at(0).unwrap().value, libmemsift::Value::I32(0x203751));
}

#[test]
fn unaligned_u32_found_by_byte_stride_only() {
    // Two pages, with the value placed one byte before the page boundary so
    // it straddles the pages and sits off every 4-byte stride.
    let layout = Layout::from_size_align(8192, 4096).unwrap();
    let buf = unsafe { alloc_zeroed(layout) };
    assert!(!buf.is_null());
    let unaligned = unsafe { buf.add(4095) };
    unsafe { ptr::write_unaligned(unaligned as *mut u32, 0x109) };
    let addr = unaligned as usize;

    let mut session = self_session();
    let byte_stride = ScanDescriptor::new("=0x109", TypeSet::U32).with_step(1);
    session.scan(&byte_stride).unwrap();
    assert!(contains(&session, addr), "step 1 must see the straddling value");

    let mut aligned_session = self_session();
    let word_stride = ScanDescriptor::new("=0x109", TypeSet::U32).with_step(4);
    aligned_session.scan(&word_stride).unwrap();
    assert!(
        !contains(&aligned_session, addr),
        "step 4 is aligned to the region base and must miss offset 4095"
    );

    unsafe { dealloc(buf, layout) };
}

#[test]
fn update_all_tracks_mutation() {
    let mut target = Box::new(7_654_321i64);
    let addr = &*target as *const i64 as usize;

    let mut session = self_session();
    // Step 0 exercises the "use the narrowest type width" substitution;
    // a boxed i64 is 8-aligned, so the natural stride still lands on it.
    session
        .scan(&ScanDescriptor::new("=7654321", TypeSet::I64))
        .unwrap();
    assert!(contains(&session, addr));

    unsafe { ptr::write_volatile(&mut *target, 7_654_399) };
    session.update_all().unwrap();
    let m = session
        .matches()
        .find(|m| m.addr == Address::new(addr))
        .unwrap();
    assert_eq!(m.value, libmemsift::Value::I64(7_654_399));
}
