//! Generated-code arithmetic with constant folding off, so every operator
//! actually goes through the emitter.

use libmemsift::expr::{parse_expression, set_constant_folding, Signedness};
use libmemsift::jit;

fn compile_and_run(code: &str) -> u64 {
    compile_and_run_with(code, 0, 0, 0)
}

fn compile_and_run_with(code: &str, old: u64, new: u64, addr: u64) -> u64 {
    set_constant_folding(false);
    let ast = parse_expression(code).unwrap();
    jit::compile(&ast, Signedness::Unsigned).unwrap().call(old, new, addr)
}

#[test]
fn literals() {
    assert_eq!(compile_and_run("0x123"), 0x123);
    assert_eq!(compile_and_run("0b11"), 0x3);
    assert_eq!(compile_and_run("0o755"), 493);
    assert_eq!(compile_and_run("123"), 123);
}

#[test]
fn arithmetic() {
    assert_eq!(compile_and_run("0x123+100"), 0x123 + 100);
    assert_eq!(compile_and_run("0x123-100"), 0x123 - 100);
    assert_eq!(compile_and_run("0x123*100"), 0x123 * 100);
    assert_eq!(compile_and_run("0x123/100"), 0x123 / 100);
    assert_eq!(compile_and_run("0x123%100"), 0x123 % 100);
}

#[test]
fn precedence() {
    assert_eq!(compile_and_run("0x10+0x3*0o5"), 0x1f);
    assert_eq!(compile_and_run("(0x10+0x3)*0o5"), (0x10 + 0x3) * 0o5);
    assert_eq!(compile_and_run("1+3&1"), 0);
    assert_eq!(compile_and_run("2&4|8"), 8);
    assert_eq!(compile_and_run("~1+2"), 0);
    assert_eq!(compile_and_run("1+3<<1"), 8);
    assert_eq!(compile_and_run("2>1|2"), 3);
}

#[test]
fn ternary() {
    assert_eq!(compile_and_run("1?2:3"), 2);
    assert_eq!(compile_and_run("0?2:3"), 3);
}

#[test]
fn nested_subtrees_spill() {
    assert_eq!(compile_and_run("((10-2)+0x3)*((4+5)+(5-2))"), 132);
}

#[test]
fn logical_operators() {
    assert_eq!(compile_and_run("1&&2"), 1);
    assert_eq!(compile_and_run("1&&0"), 0);
    assert_eq!(compile_and_run("0||0"), 0);
    assert_eq!(compile_and_run("0||3"), 1);
    assert_eq!(compile_and_run("!0"), 1);
    assert_eq!(compile_and_run("!7"), 0);
}

#[test]
fn references() {
    assert_eq!(compile_and_run_with("$old", 13, 12, 3), 13);
    assert_eq!(compile_and_run_with("$new", 1, 2, 3), 2);
    assert_eq!(compile_and_run_with("$addr", 1, 2, 3), 3);
    assert_eq!(compile_and_run_with("$address", 1, 2, 3), 3);
    assert_eq!(compile_and_run_with("$old+1", 99, 0, 0), 100);
}

#[test]
fn wide_constants() {
    assert_eq!(compile_and_run("0xFFFFFFFFFFFFFFFF"), u64::MAX);
    assert_eq!(compile_and_run("0x8000000000000000|1"), 0x8000000000000001);
}
