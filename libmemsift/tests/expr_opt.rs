//! Build-time constant folding: with the default flag on, constant trees
//! collapse to the same values the emitter produces with folding off (the
//! `expr_math` binary covers that side).

use libmemsift::expr::parse_expression;

fn fold(code: &str) -> u64 {
    parse_expression(code)
        .unwrap()
        .as_number()
        .unwrap_or_else(|| panic!("{code} did not fold to a literal"))
}

#[test]
fn arithmetic_folds() {
    assert_eq!(fold("0x123+100"), 0x123 + 100);
    assert_eq!(fold("0x123-100"), 0x123 - 100);
    assert_eq!(fold("0x123*100"), 0x123 * 100);
    assert_eq!(fold("0x123/100"), 0x123 / 100);
    assert_eq!(fold("0x123%100"), 0x123 % 100);
}

#[test]
fn precedence_folds() {
    assert_eq!(fold("0x10+0x3*0o5"), 0x1f);
    assert_eq!(fold("(0x10+0x3)*0o5"), (0x10 + 0x3) * 0o5);
    assert_eq!(fold("1+3&1"), 0);
    assert_eq!(fold("2&4|8"), 8);
    assert_eq!(fold("~1+2"), 0);
    assert_eq!(fold("1+3<<1"), 8);
    assert_eq!(fold("2>1|2"), 3);
}

#[test]
fn ternary_folds_to_the_taken_branch() {
    assert_eq!(fold("1?2:3"), 2);
    assert_eq!(fold("0?2:3"), 3);
}

#[test]
fn nested_trees_fold() {
    assert_eq!(fold("((10-2)+0x3)*((4+5)+(5-2))"), 132);
}

#[test]
fn references_do_not_fold() {
    let ast = parse_expression("$new+1").unwrap();
    assert!(ast.as_number().is_none());
}

#[test]
fn folded_ternary_keeps_unfolded_branch() {
    // The dead branch is discarded, the live one survives as-is.
    let ast = parse_expression("1?$new:$old").unwrap();
    assert!(ast.as_number().is_none());
    assert_eq!(ast.eval(7, 9, 0, libmemsift::Signedness::Unsigned), 9);
}
