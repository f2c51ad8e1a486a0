//! Native code emission for predicate ASTs.
//!
//! Lowers an [`Ast`] to x86-64 of signature
//! `extern "sysv64" fn(old: u64, new: u64, addr: u64) -> u64`.
//!
//! Frame layout: the three arguments are copied to the bottom three stack
//! slots on entry so references load by fixed offset; above them sits a
//! spill area of `depth(root)` words for binary operands that cannot stay in
//! registers. `rax` is the accumulator, `rcx` the right-hand operand, `rdx`
//! scratch. Comparisons and the logical operators branch and materialize
//! 0/1; relational opcodes switch between unsigned and two's-complement
//! forms per [`Signedness`].

use std::fmt;

use dynasmrt::x64::Assembler;
use dynasmrt::{dynasm, AssemblyOffset, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use crate::error::Error;
use crate::expr::ast::{Ast, BinaryOp, Signedness, UnaryOp};

/// An owned buffer of executable predicate code. The pages are released on
/// drop; invocation is a plain indirect call.
pub struct JitCode {
    buf: ExecutableBuffer,
    entry: AssemblyOffset,
}

impl fmt::Debug for JitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitCode").field("len", &self.buf.len()).finish()
    }
}

impl JitCode {
    pub fn call(&self, old: u64, new: u64, addr: u64) -> u64 {
        let f: extern "sysv64" fn(u64, u64, u64) -> u64 =
            unsafe { std::mem::transmute(self.buf.ptr(self.entry)) };
        f(old, new, addr)
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }
}

/// Compile `ast` into a predicate. The returned artifact is self-contained;
/// the AST may be dropped afterwards.
pub fn compile(ast: &Ast, sign: Signedness) -> Result<JitCode, Error> {
    let ops = Assembler::new().map_err(|e| Error::Jit(format!("assembler: {e}")))?;
    let mut emitter = Emitter { ops, sign };

    let entry = emitter.ops.offset();
    let frame = ((ARG_SLOTS + ast.depth(0)) * 8) as i32;

    dynasm!(emitter.ops
        ; .arch x64
        ; sub rsp, frame
        ; mov [rsp], rdi
        ; mov [rsp + 8], rsi
        ; mov [rsp + 16], rdx
    );

    emitter.emit(ast, 0);

    dynasm!(emitter.ops
        ; .arch x64
        ; add rsp, frame
        ; ret
    );

    let buf = emitter
        .ops
        .finalize()
        .map_err(|_| Error::Jit("finalize failed".into()))?;
    Ok(JitCode { buf, entry })
}

/// Stack words reserved for the argument frame below the spill area.
const ARG_SLOTS: usize = 3;

fn spill_slot(depth: usize) -> i32 {
    ((ARG_SLOTS + depth) * 8) as i32
}

/// Leaves can be emitted straight into either operand register.
fn is_leaf(ast: &Ast) -> bool {
    matches!(ast, Ast::Number(_) | Ast::Ref(_))
}

struct Emitter {
    ops: Assembler,
    sign: Signedness,
}

impl Emitter {
    /// Emit `node`; the result lands in `rax`.
    fn emit(&mut self, node: &Ast, depth: usize) {
        match node {
            Ast::Number(_) | Ast::Ref(_) => self.emit_leaf(node, false),
            Ast::Unary { op, expr } => {
                self.emit(expr, depth);
                self.emit_unary(*op);
            }
            Ast::Binary { op, lhs, rhs } => {
                self.emit_operands(lhs, rhs, depth);
                self.emit_binary(*op);
            }
            Ast::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let els = self.ops.new_dynamic_label();
                let done = self.ops.new_dynamic_label();
                self.emit(cond, depth);
                dynasm!(self.ops ; .arch x64 ; test rax, rax ; jz =>els);
                self.emit(then, depth);
                dynasm!(self.ops ; .arch x64 ; jmp =>done ; =>els);
                self.emit(otherwise, depth);
                dynasm!(self.ops ; .arch x64 ; =>done);
            }
            Ast::Range {
                expr,
                lo,
                hi,
                invert,
            } => {
                let slot0 = spill_slot(depth);
                let slot1 = spill_slot(depth + 1);
                self.emit(expr, depth);
                dynasm!(self.ops ; .arch x64 ; mov [rsp + slot0], rax);
                self.emit(lo, depth + 1);
                dynasm!(self.ops ; .arch x64 ; mov [rsp + slot1], rax);
                self.emit(hi, depth + 2);

                let outside = self.ops.new_dynamic_label();
                let done = self.ops.new_dynamic_label();
                // rcx = expr; above the high bound or below the low bound
                // puts us outside.
                dynasm!(self.ops ; .arch x64 ; mov rcx, [rsp + slot0] ; cmp rcx, rax);
                match self.sign {
                    Signedness::Unsigned => dynasm!(self.ops ; .arch x64 ; ja =>outside),
                    Signedness::Signed => dynasm!(self.ops ; .arch x64 ; jg =>outside),
                }
                dynasm!(self.ops ; .arch x64 ; mov rax, [rsp + slot1] ; cmp rcx, rax);
                match self.sign {
                    Signedness::Unsigned => dynasm!(self.ops ; .arch x64 ; jb =>outside),
                    Signedness::Signed => dynasm!(self.ops ; .arch x64 ; jl =>outside),
                }
                let (inside_val, outside_val): (i32, i32) = if *invert { (0, 1) } else { (1, 0) };
                dynasm!(self.ops
                    ; .arch x64
                    ; mov eax, inside_val
                    ; jmp =>done
                    ; =>outside
                    ; mov eax, outside_val
                    ; =>done
                );
            }
            Ast::Mask {
                expr,
                value,
                mask,
                invert,
            } => {
                let slot0 = spill_slot(depth);
                let slot1 = spill_slot(depth + 1);
                self.emit(value, depth);
                dynasm!(self.ops ; .arch x64 ; mov [rsp + slot0], rax);
                self.emit(mask, depth + 1);
                dynasm!(self.ops ; .arch x64 ; mov [rsp + slot1], rax);
                self.emit(expr, depth + 2);

                let differ = self.ops.new_dynamic_label();
                let done = self.ops.new_dynamic_label();
                let (equal_val, differ_val): (i32, i32) = if *invert { (0, 1) } else { (1, 0) };
                dynasm!(self.ops
                    ; .arch x64
                    ; mov rcx, [rsp + slot0]
                    ; mov rdx, [rsp + slot1]
                    ; and rax, rdx
                    ; and rcx, rdx
                    ; cmp rax, rcx
                    ; jne =>differ
                    ; mov eax, equal_val
                    ; jmp =>done
                    ; =>differ
                    ; mov eax, differ_val
                    ; =>done
                );
            }
        }
    }

    /// Load a leaf into `rax`, or `rcx` when `into_rcx`.
    fn emit_leaf(&mut self, node: &Ast, into_rcx: bool) {
        match node {
            Ast::Number(v) => {
                let imm = *v as i64;
                if into_rcx {
                    dynasm!(self.ops ; .arch x64 ; mov rcx, QWORD imm);
                } else {
                    dynasm!(self.ops ; .arch x64 ; mov rax, QWORD imm);
                }
            }
            Ast::Ref(slot) => {
                let off = (slot.index() * 8) as i32;
                if into_rcx {
                    dynasm!(self.ops ; .arch x64 ; mov rcx, [rsp + off]);
                } else {
                    dynasm!(self.ops ; .arch x64 ; mov rax, [rsp + off]);
                }
            }
            _ => unreachable!("emit_leaf on a non-leaf node"),
        }
    }

    /// Evaluate both operands into `rax`/`rcx`, spilling only when neither
    /// side is a leaf.
    fn emit_operands(&mut self, lhs: &Ast, rhs: &Ast, depth: usize) {
        if is_leaf(rhs) {
            self.emit(lhs, depth);
            self.emit_leaf(rhs, true);
        } else if is_leaf(lhs) {
            self.emit(rhs, depth);
            dynasm!(self.ops ; .arch x64 ; mov rcx, rax);
            self.emit_leaf(lhs, false);
        } else {
            let slot = spill_slot(depth);
            self.emit(rhs, depth);
            dynasm!(self.ops ; .arch x64 ; mov [rsp + slot], rax);
            self.emit(lhs, depth + 1);
            dynasm!(self.ops ; .arch x64 ; mov rcx, [rsp + slot]);
        }
    }

    fn emit_unary(&mut self, op: UnaryOp) {
        match op {
            UnaryOp::Neg => dynasm!(self.ops ; .arch x64 ; neg rax),
            UnaryOp::BitNot => dynasm!(self.ops ; .arch x64 ; not rax),
            UnaryOp::LogicalNot => {
                let zero = self.ops.new_dynamic_label();
                let done = self.ops.new_dynamic_label();
                dynasm!(self.ops
                    ; .arch x64
                    ; test rax, rax
                    ; jz =>zero
                    ; xor eax, eax
                    ; jmp =>done
                    ; =>zero
                    ; mov eax, 1
                    ; =>done
                );
            }
        }
    }

    /// Combine `rax op rcx` into `rax`.
    fn emit_binary(&mut self, op: BinaryOp) {
        match op {
            BinaryOp::Add => dynasm!(self.ops ; .arch x64 ; add rax, rcx),
            BinaryOp::Sub => dynasm!(self.ops ; .arch x64 ; sub rax, rcx),
            BinaryOp::Mul => dynasm!(self.ops ; .arch x64 ; imul rax, rcx),
            BinaryOp::Div => dynasm!(self.ops ; .arch x64 ; xor edx, edx ; div rcx),
            BinaryOp::Rem => {
                dynasm!(self.ops ; .arch x64 ; xor edx, edx ; div rcx ; mov rax, rdx)
            }
            BinaryOp::And => dynasm!(self.ops ; .arch x64 ; and rax, rcx),
            BinaryOp::Or => dynasm!(self.ops ; .arch x64 ; or rax, rcx),
            BinaryOp::Xor => dynasm!(self.ops ; .arch x64 ; xor rax, rcx),
            BinaryOp::Shl => dynasm!(self.ops ; .arch x64 ; shl rax, cl),
            BinaryOp::Shr => dynasm!(self.ops ; .arch x64 ; shr rax, cl),
            BinaryOp::LogicalAnd => {
                let zero = self.ops.new_dynamic_label();
                let done = self.ops.new_dynamic_label();
                dynasm!(self.ops
                    ; .arch x64
                    ; test rax, rax
                    ; jz =>zero
                    ; test rcx, rcx
                    ; jz =>zero
                    ; mov eax, 1
                    ; jmp =>done
                    ; =>zero
                    ; xor eax, eax
                    ; =>done
                );
            }
            BinaryOp::LogicalOr => {
                let one = self.ops.new_dynamic_label();
                let done = self.ops.new_dynamic_label();
                dynasm!(self.ops
                    ; .arch x64
                    ; test rax, rax
                    ; jnz =>one
                    ; test rcx, rcx
                    ; jnz =>one
                    ; xor eax, eax
                    ; jmp =>done
                    ; =>one
                    ; mov eax, 1
                    ; =>done
                );
            }
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => self.emit_compare(op),
        }
    }

    fn emit_compare(&mut self, op: BinaryOp) {
        let hold = self.ops.new_dynamic_label();
        let done = self.ops.new_dynamic_label();
        dynasm!(self.ops ; .arch x64 ; cmp rax, rcx);
        match (op, self.sign) {
            (BinaryOp::Eq, _) => dynasm!(self.ops ; .arch x64 ; je =>hold),
            (BinaryOp::Ne, _) => dynasm!(self.ops ; .arch x64 ; jne =>hold),
            (BinaryOp::Lt, Signedness::Unsigned) => dynasm!(self.ops ; .arch x64 ; jb =>hold),
            (BinaryOp::Le, Signedness::Unsigned) => dynasm!(self.ops ; .arch x64 ; jbe =>hold),
            (BinaryOp::Gt, Signedness::Unsigned) => dynasm!(self.ops ; .arch x64 ; ja =>hold),
            (BinaryOp::Ge, Signedness::Unsigned) => dynasm!(self.ops ; .arch x64 ; jae =>hold),
            (BinaryOp::Lt, Signedness::Signed) => dynasm!(self.ops ; .arch x64 ; jl =>hold),
            (BinaryOp::Le, Signedness::Signed) => dynasm!(self.ops ; .arch x64 ; jle =>hold),
            (BinaryOp::Gt, Signedness::Signed) => dynasm!(self.ops ; .arch x64 ; jg =>hold),
            (BinaryOp::Ge, Signedness::Signed) => dynasm!(self.ops ; .arch x64 ; jge =>hold),
            _ => unreachable!("not a comparison"),
        }
        dynasm!(self.ops
            ; .arch x64
            ; xor eax, eax
            ; jmp =>done
            ; =>hold
            ; mov eax, 1
            ; =>done
        );
    }
}

/// Parse and compile a standalone expression; `$old`, `$new`, `$addr` are
/// the arguments of the resulting predicate.
pub fn compile_expression(input: &str, sign: Signedness) -> Result<JitCode, Error> {
    let ast = crate::expr::parser::parse_expression(input)?;
    compile(&ast, sign)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str, old: u64, new: u64, addr: u64) -> u64 {
        compile_expression(input, Signedness::Unsigned)
            .unwrap()
            .call(old, new, addr)
    }

    #[test]
    fn literals() {
        assert_eq!(run("0x123", 0, 0, 0), 0x123);
        assert_eq!(run("0b11", 0, 0, 0), 3);
        assert_eq!(run("0o755", 0, 0, 0), 493);
        assert_eq!(run("123", 0, 0, 0), 123);
    }

    #[test]
    fn references_resolve_to_arguments() {
        assert_eq!(run("$old", 13, 12, 3), 13);
        assert_eq!(run("$new", 1, 2, 3), 2);
        assert_eq!(run("$addr", 1, 2, 3), 3);
        assert_eq!(run("$address", 1, 2, 3), 3);
        assert_eq!(run("$old+1", 99, 0, 0), 100);
    }

    #[test]
    fn deep_spills() {
        // Both operand trees force the no-register strategy.
        assert_eq!(run("((10-2)+0x3)*((4+5)+(5-2))", 0, 0, 0), 132);
        assert_eq!(
            run("($old+$new)*($old-$new)+($addr*$addr)", 7, 3, 2),
            (7 + 3) * (7 - 3) + 4
        );
    }

    #[test]
    fn signed_and_unsigned_compares_differ() {
        // References never fold, so the comparison reaches the emitter.
        let unsigned = compile_expression("$old>0", Signedness::Unsigned).unwrap();
        let signed = compile_expression("$old>0", Signedness::Signed).unwrap();
        let minus_one = (-1i64) as u64;
        assert_eq!(unsigned.call(minus_one, 0, 0), 1);
        assert_eq!(signed.call(minus_one, 0, 0), 0);
    }

    #[test]
    fn artifact_outlives_the_ast() {
        let code = {
            let ast = crate::expr::parser::parse_expression("$new*2").unwrap();
            compile(&ast, Signedness::Unsigned).unwrap()
        };
        assert_eq!(code.call(0, 21, 0), 42);
        assert!(code.size() > 0);
    }
}
