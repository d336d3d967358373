//! IR optimization passes.
//!
//! Four passes run in a fixed order: dead-code elimination, constant
//! folding, peephole rewrites, and string-table deduplication. The first
//! three are per-function; dedup rewrites the module-wide string table.
//!
//! Positional (`Target::Addr`) branch targets are preserved by DCE but
//! never relocated; compiled source only ever carries `Target::Label`
//! branches, which the code generator resolves after all passes.

extern crate alloc;

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use crate::{Instr, IrFunction, IrModule, Target, Value};

/// Runs all four passes over the module.
pub fn optimize_module(module: &mut IrModule) {
    for func in &mut module.functions {
        dead_code_elimination(func);
        fold_constants(func);
        peephole(func);
    }
    dedup_strings(module);
}

fn addr_target(instr: &Instr) -> Option<u32> {
    match instr {
        Instr::Jmp { target: Target::Addr(a) }
        | Instr::Jz { target: Target::Addr(a) }
        | Instr::Jnz { target: Target::Addr(a) } => Some(*a),
        _ => None,
    }
}

/// Drops instructions that cannot execute.
///
/// A forward sweep keeps a `reachable` flag: `RET`, unconditional `JMP`,
/// and `HALT` clear it for the following instruction; any position that
/// is a recorded branch target sets it again.
pub fn dead_code_elimination(func: &mut IrFunction) {
    let targets: BTreeSet<u32> = func.code.iter().filter_map(addr_target).collect();

    let mut reachable = true;
    let mut kept = Vec::with_capacity(func.code.len());
    for (pos, instr) in func.code.drain(..).enumerate() {
        if targets.contains(&(pos as u32)) {
            reachable = true;
        }
        if !reachable {
            continue;
        }
        let terminates = matches!(instr, Instr::Ret | Instr::Halt | Instr::Jmp { .. });
        kept.push(instr);
        if terminates {
            reachable = false;
        }
    }
    func.code = kept;
}

fn fold_binop(op: &Instr, a: i64, b: i64) -> Option<i64> {
    let a = a as i32;
    let b = b as i32;
    let v: i32 = match op {
        Instr::Add => a.wrapping_add(b),
        Instr::Sub => a.wrapping_sub(b),
        Instr::Mul => a.wrapping_mul(b),
        Instr::Div => {
            if b == 0 {
                return None;
            }
            // Floor division.
            let q = a.wrapping_div(b);
            let r = a.wrapping_rem(b);
            if r != 0 && (r < 0) != (b < 0) {
                q.wrapping_sub(1)
            } else {
                q
            }
        }
        Instr::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        Instr::And => a & b,
        Instr::Or => a | b,
        Instr::Xor => a ^ b,
        Instr::Shl => a.wrapping_shl(b as u32 & 31),
        // Logical (zero-fill) shift.
        Instr::Shr => ((a as u32) >> (b as u32 & 31)) as i32,
        _ => return None,
    };
    Some(v as i64)
}

/// Replaces `PUSH a; PUSH b; <binop>` with the folded `PUSH`.
///
/// Division and modulo by zero are left alone. After a fold the scan
/// backs up two positions so cascaded triples fold in one call.
pub fn fold_constants(func: &mut IrFunction) {
    let code = &mut func.code;
    let mut i = 0;
    while i + 2 < code.len() {
        let folded = match (&code[i], &code[i + 1]) {
            (
                Instr::Push { value: Value::Int(a) },
                Instr::Push { value: Value::Int(b) },
            ) => fold_binop(&code[i + 2], *a, *b),
            _ => None,
        };
        match folded {
            Some(v) => {
                code.splice(i..i + 3, [Instr::Push { value: Value::Int(v) }]);
                i = i.saturating_sub(2);
            }
            None => i += 1,
        }
    }
}

fn is_push(instr: &Instr) -> bool {
    matches!(instr, Instr::Push { .. })
}

fn is_push_int(instr: &Instr, n: i64) -> bool {
    matches!(instr, Instr::Push { value: Value::Int(v) } if *v == n)
}

/// Window-pair rewrites, applied until a full sweep changes nothing:
/// `PUSH _; POP`, `NEG; NEG`, `NOT; NOT`, `PUSH 0; ADD`, `PUSH 1; MUL`
/// and `DUP; POP` are dropped, as is any bare `NOP` not marked as a
/// prologue hook.
pub fn peephole(func: &mut IrFunction) {
    loop {
        let mut changed = false;
        let mut out: Vec<Instr> = Vec::with_capacity(func.code.len());
        let mut i = 0;
        while i < func.code.len() {
            if i + 1 < func.code.len() {
                let a = &func.code[i];
                let b = &func.code[i + 1];
                let drop_pair = (is_push(a) && matches!(b, Instr::Pop))
                    || matches!((a, b), (Instr::Neg, Instr::Neg))
                    || matches!((a, b), (Instr::Not, Instr::Not))
                    || (is_push_int(a, 0) && matches!(b, Instr::Add))
                    || (is_push_int(a, 1) && matches!(b, Instr::Mul))
                    || matches!((a, b), (Instr::Dup, Instr::Pop));
                if drop_pair {
                    i += 2;
                    changed = true;
                    continue;
                }
            }
            if matches!(func.code[i], Instr::Nop { hook: false }) {
                i += 1;
                changed = true;
                continue;
            }
            out.push(func.code[i].clone());
            i += 1;
        }
        func.code = out;
        if !changed {
            break;
        }
    }
}

/// Rebuilds the string table keeping the first occurrence of each string.
///
/// Offsets are not assigned here; the code generator derives them from the
/// final list. Strings no longer referenced by any instruction (e.g. from
/// code DCE removed) are retained.
pub fn dedup_strings(module: &mut IrModule) {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::with_capacity(module.strings.len());
    for s in module.strings.drain(..) {
        if seen.insert(s.clone()) {
            out.push(s);
        }
    }
    module.strings = out;
}
