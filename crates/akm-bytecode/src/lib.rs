#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use akm_module::{Command, ModuleInfo};

pub mod codegen;
pub mod container;
pub mod inspect;
pub mod opt;

pub use codegen::{generate, CodegenError, CodegenOutput};
pub use container::{checksum, write_module};
pub use inspect::{inspect, verify, InspectError, ModuleReport};
pub use opt::optimize_module;

/// The closed opcode set of the AKM stack machine.
///
/// The numbering is part of the binary contract with the host kernel and
/// is grouped by operand shape: `0x0_` control, `0x1_` stack, `0x2_`
/// arithmetic, `0x3_` bitwise, `0x4_` locals, `0x5_` branches, `0x6_`
/// calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Halt = 0x01,

    Push = 0x10,
    PushStr = 0x11,
    PushArg = 0x12,
    Pop = 0x13,
    Dup = 0x14,

    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Neg = 0x25,

    And = 0x30,
    Or = 0x31,
    Xor = 0x32,
    Not = 0x33,
    Shl = 0x34,
    Shr = 0x35,

    LoadLocal = 0x40,
    StoreLocal = 0x41,

    Jmp = 0x50,
    Jz = 0x51,
    Jnz = 0x52,

    Call = 0x60,
    CallApi = 0x61,
    Ret = 0x62,
}

impl Opcode {
    pub const fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match b {
            0x00 => Nop,
            0x01 => Halt,
            0x10 => Push,
            0x11 => PushStr,
            0x12 => PushArg,
            0x13 => Pop,
            0x14 => Dup,
            0x20 => Add,
            0x21 => Sub,
            0x22 => Mul,
            0x23 => Div,
            0x24 => Mod,
            0x25 => Neg,
            0x30 => And,
            0x31 => Or,
            0x32 => Xor,
            0x33 => Not,
            0x34 => Shl,
            0x35 => Shr,
            0x40 => LoadLocal,
            0x41 => StoreLocal,
            0x50 => Jmp,
            0x51 => Jz,
            0x52 => Jnz,
            0x60 => Call,
            0x61 => CallApi,
            0x62 => Ret,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "NOP",
            Halt => "HALT",
            Push => "PUSH",
            PushStr => "PUSH_STR",
            PushArg => "PUSH_ARG",
            Pop => "POP",
            Dup => "DUP",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Neg => "NEG",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Not => "NOT",
            Shl => "SHL",
            Shr => "SHR",
            LoadLocal => "LOAD_LOCAL",
            StoreLocal => "STORE_LOCAL",
            Jmp => "JMP",
            Jz => "JZ",
            Jnz => "JNZ",
            Call => "CALL",
            CallApi => "CALL_API",
            Ret => "RET",
        }
    }
}

/// An immediate operand. String immediates are carried by content; the
/// code generator assigns their pool offsets from the final string table.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Int(i64),
    Str(String),
}

/// A branch target: a symbolic label resolved by the code generator's
/// fixup pass, or an absolute instruction position for programmatically
/// built IR. Positional targets are never relocated by the optimizer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Target {
    Label(String),
    Addr(u32),
}

/// One IR instruction over the closed opcode set.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instr {
    /// `hook` marks prologue no-ops the peephole pass must keep.
    Nop { hook: bool },
    Halt,
    Push { value: Value },
    PushStr { text: String },
    PushArg { index: u8 },
    Pop,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    LoadLocal { name: String },
    StoreLocal { name: String, value: Value },
    Jmp { target: Target },
    Jz { target: Target },
    Jnz { target: Target },
    Call { func: String, argc: u8 },
    CallApi { method: String, argc: u8 },
    Ret,
}

impl Instr {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instr::Nop { .. } => Opcode::Nop,
            Instr::Halt => Opcode::Halt,
            Instr::Push { .. } => Opcode::Push,
            Instr::PushStr { .. } => Opcode::PushStr,
            Instr::PushArg { .. } => Opcode::PushArg,
            Instr::Pop => Opcode::Pop,
            Instr::Dup => Opcode::Dup,
            Instr::Add => Opcode::Add,
            Instr::Sub => Opcode::Sub,
            Instr::Mul => Opcode::Mul,
            Instr::Div => Opcode::Div,
            Instr::Mod => Opcode::Mod,
            Instr::Neg => Opcode::Neg,
            Instr::And => Opcode::And,
            Instr::Or => Opcode::Or,
            Instr::Xor => Opcode::Xor,
            Instr::Not => Opcode::Not,
            Instr::Shl => Opcode::Shl,
            Instr::Shr => Opcode::Shr,
            Instr::LoadLocal { .. } => Opcode::LoadLocal,
            Instr::StoreLocal { .. } => Opcode::StoreLocal,
            Instr::Jmp { .. } => Opcode::Jmp,
            Instr::Jz { .. } => Opcode::Jz,
            Instr::Jnz { .. } => Opcode::Jnz,
            Instr::Call { .. } => Opcode::Call,
            Instr::CallApi { .. } => Opcode::CallApi,
            Instr::Ret => Opcode::Ret,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.opcode().mnemonic();
        match self {
            Instr::Push { value: Value::Int(n) } => write!(f, "{m} {n}"),
            Instr::Push { value: Value::Str(s) } => write!(f, "{m} {s:?}"),
            Instr::PushStr { text } => write!(f, "{m} {text:?}"),
            Instr::PushArg { index } => write!(f, "{m} {index}"),
            Instr::LoadLocal { name } => write!(f, "{m} {name}"),
            Instr::StoreLocal { name, value } => match value {
                Value::Int(n) => write!(f, "{m} {name} = {n}"),
                Value::Str(s) => write!(f, "{m} {name} = {s:?}"),
            },
            Instr::Jmp { target } | Instr::Jz { target } | Instr::Jnz { target } => match target {
                Target::Label(l) => write!(f, "{m} {l}"),
                Target::Addr(a) => write!(f, "{m} @{a}"),
            },
            Instr::Call { func, argc } => write!(f, "{m} {func}/{argc}"),
            Instr::CallApi { method, argc } => write!(f, "{m} {method}/{argc}"),
            _ => f.write_str(m),
        }
    }
}

/// An IR function: parameters and locals by name, instructions in
/// emission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<String>,
    /// Locals in insertion order. Re-declared names are kept; lookups
    /// resolve to the latest index.
    pub locals: Vec<String>,
    pub code: Vec<Instr>,
    pub is_init: bool,
    pub is_exit: bool,
}

impl IrFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// The full compilation unit handed from the front end to the optimizer
/// and code generator.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IrModule {
    pub info: ModuleInfo,
    /// Functions in source order; `init`/`exit` are flagged.
    pub functions: Vec<IrFunction>,
    /// The string table in observation order. Duplicates are kept until
    /// the dedup pass; offsets are assigned by the code generator.
    pub strings: Vec<String>,
    pub commands: Vec<Command>,
}

impl IrModule {
    pub fn new(info: ModuleInfo) -> Self {
        Self {
            info,
            functions: Vec::new(),
            strings: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Records a string in the table. Appends unconditionally; the dedup
    /// pass collapses repeats.
    pub fn record_string(&mut self, s: &str) {
        self.strings.push(String::from(s));
    }
}

/// Renders the IR as text, one instruction per line.
pub fn dump(module: &IrModule) -> String {
    use core::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "module {:?}", module.info.name);
    let _ = writeln!(out, "capabilities 0x{:08X}", module.info.capabilities);
    for cmd in &module.commands {
        let _ = writeln!(
            out,
            "command {:?} -> {}",
            cmd.name,
            cmd.handler.as_deref().unwrap_or("<unresolved>")
        );
    }
    for func in &module.functions {
        let _ = writeln!(
            out,
            "\nfn {}({}) [{} locals]",
            func.name,
            func.params.join(", "),
            func.locals.len()
        );
        for (i, instr) in func.code.iter().enumerate() {
            let _ = writeln!(out, "  {i:4}: {instr}");
        }
    }
    if !module.strings.is_empty() {
        let _ = writeln!(out, "\nstrings:");
        for (i, s) in module.strings.iter().enumerate() {
            let _ = writeln!(out, "  {i:4}: {s:?}");
        }
    }
    out
}
