//! Lowers IR to code and data bytes.
//!
//! Emission is two-pass: instructions are written with 32-bit placeholder
//! operands wherever a label is not yet bound, and a fixup list records
//! the patch sites; once every function is emitted the labels map patches
//! them in place. All multi-byte operands are little-endian.

extern crate alloc;

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use akm_module::{api_index, API_INDEX_UNKNOWN};

use crate::{Instr, IrFunction, IrModule, Opcode, Target, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodegenError {
    pub message: String,
}

impl CodegenError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "codegen error: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodegenError {}

/// The generated sections, with all offsets relative to the start of the
/// code section. The container writer rebases entry points and symbol
/// values against the header size.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodegenOutput {
    pub code: Vec<u8>,
    /// String pool followed by the 20-byte command stubs.
    pub data: Vec<u8>,
    /// `(function name, code offset)` in emission order.
    pub function_offsets: Vec<(String, u32)>,
    pub init_offset: u32,
    pub exit_offset: u32,
}

struct Emitter {
    code: Vec<u8>,
    labels: BTreeMap<String, u32>,
    fixups: Vec<(u32, String)>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: BTreeMap::new(),
            fixups: Vec::new(),
        }
    }

    fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    fn op(&mut self, op: Opcode) {
        self.code.push(op.byte());
    }

    fn u8(&mut self, v: u8) {
        self.code.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    /// Records a fixup for `label` at the current offset and emits the
    /// 32-bit placeholder.
    fn fixup(&mut self, label: &str) {
        self.fixups.push((self.offset(), label.to_string()));
        self.u32(0);
    }

    fn resolve_fixups(&mut self) -> Result<(), CodegenError> {
        let mut unresolved: BTreeSet<&str> = BTreeSet::new();
        for (at, label) in &self.fixups {
            match self.labels.get(label) {
                Some(addr) => {
                    let at = *at as usize;
                    self.code[at..at + 4].copy_from_slice(&addr.to_le_bytes());
                }
                None => {
                    unresolved.insert(label.as_str());
                }
            }
        }
        if unresolved.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = unresolved.into_iter().collect();
        Err(CodegenError::new(format!(
            "unresolved call target(s): {}",
            names.join(", ")
        )))
    }
}

/// Pool offsets for the final string table, addressable by content and by
/// position.
struct StringPool {
    by_content: BTreeMap<String, u32>,
    bytes: Vec<u8>,
}

impl StringPool {
    fn build(strings: &[String]) -> Self {
        let mut by_content = BTreeMap::new();
        let mut bytes = Vec::new();
        for s in strings {
            let off = bytes.len() as u32;
            by_content.entry(s.clone()).or_insert(off);
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
        }
        Self { by_content, bytes }
    }

    fn offset_of(&self, text: &str) -> Result<u32, CodegenError> {
        self.by_content.get(text).copied().ok_or_else(|| {
            CodegenError::new(format!("string {text:?} is not in the string table"))
        })
    }
}

fn local_index(func: &IrFunction, name: &str) -> Option<u8> {
    // Latest declaration wins for re-used names.
    func.locals
        .iter()
        .rposition(|l| l == name)
        .map(|i| i as u8)
}

fn param_index(func: &IrFunction, name: &str) -> Option<u8> {
    func.params.iter().position(|p| p == name).map(|i| i as u8)
}

fn emit_function(
    emitter: &mut Emitter,
    pool: &StringPool,
    func: &IrFunction,
) -> Result<(), CodegenError> {
    if func.locals.len() > u8::MAX as usize {
        return Err(CodegenError::new(format!(
            "function `{}` has too many locals ({})",
            func.name,
            func.locals.len()
        )));
    }
    if func.params.len() > u8::MAX as usize {
        return Err(CodegenError::new(format!(
            "function `{}` has too many parameters ({})",
            func.name,
            func.params.len()
        )));
    }

    // Prologue hook, then zero-initialize every local slot.
    emitter.op(Opcode::Nop);
    for _ in &func.locals {
        emitter.op(Opcode::Push);
        emitter.u32(0);
    }

    for instr in &func.code {
        emit_instr(emitter, pool, func, instr)?;
    }
    Ok(())
}

fn push_value(
    emitter: &mut Emitter,
    pool: &StringPool,
    value: &Value,
) -> Result<(), CodegenError> {
    emitter.op(Opcode::Push);
    match value {
        Value::Int(n) => emitter.u32(*n as u32),
        Value::Str(s) => {
            let off = pool.offset_of(s)?;
            emitter.u32(off);
        }
    }
    Ok(())
}

fn emit_instr(
    emitter: &mut Emitter,
    pool: &StringPool,
    func: &IrFunction,
    instr: &Instr,
) -> Result<(), CodegenError> {
    match instr {
        Instr::Nop { .. } => emitter.op(Opcode::Nop),
        Instr::Halt => emitter.op(Opcode::Halt),
        Instr::Push { value } => push_value(emitter, pool, value)?,
        Instr::PushStr { text } => {
            let off = pool.offset_of(text)?;
            emitter.op(Opcode::PushStr);
            emitter.u32(off);
        }
        Instr::PushArg { index } => {
            emitter.op(Opcode::PushArg);
            emitter.u8(*index);
        }
        Instr::Pop => emitter.op(Opcode::Pop),
        Instr::Dup => emitter.op(Opcode::Dup),
        Instr::Add => emitter.op(Opcode::Add),
        Instr::Sub => emitter.op(Opcode::Sub),
        Instr::Mul => emitter.op(Opcode::Mul),
        Instr::Div => emitter.op(Opcode::Div),
        Instr::Mod => emitter.op(Opcode::Mod),
        Instr::Neg => emitter.op(Opcode::Neg),
        Instr::And => emitter.op(Opcode::And),
        Instr::Or => emitter.op(Opcode::Or),
        Instr::Xor => emitter.op(Opcode::Xor),
        Instr::Not => emitter.op(Opcode::Not),
        Instr::Shl => emitter.op(Opcode::Shl),
        Instr::Shr => emitter.op(Opcode::Shr),
        Instr::LoadLocal { name } => {
            // Locals shadow parameters; names known as neither degrade to
            // a zero push.
            if let Some(idx) = local_index(func, name) {
                emitter.op(Opcode::LoadLocal);
                emitter.u8(idx);
            } else if let Some(idx) = param_index(func, name) {
                emitter.op(Opcode::PushArg);
                emitter.u8(idx);
            } else {
                emitter.op(Opcode::Push);
                emitter.u32(0);
            }
        }
        Instr::StoreLocal { name, value } => {
            let idx = local_index(func, name).ok_or_else(|| {
                CodegenError::new(format!(
                    "store to unknown local `{name}` in function `{}`",
                    func.name
                ))
            })?;
            push_value(emitter, pool, value)?;
            emitter.op(Opcode::StoreLocal);
            emitter.u8(idx);
        }
        Instr::Jmp { target } | Instr::Jz { target } | Instr::Jnz { target } => {
            emitter.op(instr.opcode());
            match target {
                Target::Label(label) => emitter.fixup(label),
                Target::Addr(addr) => emitter.u32(*addr),
            }
        }
        Instr::Call { func: callee, argc } => {
            emitter.op(Opcode::Call);
            emitter.fixup(callee);
            emitter.u8(*argc);
        }
        Instr::CallApi { method, argc } => {
            emitter.op(Opcode::CallApi);
            emitter.u8(api_index(method).unwrap_or(API_INDEX_UNKNOWN));
            emitter.u8(*argc);
        }
        Instr::Ret => emitter.op(Opcode::Ret),
    }
    Ok(())
}

/// Generates the code and data sections for an IR module.
pub fn generate(module: &IrModule) -> Result<CodegenOutput, CodegenError> {
    let pool = StringPool::build(&module.strings);
    let mut emitter = Emitter::new();
    let mut function_offsets = Vec::with_capacity(module.functions.len());
    let mut init_offset = 0;
    let mut exit_offset = 0;

    for func in &module.functions {
        let offset = emitter.offset();
        if emitter.labels.insert(func.name.clone(), offset).is_some() {
            return Err(CodegenError::new(format!(
                "duplicate function `{}`",
                func.name
            )));
        }
        function_offsets.push((func.name.clone(), offset));
        if func.is_init {
            init_offset = offset;
        }
        if func.is_exit {
            exit_offset = offset;
        }
        emit_function(&mut emitter, &pool, func)?;
    }

    emitter.resolve_fixups()?;

    // Data section: string pool, then one 20-byte stub per command.
    let mut data = pool.bytes.clone();
    for cmd in &module.commands {
        for text in [&cmd.name, &cmd.syntax, &cmd.description, &cmd.category] {
            data.extend_from_slice(&pool.offset_of(text)?.to_le_bytes());
        }
        let handler = cmd
            .handler
            .as_deref()
            .and_then(|h| emitter.labels.get(h).copied())
            .unwrap_or(0);
        data.extend_from_slice(&handler.to_le_bytes());
    }

    Ok(CodegenOutput {
        code: emitter.code,
        data,
        function_offsets,
        init_offset,
        exit_offset,
    })
}
