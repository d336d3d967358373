//! Lowers extracted functions into stack IR.
//!
//! A single pre-order walk over each body emits code for the recognized
//! statement shapes (host-API calls, plain calls, `return`, variable
//! declarations); every other statement is traversed for nested
//! statements but emits nothing. Command registrations are spliced into
//! `init` ahead of its first `RET`.

use crate::ast::{BinaryOp, Expr, Stmt, UnaryOp};
use crate::eval::{eval, Const};
use crate::extract::{akm_method, Extraction};
use akm_bytecode::{Instr, IrFunction, IrModule, Value};

/// Builds the IR module from an extraction. The descriptor is copied as
/// extracted; capability inference rewrites it afterwards.
pub fn build_ir(extraction: &Extraction) -> IrModule {
    let mut module = IrModule::new(extraction.info.clone());
    module.commands = extraction.commands.clone();

    for func in &extraction.functions {
        let mut lowerer = FnLowerer {
            func: IrFunction {
                name: func.name.clone(),
                params: func.def.params.iter().map(|p| p.name.name.clone()).collect(),
                is_init: func.name == "init",
                is_exit: func.name == "exit",
                ..IrFunction::default()
            },
            strings: &mut module.strings,
        };
        for stmt in &func.def.body {
            lowerer.stmt(stmt);
        }
        let mut lowered = lowerer.func;
        // Every function ends in RET.
        if !matches!(lowered.code.last(), Some(Instr::Ret)) {
            lowered.code.push(Instr::Ret);
        }
        module.functions.push(lowered);
    }

    inject_command_registrations(&mut module);
    module
}

/// Splices one registration block per command into `init`, immediately
/// before its first `RET`: the four descriptor strings, a handler-offset
/// placeholder the code generator resolves in the data stubs, the
/// `registerCommand` call, and a `POP` for its status value.
fn inject_command_registrations(module: &mut IrModule) {
    if module.commands.is_empty() {
        return;
    }

    for cmd in &module.commands {
        for text in [&cmd.name, &cmd.syntax, &cmd.description, &cmd.category] {
            module.strings.push(text.clone());
        }
    }

    let mut block = Vec::with_capacity(module.commands.len() * 7);
    for cmd in &module.commands {
        for text in [&cmd.name, &cmd.syntax, &cmd.description, &cmd.category] {
            block.push(Instr::PushStr { text: text.clone() });
        }
        block.push(Instr::Push { value: Value::Int(0) });
        block.push(Instr::CallApi {
            method: "registerCommand".to_string(),
            argc: 5,
        });
        block.push(Instr::Pop);
    }

    let Some(init) = module.functions.iter_mut().find(|f| f.is_init) else {
        return;
    };
    let at = init
        .code
        .iter()
        .position(|i| matches!(i, Instr::Ret))
        .unwrap_or(init.code.len());
    init.code.splice(at..at, block);
}

struct FnLowerer<'m> {
    func: IrFunction,
    strings: &'m mut Vec<String>,
}

impl FnLowerer<'_> {
    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr { expr, .. } => self.expr_stmt(expr),
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.lower_return_value(value);
                }
                self.func.code.push(Instr::Ret);
            }
            Stmt::VarDecl { name, init, .. } => {
                // Re-declared names are appended, not deduplicated; the
                // latest index wins for later references.
                self.func.locals.push(name.name.clone());
                if let Some(init) = init {
                    let value = self.const_value(eval(init));
                    self.func.code.push(Instr::StoreLocal {
                        name: name.name.clone(),
                        value,
                    });
                }
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.body(then_branch);
                if let Some(else_branch) = else_branch {
                    self.body(else_branch);
                }
            }
            Stmt::While { body, .. } => self.body(body),
            Stmt::For { init, body, .. } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                self.body(body);
            }
            Stmt::Block { body, .. } => self.body(body),
            // Nested function definitions are not separate bytecode
            // functions and are skipped entirely.
            Stmt::FnDecl { .. } | Stmt::ExportNames { .. } | Stmt::Empty { .. } => {}
        }
    }

    fn body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn expr_stmt(&mut self, expr: &Expr) {
        let Expr::Call { callee, args, .. } = expr else {
            return;
        };
        match akm_method(callee) {
            // Registrations are compile-time projections, never runtime
            // calls.
            Some("module") | Some("command") => {}
            Some(method) => {
                for arg in args {
                    self.lower_api_arg(arg);
                }
                self.func.code.push(Instr::CallApi {
                    method: method.to_string(),
                    argc: args.len() as u8,
                });
            }
            None => {
                if let Expr::Ident(ident) = callee.as_ref() {
                    // Arguments of plain calls are not lowered; the callee
                    // reads them from its zero-initialized frame.
                    self.func.code.push(Instr::Call {
                        func: ident.name.clone(),
                        argc: args.len() as u8,
                    });
                }
            }
        }
    }

    /// API arguments support exactly: string and numeric literals, and
    /// bare identifiers. Everything else pushes 0.
    fn lower_api_arg(&mut self, arg: &Expr) {
        if let Expr::Ident(ident) = arg {
            self.func.code.push(Instr::LoadLocal {
                name: ident.name.clone(),
            });
            return;
        }
        match eval(arg) {
            Some(Const::Str(text)) => {
                self.strings.push(text.clone());
                self.func.code.push(Instr::PushStr { text });
            }
            Some(Const::Num(n)) => self.func.code.push(Instr::Push {
                value: Value::Int(n as i64),
            }),
            _ => self.func.code.push(Instr::Push {
                value: Value::Int(0),
            }),
        }
    }

    fn lower_return_value(&mut self, value: &Expr) {
        let mark = self.func.code.len();
        if !self.lower_operand(value) {
            self.func.code.truncate(mark);
            self.func.code.push(Instr::Push {
                value: Value::Int(0),
            });
        }
    }

    fn const_value(&mut self, value: Option<Const>) -> Value {
        match value {
            Some(Const::Num(n)) => Value::Int(n as i64),
            Some(Const::Str(s)) => {
                self.strings.push(s.clone());
                Value::Str(s)
            }
            Some(Const::Bool(b)) => Value::Int(b as i64),
            _ => Value::Int(0),
        }
    }

    fn binop_instr(op: BinaryOp) -> Option<Instr> {
        Some(match op {
            BinaryOp::Add => Instr::Add,
            BinaryOp::Sub => Instr::Sub,
            BinaryOp::Mul => Instr::Mul,
            BinaryOp::Div => Instr::Div,
            BinaryOp::Mod => Instr::Mod,
            BinaryOp::BitAnd => Instr::And,
            BinaryOp::BitOr => Instr::Or,
            BinaryOp::BitXor => Instr::Xor,
            BinaryOp::Shl => Instr::Shl,
            // One logical shift opcode serves both shift-right forms.
            BinaryOp::Shr | BinaryOp::UShr => Instr::Shr,
            _ => return None,
        })
    }

    /// Lowers an arithmetic/bitwise expression tree to stack operations,
    /// operands first. Returns false (possibly after partial emission the
    /// caller rolls back) when the tree has unsupported leaves.
    fn lower_operand(&mut self, expr: &Expr) -> bool {
        if let Some(value) = eval(expr) {
            match value {
                Const::Num(n) => {
                    self.func.code.push(Instr::Push {
                        value: Value::Int(n as i64),
                    });
                    return true;
                }
                Const::Str(s) => {
                    self.strings.push(s.clone());
                    self.func.code.push(Instr::Push {
                        value: Value::Str(s),
                    });
                    return true;
                }
                Const::Bool(b) => {
                    self.func.code.push(Instr::Push {
                        value: Value::Int(b as i64),
                    });
                    return true;
                }
                Const::Null => {
                    self.func.code.push(Instr::Push {
                        value: Value::Int(0),
                    });
                    return true;
                }
                Const::Ref(name) => {
                    self.func.code.push(Instr::LoadLocal { name });
                    return true;
                }
                Const::Arr(_) | Const::Obj(_) => return false,
            }
        }
        match expr {
            Expr::Unary { op, operand, .. } => {
                let instr = match op {
                    UnaryOp::Neg => Instr::Neg,
                    UnaryOp::Not | UnaryOp::BitNot => Instr::Not,
                    UnaryOp::Plus | UnaryOp::TypeOf => return false,
                };
                if !self.lower_operand(operand) {
                    return false;
                }
                self.func.code.push(instr);
                true
            }
            Expr::Binary { op, left, right, .. } => {
                let Some(instr) = Self::binop_instr(*op) else {
                    return false;
                };
                if !self.lower_operand(left) || !self.lower_operand(right) {
                    return false;
                }
                self.func.code.push(instr);
                true
            }
            _ => false,
        }
    }
}
