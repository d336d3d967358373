//! Extracts the four compiler projections from a parsed program: the
//! module configuration, function definitions, command registrations, and
//! every host-API call site.

use crate::ast::{Expr, FnDef, MemberProp, Program, Stmt};
use crate::diag::Diagnostics;
use crate::eval::{eval, Const};
use crate::source::Span;
use akm_bytecode::container::{FLAG_AUTOLOAD, FLAG_REQUIRED};
use akm_module::{Command, ModuleInfo, AUTHOR_MAX, DEP_MAX, MAX_DEPS, NAME_MAX, SECURITY_LEVEL_MAX, VERSION_MAX};

/// A function definition usable as bytecode: a named declaration or a
/// single-name binding initialized with an anonymous function or arrow.
#[derive(Clone, Debug)]
pub struct ExtractedFn<'a> {
    pub name: String,
    pub def: &'a FnDef,
    pub span: Span,
    pub exported: bool,
}

/// One `AKM.<method>(...)` call site.
#[derive(Clone, Debug)]
pub struct ApiCall<'a> {
    pub method: String,
    pub args: &'a [Expr],
    pub span: Span,
}

#[derive(Debug)]
pub struct Extraction<'a> {
    pub info: ModuleInfo,
    /// Header flag bits requested by the module config.
    pub flags: u16,
    pub functions: Vec<ExtractedFn<'a>>,
    pub commands: Vec<Command>,
    pub api_calls: Vec<ApiCall<'a>>,
}

impl<'a> Extraction<'a> {
    pub fn function(&self, name: &str) -> Option<&ExtractedFn<'a>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Returns the method name when `callee` is a member access on the global
/// `AKM` sentinel.
pub(crate) fn akm_method(callee: &Expr) -> Option<&str> {
    let Expr::Member {
        object,
        property: MemberProp::Name(name),
        ..
    } = callee
    else {
        return None;
    };
    match object.as_ref() {
        Expr::Ident(ident) if ident.name == "AKM" => Some(name),
        _ => None,
    }
}

pub fn extract<'a>(program: &'a Program, diags: &mut Diagnostics) -> Extraction<'a> {
    let mut walker = Walker {
        info: ModuleInfo::default(),
        flags: 0,
        functions: Vec::new(),
        commands: Vec::new(),
        api_calls: Vec::new(),
        module_span: None,
        name_diagnosed: false,
        diags,
    };

    // Function definitions are recognized at the top level only.
    for stmt in &program.body {
        walker.collect_function(stmt);
    }
    for stmt in &program.body {
        walker.visit_stmt(stmt);
    }

    if walker.module_span.is_none() {
        walker
            .diags
            .error_global("missing AKM.module({...}) declaration");
    } else if walker.info.name.is_empty() && !walker.name_diagnosed {
        walker
            .diags
            .error_global("module declaration is missing a name");
    }

    // A command handler must name an extracted function.
    let known: Vec<&str> = walker.functions.iter().map(|f| f.name.as_str()).collect();
    for cmd in &mut walker.commands {
        if let Some(handler) = cmd.handler.as_deref() {
            if !known.contains(&handler) {
                walker.diags.warnings.push(crate::diag::Diagnostic::global(
                    format!("command `{}` handler `{handler}` is not a defined function", cmd.name),
                ));
                cmd.handler = None;
            }
        }
    }

    Extraction {
        info: walker.info,
        flags: walker.flags,
        functions: walker.functions,
        commands: walker.commands,
        api_calls: walker.api_calls,
    }
}

struct Walker<'a, 'd> {
    info: ModuleInfo,
    flags: u16,
    functions: Vec<ExtractedFn<'a>>,
    commands: Vec<Command>,
    api_calls: Vec<ApiCall<'a>>,
    module_span: Option<Span>,
    name_diagnosed: bool,
    diags: &'d mut Diagnostics,
}

impl<'a> Walker<'a, '_> {
    fn collect_function(&mut self, stmt: &'a Stmt) {
        let (name, def, span, exported) = match stmt {
            Stmt::FnDecl {
                name,
                def,
                exported,
                span,
            } => (name.name.clone(), def, *span, *exported),
            Stmt::VarDecl {
                name,
                init: Some(init),
                exported,
                span,
                ..
            } => match init.as_fn_def() {
                Some(def) => (name.name.clone(), def, *span, *exported),
                None => return,
            },
            _ => return,
        };
        if self.functions.iter().any(|f| f.name == name) {
            self.diags
                .warn(format!("duplicate function `{name}`; the first definition wins"), span);
            return;
        }
        self.functions.push(ExtractedFn {
            name,
            def,
            span,
            exported,
        });
    }

    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Expr { expr, .. } => self.visit_expr(expr),
            Stmt::VarDecl { init, .. } => {
                if let Some(init) = init {
                    self.visit_expr(init);
                }
            }
            Stmt::FnDecl { def, .. } => self.visit_body(&def.body),
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            Stmt::If {
                test,
                then_branch,
                else_branch,
                ..
            } => {
                self.visit_expr(test);
                self.visit_body(then_branch);
                if let Some(else_branch) = else_branch {
                    self.visit_body(else_branch);
                }
            }
            Stmt::While { test, body, .. } => {
                self.visit_expr(test);
                self.visit_body(body);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.visit_stmt(init);
                }
                if let Some(test) = test {
                    self.visit_expr(test);
                }
                if let Some(update) = update {
                    self.visit_expr(update);
                }
                self.visit_body(body);
            }
            Stmt::Block { body, .. } => self.visit_body(body),
            Stmt::ExportNames { .. } | Stmt::Empty { .. } => {}
        }
    }

    fn visit_body(&mut self, body: &'a [Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Call { callee, args, span } => {
                match akm_method(callee) {
                    Some("module") => self.handle_module(args, *span),
                    Some("command") => self.handle_command(args, *span),
                    Some(method) => self.api_calls.push(ApiCall {
                        method: method.to_string(),
                        args,
                        span: *span,
                    }),
                    None => self.visit_expr(callee),
                }
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            Expr::Member { object, property, .. } => {
                self.visit_expr(object);
                if let MemberProp::Computed(index) = property {
                    self.visit_expr(index);
                }
            }
            Expr::Unary { operand, .. } => self.visit_expr(operand),
            Expr::Binary { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::Cond {
                test,
                then_value,
                else_value,
                ..
            } => {
                self.visit_expr(test);
                self.visit_expr(then_value);
                self.visit_expr(else_value);
            }
            Expr::Assign { target, value, .. } => {
                self.visit_expr(target);
                self.visit_expr(value);
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.visit_expr(element);
                }
            }
            Expr::Object { props, .. } => {
                for prop in props {
                    self.visit_expr(&prop.value);
                }
            }
            Expr::Function { def, .. } | Expr::Arrow { def, .. } => self.visit_body(&def.body),
            Expr::Num { .. }
            | Expr::Str { .. }
            | Expr::Bool { .. }
            | Expr::Null { .. }
            | Expr::Template { .. }
            | Expr::Ident(_) => {}
        }
    }

    fn handle_module(&mut self, args: &'a [Expr], span: Span) {
        if self.module_span.is_some() {
            self.diags
                .error("duplicate AKM.module declaration; it must be unique", span);
            return;
        }
        self.module_span = Some(span);

        let Some(Expr::Object { props, .. }) = args.first() else {
            self.diags
                .error("AKM.module requires an object literal argument", span);
            // Keep the declaration marker so only one structural error is
            // reported for this failure mode.
            self.name_diagnosed = true;
            return;
        };

        for prop in props {
            let value = eval(&prop.value);
            match prop.key.as_str() {
                "name" => match value.as_ref().and_then(|v| v.as_str()) {
                    Some(name) if !name.is_empty() => {
                        if name.len() > NAME_MAX {
                            self.diags.warn(
                                format!("module name exceeds {NAME_MAX} bytes and will be truncated"),
                                prop.span,
                            );
                        }
                        self.info.name = name.to_string();
                    }
                    Some(_) => {
                        self.diags.error("module name must not be empty", prop.span);
                        self.name_diagnosed = true;
                    }
                    None => {
                        self.diags.error("module name must be a string literal", prop.span);
                        self.name_diagnosed = true;
                    }
                },
                "version" => self.take_str(&value, prop.span, "version", VERSION_MAX, |info, s| {
                    info.version = s
                }),
                "author" => self.take_str(&value, prop.span, "author", AUTHOR_MAX, |info, s| {
                    info.author = s
                }),
                "description" => {
                    self.take_str(&value, prop.span, "description", usize::MAX, |info, s| {
                        info.description = s
                    })
                }
                "license" => self.take_str(&value, prop.span, "license", usize::MAX, |info, s| {
                    info.license = s
                }),
                "capabilities" => match value.as_ref().and_then(|v| v.as_u32()) {
                    Some(mask) => self.info.capabilities = mask,
                    None => self.diags.warn(
                        "module capabilities must resolve to a numeric mask; ignored",
                        prop.span,
                    ),
                },
                "dependencies" => self.take_dependencies(&value, prop.span),
                "security_level" => match value.as_ref().and_then(|v| v.as_num()) {
                    Some(level) if (0.0..=SECURITY_LEVEL_MAX as f64).contains(&level) => {
                        self.info.security_level = level as u8;
                    }
                    Some(level) => {
                        self.diags.warn(
                            format!("security_level {level} is out of range 0..=2; clamped"),
                            prop.span,
                        );
                        self.info.security_level = if level < 0.0 { 0 } else { SECURITY_LEVEL_MAX };
                    }
                    None => self
                        .diags
                        .warn("security_level must be a number; ignored", prop.span),
                },
                "autoload" => self.take_flag(&value, prop.span, "autoload", FLAG_AUTOLOAD),
                "required" => self.take_flag(&value, prop.span, "required", FLAG_REQUIRED),
                other => self
                    .diags
                    .warn(format!("unknown module config key `{other}`; ignored"), prop.span),
            }
        }
    }

    fn take_str(
        &mut self,
        value: &Option<Const>,
        span: Span,
        key: &str,
        max: usize,
        apply: impl FnOnce(&mut ModuleInfo, String),
    ) {
        match value.as_ref().and_then(|v| v.as_str()) {
            Some(s) => {
                if s.len() > max {
                    self.diags.warn(
                        format!("module {key} exceeds {max} bytes and will be truncated"),
                        span,
                    );
                }
                apply(&mut self.info, s.to_string());
            }
            None => self
                .diags
                .warn(format!("module {key} must be a string literal; ignored"), span),
        }
    }

    fn take_flag(&mut self, value: &Option<Const>, span: Span, key: &str, bit: u16) {
        match value.as_ref().and_then(|v| v.as_bool()) {
            Some(true) => self.flags |= bit,
            Some(false) => {}
            None => self
                .diags
                .warn(format!("module {key} must be a boolean; ignored"), span),
        }
    }

    fn take_dependencies(&mut self, value: &Option<Const>, span: Span) {
        let Some(Const::Arr(items)) = value else {
            self.diags
                .warn("module dependencies must be an array of strings; ignored", span);
            return;
        };
        let mut deps = Vec::new();
        for item in items {
            match item.as_str() {
                Some(dep) => {
                    if dep.len() > DEP_MAX {
                        self.diags.warn(
                            format!("dependency name exceeds {DEP_MAX} bytes and will be truncated"),
                            span,
                        );
                    }
                    deps.push(dep.to_string());
                }
                None => self
                    .diags
                    .warn("dependency names must be string literals; entry ignored", span),
            }
        }
        if deps.len() > MAX_DEPS {
            self.diags.warn(
                format!("at most {MAX_DEPS} dependencies are supported; extras dropped"),
                span,
            );
            deps.truncate(MAX_DEPS);
        }
        self.info.dependencies = deps;
    }

    fn handle_command(&mut self, args: &'a [Expr], span: Span) {
        let Some(Expr::Object { props, .. }) = args.first() else {
            self.diags
                .warn("AKM.command requires an object literal; registration ignored", span);
            return;
        };

        let mut cmd = Command {
            name: String::new(),
            syntax: String::new(),
            description: String::new(),
            category: String::new(),
            handler: None,
        };
        for prop in props {
            let value = eval(&prop.value);
            let Some(text) = value.as_ref().and_then(|v| v.as_str()) else {
                self.diags.warn(
                    format!("command {} must be a string literal; ignored", prop.key),
                    prop.span,
                );
                continue;
            };
            match prop.key.as_str() {
                "name" => cmd.name = text.to_string(),
                "syntax" => cmd.syntax = text.to_string(),
                "description" => cmd.description = text.to_string(),
                "category" => cmd.category = text.to_string(),
                other => self
                    .diags
                    .warn(format!("unknown command key `{other}`; ignored"), prop.span),
            }
        }
        if cmd.name.is_empty() {
            self.diags
                .warn("command registration without a name is ignored", span);
            return;
        }

        match args.get(1) {
            Some(Expr::Ident(ident)) => cmd.handler = Some(ident.name.clone()),
            _ => self.diags.warn(
                format!("command `{}` handler must be a named function", cmd.name),
                span,
            ),
        }

        self.commands.push(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use akm_module::caps::{CAP_LOG, CAP_NET};

    fn run(src: &str) -> (Extraction<'_>, Diagnostics) {
        // Leak keeps the borrow simple inside tests.
        let program = Box::leak(Box::new(
            Parser::new(src).expect("lexer").parse_program().expect("parse"),
        ));
        let mut diags = Diagnostics::default();
        let extraction = extract(program, &mut diags);
        (extraction, diags)
    }

    const PREAMBLE: &str = "function init() { return 0; }\nfunction exit() {}\n";

    #[test]
    fn extracts_module_config_fields() {
        let src = format!(
            "{PREAMBLE}AKM.module({{ name: \"net-probe\", version: \"2.1.0\", author: \"kern\", \
             capabilities: AKM.CAPS.LOG | AKM.CAPS.NET, dependencies: [\"vfs\", \"net\"], \
             security_level: 1, autoload: true }});"
        );
        let (extraction, diags) = run(&src);
        assert!(!diags.has_errors(), "{:?}", diags.errors);
        assert_eq!(extraction.info.name, "net-probe");
        assert_eq!(extraction.info.version, "2.1.0");
        assert_eq!(extraction.info.author, "kern");
        assert_eq!(extraction.info.capabilities, CAP_LOG | CAP_NET);
        assert_eq!(extraction.info.dependencies, ["vfs", "net"]);
        assert_eq!(extraction.info.security_level, 1);
        assert_eq!(extraction.flags, FLAG_AUTOLOAD);
    }

    #[test]
    fn missing_module_call_is_structural_error() {
        let (_, diags) = run(PREAMBLE);
        assert!(diags.has_errors());
        assert!(diags.errors[0].message.contains("AKM.module"));
    }

    #[test]
    fn duplicate_module_call_is_structural_error() {
        let src = format!("{PREAMBLE}AKM.module({{ name: \"a\" }});\nAKM.module({{ name: \"b\" }});");
        let (extraction, diags) = run(&src);
        assert!(diags.has_errors());
        assert_eq!(extraction.info.name, "a");
    }

    #[test]
    fn recognizes_all_three_function_shapes() {
        let src = "function a() {}\nexport function b() {}\nconst c = () => {};\nlet d = function () {};\nAKM.module({ name: \"m\" });";
        let (extraction, _) = run(src);
        let names: Vec<&str> = extraction.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert!(extraction.functions[1].exported);
    }

    #[test]
    fn non_function_bindings_are_ignored() {
        let src = format!("{PREAMBLE}let n = 4;\nAKM.module({{ name: \"m\" }});");
        let (extraction, _) = run(&src);
        assert!(extraction.function("n").is_none());
    }

    #[test]
    fn collects_api_calls_inside_function_bodies() {
        let src = format!(
            "{PREAMBLE}AKM.module({{ name: \"m\" }});\nfunction probe() {{ AKM.pciScan(); if (1) AKM.inb(0x60); }}"
        );
        let (extraction, _) = run(&src);
        let methods: Vec<&str> = extraction.api_calls.iter().map(|c| c.method.as_str()).collect();
        assert_eq!(methods, ["pciScan", "inb"]);
    }

    #[test]
    fn command_with_identifier_handler_is_recorded() {
        let src = format!(
            "{PREAMBLE}AKM.module({{ name: \"m\" }});\nfunction h(a) {{}}\nAKM.command({{ name: \"hi\", description: \"greets\" }}, h);"
        );
        let (extraction, diags) = run(&src);
        assert!(!diags.has_errors());
        assert_eq!(extraction.commands.len(), 1);
        assert_eq!(extraction.commands[0].name, "hi");
        assert_eq!(extraction.commands[0].handler.as_deref(), Some("h"));
    }

    #[test]
    fn non_identifier_handler_warns_and_clears() {
        let src = format!(
            "{PREAMBLE}AKM.module({{ name: \"m\" }});\nAKM.command({{ name: \"hi\" }}, () => {{}});"
        );
        let (extraction, diags) = run(&src);
        assert_eq!(extraction.commands[0].handler, None);
        assert!(diags.warnings.iter().any(|w| w.message.contains("handler")));
    }

    #[test]
    fn unknown_handler_name_warns_and_clears() {
        let src = format!("{PREAMBLE}AKM.module({{ name: \"m\" }});\nAKM.command({{ name: \"hi\" }}, nope);");
        let (extraction, diags) = run(&src);
        assert_eq!(extraction.commands[0].handler, None);
        assert!(diags.warnings.iter().any(|w| w.message.contains("nope")));
    }

    #[test]
    fn excess_dependencies_are_dropped_with_warning() {
        let src = format!(
            "{PREAMBLE}AKM.module({{ name: \"m\", dependencies: [\"a\",\"b\",\"c\",\"d\",\"e\"] }});"
        );
        let (extraction, diags) = run(&src);
        assert_eq!(extraction.info.dependencies.len(), 4);
        assert!(diags.warnings.iter().any(|w| w.message.contains("dropped")));
    }
}
