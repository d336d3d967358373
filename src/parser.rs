use crate::ast::*;
use crate::lexer::{LexError, Lexer, Token, TokenKind};
use crate::source::Span;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}..{}",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            span: err.span,
        }
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token()?;
        Ok(Self { lexer, lookahead })
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !matches!(self.lookahead.kind, TokenKind::Eof) {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    fn bump(&mut self) -> Result<Token, ParseError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.lookahead.kind == kind {
            self.bump()
        } else {
            Err(self.error_here(&format!("expected {kind:?}")))
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        match &self.lookahead.kind {
            TokenKind::Ident(_) => {
                let tok = self.bump()?;
                let TokenKind::Ident(name) = tok.kind else {
                    unreachable!()
                };
                Ok(Ident {
                    name,
                    span: tok.span,
                })
            }
            _ => Err(self.error_here("expected identifier")),
        }
    }

    fn error_here(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            span: self.lookahead.span,
        }
    }

    /// Statements end in `;`; it may be omitted before `}` or EOF.
    fn eat_semi(&mut self) -> Result<(), ParseError> {
        match self.lookahead.kind {
            TokenKind::Semi => {
                self.bump()?;
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => Err(self.error_here("expected `;`")),
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.lookahead.kind {
            TokenKind::KwExport => self.parse_export(),
            TokenKind::KwFunction => self.parse_fn_decl(false),
            TokenKind::KwLet | TokenKind::KwConst | TokenKind::KwVar => {
                self.parse_var_decl(false)
            }
            TokenKind::KwReturn => self.parse_return(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::LBrace => {
                let start = self.lookahead.span.start;
                let body = self.parse_block()?;
                let end = self.lookahead.span.start;
                Ok(Stmt::Block {
                    body,
                    span: Span::new(start, end),
                })
            }
            TokenKind::Semi => {
                let tok = self.bump()?;
                Ok(Stmt::Empty { span: tok.span })
            }
            _ => {
                let expr = self.parse_expr()?;
                let span = expr.span();
                self.eat_semi()?;
                Ok(Stmt::Expr { expr, span })
            }
        }
    }

    fn parse_export(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwExport)?.span.start;
        match self.lookahead.kind {
            TokenKind::KwFunction => self.parse_fn_decl(true),
            TokenKind::KwLet | TokenKind::KwConst | TokenKind::KwVar => self.parse_var_decl(true),
            TokenKind::LBrace => {
                self.bump()?;
                let mut names = Vec::new();
                while !matches!(self.lookahead.kind, TokenKind::RBrace) {
                    names.push(self.expect_ident()?);
                    if matches!(self.lookahead.kind, TokenKind::Comma) {
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RBrace)?.span.end;
                self.eat_semi()?;
                Ok(Stmt::ExportNames {
                    names,
                    span: Span::new(start, end),
                })
            }
            _ => Err(self.error_here("expected function, variable declaration, or `{` after `export`")),
        }
    }

    fn parse_fn_decl(&mut self, exported: bool) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwFunction)?.span.start;
        let name = self.expect_ident()?;
        let def = self.parse_fn_rest(start)?;
        let span = def.span;
        Ok(Stmt::FnDecl {
            name,
            def,
            exported,
            span,
        })
    }

    /// Parses `(params) { body }` after the introducer.
    fn parse_fn_rest(&mut self, start: usize) -> Result<FnDef, ParseError> {
        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !matches!(self.lookahead.kind, TokenKind::RBrace) {
            body.push(self.parse_stmt()?);
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(FnDef {
            params,
            body,
            span: Span::new(start, end),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        while !matches!(self.lookahead.kind, TokenKind::RParen) {
            let name = self.expect_ident()?;
            let default = if matches!(self.lookahead.kind, TokenKind::Assign) {
                self.bump()?;
                Some(self.parse_assign()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if matches!(self.lookahead.kind, TokenKind::Comma) {
                self.bump()?;
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn parse_var_decl(&mut self, exported: bool) -> Result<Stmt, ParseError> {
        let tok = self.bump()?;
        let kind = match tok.kind {
            TokenKind::KwLet => DeclKind::Let,
            TokenKind::KwConst => DeclKind::Const,
            TokenKind::KwVar => DeclKind::Var,
            _ => unreachable!(),
        };
        let start = tok.span.start;
        let name = self.expect_ident()?;
        let init = if matches!(self.lookahead.kind, TokenKind::Assign) {
            self.bump()?;
            Some(self.parse_assign()?)
        } else {
            None
        };
        let end = init
            .as_ref()
            .map(|e| e.span().end)
            .unwrap_or(name.span.end);
        self.eat_semi()?;
        Ok(Stmt::VarDecl {
            kind,
            name,
            init,
            exported,
            span: Span::new(start, end),
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        let tok = self.expect(TokenKind::KwReturn)?;
        let start = tok.span.start;
        let value = if matches!(
            self.lookahead.kind,
            TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
        ) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let end = value.as_ref().map(|e| e.span().end).unwrap_or(tok.span.end);
        self.eat_semi()?;
        Ok(Stmt::Return {
            value,
            span: Span::new(start, end),
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !matches!(self.lookahead.kind, TokenKind::RBrace) {
            body.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    /// A branch body: a `{ ... }` block or a single statement.
    fn parse_branch(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if matches!(self.lookahead.kind, TokenKind::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwIf)?.span.start;
        self.expect(TokenKind::LParen)?;
        let test = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_branch()?;
        let else_branch = if matches!(self.lookahead.kind, TokenKind::KwElse) {
            self.bump()?;
            Some(self.parse_branch()?)
        } else {
            None
        };
        let end = self.lookahead.span.start;
        Ok(Stmt::If {
            test,
            then_branch,
            else_branch,
            span: Span::new(start, end),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwWhile)?.span.start;
        self.expect(TokenKind::LParen)?;
        let test = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_branch()?;
        let end = self.lookahead.span.start;
        Ok(Stmt::While {
            test,
            body,
            span: Span::new(start, end),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.expect(TokenKind::KwFor)?.span.start;
        self.expect(TokenKind::LParen)?;
        let init = match self.lookahead.kind {
            TokenKind::Semi => {
                self.bump()?;
                None
            }
            TokenKind::KwLet | TokenKind::KwConst | TokenKind::KwVar => {
                // The declaration consumes its own `;`.
                Some(Box::new(self.parse_var_decl(false)?))
            }
            _ => {
                let expr = self.parse_expr()?;
                let span = expr.span();
                self.expect(TokenKind::Semi)?;
                Some(Box::new(Stmt::Expr { expr, span }))
            }
        };
        let test = if matches!(self.lookahead.kind, TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semi)?;
        let update = if matches!(self.lookahead.kind, TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::RParen)?;
        let body = self.parse_branch()?;
        let end = self.lookahead.span.start;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
            span: Span::new(start, end),
        })
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_cond()?;
        if matches!(self.lookahead.kind, TokenKind::Assign) {
            self.bump()?;
            let value = self.parse_assign()?;
            let span = left.span().to(value.span());
            return Ok(Expr::Assign {
                target: Box::new(left),
                value: Box::new(value),
                span,
            });
        }
        Ok(left)
    }

    fn parse_cond(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_binary(0)?;
        if matches!(self.lookahead.kind, TokenKind::Question) {
            self.bump()?;
            let then_value = self.parse_assign()?;
            self.expect(TokenKind::Colon)?;
            let else_value = self.parse_assign()?;
            let span = test.span().to(else_value.span());
            return Ok(Expr::Cond {
                test: Box::new(test),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
                span,
            });
        }
        Ok(test)
    }

    fn binary_op(kind: &TokenKind, level: u8) -> Option<BinaryOp> {
        let (op, op_level) = match kind {
            TokenKind::OrOr => (BinaryOp::Or, 0),
            TokenKind::AndAnd => (BinaryOp::And, 1),
            TokenKind::Pipe => (BinaryOp::BitOr, 2),
            TokenKind::Caret => (BinaryOp::BitXor, 3),
            TokenKind::Amp => (BinaryOp::BitAnd, 4),
            TokenKind::EqEq => (BinaryOp::Eq, 5),
            TokenKind::EqEqEq => (BinaryOp::StrictEq, 5),
            TokenKind::NotEq => (BinaryOp::NotEq, 5),
            TokenKind::NotEqEq => (BinaryOp::StrictNotEq, 5),
            TokenKind::Lt => (BinaryOp::Lt, 6),
            TokenKind::LtEq => (BinaryOp::LtEq, 6),
            TokenKind::Gt => (BinaryOp::Gt, 6),
            TokenKind::GtEq => (BinaryOp::GtEq, 6),
            TokenKind::Shl => (BinaryOp::Shl, 7),
            TokenKind::Shr => (BinaryOp::Shr, 7),
            TokenKind::UShr => (BinaryOp::UShr, 7),
            TokenKind::Plus => (BinaryOp::Add, 8),
            TokenKind::Minus => (BinaryOp::Sub, 8),
            TokenKind::Star => (BinaryOp::Mul, 9),
            TokenKind::Slash => (BinaryOp::Div, 9),
            TokenKind::Percent => (BinaryOp::Mod, 9),
            _ => return None,
        };
        (op_level == level).then_some(op)
    }

    const MAX_BINARY_LEVEL: u8 = 9;

    /// Left-associative binary operators, lowest precedence first.
    fn parse_binary(&mut self, level: u8) -> Result<Expr, ParseError> {
        if level > Self::MAX_BINARY_LEVEL {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = Self::binary_op(&self.lookahead.kind, level) {
            self.bump()?;
            let right = self.parse_binary(level + 1)?;
            let span = left.span().to(right.span());
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.lookahead.kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::KwTypeof => Some(UnaryOp::TypeOf),
            _ => None,
        };
        let Some(op) = op else {
            return self.parse_postfix();
        };
        let start = self.bump()?.span.start;
        let operand = self.parse_unary()?;
        let span = Span::new(start, operand.span().end);
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            span,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.lookahead.kind {
                TokenKind::Dot => {
                    self.bump()?;
                    let name = self.expect_ident()?;
                    let span = expr.span().to(name.span);
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Name(name.name),
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.bump()?;
                    let index = self.parse_expr()?;
                    let end = self.expect(TokenKind::RBracket)?.span.end;
                    let span = Span::new(expr.span().start, end);
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: MemberProp::Computed(Box::new(index)),
                        span,
                    };
                }
                TokenKind::LParen => {
                    self.bump()?;
                    let mut args = Vec::new();
                    while !matches!(self.lookahead.kind, TokenKind::RParen) {
                        args.push(self.parse_assign()?);
                        if matches!(self.lookahead.kind, TokenKind::Comma) {
                            self.bump()?;
                        } else {
                            break;
                        }
                    }
                    let end = self.expect(TokenKind::RParen)?.span.end;
                    let span = Span::new(expr.span().start, end);
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        span,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// An arrow body: `{ ... }` statements, or an expression desugared to
    /// a single `return`.
    fn parse_arrow_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if matches!(self.lookahead.kind, TokenKind::LBrace) {
            self.parse_block()
        } else {
            let value = self.parse_assign()?;
            let span = value.span();
            Ok(vec![Stmt::Return {
                value: Some(value),
                span,
            }])
        }
    }

    /// Reinterprets a parenthesized expression list as arrow parameters.
    fn exprs_to_params(&self, exprs: Vec<Expr>) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        for expr in exprs {
            match expr {
                Expr::Ident(name) => params.push(Param {
                    name,
                    default: None,
                }),
                Expr::Assign { target, value, .. } => match *target {
                    Expr::Ident(name) => params.push(Param {
                        name,
                        default: Some(*value),
                    }),
                    other => {
                        return Err(ParseError {
                            message: "invalid arrow function parameter".to_string(),
                            span: other.span(),
                        })
                    }
                },
                other => {
                    return Err(ParseError {
                        message: "invalid arrow function parameter".to_string(),
                        span: other.span(),
                    })
                }
            }
        }
        Ok(params)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match &self.lookahead.kind {
            TokenKind::Num(_) => {
                let tok = self.bump()?;
                let TokenKind::Num(value) = tok.kind else {
                    unreachable!()
                };
                Ok(Expr::Num {
                    value,
                    span: tok.span,
                })
            }
            TokenKind::Str(_) => {
                let tok = self.bump()?;
                let TokenKind::Str(value) = tok.kind else {
                    unreachable!()
                };
                Ok(Expr::Str {
                    value,
                    span: tok.span,
                })
            }
            TokenKind::Template(_) => {
                let tok = self.bump()?;
                let TokenKind::Template(parts) = tok.kind else {
                    unreachable!()
                };
                Ok(Expr::Template {
                    parts,
                    span: tok.span,
                })
            }
            TokenKind::KwTrue | TokenKind::KwFalse => {
                let tok = self.bump()?;
                Ok(Expr::Bool {
                    value: tok.kind == TokenKind::KwTrue,
                    span: tok.span,
                })
            }
            TokenKind::KwNull => {
                let tok = self.bump()?;
                Ok(Expr::Null { span: tok.span })
            }
            TokenKind::Ident(_) => {
                let ident = self.expect_ident()?;
                // `x => ...`: a single-parameter arrow.
                if matches!(self.lookahead.kind, TokenKind::Arrow) {
                    let start = ident.span.start;
                    self.bump()?;
                    let body = self.parse_arrow_body()?;
                    let end = body.last().map(|s| s.span().end).unwrap_or(start);
                    let span = Span::new(start, end);
                    return Ok(Expr::Arrow {
                        def: FnDef {
                            params: vec![Param {
                                name: ident,
                                default: None,
                            }],
                            body,
                            span,
                        },
                        span,
                    });
                }
                Ok(Expr::Ident(ident))
            }
            TokenKind::KwFunction => {
                let start = self.bump()?.span.start;
                let name = match self.lookahead.kind {
                    TokenKind::Ident(_) => Some(self.expect_ident()?),
                    _ => None,
                };
                let def = self.parse_fn_rest(start)?;
                let span = def.span;
                Ok(Expr::Function { name, def, span })
            }
            TokenKind::LParen => {
                let start = self.bump()?.span.start;
                let mut exprs: Vec<Expr> = Vec::new();
                while !matches!(self.lookahead.kind, TokenKind::RParen) {
                    exprs.push(self.parse_assign()?);
                    if matches!(self.lookahead.kind, TokenKind::Comma) {
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                if matches!(self.lookahead.kind, TokenKind::Arrow) {
                    self.bump()?;
                    let params = self.exprs_to_params(exprs)?;
                    let body = self.parse_arrow_body()?;
                    let end = body.last().map(|s| s.span().end).unwrap_or(start);
                    let span = Span::new(start, end);
                    return Ok(Expr::Arrow {
                        def: FnDef { params, body, span },
                        span,
                    });
                }
                if exprs.len() == 1 {
                    Ok(exprs.remove(0))
                } else {
                    Err(self.error_here("expected `=>` after parenthesized list"))
                }
            }
            TokenKind::LBracket => {
                let start = self.bump()?.span.start;
                let mut elements = Vec::new();
                while !matches!(self.lookahead.kind, TokenKind::RBracket) {
                    elements.push(self.parse_assign()?);
                    if matches!(self.lookahead.kind, TokenKind::Comma) {
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                let end = self.expect(TokenKind::RBracket)?.span.end;
                Ok(Expr::Array {
                    elements,
                    span: Span::new(start, end),
                })
            }
            TokenKind::LBrace => self.parse_object(),
            _ => Err(self.error_here("expected expression")),
        }
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        let start = self.expect(TokenKind::LBrace)?.span.start;
        let mut props = Vec::new();
        while !matches!(self.lookahead.kind, TokenKind::RBrace) {
            let (key, key_span) = match &self.lookahead.kind {
                TokenKind::Ident(_) => {
                    let ident = self.expect_ident()?;
                    (ident.name, ident.span)
                }
                TokenKind::Str(_) => {
                    let tok = self.bump()?;
                    let TokenKind::Str(value) = tok.kind else {
                        unreachable!()
                    };
                    (value, tok.span)
                }
                _ => return Err(self.error_here("expected property name")),
            };
            let value = if matches!(self.lookahead.kind, TokenKind::Colon) {
                self.bump()?;
                self.parse_assign()?
            } else {
                // Shorthand `{ name }`.
                Expr::Ident(Ident {
                    name: key.clone(),
                    span: key_span,
                })
            };
            let span = Span::new(key_span.start, value.span().end);
            props.push(Prop { key, value, span });
            if matches!(self.lookahead.kind, TokenKind::Comma) {
                self.bump()?;
            } else {
                break;
            }
        }
        let end = self.expect(TokenKind::RBrace)?.span.end;
        Ok(Expr::Object {
            props,
            span: Span::new(start, end),
        })
    }
}
