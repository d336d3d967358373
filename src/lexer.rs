use crate::source::Span;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Eof,

    Ident(String),
    Num(f64),
    Str(String),
    Template(Vec<TplPart>),

    // Keywords.
    KwFunction,
    KwReturn,
    KwLet,
    KwConst,
    KwVar,
    KwExport,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    KwTrue,
    KwFalse,
    KwNull,
    KwTypeof,

    // Delimiters.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Question,

    // Operators.
    Arrow,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Shl,
    Shr,
    UShr,
    AndAnd,
    OrOr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
}

/// One piece of a template literal: raw quasi text, or the raw source of
/// an `${...}` interpolation (never evaluated by this compiler).
#[derive(Clone, Debug, PartialEq)]
pub enum TplPart {
    Text(String),
    Expr(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}..{}",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_ws_and_comments()?;

        let start = self.pos;
        let Some(ch) = self.peek_char() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span::new(start, start),
            });
        };

        if is_ident_start(ch) {
            return Ok(self.lex_ident_or_keyword());
        }
        if ch.is_ascii_digit() {
            return self.lex_number();
        }
        if ch == '"' || ch == '\'' {
            return self.lex_string(ch);
        }
        if ch == '`' {
            return self.lex_template();
        }

        let kind = match ch {
            '(' => {
                self.bump_char();
                TokenKind::LParen
            }
            ')' => {
                self.bump_char();
                TokenKind::RParen
            }
            '{' => {
                self.bump_char();
                TokenKind::LBrace
            }
            '}' => {
                self.bump_char();
                TokenKind::RBrace
            }
            '[' => {
                self.bump_char();
                TokenKind::LBracket
            }
            ']' => {
                self.bump_char();
                TokenKind::RBracket
            }
            ',' => {
                self.bump_char();
                TokenKind::Comma
            }
            ';' => {
                self.bump_char();
                TokenKind::Semi
            }
            ':' => {
                self.bump_char();
                TokenKind::Colon
            }
            '.' => {
                self.bump_char();
                TokenKind::Dot
            }
            '?' => {
                self.bump_char();
                TokenKind::Question
            }
            '+' => {
                self.bump_char();
                TokenKind::Plus
            }
            '-' => {
                self.bump_char();
                TokenKind::Minus
            }
            '*' => {
                self.bump_char();
                TokenKind::Star
            }
            '/' => {
                self.bump_char();
                TokenKind::Slash
            }
            '%' => {
                self.bump_char();
                TokenKind::Percent
            }
            '~' => {
                self.bump_char();
                TokenKind::Tilde
            }
            '^' => {
                self.bump_char();
                TokenKind::Caret
            }
            '=' => {
                self.bump_char();
                if self.peek_char() == Some('>') {
                    self.bump_char();
                    TokenKind::Arrow
                } else if self.peek_char() == Some('=') {
                    self.bump_char();
                    if self.peek_char() == Some('=') {
                        self.bump_char();
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                self.bump_char();
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    if self.peek_char() == Some('=') {
                        self.bump_char();
                        TokenKind::NotEqEq
                    } else {
                        TokenKind::NotEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.bump_char();
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::LtEq
                } else if self.peek_char() == Some('<') {
                    self.bump_char();
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.bump_char();
                if self.peek_char() == Some('=') {
                    self.bump_char();
                    TokenKind::GtEq
                } else if self.peek_char() == Some('>') {
                    self.bump_char();
                    if self.peek_char() == Some('>') {
                        self.bump_char();
                        TokenKind::UShr
                    } else {
                        TokenKind::Shr
                    }
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                self.bump_char();
                if self.peek_char() == Some('&') {
                    self.bump_char();
                    TokenKind::AndAnd
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                self.bump_char();
                if self.peek_char() == Some('|') {
                    self.bump_char();
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            other => {
                return Err(self.error(start, format!("unexpected character `{other}`")));
            }
        };

        Ok(Token {
            kind,
            span: self.span(start, self.pos),
        })
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                self.bump_char();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        let kind = match text {
            "function" => TokenKind::KwFunction,
            "return" => TokenKind::KwReturn,
            "let" => TokenKind::KwLet,
            "const" => TokenKind::KwConst,
            "var" => TokenKind::KwVar,
            "export" => TokenKind::KwExport,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "while" => TokenKind::KwWhile,
            "for" => TokenKind::KwFor,
            "true" => TokenKind::KwTrue,
            "false" => TokenKind::KwFalse,
            "null" => TokenKind::KwNull,
            "typeof" => TokenKind::KwTypeof,
            _ => TokenKind::Ident(text.to_string()),
        };
        Token {
            kind,
            span: self.span(start, self.pos),
        }
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;

        // Hex literal.
        if self.peek_char() == Some('0')
            && matches!(self.peek_next_char(), Some('x') | Some('X'))
        {
            self.bump_char();
            self.bump_char();
            let digits_start = self.pos;
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_hexdigit() {
                    self.bump_char();
                } else {
                    break;
                }
            }
            if self.pos == digits_start {
                return Err(self.error(start, "hex literal needs at least one digit".to_string()));
            }
            let value = u32::from_str_radix(&self.src[digits_start..self.pos], 16)
                .map_err(|_| self.error(start, "hex literal out of range".to_string()))?;
            return Ok(Token {
                kind: TokenKind::Num(value as f64),
                span: self.span(start, self.pos),
            });
        }

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                self.bump_char();
            } else {
                break;
            }
        }
        // Fraction, but not a member access on a number.
        if self.peek_char() == Some('.')
            && self.peek_next_char().is_some_and(|c| c.is_ascii_digit())
        {
            self.bump_char();
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_digit() {
                    self.bump_char();
                } else {
                    break;
                }
            }
        }
        let text = &self.src[start..self.pos];
        let value: f64 = text
            .parse()
            .map_err(|_| self.error(start, format!("invalid number `{text}`")))?;
        Ok(Token {
            kind: TokenKind::Num(value),
            span: self.span(start, self.pos),
        })
    }

    fn lex_escape(&mut self, start: usize) -> Result<char, LexError> {
        self.bump_char(); // backslash
        let Some(esc) = self.peek_char() else {
            return Err(self.error(start, "unterminated string literal".to_string()));
        };
        self.bump_char();
        Ok(match esc {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            '`' => '`',
            '$' => '$',
            other => {
                return Err(self.error(start, format!("unsupported escape `\\{other}`")));
            }
        })
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.pos;
        self.bump_char(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error(start, "unterminated string literal".to_string())),
                Some(ch) if ch == quote => {
                    self.bump_char();
                    break;
                }
                Some('\\') => value.push(self.lex_escape(start)?),
                Some('\n') => {
                    return Err(self.error(start, "unterminated string literal".to_string()))
                }
                Some(ch) => {
                    value.push(ch);
                    self.bump_char();
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str(value),
            span: self.span(start, self.pos),
        })
    }

    /// Template literals are lexed into quasi-text and raw `${...}` parts;
    /// the interpolation source is kept verbatim and never re-lexed here.
    fn lex_template(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        self.bump_char(); // backtick
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek_char() {
                None => {
                    return Err(self.error(start, "unterminated template literal".to_string()))
                }
                Some('`') => {
                    self.bump_char();
                    break;
                }
                Some('\\') => text.push(self.lex_escape(start)?),
                Some('$') if self.peek_next_char() == Some('{') => {
                    if !text.is_empty() {
                        parts.push(TplPart::Text(std::mem::take(&mut text)));
                    }
                    self.bump_char();
                    self.bump_char();
                    let expr_start = self.pos;
                    let mut depth = 1usize;
                    loop {
                        match self.peek_char() {
                            None => {
                                return Err(self.error(
                                    start,
                                    "unterminated template interpolation".to_string(),
                                ))
                            }
                            Some('{') => {
                                depth += 1;
                                self.bump_char();
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                self.bump_char();
                            }
                            Some(_) => {
                                self.bump_char();
                            }
                        }
                    }
                    parts.push(TplPart::Expr(self.src[expr_start..self.pos].to_string()));
                    self.bump_char(); // closing brace
                }
                Some(ch) => {
                    text.push(ch);
                    self.bump_char();
                }
            }
        }
        if !text.is_empty() || parts.is_empty() {
            parts.push(TplPart::Text(text));
        }
        Ok(Token {
            kind: TokenKind::Template(parts),
            span: self.span(start, self.pos),
        })
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek_char() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump_char();
                }
                Some('/') if self.peek_next_char() == Some('/') => {
                    while let Some(ch) = self.peek_char() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump_char();
                    }
                }
                Some('/') if self.peek_next_char() == Some('*') => {
                    let start = self.pos;
                    self.bump_char();
                    self.bump_char();
                    loop {
                        match self.peek_char() {
                            None => {
                                return Err(
                                    self.error(start, "unterminated block comment".to_string())
                                )
                            }
                            Some('*') if self.peek_next_char() == Some('/') => {
                                self.bump_char();
                                self.bump_char();
                                break;
                            }
                            Some(_) => {
                                self.bump_char();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump_char(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span::new(start, end)
    }

    fn error(&self, start: usize, message: String) -> LexError {
        LexError {
            message,
            span: Span::new(start, self.pos.max(start + 1)),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().expect("lex");
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_keywords_and_idents() {
        assert_eq!(
            kinds("function init"),
            vec![
                TokenKind::KwFunction,
                TokenKind::Ident("init".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_numbers_including_hex() {
        assert_eq!(
            kinds("42 3.5 0x800"),
            vec![
                TokenKind::Num(42.0),
                TokenKind::Num(3.5),
                TokenKind::Num(2048.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_both_quote_styles_with_escapes() {
        assert_eq!(
            kinds(r#""a\n" 'b\''"#),
            vec![
                TokenKind::Str("a\n".to_string()),
                TokenKind::Str("b'".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn lexes_template_parts() {
        let toks = kinds("`hi ${x} there`");
        assert_eq!(
            toks[0],
            TokenKind::Template(vec![
                TplPart::Text("hi ".to_string()),
                TplPart::Expr("x".to_string()),
                TplPart::Text(" there".to_string()),
            ])
        );
    }

    #[test]
    fn lexes_plain_template_as_single_text_part() {
        assert_eq!(
            kinds("``")[0],
            TokenKind::Template(vec![TplPart::Text(String::new())])
        );
        assert_eq!(
            kinds("`hi`")[0],
            TokenKind::Template(vec![TplPart::Text("hi".to_string())])
        );
    }

    #[test]
    fn distinguishes_shift_and_comparison_operators() {
        assert_eq!(
            kinds("a >> b >>> c >= d"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Shr,
                TokenKind::Ident("b".to_string()),
                TokenKind::UShr,
                TokenKind::Ident("c".to_string()),
                TokenKind::GtEq,
                TokenKind::Ident("d".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn distinguishes_strict_equality() {
        assert_eq!(
            kinds("== === != !=="),
            vec![
                TokenKind::EqEq,
                TokenKind::EqEqEq,
                TokenKind::NotEq,
                TokenKind::NotEqEq,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn skips_line_and_block_comments() {
        assert_eq!(
            kinds("a // c\n/* b */ d"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Ident("d".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn reports_unterminated_string() {
        let mut lexer = Lexer::new("\"abc");
        let err = lexer.next_token().expect_err("should fail");
        assert!(err.message.contains("unterminated"));
    }
}
