//! The restricted constant evaluator.
//!
//! Module configuration and lowered operands may only use a small literal
//! language: primitive literals, numeric negation, arrays and objects of
//! literals, interpolation-free template literals, `AKM.CAPS.<NAME>`
//! capability constants, and `|` over numbers. Identifiers that cannot be
//! resolved evaluate to a [`Const::Ref`] sentinel; everything else fails.

use crate::ast::{BinaryOp, Expr, MemberProp, UnaryOp};
use crate::lexer::TplPart;
use akm_module::caps::capability_bit;

#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Arr(Vec<Const>),
    Obj(Vec<(String, Const)>),
    /// An identifier that did not resolve to a literal.
    Ref(String),
}

impl Const {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Const::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Const::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Const::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as a `u32` mask (used for capability fields).
    pub fn as_u32(&self) -> Option<u32> {
        let n = self.as_num()?;
        if !n.is_finite() || n < 0.0 || n > u32::MAX as f64 {
            return None;
        }
        Some(n as u32)
    }
}

/// Recognizes `AKM.CAPS.<NAME>` and yields the capability bit.
fn eval_caps_member(expr: &Expr) -> Option<f64> {
    let Expr::Member {
        object,
        property: MemberProp::Name(cap_name),
        ..
    } = expr
    else {
        return None;
    };
    let Expr::Member {
        object: root,
        property: MemberProp::Name(caps),
        ..
    } = object.as_ref()
    else {
        return None;
    };
    if caps != "CAPS" {
        return None;
    }
    match root.as_ref() {
        Expr::Ident(ident) if ident.name == "AKM" => {
            capability_bit(cap_name).map(|bit| bit as f64)
        }
        _ => None,
    }
}

/// Evaluates an expression under the restricted literal language.
pub fn eval(expr: &Expr) -> Option<Const> {
    match expr {
        Expr::Num { value, .. } => Some(Const::Num(*value)),
        Expr::Str { value, .. } => Some(Const::Str(value.clone())),
        Expr::Bool { value, .. } => Some(Const::Bool(*value)),
        Expr::Null { .. } => Some(Const::Null),
        Expr::Template { parts, .. } => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TplPart::Text(text) => out.push_str(text),
                    TplPart::Expr(_) => return None,
                }
            }
            Some(Const::Str(out))
        }
        Expr::Ident(ident) => Some(Const::Ref(ident.name.clone())),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
            ..
        } => match eval(operand)? {
            Const::Num(n) => Some(Const::Num(-n)),
            _ => None,
        },
        Expr::Array { elements, .. } => {
            let values = elements.iter().map(eval).collect::<Option<Vec<_>>>()?;
            Some(Const::Arr(values))
        }
        Expr::Object { props, .. } => {
            let mut values = Vec::with_capacity(props.len());
            for prop in props {
                values.push((prop.key.clone(), eval(&prop.value)?));
            }
            Some(Const::Obj(values))
        }
        Expr::Member { .. } => eval_caps_member(expr).map(Const::Num),
        Expr::Binary {
            op: BinaryOp::BitOr,
            left,
            right,
            ..
        } => {
            let left = eval(left)?.as_u32()?;
            let right = eval(right)?.as_u32()?;
            Some(Const::Num((left | right) as f64))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use akm_module::caps::{CAP_LOG, CAP_NET};

    fn eval_src(src: &str) -> Option<Const> {
        let expr = Parser::new(src).expect("lexer").parse_expr().expect("parse");
        eval(&expr)
    }

    #[test]
    fn evaluates_primitive_literals() {
        assert_eq!(eval_src("42"), Some(Const::Num(42.0)));
        assert_eq!(eval_src("-3"), Some(Const::Num(-3.0)));
        assert_eq!(eval_src("\"hi\""), Some(Const::Str("hi".to_string())));
        assert_eq!(eval_src("true"), Some(Const::Bool(true)));
        assert_eq!(eval_src("null"), Some(Const::Null));
    }

    #[test]
    fn evaluates_nested_collections() {
        assert_eq!(
            eval_src("[1, \"a\"]"),
            Some(Const::Arr(vec![
                Const::Num(1.0),
                Const::Str("a".to_string())
            ]))
        );
        assert_eq!(
            eval_src("{ deps: [\"vfs\"] }"),
            Some(Const::Obj(vec![(
                "deps".to_string(),
                Const::Arr(vec![Const::Str("vfs".to_string())])
            )]))
        );
    }

    #[test]
    fn template_without_interpolation_concatenates() {
        assert_eq!(eval_src("`ab`"), Some(Const::Str("ab".to_string())));
        assert_eq!(eval_src("`a${x}b`"), None);
    }

    #[test]
    fn unresolved_identifier_becomes_ref() {
        assert_eq!(eval_src("someVar"), Some(Const::Ref("someVar".to_string())));
    }

    #[test]
    fn caps_members_or_into_masks() {
        assert_eq!(
            eval_src("AKM.CAPS.LOG | AKM.CAPS.NET"),
            Some(Const::Num((CAP_LOG | CAP_NET) as f64))
        );
        assert_eq!(eval_src("AKM.CAPS.NOPE"), None);
    }

    #[test]
    fn arithmetic_is_not_constant_evaluated() {
        assert_eq!(eval_src("2 + 3"), None);
        assert_eq!(eval_src("f(1)"), None);
    }
}
