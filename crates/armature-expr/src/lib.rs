//! Expression parsing and evaluation for armature evaluators.
//!
//! Scalar parameters marked as expressible carry an evaluation string like
//! `"b * 2 + sin(alpha)"`. This crate turns such strings into an [`Ast`],
//! reports the variables they mention, and evaluates them against a variable
//! map and a [`FunctionRegistry`] of named functions.
//!
//! # Usage
//!
//! ```
//! use armature_expr::{Expr, std_registry};
//! use std::collections::HashMap;
//!
//! let expr = Expr::parse("b * 2 + 1").unwrap();
//! let vars: HashMap<String, f64> = [("b".to_string(), 20.0)].into();
//! let value = expr.eval(&vars, &std_registry()).unwrap();
//! assert_eq!(value, 41.0);
//! ```

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while parsing or evaluating an expression.
///
/// All of these are recoverable: a bad evaluation string leaves the target
/// parameter untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at byte {pos}: {msg}")]
    Parse { pos: usize, msg: String },
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("function {name} expects {expected} arguments, got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },
}

// ============================================================================
// AST
// ============================================================================

/// Binary operators, in source syntax: `+ - * / % ^`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ast {
    Num(f64),
    Var(String),
    Neg(Box<Ast>),
    BinOp(BinOp, Box<Ast>, Box<Ast>),
    Call(String, Vec<Ast>),
}

/// A parsed expression, ready for repeated evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    ast: Ast,
}

impl Expr {
    /// Parses an expression string.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, at: 0 };
        let ast = parser.expr(0)?;
        parser.expect_end()?;
        Ok(Expr { ast })
    }

    /// Returns the parsed tree.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Evaluates against a variable map and a function registry.
    pub fn eval(
        &self,
        vars: &HashMap<String, f64>,
        registry: &FunctionRegistry,
    ) -> Result<f64, ExprError> {
        eval_ast(&self.ast, vars, registry)
    }

    /// Lists the variable names the expression mentions, sorted and deduplicated.
    pub fn variables(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        collect_vars(&self.ast, &mut names);
        names.into_iter().collect()
    }
}

fn collect_vars(ast: &Ast, out: &mut BTreeSet<String>) {
    match ast {
        Ast::Num(_) => {}
        Ast::Var(name) => {
            out.insert(name.clone());
        }
        Ast::Neg(inner) => collect_vars(inner, out),
        Ast::BinOp(_, lhs, rhs) => {
            collect_vars(lhs, out);
            collect_vars(rhs, out);
        }
        Ast::Call(_, args) => {
            for arg in args {
                collect_vars(arg, out);
            }
        }
    }
}

fn eval_ast(
    ast: &Ast,
    vars: &HashMap<String, f64>,
    registry: &FunctionRegistry,
) -> Result<f64, ExprError> {
    match ast {
        Ast::Num(n) => Ok(*n),
        Ast::Var(name) => vars
            .get(name)
            .copied()
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
        Ast::Neg(inner) => Ok(-eval_ast(inner, vars, registry)?),
        Ast::BinOp(op, lhs, rhs) => {
            let a = eval_ast(lhs, vars, registry)?;
            let b = eval_ast(rhs, vars, registry)?;
            Ok(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
                BinOp::Pow => a.powf(b),
            })
        }
        Ast::Call(name, args) => {
            let func = registry
                .get(name)
                .ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
            if args.len() != func.arg_count() {
                return Err(ExprError::WrongArity {
                    name: name.clone(),
                    expected: func.arg_count(),
                    got: args.len(),
                });
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_ast(arg, vars, registry)?);
            }
            Ok(func.call(&values))
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'+' => push_simple(&mut tokens, &mut i, Token::Plus),
            b'-' => push_simple(&mut tokens, &mut i, Token::Minus),
            b'*' => push_simple(&mut tokens, &mut i, Token::Star),
            b'/' => push_simple(&mut tokens, &mut i, Token::Slash),
            b'%' => push_simple(&mut tokens, &mut i, Token::Percent),
            b'^' => push_simple(&mut tokens, &mut i, Token::Caret),
            b'(' => push_simple(&mut tokens, &mut i, Token::LParen),
            b')' => push_simple(&mut tokens, &mut i, Token::RParen),
            b',' => push_simple(&mut tokens, &mut i, Token::Comma),
            b'0'..=b'9' | b'.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                // Exponent suffix: 1e-3, 2.5E+6
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &input[start..i];
                let value = text.parse::<f64>().map_err(|_| ExprError::Parse {
                    pos: start,
                    msg: format!("bad number literal `{text}`"),
                })?;
                tokens.push((start, Token::Num(value)));
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_string())));
            }
            _ => {
                return Err(ExprError::Parse {
                    pos: i,
                    msg: format!("unexpected character `{}`", input[i..].chars().next().unwrap_or('?')),
                });
            }
        }
    }
    Ok(tokens)
}

fn push_simple(tokens: &mut Vec<(usize, Token)>, i: &mut usize, token: Token) {
    tokens.push((*i, token));
    *i += 1;
}

// ============================================================================
// Pratt parser
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Token)>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let t = self.tokens.get(self.at).cloned();
        if t.is_some() {
            self.at += 1;
        }
        t
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.at)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0)
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        if self.at == self.tokens.len() {
            Ok(())
        } else {
            Err(ExprError::Parse {
                pos: self.pos(),
                msg: "trailing input after expression".to_string(),
            })
        }
    }

    fn expr(&mut self, min_bp: u8) -> Result<Ast, ExprError> {
        let mut lhs = self.prefix()?;
        while let Some(op) = self.peek().and_then(binop_of) {
            let (l_bp, r_bp) = binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.expr(r_bp)?;
            lhs = Ast::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Ast, ExprError> {
        let pos = self.pos();
        match self.next() {
            Some((_, Token::Num(n))) => Ok(Ast::Num(n)),
            Some((_, Token::Minus)) => {
                // Unary minus binds tighter than * but looser than ^,
                // so -a^2 parses as -(a^2).
                let operand = self.expr(5)?;
                Ok(Ast::Neg(Box::new(operand)))
            }
            Some((_, Token::LParen)) => {
                let inner = self.expr(0)?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some((_, Token::Ident(name))) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let args = self.call_args()?;
                    Ok(Ast::Call(name, args))
                } else {
                    Ok(Ast::Var(name))
                }
            }
            Some((p, t)) => Err(ExprError::Parse {
                pos: p,
                msg: format!("unexpected token {t:?}"),
            }),
            None => Err(ExprError::Parse {
                pos,
                msg: "unexpected end of expression".to_string(),
            }),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Ast>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.expr(0)?);
            match self.next() {
                Some((_, Token::Comma)) => continue,
                Some((_, Token::RParen)) => return Ok(args),
                Some((p, t)) => {
                    return Err(ExprError::Parse {
                        pos: p,
                        msg: format!("expected `,` or `)`, got {t:?}"),
                    })
                }
                None => {
                    return Err(ExprError::Parse {
                        pos: self.pos(),
                        msg: "unterminated argument list".to_string(),
                    })
                }
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        match self.next() {
            Some((_, Token::RParen)) => Ok(()),
            Some((p, t)) => Err(ExprError::Parse {
                pos: p,
                msg: format!("expected `)`, got {t:?}"),
            }),
            None => Err(ExprError::Parse {
                pos: self.pos(),
                msg: "missing closing `)`".to_string(),
            }),
        }
    }
}

fn binop_of(token: &Token) -> Option<BinOp> {
    match token {
        Token::Plus => Some(BinOp::Add),
        Token::Minus => Some(BinOp::Sub),
        Token::Star => Some(BinOp::Mul),
        Token::Slash => Some(BinOp::Div),
        Token::Percent => Some(BinOp::Rem),
        Token::Caret => Some(BinOp::Pow),
        _ => None,
    }
}

fn binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Add | BinOp::Sub => (1, 2),
        BinOp::Mul | BinOp::Div | BinOp::Rem => (3, 4),
        // Right-associative: a^b^c = a^(b^c)
        BinOp::Pow => (7, 6),
    }
}

// ============================================================================
// Function registry
// ============================================================================

/// A named function callable from expressions.
pub trait ExprFn: Send + Sync {
    fn name(&self) -> &str;
    fn arg_count(&self) -> usize;
    fn call(&self, args: &[f64]) -> f64;
}

/// Registry of functions available to [`Expr::eval`].
#[derive(Default)]
pub struct FunctionRegistry {
    funcs: HashMap<String, Box<dyn ExprFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under its own name, replacing any previous entry.
    pub fn register<F: ExprFn + 'static>(&mut self, func: F) {
        self.funcs.insert(func.name().to_string(), Box::new(func));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ExprFn> {
        self.funcs.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

// ============================================================================
// Standard functions
// ============================================================================

macro_rules! define_fn {
    ($name:ident, $str_name:literal, $args:literal, |$($arg:ident),*| $body:expr) => {
        pub struct $name;

        impl ExprFn for $name {
            fn name(&self) -> &str { $str_name }
            fn arg_count(&self) -> usize { $args }
            fn call(&self, args: &[f64]) -> f64 {
                let [$($arg),*] = args else { return 0.0 };
                $body
            }
        }
    };
}

/// Pi constant: pi() = 3.14159...
pub struct Pi;
impl ExprFn for Pi {
    fn name(&self) -> &str {
        "pi"
    }
    fn arg_count(&self) -> usize {
        0
    }
    fn call(&self, _args: &[f64]) -> f64 {
        std::f64::consts::PI
    }
}

/// Euler's number: e() = 2.71828...
pub struct E;
impl ExprFn for E {
    fn name(&self) -> &str {
        "e"
    }
    fn arg_count(&self) -> usize {
        0
    }
    fn call(&self, _args: &[f64]) -> f64 {
        std::f64::consts::E
    }
}

define_fn!(Sin, "sin", 1, |a| a.sin());
define_fn!(Cos, "cos", 1, |a| a.cos());
define_fn!(Tan, "tan", 1, |a| a.tan());
define_fn!(Asin, "asin", 1, |a| a.asin());
define_fn!(Acos, "acos", 1, |a| a.acos());
define_fn!(Atan, "atan", 1, |a| a.atan());
define_fn!(Atan2, "atan2", 2, |y, x| y.atan2(*x));

define_fn!(Sqrt, "sqrt", 1, |a| a.sqrt());
define_fn!(Exp, "exp", 1, |a| a.exp());
define_fn!(Ln, "ln", 1, |a| a.ln());
define_fn!(Log10, "log10", 1, |a| a.log10());
define_fn!(Pow, "pow", 2, |a, b| a.powf(*b));

define_fn!(Abs, "abs", 1, |a| a.abs());
define_fn!(Sign, "sign", 1, |a| a.signum());
define_fn!(Floor, "floor", 1, |a| a.floor());
define_fn!(Ceil, "ceil", 1, |a| a.ceil());
define_fn!(Round, "round", 1, |a| a.round());
define_fn!(Min, "min", 2, |a, b| a.min(*b));
define_fn!(Max, "max", 2, |a, b| a.max(*b));
define_fn!(Clamp, "clamp", 3, |x, lo, hi| x.clamp(*lo, *hi));

define_fn!(Radians, "radians", 1, |a| a.to_radians());
define_fn!(Degrees, "degrees", 1, |a| a.to_degrees());

/// Registers the standard function set into the given registry.
pub fn register_std(registry: &mut FunctionRegistry) {
    registry.register(Pi);
    registry.register(E);

    registry.register(Sin);
    registry.register(Cos);
    registry.register(Tan);
    registry.register(Asin);
    registry.register(Acos);
    registry.register(Atan);
    registry.register(Atan2);

    registry.register(Sqrt);
    registry.register(Exp);
    registry.register(Ln);
    registry.register(Log10);
    registry.register(Pow);

    registry.register(Abs);
    registry.register(Sign);
    registry.register(Floor);
    registry.register(Ceil);
    registry.register(Round);
    registry.register(Min);
    registry.register(Max);
    registry.register(Clamp);

    registry.register(Radians);
    registry.register(Degrees);
}

/// Creates a new registry with all standard functions.
pub fn std_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    register_std(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str, vars: &[(&str, f64)]) -> f64 {
        let registry = std_registry();
        let expr = Expr::parse(expr).unwrap();
        let var_map: HashMap<String, f64> =
            vars.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        expr.eval(&var_map, &registry).unwrap()
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(eval("2 + 3 * 4", &[]), 14.0);
        assert_eq!(eval("(2 + 3) * 4", &[]), 20.0);
        assert_eq!(eval("10 / 4", &[]), 2.5);
        assert_eq!(eval("7 % 4", &[]), 3.0);
        assert_eq!(eval("1.5e2", &[]), 150.0);
    }

    #[test]
    fn test_pow_right_associative() {
        // 2^3^2 = 2^(3^2) = 512
        assert_eq!(eval("2 ^ 3 ^ 2", &[]), 512.0);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-3 + 5", &[]), 2.0);
        assert_eq!(eval("-2 ^ 2", &[]), -4.0);
        assert_eq!(eval("2 * -3", &[]), -6.0);
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("b * 2 + 1", &[("b", 20.0)]), 41.0);
        assert_eq!(eval("width - height", &[("width", 10.0), ("height", 4.0)]), 6.0);
    }

    #[test]
    fn test_functions() {
        assert!((eval("sin(pi() / 2)", &[]) - 1.0).abs() < 1e-12);
        assert_eq!(eval("max(3, 7)", &[]), 7.0);
        assert_eq!(eval("clamp(5, 0, 3)", &[]), 3.0);
        assert!((eval("degrees(pi())", &[]) - 180.0).abs() < 1e-12);
    }

    #[test]
    fn test_variables_listing() {
        let expr = Expr::parse("a + b * a - sin(c)").unwrap();
        assert_eq!(expr.variables(), vec!["a", "b", "c"]);
        assert!(Expr::parse("1 + 2").unwrap().variables().is_empty());
    }

    #[test]
    fn test_unknown_variable() {
        let expr = Expr::parse("x + 1").unwrap();
        let err = expr.eval(&HashMap::new(), &std_registry()).unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("x".to_string()));
    }

    #[test]
    fn test_unknown_function() {
        let expr = Expr::parse("quux(1)").unwrap();
        let err = expr.eval(&HashMap::new(), &std_registry()).unwrap_err();
        assert_eq!(err, ExprError::UnknownFunction("quux".to_string()));
    }

    #[test]
    fn test_wrong_arity() {
        let expr = Expr::parse("sin(1, 2)").unwrap();
        let err = expr.eval(&HashMap::new(), &std_registry()).unwrap_err();
        assert!(matches!(err, ExprError::WrongArity { expected: 1, got: 2, .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("(1 + 2").is_err());
        assert!(Expr::parse("1 $ 2").is_err());
        assert!(Expr::parse("1 2").is_err());
        assert!(Expr::parse("f(1,").is_err());
    }

    #[test]
    fn test_zero_arg_call() {
        let expr = Expr::parse("pi()").unwrap();
        let v = expr.eval(&HashMap::new(), &std_registry()).unwrap();
        assert!((v - std::f64::consts::PI).abs() < 1e-12);
    }
}
