//! Small sandboxed expression language for user-supplied formulas.
//!
//! Formulas are lexed and parsed once into an AST and then evaluated over
//! complex numbers any number of times with different variable bindings.
//! Nothing in here panics on user input: lexing, parsing and evaluation all
//! report failures through [`ExprError`], and [`Expr::eval_or`] maps any
//! failure onto a caller-chosen fallback.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | ident | ident '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! Formulas longer than [`MAX_TOKENS`] tokens or nesting deeper than
//! [`MAX_DEPTH`] levels are rejected before they can exhaust the stack.

use num_complex::Complex64;
use thiserror::Error;

/// Maximum nesting of parentheses, calls, signs and exponents.
pub const MAX_DEPTH: usize = 128;

/// Maximum number of tokens in one formula.
pub const MAX_TOKENS: usize = 2048;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unbound variable '{0}'")]
    UnknownVariable(String),

    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("expression has more than {limit} tokens")]
    TooLong { limit: usize },
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Id(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Num(n) => format!("number {n}"),
            Tok::Id(id) => format!("identifier '{id}'"),
            Tok::Plus => "'+'".into(),
            Tok::Minus => "'-'".into(),
            Tok::Star => "'*'".into(),
            Tok::Slash => "'/'".into(),
            Tok::Caret => "'^'".into(),
            Tok::LParen => "'('".into(),
            Tok::RParen => "')'".into(),
            Tok::Comma => "','".into(),
        }
    }
}

fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_id(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '+' => {
                i += 1;
                out.push((start, Tok::Plus));
            }
            '-' => {
                i += 1;
                out.push((start, Tok::Minus));
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    i += 2;
                    out.push((start, Tok::Caret));
                } else {
                    i += 1;
                    out.push((start, Tok::Star));
                }
            }
            '/' => {
                i += 1;
                out.push((start, Tok::Slash));
            }
            '^' => {
                i += 1;
                out.push((start, Tok::Caret));
            }
            '(' => {
                i += 1;
                out.push((start, Tok::LParen));
            }
            ')' => {
                i += 1;
                out.push((start, Tok::RParen));
            }
            ',' => {
                i += 1;
                out.push((start, Tok::Comma));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    literal.push(chars[i]);
                    i += 1;
                }
                // exponent only when digits follow
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        literal.extend(&chars[i..j]);
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            literal.push(chars[i]);
                            i += 1;
                        }
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExprError::InvalidNumber(literal.clone()))?;
                out.push((start, Tok::Num(value)));
            }
            c if is_id_start(c) => {
                let mut id = String::new();
                while i < chars.len() && is_id(chars[i]) {
                    id.push(chars[i]);
                    i += 1;
                }
                out.push((start, Tok::Id(id)));
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, pos: start }),
        }
    }
    Ok(out)
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Abs,
    Real,
    Imag,
    Conj,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        let func = match name {
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" | "ln" => Func::Ln,
            "log10" => Func::Log10,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "abs" => Func::Abs,
            "real" => Func::Real,
            "imag" => Func::Imag,
            "conj" => Func::Conj,
            "pow" => Func::Pow,
            _ => return None,
        };
        Some(func)
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[Complex64]) -> Complex64 {
        let z = args[0];
        match self {
            Func::Sqrt => z.sqrt(),
            Func::Exp => z.exp(),
            Func::Ln => z.ln(),
            Func::Log10 => z.ln() / std::f64::consts::LN_10,
            Func::Sin => z.sin(),
            Func::Cos => z.cos(),
            Func::Tan => z.tan(),
            Func::Asin => z.asin(),
            Func::Acos => z.acos(),
            Func::Atan => z.atan(),
            Func::Sinh => z.sinh(),
            Func::Cosh => z.cosh(),
            Func::Tanh => z.tanh(),
            Func::Abs => Complex64::new(z.norm(), 0.0),
            Func::Real => Complex64::new(z.re, 0.0),
            Func::Imag => Complex64::new(z.im, 0.0),
            Func::Conj => z.conj(),
            Func::Pow => power(z, args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Const(Complex64),
    Var(String),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

/// Real bases with real exponents stay on the real axis where possible so
/// that `(-2)^2` is exactly 4.
fn power(base: Complex64, exponent: Complex64) -> Complex64 {
    if base.im == 0.0 && exponent.im == 0.0 {
        let (b, e) = (base.re, exponent.re);
        if e.fract() == 0.0 && e.abs() <= i32::MAX as f64 {
            return Complex64::new(b.powi(e as i32), 0.0);
        }
        if b >= 0.0 {
            return Complex64::new(b.powf(e), 0.0);
        }
    }
    base.powc(exponent)
}

impl Node {
    fn eval(&self, vars: &[(&str, Complex64)]) -> Result<Complex64, ExprError> {
        match self {
            Node::Const(value) => Ok(*value),
            Node::Var(name) => vars
                .iter()
                .find(|(candidate, _)| *candidate == name.as_str())
                .map(|(_, value)| *value)
                .ok_or_else(|| ExprError::UnknownVariable(name.clone())),
            Node::Neg(inner) => Ok(-inner.eval(vars)?),
            Node::Binary(op, lhs, rhs) => {
                let (a, b) = (lhs.eval(vars)?, rhs.eval(vars)?);
                Ok(match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Pow => power(a, b),
                })
            }
            Node::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(vars))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(func.apply(&values))
            }
        }
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Const(_) => {}
            Node::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
            Node::Neg(inner) => inner.collect_vars(out),
            Node::Binary(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Node::Call(_, args) => args.iter().for_each(|arg| arg.collect_vars(out)),
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    toks: Vec<(usize, Tok)>,
    i: usize,
    depth: usize,
}

impl Parser {
    fn new(toks: Vec<(usize, Tok)>) -> Self {
        Self { toks, i: 0, depth: 0 }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.i).map(|(_, tok)| tok)
    }

    fn bump(&mut self) -> Option<(usize, Tok)> {
        let tok = self.toks.get(self.i).cloned();
        if tok.is_some() {
            self.i += 1;
        }
        tok
    }

    fn expect(&mut self, wanted: Tok) -> Result<(), ExprError> {
        match self.bump() {
            Some((_, tok)) if tok == wanted => Ok(()),
            Some((pos, tok)) => Err(ExprError::UnexpectedToken {
                found: tok.describe(),
                pos,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_term()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // Every recursive path of the grammar passes through here.
    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let node = self.parse_signed();
        self.depth -= 1;
        node
    }

    fn parse_signed(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.bump();
                Ok(Node::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Tok::Plus) => {
                self.bump();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Node, ExprError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Tok::Caret)) {
            self.bump();
            let exponent = self.parse_unary()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        match self.bump() {
            Some((_, Tok::Num(value))) => Ok(Node::Const(Complex64::new(value, 0.0))),
            Some((_, Tok::Id(id))) => {
                if matches!(self.peek(), Some(Tok::LParen)) {
                    self.bump();
                    return self.parse_call(id);
                }
                Ok(match id.as_str() {
                    "pi" => Node::Const(Complex64::new(std::f64::consts::PI, 0.0)),
                    "imag" => Node::Const(Complex64::new(0.0, 1.0)),
                    _ => Node::Var(id),
                })
            }
            Some((_, Tok::LParen)) => {
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some((pos, tok)) => Err(ExprError::UnexpectedToken {
                found: tok.describe(),
                pos,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Node, ExprError> {
        let func = Func::lookup(&name).ok_or_else(|| ExprError::UnknownFunction(name.clone()))?;
        let mut args = vec![self.parse_expr()?];
        while matches!(self.peek(), Some(Tok::Comma)) {
            self.bump();
            args.push(self.parse_expr()?);
        }
        self.expect(Tok::RParen)?;
        if args.len() != func.arity() {
            return Err(ExprError::Arity {
                name,
                expected: func.arity(),
                found: args.len(),
            });
        }
        Ok(Node::Call(func, args))
    }
}

// ============================================================================
// Public API
// ============================================================================

/// A parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let toks = lex(source)?;
        if toks.is_empty() {
            return Err(ExprError::Empty);
        }
        if toks.len() > MAX_TOKENS {
            return Err(ExprError::TooLong { limit: MAX_TOKENS });
        }
        let mut parser = Parser::new(toks);
        let root = parser.parse_expr()?;
        if let Some((pos, tok)) = parser.bump() {
            return Err(ExprError::UnexpectedToken {
                found: tok.describe(),
                pos,
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the free variables, in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_vars(&mut out);
        out
    }

    pub fn eval(&self, vars: &[(&str, Complex64)]) -> Result<Complex64, ExprError> {
        self.root.eval(vars)
    }

    pub fn eval_or(&self, vars: &[(&str, Complex64)], fallback: Complex64) -> Complex64 {
        self.eval(vars).unwrap_or(fallback)
    }
}

impl std::str::FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}
