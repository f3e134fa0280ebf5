//! Decoded display-list commands and the integer expression evaluator used
//! for macro arguments.

use std::fmt;

use crate::error::{F3dError, Result};
use crate::gbi::{self, Ucode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(String),
    Int(i64),
}

impl Arg {
    pub fn text(&self) -> String {
        match self {
            Arg::Text(s) => s.clone(),
            Arg::Int(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => write!(f, "{}", s),
            Arg::Int(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

/// One macro invocation, e.g. `gsSPVertex(verts, 3, 0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Arg>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self { name: name.into(), args }
    }

    fn arg(&self, i: usize) -> Result<&Arg> {
        self.args.get(i).ok_or_else(|| F3dError::BadArgCount {
            command: self.name.clone(),
            expected: i + 1,
            found: self.args.len(),
        })
    }

    /// Argument `i` as written (integers rendered in decimal).
    pub fn text(&self, i: usize) -> Result<String> {
        Ok(self.arg(i)?.text())
    }

    /// Argument `i` evaluated as an integer expression.
    pub fn int(&self, i: usize, ucode: Ucode) -> Result<i64> {
        match self.arg(i)? {
            Arg::Int(v) => Ok(*v),
            Arg::Text(s) => eval_expr(s, ucode).map_err(|detail| F3dError::malformed(&self.name, detail)),
        }
    }

    pub fn expect_args(&self, n: usize) -> Result<()> {
        if self.args.len() < n {
            return Err(F3dError::BadArgCount { command: self.name.clone(), expected: n, found: self.args.len() });
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, a) in self.args.iter().enumerate() {
            if i != 0 { write!(f, ", ")?; }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(s: &str) -> std::result::Result<Vec<Token>, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                i += 1;
            }
            out.push(Token::Num(parse_literal(&s[start..i])?));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push(Token::Ident(s[start..i].to_string()));
        } else if c == '(' {
            out.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            out.push(Token::RParen);
            i += 1;
        } else {
            let two = s.get(i..i + 2).unwrap_or("");
            let op = match two {
                "<<" => "<<",
                ">>" => ">>",
                _ => match c {
                    '+' => "+", '-' => "-", '*' => "*", '/' => "/", '%' => "%",
                    '&' => "&", '|' => "|", '^' => "^", '~' => "~", '!' => "!",
                    _ => return Err(format!("unexpected character '{}'", c)),
                },
            };
            i += op.len();
            out.push(Token::Op(op));
        }
    }
    Ok(out)
}

fn parse_literal(lit: &str) -> std::result::Result<i64, String> {
    let trimmed = lit.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        i64::from_str_radix(&trimmed[1..], 8)
    } else {
        trimmed.parse::<i64>()
    };
    parsed.map_err(|_| format!("bad integer literal '{}'", lit))
}

const CAST_TYPES: &[&str] = &[
    "u8", "s8", "u16", "s16", "u32", "s32", "u64", "s64", "int", "unsigned", "char", "short", "long", "f32",
];

/// Deepest nesting of parentheses and prefix operators accepted.
const MAX_EXPR_DEPTH: usize = 64;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    ucode: Ucode,
}

type PResult = std::result::Result<i64, String>;

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn binary(&mut self, level: usize) -> PResult {
        const LEVELS: &[&[&str]] = &[&["|"], &["^"], &["&"], &["<<", ">>"], &["+", "-"], &["*", "/", "%"]];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !LEVELS[level].contains(&op) {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = match op {
                "|" => lhs | rhs,
                "^" => lhs ^ rhs,
                "&" => lhs & rhs,
                "<<" => lhs.wrapping_shl(rhs as u32),
                ">>" => lhs.wrapping_shr(rhs as u32),
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" => lhs.checked_div(rhs).ok_or("division by zero")?,
                _ => lhs.checked_rem(rhs).ok_or("division by zero")?,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult {
        if self.depth == MAX_EXPR_DEPTH {
            return Err(format!("expression nested deeper than {}", MAX_EXPR_DEPTH));
        }
        self.depth += 1;
        let v = self.prefixed();
        self.depth -= 1;
        v
    }

    fn prefixed(&mut self) -> PResult {
        match self.peek() {
            Some(Token::Op("-")) => { self.pos += 1; Ok(self.unary()?.wrapping_neg()) },
            Some(Token::Op("+")) => { self.pos += 1; self.unary() },
            Some(Token::Op("~")) => { self.pos += 1; Ok(!self.unary()?) },
            Some(Token::Op("!")) => { self.pos += 1; Ok((self.unary()? == 0) as i64) },
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> PResult {
        match self.next() {
            Some(Token::Num(v)) => Ok(v),
            Some(Token::Ident(name)) => gbi::resolve_symbol(&name, self.ucode).ok_or(format!("unknown symbol '{}'", name)),
            Some(Token::LParen) => {
                // (type) casts are dropped
                if let (Some(Token::Ident(t)), Some(Token::RParen)) = (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                    if CAST_TYPES.contains(&t.as_str()) {
                        self.pos += 2;
                        return self.unary();
                    }
                }
                let v = self.binary(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err("missing ')'".to_string()),
                }
            },
            other => Err(format!("unexpected {:?}", other)),
        }
    }
}

/// Evaluates a C integer expression over GBI symbols.
pub fn eval_expr(expr: &str, ucode: Ucode) -> std::result::Result<i64, String> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut p = Parser { tokens: &tokens, pos: 0, depth: 0, ucode };
    let v = p.binary(0)?;
    if p.pos != tokens.len() {
        return Err(format!("trailing tokens in '{}'", expr));
    }
    Ok(v)
}
