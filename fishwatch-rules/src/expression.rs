//! Boolean expression language used in rule `when` clauses.
//!
//! ```text
//! expr       := or
//! or         := and (("||" | "or") and)*
//! and        := unary (("&&" | "and") unary)*
//! unary      := ("!" | "not") unary | comparison
//! comparison := operand (("==" | "!=" | ">" | ">=" | "<" | "<=") operand)?
//! operand    := "(" expr ")" | literal | field | call
//! literal    := string | number | "null" | "true" | "false"
//! call       := "now" "(" ")" | "isPresentInList" "(" string "," expr ")"
//! ```
//!
//! Field names are resolved against the static field table of the rule's
//! fact type while parsing; the resulting tree is then type checked so that
//! only failures caused by the data itself can surface during evaluation.
//! Chains of `&&` and `||` become flat operand lists, and nesting through
//! parentheses, `!` and calls is capped at [`MAX_NESTING`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use fishwatch_model::fact::{Fact, FactType};
use fishwatch_model::field::{FieldInfo, FieldType, FieldValue};

use crate::collaborators::LookupService;
use crate::error::CompileError;

/// Deepest nesting of parentheses, negations and calls a condition may use.
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn is_equality(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// Parsed and type-checked rule condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(FieldValue),
    Field(FieldInfo),
    Now,
    InList { list: String, value: Box<Expr> },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Failure while evaluating an expression against a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError(pub String);

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globals visible to an expression during evaluation.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    pub lookup: Option<&'a dyn LookupService>,
}

impl Expr {
    /// Parses `source` for facts of `fact_type` and type checks the result.
    /// Errors carry an empty rule name; callers attach theirs.
    pub fn compile(source: &str, fact_type: FactType) -> Result<Expr, CompileError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            position: 0,
            depth: 0,
            fact_type,
        };
        let mut expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(CompileError::syntax(
                "",
                format!("unexpected `{}` after end of expression", token),
            ));
        }

        match check(&mut expr)? {
            Ty::Value(FieldType::Bool) => Ok(expr),
            other => Err(CompileError::type_error(
                "",
                format!("condition must be boolean, found {}", other),
            )),
        }
    }

    /// Evaluates the expression to a value.
    pub fn evaluate(&self, fact: &Fact, ctx: &EvalContext<'_>) -> Result<FieldValue, EvalError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(field) => fact.value_at(field.index).ok_or_else(|| {
                EvalError(format!(
                    "field `{}` is not readable on a {} fact",
                    field.name,
                    fact.fact_type()
                ))
            }),
            Expr::Now => Ok(FieldValue::Time(ctx.now)),
            Expr::InList { list, value } => {
                let value = match value.evaluate(fact, ctx)? {
                    FieldValue::Null => return Ok(FieldValue::Bool(false)),
                    other => other.to_string(),
                };
                let lookup = ctx
                    .lookup
                    .ok_or_else(|| EvalError("no lookup service in session".to_string()))?;
                lookup
                    .is_present_in_list(list, &value)
                    .map(FieldValue::Bool)
                    .map_err(|err| EvalError(err.to_string()))
            }
            Expr::Not(inner) => Ok(FieldValue::Bool(!inner.test(fact, ctx)?)),
            Expr::And(operands) => {
                for operand in operands {
                    if !operand.test(fact, ctx)? {
                        return Ok(FieldValue::Bool(false));
                    }
                }
                Ok(FieldValue::Bool(true))
            }
            Expr::Or(operands) => {
                for operand in operands {
                    if operand.test(fact, ctx)? {
                        return Ok(FieldValue::Bool(true));
                    }
                }
                Ok(FieldValue::Bool(false))
            }
            Expr::Compare { op, left, right } => {
                let left = left.evaluate(fact, ctx)?;
                let right = right.evaluate(fact, ctx)?;
                compare(*op, &left, &right).map(FieldValue::Bool)
            }
        }
    }

    /// Evaluates the expression as a condition.
    pub fn test(&self, fact: &Fact, ctx: &EvalContext<'_>) -> Result<bool, EvalError> {
        match self.evaluate(fact, ctx)? {
            FieldValue::Bool(value) => Ok(value),
            FieldValue::Null => Ok(false),
            other => Err(EvalError(format!(
                "expected bool, found {} `{}`",
                other.type_name(),
                other
            ))),
        }
    }
}

fn compare(op: CompareOp, left: &FieldValue, right: &FieldValue) -> Result<bool, EvalError> {
    use FieldValue::*;

    match (left, right) {
        (Null, Null) => Ok(op == CompareOp::Eq),
        (Null, _) | (_, Null) => Ok(op == CompareOp::Ne),
        (List(items), scalar) | (scalar, List(items)) => {
            if !op.is_equality() {
                return Err(EvalError(format!("operator {} is not defined on lists", op.symbol())));
            }
            let mut any = false;
            for item in items {
                if compare(CompareOp::Eq, item, scalar)? {
                    any = true;
                    break;
                }
            }
            Ok(if op == CompareOp::Eq { any } else { !any })
        }
        (Text(a), Text(b)) => Ok(op.accepts(a.cmp(b))),
        (Number(a), Number(b)) => Ok(a.partial_cmp(b).map_or(false, |ord| op.accepts(ord))),
        (Time(a), Time(b)) => Ok(op.accepts(a.cmp(b))),
        (Bool(a), Bool(b)) if op.is_equality() => Ok(op.accepts(a.cmp(b))),
        (a, b) => Err(EvalError(format!(
            "cannot compare {} `{}` {} {} `{}`",
            a.type_name(),
            a,
            op.symbol(),
            b.type_name(),
            b
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Null,
    Value(FieldType),
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Null => f.write_str("null"),
            Ty::Value(ty) => write!(f, "{}", ty),
        }
    }
}

fn check(expr: &mut Expr) -> Result<Ty, CompileError> {
    match expr {
        Expr::Literal(value) => Ok(literal_type(value)),
        Expr::Field(field) => Ok(Ty::Value(field.ty)),
        Expr::Now => Ok(Ty::Value(FieldType::Time)),
        Expr::InList { value, .. } => match check(value)? {
            Ty::Null | Ty::Value(FieldType::Text) | Ty::Value(FieldType::Number) => {
                Ok(Ty::Value(FieldType::Bool))
            }
            other => Err(CompileError::type_error(
                "",
                format!("isPresentInList expects a text or number value, found {}", other),
            )),
        },
        Expr::Not(inner) => {
            expect_bool(check(inner)?, "!")?;
            Ok(Ty::Value(FieldType::Bool))
        }
        Expr::And(operands) => {
            for operand in operands {
                expect_bool(check(operand)?, "&&")?;
            }
            Ok(Ty::Value(FieldType::Bool))
        }
        Expr::Or(operands) => {
            for operand in operands {
                expect_bool(check(operand)?, "||")?;
            }
            Ok(Ty::Value(FieldType::Bool))
        }
        Expr::Compare { op, left, right } => {
            let mut left_ty = check(left)?;
            let mut right_ty = check(right)?;
            if coerce_time(left, right_ty)? {
                left_ty = Ty::Value(FieldType::Time);
            }
            if coerce_time(right, left_ty)? {
                right_ty = Ty::Value(FieldType::Time);
            }
            check_comparison(*op, left_ty, right_ty)?;
            Ok(Ty::Value(FieldType::Bool))
        }
    }
}

fn literal_type(value: &FieldValue) -> Ty {
    match value {
        FieldValue::Null => Ty::Null,
        FieldValue::Text(_) => Ty::Value(FieldType::Text),
        FieldValue::Number(_) => Ty::Value(FieldType::Number),
        FieldValue::Bool(_) => Ty::Value(FieldType::Bool),
        FieldValue::Time(_) => Ty::Value(FieldType::Time),
        FieldValue::List(_) => Ty::Value(FieldType::TextList),
    }
}

fn expect_bool(ty: Ty, operator: &str) -> Result<(), CompileError> {
    match ty {
        Ty::Value(FieldType::Bool) => Ok(()),
        other => Err(CompileError::type_error(
            "",
            format!("operand of {} must be boolean, found {}", operator, other),
        )),
    }
}

/// Rewrites a text literal compared with a time into a time literal.
fn coerce_time(expr: &mut Expr, other: Ty) -> Result<bool, CompileError> {
    if other != Ty::Value(FieldType::Time) {
        return Ok(false);
    }
    let Expr::Literal(FieldValue::Text(raw)) = expr else {
        return Ok(false);
    };
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|err| {
        CompileError::type_error("", format!("`{}` is not an RFC 3339 timestamp: {}", raw, err))
    })?;
    *expr = Expr::Literal(FieldValue::Time(parsed.with_timezone(&Utc)));
    Ok(true)
}

fn check_comparison(op: CompareOp, left: Ty, right: Ty) -> Result<(), CompileError> {
    let mismatch = || {
        CompileError::type_error(
            "",
            format!("cannot compare {} {} {}", left, op.symbol(), right),
        )
    };

    match (left, right) {
        (Ty::Null, _) | (_, Ty::Null) => {
            if op.is_equality() {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (Ty::Value(l), Ty::Value(r)) if l.is_list() || r.is_list() => {
            let compatible = if l.is_list() {
                !r.is_list() && l.element() == r
            } else {
                r.element() == l
            };
            if compatible && op.is_equality() {
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (Ty::Value(FieldType::Bool), Ty::Value(FieldType::Bool)) if op.is_equality() => Ok(()),
        (Ty::Value(FieldType::Bool), _) | (_, Ty::Value(FieldType::Bool)) => Err(mismatch()),
        (Ty::Value(l), Ty::Value(r)) if l == r => Ok(()),
        _ => Err(mismatch()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Cmp(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => f.write_str(name),
            Token::Str(value) => write!(f, "\"{}\"", value),
            Token::Num(value) => write!(f, "{}", value),
            Token::Cmp(op) => f.write_str(op.symbol()),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Not => f.write_str("!"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let or_equal = next == Some('=');
                let op = match (c, or_equal) {
                    ('>', false) => CompareOp::Gt,
                    ('>', true) => CompareOp::Ge,
                    ('<', false) => CompareOp::Lt,
                    _ => CompareOp::Le,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let (value, end) = read_string(&chars, i)?;
                tokens.push(Token::Str(value));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && next.map_or(false, |n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let value = parse_number(&raw).ok_or_else(|| {
                    CompileError::syntax("", format!("invalid number `{}`", raw))
                })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => {
                return Err(CompileError::syntax(
                    "",
                    format!("unexpected character `{}` at offset {}", other, i),
                ))
            }
        }
    }

    Ok(tokens)
}

/// Parses a number written the way the tokenizer reads one: an optional
/// leading `-`, then digits and dots only.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let well_formed = digits.starts_with(|c: char| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
    if well_formed {
        raw.parse::<f64>().ok()
    } else {
        None
    }
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), CompileError> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                value.push(match chars[i + 1] {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((value, i + 1)),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    Err(CompileError::syntax(
        "",
        format!("unterminated string starting at offset {}", start),
    ))
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
    fact_type: FactType,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(CompileError::syntax(
                "",
                format!("expected `{}`, found `{}`", expected, token),
            )),
            None => Err(CompileError::syntax(
                "",
                format!("expected `{}`, found end of expression", expected),
            )),
        }
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CompileError::syntax(
                "",
                format!("expression nests deeper than {} levels", MAX_NESTING),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut operands = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut operands = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.advance();
            operands.push(self.parse_unary()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.enter()?;
            let inner = self.parse_unary()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr, CompileError> {
        match self.advance() {
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.leave();
                Ok(inner)
            }
            Some(Token::Str(value)) => Ok(Expr::Literal(FieldValue::Text(value))),
            Some(Token::Num(value)) => Ok(Expr::Literal(FieldValue::Number(value))),
            Some(Token::Ident(name)) => self.parse_identifier(name),
            Some(token) => Err(CompileError::syntax(
                "",
                format!("unexpected `{}`", token),
            )),
            None => Err(CompileError::syntax("", "unexpected end of expression")),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Result<Expr, CompileError> {
        match name.as_str() {
            "null" => return Ok(Expr::Literal(FieldValue::Null)),
            "true" => return Ok(Expr::Literal(FieldValue::Bool(true))),
            "false" => return Ok(Expr::Literal(FieldValue::Bool(false))),
            _ => {}
        }

        if self.peek() == Some(&Token::LParen) {
            self.advance();
            return self.parse_call(&name);
        }

        self.fact_type
            .field(&name)
            .map(Expr::Field)
            .ok_or_else(|| CompileError::UnknownField {
                rule: String::new(),
                fact_type: self.fact_type.to_string(),
                field: name,
            })
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, CompileError> {
        match name {
            "now" => {
                self.expect(Token::RParen)?;
                Ok(Expr::Now)
            }
            "isPresentInList" => {
                let list = match self.advance() {
                    Some(Token::Str(list)) => list,
                    _ => {
                        return Err(CompileError::syntax(
                            "",
                            "isPresentInList expects a list name as first argument",
                        ))
                    }
                };
                self.expect(Token::Comma)?;
                self.enter()?;
                let value = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.leave();
                Ok(Expr::InList {
                    list,
                    value: Box::new(value),
                })
            }
            other => Err(CompileError::syntax(
                "",
                format!("unknown function `{}`", other),
            )),
        }
    }
}

/// Quotes `value` as a string literal of the expression language. Line
/// breaks are escaped so the literal always stays on one line.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
