//! Safe predicate expression language used by `on_condition` edges.
//!
//! Grounded on `cel_evaluator.py`: a small, sandboxed expression language
//! (not the full CEL spec — no CEL crate exists anywhere in the dependency
//! corpus, so this is a hand-rolled recursive-descent parser plus a
//! tree-walking evaluator over a `Value` enum, documented as a deliberate
//! substitution in DESIGN.md). Expressions read from three bindings:
//!
//! - `result` — the evaluating node's extracted result (coerced from JSON)
//! - `error` — `true` if the node failed, else `false`
//! - `ctx` — the shared flow context map
//!
//! Evaluation is fail-safe: any parse or runtime error is logged as a
//! warning and the predicate evaluates to `false`, mirroring
//! `cel_evaluator.py`'s `try/except Exception` wrapper around `eval`.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value as Json;

/// A predicate value during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(a) => Value::List(a.iter().map(Value::from_json).collect()),
            Json::Object(_) => Value::String(json.to_string()),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(l) => write!(f, "[{}]", l.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")),
        }
    }
}

/// Evaluation context: the three bindings predicates can reference.
pub struct Activation {
    pub result: Value,
    pub error: bool,
    pub ctx: HashMap<String, Value>,
}

impl Activation {
    pub fn new(result: &Json, error: bool, ctx: &HashMap<String, Json>) -> Self {
        Self {
            result: Value::from_json(result),
            error,
            ctx: ctx.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(String),
    Eof,
}

fn tokenize(src: &str) -> Vec<Token> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Str(s));
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(s.parse().unwrap_or(f64::NAN)));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '=' | '!' | '<' | '>' | '&' | '|' | '+' | '-' | '*' | '/' | '%' => {
                let start = i;
                i += 1;
                if i < chars.len() && chars[i] == '=' && matches!(c, '=' | '!' | '<' | '>') {
                    i += 1;
                } else if i < chars.len() && chars[i] == c && matches!(c, '&' | '|') {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Op(s));
            }
            _ => {
                i += 1;
            }
        }
    }
    tokens.push(Token::Eof);
    tokens
}

/// A compiled predicate expression, ready to evaluate repeatedly.
pub struct CompiledPredicate {
    source: String,
    tokens: Vec<Token>,
}

#[derive(Debug, thiserror::Error)]
#[error("predicate error: {0}")]
pub struct PredicateError(String);

/// Compile an expression, catching syntax errors up front. Matches
/// `cel_evaluator.py`'s eager `compile()` call in `__init__`.
pub fn compile(expression: &str) -> Result<CompiledPredicate, PredicateError> {
    let tokens = tokenize(expression);
    // A bare syntax sanity pass: parse once against an empty activation
    // purely to surface unbalanced parens/brackets at compile time.
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let empty = Activation { result: Value::Null, error: false, ctx: HashMap::new() };
    parser.parse_expr(&empty).map_err(PredicateError)?;
    Ok(CompiledPredicate { source: expression.to_string(), tokens })
}

impl CompiledPredicate {
    /// Evaluate against an activation. Never panics or propagates an
    /// error: any failure is logged and folds to `false`.
    pub fn evaluate(&self, activation: &Activation) -> bool {
        let mut parser = Parser { tokens: &self.tokens, pos: 0 };
        match parser.parse_expr(activation) {
            Ok(v) => v.truthy(),
            Err(reason) => {
                tracing::warn!(expression = %self.source, %reason, "predicate evaluation failed; defaulting to false");
                false
            }
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self, act: &Activation) -> Result<Value, String> {
        self.parse_or(act)
    }

    fn parse_or(&mut self, act: &Activation) -> Result<Value, String> {
        let mut left = self.parse_and(act)?;
        while matches!(self.peek(), Token::Op(op) if op == "||") {
            self.advance();
            let right = self.parse_and(act)?;
            left = Value::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self, act: &Activation) -> Result<Value, String> {
        let mut left = self.parse_not(act)?;
        while matches!(self.peek(), Token::Op(op) if op == "&&") {
            self.advance();
            let right = self.parse_not(act)?;
            left = Value::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn parse_not(&mut self, act: &Activation) -> Result<Value, String> {
        if matches!(self.peek(), Token::Op(op) if op == "!") {
            self.advance();
            let v = self.parse_not(act)?;
            return Ok(Value::Bool(!v.truthy()));
        }
        self.parse_membership(act)
    }

    /// `<value> in <collection>` — list/string membership, matching the
    /// spec's `in`-membership operator. Binds tighter than `&&`/`||` but
    /// looser than comparisons, so `x in list && y` parses as expected.
    fn parse_membership(&mut self, act: &Activation) -> Result<Value, String> {
        let left = self.parse_comparison(act)?;
        if matches!(self.peek(), Token::Ident(name) if name == "in") {
            self.advance();
            let right = self.parse_comparison(act)?;
            return Ok(Value::Bool(membership(&left, &right)));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self, act: &Activation) -> Result<Value, String> {
        let left = self.parse_additive(act)?;
        if let Token::Op(op) = self.peek().clone() {
            if ["==", "!=", "<", "<=", ">", ">="].contains(&op.as_str()) {
                self.advance();
                let right = self.parse_additive(act)?;
                return Ok(Value::Bool(compare(&op, &left, &right)));
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self, act: &Activation) -> Result<Value, String> {
        let mut left = self.parse_primary(act)?;
        loop {
            match self.peek().clone() {
                Token::Op(op) if op == "+" || op == "-" => {
                    self.advance();
                    let right = self.parse_primary(act)?;
                    let (a, b) = (left.as_number(), right.as_number());
                    left = match (a, b, op.as_str()) {
                        (Some(a), Some(b), "+") => Value::Number(a + b),
                        (Some(a), Some(b), "-") => Value::Number(a - b),
                        (_, _, "+") => Value::String(format!("{left}{right}")),
                        _ => return Err(format!("cannot subtract {left} and {right}")),
                    };
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_primary(&mut self, act: &Activation) -> Result<Value, String> {
        match self.advance() {
            Token::Num(n) => Ok(Value::Number(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Ident(name) => {
                let base = match name.as_str() {
                    "true" => return Ok(Value::Bool(true)),
                    "false" => return Ok(Value::Bool(false)),
                    "null" => return Ok(Value::Null),
                    "result" => act.result.clone(),
                    "error" => Value::Bool(act.error),
                    "ctx" => {
                        // bare `ctx` with no field access is not useful; treat as truthy map marker
                        Value::Bool(!act.ctx.is_empty())
                    }
                    other => return Err(format!("unknown identifier '{other}'")),
                };
                self.parse_postfix(base, &name, act)
            }
            Token::LParen => {
                let v = self.parse_expr(act)?;
                if !matches!(self.advance(), Token::RParen) {
                    return Err("expected ')'".to_string());
                }
                Ok(v)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Token::RBracket) {
                    loop {
                        items.push(self.parse_expr(act)?);
                        if matches!(self.peek(), Token::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                if !matches!(self.advance(), Token::RBracket) {
                    return Err("expected ']'".to_string());
                }
                Ok(Value::List(items))
            }
            Token::Op(op) if op == "-" => {
                let v = self.parse_primary(act)?;
                v.as_number().map(|n| Value::Number(-n)).ok_or_else(|| "cannot negate non-number".to_string())
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn parse_postfix(&mut self, base: Value, root_name: &str, act: &Activation) -> Result<Value, String> {
        let mut current = base;
        loop {
            match self.peek().clone() {
                Token::Dot => {
                    self.advance();
                    let field = match self.advance() {
                        Token::Ident(f) => f,
                        other => return Err(format!("expected field name, got {other:?}")),
                    };
                    current = if root_name == "ctx" {
                        act.ctx.get(&field).cloned().unwrap_or(Value::Null)
                    } else {
                        field_access(&current, &field)
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let idx = self.parse_expr(act)?;
                    if !matches!(self.advance(), Token::RBracket) {
                        return Err("expected ']'".to_string());
                    }
                    current = index_access(&current, &idx)?;
                }
                _ => break,
            }
        }
        Ok(current)
    }
}

fn field_access(value: &Value, field: &str) -> Value {
    match value {
        Value::String(s) => {
            if let Ok(json) = serde_json::from_str::<Json>(s) {
                if let Some(v) = json.get(field) {
                    return Value::from_json(v);
                }
            }
            Value::Null
        }
        _ => Value::Null,
    }
}

fn index_access(value: &Value, idx: &Value) -> Result<Value, String> {
    match (value, idx) {
        (Value::List(items), Value::Number(n)) => {
            let i = *n as usize;
            Ok(items.get(i).cloned().unwrap_or(Value::Null))
        }
        _ => Err("index access on non-list".to_string()),
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> bool {
    match op {
        "==" => values_equal(a, b),
        "!=" => !values_equal(a, b),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => match op {
                "<" => x < y,
                "<=" => x <= y,
                ">" => x > y,
                ">=" => x >= y,
                _ => false,
            },
            _ => false,
        },
    }
}

/// `value in collection`: list membership by [`values_equal`], or substring
/// containment when `collection` is a string.
fn membership(value: &Value, collection: &Value) -> bool {
    match collection {
        Value::List(items) => items.iter().any(|item| values_equal(item, value)),
        Value::String(s) => match value {
            Value::String(needle) => s.contains(needle.as_str()),
            _ => false,
        },
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ => a.to_string() == b.to_string(),
    }
}
