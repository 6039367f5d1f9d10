use std::cmp::Ordering;

use crate::environment::{Environment, Fetched, Request};
use crate::error::{DipError, Result};
use crate::tokenizer::{parse_ranges, RawValue};
use crate::value::{Scalar, Value};

/// Evaluates the logical expressions of `@case` directives, `("...")`
/// values and `!condition` properties.
pub trait ExpressionSolver {
    fn evaluate(&self, expr: &str, env: &Environment) -> Result<bool>;
}

/// Default solver: comparisons joined by `&&`, `||` and `!`, over literals
/// and `{source?path}` references.
///
/// ```text
/// or      := and (("||" | "or") and)*
/// and     := not (("&&" | "and") not)*
/// not     := ("!" | "not") not | compare
/// compare := operand (("==" | "!=" | "<=" | ">=" | "<" | ">") operand)?
/// operand := "(" or ")" | "{" request "}" slice? | number | string | true | false
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LogicalSolver;

impl ExpressionSolver for LogicalSolver {
    fn evaluate(&self, expr: &str, env: &Environment) -> Result<bool> {
        let mut parser = ExprParser {
            input: expr,
            pos: 0,
            env,
        };
        let result = parser.parse_or()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(DipError::syntax(format!(
                "Unexpected text in expression '{}': {}",
                expr,
                parser.remaining()
            )));
        }
        result.truth()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Value),
}

impl Operand {
    fn truth(&self) -> Result<bool> {
        match self {
            Operand::Bool(b) => Ok(*b),
            other => Err(DipError::type_error(format!(
                "Expression does not evaluate to a boolean: {:?}",
                other
            ))),
        }
    }

    fn from_value(value: Value) -> Operand {
        match value {
            Value::Scalar(Scalar::Bool(b)) => Operand::Bool(b),
            Value::Scalar(Scalar::Str(s)) => Operand::Str(s),
            Value::Scalar(s) => Operand::Number(s.as_f64().unwrap_or(f64::NAN)),
            array => Operand::Array(array),
        }
    }

    fn from_literal(text: &str) -> Operand {
        match text {
            "true" => Operand::Bool(true),
            "false" => Operand::Bool(false),
            _ => text
                .parse::<f64>()
                .map(Operand::Number)
                .unwrap_or_else(|_| Operand::Str(text.to_string())),
        }
    }

    fn compare(&self, op: &str, other: &Operand) -> Result<bool> {
        let ordering = match (self, other) {
            (Operand::Number(a), Operand::Number(b)) => a.partial_cmp(b),
            (Operand::Str(a), Operand::Str(b)) => Some(a.cmp(b)),
            (Operand::Bool(a), Operand::Bool(b)) if matches!(op, "==" | "!=") => Some(a.cmp(b)),
            (Operand::Array(a), Operand::Array(b)) if matches!(op, "==" | "!=") => {
                let equal = a.equals(b)?;
                return Ok(equal == (op == "=="));
            }
            (a, b) => {
                return Err(DipError::type_error(format!(
                    "Cannot compare {:?} {} {:?}",
                    a, op, b
                )))
            }
        };
        Ok(match (op, ordering) {
            ("==", o) => o == Some(Ordering::Equal),
            ("!=", o) => o != Some(Ordering::Equal),
            ("<", o) => o == Some(Ordering::Less),
            ("<=", o) => matches!(o, Some(Ordering::Less | Ordering::Equal)),
            (">", o) => o == Some(Ordering::Greater),
            (">=", o) => matches!(o, Some(Ordering::Greater | Ordering::Equal)),
            _ => false,
        })
    }
}

// ── Parser ──────────────────────────────────────────────────────────

struct ExprParser<'a> {
    input: &'a str,
    pos: usize,
    env: &'a Environment,
}

const COMPARISONS: &[&str] = &["==", "!=", "<=", ">=", "<", ">"];

impl<'a> ExprParser<'a> {
    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.peek_char() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    /// Consume a symbol or a keyword. Keywords must end at a word boundary.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        let rest = self.remaining();
        if !rest.starts_with(token) {
            return false;
        }
        let word = token.chars().all(|c| c.is_ascii_alphabetic());
        let next = rest[token.len()..].chars().next();
        if word && next.map_or(false, |c| c.is_alphanumeric() || c == '_') {
            return false;
        }
        self.pos += token.len();
        true
    }

    fn parse_or(&mut self) -> Result<Operand> {
        let mut left = self.parse_and()?;
        while self.eat("||") || self.eat("or") {
            let right = self.parse_and()?;
            left = Operand::Bool(left.truth()? | right.truth()?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Operand> {
        let mut left = self.parse_not()?;
        while self.eat("&&") || self.eat("and") {
            let right = self.parse_not()?;
            left = Operand::Bool(left.truth()? & right.truth()?);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Operand> {
        self.skip_ws();
        if self.remaining().starts_with('!') && !self.remaining().starts_with("!=") {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(Operand::Bool(!inner.truth()?));
        }
        if self.eat("not") {
            let inner = self.parse_not()?;
            return Ok(Operand::Bool(!inner.truth()?));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Operand> {
        let left = self.parse_operand()?;
        for op in COMPARISONS {
            if self.eat(op) {
                let right = self.parse_operand()?;
                return left.compare(op, &right).map(Operand::Bool);
            }
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        self.skip_ws();
        match self.peek_char() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if !self.eat(")") {
                    return Err(DipError::syntax("Expected ')' in expression"));
                }
                Ok(inner)
            }
            Some('{') => self.parse_reference(),
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let end = self
                    .remaining()
                    .find(q)
                    .ok_or_else(|| DipError::syntax("Unterminated string in expression"))?;
                let text = &self.remaining()[..end];
                self.pos += end + 1;
                Ok(Operand::Str(text.to_string()))
            }
            Some(_) => {
                let rest = self.remaining();
                let end = rest
                    .find(|c: char| !(c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '+')))
                    .unwrap_or(rest.len());
                if end == 0 {
                    return Err(DipError::syntax(format!(
                        "Unexpected text in expression: {}",
                        rest
                    )));
                }
                self.pos += end;
                Ok(Operand::from_literal(&rest[..end]))
            }
            None => Err(DipError::syntax("Unexpected end of expression")),
        }
    }

    fn parse_reference(&mut self) -> Result<Operand> {
        let rest = self.remaining();
        let end = rest
            .find('}')
            .ok_or_else(|| DipError::syntax("Unclosed '{' in expression"))?;
        let request = rest[1..end].trim().to_string();
        self.pos += end + 1;

        let operand = match self.env.request_value(&request, Request::Reference)? {
            Fetched::Value { value, .. } => {
                let value = if self.peek_char() == Some('[') {
                    let rest = self.remaining();
                    let close = rest
                        .find(']')
                        .ok_or_else(|| DipError::syntax("Unclosed '[' in expression"))?;
                    let ranges = parse_ranges(&rest[..=close])?;
                    self.pos += close + 1;
                    value.slice(&ranges)?
                } else {
                    value
                };
                Operand::from_value(value)
            }
            Fetched::Raw(RawValue::Literal(text)) => Operand::from_literal(&text),
            Fetched::Raw(other) => {
                return Err(DipError::type_error(format!(
                    "Raw source '{}' cannot be used in an expression: {:?}",
                    request, other
                )))
            }
        };
        Ok(operand)
    }
}
