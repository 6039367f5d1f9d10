use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DipError, Result};
use crate::value::Range;

/// Delimiter of multi-line block strings.
pub const BLOCK_QUOTE: &str = "\"\"\"";

static NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*").unwrap());
static TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(bool|uint|int|float|str|table)([0-9]+)?\b").unwrap());
static KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(@case|@else|@end|!constant|!format|!tags|!description|!options|!condition|\$source|\$unit)\b")
        .unwrap()
});
static FUNCTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

// Escaped quotes and newlines are swapped for private-use characters while
// the line is parsed, so they never take part in quote or bracket matching.
const ESCAPES: [(&str, char, char); 3] = [
    ("\\\"", '\u{E000}', '"'),
    ("\\'", '\u{E001}', '\''),
    ("\\n", '\u{E002}', '\n'),
];

fn protect(text: &str) -> String {
    let mut out = text.to_string();
    for (escape, placeholder, _) in ESCAPES {
        out = out.replace(escape, &placeholder.to_string());
    }
    out
}

fn restore(text: &str) -> String {
    let mut out = text.to_string();
    for (_, placeholder, restored) in ESCAPES {
        out = out.replace(placeholder, &restored.to_string());
    }
    out
}

// ── Lines ───────────────────────────────────────────────────────────

/// One logical line of source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    /// Name of the source (file path or `<string>`)
    pub source: String,
    /// 1-based number of the first physical line
    pub number: usize,
}

/// Split source text into logical lines. Blank lines are dropped and block
/// strings spanning several physical lines are joined into one line.
pub fn split_lines(text: &str, source: &str) -> Result<Vec<Line>> {
    let mut lines = Vec::new();
    let mut block: Option<Line> = None;

    for (i, physical) in text.lines().enumerate() {
        if let Some(mut open) = block.take() {
            open.text.push('\n');
            open.text.push_str(physical);
            if physical.matches(BLOCK_QUOTE).count() % 2 == 1 {
                lines.push(open);
            } else {
                block = Some(open);
            }
            continue;
        }
        if physical.trim().is_empty() {
            continue;
        }
        let line = Line {
            text: physical.to_string(),
            source: source.to_string(),
            number: i + 1,
        };
        if physical.matches(BLOCK_QUOTE).count() % 2 == 1 {
            block = Some(line);
        } else {
            lines.push(line);
        }
    }

    match block {
        Some(open) => Err(DipError::syntax("Unterminated block string").at(&open)),
        None => Ok(lines),
    }
}

// ── Drafts ──────────────────────────────────────────────────────────

/// Directive keyword at the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Case,
    Else,
    End,
    Constant,
    Format,
    Tags,
    Description,
    Options,
    Condition,
    Source,
    Unit,
}

impl Keyword {
    fn from_token(token: &str) -> Option<Keyword> {
        let keyword = match token {
            "@case" => Keyword::Case,
            "@else" => Keyword::Else,
            "@end" => Keyword::End,
            "!constant" => Keyword::Constant,
            "!format" => Keyword::Format,
            "!tags" => Keyword::Tags,
            "!description" => Keyword::Description,
            "!options" => Keyword::Options,
            "!condition" => Keyword::Condition,
            "$source" => Keyword::Source,
            "$unit" => Keyword::Unit,
            _ => return None,
        };
        Some(keyword)
    }
}

/// A value as written in the source, before casting.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Quoted or bare literal, quotes removed
    Literal(String),
    /// Array literal flattened in row-major order
    Array { items: Vec<String>, shape: Vec<usize> },
    /// `{source?path}` with an optional slice
    Reference {
        request: String,
        slice: Option<Vec<Range>>,
    },
    /// `(name)`
    Function(String),
    /// `("expr")`
    Expression(String),
}

/// Type token written after a node name, e.g. `uint16`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeToken {
    pub base: String,
    pub width: Option<String>,
}

/// Structured parts stripped from one line.
#[derive(Debug, Clone)]
pub struct Draft {
    pub line: Line,
    pub indent: usize,
    pub keyword: Option<Keyword>,
    pub name: Option<String>,
    pub dtype: Option<TypeToken>,
    pub dimension: Option<Vec<Range>>,
    /// An `=` was present
    pub defined: bool,
    pub value: Option<RawValue>,
    pub units: Option<String>,
    /// Free text after `@case`, or the right side of `$source`/`$unit`
    pub rest: Option<String>,
    pub comment: Option<String>,
}

impl Draft {
    fn new(line: &Line) -> Self {
        Draft {
            line: line.clone(),
            indent: 0,
            keyword: None,
            name: None,
            dtype: None,
            dimension: None,
            defined: false,
            value: None,
            units: None,
            rest: None,
            comment: None,
        }
    }

    /// Nothing but indentation and possibly a comment.
    pub fn is_empty(&self) -> bool {
        self.keyword.is_none() && self.name.is_none() && self.value.is_none()
    }
}

/// Strip the recognized parts of a line in their fixed order.
pub fn tokenize(line: &Line) -> Result<Draft> {
    let protected = protect(&line.text);
    let mut cursor = Cursor {
        input: &protected,
        pos: 0,
    };
    let mut draft = Draft::new(line);

    draft.indent = cursor.strip_indent();
    cursor.strip_line(&mut draft).map_err(|e| e.at(line))?;

    cursor.skip_ws();
    if let Some(comment) = cursor.strip_comment() {
        draft.comment = Some(restore(comment));
    }
    if !cursor.at_end() {
        return Err(
            DipError::syntax(format!("Unrecognized text: {}", restore(cursor.remaining())))
                .at(line),
        );
    }
    Ok(draft)
}

/// Tokenize a stand-alone value literal, e.g. the contents of a raw source.
pub fn tokenize_value(text: &str) -> Result<RawValue> {
    let protected = protect(text.trim());
    let mut cursor = Cursor {
        input: &protected,
        pos: 0,
    };
    let value = cursor.strip_value()?;
    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(DipError::syntax(format!(
            "Unrecognized text: {}",
            restore(cursor.remaining())
        )));
    }
    Ok(value)
}

/// Tokenize an array literal into row-major items and a shape.
/// Ragged nesting is rejected.
pub fn tokenize_array(text: &str) -> Result<(Vec<String>, Vec<usize>)> {
    let protected = protect(text.trim());
    let mut cursor = Cursor {
        input: &protected,
        pos: 0,
    };
    let nested = cursor.parse_nested()?;
    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(DipError::syntax(format!(
            "Unexpected text after array: {}",
            restore(cursor.remaining())
        )));
    }
    let mut shape = Vec::new();
    measure(&nested, 0, &mut shape, &mut None)?;
    let mut items = Vec::new();
    flatten(nested, &mut items);
    Ok((items, shape))
}

/// Parse a dimension or slice list: `[2, 1:3, :]`.
pub fn parse_ranges(text: &str) -> Result<Vec<Range>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| DipError::syntax(format!("Malformed dimension: {}", text)))?;
    let index = |s: &str| -> Result<usize> {
        s.trim()
            .parse()
            .map_err(|_| DipError::syntax(format!("Malformed dimension: {}", text)))
    };
    inner
        .split(',')
        .map(|part| {
            let part = part.trim();
            match part.split_once(':') {
                None => index(part).map(Range::fixed),
                Some((lo, hi)) => {
                    let min = if lo.trim().is_empty() { 0 } else { index(lo)? };
                    if hi.trim().is_empty() {
                        Ok(Range::open(min))
                    } else {
                        Ok(Range::bounded(min, index(hi)?))
                    }
                }
            }
        })
        .collect()
}

/// A bounded axis must not end before it starts.
fn check_dimension(dimension: &[Range], text: &str) -> Result<()> {
    for range in dimension {
        if range.max.map_or(false, |max| max < range.min) {
            return Err(DipError::syntax(format!("Empty dimension range: {}", text)));
        }
    }
    Ok(())
}

enum Nested {
    Leaf(String),
    List(Vec<Nested>),
}

/// Record the extent of every axis, rejecting ragged nesting.
fn measure(
    nested: &Nested,
    depth: usize,
    shape: &mut Vec<usize>,
    leaf_depth: &mut Option<usize>,
) -> Result<()> {
    match nested {
        Nested::Leaf(_) => match *leaf_depth {
            Some(d) if d != depth => Err(ragged(depth)),
            Some(_) => Ok(()),
            None if shape.len() != depth => Err(ragged(depth)),
            None => {
                *leaf_depth = Some(depth);
                Ok(())
            }
        },
        Nested::List(children) => {
            if leaf_depth.map_or(false, |d| depth >= d) {
                return Err(ragged(depth));
            }
            match shape.get(depth) {
                None => shape.push(children.len()),
                Some(&n) if n != children.len() => {
                    return Err(DipError::constraint(format!(
                        "Array dimension mismatch on axis {}: expected {} elements, found {}",
                        depth,
                        n,
                        children.len()
                    )))
                }
                Some(_) => {}
            }
            for child in children {
                measure(child, depth + 1, shape, leaf_depth)?;
            }
            Ok(())
        }
    }
}

fn ragged(depth: usize) -> DipError {
    DipError::constraint(format!(
        "Array dimension mismatch on axis {}: mixed values and sub-arrays",
        depth
    ))
}

fn flatten(nested: Nested, items: &mut Vec<String>) {
    match nested {
        Nested::Leaf(s) => items.push(s),
        Nested::List(children) => {
            for child in children {
                flatten(child, items);
            }
        }
    }
}

// ── Cursor ──────────────────────────────────────────────────────────

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn starts_with(&self, s: &str) -> bool {
        self.remaining().starts_with(s)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn eat_char(&mut self, ch: char) -> bool {
        if self.peek_char() == Some(ch) {
            self.advance(ch.len_utf8());
            true
        } else {
            false
        }
    }

    /// Skip spaces and tabs, returning how many were skipped.
    fn skip_ws(&mut self) -> usize {
        let mut n = 0;
        while let Some(ch) = self.peek_char() {
            if ch == ' ' || ch == '\t' || ch == '\r' || ch == '\n' {
                self.advance(1);
                n += 1;
            } else {
                break;
            }
        }
        n
    }

    fn eat_regex(&mut self, re: &Regex) -> Option<regex::Captures<'a>> {
        let rest = self.remaining();
        let caps = re.captures(rest)?;
        let len = caps.get(0).map_or(0, |m| m.end());
        self.advance(len);
        Some(caps)
    }

    // ── Line parts ──────────────────────────────────────────────────

    fn strip_indent(&mut self) -> usize {
        self.skip_ws()
    }

    fn strip_comment(&mut self) -> Option<&'a str> {
        if self.peek_char() == Some('#') {
            let comment = &self.remaining()[1..];
            self.pos = self.input.len();
            Some(comment.trim())
        } else {
            None
        }
    }

    fn strip_line(&mut self, draft: &mut Draft) -> Result<()> {
        if self.at_end() || self.peek_char() == Some('#') {
            return Ok(());
        }
        if let Some(caps) = self.eat_regex(&KEYWORD) {
            let keyword = Keyword::from_token(&caps[1]);
            draft.keyword = keyword;
            self.skip_ws();
            return match keyword {
                Some(Keyword::Case) => {
                    let expr = self.strip_until_comment();
                    if expr.is_empty() {
                        return Err(DipError::syntax("Missing @case condition"));
                    }
                    draft.rest = Some(expr);
                    Ok(())
                }
                Some(Keyword::Format) | Some(Keyword::Description) | Some(Keyword::Tags) => {
                    draft.value = Some(self.strip_value()?);
                    Ok(())
                }
                Some(Keyword::Options) => {
                    draft.value = Some(self.strip_value()?);
                    if self.skip_ws() > 0 {
                        draft.units = self.strip_units();
                    }
                    Ok(())
                }
                Some(Keyword::Condition) => {
                    draft.value = Some(self.strip_value()?);
                    Ok(())
                }
                Some(Keyword::Source) | Some(Keyword::Unit) => {
                    let caps = self
                        .eat_regex(&NAME)
                        .ok_or_else(|| DipError::syntax("Expected a name"))?;
                    draft.name = Some(caps[0].to_string());
                    self.skip_ws();
                    if !self.eat_char('=') {
                        return Err(DipError::syntax("Expected '='"));
                    }
                    self.skip_ws();
                    let rest = self.strip_until_comment();
                    let rest = unquote(&rest).unwrap_or(&rest).to_string();
                    if rest.is_empty() {
                        return Err(DipError::syntax("Expected a definition after '='"));
                    }
                    draft.rest = Some(rest);
                    Ok(())
                }
                _ => Ok(()),
            };
        }

        // Bare import: `{source?path}` or `(function)`
        if matches!(self.peek_char(), Some('{') | Some('(')) {
            draft.value = Some(self.strip_value()?);
            return Ok(());
        }

        let caps = self
            .eat_regex(&NAME)
            .ok_or_else(|| DipError::syntax(format!("Unrecognized text: {}", self.remaining())))?;
        draft.name = Some(caps[0].to_string());
        let gap = self.skip_ws();

        // Import under a name prefix: `name {source?path}`
        if gap > 0 && matches!(self.peek_char(), Some('{') | Some('(')) {
            draft.value = Some(self.strip_value()?);
            return Ok(());
        }

        let mut spaced = gap > 0;
        if spaced {
            if let Some(caps) = self.eat_regex(&TYPE) {
                draft.dtype = Some(TypeToken {
                    base: caps[1].to_string(),
                    width: caps.get(2).map(|m| m.as_str().to_string()),
                });
                if self.peek_char() == Some('[') {
                    let text = self.strip_balanced('[', ']')?;
                    let dimension = parse_ranges(text)?;
                    check_dimension(&dimension, text)?;
                    draft.dimension = Some(dimension);
                }
                spaced = self.skip_ws() > 0;
            }
        }

        if self.eat_char('=') {
            draft.defined = true;
            self.skip_ws();
            draft.value = Some(self.strip_value()?);
            if self.skip_ws() > 0 {
                draft.units = self.strip_units();
            }
        } else if draft.dtype.is_some() && spaced {
            draft.units = self.strip_units();
        }
        Ok(())
    }

    /// A units token: everything up to whitespace or a comment.
    fn strip_units(&mut self) -> Option<String> {
        match self.peek_char() {
            None | Some('#') => None,
            Some(_) => {
                let start = self.pos;
                while let Some(ch) = self.peek_char() {
                    if ch.is_whitespace() || ch == '#' {
                        break;
                    }
                    self.advance(ch.len_utf8());
                }
                Some(restore(&self.input[start..self.pos]))
            }
        }
    }

    /// Text up to a `#` that is outside quotes, trimmed.
    fn strip_until_comment(&mut self) -> String {
        let start = self.pos;
        let mut quote: Option<char> = None;
        while let Some(ch) = self.peek_char() {
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None if ch == '"' || ch == '\'' => quote = Some(ch),
                None if ch == '#' => break,
                None => {}
            }
            self.advance(ch.len_utf8());
        }
        restore(self.input[start..self.pos].trim())
    }

    // ── Values ──────────────────────────────────────────────────────

    fn strip_value(&mut self) -> Result<RawValue> {
        if self.starts_with(BLOCK_QUOTE) {
            self.advance(3);
            let end = self
                .remaining()
                .find(BLOCK_QUOTE)
                .ok_or_else(|| DipError::syntax("Unterminated block string"))?;
            let body = &self.remaining()[..end];
            self.advance(end + 3);
            let body = body.strip_prefix('\n').unwrap_or(body);
            let body = body.strip_suffix('\n').unwrap_or(body);
            return Ok(RawValue::Literal(restore(body)));
        }
        match self.peek_char() {
            Some(q @ ('"' | '\'')) => {
                let text = self.strip_quoted(q)?;
                Ok(RawValue::Literal(restore(text)))
            }
            Some('{') => {
                let text = self.strip_balanced('{', '}')?;
                let request = restore(text[1..text.len() - 1].trim());
                let slice = if self.peek_char() == Some('[') {
                    Some(parse_ranges(self.strip_balanced('[', ']')?)?)
                } else {
                    None
                };
                Ok(RawValue::Reference { request, slice })
            }
            Some('(') => {
                let text = self.strip_balanced('(', ')')?;
                let inner = text[1..text.len() - 1].trim();
                if let Some(expr) = unquote(inner) {
                    Ok(RawValue::Expression(restore(expr)))
                } else if FUNCTION_NAME.is_match(inner) {
                    Ok(RawValue::Function(inner.to_string()))
                } else {
                    Ok(RawValue::Expression(restore(inner)))
                }
            }
            Some('[') => {
                let text = self.strip_balanced('[', ']')?;
                let (items, shape) = tokenize_array(text)?;
                Ok(RawValue::Array { items, shape })
            }
            Some(_) => {
                let start = self.pos;
                while let Some(ch) = self.peek_char() {
                    if ch.is_whitespace() || ch == '#' {
                        break;
                    }
                    self.advance(ch.len_utf8());
                }
                Ok(RawValue::Literal(restore(&self.input[start..self.pos])))
            }
            None => Err(DipError::syntax("Expected a value")),
        }
    }

    /// Consume a quoted literal and return its contents.
    fn strip_quoted(&mut self, quote: char) -> Result<&'a str> {
        self.advance(1);
        let rest = self.remaining();
        let end = rest
            .find(quote)
            .ok_or_else(|| DipError::syntax("Unterminated string"))?;
        self.advance(end + 1);
        Ok(&rest[..end])
    }

    /// Consume a bracket group, honoring nesting and quotes.
    fn strip_balanced(&mut self, open: char, close: char) -> Result<&'a str> {
        let start = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(ch) = self.peek_char() {
            self.advance(ch.len_utf8());
            match quote {
                Some(q) if ch == q => quote = None,
                Some(_) => {}
                None if ch == '"' || ch == '\'' => quote = Some(ch),
                None if ch == open => depth += 1,
                None if ch == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(&self.input[start..self.pos]);
                    }
                }
                None => {}
            }
        }
        Err(DipError::syntax(format!(
            "Unbalanced '{}' in: {}",
            open,
            restore(&self.input[start..])
        )))
    }

    // ── Arrays ──────────────────────────────────────────────────────

    fn parse_nested(&mut self) -> Result<Nested> {
        self.skip_ws();
        if !self.eat_char('[') {
            return Err(DipError::syntax("Expected '['"));
        }
        let mut children = Vec::new();
        self.skip_ws();
        if self.eat_char(']') {
            return Ok(Nested::List(children));
        }
        loop {
            self.skip_ws();
            match self.peek_char() {
                Some('[') => children.push(self.parse_nested()?),
                Some(q @ ('"' | '\'')) => {
                    let text = self.strip_quoted(q)?;
                    children.push(Nested::Leaf(restore(text)));
                }
                Some(_) => {
                    let start = self.pos;
                    while let Some(ch) = self.peek_char() {
                        if ch == ',' || ch == ']' || ch == '[' {
                            break;
                        }
                        self.advance(ch.len_utf8());
                    }
                    let token = self.input[start..self.pos].trim();
                    if token.is_empty() {
                        return Err(DipError::syntax("Empty array element"));
                    }
                    children.push(Nested::Leaf(restore(token)));
                }
                None => return Err(DipError::syntax("Unclosed '['")),
            }
            self.skip_ws();
            if self.eat_char(']') {
                return Ok(Nested::List(children));
            }
            if !self.eat_char(',') {
                return Err(match self.peek_char() {
                    None => DipError::syntax("Unclosed '['"),
                    Some(_) => DipError::syntax("Expected ',' or ']' in array"),
                });
            }
        }
    }
}

/// Contents of a fully quoted string, if it is one.
fn unquote(text: &str) -> Option<&str> {
    for q in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            let inner = &text[1..text.len() - 1];
            if !inner.contains(q) {
                return Some(inner);
            }
        }
    }
    None
}
