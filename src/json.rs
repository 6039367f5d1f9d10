use crate::environment::Environment;
use crate::error::DipError;
use crate::node::Node;
use crate::value::{Scalar, Value};

/// JSON formatting style.
#[derive(Clone, Copy)]
pub enum JsonStyle {
    /// Compact: no whitespace between tokens.
    Compact,
    /// Pretty: 2-space indented, one entry per line.
    Pretty,
}

struct JsonWriter {
    buf: String,
    style: JsonStyle,
    depth: usize,
    precision: usize,
}

impl JsonWriter {
    fn new(style: JsonStyle, precision: usize) -> Self {
        JsonWriter {
            buf: String::new(),
            style,
            depth: 0,
            precision,
        }
    }

    fn is_pretty(&self) -> bool {
        matches!(self.style, JsonStyle::Pretty)
    }

    fn newline(&mut self) {
        if self.is_pretty() {
            self.buf.push('\n');
            for _ in 0..self.depth {
                self.buf.push_str("  ");
            }
        }
    }

    fn space(&mut self) {
        if self.is_pretty() {
            self.buf.push(' ');
        }
    }

    fn write_nodes(&mut self, nodes: &[Node]) {
        self.buf.push('{');
        self.depth += 1;

        let mut first = true;
        for node in nodes {
            self.entry_sep(&mut first);
            self.write_key(&node.name);
            self.write_node(node);
        }

        self.depth -= 1;
        if !nodes.is_empty() {
            self.newline();
        }
        self.buf.push('}');
    }

    fn write_node(&mut self, node: &Node) {
        self.buf.push('{');
        self.depth += 1;

        let mut first = true;

        if let Some(dtype) = node.dtype() {
            self.entry_sep(&mut first);
            self.write_key("type");
            self.write_string_value(dtype.id());
        }

        if let Some(value) = &node.value {
            self.entry_sep(&mut first);
            self.write_key("value");
            self.write_value(value);
        }

        if let Some(units) = &node.units {
            self.entry_sep(&mut first);
            self.write_key("units");
            self.write_string_value(units);
        }

        if node.constant {
            self.entry_sep(&mut first);
            self.write_key("constant");
            self.buf.push_str("true");
        }

        if let Some(description) = &node.description {
            self.entry_sep(&mut first);
            self.write_key("description");
            self.write_string_value(description);
        }

        if !node.tags.is_empty() {
            self.entry_sep(&mut first);
            self.write_key("tags");
            self.buf.push('[');
            for (i, tag) in node.tags.iter().enumerate() {
                if i > 0 {
                    self.buf.push(',');
                    self.space();
                }
                self.write_string_value(tag);
            }
            self.buf.push(']');
        }

        if !node.options.is_empty() {
            self.entry_sep(&mut first);
            self.write_key("options");
            self.buf.push('[');
            for (i, option) in node.options.iter().enumerate() {
                if i > 0 {
                    self.buf.push(',');
                    self.space();
                }
                self.write_value(option);
            }
            self.buf.push(']');
        }

        if let Some(format) = &node.format {
            self.entry_sep(&mut first);
            self.write_key("format");
            self.write_string_value(format);
        }

        self.depth -= 1;
        self.newline();
        self.buf.push('}');
    }

    /// Arrays become nested JSON arrays following their shape.
    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Scalar(s) => self.write_scalar(s),
            Value::Array(a) => self.write_axis(a.items(), a.shape()),
        }
    }

    fn write_axis(&mut self, items: &[Scalar], shape: &[usize]) {
        self.buf.push('[');
        match shape {
            [] | [_] => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.buf.push(',');
                        self.space();
                    }
                    self.write_scalar(item);
                }
            }
            [len, rest @ ..] => {
                let stride = items.len() / (*len).max(1);
                for (i, chunk) in items.chunks(stride.max(1)).enumerate() {
                    if i > 0 {
                        self.buf.push(',');
                        self.space();
                    }
                    self.write_axis(chunk, rest);
                }
            }
        }
        self.buf.push(']');
    }

    fn write_scalar(&mut self, scalar: &Scalar) {
        match scalar {
            Scalar::Str(s) => self.write_string_value(s),
            Scalar::Bool(b) => self.buf.push_str(if *b { "true" } else { "false" }),
            s if s.dtype().is_float() => match s.as_f64() {
                Some(f) if f.is_finite() => self.buf.push_str(&s.render(self.precision, false)),
                _ => self.buf.push_str("null"),
            },
            s => self.buf.push_str(&s.render(self.precision, false)),
        }
    }

    fn entry_sep(&mut self, first: &mut bool) {
        if *first {
            *first = false;
        } else {
            self.buf.push(',');
        }
        self.newline();
    }

    fn write_key(&mut self, key: &str) {
        self.write_string_value(key);
        self.buf.push(':');
        self.space();
    }

    fn write_string_value(&mut self, s: &str) {
        self.buf.push('"');
        for ch in s.chars() {
            match ch {
                '"' => self.buf.push_str("\\\""),
                '\\' => self.buf.push_str("\\\\"),
                '\n' => self.buf.push_str("\\n"),
                '\r' => self.buf.push_str("\\r"),
                '\t' => self.buf.push_str("\\t"),
                '\u{0008}' => self.buf.push_str("\\b"),
                '\u{000C}' => self.buf.push_str("\\f"),
                c if c < '\u{0020}' => {
                    self.buf.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => self.buf.push(c),
            }
        }
        self.buf.push('"');
    }
}

/// Serialize the compiled nodes to a compact JSON object keyed by name.
pub fn to_json(env: &Environment) -> String {
    let mut w = JsonWriter::new(JsonStyle::Compact, env.precision);
    w.write_nodes(&env.nodes);
    w.buf
}

/// Serialize the compiled nodes to a pretty-printed JSON object (2-space indent).
pub fn to_json_pretty(env: &Environment) -> String {
    let mut w = JsonWriter::new(JsonStyle::Pretty, env.precision);
    w.write_nodes(&env.nodes);
    w.buf
}

/// Serialize a compile error to a JSON object.
pub fn error_to_json(err: &DipError) -> String {
    let mut w = JsonWriter::new(JsonStyle::Compact, 0);
    w.buf.push('{');
    w.write_key("code");
    w.write_string_value(err.code());
    w.buf.push(',');
    w.write_key("message");
    w.write_string_value(&err.message);
    w.buf.push(',');
    w.write_key("context");
    w.buf.push('[');
    for (i, loc) in err.context.iter().enumerate() {
        if i > 0 {
            w.buf.push(',');
        }
        w.buf.push('{');
        w.write_key("source");
        w.write_string_value(&loc.source);
        w.buf.push(',');
        w.buf.push_str(&format!("\"line\":{},", loc.line));
        w.write_key("code");
        w.write_string_value(&loc.code);
        w.buf.push('}');
    }
    w.buf.push(']');
    w.buf.push('}');
    w.buf
}
