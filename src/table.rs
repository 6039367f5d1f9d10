use once_cell::sync::Lazy;
use regex::Regex;

use crate::compiler::Capabilities;
use crate::environment::{Environment, Request};
use crate::error::{DipError, Result};
use crate::node::Node;
use crate::tokenizer::RawValue;
use crate::value::{DType, Value};

static COLUMN_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(bool|uint|int|float|str)([0-9]+)?$").unwrap());

const SEPARATOR: &str = "---";

#[derive(Debug)]
struct Column {
    name: String,
    dtype: DType,
    units: Option<String>,
    cells: Vec<String>,
}

/// Expand a table node into one array node per column, named
/// `table.column`.
pub fn expand(table: &Node, env: &Environment, caps: &Capabilities) -> Result<Vec<Node>> {
    let nodes = match &table.raw {
        Some(RawValue::Literal(body)) => parse_body(body, env, caps)?,
        Some(RawValue::Reference {
            request,
            slice: None,
        }) if !request.contains('?') => parse_body(env.source_text(request)?, env, caps)?,
        Some(RawValue::Reference {
            request,
            slice: None,
        }) => env.request_nodes(request, Request::Reference)?,
        Some(RawValue::Function(name)) => env.request_nodes(name, Request::Function)?,
        _ => {
            return Err(DipError::syntax(
                "Table expects a block string, a source or a table function",
            ))
        }
    };
    let nodes = nodes
        .into_iter()
        .map(|mut node| {
            node.line = table.line.clone();
            node
        })
        .collect();
    Ok(table.adopt(nodes))
}

/// Parse `column type [units]` headers, a `---` separator and rows.
fn parse_body(body: &str, env: &Environment, caps: &Capabilities) -> Result<Vec<Node>> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
    let mut columns = Vec::new();
    let mut separated = false;

    for line in lines.by_ref() {
        if line == SEPARATOR {
            separated = true;
            break;
        }
        columns.push(parse_header(line)?);
    }
    if !separated {
        return Err(DipError::syntax("Table is missing the '---' separator"));
    }
    if columns.is_empty() {
        return Err(DipError::syntax("Table declares no columns"));
    }

    for (row, line) in lines.enumerate() {
        let cells = split_row(line)?;
        if cells.len() != columns.len() {
            return Err(DipError::constraint(format!(
                "Table row {} has {} cells but {} columns are declared",
                row + 1,
                cells.len(),
                columns.len()
            )));
        }
        for (column, cell) in columns.iter_mut().zip(cells) {
            column.cells.push(cell);
        }
    }

    columns
        .into_iter()
        .map(|column| {
            let value = Value::parse_array(column.dtype, &column.cells, &[column.cells.len()])?;
            let node = Node::from_value(&column.name, value);
            match column.units {
                Some(units) => {
                    caps.units.validate(&units, &env.units)?;
                    Ok(node.with_units(&units))
                }
                None => Ok(node),
            }
        })
        .collect()
}

fn parse_header(line: &str) -> Result<Column> {
    let mut parts = line.split_whitespace();
    let (Some(name), Some(ty)) = (parts.next(), parts.next()) else {
        return Err(DipError::syntax(format!(
            "Table header '{}' expects a column name and a type",
            line
        )));
    };
    let caps = COLUMN_TYPE
        .captures(ty)
        .ok_or_else(|| DipError::syntax(format!("Unknown column type '{}'", ty)))?;
    let width = caps.get(2).map(|m| m.as_str());
    let dtype = match &caps[1] {
        "bool" | "str" if width.is_some() => {
            return Err(DipError::type_error(format!("Column type {} takes no width", ty)))
        }
        "bool" => DType::Bool,
        "str" => DType::Str,
        "float" => DType::float(width)?,
        base => DType::integer(width, base == "uint")?,
    };
    let units = parts.next().map(str::to_string);
    if let Some(extra) = parts.next() {
        return Err(DipError::syntax(format!(
            "Unexpected text '{}' in table header",
            extra
        )));
    }
    Ok(Column {
        name: name.to_string(),
        dtype,
        units,
        cells: Vec::new(),
    })
}

/// Split a row on whitespace; quotes group a cell.
fn split_row(line: &str) -> Result<Vec<String>> {
    let mut cells = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let mut cell = String::new();
        if ch == '"' || ch == '\'' {
            chars.next();
            loop {
                match chars.next() {
                    Some(c) if c == ch => break,
                    Some(c) => cell.push(c),
                    None => return Err(DipError::syntax(format!("Unterminated quote in row '{}'", line))),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                cell.push(c);
                chars.next();
            }
        }
        cells.push(cell);
    }
    Ok(cells)
}
