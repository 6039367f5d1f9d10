use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{DipError, Result};
use crate::node::Node;
use crate::tokenizer::{tokenize_value, Line, RawValue};
use crate::value::{Value, DEFAULT_PRECISION};

/// Host function returning a single value, invoked by `(name)`.
pub type ValueFn = Arc<dyn Fn(&Environment) -> Result<Value> + Send + Sync>;
/// Host function returning a list of nodes, used by imports and tables.
pub type TableFn = Arc<dyn Fn(&Environment) -> Result<Vec<Node>> + Send + Sync>;

#[derive(Clone)]
pub enum NativeFn {
    Value(ValueFn),
    Table(TableFn),
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeFn::Value(_) => f.write_str("NativeFn::Value"),
            NativeFn::Table(_) => f.write_str("NativeFn::Table"),
        }
    }
}

/// How a request string should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `{source?path}`
    Reference,
    /// `(name)`
    Function,
}

/// Result of resolving a value request.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// A copy of a typed value and its units
    Value { value: Value, units: Option<String> },
    /// Uninterpreted literal taken from a raw text source
    Raw(RawValue),
}

/// A named source registered by `$source`.
#[derive(Debug, Clone)]
pub struct EnvSource {
    pub name: String,
    pub path: String,
    /// Full text of the source
    pub code: String,
    /// The `$source` line that registered it
    pub parent: Option<Line>,
    /// Compiled nodes; empty for raw text sources
    pub nodes: Vec<Node>,
}

/// Compiled document: the final node list plus the registries it was
/// compiled against.
#[derive(Debug, Clone)]
pub struct Environment {
    pub sources: BTreeMap<String, EnvSource>,
    pub nodes: Vec<Node>,
    /// Unit aliases: name to definition
    pub units: BTreeMap<String, String>,
    pub functions: BTreeMap<String, NativeFn>,
    /// Significant digits used when rendering floats
    pub precision: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            sources: BTreeMap::new(),
            nodes: Vec::new(),
            units: BTreeMap::new(),
            functions: BTreeMap::new(),
            precision: DEFAULT_PRECISION,
        }
    }
}

/// Split `source?path` into its parts. Without `?` the whole request names
/// a source and there is no path.
fn split_request(request: &str) -> (Option<&str>, Option<&str>) {
    match request.split_once('?') {
        Some((source, path)) => {
            let source = source.trim();
            ((!source.is_empty()).then_some(source), Some(path.trim()))
        }
        None => (Some(request.trim()), None),
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookup ──────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(|n| n.value.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// `(name, value)` pairs in node order.
    pub fn data(&self) -> Vec<(&str, &Value)> {
        self.nodes
            .iter()
            .filter_map(|n| n.value.as_ref().map(|v| (n.name.as_str(), v)))
            .collect()
    }

    /// Nodes whose name matches a glob pattern where `*` matches anything.
    pub fn query(&self, pattern: &str) -> Result<Vec<&Node>> {
        let regex = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
        let regex = Regex::new(&regex)
            .map_err(|e| DipError::reference(format!("Invalid query '{}': {}", pattern, e)))?;
        Ok(self.nodes.iter().filter(|n| regex.is_match(&n.name)).collect())
    }

    pub fn tagged(&self, tag: &str) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.tags.iter().any(|t| t == tag))
            .collect()
    }

    fn source(&self, name: &str) -> Result<&EnvSource> {
        self.sources
            .get(name)
            .ok_or_else(|| DipError::reference(format!("Source '{}' is not defined", name)))
    }

    /// Full text of a registered source.
    pub fn source_text(&self, name: &str) -> Result<&str> {
        Ok(self.source(name)?.code.as_str())
    }

    fn scope_nodes(&self, source: Option<&str>) -> Result<&[Node]> {
        match source {
            Some(name) => Ok(&self.source(name)?.nodes),
            None => Ok(&self.nodes),
        }
    }

    fn function(&self, name: &str) -> Result<&NativeFn> {
        self.functions
            .get(name)
            .ok_or_else(|| DipError::reference(format!("Function '{}' is not defined", name)))
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Resolve a request to a single value. Values are always copies.
    pub fn request_value(&self, request: &str, kind: Request) -> Result<Fetched> {
        if kind == Request::Function {
            return match self.function(request)? {
                NativeFn::Value(f) => Ok(Fetched::Value {
                    value: f(self)?,
                    units: None,
                }),
                NativeFn::Table(_) => Err(DipError::reference(format!(
                    "Function '{}' returns nodes, not a value",
                    request
                ))),
            };
        }

        let (source, path) = split_request(request);
        let Some(path) = path else {
            let name = source.unwrap_or_default();
            let src = self.source(name)?;
            if !src.nodes.is_empty() {
                return Err(DipError::reference(format!(
                    "Source '{}' is a compiled document; request a node with '{}?path'",
                    name, name
                )));
            }
            return tokenize_value(&src.code).map(Fetched::Raw);
        };

        let node = self
            .scope_nodes(source)?
            .iter()
            .find(|n| n.name == path)
            .ok_or_else(|| {
                DipError::reference(format!("Reference '{{{}}}' could not be resolved", request))
            })?;
        let value = node.value.clone().ok_or_else(|| {
            DipError::reference(format!("Referenced node '{}' has no value", node.name))
        })?;
        Ok(Fetched::Value {
            value,
            units: node.units.clone(),
        })
    }

    /// Resolve a request to a list of node copies. An empty path selects
    /// every node; otherwise the path prefix is stripped from the names.
    pub fn request_nodes(&self, request: &str, kind: Request) -> Result<Vec<Node>> {
        let nodes = match kind {
            Request::Function => match self.function(request)? {
                NativeFn::Table(f) => f(self)?,
                NativeFn::Value(_) => {
                    return Err(DipError::reference(format!(
                        "Function '{}' returns a value, not nodes",
                        request
                    )))
                }
            },
            Request::Reference => {
                let (source, path) = split_request(request);
                let scope = self.scope_nodes(source)?;
                match path.unwrap_or_default() {
                    "" => scope.to_vec(),
                    path => {
                        let prefix = format!("{}.", path);
                        scope
                            .iter()
                            .filter_map(|n| {
                                let rest = n.name.strip_prefix(&prefix)?;
                                let mut node = n.clone();
                                node.name = rest.to_string();
                                Some(node)
                            })
                            .collect()
                    }
                }
            }
        };
        if nodes.is_empty() {
            return Err(DipError::reference(format!(
                "Import of '{}' matched no nodes",
                request
            )));
        }
        Ok(nodes)
    }
}
