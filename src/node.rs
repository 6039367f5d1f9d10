use crate::compiler::Capabilities;
use crate::environment::{Environment, Fetched, Request};
use crate::error::{DipError, Result};
use crate::tokenizer::{Draft, Keyword, Line, RawValue};
use crate::value::{DType, Range, Value};

// ── Kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseKind {
    Case,
    Else,
    End,
}

/// A property directive that decorates the value node above it.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Constant,
    Format(String),
    Tags(Vec<String>),
    Description(String),
    Options {
        raw: RawValue,
        units: Option<String>,
    },
    Condition(String),
}

impl Property {
    pub fn keyword(&self) -> &'static str {
        match self {
            Property::Constant => "!constant",
            Property::Format(_) => "!format",
            Property::Tags(_) => "!tags",
            Property::Description(_) => "!description",
            Property::Options { .. } => "!options",
            Property::Condition(_) => "!condition",
        }
    }
}

/// Closed set of node kinds. Kind never changes after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Empty,
    /// `{source?path}` or `(function)`, optionally under a name prefix
    Import,
    Source {
        path: String,
    },
    Unit {
        definition: String,
    },
    Case {
        kind: CaseKind,
        expr: Option<String>,
    },
    Property(Property),
    /// A bare name that only scopes the names below it
    Group,
    /// `name = value` without a type
    Modification,
    Boolean,
    Integer(DType),
    Float(DType),
    String,
    Table,
}

impl NodeKind {
    /// Data type of values held by this kind.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            NodeKind::Boolean => Some(DType::Bool),
            NodeKind::Integer(d) | NodeKind::Float(d) => Some(*d),
            NodeKind::String => Some(DType::Str),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        self.dtype().is_some()
    }

    pub fn for_dtype(dtype: DType) -> NodeKind {
        match dtype {
            DType::Bool => NodeKind::Boolean,
            DType::Str => NodeKind::String,
            d if d.is_integer() => NodeKind::Integer(d),
            d => NodeKind::Float(d),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Empty => "empty",
            NodeKind::Import => "import",
            NodeKind::Source { .. } => "source",
            NodeKind::Unit { .. } => "unit",
            NodeKind::Case { .. } => "case",
            NodeKind::Property(_) => "property",
            NodeKind::Group => "group",
            NodeKind::Modification => "modification",
            NodeKind::Boolean => "boolean",
            NodeKind::Integer(_) => "integer",
            NodeKind::Float(_) => "float",
            NodeKind::String => "string",
            NodeKind::Table => "table",
        }
    }
}

// ── Nodes ───────────────────────────────────────────────────────────

/// One classified line, and after compilation one entry of the node list.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: Line,
    pub indent: usize,
    /// Bare name while queued (unless `expanded`), fully dotted once admitted
    pub name: String,
    pub dimension: Option<Vec<Range>>,
    pub raw: Option<RawValue>,
    pub raw_units: Option<String>,
    pub value: Option<Value>,
    pub units: Option<String>,
    pub constant: bool,
    pub description: Option<String>,
    pub format: Option<String>,
    pub tags: Vec<String>,
    pub options_raw: Option<(RawValue, Option<String>)>,
    pub options: Vec<Value>,
    pub condition: Option<String>,
    /// `(branch id, case id)` of the case the node was admitted under
    pub case: Option<(usize, usize)>,
    /// Produced by an import or table; `name` is already fully dotted
    pub expanded: bool,
}

type Classifier = fn(&Draft) -> Result<Option<NodeKind>>;

/// First match wins.
const CLASSIFIERS: &[Classifier] = &[
    classify_empty,
    classify_bare_import,
    classify_source,
    classify_unit,
    classify_case,
    classify_options,
    classify_constant,
    classify_format,
    classify_tags,
    classify_description,
    classify_condition,
    classify_group,
    classify_named_import,
    classify_modification,
    classify_boolean,
    classify_integer,
    classify_float,
    classify_string,
    classify_table,
];

impl Node {
    /// Classify a draft into the first node kind that claims it.
    pub fn classify(draft: Draft) -> Result<Node> {
        for classifier in CLASSIFIERS {
            let kind = classifier(&draft).map_err(|e| e.at(&draft.line))?;
            if let Some(kind) = kind {
                return Ok(Node::from_draft(draft, kind));
            }
        }
        Err(DipError::syntax("Unrecognized node").at(&draft.line))
    }

    fn from_draft(draft: Draft, kind: NodeKind) -> Node {
        let keeps_value = !matches!(kind, NodeKind::Property(_));
        Node {
            kind,
            line: draft.line,
            indent: draft.indent,
            name: draft.name.unwrap_or_default(),
            dimension: draft.dimension,
            raw: if keeps_value { draft.value } else { None },
            raw_units: draft.units,
            value: None,
            units: None,
            constant: false,
            description: None,
            format: None,
            tags: Vec::new(),
            options_raw: None,
            options: Vec::new(),
            condition: None,
            case: None,
            expanded: false,
        }
    }

    /// Build a finished value node, e.g. for a host table function.
    pub fn from_value(name: &str, value: Value) -> Node {
        let dimension = match &value {
            Value::Array(a) => Some(a.shape().iter().map(|n| Range::fixed(*n)).collect()),
            Value::Scalar(_) => None,
        };
        Node {
            kind: NodeKind::for_dtype(value.dtype()),
            line: Line {
                text: name.to_string(),
                source: "<native>".to_string(),
                number: 0,
            },
            indent: 0,
            name: name.to_string(),
            dimension,
            raw: None,
            raw_units: None,
            value: Some(value),
            units: None,
            constant: false,
            description: None,
            format: None,
            tags: Vec::new(),
            options_raw: None,
            options: Vec::new(),
            condition: None,
            case: None,
            expanded: false,
        }
    }

    pub fn with_units(mut self, units: &str) -> Node {
        self.units = Some(units.to_string());
        self
    }

    pub fn dtype(&self) -> Option<DType> {
        self.kind.dtype()
    }

    // ── Properties ──────────────────────────────────────────────────

    /// Apply a property directive found directly below this node.
    pub fn attach(&mut self, property: &Node) -> Result<()> {
        let NodeKind::Property(prop) = &property.kind else {
            return Err(DipError::scope("Only property directives can be attached").at(&property.line));
        };
        let fail = |message: String| DipError::scope(message).at(&property.line).at(&self.line);

        if !self.kind.is_value() {
            return Err(fail(format!(
                "Property {} cannot be attached to a {} node",
                prop.keyword(),
                self.kind.label()
            )));
        }
        if property.indent <= self.indent {
            return Err(fail(format!(
                "Property {} must be indented deeper than node '{}'",
                prop.keyword(),
                self.name
            )));
        }

        match prop {
            Property::Constant => self.constant = true,
            Property::Format(pattern) => {
                if self.kind != NodeKind::String {
                    return Err(fail(format!(
                        "Property !format is only supported on string nodes, not {}",
                        self.kind.label()
                    )));
                }
                self.format = Some(pattern.clone());
            }
            Property::Tags(tags) => self.tags.extend(tags.iter().cloned()),
            Property::Description(text) => self.description = Some(text.clone()),
            Property::Options { raw, units } => {
                if self.kind == NodeKind::Boolean {
                    return Err(fail("Property !options is not supported on boolean nodes".to_string()));
                }
                self.options_raw = Some((raw.clone(), units.clone()));
            }
            Property::Condition(expr) => self.condition = Some(expr.clone()),
        }
        Ok(())
    }

    // ── Casting ─────────────────────────────────────────────────────

    /// Cast the node's initial value and units.
    pub fn finalize(&mut self, env: &Environment, caps: &Capabilities) -> Result<()> {
        if self.dtype().is_none() {
            return Ok(());
        }
        if self.value.is_none() {
            if let Some(raw) = self.raw.clone() {
                let (value, source_units) = self.cast_raw(&raw, env, caps)?;
                let (value, units) =
                    self.settle_units(value, source_units, self.raw_units.clone(), env, caps)?;
                self.check_shape(&value)?;
                self.value = Some(value);
                self.units = units;
            } else if let Some(units) = self.raw_units.clone() {
                caps.units.validate(&units, &env.units)?;
                self.units = Some(units);
            }
        }
        self.cast_options(env, caps)
    }

    /// Units of a freshly declared value: declared units win and the
    /// fetched magnitude is converted into them.
    fn settle_units(
        &self,
        value: Value,
        source_units: Option<String>,
        declared: Option<String>,
        env: &Environment,
        caps: &Capabilities,
    ) -> Result<(Value, Option<String>)> {
        let units = declared.or_else(|| source_units.clone());
        let Some(units) = units else {
            return Ok((value, None));
        };
        if !value.dtype().is_numeric() {
            return Err(DipError::unit(format!(
                "Node '{}' of type {} cannot carry units",
                self.name,
                value.dtype()
            )));
        }
        caps.units.validate(&units, &env.units)?;
        let value = match source_units {
            Some(from) if from != units => convert(&value, &from, &units, env, caps)?,
            _ => value,
        };
        Ok((value, Some(units)))
    }

    /// Turn a raw value into a typed value. Also returns the units the value
    /// arrived with when it was fetched from another node.
    fn cast_raw(
        &self,
        raw: &RawValue,
        env: &Environment,
        caps: &Capabilities,
    ) -> Result<(Value, Option<String>)> {
        let dtype = self.required_dtype()?;
        match raw {
            RawValue::Literal(_) | RawValue::Array { .. } => Ok((self.cast_literal(raw)?, None)),
            RawValue::Reference { request, slice } => {
                let (value, units) = match env.request_value(request, Request::Reference)? {
                    Fetched::Raw(raw) => (self.cast_literal(&raw)?, None),
                    Fetched::Value { value, units } => {
                        self.check_injected(&value, request)?;
                        (value, units)
                    }
                };
                let value = match slice {
                    Some(ranges) => value.slice(ranges)?,
                    None => value,
                };
                Ok((value, units))
            }
            RawValue::Function(name) => match env.request_value(name, Request::Function)? {
                Fetched::Value { value, units } => {
                    self.check_injected(&value, name)?;
                    Ok((value, units))
                }
                Fetched::Raw(raw) => Ok((self.cast_literal(&raw)?, None)),
            },
            RawValue::Expression(expr) => {
                if dtype != DType::Bool {
                    return Err(DipError::type_error(format!(
                        "Logical expression cannot be assigned to a {} node",
                        dtype
                    )));
                }
                Ok((Value::from(caps.solver.evaluate(expr, env)?), None))
            }
        }
    }

    fn cast_literal(&self, raw: &RawValue) -> Result<Value> {
        let dtype = self.required_dtype()?;
        match raw {
            RawValue::Literal(text) => Value::parse_scalar(dtype, text),
            RawValue::Array { items, shape } => Value::parse_array(dtype, items, shape),
            other => Err(DipError::syntax(format!(
                "Expected a literal value, found {:?}",
                other
            ))),
        }
    }

    fn required_dtype(&self) -> Result<DType> {
        self.dtype().ok_or_else(|| {
            DipError::type_error(format!("A {} node holds no value", self.kind.label()))
        })
    }

    /// Injected values must already have the node's exact data type.
    fn check_injected(&self, value: &Value, request: &str) -> Result<()> {
        let dtype = self.required_dtype()?;
        if value.dtype() != dtype {
            return Err(DipError::type_error(format!(
                "Injected value '{}' has type {} but node '{}' expects {}",
                request,
                value.dtype().id(),
                self.name,
                dtype.id()
            )));
        }
        Ok(())
    }

    fn check_shape(&self, value: &Value) -> Result<()> {
        match &self.dimension {
            Some(dimension) => value.check_dimension(dimension),
            None if value.is_array() => Err(DipError::type_error(format!(
                "Assigning an array value to scalar node '{}'",
                self.name
            ))),
            None => Ok(()),
        }
    }

    fn cast_options(&mut self, env: &Environment, caps: &Capabilities) -> Result<()> {
        let Some((raw, units)) = self.options_raw.take() else {
            return Ok(());
        };
        let dtype = self.required_dtype()?;
        let items = match &raw {
            RawValue::Array { items, .. } => items.clone(),
            RawValue::Literal(text) => vec![text.clone()],
            other => {
                return Err(DipError::syntax(format!(
                    "Property !options expects an array, found {:?}",
                    other
                )))
            }
        };
        let mut options = Vec::with_capacity(items.len());
        for item in &items {
            let mut option = Value::parse_scalar(dtype, item)?;
            if let (Some(from), Some(to)) = (&units, &self.units) {
                if from != to {
                    option = convert(&option, from, to, env, caps)?;
                }
            }
            options.push(option);
        }
        self.options = options;
        Ok(())
    }

    // ── Modification ────────────────────────────────────────────────

    /// The result of re-declaring or modifying this node with `incoming`.
    pub fn modified(&self, incoming: Node, env: &Environment, caps: &Capabilities) -> Result<Node> {
        let fail = |e: DipError| e.at(&incoming.line).at(&self.line);
        if self.constant {
            return Err(fail(DipError::constraint(format!(
                "Node '{}' is constant and cannot be modified",
                self.name
            ))));
        }
        if incoming.kind != NodeKind::Modification && incoming.kind != self.kind {
            return Err(fail(DipError::type_error(format!(
                "Node '{}' of type {} cannot be re-declared as {}",
                self.name,
                self.dtype().map_or("none", |d| d.id()),
                incoming.dtype().map_or(incoming.kind.label(), |d| d.id())
            ))));
        }

        let mut updated = self.clone();
        let fetched = if let Some(value) = incoming.value.clone() {
            Some((value, incoming.units.clone()))
        } else if let Some(raw) = &incoming.raw {
            let (value, source_units) = updated.cast_raw(raw, env, caps).map_err(fail)?;
            Some((value, incoming.raw_units.clone().or(source_units)))
        } else {
            None
        };

        if let Some((value, given)) = fetched {
            let value = match (&self.units, given) {
                (Some(own), Some(given)) if *own != given => {
                    convert(&value, &given, own, env, caps).map_err(fail)?
                }
                (None, Some(given)) => {
                    return Err(fail(DipError::unit(format!(
                        "Cannot assign units '{}' to dimensionless node '{}'",
                        given, self.name
                    ))))
                }
                _ => value,
            };
            updated.check_shape(&value).map_err(fail)?;
            updated.value = Some(value);
        }

        updated.constant |= incoming.constant;
        if incoming.description.is_some() {
            updated.description = incoming.description;
        }
        if incoming.format.is_some() {
            updated.format = incoming.format;
        }
        if incoming.condition.is_some() {
            updated.condition = incoming.condition;
        }
        updated.tags.extend(incoming.tags);
        if !incoming.options.is_empty() {
            // Options were cast in the incoming units; the node keeps its own.
            updated.options = match (&incoming.units, &self.units) {
                (Some(from), Some(to)) if from != to => incoming
                    .options
                    .iter()
                    .map(|option| convert(option, from, to, env, caps))
                    .collect::<Result<Vec<_>>>()
                    .map_err(fail)?,
                _ => incoming.options,
            };
        }
        Ok(updated)
    }

    // ── Expansion ───────────────────────────────────────────────────

    /// Fetch the nodes an import line stands for, re-indented and prefixed
    /// with the import's own name.
    pub fn expand_import(&self, env: &Environment) -> Result<Vec<Node>> {
        let (request, kind) = match &self.raw {
            Some(RawValue::Reference {
                request,
                slice: None,
            }) => (request.as_str(), Request::Reference),
            Some(RawValue::Function(name)) => (name.as_str(), Request::Function),
            _ => {
                return Err(DipError::syntax("Import expects a reference or a function").at(&self.line))
            }
        };
        let nodes = env.request_nodes(request, kind).map_err(|e| e.at(&self.line))?;
        Ok(self.adopt(nodes))
    }

    /// Place expanded child nodes under this node's indent and name.
    pub fn adopt(&self, nodes: Vec<Node>) -> Vec<Node> {
        nodes
            .into_iter()
            .map(|mut node| {
                node.indent = self.indent;
                if !self.name.is_empty() {
                    node.name = format!("{}.{}", self.name, node.name);
                }
                node.case = None;
                node
            })
            .collect()
    }
}

fn convert(
    value: &Value,
    from: &str,
    to: &str,
    env: &Environment,
    caps: &Capabilities,
) -> Result<Value> {
    value.map_magnitude(|m| caps.units.convert(m, from, to, &env.units))
}

// ── Classifiers ─────────────────────────────────────────────────────

fn classify_empty(d: &Draft) -> Result<Option<NodeKind>> {
    Ok(d.is_empty().then_some(NodeKind::Empty))
}

fn is_request(value: &Option<RawValue>) -> bool {
    matches!(
        value,
        Some(RawValue::Reference { slice: None, .. }) | Some(RawValue::Function(_))
    )
}

fn classify_bare_import(d: &Draft) -> Result<Option<NodeKind>> {
    let claimed = d.keyword.is_none() && d.name.is_none() && is_request(&d.value);
    Ok(claimed.then_some(NodeKind::Import))
}

fn classify_source(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Source) {
        return Ok(None);
    }
    Ok(Some(NodeKind::Source {
        path: d.rest.clone().unwrap_or_default(),
    }))
}

fn classify_unit(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Unit) {
        return Ok(None);
    }
    Ok(Some(NodeKind::Unit {
        definition: d.rest.clone().unwrap_or_default(),
    }))
}

fn classify_case(d: &Draft) -> Result<Option<NodeKind>> {
    let kind = match d.keyword {
        Some(Keyword::Case) => CaseKind::Case,
        Some(Keyword::Else) => CaseKind::Else,
        Some(Keyword::End) => CaseKind::End,
        _ => return Ok(None),
    };
    Ok(Some(NodeKind::Case {
        kind,
        expr: d.rest.clone(),
    }))
}

fn classify_options(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Options) {
        return Ok(None);
    }
    match &d.value {
        Some(RawValue::Array { items, .. }) if items.is_empty() => Err(DipError::syntax(
            "Property !options expects at least one option",
        )),
        Some(raw @ RawValue::Array { .. }) => Ok(Some(NodeKind::Property(Property::Options {
            raw: raw.clone(),
            units: d.units.clone(),
        }))),
        _ => Err(DipError::syntax("Property !options expects an array")),
    }
}

fn classify_constant(d: &Draft) -> Result<Option<NodeKind>> {
    Ok((d.keyword == Some(Keyword::Constant)).then_some(NodeKind::Property(Property::Constant)))
}

fn literal_of(d: &Draft, keyword: &str) -> Result<String> {
    match &d.value {
        Some(RawValue::Literal(text)) => Ok(text.clone()),
        _ => Err(DipError::syntax(format!("Property {} expects a string", keyword))),
    }
}

fn classify_format(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Format) {
        return Ok(None);
    }
    let pattern = literal_of(d, "!format")?;
    Ok(Some(NodeKind::Property(Property::Format(pattern))))
}

fn classify_tags(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Tags) {
        return Ok(None);
    }
    let tags = match &d.value {
        Some(RawValue::Array { items, .. }) => items.clone(),
        Some(RawValue::Literal(text)) => vec![text.clone()],
        _ => return Err(DipError::syntax("Property !tags expects an array of strings")),
    };
    Ok(Some(NodeKind::Property(Property::Tags(tags))))
}

fn classify_description(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Description) {
        return Ok(None);
    }
    let text = literal_of(d, "!description")?;
    Ok(Some(NodeKind::Property(Property::Description(text))))
}

fn classify_condition(d: &Draft) -> Result<Option<NodeKind>> {
    if d.keyword != Some(Keyword::Condition) {
        return Ok(None);
    }
    match &d.value {
        Some(RawValue::Expression(expr)) | Some(RawValue::Literal(expr)) => {
            Ok(Some(NodeKind::Property(Property::Condition(expr.clone()))))
        }
        _ => Err(DipError::syntax("Property !condition expects an expression")),
    }
}

fn is_plain_name(d: &Draft) -> bool {
    d.keyword.is_none() && d.name.is_some() && d.dtype.is_none()
}

fn classify_group(d: &Draft) -> Result<Option<NodeKind>> {
    let claimed = is_plain_name(d) && !d.defined && d.value.is_none();
    Ok(claimed.then_some(NodeKind::Group))
}

fn classify_named_import(d: &Draft) -> Result<Option<NodeKind>> {
    let claimed = is_plain_name(d) && !d.defined && is_request(&d.value);
    Ok(claimed.then_some(NodeKind::Import))
}

fn classify_modification(d: &Draft) -> Result<Option<NodeKind>> {
    let claimed = is_plain_name(d) && d.defined;
    Ok(claimed.then_some(NodeKind::Modification))
}

fn type_base<'a>(d: &'a Draft, bases: &[&str]) -> Option<&'a crate::tokenizer::TypeToken> {
    d.dtype
        .as_ref()
        .filter(|t| d.keyword.is_none() && bases.contains(&t.base.as_str()))
}

fn classify_boolean(d: &Draft) -> Result<Option<NodeKind>> {
    let Some(token) = type_base(d, &["bool"]) else {
        return Ok(None);
    };
    if let Some(width) = &token.width {
        return Err(DipError::type_error(format!(
            "Boolean nodes take no width, found bool{}",
            width
        )));
    }
    if d.units.is_some() {
        return Err(DipError::unit("Boolean nodes cannot carry units"));
    }
    Ok(Some(NodeKind::Boolean))
}

fn classify_integer(d: &Draft) -> Result<Option<NodeKind>> {
    let Some(token) = type_base(d, &["int", "uint"]) else {
        return Ok(None);
    };
    let dtype = DType::integer(token.width.as_deref(), token.base == "uint")?;
    Ok(Some(NodeKind::Integer(dtype)))
}

fn classify_float(d: &Draft) -> Result<Option<NodeKind>> {
    let Some(token) = type_base(d, &["float"]) else {
        return Ok(None);
    };
    let dtype = DType::float(token.width.as_deref())?;
    Ok(Some(NodeKind::Float(dtype)))
}

fn classify_string(d: &Draft) -> Result<Option<NodeKind>> {
    let Some(token) = type_base(d, &["str"]) else {
        return Ok(None);
    };
    if let Some(width) = &token.width {
        return Err(DipError::type_error(format!(
            "String nodes take no width, found str{}",
            width
        )));
    }
    if let Some(units) = &d.units {
        return Err(DipError::unit(format!(
            "String nodes cannot carry units, found '{}'",
            units
        )));
    }
    Ok(Some(NodeKind::String))
}

fn classify_table(d: &Draft) -> Result<Option<NodeKind>> {
    let Some(token) = type_base(d, &["table"]) else {
        return Ok(None);
    };
    if token.width.is_some() || d.dimension.is_some() {
        return Err(DipError::type_error("Table nodes take no width or dimension"));
    }
    if d.units.is_some() {
        return Err(DipError::unit("Table nodes cannot carry units"));
    }
    Ok(Some(NodeKind::Table))
}
