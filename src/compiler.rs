use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, trace};

use crate::branching::Branching;
use crate::environment::{EnvSource, Environment};
use crate::error::{DipError, Result};
use crate::hierarchy::{Frame, Hierarchy};
use crate::node::{CaseKind, Node, NodeKind};
use crate::solver::ExpressionSolver;
use crate::table;
use crate::tokenizer::{split_lines, tokenize, Line};
use crate::units::UnitSystem;
use crate::validate;
use crate::value::DEFAULT_PRECISION;

/// Compiler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Significant digits used when rendering floats
    pub float_precision: usize,
    /// `$source` files with this suffix are compiled as documents;
    /// anything else is kept as raw text
    pub source_suffix: String,
    /// How deep `$source` documents may include each other
    pub max_source_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            float_precision: DEFAULT_PRECISION,
            source_suffix: ".dip".to_string(),
            max_source_depth: 16,
        }
    }
}

/// Host capabilities the compiler delegates to.
#[derive(Clone, Copy)]
pub struct Capabilities<'a> {
    pub solver: &'a dyn ExpressionSolver,
    pub units: &'a dyn UnitSystem,
    pub options: &'a CompileOptions,
}

/// A piece of document text and the name errors should cite for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub code: String,
    pub source: String,
}

impl Fragment {
    pub fn new(code: impl Into<String>, source: impl Into<String>) -> Self {
        Fragment {
            code: code.into(),
            source: source.into(),
        }
    }
}

/// Compile fragments as one document into `env`, which may already carry
/// registered functions.
pub fn compile_fragments(
    fragments: &[Fragment],
    env: Environment,
    caps: &Capabilities,
) -> Result<Environment> {
    let env = Compiler::new(env, caps, 0).run(fragments)?;
    info!(
        "compiled {} nodes, {} sources, {} unit aliases",
        env.nodes.len(),
        env.sources.len(),
        env.units.len()
    );
    Ok(env)
}

struct Compiler<'a> {
    env: Environment,
    caps: &'a Capabilities<'a>,
    depth: usize,
    hierarchy: Hierarchy,
    branching: Branching,
}

impl<'a> Compiler<'a> {
    fn new(mut env: Environment, caps: &'a Capabilities<'a>, depth: usize) -> Self {
        env.precision = caps.options.float_precision;
        Compiler {
            env,
            caps,
            depth,
            hierarchy: Hierarchy::new(),
            branching: Branching::new(),
        }
    }

    fn run(mut self, fragments: &[Fragment]) -> Result<Environment> {
        let nodes = classify(fragments)?;
        let mut queue = attach_properties(nodes)?;
        debug!("{} nodes queued after attaching properties", queue.len());

        while let Some(node) = queue.pop_front() {
            self.step(node, &mut queue)?;
        }
        self.branching.finish()?;
        debug!(
            "{} nodes retained, {} branches resolved",
            self.env.nodes.len(),
            self.branching.branches().len()
        );

        validate::validate_nodes(&self.env, self.caps)?;
        Ok(self.env)
    }

    fn step(&mut self, mut node: Node, queue: &mut VecDeque<Node>) -> Result<()> {
        if let NodeKind::Case { kind, expr } = &node.kind {
            let path = self.hierarchy.scope(node.indent);
            if *kind == CaseKind::End {
                return self.branching.close(&path, &node.line);
            }
            let env = &self.env;
            let solver = self.caps.solver;
            let id = self.branching.open_case(*kind, expr.as_deref(), path, &node.line, |text| {
                solver.evaluate(text, env)
            })?;
            self.hierarchy.push(node.indent, Frame::Case(id));
            return Ok(());
        }

        if self.branching.is_false() {
            trace!("dropped '{}' on line {}", node.name, node.line.number);
            return Ok(());
        }

        match node.kind.clone() {
            NodeKind::Empty | NodeKind::Case { .. } | NodeKind::Property(_) => Ok(()),
            NodeKind::Source { path } => self.load_source(&node, &path),
            NodeKind::Unit { definition } => {
                trace!("unit alias [{}] = {}", node.name, definition);
                self.env.units.insert(node.name.clone(), definition);
                Ok(())
            }
            NodeKind::Import => {
                let children = node.expand_import(&self.env)?;
                self.expand(&node, children, queue);
                Ok(())
            }
            NodeKind::Table => {
                let children =
                    table::expand(&node, &self.env, self.caps).map_err(|e| e.at(&node.line))?;
                self.expand(&node, children, queue);
                Ok(())
            }
            NodeKind::Group => {
                self.hierarchy.scope(node.indent);
                self.hierarchy.push(node.indent, Frame::Name(node.name));
                Ok(())
            }
            _ => {
                if !node.expanded {
                    let bare = node.name.clone();
                    node.name = self.hierarchy.qualify(node.indent, &bare);
                    self.hierarchy.push(node.indent, Frame::Name(bare));
                }
                node.case = self.branching.current();
                self.admit(node)
            }
        }
    }

    /// Queue the children of an import or table ahead of the remaining
    /// input. Children take their full names here and open no scope; lines
    /// indented below the expander nest under its own name.
    fn expand(&mut self, node: &Node, children: Vec<Node>, queue: &mut VecDeque<Node>) {
        let parents = self.hierarchy.path(node.indent);
        if !node.name.is_empty() {
            self.hierarchy.push(node.indent, Frame::Name(node.name.clone()));
        }
        let children = children
            .into_iter()
            .map(|mut child| {
                let mut parts = parents.clone();
                parts.push(child.name);
                child.name = parts.join(".");
                child.expanded = true;
                child
            })
            .collect();
        splice(queue, children);
    }

    /// Append a new node, or fold it into the node of the same name.
    fn admit(&mut self, mut node: Node) -> Result<()> {
        node.finalize(&self.env, self.caps)
            .map_err(|e| e.at(&node.line))?;

        match self.env.nodes.iter().position(|n| n.name == node.name) {
            Some(pos) => {
                trace!("modifying '{}'", node.name);
                let updated = self.env.nodes[pos].modified(node, &self.env, self.caps)?;
                self.env.nodes[pos] = updated;
            }
            None if node.kind == NodeKind::Modification => {
                return Err(DipError::reference(format!(
                    "Cannot modify undefined node '{}'",
                    node.name
                ))
                .at(&node.line));
            }
            None => {
                trace!("admitted '{}'", node.name);
                self.env.nodes.push(node);
            }
        }
        Ok(())
    }

    /// Register a `$source`. Documents are compiled in their own
    /// environment; other files are kept as raw text.
    fn load_source(&mut self, node: &Node, path: &str) -> Result<()> {
        let file = resolve_path(&node.line, path);
        let code = fs::read_to_string(&file).map_err(|e| {
            DipError::reference(format!("Cannot read source '{}': {}", file.display(), e))
                .at(&node.line)
        })?;

        let nodes = if path.ends_with(&self.caps.options.source_suffix) {
            if self.depth >= self.caps.options.max_source_depth {
                return Err(DipError::reference(format!(
                    "Source '{}' exceeds the nesting limit of {}",
                    path, self.caps.options.max_source_depth
                ))
                .at(&node.line));
            }
            let mut nested = Environment::new();
            nested.functions = self.env.functions.clone();
            let fragment = Fragment::new(code.clone(), file.display().to_string());
            let nested = Compiler::new(nested, self.caps, self.depth + 1)
                .run(&[fragment])
                .map_err(|e| e.at(&node.line))?;
            info!("compiled source '{}' with {} nodes", node.name, nested.nodes.len());
            nested.nodes
        } else {
            debug!("loaded raw source '{}' ({} bytes)", node.name, code.len());
            Vec::new()
        };

        self.env.sources.insert(
            node.name.clone(),
            EnvSource {
                name: node.name.clone(),
                path: file.display().to_string(),
                code,
                parent: Some(node.line.clone()),
                nodes,
            },
        );
        Ok(())
    }
}

/// Paths are relative to the file that names them; text compiled from a
/// string resolves against the working directory.
fn resolve_path(line: &Line, path: &str) -> PathBuf {
    if line.source.starts_with('<') {
        return PathBuf::from(path);
    }
    Path::new(&line.source)
        .parent()
        .map_or_else(|| PathBuf::from(path), |dir| dir.join(path))
}

/// Expanded children run next, ahead of anything that followed the parent.
fn splice(queue: &mut VecDeque<Node>, children: Vec<Node>) {
    for child in children.into_iter().rev() {
        queue.push_front(child);
    }
}

fn classify(fragments: &[Fragment]) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut count = 0;
    for fragment in fragments {
        let lines = split_lines(&fragment.code, &fragment.source)?;
        count += lines.len();
        for line in &lines {
            let node = Node::classify(tokenize(line)?)?;
            if node.kind != NodeKind::Empty {
                nodes.push(node);
            }
        }
    }
    debug!("tokenized {} lines from {} fragments", count, fragments.len());
    Ok(nodes)
}

/// Fold every property into the node right above it.
fn attach_properties(nodes: Vec<Node>) -> Result<VecDeque<Node>> {
    let mut queue: VecDeque<Node> = VecDeque::with_capacity(nodes.len());
    for node in nodes {
        if !matches!(node.kind, NodeKind::Property(_)) {
            queue.push_back(node);
            continue;
        }
        match queue.back_mut() {
            Some(target) => target.attach(&node)?,
            None => {
                return Err(
                    DipError::scope("Property directive has no node to attach to").at(&node.line)
                )
            }
        }
    }
    Ok(queue)
}
