pub mod branching;
pub mod compiler;
pub mod environment;
pub mod error;
pub mod hierarchy;
pub mod json;
pub mod node;
pub mod solver;
pub mod table;
pub mod tokenizer;
pub mod units;
pub mod validate;
pub mod value;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::debug;

use compiler::{Capabilities, Fragment};
use environment::NativeFn;

pub use compiler::CompileOptions;
pub use environment::{Environment, Request};
pub use error::{DipError, ErrorKind, Result};
pub use node::{Node, NodeKind};
pub use solver::{ExpressionSolver, LogicalSolver};
pub use units::{SiUnits, UnitSystem};
pub use value::{DType, Range, Scalar, Value};

// ── Core API ───────────────────────────────────────────────────────

/// Source name cited for directives added through the builder.
const BUILDER_SOURCE: &str = "<builder>";
/// Source name cited for text passed as a string.
const STRING_SOURCE: &str = "<string>";

/// Builder collecting document fragments, registries and capabilities.
/// All fragments compile together as one document.
pub struct Dip {
    fragments: Vec<Fragment>,
    directives: Vec<String>,
    functions: BTreeMap<String, NativeFn>,
    solver: Box<dyn ExpressionSolver>,
    units: Box<dyn UnitSystem>,
    options: CompileOptions,
}

impl Default for Dip {
    fn default() -> Self {
        Dip {
            fragments: Vec::new(),
            directives: Vec::new(),
            functions: BTreeMap::new(),
            solver: Box::new(LogicalSolver),
            units: Box::new(SiUnits),
            options: CompileOptions::default(),
        }
    }
}

impl Dip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append document text.
    pub fn from_string(&mut self, code: &str) -> &mut Self {
        self.fragments.push(Fragment::new(code, STRING_SOURCE));
        self
    }

    /// Append the contents of a document file. `$source` paths inside it
    /// resolve relative to the file.
    pub fn from_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let code = fs::read_to_string(path).map_err(|e| {
            DipError::reference(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        self.fragments
            .push(Fragment::new(code, path.display().to_string()));
        Ok(self)
    }

    /// Register a named source, as `$source name = path` would.
    pub fn add_source(&mut self, name: &str, path: &str) -> &mut Self {
        self.directives.push(format!("$source {} = {}", name, path));
        self
    }

    /// Register a unit alias, as `$unit name = definition` would.
    pub fn add_unit(&mut self, name: &str, definition: &str) -> &mut Self {
        self.directives.push(format!("$unit {} = {}", name, definition));
        self
    }

    /// Register a function invoked by `name type = (function)`.
    pub fn add_value_function(
        &mut self,
        name: &str,
        f: impl Fn(&Environment) -> Result<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        self.functions
            .insert(name.to_string(), NativeFn::Value(Arc::new(f)));
        self
    }

    /// Register a function producing nodes, used by `(function)` imports
    /// and `name table = (function)`.
    pub fn add_table_function(
        &mut self,
        name: &str,
        f: impl Fn(&Environment) -> Result<Vec<Node>> + Send + Sync + 'static,
    ) -> &mut Self {
        self.functions
            .insert(name.to_string(), NativeFn::Table(Arc::new(f)));
        self
    }

    pub fn with_solver(&mut self, solver: impl ExpressionSolver + 'static) -> &mut Self {
        self.solver = Box::new(solver);
        self
    }

    pub fn with_units(&mut self, units: impl UnitSystem + 'static) -> &mut Self {
        self.units = Box::new(units);
        self
    }

    pub fn with_options(&mut self, options: CompileOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Compile everything collected so far into a fresh environment.
    pub fn compile(&self) -> Result<Environment> {
        let mut fragments = Vec::with_capacity(self.fragments.len() + 1);
        if !self.directives.is_empty() {
            fragments.push(Fragment::new(self.directives.join("\n"), BUILDER_SOURCE));
        }
        fragments.extend(self.fragments.iter().cloned());
        debug!(
            "compiling {} fragments with {} functions",
            fragments.len(),
            self.functions.len()
        );

        let mut env = Environment::new();
        env.functions = self.functions.clone();
        let caps = Capabilities {
            solver: self.solver.as_ref(),
            units: self.units.as_ref(),
            options: &self.options,
        };
        compiler::compile_fragments(&fragments, env, &caps)
    }
}

/// Compile document text with the default capabilities.
pub fn compile(code: &str) -> Result<Environment> {
    Dip::new().from_string(code).compile()
}

#[cfg(test)]
mod tests;
