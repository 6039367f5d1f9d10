use regex::Regex;

use crate::compiler::Capabilities;
use crate::environment::Environment;
use crate::error::{DipError, Result};
use crate::node::Node;
use crate::value::{Scalar, Value};

// ── Final validation ────────────────────────────────────────────────

/// Check every retained node: a value is defined, it is one of the
/// `!options`, its `!condition` holds and strings match `!format`.
///
/// The first violation aborts the compile.
pub fn validate_nodes(env: &Environment, caps: &Capabilities) -> Result<()> {
    for node in &env.nodes {
        validate_node(node, env, caps).map_err(|e| e.at(&node.line))?;
    }
    Ok(())
}

fn validate_node(node: &Node, env: &Environment, caps: &Capabilities) -> Result<()> {
    let value = node.value.as_ref().ok_or_else(|| {
        DipError::constraint(format!("Node '{}' is declared but has no value", node.name))
    })?;
    if !node.options.is_empty() {
        validate_options(node, value, env.precision)?;
    }
    if let Some(condition) = &node.condition {
        validate_condition(node, condition, env, caps)?;
    }
    if let Some(pattern) = &node.format {
        validate_format(node, value, pattern)?;
    }
    Ok(())
}

/// Every element of the value must equal one of the options.
fn validate_options(node: &Node, value: &Value, precision: usize) -> Result<()> {
    let allowed: Vec<&Scalar> = node
        .options
        .iter()
        .filter_map(|o| o.as_scalar())
        .collect();
    for element in value.elements() {
        if !allowed.iter().any(|a| same_option(a, element)) {
            let listed: Vec<String> = allowed.iter().map(|a| a.render(precision, true)).collect();
            return Err(DipError::constraint(format!(
                "Value {} of node '{}' is not one of the options [{}]",
                element.render(precision, true),
                node.name,
                listed.join(", ")
            )));
        }
    }
    Ok(())
}

/// Floats converted from other units may differ in the last bits.
fn same_option(option: &Scalar, element: &Scalar) -> bool {
    if option.dtype().is_float() && option.dtype() == element.dtype() {
        if let (Some(a), Some(b)) = (option.as_f64(), element.as_f64()) {
            return (a - b).abs() <= 1e-9 * a.abs().max(b.abs());
        }
    }
    option == element
}

/// `{?}` in the expression stands for the node itself.
fn validate_condition(
    node: &Node,
    condition: &str,
    env: &Environment,
    caps: &Capabilities,
) -> Result<()> {
    let expr = condition.replace("{?}", &format!("{{?{}}}", node.name));
    if caps.solver.evaluate(&expr, env)? {
        Ok(())
    } else {
        Err(DipError::constraint(format!(
            "Node '{}' does not satisfy the condition \"{}\"",
            node.name, condition
        )))
    }
}

/// String elements must match the `!format` regex.
fn validate_format(node: &Node, value: &Value, pattern: &str) -> Result<()> {
    let re = Regex::new(pattern).map_err(|e| {
        DipError::constraint(format!("Invalid format pattern \"{}\": {}", pattern, e))
    })?;
    for element in value.elements() {
        let Scalar::Str(text) = element else {
            return Err(DipError::scope(format!(
                "Property !format applies to strings, node '{}' is {}",
                node.name,
                value.dtype()
            )));
        };
        if !re.is_match(text) {
            return Err(DipError::constraint(format!(
                "Value \"{}\" of node '{}' does not match the format \"{}\"",
                text, node.name, pattern
            )));
        }
    }
    Ok(())
}
