use std::collections::BTreeMap;
use std::f64::consts::PI;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DipError, Result};

/// Validates unit strings and converts magnitudes between them.
/// `aliases` are the `$unit` definitions of the document.
pub trait UnitSystem {
    fn validate(&self, units: &str, aliases: &BTreeMap<String, String>) -> Result<()>;

    fn convert(
        &self,
        magnitude: f64,
        from: &str,
        to: &str,
        aliases: &BTreeMap<String, String>,
    ) -> Result<f64>;
}

// ── Quantities ──────────────────────────────────────────────────────

/// Exponents of metre, kilogram, second, ampere, kelvin, mole, candela.
type Dimension = [i32; 7];

const NONE: Dimension = [0; 7];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Quantity {
    factor: f64,
    dimension: Dimension,
}

impl Quantity {
    const ONE: Quantity = Quantity {
        factor: 1.0,
        dimension: NONE,
    };

    fn times(self, other: Quantity, power: i32) -> Quantity {
        let mut dimension = self.dimension;
        for (d, o) in dimension.iter_mut().zip(other.dimension) {
            *d += o * power;
        }
        Quantity {
            factor: self.factor * other.factor.powi(power),
            dimension,
        }
    }
}

struct UnitDef {
    symbol: &'static str,
    factor: f64,
    dimension: Dimension,
    prefixable: bool,
}

const fn unit(symbol: &'static str, factor: f64, dimension: Dimension, prefixable: bool) -> UnitDef {
    UnitDef {
        symbol,
        factor,
        dimension,
        prefixable,
    }
}

const UNITS: &[UnitDef] = &[
    unit("m", 1.0, [1, 0, 0, 0, 0, 0, 0], true),
    unit("g", 1e-3, [0, 1, 0, 0, 0, 0, 0], true),
    unit("s", 1.0, [0, 0, 1, 0, 0, 0, 0], true),
    unit("A", 1.0, [0, 0, 0, 1, 0, 0, 0], true),
    unit("K", 1.0, [0, 0, 0, 0, 1, 0, 0], true),
    unit("mol", 1.0, [0, 0, 0, 0, 0, 1, 0], true),
    unit("cd", 1.0, [0, 0, 0, 0, 0, 0, 1], true),
    unit("Hz", 1.0, [0, 0, -1, 0, 0, 0, 0], true),
    unit("N", 1.0, [1, 1, -2, 0, 0, 0, 0], true),
    unit("Pa", 1.0, [-1, 1, -2, 0, 0, 0, 0], true),
    unit("J", 1.0, [2, 1, -2, 0, 0, 0, 0], true),
    unit("W", 1.0, [2, 1, -3, 0, 0, 0, 0], true),
    unit("C", 1.0, [0, 0, 1, 1, 0, 0, 0], true),
    unit("V", 1.0, [2, 1, -3, -1, 0, 0, 0], true),
    unit("Ohm", 1.0, [2, 1, -3, -2, 0, 0, 0], true),
    unit("T", 1.0, [0, 1, -2, -1, 0, 0, 0], true),
    unit("L", 1e-3, [3, 0, 0, 0, 0, 0, 0], true),
    unit("eV", 1.602_176_634e-19, [2, 1, -2, 0, 0, 0, 0], true),
    unit("pc", 3.085_677_581_491_367e16, [1, 0, 0, 0, 0, 0, 0], true),
    unit("erg", 1e-7, [2, 1, -2, 0, 0, 0, 0], false),
    unit("dyn", 1e-5, [1, 1, -2, 0, 0, 0, 0], false),
    unit("min", 60.0, [0, 0, 1, 0, 0, 0, 0], false),
    unit("h", 3600.0, [0, 0, 1, 0, 0, 0, 0], false),
    unit("day", 86400.0, [0, 0, 1, 0, 0, 0, 0], false),
    unit("year", 3.155_76e7, [0, 0, 1, 0, 0, 0, 0], false),
    unit("au", 1.495_978_707e11, [1, 0, 0, 0, 0, 0, 0], false),
    unit("rad", 1.0, NONE, false),
    unit("deg", PI / 180.0, NONE, false),
    unit("%", 0.01, NONE, false),
];

/// Longest symbols first so `da` wins over `d`.
const PREFIXES: &[(&str, i32)] = &[
    ("da", 1),
    ("Y", 24),
    ("Z", 21),
    ("E", 18),
    ("P", 15),
    ("T", 12),
    ("G", 9),
    ("M", 6),
    ("k", 3),
    ("h", 2),
    ("d", -1),
    ("c", -2),
    ("m", -3),
    ("μ", -6),
    ("u", -6),
    ("n", -9),
    ("p", -12),
    ("f", -15),
    ("a", -18),
    ("z", -21),
    ("y", -24),
];

const MAX_ALIAS_DEPTH: usize = 16;

static TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\[(?P<alias>[A-Za-z_][A-Za-z0-9_]*)\]|(?P<symbol>[A-Za-zμ%]+)|(?P<number>[0-9]+(?:\.[0-9]*)?(?:[eE][-+]?[0-9]+)?))(?:\^?(?P<power>-?[0-9]+))?$").unwrap()
});

// ── SI units ────────────────────────────────────────────────────────

/// SI base and derived units with metric prefixes. Unit strings are
/// products of terms joined by `*` and `/`, each term a symbol with an
/// optional integer exponent (`kg*m2/s2`, `m/s^2`), a number, or a
/// `[alias]` naming a `$unit` definition.
#[derive(Debug, Default, Clone, Copy)]
pub struct SiUnits;

impl SiUnits {
    fn parse(&self, units: &str, aliases: &BTreeMap<String, String>, depth: usize) -> Result<Quantity> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(DipError::unit(format!(
                "Unit alias nesting is too deep in '{}'",
                units
            )));
        }
        if units.trim().is_empty() {
            return Ok(Quantity::ONE);
        }
        let mut quantity = Quantity::ONE;
        let mut power = 1;
        let mut rest = units.trim();
        loop {
            let end = rest.find(['*', '/']).unwrap_or(rest.len());
            let term = rest[..end].trim();
            if term.is_empty() {
                return Err(DipError::unit(format!("Malformed units '{}'", units)));
            }
            quantity = quantity.times(self.term(term, units, aliases, depth)?, power);
            match rest[end..].chars().next() {
                None => break,
                Some(op) => {
                    power = if op == '/' { -1 } else { 1 };
                    rest = &rest[end + 1..];
                }
            }
        }
        Ok(quantity)
    }

    fn term(
        &self,
        term: &str,
        units: &str,
        aliases: &BTreeMap<String, String>,
        depth: usize,
    ) -> Result<Quantity> {
        let caps = TERM
            .captures(term)
            .ok_or_else(|| DipError::unit(format!("Malformed unit '{}' in '{}'", term, units)))?;
        let exponent = match caps.name("power") {
            Some(p) => p
                .as_str()
                .parse::<i32>()
                .map_err(|_| DipError::unit(format!("Malformed exponent in '{}'", term)))?,
            None => 1,
        };
        let base = if let Some(alias) = caps.name("alias") {
            self.alias(alias.as_str(), aliases, depth)?
        } else if let Some(symbol) = caps.name("symbol") {
            lookup(symbol.as_str())
                .ok_or_else(|| DipError::unit(format!("Unknown unit '{}'", symbol.as_str())))?
        } else {
            let number = caps.name("number").map_or("", |m| m.as_str());
            Quantity {
                factor: number
                    .parse()
                    .map_err(|_| DipError::unit(format!("Malformed number '{}'", number)))?,
                dimension: NONE,
            }
        };
        Ok(Quantity::ONE.times(base, exponent))
    }

    /// An alias is defined as `<number> <units>`; the units part may be empty.
    fn alias(&self, name: &str, aliases: &BTreeMap<String, String>, depth: usize) -> Result<Quantity> {
        let definition = aliases
            .get(name)
            .ok_or_else(|| DipError::unit(format!("Unit alias '[{}]' is not defined", name)))?;
        let definition = definition.trim();
        let (number, units) = definition
            .split_once(char::is_whitespace)
            .unwrap_or((definition, ""));
        let factor: f64 = number.parse().map_err(|_| {
            DipError::unit(format!(
                "Unit alias '{}' must start with a number: '{}'",
                name, definition
            ))
        })?;
        let quantity = self.parse(units, aliases, depth + 1)?;
        Ok(Quantity {
            factor: factor * quantity.factor,
            dimension: quantity.dimension,
        })
    }
}

fn lookup(symbol: &str) -> Option<Quantity> {
    let exact = |s: &str| UNITS.iter().find(|u| u.symbol == s);
    if let Some(u) = exact(symbol) {
        return Some(Quantity {
            factor: u.factor,
            dimension: u.dimension,
        });
    }
    PREFIXES.iter().find_map(|(prefix, exp)| {
        let u = exact(symbol.strip_prefix(prefix)?).filter(|u| u.prefixable)?;
        Some(Quantity {
            factor: u.factor * 10f64.powi(*exp),
            dimension: u.dimension,
        })
    })
}

impl UnitSystem for SiUnits {
    fn validate(&self, units: &str, aliases: &BTreeMap<String, String>) -> Result<()> {
        self.parse(units, aliases, 0).map(|_| ())
    }

    fn convert(
        &self,
        magnitude: f64,
        from: &str,
        to: &str,
        aliases: &BTreeMap<String, String>,
    ) -> Result<f64> {
        let source = self.parse(from, aliases, 0)?;
        let target = self.parse(to, aliases, 0)?;
        if source.dimension != target.dimension {
            return Err(DipError::unit(format!(
                "Cannot convert '{}' to '{}': incompatible dimensions",
                from, to
            )));
        }
        Ok(magnitude * source.factor / target.factor)
    }
}
