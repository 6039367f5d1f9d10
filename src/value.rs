use std::cmp::Ordering;
use std::fmt;

use crate::error::{DipError, Result};

/// Significant digits used when a float is rendered without an explicit precision.
pub const DEFAULT_PRECISION: usize = 6;

// ── Data types ──────────────────────────────────────────────────────

/// Concrete data type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Str,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Extended precision is declared but stored as `f64`.
    Float128,
}

impl DType {
    /// Resolve `int`/`uint` with an optional width suffix.
    pub fn integer(width: Option<&str>, unsigned: bool) -> Result<DType> {
        let dtype = match (width.unwrap_or("32"), unsigned) {
            ("16", false) => DType::Int16,
            ("32", false) => DType::Int32,
            ("64", false) => DType::Int64,
            ("16", true) => DType::UInt16,
            ("32", true) => DType::UInt32,
            ("64", true) => DType::UInt64,
            (other, _) => {
                return Err(DipError::type_error(format!(
                    "Unsupported integer width: {}",
                    other
                )))
            }
        };
        Ok(dtype)
    }

    /// Resolve `float` with an optional precision suffix.
    pub fn float(width: Option<&str>) -> Result<DType> {
        match width.unwrap_or("64") {
            "32" => Ok(DType::Float32),
            "64" => Ok(DType::Float64),
            "128" => Ok(DType::Float128),
            other => Err(DipError::type_error(format!(
                "Unsupported float precision: {}",
                other
            ))),
        }
    }

    /// Short identifier used in messages and rendered output.
    pub fn id(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Str => "str",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Float128 => "float128",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::UInt16
                | DType::UInt32
                | DType::UInt64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64 | DType::Float128)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ── Ranges ──────────────────────────────────────────────────────────

/// An inclusive `(min, max)` pair; `max = None` leaves the range open.
///
/// Used both for declared array dimensions (`[2,1:3,:]`) and for slices of
/// referenced values (`{?a}[1,0:2]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: usize,
    pub max: Option<usize>,
}

impl Range {
    pub fn fixed(n: usize) -> Self {
        Range {
            min: n,
            max: Some(n),
        }
    }

    pub fn bounded(min: usize, max: usize) -> Self {
        Range {
            min,
            max: Some(max),
        }
    }

    pub fn open(min: usize) -> Self {
        Range { min, max: None }
    }

    pub fn is_open(&self) -> bool {
        self.max.is_none()
    }

    /// Whether an axis of length `n` satisfies this dimension.
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{}:{}", self.min, max),
            None if self.min == 0 => write!(f, ":"),
            None => write!(f, "{}:", self.min),
        }
    }
}

// ── Scalars ─────────────────────────────────────────────────────────

/// A single element of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Str(String),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Float128(f64),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::Str(_) => DType::Str,
            Scalar::Int16(_) => DType::Int16,
            Scalar::Int32(_) => DType::Int32,
            Scalar::Int64(_) => DType::Int64,
            Scalar::UInt16(_) => DType::UInt16,
            Scalar::UInt32(_) => DType::UInt32,
            Scalar::UInt64(_) => DType::UInt64,
            Scalar::Float32(_) => DType::Float32,
            Scalar::Float64(_) => DType::Float64,
            Scalar::Float128(_) => DType::Float128,
        }
    }

    /// Cast a raw literal into the given data type.
    pub fn parse(dtype: DType, raw: &str) -> Result<Scalar> {
        let text = raw.trim();
        let cast_error =
            || DipError::type_error(format!("Value '{}' cannot be cast to {}", raw, dtype));
        let scalar = match dtype {
            DType::Bool => match text {
                "true" | "True" => Scalar::Bool(true),
                "false" | "False" => Scalar::Bool(false),
                _ => return Err(cast_error()),
            },
            DType::Str => Scalar::Str(raw.to_string()),
            DType::Int16 => Scalar::Int16(parse_int(text).map_err(|_| cast_error())?),
            DType::Int32 => Scalar::Int32(parse_int(text).map_err(|_| cast_error())?),
            DType::Int64 => Scalar::Int64(parse_int(text).map_err(|_| cast_error())?),
            DType::UInt16 => Scalar::UInt16(parse_int(text).map_err(|_| cast_error())?),
            DType::UInt32 => Scalar::UInt32(parse_int(text).map_err(|_| cast_error())?),
            DType::UInt64 => Scalar::UInt64(parse_int(text).map_err(|_| cast_error())?),
            DType::Float32 => Scalar::Float32(text.parse().map_err(|_| cast_error())?),
            DType::Float64 => Scalar::Float64(text.parse().map_err(|_| cast_error())?),
            DType::Float128 => Scalar::Float128(text.parse().map_err(|_| cast_error())?),
        };
        Ok(scalar)
    }

    /// Numeric magnitude, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::Int16(v) => Some(v as f64),
            Scalar::Int32(v) => Some(v as f64),
            Scalar::Int64(v) => Some(v as f64),
            Scalar::UInt16(v) => Some(v as f64),
            Scalar::UInt32(v) => Some(v as f64),
            Scalar::UInt64(v) => Some(v as f64),
            Scalar::Float32(v) => Some(v as f64),
            Scalar::Float64(v) | Scalar::Float128(v) => Some(v),
            Scalar::Bool(_) | Scalar::Str(_) => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match *self {
            Scalar::Int16(v) => Some(v as i128),
            Scalar::Int32(v) => Some(v as i128),
            Scalar::Int64(v) => Some(v as i128),
            Scalar::UInt16(v) => Some(v as i128),
            Scalar::UInt32(v) => Some(v as i128),
            Scalar::UInt64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// Build a numeric scalar of the given type from a float magnitude.
    /// Integer targets only accept integral magnitudes within range.
    pub fn from_f64(dtype: DType, magnitude: f64) -> Result<Scalar> {
        if dtype.is_integer() {
            if !magnitude.is_finite() || magnitude.fract() != 0.0 {
                return Err(DipError::type_error(format!(
                    "Value {} cannot be represented as {}",
                    magnitude, dtype
                )));
            }
            return Scalar::from_i128(dtype, magnitude as i128);
        }
        match dtype {
            DType::Float32 => Ok(Scalar::Float32(magnitude as f32)),
            DType::Float64 => Ok(Scalar::Float64(magnitude)),
            DType::Float128 => Ok(Scalar::Float128(magnitude)),
            _ => Err(DipError::type_error(format!(
                "Cannot build a {} value from a number",
                dtype
            ))),
        }
    }

    fn from_i128(dtype: DType, v: i128) -> Result<Scalar> {
        let range_error =
            || DipError::type_error(format!("Value {} is out of range for {}", v, dtype));
        let scalar = match dtype {
            DType::Int16 => Scalar::Int16(i16::try_from(v).map_err(|_| range_error())?),
            DType::Int32 => Scalar::Int32(i32::try_from(v).map_err(|_| range_error())?),
            DType::Int64 => Scalar::Int64(i64::try_from(v).map_err(|_| range_error())?),
            DType::UInt16 => Scalar::UInt16(u16::try_from(v).map_err(|_| range_error())?),
            DType::UInt32 => Scalar::UInt32(u32::try_from(v).map_err(|_| range_error())?),
            DType::UInt64 => Scalar::UInt64(u64::try_from(v).map_err(|_| range_error())?),
            _ => return Scalar::from_f64(dtype, v as f64),
        };
        Ok(scalar)
    }

    /// Order two scalars of the same data type.
    pub fn compare(&self, other: &Scalar) -> Result<Ordering> {
        if self.dtype() != other.dtype() {
            return Err(mismatch(self.dtype(), other.dtype()));
        }
        let ordering = match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_i128(), b.as_i128()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
            },
        };
        ordering.ok_or_else(|| {
            DipError::type_error(format!(
                "Values '{}' and '{}' cannot be ordered",
                self.render(DEFAULT_PRECISION, false),
                other.render(DEFAULT_PRECISION, false)
            ))
        })
    }

    /// Render the scalar. Strings are single-quoted when `nested` in an array.
    pub fn render(&self, precision: usize, nested: bool) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Str(s) if nested => format!("'{}'", s),
            Scalar::Str(s) => s.clone(),
            Scalar::Int16(v) => v.to_string(),
            Scalar::Int32(v) => v.to_string(),
            Scalar::Int64(v) => v.to_string(),
            Scalar::UInt16(v) => v.to_string(),
            Scalar::UInt32(v) => v.to_string(),
            Scalar::UInt64(v) => v.to_string(),
            Scalar::Float32(v) => format_float(*v as f64, precision),
            Scalar::Float64(v) | Scalar::Float128(v) => format_float(*v, precision),
        }
    }
}

fn parse_int<T: std::str::FromStr>(text: &str) -> std::result::Result<T, T::Err> {
    text.strip_prefix('+').unwrap_or(text).parse()
}

fn mismatch(a: DType, b: DType) -> DipError {
    DipError::type_error(format!(
        "Values of different types cannot be compared: {} and {}",
        a, b
    ))
}

/// Fixed notation for exponents in `-3..=3`, scientific otherwise.
fn format_float(x: f64, precision: usize) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return "0.0".to_string();
    }
    let precision = precision.max(1);
    let exponent = x.abs().log10().floor() as i32;
    if (-3..=3).contains(&exponent) {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, x))
    } else {
        let text = format!("{:.*e}", precision - 1, x);
        match text.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or(exponent);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
            }
            None => text,
        }
    }
}

fn trim_fraction(text: &str) -> String {
    if !text.contains('.') {
        return format!("{}.0", text);
    }
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}

// ── Arrays ──────────────────────────────────────────────────────────

/// A row-major N-dimensional array of scalars of one data type.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    dtype: DType,
    shape: Vec<usize>,
    items: Vec<Scalar>,
}

impl Array {
    /// Build an array, checking that the element count matches the shape
    /// and that every element has the array's data type.
    pub fn new(dtype: DType, shape: Vec<usize>, items: Vec<Scalar>) -> Result<Array> {
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != items.len() {
            return Err(DipError::constraint(format!(
                "Array shape {:?} does not match its {} element(s)",
                shape,
                items.len()
            )));
        }
        if let Some(bad) = items.iter().find(|s| s.dtype() != dtype) {
            return Err(DipError::type_error(format!(
                "Array of {} cannot hold a {} element",
                dtype,
                bad.dtype()
            )));
        }
        Ok(Array {
            dtype,
            shape,
            items,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn items(&self) -> &[Scalar] {
        &self.items
    }

    fn render_axis(&self, items: &[Scalar], shape: &[usize], precision: usize) -> String {
        let mut parts = Vec::with_capacity(shape[0]);
        if shape.len() == 1 {
            for item in items {
                parts.push(item.render(precision, true));
            }
        } else {
            let chunk: usize = shape[1..].iter().product();
            for i in 0..shape[0] {
                let sub = &items[i * chunk..(i + 1) * chunk];
                parts.push(self.render_axis(sub, &shape[1..], precision));
            }
        }
        format!("[{}]", parts.join(", "))
    }
}

// ── Values ──────────────────────────────────────────────────────────

/// A node value: one scalar or an N-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(Array),
}

impl Value {
    pub fn parse_scalar(dtype: DType, raw: &str) -> Result<Value> {
        Scalar::parse(dtype, raw).map(Value::Scalar)
    }

    /// Cast a row-major list of raw literals into an array of the given shape.
    pub fn parse_array(dtype: DType, raw: &[String], shape: &[usize]) -> Result<Value> {
        let items = raw
            .iter()
            .map(|r| Scalar::parse(dtype, r))
            .collect::<Result<Vec<_>>>()?;
        Array::new(dtype, shape.to_vec(), items).map(Value::Array)
    }

    pub fn dtype(&self) -> DType {
        match self {
            Value::Scalar(s) => s.dtype(),
            Value::Array(a) => a.dtype,
        }
    }

    /// Shape of the value; a scalar has shape `[1]`.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Scalar(_) => vec![1],
            Value::Array(a) => a.shape.clone(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Array(_) => None,
        }
    }

    /// All elements in row-major order.
    pub fn elements(&self) -> Vec<&Scalar> {
        match self {
            Value::Scalar(s) => vec![s],
            Value::Array(a) => a.items.iter().collect(),
        }
    }

    pub fn to_string_with(&self, precision: Option<usize>) -> String {
        let precision = precision.unwrap_or(DEFAULT_PRECISION);
        match self {
            Value::Scalar(s) => s.render(precision, false),
            Value::Array(a) => a.render_axis(&a.items, &a.shape, precision),
        }
    }

    /// Value equality. Both sides must share one data type.
    pub fn equals(&self, other: &Value) -> Result<bool> {
        if self.dtype() != other.dtype() {
            return Err(mismatch(self.dtype(), other.dtype()));
        }
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(a.compare(b)? == Ordering::Equal),
            (Value::Array(a), Value::Array(b)) => {
                if a.shape != b.shape {
                    return Ok(false);
                }
                for (x, y) in a.items.iter().zip(&b.items) {
                    if x.compare(y)? != Ordering::Equal {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Strict ordering between two scalar values of one data type.
    pub fn less_than(&self, other: &Value) -> Result<bool> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(a.compare(b)? == Ordering::Less),
            _ => Err(DipError::type_error(
                "Ordering is only defined between scalar values",
            )),
        }
    }

    /// Apply `f` to every numeric magnitude, keeping the data type.
    pub fn map_magnitude(&self, f: impl Fn(f64) -> Result<f64>) -> Result<Value> {
        let dtype = self.dtype();
        if !dtype.is_numeric() {
            return Err(DipError::unit(format!(
                "Values of type {} carry no magnitude",
                dtype
            )));
        }
        let convert = |s: &Scalar| -> Result<Scalar> {
            let magnitude = s.as_f64().unwrap_or_default();
            Scalar::from_f64(dtype, f(magnitude)?)
        };
        match self {
            Value::Scalar(s) => convert(s).map(Value::Scalar),
            Value::Array(a) => {
                let items = a.items.iter().map(convert).collect::<Result<Vec<_>>>()?;
                Array::new(dtype, a.shape.clone(), items).map(Value::Array)
            }
        }
    }

    /// Check an array against declared dimensions.
    pub fn check_dimension(&self, dimension: &[Range]) -> Result<()> {
        let shape = match self {
            Value::Scalar(_) => {
                return Err(DipError::type_error(
                    "Assigning a scalar value to an array node",
                ))
            }
            Value::Array(a) => &a.shape,
        };
        let fits = shape.len() == dimension.len()
            && shape.iter().zip(dimension).all(|(n, r)| r.accepts(*n));
        if fits {
            Ok(())
        } else {
            let dims: Vec<String> = dimension.iter().map(|r| r.to_string()).collect();
            Err(DipError::constraint(format!(
                "Array shape {:?} does not match the declared dimension [{}]",
                shape,
                dims.join(",")
            )))
        }
    }

    /// Project an array onto inclusive per-axis ranges. Axes reduced to a
    /// single element are dropped; if every axis is, the result is a scalar.
    pub fn slice(&self, ranges: &[Range]) -> Result<Value> {
        let array = match self {
            Value::Scalar(_) => return Err(DipError::type_error("Scalar values cannot be sliced")),
            Value::Array(a) => a,
        };
        if ranges.len() > array.shape.len() {
            return Err(DipError::reference(format!(
                "Slice has {} axes but the value has only {}",
                ranges.len(),
                array.shape.len()
            )));
        }

        let mut bounds = Vec::with_capacity(array.shape.len());
        let mut empty = false;
        for (axis, len) in array.shape.iter().enumerate() {
            let range = ranges.get(axis).copied().unwrap_or(Range::open(0));
            if *len == 0 && range.is_open() && range.min == 0 {
                empty = true;
                bounds.push((0, 0));
                continue;
            }
            let end = match range.max {
                Some(max) => max,
                None => len.saturating_sub(1),
            };
            if range.min > end || end >= *len {
                return Err(DipError::reference(format!(
                    "Slice {} is out of bounds for axis {} of length {}",
                    range, axis, len
                )));
            }
            bounds.push((range.min, end));
        }
        if empty {
            // An open range over an empty axis selects nothing.
            let shape: Vec<usize> = array
                .shape
                .iter()
                .zip(&bounds)
                .map(|(len, (lo, hi))| if *len == 0 { 0 } else { hi - lo + 1 })
                .filter(|n| *n != 1)
                .collect();
            return Array::new(array.dtype, shape, Vec::new()).map(Value::Array);
        }

        // Odometer walk over the selected index space.
        let mut items = Vec::new();
        let mut index: Vec<usize> = bounds.iter().map(|b| b.0).collect();
        loop {
            let mut flat = 0;
            for (axis, i) in index.iter().enumerate() {
                flat = flat * array.shape[axis] + i;
            }
            items.push(array.items[flat].clone());

            let mut axis = index.len();
            loop {
                if axis == 0 {
                    let shape: Vec<usize> = bounds
                        .iter()
                        .map(|(lo, hi)| hi - lo + 1)
                        .filter(|n| *n != 1)
                        .collect();
                    if shape.is_empty() {
                        return Ok(Value::Scalar(items.swap_remove(0)));
                    }
                    return Array::new(array.dtype, shape, items).map(Value::Array);
                }
                axis -= 1;
                if index[axis] < bounds[axis].1 {
                    index[axis] += 1;
                    break;
                }
                index[axis] = bounds[axis].0;
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(None))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::Str(s.to_string()))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(Scalar::Int32(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float64(v))
    }
}
