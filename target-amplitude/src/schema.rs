use std::collections::HashMap;

use jsonschema::paths::{LazyLocation, Location};
use jsonschema::{Draft, Keyword, ValidationError, Validator};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tracing::{debug, info, warn};

use crate::error::TargetError;

/// Significant decimal digits a `Decimal` holds.
const DECIMAL_DIGITS: u32 = 28;

/// The latest declared schema of a stream.
pub struct StreamSchema {
    pub schema: Value,
    pub key_properties: Vec<String>,
    /// Largest decimal precision any numeric property of the schema needs.
    pub decimal_precision: u32,
    validator: Validator,
}

/// Per-stream schemas. Each SCHEMA message replaces the stream's entry.
#[derive(Default)]
pub struct SchemaRegistry {
    streams: HashMap<String, StreamSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        stream: &str,
        schema: Value,
        key_properties: Vec<String>,
    ) -> Result<(), TargetError> {
        let decimal_precision = decimal_precision(&schema);

        let validator = jsonschema::options()
            .with_draft(Draft::Draft4)
            .with_keyword("multipleOf", decimal_multiple_of)
            .build(&schema)
            .map_err(|e| TargetError::InvalidSchema {
                stream: stream.to_owned(),
                message: e.to_string(),
            })?;

        if decimal_precision > DECIMAL_DIGITS {
            warn!(
                stream,
                decimal_precision, "schema needs more decimal digits than can be checked exactly"
            );
        } else if decimal_precision > 0 {
            info!(stream, decimal_precision, "registered schema");
        } else {
            debug!(stream, "registered schema");
        }

        self.streams.insert(
            stream.to_owned(),
            StreamSchema {
                schema,
                key_properties,
                decimal_precision,
                validator,
            },
        );

        Ok(())
    }

    /// The entry of `stream`, or `UnknownStream` if no schema was declared for it.
    pub fn require(&self, stream: &str) -> Result<&StreamSchema, TargetError> {
        self.streams
            .get(stream)
            .ok_or_else(|| TargetError::UnknownStream(stream.to_owned()))
    }

    pub fn validate(&self, stream: &str, record: &Map<String, Value>) -> Result<(), TargetError> {
        let entry = self.require(stream)?;

        let instance = Value::Object(record.clone());
        let errors: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TargetError::SchemaViolation {
                stream: stream.to_owned(),
                errors,
            })
        }
    }

    pub fn key_properties(&self, stream: &str) -> Option<&[String]> {
        self.streams
            .get(stream)
            .map(|entry| entry.key_properties.as_slice())
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.streams.contains_key(stream)
    }
}

/// Walks `schema` and returns the largest decimal precision its numeric nodes
/// need, as integer digits of the widest bound plus the scale of `multipleOf`.
pub fn decimal_precision(schema: &Value) -> u32 {
    match schema {
        Value::Object(node) => node
            .values()
            .map(decimal_precision)
            .fold(numeric_precision(node).unwrap_or(0), u32::max),
        Value::Array(items) => items.iter().map(decimal_precision).max().unwrap_or(0),
        _ => 0,
    }
}

fn numeric_precision(node: &Map<String, Value>) -> Option<u32> {
    let is_number = match node.get("type")? {
        Value::String(t) => t == "number",
        Value::Array(types) => types.iter().any(|t| t == "number"),
        _ => false,
    };
    if !is_number {
        return None;
    }

    let multiple_of = node.get("multipleOf").and_then(Value::as_number);
    let bounds = ["minimum", "maximum"]
        .iter()
        .filter_map(|key| node.get(*key).and_then(Value::as_f64))
        .map(f64::abs)
        .reduce(f64::max);

    if multiple_of.is_none() && bounds.is_none() {
        return None;
    }

    let scale = multiple_of.map(decimal_scale).unwrap_or(0);
    let digits = bounds.map(integer_digits).unwrap_or(0);

    Some(digits + scale)
}

/// Digits after the decimal point, from the literal form of the number.
fn decimal_scale(n: &Number) -> u32 {
    let literal = n.to_string();
    let (mantissa, exponent) = match literal.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i64>().unwrap_or(0)),
        None => (literal.as_str(), 0),
    };
    let fraction = mantissa
        .split_once('.')
        .map(|(_, f)| f.trim_end_matches('0').len())
        .unwrap_or(0);

    u32::try_from((fraction as i64 - exponent).max(0)).unwrap_or(u32::MAX)
}

fn integer_digits(bound: f64) -> u32 {
    if !bound.is_finite() {
        return 0;
    }
    let integral = format!("{:.0}", bound.trunc());
    u32::try_from(integral.len()).unwrap_or(u32::MAX)
}

/// Parses a JSON number literal without going through a double.
///
/// `None` if the literal has more digits than a `Decimal` holds.
fn exact_decimal(literal: &str) -> Option<Decimal> {
    let (mantissa, exponent) = match literal.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().ok()?),
        None => (literal, 0),
    };

    let mut value = Decimal::from_str_exact(mantissa).ok()?;
    if exponent < 0 {
        let scale = value.scale().checked_add(exponent.unsigned_abs())?;
        value.set_scale(scale).ok()?;
    } else {
        for _ in 0..exponent {
            value = value.checked_mul(Decimal::TEN)?;
        }
    }

    Some(value)
}

/// `multipleOf` evaluated on the decimal literals of the schema and the
/// instance, so `0.07` is a multiple of `0.01`.
struct DecimalMultipleOf {
    divisor: Decimal,
    literal: String,
    location: Location,
}

impl DecimalMultipleOf {
    fn check(&self, n: &Number) -> Option<bool> {
        let remainder = exact_decimal(&n.to_string())?.checked_rem(self.divisor)?;
        Some(remainder.is_zero())
    }
}

impl Keyword for DecimalMultipleOf {
    fn validate<'i>(
        &self,
        instance: &'i Value,
        location: &LazyLocation,
    ) -> Result<(), ValidationError<'i>> {
        let Value::Number(n) = instance else {
            return Ok(());
        };

        let message = match self.check(n) {
            Some(true) => return Ok(()),
            Some(false) => format!("{instance} is not a multiple of {}", self.literal),
            None => format!(
                "{instance} cannot be checked exactly against multipleOf {}",
                self.literal
            ),
        };

        Err(ValidationError::custom(
            self.location.clone(),
            location.into(),
            instance,
            message,
        ))
    }

    fn is_valid(&self, instance: &Value) -> bool {
        match instance {
            Value::Number(n) => self.check(n).unwrap_or(false),
            _ => true,
        }
    }
}

fn decimal_multiple_of<'a>(
    _: &'a Map<String, Value>,
    schema: &'a Value,
    path: Location,
) -> Result<Box<dyn Keyword>, ValidationError<'a>> {
    let divisor = schema
        .as_number()
        .and_then(|n| exact_decimal(&n.to_string()))
        .filter(|d| d.is_sign_positive() && !d.is_zero());

    match divisor {
        Some(divisor) => Ok(Box::new(DecimalMultipleOf {
            divisor,
            literal: schema.to_string(),
            location: path,
        })),
        None => Err(ValidationError::custom(
            path,
            Location::new(),
            schema,
            format!("multipleOf {schema} is not a positive decimal"),
        )),
    }
}
