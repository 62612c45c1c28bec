//! Typed HTML form definitions.
//!
//! A [`Form`] describes flat fields. It turns [`Params`] into a [`FormData`]
//! in one of three ways: empty for a fresh page, raw for re-rendering stored
//! values, or parsed with a typed value or an error message per field.
//!
//! ```rust
//! use bee::{Field, FieldKind, Form, Params};
//!
//! let form = Form::new(vec![
//!     Field::new("name", "Name", FieldKind::Text).required(),
//!     Field::new("timeout", "Timeout", FieldKind::Duration),
//! ]);
//!
//! let params: Params = [("name", "walk"), ("timeout", "1h30m")].into_iter().collect();
//! let data = form.parse(&params);
//! assert!(data.is_valid());
//! assert_eq!(data.value("timeout").and_then(|v| v.as_duration()).map(|d| d.as_secs()), Some(5400));
//! ```

use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;

use crate::params::Params;

const REQUIRED: &str = "is required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    LongText,
    Password,
    Duration,
    Number,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub label: String,
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self { label: label.into(), name: name.into(), kind, required: false }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Form {
    pub fields: Vec<Field>,
}

impl Form {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Every field empty.
    pub fn blank(&self) -> FormData {
        self.load(&Params::new())
    }

    /// Copies each field's string value from `params` without interpreting it.
    pub fn load(&self, params: &Params) -> FormData {
        let fields = self.fields.iter()
            .map(|field| {
                let raw = params.get_str(&field.name).map(str::to_owned);
                let data = FieldData {
                    value: raw.clone().map(FieldValue::Text),
                    submitted: raw,
                    error: None,
                };
                (field.name.clone(), data)
            })
            .collect();
        FormData { fields, errors: Vec::new() }
    }

    /// Interprets each field according to its [`FieldKind`].
    ///
    /// Empty optional fields stay without a value. Missing or empty required
    /// fields get the error `is required`.
    pub fn parse(&self, params: &Params) -> FormData {
        let fields = self.fields.iter()
            .map(|field| (field.name.clone(), parse_field(field, params.get_str(&field.name))))
            .collect();
        FormData { fields, errors: Vec::new() }
    }
}

fn parse_field(field: &Field, submitted: Option<&str>) -> FieldData {
    let mut data = FieldData { submitted: submitted.map(str::to_owned), ..FieldData::default() };

    let raw = match submitted {
        Some(raw) if !raw.is_empty() => raw,
        _ => {
            if field.required {
                data.error = Some(REQUIRED.to_owned());
            }
            return data;
        }
    };

    match field.kind {
        FieldKind::Text | FieldKind::LongText | FieldKind::Password => {
            data.value = Some(FieldValue::Text(raw.to_owned()));
        }
        FieldKind::Duration => match parse_duration(raw) {
            Ok(d) => data.value = Some(FieldValue::Duration(d)),
            Err(e) => data.error = Some(e.to_string()),
        },
        FieldKind::Number => match raw.parse::<f64>() {
            Ok(n) => data.value = Some(FieldValue::Number(n)),
            Err(_) => data.error = Some(format!("invalid number {raw:?}")),
        },
    }
    data
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Duration(Duration),
    Number(f64),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// One field's state after loading or parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldData {
    /// The string exactly as submitted, for re-rendering the input.
    pub submitted: Option<String>,
    pub value: Option<FieldValue>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: IndexMap<String, FieldData>,
    errors: Vec<String>,
}

impl FormData {
    /// No field errors and no form-level errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.fields.values().all(|f| f.error.is_none())
    }

    pub fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldData> {
        self.fields.get_mut(name)
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.field(name)?.value.as_ref()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldData)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Records an error that belongs to no single field, such as a failed
    /// login.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("negative duration {0:?}")]
    Negative(String),
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parses a duration such as `300ms`, `1.5h` or `2h45m`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// needs no unit. Negative values are rejected since [`Duration`] is
/// unsigned.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_owned());

    let (negative, mut s) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = leading_digits(s);
        let (int_part, rest) = s.split_at(int_len);
        s = rest;

        let mut frac_part = "";
        if let Some(rest) = s.strip_prefix('.') {
            let frac_len = leading_digits(rest);
            frac_part = &rest[..frac_len];
            s = &rest[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = s.find(|c: char| c == '.' || c.is_ascii_digit()).unwrap_or(s.len());
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_owned()));
        }
        let (unit, rest) = s.split_at(unit_len);
        s = rest;

        let per_unit: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_owned(),
                    input: input.to_owned(),
                });
            }
        };

        let whole: u128 = if int_part.is_empty() { 0 } else { int_part.parse().map_err(|_| invalid())? };
        let mut nanos = whole.checked_mul(per_unit).ok_or_else(invalid)?;

        // Digits past the 18th cannot change the result at nanosecond precision.
        let (mut frac, mut scale) = (0u128, 1u128);
        for digit in frac_part.bytes().take(18) {
            frac = frac * 10 + u128::from(digit - b'0');
            scale *= 10;
        }
        nanos += frac * per_unit / scale;

        total = total.checked_add(nanos).ok_or_else(invalid)?;
        if total > i64::MAX as u128 {
            return Err(invalid());
        }
    }

    if negative && total != 0 {
        return Err(DurationError::Negative(input.to_owned()));
    }
    Ok(Duration::from_nanos(total as u64))
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}
