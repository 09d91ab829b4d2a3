//! Decoding of the `/v1/measurement/summary` record.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::{WavemeterError, WavemeterResult};

/// Decoded summary record.
///
/// Only `wavelength` and `power` are interpreted; every other field the
/// firmware sends is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryRecord {
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub wavelength: f64,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub power: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SummaryRecord {
    /// Normalize `payload` with [`normalize_literals`] and decode it.
    ///
    /// # Errors
    ///
    /// Returns [`WavemeterError::MalformedPayload`] if the normalized text is
    /// still not a record with numeric `wavelength` and `power`.
    pub fn parse(payload: &str) -> WavemeterResult<Self> {
        let normalized = normalize_literals(payload.trim());
        serde_json::from_str(&normalized).map_err(|e| {
            WavemeterError::MalformedPayload(format!("{e} in {:?}", payload.trim()))
        })
    }

    /// A boolean field from `extra`, if present.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.extra.get(name).and_then(Value::as_bool)
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(v) => Ok(v),
        NumberOrText::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
    }
}

/// Rewrite non-JSON literal spellings into JSON.
///
/// Outside of string literals, bare words equal (ignoring case) to `true`,
/// `false`, `null` or `none` become `true`, `false`, `null`, `null`.
/// Single-quoted strings are re-quoted with double quotes. Everything else,
/// including the contents of strings, is left untouched.
///
/// ```
/// use wavemeter::bristol::normalize_literals;
///
/// assert_eq!(
///     normalize_literals("{'locked': True, 'note': \"True\"}"),
///     "{\"locked\": true, \"note\": \"True\"}"
/// );
/// ```
pub fn normalize_literals(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                out.push('"');
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            // \' is not a JSON escape
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => out.push('\\'),
                        },
                        ch if ch == c => break,
                        '"' => out.push_str("\\\""),
                        ch => out.push(ch),
                    }
                }
                out.push('"');
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.to_ascii_lowercase().as_str() {
                    "true" => out.push_str("true"),
                    "false" => out.push_str("false"),
                    "null" | "none" => out.push_str("null"),
                    _ => out.push_str(&word),
                }
            }
            c => out.push(c),
        }
    }

    out
}
