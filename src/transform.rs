//! Value transform pipeline.
//!
//! Raw payload values are untrusted and heterogeneous: numbers,
//! enumerations, JSON blobs. Each stage here is best-effort normalization,
//! never validation — a stage that cannot apply leaves the value exactly as
//! it found it. Stage order is fixed: structured extraction, decimal-sign
//! normalization, scaling, rounding.

use serde_json::Value as Json;
use tracing::trace;

/// Per-subscription value transform configuration, resolved once at
/// construction time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTransform {
    /// Optional RFC 6901 pointer into a JSON-encoded payload.
    pub jsonpointer: Option<String>,
    /// Optional decimal sign to normalize to `.` before numeric parsing.
    pub decimal_sign: Option<String>,
    /// Optional multiplicative scale factor.
    pub multiply: Option<f64>,
    /// Optional divisive scale factor.
    pub divide: Option<f64>,
    /// Optional fixed decimal places for the final numeric value.
    pub decimals: Option<u32>,
}

impl ValueTransform {
    /// Returns true when every stage is unconfigured.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.jsonpointer.is_none()
            && self.decimal_sign.is_none()
            && self.multiply.is_none()
            && self.divide.is_none()
            && self.decimals.is_none()
    }

    /// Runs the full pipeline over a raw payload value.
    #[must_use]
    pub fn apply(&self, raw: &str) -> String {
        let value = self.extract(raw);
        let value = self.normalize_decimal_sign(value);
        let value = self.scale(value);
        self.round(value)
    }

    /// Structured extraction: resolve the JSON pointer, falling back to the
    /// raw string when the payload is not JSON or the path is absent.
    fn extract(&self, raw: &str) -> String {
        let Some(pointer) = self.jsonpointer.as_deref() else {
            return raw.to_string();
        };

        let Ok(parsed) = serde_json::from_str::<Json>(raw) else {
            trace!(pointer, "payload is not JSON, extraction skipped");
            return raw.to_string();
        };

        match parsed.pointer(pointer) {
            // A string leaf contributes its content, not its quoted form.
            Some(Json::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                trace!(pointer, "pointer path absent, extraction skipped");
                raw.to_string()
            }
        }
    }

    /// Replace the first occurrence of the configured decimal sign with `.`.
    fn normalize_decimal_sign(&self, value: String) -> String {
        match self.decimal_sign.as_deref() {
            Some(sign) if !sign.is_empty() => value.replacen(sign, ".", 1),
            _ => value,
        }
    }

    /// Apply `(value * multiply) / divide` when the value is numeric.
    ///
    /// Non-numeric input and NaN results leave the value unchanged;
    /// scaling is best-effort, never destructive.
    fn scale(&self, value: String) -> String {
        if self.multiply.is_none() && self.divide.is_none() {
            return value;
        }

        let Ok(numeric) = value.trim().parse::<f64>() else {
            return value;
        };

        let scaled = (numeric * self.multiply.unwrap_or(1.0)) / self.divide.unwrap_or(1.0);
        if scaled.is_nan() {
            value
        } else {
            format_numeric(scaled)
        }
    }

    /// Fix the value to the configured number of decimal places.
    fn round(&self, value: String) -> String {
        let Some(decimals) = self.decimals else {
            return value;
        };

        let Ok(numeric) = value.trim().parse::<f64>() else {
            return value;
        };

        format!("{numeric:.prec$}", prec = decimals as usize)
    }
}

/// Renders an f64 without a trailing `.0` for whole numbers.
fn format_numeric(value: f64) -> String {
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> ValueTransform {
        ValueTransform::default()
    }

    #[test]
    fn identity_transform_passes_values_through() {
        let t = transform();
        assert!(t.is_identity());
        assert_eq!(t.apply("21.5"), "21.5");
        assert_eq!(t.apply("ON"), "ON");
    }

    #[test]
    fn jsonpointer_extracts_nested_values() {
        let t = ValueTransform {
            jsonpointer: Some("/sensor/temp".to_string()),
            ..transform()
        };
        assert_eq!(t.apply(r#"{"sensor":{"temp":21.5}}"#), "21.5");
    }

    #[test]
    fn jsonpointer_extracts_string_leaves_unquoted() {
        let t = ValueTransform {
            jsonpointer: Some("/state".to_string()),
            ..transform()
        };
        assert_eq!(t.apply(r#"{"state":"ON"}"#), "ON");
    }

    #[test]
    fn jsonpointer_falls_back_on_invalid_json() {
        let t = ValueTransform {
            jsonpointer: Some("/sensor/temp".to_string()),
            ..transform()
        };
        assert_eq!(t.apply("not json"), "not json");
    }

    #[test]
    fn jsonpointer_falls_back_on_missing_path() {
        let t = ValueTransform {
            jsonpointer: Some("/missing".to_string()),
            ..transform()
        };
        assert_eq!(t.apply(r#"{"sensor":1}"#), r#"{"sensor":1}"#);
    }

    #[test]
    fn decimal_sign_normalizes_first_occurrence() {
        let t = ValueTransform {
            decimal_sign: Some(",".to_string()),
            ..transform()
        };
        assert_eq!(t.apply("21,5"), "21.5");
        // Only the first occurrence is replaced.
        assert_eq!(t.apply("1,2,3"), "1.2,3");
    }

    #[test]
    fn scaling_multiplies_then_divides() {
        let t = ValueTransform {
            multiply: Some(2.0),
            divide: Some(4.0),
            ..transform()
        };
        assert_eq!(t.apply("10"), "5");
    }

    #[test]
    fn scaling_defaults_absent_factors_to_one() {
        let t = ValueTransform {
            multiply: Some(1000.0),
            ..transform()
        };
        assert_eq!(t.apply("1.5"), "1500");

        let t = ValueTransform {
            divide: Some(10.0),
            ..transform()
        };
        assert_eq!(t.apply("215"), "21.5");
    }

    #[test]
    fn scaling_leaves_non_numeric_values_unchanged() {
        let t = ValueTransform {
            multiply: Some(2.0),
            ..transform()
        };
        assert_eq!(t.apply("ON"), "ON");
        assert_eq!(t.apply(""), "");
    }

    #[test]
    fn rounding_fixes_decimal_places() {
        let t = ValueTransform {
            decimals: Some(2),
            ..transform()
        };
        assert_eq!(t.apply("3.14159"), "3.14");
        assert_eq!(t.apply("5"), "5.00");
    }

    #[test]
    fn rounding_skips_non_numeric_values() {
        let t = ValueTransform {
            decimals: Some(2),
            ..transform()
        };
        assert_eq!(t.apply("OFF"), "OFF");
    }

    #[test]
    fn stages_run_in_fixed_order() {
        // Extract "21,5", normalize to 21.5, scale by 10, round to one place.
        let t = ValueTransform {
            jsonpointer: Some("/temp".to_string()),
            decimal_sign: Some(",".to_string()),
            multiply: Some(10.0),
            decimals: Some(1),
            ..transform()
        };
        assert_eq!(t.apply(r#"{"temp":"21,5"}"#), "215.0");
    }

    #[test]
    fn scaling_is_idempotent_over_repeated_application_of_the_same_raw() {
        let t = ValueTransform {
            multiply: Some(2.0),
            divide: Some(4.0),
            decimals: Some(1),
            ..transform()
        };
        let first = t.apply("10");
        let second = t.apply("10");
        assert_eq!(first, second);
    }
}
