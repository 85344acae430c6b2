//! Row protocol constants.
//!
//! The canonical serialization that the row authentication code covers is a
//! protocol constant: the field order below is versioned and never inferred
//! from storage column order or from which optional fields happen to be
//! present. Writers and readers must agree on every item in this module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version of the canonical row serialization. Bound into every row
/// authentication code.
pub const PROTOCOL_VERSION: u32 = 1;

/// Separator between canonical field strings. Text fields containing it are
/// rejected at insert.
pub const DELIMITER: char = '|';

/// Two-decimal fields are scaled by this factor and rounded half-up to an
/// exact integer before encoding or authentication.
pub const SCALE: i64 = 100;

/// Identifier of each field covered by the row authentication code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldId {
    FirstName,
    LastName,
    Gender,
    Age,
    Weight,
    Height,
    HealthHistory,
}

/// Number of fields covered by the row authentication code.
pub const FIELD_COUNT: usize = 7;

/// Canonical field order for [`PROTOCOL_VERSION`] 1.
pub const ROW_FIELD_ORDER: [FieldId; FIELD_COUNT] = [
    FieldId::FirstName,
    FieldId::LastName,
    FieldId::Gender,
    FieldId::Age,
    FieldId::Weight,
    FieldId::Height,
    FieldId::HealthHistory,
];

impl FieldId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Gender => "gender",
            Self::Age => "age",
            Self::Weight => "weight",
            Self::Height => "height",
            Self::HealthHistory => "health_history",
        }
    }

    /// Fields that identify the patient. Removed from projections for roles
    /// without identity access.
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::FirstName | Self::LastName)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scale a float by [`SCALE`] and round half-up into the exact integer
/// domain shared by the codec and the authenticator.
///
/// Returns `None` for non-finite input or values outside the signed 32-bit
/// scaled domain.
pub fn scale(value: f64) -> Option<i32> {
    if !value.is_finite() {
        return None;
    }
    let scaled = (value * SCALE as f64 + 0.5).floor();
    if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return None;
    }
    Some(scaled as i32)
}

/// Like [`scale`], but clamps values beyond the scaled domain (including
/// infinities) to its edges. Used for query bounds, never for stored data.
/// Returns `None` only for NaN.
pub fn scale_saturating(value: f64) -> Option<i32> {
    if value.is_nan() {
        return None;
    }
    // Float-to-int `as` saturates at the i32 bounds.
    Some((value * SCALE as f64 + 0.5).floor() as i32)
}

/// Inverse of [`scale`].
pub fn unscale(scaled: i32) -> f64 {
    scaled as f64 / SCALE as f64
}

/// Render a scaled integer as `<int>.<two digits>` without going through
/// float formatting.
pub fn render_scaled(scaled: i32) -> String {
    let sign = if scaled < 0 { "-" } else { "" };
    let abs = (scaled as i64).unsigned_abs();
    let scale = SCALE as u64;
    format!("{sign}{}.{:02}", abs / scale, abs % scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_rounds_half_up() {
        assert_eq!(scale(68.5), Some(6850));
        assert_eq!(scale(0.125), Some(13));
        assert_eq!(scale(-0.125), Some(-12));
        assert_eq!(scale(0.29), Some(29));
    }

    #[test]
    fn test_scale_collapses_float_noise() {
        assert_eq!(scale(0.1 + 0.2), scale(0.3));
        assert_eq!(scale(72.349999999), Some(7235));
    }

    #[test]
    fn test_scale_rejects_out_of_domain() {
        assert_eq!(scale(f64::NAN), None);
        assert_eq!(scale(f64::INFINITY), None);
        assert_eq!(scale(1e12), None);
    }

    #[test]
    fn test_scale_saturating_clamps_bounds() {
        assert_eq!(scale_saturating(68.5), scale(68.5));
        assert_eq!(scale_saturating(-1e10), Some(i32::MIN));
        assert_eq!(scale_saturating(1e10), Some(i32::MAX));
        assert_eq!(scale_saturating(f64::NEG_INFINITY), Some(i32::MIN));
        assert_eq!(scale_saturating(f64::INFINITY), Some(i32::MAX));
        assert_eq!(scale_saturating(f64::NAN), None);
    }

    #[test]
    fn test_unscale_rescale_is_stable() {
        for n in [-12345, -1, 0, 1, 99, 6850, 18234, i32::MAX / 2] {
            assert_eq!(scale(unscale(n)), Some(n));
        }
    }

    #[test]
    fn test_render_scaled() {
        assert_eq!(render_scaled(6850), "68.50");
        assert_eq!(render_scaled(5), "0.05");
        assert_eq!(render_scaled(-5), "-0.05");
        assert_eq!(render_scaled(-1234), "-12.34");
        assert_eq!(render_scaled(0), "0.00");
    }

    #[test]
    fn test_field_order_is_fixed() {
        let names: Vec<_> = ROW_FIELD_ORDER.iter().map(FieldId::name).collect();
        assert_eq!(
            names,
            [
                "first_name",
                "last_name",
                "gender",
                "age",
                "weight",
                "height",
                "health_history"
            ]
        );
    }
}
