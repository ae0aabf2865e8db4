//! Human-readable alert messages.
//!
//! The five monitored field parameters have fixed templates; anything else
//! falls back to a generic template built from the parameter catalog.

use crate::model::{
    PARAM_CONDUCTIVITY, PARAM_DISSOLVED_OXYGEN, PARAM_PH, PARAM_TEMPERATURE, PARAM_TURBIDITY,
    Threshold, find_parameter,
};

/// Decimal places for values of parameters missing from the catalog.
const FALLBACK_PRECISION: usize = 2;

/// Builds the alert message for `parameter` observed at `value`.
pub fn alert_message(parameter: &str, value: f64, threshold: &Threshold) -> String {
    match parameter {
        PARAM_PH => format!(
            "pH level {:.1} is outside acceptable range{}",
            value,
            range_suffix(threshold, "")
        ),
        PARAM_TEMPERATURE => format!(
            "Temperature {:.1}°C is outside acceptable range{}",
            value,
            range_suffix(threshold, "°C")
        ),
        PARAM_DISSOLVED_OXYGEN => {
            directional_message("Dissolved oxygen", &format!("{:.1}", value), "mg/L", value, threshold)
        }
        PARAM_CONDUCTIVITY => {
            directional_message("Conductivity", &format!("{:.0}", value), "μS/cm", value, threshold)
        }
        PARAM_TURBIDITY => {
            directional_message("Turbidity", &format!("{:.1}", value), "NTU", value, threshold)
        }
        other => generic_message(other, value, threshold),
    }
}

/// `"Turbidity 7.2 NTU exceeds maximum (5 NTU)"` style message, naming the
/// side of the range that was crossed.
fn directional_message(
    label: &str,
    value_text: &str,
    unit: &str,
    value: f64,
    threshold: &Threshold,
) -> String {
    match (threshold.min, threshold.max) {
        (Some(min), _) if value < min => {
            format!("{label} {value_text} {unit} is below minimum ({min} {unit})")
        }
        (_, Some(max)) if value > max => {
            format!("{label} {value_text} {unit} exceeds maximum ({max} {unit})")
        }
        _ => format!(
            "{label} {value_text} {unit} is outside acceptable range{}",
            range_suffix(threshold, &format!(" {unit}"))
        ),
    }
}

fn generic_message(parameter: &str, value: f64, threshold: &Threshold) -> String {
    let (label, unit, precision) = match find_parameter(parameter) {
        Some(p) => (p.label, p.unit, p.precision),
        None => (parameter, "", FALLBACK_PRECISION),
    };
    let unit_part = if unit.is_empty() { String::new() } else { format!(" {unit}") };
    format!(
        "{label} {value:.precision$}{unit_part} is outside acceptable range{}",
        range_suffix(threshold, &unit_part)
    )
}

/// `" (6.5-8.5)"`, `" (min: 5)"` or `" (max: 800)"`, with `unit` appended
/// inside the parentheses. Empty when neither bound is configured.
fn range_suffix(threshold: &Threshold, unit: &str) -> String {
    match (threshold.min, threshold.max) {
        (Some(min), Some(max)) => format!(" ({min}-{max}{unit})"),
        (Some(min), None) => format!(" (min: {min}{unit})"),
        (None, Some(max)) => format!(" (max: {max}{unit})"),
        (None, None) => String::new(),
    }
}
