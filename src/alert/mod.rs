/// Threshold evaluation and alert handling.
///
/// Submodules:
/// - `thresholds`: classifies readings and generates alerts.
/// - `messages`: per-parameter alert message templates.
/// - `acknowledgment`: the one-way acknowledged transition.

pub mod acknowledgment;
pub mod messages;
pub mod thresholds;

pub use acknowledgment::{AlertError, acknowledge, acknowledge_at};
pub use thresholds::{Classification, classify_parameter, classify_reading, generate_alerts};
