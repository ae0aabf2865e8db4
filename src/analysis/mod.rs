/// Read-only views over stored readings and alerts.
///
/// Everything here works on slices already fetched from the store, so the
/// same summaries serve every backend.
///
/// Submodules:
/// - `summary`: dashboard counts, per-parameter time series and their statistics.

pub mod summary;

pub use summary::{
    DashboardSummary, SeriesPoint, SeriesStatistics, SiteSummary, StatusCounts, dashboard_summary,
    parameter_series, parameter_statistics,
};
