//! Water-quality threshold monitoring for mining sites.
//!
//! Field agents submit readings; each reading is classified against its
//! site's thresholds and every out-of-range parameter raises an alert that
//! supervisors acknowledge.

pub mod access;
pub mod alert;
pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod sites;
pub mod store;
