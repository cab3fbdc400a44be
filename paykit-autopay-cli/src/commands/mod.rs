//! CLI command implementations

pub mod evaluate;
pub mod history;
pub mod limits;
pub mod reservations;
pub mod rotation;
pub mod rules;
pub mod settings;

/// Format a UTC timestamp for display
pub fn format_time(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
