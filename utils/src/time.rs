//! Time formatting helpers.

/// Format a duration in seconds to a human-readable string.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Like [`format_duration`], for retry delays kept in milliseconds.
/// Sub-second delays print as `"<n>ms"`.
pub fn format_millis(millis: u64) -> String {
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format_duration(millis / 1000)
    }
}
