/// Formats a millisecond duration as `HH:MM:SS`. Negative values render as zero.
pub fn format_hms(ms: i64) -> String {
    if ms <= 0 {
        return "00:00:00".to_string();
    }

    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Whole minutes in `ms`, rounded down.
pub fn whole_minutes(ms: i64) -> i64 {
    ms.max(0) / 60_000
}
