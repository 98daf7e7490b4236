//! Human readable durations for summaries and log lines.

use std::time::Duration;

/// Minutes and seconds, rounded to the nearest second.
///
/// `"3 seconds"`, `"2 minutes 03 seconds"`
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let mut total_seconds = millis / 1000;
    if millis % 1000 >= 500 {
        total_seconds += 1;
    }
    let seconds = total_seconds % 60;
    let minutes = total_seconds / 60;
    let second = if seconds == 1 { "second" } else { "seconds" };

    if minutes > 0 {
        let minute = if minutes == 1 { "minute" } else { "minutes" };
        format!("{} {} {:02} {}", minutes, minute, seconds, second)
    } else {
        format!("{} {}", seconds, second)
    }
}

/// Hours down to milliseconds, leaving out zero components.
///
/// `"4 seconds 450 milliseconds"`, `"3 hours 15 minutes 1 second 750 milliseconds"`
pub fn format_detailed_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    let milliseconds = millis % 1000;
    let all_seconds = millis / 1000;
    let seconds = all_seconds % 60;
    let all_minutes = all_seconds / 60;
    let minutes = all_minutes % 60;
    let hours = all_minutes / 60;

    let parts = [
        (hours, "hour", "hours"),
        (minutes, "minute", "minutes"),
        (seconds, "second", "seconds"),
        (milliseconds, "millisecond", "milliseconds"),
    ];

    parts
        .iter()
        .filter(|(value, _, _)| *value > 0)
        .map(|(value, one, many)| format!("{} {}", value, if *value == 1 { one } else { many }))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_rounds_to_seconds() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0 seconds");
        assert_eq!(format_duration(Duration::from_millis(499)), "0 seconds");
        assert_eq!(format_duration(Duration::from_millis(500)), "1 second");
        assert_eq!(format_duration(Duration::from_millis(59_600)), "1 minute 00 seconds");
        assert_eq!(format_duration(Duration::from_secs(123)), "2 minutes 03 seconds");
        assert_eq!(format_duration(Duration::from_secs(61)), "1 minute 01 second");
    }

    #[test]
    fn test_format_detailed_duration() {
        assert_eq!(format_detailed_duration(Duration::ZERO), "");
        assert_eq!(
            format_detailed_duration(Duration::from_millis(4_450)),
            "4 seconds 450 milliseconds"
        );
        assert_eq!(
            format_detailed_duration(Duration::from_millis(3 * 3_600_000 + 15 * 60_000 + 1_750)),
            "3 hours 15 minutes 1 second 750 milliseconds"
        );
        assert_eq!(format_detailed_duration(Duration::from_millis(1)), "1 millisecond");
    }
}
