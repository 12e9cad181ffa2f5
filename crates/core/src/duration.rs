//! Human-readable duration strings ("90s", "2h30m", "1d").

use std::time::Duration;

/// Parse strings like `"3h"`, `"90s"` or `"1d12h"` into a [`Duration`].
///
/// Units are `d`, `h`, `m` and `s`, and may be chained. A bare number is
/// read as seconds. `None` for empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        // "30m15" is ambiguous.
        if found_unit {
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}
