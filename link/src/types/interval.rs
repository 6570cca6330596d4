//! Interval wire values.

use crate::error::{QuarryLinkError, Result};
use std::fmt;
use std::str::FromStr;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

/// A calendar interval: months and days are kept apart from the clock part
/// because their length depends on the date they are applied to.
///
/// The text form is `[<n> months] [<n> days] [-]HH:MM:SS[.ffffff]`, e.g.
/// `14 months 3 days 04:05:06.000007`. A bare integer is a microsecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, micros: i64) -> Self {
        Self {
            months,
            days,
            micros,
        }
    }

    pub fn from_micros(micros: i64) -> Self {
        Self::new(0, 0, micros)
    }
}

fn invalid(text: &str, reason: &str) -> QuarryLinkError {
    QuarryLinkError::TypeError(format!("invalid interval '{}': {}", text, reason))
}

fn parse_clock(text: &str, token: &str) -> Result<i64> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.trim_start_matches('+')),
    };
    let mut fields = body.splitn(3, ':');
    let hours: i64 = fields
        .next()
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| invalid(text, "bad hours"))?;
    let minutes: i64 = fields
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| invalid(text, "bad minutes"))?;
    let seconds = fields.next().ok_or_else(|| invalid(text, "missing seconds"))?;
    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    let whole: i64 = whole.parse().map_err(|_| invalid(text, "bad seconds"))?;
    if fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(text, "bad fractional seconds"));
    }
    let fraction_micros: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<6}", fraction)
            .parse()
            .map_err(|_| invalid(text, "bad fractional seconds"))?
    };
    scaled(hours, MICROS_PER_HOUR)
        .and_then(|t| t.checked_add(scaled(minutes, MICROS_PER_MINUTE)?))
        .and_then(|t| t.checked_add(scaled(whole, MICROS_PER_SECOND)?))
        .and_then(|t| t.checked_add(fraction_micros))
        .and_then(|t| if negative { t.checked_neg() } else { Some(t) })
        .ok_or_else(|| invalid(text, "out of range"))
}

fn scaled(amount: i64, unit: i64) -> Option<i64> {
    amount.checked_mul(unit)
}

// `None` marks an overflow already hit while scaling the amount.
fn add_micros(text: &str, acc: i64, amount: Option<i64>) -> Result<i64> {
    amount
        .and_then(|a| acc.checked_add(a))
        .ok_or_else(|| invalid(text, "out of range"))
}

fn add_i32(text: &str, acc: i32, amount: Option<i64>) -> Result<i32> {
    amount
        .and_then(|a| i32::try_from(a).ok())
        .and_then(|a| acc.checked_add(a))
        .ok_or_else(|| invalid(text, "out of range"))
}

impl FromStr for Interval {
    type Err = QuarryLinkError;

    fn from_str(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if let Ok(micros) = trimmed.parse::<i64>() {
            return Ok(Interval::from_micros(micros));
        }

        let mut interval = Interval::default();
        let mut tokens = trimmed.split_whitespace().peekable();
        let mut seen_any = false;
        while let Some(token) = tokens.next() {
            seen_any = true;
            if token.contains(':') {
                let clock = parse_clock(text, token)?;
                interval.micros = add_micros(text, interval.micros, Some(clock))?;
                continue;
            }
            let amount: i64 = token.parse().map_err(|_| invalid(text, "expected a number"))?;
            let unit = tokens.next().ok_or_else(|| invalid(text, "missing unit"))?;
            let unit = unit.to_ascii_lowercase();
            let unit = unit.trim_end_matches('s');
            let micros = interval.micros;
            match unit {
                "year" => interval.months = add_i32(text, interval.months, amount.checked_mul(12))?,
                "mon" | "month" => interval.months = add_i32(text, interval.months, Some(amount))?,
                "day" => interval.days = add_i32(text, interval.days, Some(amount))?,
                "hour" => interval.micros = add_micros(text, micros, scaled(amount, MICROS_PER_HOUR))?,
                "min" | "minute" => {
                    interval.micros = add_micros(text, micros, scaled(amount, MICROS_PER_MINUTE))?
                },
                "sec" | "second" => {
                    interval.micros = add_micros(text, micros, scaled(amount, MICROS_PER_SECOND))?
                },
                "u" | "microsecond" => interval.micros = add_micros(text, micros, Some(amount))?,
                _ => return Err(invalid(text, "unknown unit")),
            }
        }
        if !seen_any {
            return Err(invalid(text, "empty"));
        }
        Ok(interval)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.months != 0 {
            parts.push(format!("{} months", self.months));
        }
        if self.days != 0 {
            parts.push(format!("{} days", self.days));
        }
        if self.micros != 0 || parts.is_empty() {
            let sign = if self.micros < 0 { "-" } else { "" };
            let abs = self.micros.unsigned_abs();
            let hours = abs / MICROS_PER_HOUR as u64;
            let minutes = (abs % MICROS_PER_HOUR as u64) / MICROS_PER_MINUTE as u64;
            let seconds = (abs % MICROS_PER_MINUTE as u64) / MICROS_PER_SECOND as u64;
            let fraction = abs % MICROS_PER_SECOND as u64;
            let mut clock = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
            if fraction != 0 {
                clock.push_str(&format!(".{:06}", fraction));
            }
            parts.push(clock);
        }
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_form() {
        let interval: Interval = "1 year 2 months 3 days 04:05:06.000007".parse().unwrap();
        assert_eq!(interval.months, 14);
        assert_eq!(interval.days, 3);
        assert_eq!(
            interval.micros,
            4 * MICROS_PER_HOUR + 5 * MICROS_PER_MINUTE + 6 * MICROS_PER_SECOND + 7
        );
    }

    #[test]
    fn test_microseconds_round_trip() {
        for micros in [0i64, 1, 1_500_000, -90 * MICROS_PER_MINUTE, 86_399_999_999] {
            let interval = Interval::from_micros(micros);
            let reparsed: Interval = interval.to_string().parse().unwrap();
            assert_eq!(reparsed, interval, "text form {}", interval);
            let from_count: Interval = micros.to_string().parse().unwrap();
            assert_eq!(from_count, interval);
        }
    }

    #[test]
    fn test_calendar_round_trip() {
        let interval = Interval::new(-3, 10, 42);
        assert_eq!(interval.to_string(), "-3 months 10 days 00:00:00.000042");
        assert_eq!(interval.to_string().parse::<Interval>().unwrap(), interval);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<Interval>().is_err());
        assert!("3 fortnights".parse::<Interval>().is_err());
        assert!("12:xx:00".parse::<Interval>().is_err());
    }

    #[test]
    fn test_overflowing_amounts_are_type_errors() {
        for text in [
            "99999999999999:00:00",
            "9223372036854775807 hours",
            "2147483647 years",
            "2147483647 days 1 day",
            "9223372036854775807 u 1 u",
        ] {
            assert!(
                matches!(text.parse::<Interval>(), Err(QuarryLinkError::TypeError(_))),
                "{} should be rejected",
                text
            );
        }
    }
}
