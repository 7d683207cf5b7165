//! Rate-limit detection over agent exit codes and output tails.
//!
//! Every known upstream refusal format is recognized here and nowhere else.
//! Signatures fall in two groups:
//!
//! - **Reset-bearing**: the message names when the quota resets (a wall-clock
//!   time in a named zone, or a unix epoch). These are trusted regardless of
//!   the exit code, because the agent CLI may exit 0 after printing them.
//! - **Refusal**: a structured upstream refusal (`rate_limit_error`,
//!   `429 Too Many Requests`, `API Error: 429`, ...), optionally with a
//!   relative delay. These only count when the process also exited non-zero
//!   and the refusal sits in the last lines of output, so an agent that merely
//!   talks about rate limiting, or a crash with `:429:` in a stack frame, is
//!   not misclassified.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::{Captures, Regex};

use crate::core::types::SessionStatus;

/// Backoff applied when a rate limit is recognized but carries no usable
/// reset time. Deliberately conservative; overridable via configuration.
pub const DEFAULT_RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(5 * 60);

/// Upper bound on any detected wait. Longer (or absurd) reset hints are
/// clamped to this.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Refusal signatures must appear within this many trailing lines.
const REFUSAL_WINDOW_LINES: usize = 40;

/// Detected rate-limit condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Time until the upstream quota resets, clamped to
    /// `[0, MAX_RETRY_AFTER]`. `None` when the refusal carried no delay.
    pub retry_after: Option<Duration>,
}

static RESET_CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)hit your limit.*?resets\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)\s*\(([^)]+)\)")
        .expect("reset clock regex")
});

static RESET_EPOCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)usage limit reached\|(\d{9,11})").expect("epoch regex"));

static RETRY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)retry[-_ ]after"?\s*[:=]\s*"?(\d+)"#).expect("retry-after regex")
});

static TRY_AGAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)try again in\s+(\d+)\s*(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b")
        .expect("try-again regex")
});

static REFUSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\brate_limit_error\b|\boverloaded_error\b|\b429 too many requests\b|api error:?\s*429\b|usage limit reached",
    )
    .expect("refusal regex")
});

/// Classify a finished session against the current wall clock.
pub fn classify(exit_code: Option<i32>, output_tail: &str) -> Option<RateLimit> {
    classify_at(exit_code, output_tail, Utc::now())
}

/// Classify a finished session relative to `now`.
///
/// Returns `None` when no recognized signature is present. When several
/// signatures appear, the last reset-bearing one wins since it is the most
/// recent refusal.
pub fn classify_at(exit_code: Option<i32>, output_tail: &str, now: DateTime<Utc>) -> Option<RateLimit> {
    if let Some(reset) = last_reset_time(output_tail, now) {
        return Some(RateLimit {
            retry_after: Some(until(reset, now)),
        });
    }

    if exit_code == Some(0) {
        return None;
    }

    let window = last_lines(output_tail, REFUSAL_WINDOW_LINES);
    if !REFUSAL_RE.is_match(window) {
        return None;
    }
    Some(RateLimit {
        retry_after: last_relative_delay(window).map(|delay| delay.min(MAX_RETRY_AFTER)),
    })
}

/// Suffix of `text` holding at most its last `count` lines.
fn last_lines(text: &str, count: usize) -> &str {
    let trimmed = text.trim_end_matches('\n');
    match trimmed.rmatch_indices('\n').nth(count.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Map a naturally exited session to its status.
pub fn classify_exit(exit_code: Option<i32>, output_tail: &str, now: DateTime<Utc>) -> SessionStatus {
    if let Some(limit) = classify_at(exit_code, output_tail, now) {
        return SessionStatus::RateLimited {
            retry_after: limit.retry_after,
        };
    }
    match exit_code {
        Some(0) => SessionStatus::Completed,
        _ => SessionStatus::Crashed,
    }
}

fn until(reset: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (reset - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .min(MAX_RETRY_AFTER)
}

fn last_reset_time(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let clock = RESET_CLOCK_RE
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(0)?.end(), reset_from_clock(&caps, now)?)))
        .last();
    let epoch = RESET_EPOCH_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let secs: i64 = caps.get(1)?.as_str().parse().ok()?;
            Some((caps.get(0)?.end(), DateTime::<Utc>::from_timestamp(secs, 0)?))
        })
        .last();

    match (clock, epoch) {
        (Some(a), Some(b)) => Some(if a.0 >= b.0 { a.1 } else { b.1 }),
        (Some(a), None) => Some(a.1),
        (None, Some(b)) => Some(b.1),
        (None, None) => None,
    }
}

fn reset_from_clock(caps: &Captures<'_>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let hour12: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if !(1..=12).contains(&hour12) {
        return None;
    }
    let pm = caps.get(3)?.as_str().eq_ignore_ascii_case("pm");
    let hour = match (hour12, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };

    let zone = caps.get(4)?.as_str().trim();
    match zone.parse::<Tz>() {
        Ok(tz) => next_wall_clock(&tz, now, hour, minute),
        Err(_) => next_wall_clock(&chrono::Local, now, hour, minute),
    }
}

/// Next occurrence of `hour:minute` in `tz` strictly after `now`.
fn next_wall_clock<Z: TimeZone>(tz: &Z, now: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.with_timezone(tz).date_naive().and_time(time);
    let reset = tz.from_local_datetime(&today).earliest()?.with_timezone(&Utc);
    if reset > now {
        return Some(reset);
    }
    let tomorrow = today.checked_add_days(Days::new(1))?;
    Some(tz.from_local_datetime(&tomorrow).earliest()?.with_timezone(&Utc))
}

fn last_relative_delay(text: &str) -> Option<Duration> {
    let retry_after = RETRY_AFTER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let secs: u64 = caps.get(1)?.as_str().parse().ok()?;
            Some((caps.get(0)?.end(), Duration::from_secs(secs)))
        })
        .last();
    let try_again = TRY_AGAIN_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2)?.as_str().to_ascii_lowercase();
            let secs = match unit.chars().next()? {
                'h' => amount.checked_mul(3600)?,
                'm' => amount.checked_mul(60)?,
                _ => amount,
            };
            Some((caps.get(0)?.end(), Duration::from_secs(secs)))
        })
        .last();

    match (retry_after, try_again) {
        (Some(a), Some(b)) => Some(if a.0 >= b.0 { a.1 } else { b.1 }),
        (Some(a), None) => Some(a.1),
        (None, Some(b)) => Some(b.1),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn ordinary_crash_is_not_rate_limited() {
        let tail = "thread 'main' panicked at src/lib.rs:10:5\nerror: build failed";
        assert_eq!(classify_at(Some(1), tail, at(12, 0)), None);
        assert_eq!(classify_exit(Some(1), tail, at(12, 0)), SessionStatus::Crashed);
    }

    #[test]
    fn clean_exit_without_signature_is_completed() {
        assert_eq!(
            classify_exit(Some(0), "all done", at(12, 0)),
            SessionStatus::Completed
        );
    }

    #[test]
    fn killed_process_without_signature_is_crashed() {
        assert_eq!(classify_exit(None, "", at(12, 0)), SessionStatus::Crashed);
    }

    #[test]
    fn reset_clock_in_named_zone() {
        // 18:00 UTC is 13:00 in New York (EST, UTC-5) on this date.
        let tail = "You've hit your limit · resets 3pm (America/New_York)";
        let limit = classify_at(Some(0), tail, at(18, 0)).expect("rate limited");
        assert_eq!(limit.retry_after, Some(Duration::from_secs(2 * 3600)));
    }

    #[test]
    fn reset_clock_with_minutes_rolls_to_tomorrow() {
        let tail = "Claude: you have hit your limit. It resets 11:30am (UTC).";
        let limit = classify_at(Some(1), tail, at(12, 0)).expect("rate limited");
        assert_eq!(
            limit.retry_after,
            Some(Duration::from_secs(23 * 3600 + 30 * 60))
        );
    }

    #[test]
    fn midnight_and_noon_are_handled() {
        let midnight = classify_at(Some(0), "hit your limit, resets 12am (UTC)", at(23, 0))
            .expect("rate limited");
        assert_eq!(midnight.retry_after, Some(Duration::from_secs(3600)));

        let noon = classify_at(Some(0), "hit your limit, resets 12pm (UTC)", at(11, 0))
            .expect("rate limited");
        assert_eq!(noon.retry_after, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn unknown_zone_falls_back_to_local_time() {
        let tail = "hit your limit · resets 4pm (Mars/Olympus_Mons)";
        let limit = classify_at(Some(0), tail, at(12, 0)).expect("rate limited");
        let retry = limit.retry_after.expect("retry after");
        assert!(retry <= Duration::from_secs(25 * 3600));
    }

    #[test]
    fn epoch_reset_in_the_past_floors_at_zero() {
        let now = at(12, 0);
        let past = now.timestamp() - 600;
        let tail = format!("Claude AI usage limit reached|{past}");
        let limit = classify_at(Some(1), &tail, now).expect("rate limited");
        assert_eq!(limit.retry_after, Some(Duration::ZERO));
    }

    #[test]
    fn epoch_reset_in_the_future() {
        let now = at(12, 0);
        let tail = format!("Claude AI usage limit reached|{}", now.timestamp() + 90);
        let limit = classify_at(Some(0), &tail, now).expect("rate limited");
        assert_eq!(limit.retry_after, Some(Duration::from_secs(90)));
    }

    #[test]
    fn relative_delays_require_nonzero_exit() {
        let tail = "API Error: 429 Too Many Requests. Please try again in 2 minutes.";
        let limit = classify_at(Some(1), tail, at(12, 0)).expect("rate limited");
        assert_eq!(limit.retry_after, Some(Duration::from_secs(120)));
        assert_eq!(classify_at(Some(0), tail, at(12, 0)), None);
    }

    #[test]
    fn retry_after_header_is_used() {
        let tail = "API Error: 429\nretry-after: 45\n";
        let limit = classify_at(Some(2), tail, at(12, 0)).expect("rate limited");
        assert_eq!(limit.retry_after, Some(Duration::from_secs(45)));
    }

    #[test]
    fn qualitative_signal_has_no_retry_after() {
        let tail = r#"{"type":"error","error":{"type":"rate_limit_error"}}"#;
        let limit = classify_at(Some(1), tail, at(12, 0)).expect("rate limited");
        assert_eq!(limit.retry_after, None);
        assert_eq!(
            classify_exit(Some(1), tail, at(12, 0)),
            SessionStatus::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn crash_with_429_in_a_stack_frame_is_not_rate_limited() {
        let tail = "TypeError: cannot read properties of undefined\n    at src/server.js:429:12\nerror: build failed";
        assert_eq!(classify_exit(Some(1), tail, at(12, 0)), SessionStatus::Crashed);
    }

    #[test]
    fn crash_while_building_rate_limit_middleware_is_not_rate_limited() {
        let tail = "Implementing rate limit middleware for /api/login\nretry-after: 30 header added\nthread 'main' panicked: index out of bounds";
        assert_eq!(classify_exit(Some(101), tail, at(12, 0)), SessionStatus::Crashed);
    }

    #[test]
    fn refusal_far_above_the_final_lines_is_ignored() {
        let mut tail = String::from("API Error: 429 Too Many Requests\n");
        for n in 0..100 {
            tail.push_str(&format!("later output line {n}\n"));
        }
        tail.push_str("error: build failed\n");
        assert_eq!(classify_exit(Some(1), &tail, at(12, 0)), SessionStatus::Crashed);
    }

    #[test]
    fn structured_refusal_forms_are_recognized() {
        for tail in [
            "429 Too Many Requests",
            "API Error: 429 {\"type\":\"error\"}",
            r#"{"error":{"type":"overloaded_error"}}"#,
            "Claude AI usage limit reached",
        ] {
            assert_eq!(
                classify_exit(Some(1), tail, at(12, 0)),
                SessionStatus::RateLimited { retry_after: None },
                "{tail}"
            );
        }
    }

    #[test]
    fn huge_retry_after_is_clamped() {
        let tail = "API Error: 429 Too Many Requests\nretry-after: 18446744073709551615\n";
        assert_eq!(
            classify_exit(Some(1), tail, at(12, 0)),
            SessionStatus::RateLimited {
                retry_after: Some(MAX_RETRY_AFTER)
            }
        );
    }

    #[test]
    fn far_future_epoch_reset_is_clamped() {
        let tail = "usage limit reached|99999999999";
        let limit = classify_at(Some(0), tail, at(12, 0)).expect("rate limited");
        assert_eq!(limit.retry_after, Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn keeps_only_trailing_lines() {
        assert_eq!(last_lines("a\nb\nc\n", 2), "b\nc");
        assert_eq!(last_lines("a\nb", 5), "a\nb");
        assert_eq!(last_lines("", 3), "");
    }

    #[test]
    fn talking_about_rate_limits_on_success_is_not_a_signal() {
        let tail = "Implemented the rate limit middleware; 429 responses now include retry-after: 30";
        assert_eq!(classify_at(Some(0), tail, at(12, 0)), None);
    }

    #[test]
    fn last_reset_signature_wins() {
        let now = at(12, 0);
        let tail = format!(
            "usage limit reached|{}\n...\nhit your limit · resets 1pm (UTC)",
            now.timestamp() + 10
        );
        let limit = classify_at(Some(1), &tail, now).expect("rate limited");
        assert_eq!(limit.retry_after, Some(Duration::from_secs(3600)));
    }
}
