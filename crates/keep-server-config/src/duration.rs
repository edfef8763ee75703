// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Duration strings accepted by the configuration.
//!
//! Two spellings are supported:
//! - simple durations understood by `humantime` (`500ms`, `10s`, `1h 30m`, `1d`); a bare
//!   number is taken as milliseconds,
//! - ISO-8601 durations restricted to days and time (`P1D`, `PT12H`, `PT0.5S`), optionally
//!   signed (`-PT1S`).

use std::time::Duration;

use chrono::TimeDelta;

/// Parse a strictly positive interval, such as a scheduler tick.
pub fn parse_interval(value: &str) -> Result<Duration, String> {
	let value = value.trim();
	if value.starts_with(['P', 'p', '-', '+']) {
		let delta = parse_signed(value)?;
		if delta <= TimeDelta::zero() {
			return Err(format!("interval '{value}' must be greater than zero"));
		}
		return delta.to_std().map_err(|e| e.to_string());
	}

	let duration = parse_unsigned(value)?;
	if duration.is_zero() {
		return Err(format!("interval '{value}' must be greater than zero"));
	}
	Ok(duration)
}

/// Parse a possibly zero or negative window, such as the staleness duration.
pub fn parse_window(value: &str) -> Result<TimeDelta, String> {
	parse_signed(value.trim())
}

fn parse_signed(value: &str) -> Result<TimeDelta, String> {
	let (negative, rest) = match value.as_bytes().first() {
		Some(b'-') => (true, &value[1..]),
		Some(b'+') => (false, &value[1..]),
		_ => (false, value),
	};

	let magnitude = if rest.starts_with(['P', 'p']) {
		parse_iso8601(rest)?
	} else {
		let duration = parse_unsigned(rest)?;
		TimeDelta::from_std(duration).map_err(|_| format!("duration '{value}' is out of range"))?
	};

	Ok(if negative { -magnitude } else { magnitude })
}

fn parse_unsigned(value: &str) -> Result<Duration, String> {
	if value.is_empty() {
		return Err("duration must not be empty".to_string());
	}
	if value.bytes().all(|b| b.is_ascii_digit()) {
		let millis: u64 = value
			.parse()
			.map_err(|_| format!("duration '{value}' is out of range"))?;
		return Ok(Duration::from_millis(millis));
	}
	humantime::parse_duration(value).map_err(|e| format!("invalid duration '{value}': {e}"))
}

fn parse_iso8601(value: &str) -> Result<TimeDelta, String> {
	let invalid = || format!("invalid ISO-8601 duration '{value}'");
	let upper = value.to_ascii_uppercase();
	let body = upper.strip_prefix('P').ok_or_else(invalid)?;
	let (date, time) = match body.split_once('T') {
		Some((date, time)) => (date, Some(time)),
		None => (body, None),
	};

	let mut total = TimeDelta::zero();
	let mut components = 0;

	if !date.is_empty() {
		let days: i64 = date
			.strip_suffix('D')
			.and_then(|d| d.parse().ok())
			.ok_or_else(invalid)?;
		total = TimeDelta::try_days(days).ok_or_else(invalid)?;
		components += 1;
	}

	if let Some(time) = time {
		let mut number = String::new();
		let mut last_rank = 0;
		for c in time.chars() {
			match c {
				'0'..='9' | '.' => number.push(c),
				'H' | 'M' | 'S' => {
					let rank = match c {
						'H' => 1,
						'M' => 2,
						_ => 3,
					};
					if number.is_empty() || rank <= last_rank {
						return Err(invalid());
					}
					let part = time_component(&number, c).ok_or_else(invalid)?;
					total = total.checked_add(&part).ok_or_else(invalid)?;
					number.clear();
					last_rank = rank;
					components += 1;
				}
				_ => return Err(invalid()),
			}
		}
		if !number.is_empty() || last_rank == 0 {
			return Err(invalid());
		}
	}

	if components == 0 {
		return Err(invalid());
	}
	Ok(total)
}

fn time_component(number: &str, unit: char) -> Option<TimeDelta> {
	match unit {
		'H' => TimeDelta::try_hours(number.parse().ok()?),
		'M' => TimeDelta::try_minutes(number.parse().ok()?),
		_ => {
			let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
			if fraction.len() > 9 || (whole.is_empty() && fraction.is_empty()) {
				return None;
			}
			let seconds: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
			let nanos: i64 = if fraction.is_empty() {
				0
			} else {
				format!("{fraction:0<9}").parse().ok()?
			};
			TimeDelta::try_seconds(seconds)?.checked_add(&TimeDelta::nanoseconds(nanos))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_interval_simple_units() {
		assert_eq!(parse_interval("10s").unwrap(), Duration::from_secs(10));
		assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
		assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
		assert_eq!(parse_interval("1h 30m").unwrap(), Duration::from_secs(5400));
	}

	#[test]
	fn test_interval_bare_number_is_millis() {
		assert_eq!(parse_interval("250").unwrap(), Duration::from_millis(250));
	}

	#[test]
	fn test_interval_accepts_iso8601() {
		assert_eq!(parse_interval("PT5S").unwrap(), Duration::from_secs(5));
	}

	#[test]
	fn test_interval_rejects_zero_negative_and_garbage() {
		assert!(parse_interval("0").is_err());
		assert!(parse_interval("0s").is_err());
		assert!(parse_interval("-PT1S").is_err());
		assert!(parse_interval("").is_err());
		assert!(parse_interval("soon").is_err());
	}

	#[test]
	fn test_window_iso8601() {
		assert_eq!(parse_window("P1D").unwrap(), TimeDelta::days(1));
		assert_eq!(parse_window("PT12H").unwrap(), TimeDelta::hours(12));
		assert_eq!(
			parse_window("P1DT2H30M").unwrap(),
			TimeDelta::days(1) + TimeDelta::hours(2) + TimeDelta::minutes(30)
		);
		assert_eq!(parse_window("PT0.5S").unwrap(), TimeDelta::milliseconds(500));
		assert_eq!(parse_window("pt1m").unwrap(), TimeDelta::minutes(1));
	}

	#[test]
	fn test_window_signed() {
		assert_eq!(parse_window("-PT1S").unwrap(), TimeDelta::seconds(-1));
		assert_eq!(parse_window("+P2D").unwrap(), TimeDelta::days(2));
		assert_eq!(parse_window("-5s").unwrap(), TimeDelta::seconds(-5));
	}

	#[test]
	fn test_window_zero_and_simple() {
		assert_eq!(parse_window("0").unwrap(), TimeDelta::zero());
		assert_eq!(parse_window("PT0S").unwrap(), TimeDelta::zero());
		assert_eq!(parse_window("1d").unwrap(), TimeDelta::days(1));
	}

	#[test]
	fn test_window_rejects_malformed_iso8601() {
		for value in ["P", "PT", "P1H", "PT1D", "PT1M1H", "PT1", "P1DT", "PTS", "P-1D2"] {
			assert!(parse_window(value).is_err(), "{value} should be rejected");
		}
	}

	proptest! {
		#[test]
		fn iso_hours_match_simple_hours(hours in 1u32..10_000) {
			let iso = parse_window(&format!("PT{hours}H")).unwrap();
			let simple = parse_window(&format!("{hours}h")).unwrap();
			prop_assert_eq!(iso, simple);
		}

		#[test]
		fn negation_flips_sign(days in 0i64..100_000) {
			let positive = parse_window(&format!("P{days}D")).unwrap();
			let negative = parse_window(&format!("-P{days}D")).unwrap();
			prop_assert_eq!(positive, -negative);
		}

		#[test]
		fn bare_numbers_are_millis(millis in 1u64..u32::MAX as u64) {
			prop_assert_eq!(parse_interval(&millis.to_string()).unwrap(), Duration::from_millis(millis));
		}
	}
}
