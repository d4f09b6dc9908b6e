use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate, Utc};

/// Seeds always exercised by `default`.
pub const DEFAULT_SEEDS: [u64; 3] = [1337, 2024, 90_210];

/// Resolve CLI seed tokens into concrete seeds, keeping first-seen order.
///
/// Accepts decimal integers (negative values use their magnitude), `0x` hex,
/// `today` for a date-derived daily seed, `random`, and `default` for the
/// built-in set.
pub fn resolve_seed_inputs(tokens: &[String]) -> Result<Vec<u64>> {
    resolve_with_date(tokens, Utc::now().date_naive())
}

fn resolve_with_date(tokens: &[String], today: NaiveDate) -> Result<Vec<u64>> {
    let mut seeds: Vec<u64> = Vec::new();
    let mut push = |seed: u64| {
        if !seeds.contains(&seed) {
            seeds.push(seed);
        }
    };

    for token in tokens {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        if token.eq_ignore_ascii_case("default") {
            DEFAULT_SEEDS.into_iter().for_each(&mut push);
            continue;
        }

        if token.eq_ignore_ascii_case("today") {
            push(daily_seed(today));
            continue;
        }

        if token.eq_ignore_ascii_case("random") {
            push(rand::random::<u64>());
            continue;
        }

        if let Some(hex) = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
        {
            match u64::from_str_radix(hex, 16) {
                Ok(value) => push(value),
                Err(err) => bail!("Invalid hex seed {token:?}: {err}"),
            }
            continue;
        }

        if let Ok(value) = token.parse::<u64>() {
            push(value);
            continue;
        }

        if let Ok(value) = token.parse::<i64>() {
            push(value.unsigned_abs());
            continue;
        }

        bail!("Unrecognized seed {token:?}; use an integer, 0x hex, today, random or default");
    }

    if seeds.is_empty() {
        bail!("No seeds provided");
    }
    Ok(seeds)
}

/// `YYYYMMDD` as a number, so everyone playing the same day shares a seed.
fn daily_seed(date: NaiveDate) -> u64 {
    let year = u64::try_from(date.year()).unwrap_or(0);
    year * 10_000 + u64::from(date.month()) * 100 + u64::from(date.day())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_numbers_hex_and_keywords() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let seeds =
            resolve_with_date(&tokens(&["42", "-7", "0xff", "today", "42"]), today).unwrap();
        assert_eq!(seeds, vec![42, 7, 255, 20_261_018]);
    }

    #[test]
    fn default_expands_without_duplicates() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let seeds = resolve_with_date(&tokens(&["1337", "default"]), today).unwrap();
        assert_eq!(seeds, vec![1337, 2024, 90_210]);
    }

    #[test]
    fn rejects_garbage_and_empty_input() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(resolve_with_date(&tokens(&["pineapple"]), today).is_err());
        assert!(resolve_with_date(&tokens(&["0xzz"]), today).is_err());
        assert!(resolve_with_date(&tokens(&["", " "]), today).is_err());
    }
}
