//! Flag conversion and argv flag parsing.

use std::collections::BTreeMap;

use plugin_api::{FlagType, FlagValue, OptionSpec};
use thiserror::Error;

use crate::error::StegaError;

/// Failure converting a raw argument into its declared type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Invalid number value: {0}")]
    InvalidNumber(String),
}

/// Convert a raw string argument into a value of the declared type.
///
/// Booleans are true only for `"true"` and `"1"`; anything else is false.
/// Arrays split on `,` and always hold at least one element.
pub fn convert_flag_value(value: &str, kind: FlagType) -> Result<FlagValue, ConversionError> {
    match kind {
        FlagType::Boolean => Ok(FlagValue::Bool(value == "true" || value == "1")),
        FlagType::Number => parse_number(value)
            .map(FlagValue::Number)
            .ok_or_else(|| ConversionError::InvalidNumber(value.to_string())),
        FlagType::Array => Ok(FlagValue::Array(
            value.split(',').map(str::to_string).collect(),
        )),
        FlagType::String => Ok(FlagValue::String(value.to_string())),
    }
}

/// Lenient numeric parsing: surrounding whitespace is ignored, an empty
/// value is zero, `0x`/`0o`/`0b` select a radix and infinity must be spelled
/// `Infinity`. Spellings such as `inf` and `nan` are refused.
fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return Some(0.0);
    }
    if let Some(head) = s.get(..2) {
        for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
            if head.eq_ignore_ascii_case(prefix) {
                let digits = &s[2..];
                if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                    return None;
                }
                return u64::from_str_radix(digits, radix).ok().map(|n| n as f64);
            }
        }
    }
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return match unsigned {
            "Infinity" if s.starts_with('-') => Some(f64::NEG_INFINITY),
            "Infinity" => Some(f64::INFINITY),
            _ => None,
        };
    }
    s.parse::<f64>().ok()
}

/// Flags and leftover positional tokens parsed from argv.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedFlags {
    pub flags: BTreeMap<String, FlagValue>,
    pub positionals: Vec<String>,
}

/// Parse flag tokens against an option schema.
///
/// Accepts `--name=value`, `--name value`, `--name`, `-a`, `-a value` and
/// `-a=value`. After parsing, required options are checked and defaults are
/// filled in for the remaining absent options.
pub fn parse_flags(options: &[OptionSpec], tokens: &[String]) -> Result<ParsedFlags, StegaError> {
    let mut parsed = ParsedFlags::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        i += 1;

        if token == "--" {
            parsed.positionals.extend(tokens[i..].iter().cloned());
            break;
        }

        let (body, long) = if let Some(body) = token.strip_prefix("--") {
            (body, true)
        } else if let Some(body) = token.strip_prefix('-').filter(|b| !b.is_empty()) {
            if parse_number(body).is_some() {
                parsed.positionals.push(token.clone());
                continue;
            }
            (body, false)
        } else {
            parsed.positionals.push(token.clone());
            continue;
        };

        let (name, inline) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (body, None),
        };
        let spec = if long {
            find_by_name(options, name)
        } else {
            find_by_alias(options, name).or_else(|| find_by_name(options, name))
        };

        let Some(spec) = spec else {
            let value = match inline {
                Some(v) => FlagValue::String(v),
                None => FlagValue::Bool(true),
            };
            parsed.flags.insert(name.to_string(), value);
            continue;
        };

        let raw = match inline {
            Some(v) => v,
            None if spec.kind == FlagType::Boolean => "true".to_string(),
            None => match tokens.get(i).filter(|next| accepts_value(spec.kind, next)) {
                Some(next) => {
                    i += 1;
                    next.clone()
                }
                None => {
                    return Err(StegaError::InvalidFlagValue {
                        flag: spec.name.clone(),
                        reason: format!("expected a {} value", spec.kind),
                    })
                }
            },
        };

        let value =
            convert_flag_value(&raw, spec.kind).map_err(|err| StegaError::InvalidFlagValue {
                flag: spec.name.clone(),
                reason: err.to_string(),
            })?;
        match parsed.flags.get_mut(&spec.name) {
            Some(FlagValue::Array(existing)) if spec.kind == FlagType::Array => {
                if let FlagValue::Array(more) = value {
                    existing.extend(more);
                }
            }
            _ => {
                parsed.flags.insert(spec.name.clone(), value);
            }
        }
    }

    for spec in options {
        if spec.required && !parsed.flags.contains_key(&spec.name) {
            return Err(StegaError::MissingFlag(spec.name.clone()));
        }
    }
    for spec in options {
        if let Some(default) = &spec.default {
            parsed
                .flags
                .entry(spec.name.clone())
                .or_insert_with(|| default.clone());
        }
    }
    Ok(parsed)
}

fn find_by_name<'a>(options: &'a [OptionSpec], name: &str) -> Option<&'a OptionSpec> {
    options.iter().find(|o| o.name == name)
}

fn find_by_alias<'a>(options: &'a [OptionSpec], alias: &str) -> Option<&'a OptionSpec> {
    options.iter().find(|o| o.alias.as_deref() == Some(alias))
}

fn accepts_value(kind: FlagType, token: &str) -> bool {
    !token.starts_with('-') || (kind == FlagType::Number && parse_number(token).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn booleans_only_accept_true_and_one() {
        assert_eq!(
            convert_flag_value("true", FlagType::Boolean).unwrap(),
            FlagValue::Bool(true)
        );
        assert_eq!(
            convert_flag_value("1", FlagType::Boolean).unwrap(),
            FlagValue::Bool(true)
        );
        assert_eq!(
            convert_flag_value("yes", FlagType::Boolean).unwrap(),
            FlagValue::Bool(false)
        );
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = convert_flag_value("not-a-number", FlagType::Number).unwrap_err();
        assert!(err.to_string().contains("Invalid number value"));
        assert_eq!(
            convert_flag_value("42", FlagType::Number).unwrap(),
            FlagValue::Number(42.0)
        );
    }

    #[test]
    fn numbers_follow_lenient_rules() {
        let number = |raw: &str| convert_flag_value(raw, FlagType::Number);
        assert_eq!(number("").unwrap(), FlagValue::Number(0.0));
        assert_eq!(number("  7.5 ").unwrap(), FlagValue::Number(7.5));
        assert_eq!(number("0x10").unwrap(), FlagValue::Number(16.0));
        assert_eq!(number("0b101").unwrap(), FlagValue::Number(5.0));
        assert_eq!(number("0o17").unwrap(), FlagValue::Number(15.0));
        assert_eq!(number("-Infinity").unwrap(), FlagValue::Number(f64::NEG_INFINITY));
        for bad in ["inf", "infinity", "NaN", "0x", "0xzz", "-0x10", "1_000"] {
            assert!(number(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn array_rejoins_to_its_input() {
        let items = vec!["a".to_string(), "b c".to_string(), "".to_string()];
        let value = convert_flag_value(&items.join(","), FlagType::Array).unwrap();
        assert_eq!(value, FlagValue::Array(items));
        assert_eq!(
            convert_flag_value("solo", FlagType::Array).unwrap(),
            FlagValue::Array(vec!["solo".into()])
        );
    }

    #[test]
    fn string_conversion_is_stable() {
        let once = convert_flag_value("hello world", FlagType::String).unwrap();
        let twice = convert_flag_value(&once.to_string(), FlagType::String).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn parses_all_flag_forms() {
        let options = vec![
            OptionSpec::string("name").alias("n"),
            OptionSpec::boolean("verbose").alias("v"),
            OptionSpec::number("count"),
        ];
        let parsed = parse_flags(&options, &argv(&["-n", "x", "-v", "--count=3"])).unwrap();
        assert_eq!(parsed.flags["name"], FlagValue::from("x"));
        assert_eq!(parsed.flags["verbose"], FlagValue::Bool(true));
        assert_eq!(parsed.flags["count"], FlagValue::Number(3.0));

        let parsed = parse_flags(&options, &argv(&["--name", "y", "--count", "-2"])).unwrap();
        assert_eq!(parsed.flags["name"], FlagValue::from("y"));
        assert_eq!(parsed.flags["count"], FlagValue::Number(-2.0));
    }

    #[test]
    fn boolean_flag_does_not_swallow_positionals() {
        let options = vec![OptionSpec::boolean("upper")];
        let parsed = parse_flags(&options, &argv(&["--upper", "word"])).unwrap();
        assert_eq!(parsed.flags["upper"], FlagValue::Bool(true));
        assert_eq!(parsed.positionals, vec!["word".to_string()]);
    }

    #[test]
    fn missing_required_flag_fails() {
        let options = vec![OptionSpec::string("flag").required()];
        let err = parse_flags(&options, &[]).unwrap_err();
        assert_eq!(err.to_string(), "Missing required flag: --flag");
    }

    #[test]
    fn defaults_fill_absent_flags() {
        let options = vec![OptionSpec::boolean("verbose").default_value(false)];
        let parsed = parse_flags(&options, &[]).unwrap();
        assert_eq!(parsed.flags["verbose"], FlagValue::Bool(false));
    }

    #[test]
    fn bad_number_names_the_flag() {
        let options = vec![OptionSpec::number("count")];
        let err = parse_flags(&options, &argv(&["--count=abc"])).unwrap_err();
        assert_eq!(
            err,
            StegaError::InvalidFlagValue {
                flag: "count".into(),
                reason: "Invalid number value: abc".into(),
            }
        );
    }

    #[test]
    fn value_flag_without_value_fails() {
        let options = vec![OptionSpec::string("name")];
        let err = parse_flags(&options, &argv(&["--name"])).unwrap_err();
        assert!(matches!(err, StegaError::InvalidFlagValue { .. }));
    }

    #[test]
    fn repeated_array_flags_accumulate() {
        let options = vec![OptionSpec::array("tag")];
        let parsed = parse_flags(&options, &argv(&["--tag=a,b", "--tag", "c"])).unwrap();
        assert_eq!(
            parsed.flags["tag"],
            FlagValue::Array(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn undeclared_flags_are_kept() {
        let parsed = parse_flags(&[], &argv(&["--dry-run", "--mode=fast"])).unwrap();
        assert_eq!(parsed.flags["dry-run"], FlagValue::Bool(true));
        assert_eq!(parsed.flags["mode"], FlagValue::from("fast"));
    }
}
