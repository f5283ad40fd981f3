//! Identifier layouts: validation, rendering, parsing and Luhn check digits.
//!
//! A format is either the standard layout (prefix, business-unit code, year,
//! week or month, day, location code, sequence, random digits, check digit,
//! in that order, optionally joined by a separator) or a custom template
//! built from the placeholders `{P}{Y}{M}{W}{D}{L}{B}{S}{R}{C}`. Both are
//! reduced to the same list of segments, so rendering and parsing share one
//! code path. Every segment has a fixed width, which is what makes parsing
//! unambiguous.

use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use waybill_db::models::sequence::SequenceFormatRow;

use crate::error::SequenceError;

/// Separator characters a format may use.
pub const ALLOWED_SEPARATORS: [&str; 4] = ["-", "_", "/", "."];

/// Characters rejected in a rendered value when the format has no separators.
const FORBIDDEN_WITHOUT_SEPARATORS: [char; 6] = ['-', '_', '/', '.', ' ', '|'];

/// Upper bound for sequence and random digit widths.
pub const MAX_DIGITS: u8 = 10;

/// Per-tenant identifier layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFormat {
    pub prefix: String,
    pub include_business_unit_code: bool,
    pub business_unit_code: String,
    pub include_year: bool,
    /// 2 or 4.
    pub year_digits: u8,
    pub include_month: bool,
    pub include_week_number: bool,
    pub include_day: bool,
    pub include_location_code: bool,
    pub location_code: String,
    pub sequence_digits: u8,
    pub include_random_digits: bool,
    pub random_digits: u8,
    pub include_check_digit: bool,
    pub use_separators: bool,
    pub separator_char: String,
    pub allow_custom_format: bool,
    pub custom_format: String,
}

/// Components recovered from a rendered identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSequence {
    pub prefix: String,
    pub business_unit_code: Option<String>,
    /// Full year; two-digit years are read as 20YY.
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub week: Option<u32>,
    pub day: Option<u32>,
    pub location_code: Option<String>,
    pub sequence: i64,
    pub random: Option<String>,
    pub check_digit: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Prefix,
    BusinessUnit,
    Year,
    Month,
    Week,
    Day,
    Location,
    Sequence,
    Random,
    Check,
}

impl Component {
    fn from_placeholder(name: &str) -> Option<Self> {
        Some(match name {
            "P" => Self::Prefix,
            "B" => Self::BusinessUnit,
            "Y" => Self::Year,
            "M" => Self::Month,
            "W" => Self::Week,
            "D" => Self::Day,
            "L" => Self::Location,
            "S" => Self::Sequence,
            "R" => Self::Random,
            "C" => Self::Check,
            _ => return None,
        })
    }

    fn is_numeric(self) -> bool {
        !matches!(self, Self::Prefix | Self::BusinessUnit | Self::Location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Component(Component),
}

fn invalid_format(msg: impl Into<String>) -> SequenceError {
    SequenceError::InvalidFormat(msg.into())
}

fn invalid_sequence(msg: impl Into<String>) -> SequenceError {
    SequenceError::InvalidSequence(msg.into())
}

impl SequenceFormat {
    /// True when the custom template replaces the standard layout.
    pub fn uses_custom_format(&self) -> bool {
        self.allow_custom_format && !self.custom_format.trim().is_empty()
    }

    /// Check that every enabled component has what it needs to render.
    pub fn validate(&self) -> Result<(), SequenceError> {
        if !(1..=MAX_DIGITS).contains(&self.sequence_digits) {
            return Err(invalid_format(format!(
                "sequence digits must be between 1 and {MAX_DIGITS}"
            )));
        }
        if self.include_week_number && self.include_month {
            return Err(invalid_format(
                "week number and month cannot both be included",
            ));
        }
        if self.use_separators && !ALLOWED_SEPARATORS.contains(&self.separator_char.as_str()) {
            return Err(invalid_format(format!(
                "separator {:?} is not one of {}",
                self.separator_char,
                ALLOWED_SEPARATORS.join(" ")
            )));
        }

        let layout = self.layout()?;
        let count = |wanted: Component| {
            layout
                .iter()
                .filter(|s| **s == Segment::Component(wanted))
                .count()
        };
        if count(Component::Sequence) != 1 {
            return Err(invalid_format(
                "format must contain the sequence number exactly once",
            ));
        }
        if count(Component::Check) > 1 {
            return Err(invalid_format("format may contain at most one check digit"));
        }

        for segment in &layout {
            if let Segment::Component(c) = segment {
                self.check_component(*c)?;
            }
        }
        Ok(())
    }

    fn check_component(&self, component: Component) -> Result<(), SequenceError> {
        match component {
            Component::Year if !matches!(self.year_digits, 2 | 4) => {
                Err(invalid_format("year digits must be 2 or 4"))
            }
            Component::Random if !(1..=MAX_DIGITS).contains(&self.random_digits) => Err(
                invalid_format(format!("random digits must be between 1 and {MAX_DIGITS}")),
            ),
            Component::Location if self.location_code.is_empty() => {
                Err(invalid_format("location code is required when included"))
            }
            Component::BusinessUnit if self.business_unit_code.is_empty() => {
                Err(invalid_format("business unit code is required when included"))
            }
            _ => Ok(()),
        }
    }

    fn layout(&self) -> Result<Vec<Segment>, SequenceError> {
        if self.uses_custom_format() {
            parse_template(&self.custom_format)
        } else {
            Ok(self.standard_layout())
        }
    }

    fn standard_layout(&self) -> Vec<Segment> {
        let mut parts = Vec::new();
        if !self.prefix.is_empty() {
            parts.push(Component::Prefix);
        }
        if self.include_business_unit_code {
            parts.push(Component::BusinessUnit);
        }
        if self.include_year {
            parts.push(Component::Year);
        }
        if self.include_week_number {
            parts.push(Component::Week);
        } else if self.include_month {
            parts.push(Component::Month);
        }
        if self.include_day {
            parts.push(Component::Day);
        }
        if self.include_location_code {
            parts.push(Component::Location);
        }
        parts.push(Component::Sequence);
        if self.include_random_digits {
            parts.push(Component::Random);
        }
        if self.include_check_digit {
            parts.push(Component::Check);
        }

        let separator = self.use_separators.then(|| self.separator_char.clone());
        let mut segments = Vec::with_capacity(parts.len() * 2);
        for (i, part) in parts.into_iter().enumerate() {
            if let (true, Some(sep)) = (i > 0, &separator) {
                segments.push(Segment::Literal(sep.clone()));
            }
            segments.push(Segment::Component(part));
        }
        segments
    }

    fn width(&self, segment: &Segment) -> usize {
        match segment {
            Segment::Literal(s) => s.chars().count(),
            Segment::Component(c) => match c {
                Component::Prefix => self.prefix.chars().count(),
                Component::BusinessUnit => self.business_unit_code.chars().count(),
                Component::Year => usize::from(self.year_digits),
                Component::Month | Component::Week | Component::Day => 2,
                Component::Location => self.location_code.chars().count(),
                Component::Sequence => usize::from(self.sequence_digits),
                Component::Random => usize::from(self.random_digits),
                Component::Check => 1,
            },
        }
    }

    /// Length of every value this format renders.
    pub fn min_length(&self) -> Result<usize, SequenceError> {
        Ok(self.layout()?.iter().map(|s| self.width(s)).sum())
    }

    /// Render `sequence` as of `at`.
    ///
    /// The check digit, when present, is the Luhn digit over every other
    /// rendered digit.
    pub fn render<R: Rng + ?Sized>(
        &self,
        sequence: i64,
        at: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<String, SequenceError> {
        let limit = 10_i64.pow(u32::from(self.sequence_digits));
        if !(0..limit).contains(&sequence) {
            return Err(SequenceError::Overflow {
                value: sequence,
                digits: self.sequence_digits,
            });
        }

        let layout = self.layout()?;
        let mut pieces = Vec::with_capacity(layout.len());
        let mut check_slot = None;
        for (i, segment) in layout.iter().enumerate() {
            let piece = match segment {
                Segment::Literal(s) => s.clone(),
                Segment::Component(Component::Check) => {
                    check_slot = Some(i);
                    String::new()
                }
                Segment::Component(c) => self.component_value(*c, sequence, at, rng),
            };
            pieces.push(piece);
        }

        if let Some(slot) = check_slot {
            let base: String = pieces.concat();
            pieces[slot] = luhn_check_digit(&base).to_string();
        }
        Ok(pieces.concat())
    }

    fn component_value<R: Rng + ?Sized>(
        &self,
        component: Component,
        sequence: i64,
        at: DateTime<Utc>,
        rng: &mut R,
    ) -> String {
        match component {
            Component::Prefix => self.prefix.clone(),
            Component::BusinessUnit => self.business_unit_code.clone(),
            Component::Year if self.year_digits == 2 => format!("{:02}", at.year().rem_euclid(100)),
            Component::Year => format!("{:04}", at.year()),
            Component::Month => format!("{:02}", at.month()),
            Component::Week => format!("{:02}", at.iso_week().week()),
            Component::Day => format!("{:02}", at.day()),
            Component::Location => self.location_code.clone(),
            Component::Sequence => {
                format!("{sequence:0width$}", width = usize::from(self.sequence_digits))
            }
            Component::Random => (0..self.random_digits)
                .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
                .collect(),
            Component::Check => String::new(),
        }
    }

    /// Split a rendered value back into its components.
    pub fn parse(&self, value: &str) -> Result<ParsedSequence, SequenceError> {
        let layout = self.layout()?;
        let mut parsed = ParsedSequence::default();
        let mut rest = value;
        let mut base = String::with_capacity(value.len());
        let mut check = None;

        for segment in &layout {
            let width = self.width(segment);
            let (text, tail) = split_chars(rest, width).ok_or_else(|| {
                invalid_sequence(format!("{value:?} is shorter than the format"))
            })?;
            rest = tail;

            let component = match segment {
                Segment::Literal(lit) => {
                    if text != lit {
                        return Err(invalid_sequence(format!(
                            "expected {lit:?} but found {text:?}"
                        )));
                    }
                    base.push_str(text);
                    continue;
                }
                Segment::Component(c) => *c,
            };

            if component.is_numeric() && !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid_sequence(format!("{text:?} is not numeric")));
            }

            match component {
                Component::Prefix => {
                    if text != self.prefix {
                        return Err(invalid_sequence(format!(
                            "expected prefix {:?} but found {text:?}",
                            self.prefix
                        )));
                    }
                    parsed.prefix = text.to_string();
                }
                Component::BusinessUnit => {
                    if text != self.business_unit_code {
                        return Err(invalid_sequence("business unit code does not match"));
                    }
                    parsed.business_unit_code = Some(text.to_string());
                }
                Component::Location => {
                    if text != self.location_code {
                        return Err(invalid_sequence("location code does not match"));
                    }
                    parsed.location_code = Some(text.to_string());
                }
                Component::Year => {
                    let year: i32 = parse_number(text)?;
                    parsed.year = Some(if self.year_digits == 2 { 2000 + year } else { year });
                }
                Component::Month => parsed.month = Some(parse_ranged(text, 1..=12, "month")?),
                Component::Week => parsed.week = Some(parse_ranged(text, 1..=53, "week")?),
                Component::Day => parsed.day = Some(parse_ranged(text, 1..=31, "day")?),
                Component::Sequence => parsed.sequence = parse_number(text)?,
                Component::Random => parsed.random = Some(text.to_string()),
                Component::Check => {
                    let digit: u8 = parse_number(text)?;
                    check = Some(digit);
                    parsed.check_digit = Some(digit);
                    continue;
                }
            }
            base.push_str(text);
        }

        if !rest.is_empty() {
            return Err(invalid_sequence(format!(
                "unexpected trailing characters {rest:?}"
            )));
        }
        if let Some(found) = check {
            let expected = luhn_check_digit(&base);
            if found != expected {
                return Err(invalid_sequence(format!(
                    "check digit {found} does not match expected {expected}"
                )));
            }
        }
        Ok(parsed)
    }

    /// Check a rendered value against this format.
    pub fn validate_sequence(&self, value: &str) -> Result<(), SequenceError> {
        let expected = self.min_length()?;
        let actual = value.chars().count();
        if actual < expected {
            return Err(invalid_sequence(format!(
                "expected at least {expected} characters, got {actual}"
            )));
        }

        // A template may place `{P}` anywhere; `parse` checks it there.
        if self.uses_custom_format() {
            return self.parse(value).map(|_| ());
        }

        let body = value.strip_prefix(self.prefix.as_str()).ok_or_else(|| {
            invalid_sequence(format!("missing prefix {:?}", self.prefix))
        })?;

        if !self.use_separators {
            if let Some(c) = body
                .chars()
                .find(|c| FORBIDDEN_WITHOUT_SEPARATORS.contains(c))
            {
                return Err(invalid_sequence(format!("unexpected separator {c:?}")));
            }
        }

        self.parse(value).map(|_| ())
    }
}

impl From<&SequenceFormatRow> for SequenceFormat {
    fn from(row: &SequenceFormatRow) -> Self {
        // Out-of-range widths become 0 and fail validation.
        let digits = |v: i16| u8::try_from(v).unwrap_or(0);
        Self {
            prefix: row.prefix.clone(),
            include_business_unit_code: row.include_business_unit_code,
            business_unit_code: row.business_unit_code.clone(),
            include_year: row.include_year,
            year_digits: digits(row.year_digits),
            include_month: row.include_month,
            include_week_number: row.include_week_number,
            include_day: row.include_day,
            include_location_code: row.include_location_code,
            location_code: row.location_code.clone(),
            sequence_digits: digits(row.sequence_digits),
            include_random_digits: row.include_random_digits,
            random_digits: digits(row.random_digits),
            include_check_digit: row.include_check_digit,
            use_separators: row.use_separators,
            separator_char: row.separator_char.clone(),
            allow_custom_format: row.allow_custom_format,
            custom_format: row.custom_format.clone(),
        }
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, SequenceError> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let (literal, tail) = rest.split_at(start);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal.to_string()));
        }
        let end = tail
            .find('}')
            .ok_or_else(|| invalid_format(format!("unclosed placeholder in {template:?}")))?;
        let name = &tail[1..end];
        let component = Component::from_placeholder(name)
            .ok_or_else(|| invalid_format(format!("unknown placeholder {{{name}}}")))?;
        segments.push(Segment::Component(component));
        rest = &tail[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Split after `n` characters, or `None` if `s` is shorter.
fn split_chars(s: &str, n: usize) -> Option<(&str, &str)> {
    match s.char_indices().nth(n) {
        Some((idx, _)) => Some(s.split_at(idx)),
        None if s.chars().count() == n => Some((s, "")),
        None => None,
    }
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, SequenceError> {
    text.parse()
        .map_err(|_| invalid_sequence(format!("{text:?} is not a number")))
}

fn parse_ranged(
    text: &str,
    range: std::ops::RangeInclusive<u32>,
    what: &str,
) -> Result<u32, SequenceError> {
    let value: u32 = parse_number(text)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid_sequence(format!("{what} {value} is out of range")))
    }
}

/// Luhn check digit over the ASCII digits of `input`; other characters are
/// ignored.
pub fn luhn_check_digit(input: &str) -> u8 {
    let sum: u32 = input
        .bytes()
        .rev()
        .filter(u8::is_ascii_digit)
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    ((10 - sum % 10) % 10) as u8
}
