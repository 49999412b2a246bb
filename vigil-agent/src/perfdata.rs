//! Performance data emitted by checks
//!
//! Exec checks report perfdata in the plugin text format after a `|`:
//! `'label'=value[UOM];[warn];[crit];[min];[max]`, space separated.
//! Native checks build [`PerfData`] values directly.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// How the engine should interpret successive values of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Gauge,
    Counter,
    Derive,
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PerfData {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub value_type: ValueType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub warning: Option<f64>,
    pub warning_low: Option<f64>,
    pub critical: Option<f64>,
    pub critical_low: Option<f64>,
    /// `@` range: alert when the value is inside the range.
    pub warning_inverted: bool,
    pub critical_inverted: bool,
}

impl PerfData {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Split a check output line at the first `|` into text and perfdata.
pub fn split_output(line: &str) -> (&str, Option<&str>) {
    match line.split_once('|') {
        Some((text, perf)) => (text, Some(perf)),
        None => (line, None),
    }
}

/// Parse a perfdata string. Malformed entries are skipped with a warning,
/// and a metric appearing twice keeps only its first occurrence.
pub fn parse_perfdata(input: &str) -> Vec<PerfData> {
    let mut seen = HashSet::new();
    let mut parsed = Vec::new();

    for token in tokenize(input) {
        let Some((raw_label, raw_value)) = split_label(&token) else {
            warn!("invalid perfdata format: equal sign not present in '{}'", token);
            continue;
        };

        let (name, value_type) = unwrap_label(raw_label);
        if name.is_empty() {
            warn!("invalid perfdata format: metric name empty in '{}'", token);
            continue;
        }
        if !seen.insert(name.to_string()) {
            warn!(
                "metric '{}' appears several times in '{}', only the first occurrence is kept",
                name, input
            );
            continue;
        }

        let mut fields = raw_value.split(';');
        let head = fields.next().unwrap_or_default();
        let Some((value, unit)) = parse_number_prefix(head) else {
            warn!("invalid perfdata format: no numeric value in '{}'", token);
            continue;
        };

        let mut perf = PerfData {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            value_type,
            ..Default::default()
        };

        if let Some(range) = fields.next().and_then(parse_range) {
            perf.warning_low = range.low;
            perf.warning = range.high;
            perf.warning_inverted = range.inclusive;
        }
        if let Some(range) = fields.next().and_then(parse_range) {
            perf.critical_low = range.low;
            perf.critical = range.high;
            perf.critical_inverted = range.inclusive;
        }
        perf.min = fields.next().and_then(parse_number);
        perf.max = fields.next().and_then(parse_number);

        debug!(
            "got perfdata name={} value={} unit={} warning={:?} critical={:?}",
            perf.name, perf.value, perf.unit, perf.warning, perf.critical
        );
        parsed.push(perf);
    }
    parsed
}

/// Whitespace separated tokens; single quotes protect spaces in labels.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in input.chars() {
        if c == '\'' {
            in_quote = !in_quote;
            current.push(c);
        } else if c.is_whitespace() && !in_quote {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn split_label(token: &str) -> Option<(&str, &str)> {
    if let Some(rest) = token.strip_prefix('\'') {
        let close = rest.find('\'')?;
        let value = rest[close + 1..].strip_prefix('=')?;
        return Some((&rest[..close], value));
    }
    token.split_once('=')
}

fn unwrap_label(label: &str) -> (&str, ValueType) {
    let label = label.trim();
    if label.len() > 3 && label.ends_with(']') && label.as_bytes()[1] == b'[' {
        let inner = &label[2..label.len() - 1];
        match &label[..2] {
            "a[" => return (inner, ValueType::Absolute),
            "c[" => return (inner, ValueType::Counter),
            "d[" => return (inner, ValueType::Derive),
            "g[" => return (inner, ValueType::Gauge),
            _ => {}
        }
    }
    (label, ValueType::Gauge)
}

/// Longest numeric prefix, `,` accepted as decimal separator.
fn parse_number_prefix(s: &str) -> Option<(f64, &str)> {
    let end = s
        .char_indices()
        .find(|&(i, c)| {
            !(c.is_ascii_digit() || c == '.' || c == ',' || ((c == '-' || c == '+') && i == 0))
        })
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let value = s[..end].replace(',', ".").parse::<f64>().ok()?;
    Some((value, &s[end..]))
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    parse_number_prefix(s).map(|(v, _)| v)
}

struct Range {
    low: Option<f64>,
    high: Option<f64>,
    inclusive: bool,
}

/// Plugin range syntax: `[@]low:high`, `low:`, `~:high` or a bare `high`
/// meaning `0:high`.
fn parse_range(s: &str) -> Option<Range> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (inclusive, s) = match s.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    match s.split_once(':') {
        None => {
            let high = parse_number(s)?;
            Some(Range {
                low: Some(0.0),
                high: Some(high),
                inclusive,
            })
        }
        Some((low, high)) => {
            let low = if low == "~" {
                Some(f64::NEG_INFINITY)
            } else {
                parse_number(low)
            };
            let high = parse_number(high).or(Some(f64::INFINITY));
            Some(Range {
                low,
                high,
                inclusive,
            })
        }
    }
}
