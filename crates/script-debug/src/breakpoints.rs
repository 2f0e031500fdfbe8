//! Breakpoint store.
//! - BreakpointStore: interface consulted by hooks and setBreakpoints
//! - BreakpointTable: per-source line tables
//! - HitCondition/parse_hit_condition: `N`, `==N`, `>=N`, `>N`
//! - LogFragment/parse_log_message: `{expr}` logpoint templates

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::protocol::{Breakpoint, Source, SourceBreakpoint};

/// Hit count condition for a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCondition {
    Equal(u64),
    AtLeast(u64),
    GreaterThan(u64),
}

impl HitCondition {
    #[must_use]
    pub fn is_met(self, hits: u64) -> bool {
        match self {
            Self::Equal(value) => hits == value,
            Self::AtLeast(value) => hits >= value,
            Self::GreaterThan(value) => hits > value,
        }
    }
}

/// Piece of a logpoint message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFragment {
    Text(String),
    Expr(SmolStr),
}

/// An installed line breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBreakpoint {
    pub id: u32,
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
    pub log_message: Option<Vec<LogFragment>>,
    pub hits: u64,
}

/// Storage consulted on every line hook.
///
/// Keys are `path_key` forms of client paths, or `ref:<n>` for virtual
/// sources. Lines are 1-based runtime lines.
pub trait BreakpointStore: Send + Sync {
    /// Replace every breakpoint of one source, reporting each request's status.
    fn replace(
        &mut self,
        key: &str,
        source: &Source,
        requested: &[SourceBreakpoint],
    ) -> Vec<Breakpoint>;

    /// Cheap membership test for the per-line fast path.
    fn contains(&self, key: &str, line: u32) -> bool;

    fn get(&self, key: &str, line: u32) -> Option<LineBreakpoint>;

    /// Count a hit whose condition held; returns the new hit count.
    fn record_hit(&mut self, key: &str, line: u32) -> u64;

    /// Installed breakpoints of one source.
    fn verified(&self, key: &str, source: &Source) -> Vec<Breakpoint>;

    fn clear(&mut self);
}

/// Default `BreakpointStore`: one ordered line table per source.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    sources: FxHashMap<String, BTreeMap<u32, LineBreakpoint>>,
    next_id: u32,
}

impl BreakpointTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(&mut self, requested: &SourceBreakpoint) -> Result<LineBreakpoint, String> {
        if requested.line == 0 {
            return Err("line must be positive".to_string());
        }
        let hit_condition = match requested.hit_condition.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_hit_condition(raw).ok_or_else(|| format!("invalid hit condition '{raw}'"))?,
            ),
        };
        let log_message = requested
            .log_message
            .as_deref()
            .map(parse_log_message)
            .transpose()?;
        let condition = requested
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|condition| !condition.is_empty())
            .map(str::to_string);
        self.next_id += 1;
        Ok(LineBreakpoint {
            id: self.next_id,
            line: requested.line,
            condition,
            hit_condition,
            log_message,
            hits: 0,
        })
    }
}

impl BreakpointStore for BreakpointTable {
    fn replace(
        &mut self,
        key: &str,
        source: &Source,
        requested: &[SourceBreakpoint],
    ) -> Vec<Breakpoint> {
        let mut table = BTreeMap::new();
        let mut report = Vec::with_capacity(requested.len());
        for breakpoint in requested {
            match self.parse(breakpoint) {
                Ok(parsed) => {
                    let entry = table.entry(parsed.line).or_insert(parsed);
                    report.push(Breakpoint::verified(
                        entry.id,
                        entry.line,
                        Some(source.clone()),
                    ));
                }
                Err(message) => report.push(Breakpoint::unverified(
                    breakpoint.line,
                    Some(source.clone()),
                    Some(message),
                )),
            }
        }
        if table.is_empty() {
            self.sources.remove(key);
        } else {
            self.sources.insert(key.to_string(), table);
        }
        report
    }

    fn contains(&self, key: &str, line: u32) -> bool {
        self.sources
            .get(key)
            .is_some_and(|table| table.contains_key(&line))
    }

    fn get(&self, key: &str, line: u32) -> Option<LineBreakpoint> {
        self.sources.get(key)?.get(&line).cloned()
    }

    fn record_hit(&mut self, key: &str, line: u32) -> u64 {
        self.sources
            .get_mut(key)
            .and_then(|table| table.get_mut(&line))
            .map_or(0, |breakpoint| {
                breakpoint.hits = breakpoint.hits.saturating_add(1);
                breakpoint.hits
            })
    }

    fn verified(&self, key: &str, source: &Source) -> Vec<Breakpoint> {
        self.sources
            .get(key)
            .map(|table| {
                table
                    .values()
                    .map(|breakpoint| {
                        Breakpoint::verified(breakpoint.id, breakpoint.line, Some(source.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn clear(&mut self) {
        self.sources.clear();
    }
}

/// Parse a DAP hit condition; zero counts are rejected.
#[must_use]
pub fn parse_hit_condition(raw: &str) -> Option<HitCondition> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (op, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
        ("ge", rest)
    } else if let Some(rest) = trimmed.strip_prefix("==") {
        ("eq", rest)
    } else if let Some(rest) = trimmed.strip_prefix('>') {
        ("gt", rest)
    } else {
        ("eq", trimmed)
    };
    let value: u64 = rest.trim().parse().ok()?;
    if value == 0 {
        return None;
    }
    match op {
        "ge" => Some(HitCondition::AtLeast(value)),
        "gt" => Some(HitCondition::GreaterThan(value)),
        _ => Some(HitCondition::Equal(value)),
    }
}

/// Split a logpoint template into text and `{expression}` fragments.
///
/// `{{` and `}}` produce literal braces.
pub fn parse_log_message(template: &str) -> Result<Vec<LogFragment>, String> {
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                if !literal.is_empty() {
                    fragments.push(LogFragment::Text(std::mem::take(&mut literal)));
                }
                let mut expr = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    expr.push(next);
                }
                if !closed {
                    return Err("unterminated '{' in log message".to_string());
                }
                let expr = expr.trim();
                if expr.is_empty() {
                    return Err("empty log expression".to_string());
                }
                fragments.push(LogFragment::Expr(SmolStr::new(expr)));
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                literal.push('}');
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        fragments.push(LogFragment::Text(literal));
    }
    Ok(fragments)
}
