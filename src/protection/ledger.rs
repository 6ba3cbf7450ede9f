//! Text protection list.
//!
//! One rule per line:
//!
//! ```text
//! # spawn
//! 0,0
//! -16~15,-16~15     # inclusive range on both axes
//! 100~*,*           # x from 100 upwards, any z
//! ```
//!
//! `*` alone covers the whole axis; `a~*` and `*~b` are half-open. Ranges
//! may be written in either order. A rule with a single value on both axes
//! becomes a point, anything else a rectangle.

use std::fs;
use std::path::Path;

use log::debug;

use super::ProtectionIndex;
use crate::error::{PeelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Single(i32),
    Range(i32, i32),
}

impl Span {
    fn bounds(self) -> (i32, i32) {
        match self {
            Span::Single(v) => (v, v),
            Span::Range(a, b) => (a.min(b), a.max(b)),
        }
    }
}

fn parse_bound(text: &str, unbounded: i32, line: usize) -> Result<i32> {
    let text = text.trim();
    if text == "*" {
        return Ok(unbounded);
    }
    text.parse::<i32>().map_err(|_| PeelError::Ledger {
        line,
        reason: format!("'{text}' is not a chunk coordinate"),
    })
}

fn parse_span(text: &str, line: usize) -> Result<Span> {
    let text = text.trim();
    if text == "*" {
        return Ok(Span::Range(i32::MIN, i32::MAX));
    }
    match text.split_once('~') {
        Some((from, to)) => Ok(Span::Range(
            parse_bound(from, i32::MIN, line)?,
            parse_bound(to, i32::MAX, line)?,
        )),
        None => Ok(Span::Single(parse_bound(text, i32::MIN, line)?)),
    }
}

/// Parse one line. Blank and comment-only lines yield `None`.
fn parse_line(raw: &str, line: usize) -> Result<Option<(Span, Span)>> {
    let body = raw.split_once('#').map_or(raw, |(body, _)| body).trim();
    if body.is_empty() {
        return Ok(None);
    }
    let (x, z) = body.split_once(',').ok_or_else(|| PeelError::Ledger {
        line,
        reason: format!("expected 'x,z', got '{body}'"),
    })?;
    if z.contains(',') {
        return Err(PeelError::Ledger { line, reason: format!("too many fields in '{body}'") });
    }
    Ok(Some((parse_span(x, line)?, parse_span(z, line)?)))
}

/// Add every rule in `text` to `index`.
pub fn parse_protected_list(text: &str, mut index: ProtectionIndex) -> Result<ProtectionIndex> {
    for (n, raw) in text.lines().enumerate() {
        let Some((x, z)) = parse_line(raw, n + 1)? else { continue };
        index = match (x, z) {
            (Span::Single(x), Span::Single(z)) => index.add_point(x, z),
            _ => {
                let (x1, x2) = x.bounds();
                let (z1, z2) = z.bounds();
                index.add_rect(x1, z1, x2, z2)
            }
        };
    }
    Ok(index)
}

/// Read the protection list at `path` into `index`.
pub fn read_protected_list(path: &Path, index: ProtectionIndex) -> Result<ProtectionIndex> {
    let text = fs::read_to_string(path)?;
    let before = index.len();
    let index = parse_protected_list(&text, index)?;
    debug!("{}: {} protection rule(s)", path.display(), index.len() - before);
    Ok(index)
}
