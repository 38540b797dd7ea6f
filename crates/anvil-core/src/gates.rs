//! Artifact gates: parsers that check a task body for the markdown section
//! a transition requires before it may fire.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::GateError;

static VERDICT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Verdict:\s*(PASS|FAIL)\s*$").unwrap());

fn find_section<'a>(body: &'a str, heading: &str) -> Option<&'a str> {
    let marker = format!("## {heading}");
    let start = body.find(&marker)?;
    let after_heading = &body[start + marker.len()..];
    let end = after_heading
        .find("\n## ")
        .map(|offset| offset)
        .unwrap_or(after_heading.len());
    Some(&after_heading[..end])
}

fn section_has_any_marker(section: &str, markers: &[&str]) -> bool {
    section
        .lines()
        .any(|line| markers.iter().any(|marker| line.trim_start().starts_with(marker)))
}

/// Validate the `## Plan` section: requires `APPROACH:` or `TOUCHING:`.
pub fn check_plan(body: &str) -> Result<(), GateError> {
    const MARKERS: &[&str] = &["APPROACH:", "TOUCHING:"];
    let section = find_section(body, "Plan").ok_or(GateError::MissingSection { section: "Plan" })?;
    if section_has_any_marker(section, MARKERS) {
        Ok(())
    } else {
        Err(GateError::MissingMarker {
            section: "Plan",
            markers: MARKERS,
        })
    }
}

/// Validate the `## Handoff` section: requires at least one of the four
/// handoff markers.
pub fn check_handoff(body: &str) -> Result<(), GateError> {
    const MARKERS: &[&str] = &["DONE:", "REMAINING:", "DECISIONS:", "UNCERTAIN:"];
    let section = find_section(body, "Handoff").ok_or(GateError::MissingSection { section: "Handoff" })?;
    if section_has_any_marker(section, MARKERS) {
        Ok(())
    } else {
        Err(GateError::MissingMarker {
            section: "Handoff",
            markers: MARKERS,
        })
    }
}

/// The outcome a `## Review` section records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    Pass,
    Fail,
}

/// Validate the `## Review` section and extract its verdict.
pub fn check_review(body: &str) -> Result<ReviewVerdict, GateError> {
    let section = find_section(body, "Review").ok_or(GateError::MissingSection { section: "Review" })?;
    let captures = VERDICT_RE
        .captures(section)
        .ok_or(GateError::MissingMarker {
            section: "Review",
            markers: &["Verdict: PASS", "Verdict: FAIL"],
        })?;
    match captures.get(1).map(|m| m.as_str().to_uppercase()) {
        Some(v) if v == "PASS" => Ok(ReviewVerdict::Pass),
        Some(v) if v == "FAIL" => Ok(ReviewVerdict::Fail),
        _ => Err(GateError::MissingMarker {
            section: "Review",
            markers: &["Verdict: PASS", "Verdict: FAIL"],
        }),
    }
}
