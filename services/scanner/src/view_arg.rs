//! Command-line syntax for view kinds.

use aggregation::ViewKind;
use fmrc_common::{parse_instant, ForecastOffset};

/// Parse `2d`, `best`, `run:<time>`, `offset:<hours>` or `valid:<time>`.
pub fn parse_view(s: &str) -> Result<ViewKind, String> {
    let s = s.trim();
    match s.to_lowercase().as_str() {
        "2d" | "twod" => return Ok(ViewKind::TwoD),
        "best" => return Ok(ViewKind::Best),
        _ => {}
    }

    let (kind, value) = s
        .split_once(':')
        .ok_or_else(|| format!("unknown view '{}'", s))?;

    match kind.to_lowercase().as_str() {
        "run" => parse_instant(value)
            .map(ViewKind::Slice)
            .map_err(|e| e.to_string()),
        "offset" => value
            .trim()
            .trim_end_matches(['h', 'H'])
            .parse::<i64>()
            .map(|h| ViewKind::ConstantOffset(ForecastOffset::from_hours(h)))
            .map_err(|e| format!("offset hours: {}", e)),
        "valid" => parse_instant(value)
            .map(ViewKind::ConstantValidTime)
            .map_err(|e| e.to_string()),
        _ => Err(format!("unknown view '{}'", kind)),
    }
}
