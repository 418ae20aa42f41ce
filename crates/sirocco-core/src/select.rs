//! Parser for frame and worldline selection expressions.
//!
//! Selections use the grammar `a-b,c,d`: comma-separated single indices and
//! closed ascending ranges, whitespace tolerated. The parsed list is sorted
//! and deduplicated.

use crate::error::CoreError;

fn invalid(expr: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidSelection {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

fn parse_list<T>(expr: &str) -> Result<Vec<T>, CoreError>
where
    T: std::str::FromStr + Ord + Copy,
    std::ops::RangeInclusive<T>: Iterator<Item = T>,
{
    if expr.trim().is_empty() {
        return Err(invalid(expr, "empty selection"));
    }
    let parse_one = |token: &str| {
        token
            .trim()
            .parse::<T>()
            .map_err(|_| invalid(expr, format!("invalid index {:?}", token.trim())))
    };
    let mut out = Vec::new();
    for item in expr.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(invalid(expr, "empty item"));
        }
        match item.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_one(lo)?;
                let hi = parse_one(hi)?;
                if lo > hi {
                    return Err(invalid(expr, format!("descending range {item:?}")));
                }
                out.extend(lo..=hi);
            }
            None => out.push(parse_one(item)?),
        }
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Parse a frame selection expression into a sorted, deduplicated index list.
///
/// # Errors
///
/// Returns [`CoreError::InvalidSelection`] on empty, malformed, or descending
/// items.
pub fn parse_frame_list(expr: &str) -> Result<Vec<usize>, CoreError> {
    parse_list(expr)
}

/// Parse a worldline selection expression into a sorted, deduplicated id
/// list.
///
/// # Errors
///
/// Returns [`CoreError::InvalidSelection`] on empty, malformed, or descending
/// items.
pub fn parse_worldline_list(expr: &str) -> Result<Vec<u32>, CoreError> {
    parse_list(expr)
}
