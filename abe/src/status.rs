//! The one stdout line ancillary programs print for their shell wrapper.
//!
//! ```text
//! Edit return status:<a>,<b>
//! ```
//!
//! Under a session the same outcome also goes back through the segment.

use pfm_io::{report_result, AbeShareSegment, ChildResult};

/// Prefix of the status line.
pub const EDIT_RETURN_STATUS_PREFIX: &str = "Edit return status:";

/// Format the status line (without a trailing newline).
pub fn format_edit_return_status(a: i32, b: i32) -> String {
    format!("{}{},{}", EDIT_RETURN_STATUS_PREFIX, a, b)
}

/// Parse a status line. `None` for anything else.
pub fn parse_edit_return_status(line: &str) -> Option<(i32, i32)> {
    let rest = line.trim_end().strip_prefix(EDIT_RETURN_STATUS_PREFIX)?;
    let (a, b) = rest.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Report a filter run to the parent session and mark it finished.
///
/// `invalidated` is `None` when the run failed. The parent is still told
/// there is nothing to re-read so it stops waiting on the child.
pub fn report_filter_status(segment: &AbeShareSegment, invalidated: Option<usize>) {
    segment.set_progress(100);
    let result = match invalidated {
        Some(n) if n > 0 => ChildResult::AreaInvalidated,
        _ => ChildResult::NoActionRequired,
    };
    report_result(segment, &result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfm_io::{take_result, ShareConfig};

    #[test]
    fn test_format() {
        assert_eq!(format_edit_return_status(1, 42), "Edit return status:1,42");
        assert_eq!(format_edit_return_status(-1, 0), "Edit return status:-1,0");
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse_edit_return_status("Edit return status:1,42\n"), Some((1, 42)));
        assert_eq!(parse_edit_return_status("Edit return status:-1,0"), Some((-1, 0)));
        assert_eq!(parse_edit_return_status("Edit return status:1"), None);
        assert_eq!(parse_edit_return_status("Edit status:1,2"), None);
        assert_eq!(parse_edit_return_status("Edit return status:x,2"), None);
    }

    #[test]
    fn test_report_filter_status() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ShareConfig::new(dir.path());
        let parent = AbeShareSegment::create(41, &cfg).unwrap();
        let child = AbeShareSegment::attach(41, &cfg).unwrap();

        report_filter_status(&child, Some(12));
        assert_eq!(take_result(&parent), Some(ChildResult::AreaInvalidated));
        assert_eq!(parent.progress(), 100);

        report_filter_status(&child, Some(0));
        assert_eq!(take_result(&parent), Some(ChildResult::NoActionRequired));
    }

    #[test]
    fn test_failed_run_still_reports() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ShareConfig::new(dir.path());
        let parent = AbeShareSegment::create(42, &cfg).unwrap();
        let child = AbeShareSegment::attach(42, &cfg).unwrap();
        child.set_progress(30);

        report_filter_status(&child, None);
        assert_eq!(parent.progress(), 100);
        assert_eq!(take_result(&parent), Some(ChildResult::NoActionRequired));
        assert_eq!(take_result(&parent), None);
    }
}
