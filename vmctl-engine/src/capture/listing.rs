//! Parsers for tabular capture listings.
//!
//! Both the console (`info snapshots`) and the disk tool (`snapshot -l`)
//! print the same human table:
//!
//! ```text
//! ID        TAG               VM SIZE                DATE     VM CLOCK     ICOUNT
//! --        before-upgrade    1.21 GiB 2024-03-05 14:07:09 00:12:44.120
//! ```
//!
//! Older engines print the size as one token (`1.2G`) and newer ones as two
//! (`1.21 GiB`); both shapes are accepted. Lines that do not fit are skipped,
//! never escalated: a partial listing beats no listing.

use vmctl_core::{parse_capture_timestamp, StateCapture};

use crate::control::strip_control_sequences;

/// Columns a console row needs: id, name, size value, size unit, date, time.
pub const MIN_CONSOLE_COLUMNS: usize = 6;

/// Columns a disk-tool row needs: id, name.
pub const MIN_TOOL_COLUMNS: usize = 2;

const CONSOLE_HEADERS: &[&str] = &[
    "List of snapshots",
    "ID",
    "Snapshot list",
    "There is no snapshot",
    "QEMU ",
    "(qemu)",
];

const TOOL_HEADERS: &[&str] = &["Snapshot", "ID"];

const SIZE_UNITS: &[&str] = &[
    "B", "KiB", "MiB", "GiB", "TiB", "KB", "MB", "GB", "TB", "K", "M", "G", "T",
];

/// Parse the reply to `info snapshots`.
///
/// Tables of partial captures (present on only some disks, hence not
/// loadable) are skipped along with their headers.
#[must_use]
pub fn parse_console_listing(text: &str) -> Vec<StateCapture> {
    let cleaned = strip_control_sequences(text);
    let mut captures = Vec::new();
    let mut in_partial_table = false;

    for line in cleaned.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("List of partial") {
            in_partial_table = true;
            continue;
        }
        if line.starts_with("List of snapshots present") {
            in_partial_table = false;
            continue;
        }
        if in_partial_table || CONSOLE_HEADERS.iter().any(|h| line.starts_with(h)) {
            continue;
        }

        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < MIN_CONSOLE_COLUMNS {
            tracing::trace!(%line, "skipping short console listing row");
            continue;
        }
        captures.push(parse_row(&columns));
    }
    captures
}

/// Parse the output of `qemu-img snapshot -l`.
#[must_use]
pub fn parse_tool_listing(text: &str) -> Vec<StateCapture> {
    let cleaned = strip_control_sequences(text);
    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !TOOL_HEADERS.iter().any(|h| line.starts_with(h)))
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < MIN_TOOL_COLUMNS {
                tracing::trace!(%line, "skipping short tool listing row");
                return None;
            }
            Some(parse_row(&columns))
        })
        .collect()
}

/// Build a capture from a row with at least two columns.
fn parse_row(columns: &[&str]) -> StateCapture {
    let (size, rest) = match columns.get(2..) {
        Some([value, unit, rest @ ..]) if is_size_unit(unit) => {
            (Some(format!("{value} {unit}")), rest)
        }
        Some([value, rest @ ..]) => (Some((*value).to_owned()), rest),
        _ => (None, &[][..]),
    };
    let created_at = match rest {
        [date, time, ..] => parse_capture_timestamp(date, time),
        _ => None,
    };

    StateCapture::new(columns[1])
        .with_id(columns[0])
        .with_size(size)
        .with_created_at(created_at)
}

fn is_size_unit(token: &str) -> bool {
    SIZE_UNITS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSOLE_FIXTURE: &str = "\
List of snapshots present on all disks:\r\n\
ID        TAG               VM SIZE                DATE     VM CLOCK     ICOUNT\r\n\
--        before-upgrade    1.21 GiB 2024-03-05 14:07:09 00:12:44.120\r\n\
--        broken\r\n";

    const TOOL_FIXTURE: &str = "\
Snapshot list:
ID        TAG               VM SIZE                DATE     VM CLOCK     ICOUNT
1         before-upgrade    1.21 GiB 2024-03-05 14:07:09 00:12:44.120
2         clean-install          0 B 2024-03-01 09:00:00 00:00:00.000          0
";

    #[test]
    fn console_listing_keeps_well_formed_row_and_skips_short_one() {
        let captures = parse_console_listing(CONSOLE_FIXTURE);
        assert_eq!(captures.len(), 1, "header and malformed line must be dropped");
        let c = &captures[0];
        assert_eq!(c.name, "before-upgrade");
        assert_eq!(c.id.as_deref(), Some("--"));
        assert_eq!(c.size.as_deref(), Some("1.21 GiB"));
        assert_eq!(
            c.created_at.map(|t| t.to_string()).as_deref(),
            Some("2024-03-05 14:07:09")
        );
    }

    #[test]
    fn console_listing_strips_escapes_around_name() {
        let text = "--        \u{1b}[1mbefore-upgrade\u{1b}[0m    1.21 GiB 2024-03-05 14:07:09 00:12:44.120\r\n";
        let captures = parse_console_listing(text);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].name, "before-upgrade");
    }

    #[test]
    fn console_listing_with_no_snapshots_is_empty() {
        let captures = parse_console_listing("There is no snapshot available.\r\n");
        assert!(captures.is_empty());
    }

    #[test]
    fn console_listing_skips_partial_tables() {
        let text = "\
List of snapshots present on all disks:
ID        TAG               VM SIZE                DATE     VM CLOCK     ICOUNT
--        good              1.0 GiB 2024-03-05 14:07:09 00:00:01.000
List of partial (non-loadable) snapshots on 'drive1':
ID        TAG               VM SIZE                DATE     VM CLOCK     ICOUNT
1         half              0 B 2024-03-05 14:07:09 00:00:01.000
";
        let names: Vec<String> = parse_console_listing(text).into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["good"]);
    }

    #[test]
    fn unparsable_date_leaves_timestamp_absent() {
        let text = "--  x  1.0 GiB yesterday noon 00:00:01.000\n";
        let captures = parse_console_listing(text);
        assert_eq!(captures.len(), 1);
        assert!(captures[0].created_at.is_none());
    }

    #[test]
    fn single_token_size_shifts_date_columns() {
        let text = "1         old-style            1.2G 2019-06-01 08:30:00   00:00:05.000\n";
        let captures = parse_tool_listing(text);
        assert_eq!(captures[0].size.as_deref(), Some("1.2G"));
        assert_eq!(
            captures[0].created_at.map(|t| t.to_string()).as_deref(),
            Some("2019-06-01 08:30:00")
        );
    }

    #[test]
    fn tool_listing_parses_all_rows() {
        let captures = parse_tool_listing(TOOL_FIXTURE);
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[1].name, "clean-install");
        assert_eq!(captures[1].id.as_deref(), Some("2"));
        assert_eq!(captures[1].size.as_deref(), Some("0 B"));
        assert!(captures[1].created_at.is_some());
    }

    #[test]
    fn tool_listing_accepts_two_column_rows() {
        let captures = parse_tool_listing("7 bare\n8\n");
        assert_eq!(captures.len(), 1, "one-column row must be skipped");
        assert_eq!(captures[0].name, "bare");
        assert!(captures[0].size.is_none());
        assert!(captures[0].created_at.is_none());
    }

    #[test]
    fn console_and_tool_agree_on_names() {
        let console: Vec<String> = parse_console_listing(CONSOLE_FIXTURE)
            .into_iter()
            .map(|c| c.name)
            .collect();
        let tool: Vec<String> = parse_tool_listing(TOOL_FIXTURE)
            .into_iter()
            .map(|c| c.name)
            .take(1)
            .collect();
        assert_eq!(console, tool);
    }

    proptest::proptest! {
        #[test]
        fn proptest_parsers_never_panic(text in "\\PC*") {
            let _ = parse_console_listing(&text);
            let _ = parse_tool_listing(&text);
        }

        #[test]
        fn proptest_well_formed_console_row_round_trips_name(
            name in "[a-zA-Z0-9_.-]{1,24}",
        ) {
            proptest::prop_assume!(!name.starts_with("ID"));
            let row = format!("--  {name}  12.5 MiB 2024-01-02 03:04:05 00:00:00.001\n");
            let captures = parse_console_listing(&row);
            proptest::prop_assert_eq!(captures.len(), 1);
            proptest::prop_assert_eq!(&captures[0].name, &name);
        }
    }
}
