//! Tolerant parsing of raw FTP `LIST` output.
//!
//! Servers disagree about the LIST format, so three dialects are accepted:
//! Unix (`drwxr-xr-x ... name`), Windows (`MM-DD-YY HH:MMAM <DIR> name`) and
//! a generic fallback that treats any line carrying a `<DIR>` token as a
//! directory. Size columns vary too; several positions are tried and a parse
//! miss degrades to size 0 instead of failing the listing.

use chrono::NaiveDate;
use glob::Pattern;

/// One parsed line from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Parse a single LIST line, returning `None` for lines that carry no
/// usable entry.
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return None;
    }

    // Unix dialect: type is the first character of the permission column.
    if parts[0].starts_with('d') || parts[0].starts_with('-') {
        let is_dir = parts[0].starts_with('d');
        let name = if parts.len() >= 9 {
            parts[8..].join(" ")
        } else {
            parts.last()?.to_string()
        };
        if name == "." || name == ".." {
            return None;
        }
        let size = if is_dir { 0 } else { parse_size(&parts) };
        return Some(ListEntry { name, size, is_dir });
    }

    // Windows dialect: date, time, then <DIR> or a size column.
    if let Some(dir_index) = parts.iter().position(|p| *p == "<DIR>") {
        let name = if dir_index + 1 < parts.len() {
            parts[dir_index + 1..].join(" ")
        } else {
            return None;
        };
        return Some(ListEntry {
            name,
            size: 0,
            is_dir: true,
        });
    }

    // Generic fallback: an embedded <DIR> marker means directory, anything
    // else with enough columns is assumed to be a file.
    if parts.iter().any(|p| p.contains("<DIR>")) {
        let name = parts.last()?.to_string();
        return Some(ListEntry {
            name,
            size: 0,
            is_dir: true,
        });
    }

    if parts.len() >= 3 {
        let name = parts.last()?.to_string();
        let size = parse_size(&parts);
        return Some(ListEntry {
            name,
            size,
            is_dir: false,
        });
    }

    None
}

/// Try the size column positions seen across server dialects, in order.
/// Sizes are advisory; a miss falls back to 0 rather than failing the line.
fn parse_size(parts: &[&str]) -> u64 {
    for &position in &[4, 2, 3] {
        if let Some(part) = parts.get(position) {
            if let Ok(size) = part.parse::<u64>() {
                return size;
            }
        }
    }
    0
}

/// Accept a directory name only if it is exactly 8 ASCII digits and parses
/// as a real calendar date.
pub fn parse_date_dir(name: &str) -> Option<NaiveDate> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(name, "%Y%m%d").ok()
}

/// Inclusive date-only range check.
pub fn date_in_range(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start <= date && date <= end
}

/// Case-insensitive `.xml` extension check.
pub fn is_xml_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".xml")
}

/// Glob match supporting `*` and `?`. An unparsable pattern matches nothing.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_directory_line() {
        let entry =
            parse_list_line("drwxr-xr-x   2 ftp ftp      4096 Aug 01 12:00 20240801").unwrap();
        assert_eq!(entry.name, "20240801");
        assert!(entry.is_dir);
    }

    #[test]
    fn test_unix_file_line() {
        let entry =
            parse_list_line("-rw-r--r--   1 ftp ftp     51200 Aug 01 12:34 TCO_001_KMC_A.xml")
                .unwrap();
        assert_eq!(entry.name, "TCO_001_KMC_A.xml");
        assert_eq!(entry.size, 51200);
        assert!(!entry.is_dir);
    }

    #[test]
    fn test_unix_name_with_spaces() {
        let entry =
            parse_list_line("-rw-r--r--   1 ftp ftp       100 Aug 01 12:34 report final.xml")
                .unwrap();
        assert_eq!(entry.name, "report final.xml");
    }

    #[test]
    fn test_windows_directory_line() {
        let entry = parse_list_line("08-01-24  09:15AM       <DIR>          20240801").unwrap();
        assert_eq!(entry.name, "20240801");
        assert!(entry.is_dir);
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn test_windows_file_line() {
        let entry = parse_list_line("08-01-24  09:15AM            51200 data.xml").unwrap();
        assert_eq!(entry.name, "data.xml");
        assert_eq!(entry.size, 51200);
        assert!(!entry.is_dir);
    }

    #[test]
    fn test_size_position_fallback() {
        // Unix columns put the size at index 4.
        let unix = parse_list_line("-rw-r--r-- 1 ftp ftp 1234 Aug 01 12:34 a.xml").unwrap();
        assert_eq!(unix.size, 1234);

        // Windows columns put it at index 2.
        let windows = parse_list_line("08-01-24 09:15AM 5678 b.xml").unwrap();
        assert_eq!(windows.size, 5678);

        // No parsable size column degrades to 0, not a failure.
        let odd = parse_list_line("?? ?? c.xml").unwrap();
        assert_eq!(odd.size, 0);
        assert_eq!(odd.name, "c.xml");
    }

    #[test]
    fn test_dot_entries_skipped() {
        assert!(parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Aug 01 12:00 .").is_none());
        assert!(parse_list_line("drwxr-xr-x 2 ftp ftp 4096 Aug 01 12:00 ..").is_none());
        assert!(parse_list_line("").is_none());
    }

    #[test]
    fn test_parse_date_dir() {
        assert_eq!(
            parse_date_dir("20240801"),
            NaiveDate::from_ymd_opt(2024, 8, 1)
        );
        assert!(parse_date_dir("badname").is_none());
        assert!(parse_date_dir("2024080").is_none()); // 7 digits
        assert!(parse_date_dir("202408015").is_none()); // 9 digits
        assert!(parse_date_dir("20241335").is_none()); // month 13
        assert!(parse_date_dir("20240230").is_none()); // Feb 30
    }

    #[test]
    fn test_date_in_range_inclusive() {
        let start = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 8, 31).unwrap();
        assert!(date_in_range(start, start, end));
        assert!(date_in_range(end, start, end));
        assert!(!date_in_range(
            NaiveDate::from_ymd_opt(2024, 9, 5).unwrap(),
            start,
            end
        ));
    }

    #[test]
    fn test_is_xml_name() {
        assert!(is_xml_name("a.xml"));
        assert!(is_xml_name("A.XML"));
        assert!(is_xml_name("b.Xml"));
        assert!(!is_xml_name("a.xmls"));
        assert!(!is_xml_name("a.txt"));
        assert!(!is_xml_name("xml"));
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("TCO_*_KMC_*.xml", "TCO_001_KMC_A.xml"));
        assert!(glob_matches("?.xml", "a.xml"));
        assert!(!glob_matches("TCO_*.xml", "OTH_001.xml"));
    }
}
