//! Publication date extraction from list-page text.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

/// `YYYY-MM-DD`, `YYYY/M/D`, `YYYY.MM.DD`.
#[allow(clippy::expect_used)]
static SEPARATED_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("separated date regex is valid")
});

/// `YYYYMMDD`.
#[allow(clippy::expect_used)]
static COMPACT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})(\d{2})(\d{2})").expect("compact date regex is valid")
});

/// Cell lengths (in chars) considered for a date column.
const DATE_CELL_CHARS: std::ops::RangeInclusive<usize> = 8..=12;

/// Finds the first valid calendar date in `text`, normalized to `YYYY-MM-DD`.
#[must_use]
pub fn extract_date(text: &str) -> Option<String> {
    for pattern in [&*SEPARATED_DATE, &*COMPACT_DATE] {
        for caps in pattern.captures_iter(text) {
            let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
            let month = caps.get(2)?.as_str().parse::<u32>().ok()?;
            let day = caps.get(3)?.as_str().parse::<u32>().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }
    }
    None
}

/// Picks a date from table cells, considering only cells shaped like a date.
#[must_use]
pub fn date_from_cells<'a>(cells: impl IntoIterator<Item = &'a str>) -> Option<String> {
    cells
        .into_iter()
        .map(str::trim)
        .filter(|cell| DATE_CELL_CHARS.contains(&cell.chars().count()))
        .find_map(extract_date)
}

/// Today's local date as `YYYY-MM-DD`.
#[must_use]
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_separated_formats() {
        assert_eq!(extract_date("2024-03-05").as_deref(), Some("2024-03-05"));
        assert_eq!(extract_date("2024/3/5").as_deref(), Some("2024-03-05"));
        assert_eq!(extract_date("发布于 2024.12.31").as_deref(), Some("2024-12-31"));
    }

    #[test]
    fn test_extracts_compact_format() {
        assert_eq!(extract_date("20240305").as_deref(), Some("2024-03-05"));
    }

    #[test]
    fn test_rejects_impossible_dates() {
        assert_eq!(extract_date("2024-13-01"), None);
        assert_eq!(extract_date("20241340"), None);
        assert_eq!(extract_date("no date here"), None);
    }

    #[test]
    fn test_skips_invalid_match_for_later_valid_one() {
        assert_eq!(
            extract_date("2024-99-99 then 2023-01-02").as_deref(),
            Some("2023-01-02")
        );
    }

    #[test]
    fn test_cells_outside_date_shape_are_ignored() {
        let cells = ["宏观经济 2024-01-01 展望报告", "12", "2024-02-03"];
        assert_eq!(date_from_cells(cells).as_deref(), Some("2024-02-03"));
    }

    #[test]
    fn test_today_format() {
        let today = today();
        assert_eq!(today.len(), 10);
        assert!(extract_date(&today).is_some());
    }
}
