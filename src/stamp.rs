use std::fmt;

use chrono::{Local, NaiveDateTime, Timelike};

const FORMAT: &str = "%Y%m%d-%H%M%S";

/// Second resolution timestamp used to name dataset and chart files.
///
/// Rendered fixed width and zero padded (`20250101-090000`), so sorting file
/// names sorts them chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp(NaiveDateTime);

impl Stamp {
    pub fn now() -> Self {
        Stamp::from_datetime(Local::now().naive_local())
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        // Drop sub-second precision so the stamp round trips through its name.
        Stamp(datetime.with_nanosecond(0).unwrap_or(datetime))
    }

    /// Parses a file stem such as `20250101-090000`.
    pub fn parse(stem: &str) -> Option<Self> {
        if stem.len() != 15 {
            return None;
        }
        NaiveDateTime::parse_from_str(stem, FORMAT).ok().map(Stamp)
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self, extension)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::Stamp;

    #[test]
    fn formats_and_parses() {
        let dt = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_milli_opt(9, 0, 5, 750)
            .unwrap();
        let stamp = Stamp::from_datetime(dt);
        assert_eq!(stamp.to_string(), "20250101-090005");
        assert_eq!(stamp.file_name("csv"), "20250101-090005.csv");
        assert_eq!(Stamp::parse("20250101-090005"), Some(stamp));
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(Stamp::parse("prices"), None);
        assert_eq!(Stamp::parse("2025011-090005"), None);
        assert_eq!(Stamp::parse("20251301-090005"), None);
        assert_eq!(Stamp::parse("20250101-0900051"), None);
    }

    #[test]
    fn name_order_is_time_order() {
        let a = Stamp::parse("20241231-235959").unwrap();
        let b = Stamp::parse("20250101-000000").unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }
}
