//! Physiological recording lookup for the find stage.
//!
//! Recording files are dropped into one flat archive directory, named
//! `<tag>_<YYYYmmdd>_<HHMMSS>` plus an arbitrary extension, where the tag is
//! the acquisition protocol name of the scan the recording belongs to.
//! Matching is by tag plus a timestamp inside the scan's time window.

use crate::error::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use std::path::{Path, PathBuf};

/// Parse `<tag>_<YYYYmmdd>_<HHMMSS>` out of a file name, ignoring any
/// extension. Tags may themselves contain underscores.
pub fn parse_name(name: &str) -> Option<(&str, NaiveDateTime)> {
    let stem = name.split('.').next()?;
    let mut parts = stem.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;
    let tag = parts.next()?;
    if tag.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H%M%S").ok()?;
    Some((tag, NaiveDateTime::new(date, time)))
}

/// Recordings in `archive` whose tag equals `psd` and whose timestamp falls
/// within `[start, start + duration]`. A missing or empty archive yields an
/// empty list, not an error.
pub fn find_recordings(
    archive: &Path,
    psd: &str,
    start: DateTime<Utc>,
    duration_secs: f64,
) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(archive) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let window_start = start.naive_utc();
    let window_end = window_start + TimeDelta::milliseconds((duration_secs * 1000.0) as i64);

    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some((tag, at)) = parse_name(name) {
            if tag == psd && at >= window_start && at <= window_end {
                matches.push(entry.path());
            }
        }
    }
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_name() {
        let (tag, at) = parse_name("epi_20120601_103000.physio.tgz").unwrap();
        assert_eq!(tag, "epi");
        assert_eq!(
            at,
            NaiveDate::from_ymd_opt(2012, 6, 1)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_parse_name_tag_with_underscores() {
        let (tag, _) = parse_name("mux_epi2_20120601_103000.csv").unwrap();
        assert_eq!(tag, "mux_epi2");
    }

    #[test]
    fn test_parse_name_rejects_malformed() {
        assert!(parse_name("readme.txt").is_none());
        assert!(parse_name("epi_2012_103000").is_none());
        assert!(parse_name("epi_20120601_late").is_none());
        assert!(parse_name("_20120601_103000").is_none());
    }

    #[test]
    fn test_find_recordings_window_and_tag() {
        let archive = tempfile::tempdir().unwrap();
        for name in [
            "epi_20120601_103000.physio", // at start
            "epi_20120601_103430.physio", // inside window
            "epi_20120601_103500.physio", // at end
            "epi_20120601_103501.physio", // past end
            "epi_20120601_102959.physio", // before start
            "fse_20120601_103100.physio", // wrong tag
            "notes.txt",                  // not a recording
        ] {
            std::fs::write(archive.path().join(name), b"x").unwrap();
        }

        let start = Utc.with_ymd_and_hms(2012, 6, 1, 10, 30, 0).unwrap();
        let found = find_recordings(archive.path(), "epi", start, 300.0).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "epi_20120601_103000.physio",
                "epi_20120601_103430.physio",
                "epi_20120601_103500.physio",
            ]
        );
    }

    #[test]
    fn test_missing_archive_is_empty() {
        let start = Utc.with_ymd_and_hms(2012, 6, 1, 10, 30, 0).unwrap();
        let found =
            find_recordings(Path::new("/nonexistent/physio"), "epi", start, 60.0).unwrap();
        assert!(found.is_empty());
    }
}
