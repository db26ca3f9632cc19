//! Metadata extraction seam.
//!
//! Binary decoders for the instrument formats live outside this system;
//! they are consumed as opaque extractors that either recognize a file and
//! return its metadata or return `None` ("not this format", never fatal).

use chrono::{DateTime, Utc};
use std::path::Path;

/// Metadata extracted from a primary instrument file.
///
/// Carries the stable identifiers the containment hierarchy is keyed on;
/// nothing here may come from wall-clock or random values.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Datatype label the extractor claims, e.g. "Dicom Files"
    pub datatype: String,
    /// Owning research-group key
    pub group_name: String,
    pub exp_name: String,
    pub subj_code: Option<String>,
    pub subj_firstname: Option<String>,
    pub subj_lastname: Option<String>,
    /// Stable exam identifier
    pub exam_uid: String,
    pub exam_no: i32,
    /// Stable series identifier
    pub series_uid: String,
    pub series_no: i32,
    pub acq_no: i32,
    pub series_desc: String,
    /// Acquisition protocol (pulse sequence) name
    pub psd_name: String,
    pub physio_flag: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
}

/// One opaque format decoder.
pub trait MetadataExtractor: Send + Sync {
    /// Datatype label for datasets this extractor identifies.
    fn datatype(&self) -> &'static str;

    /// `Some(metadata)` if the file is this format, `None` otherwise.
    /// Decode errors are swallowed here; an unreadable file is simply not
    /// this format.
    fn extract(&self, path: &Path) -> Option<Metadata>;
}

/// Priority-ordered extractor registry. The first extractor to recognize a
/// file wins.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn MetadataExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extractor: Box<dyn MetadataExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Identify a file, trying extractors in registration order.
    pub fn identify(&self, path: &Path) -> Option<Metadata> {
        self.extractors.iter().find_map(|e| e.extract(path))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubExtractor;
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Box::new(StubExtractor {
            datatype: "Dicom Files",
            extension: "dcm",
        }));
        registry.register(Box::new(StubExtractor {
            datatype: "K-Space Recording",
            extension: "dcm",
        }));

        let md = registry.identify(Path::new("scan.dcm")).unwrap();
        assert_eq!(md.datatype, "Dicom Files");
    }

    #[test]
    fn test_unrecognized_is_none() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Box::new(StubExtractor {
            datatype: "Dicom Files",
            extension: "dcm",
        }));
        assert!(registry.identify(Path::new("notes.txt")).is_none());
        assert!(ExtractorRegistry::new().identify(Path::new("scan.dcm")).is_none());
    }
}
