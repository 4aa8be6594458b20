//! Query plan for the case-file table.
//!
//! A [`FileQuery`] captures which files take part in a search. The Postgres
//! store renders it to SQL; the in-memory store evaluates it directly. Both
//! must agree on [`FileQuery::admits`] and on the shared-hash rule.

use std::collections::BTreeSet;
use std::fmt;

use correlation_types::KnownStatus;

/// MD5 of zero-length input. Empty files never correlate.
pub const NO_DATA_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

pub fn is_no_data_md5(md5: &str) -> bool {
    md5.eq_ignore_ascii_case(NO_DATA_MD5)
}

pub const MEDIA_MIME_TYPES: &[&str] = &[
    "image/bmp",
    "image/gif",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/webp",
    "image/x-icon",
    "image/vnd.microsoft.icon",
    "image/vnd.adobe.photoshop",
    "image/x-ms-bmp",
    "image/x-raw-nikon",
    "image/x-portable-bitmap",
    "image/x-portable-graymap",
    "image/x-xbitmap",
    "image/x-rgb",
    "video/webm",
    "video/3gpp",
    "video/3gpp2",
    "video/ogg",
    "video/mpeg",
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-flv",
    "video/x-m4v",
    "video/x-ms-wmv",
];

pub const DOCUMENT_MIME_TYPES: &[&str] = &[
    "text/plain",
    "text/css",
    "text/html",
    "text/csv",
    "application/rtf",
    "application/pdf",
    "application/xhtml+xml",
    "application/x-msoffice",
    "application/msword",
    "application/msword2",
    "application/vnd.wordperfect",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.ms-excel.sheet.4",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.presentation",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.text",
];

/// Category filters chosen for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MimeFilter {
    pub media: bool,
    pub documents: bool,
}

impl MimeFilter {
    pub fn new(media: bool, documents: bool) -> Self {
        Self { media, documents }
    }

    /// Allow-list for the active categories; `None` when nothing restricts.
    pub fn allow_list(&self) -> Option<BTreeSet<String>> {
        if !self.media && !self.documents {
            return None;
        }

        let mut types = BTreeSet::new();
        if self.media {
            types.extend(MEDIA_MIME_TYPES.iter().map(|t| t.to_string()));
        }
        if self.documents {
            types.extend(DOCUMENT_MIME_TYPES.iter().map(|t| t.to_string()));
        }
        Some(types)
    }

    pub fn label(&self) -> &'static str {
        match (self.media, self.documents) {
            (true, true) => "Media, Documents",
            (true, false) => "Media",
            (false, true) => "Documents",
            (false, false) => "All File Types",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileQuery {
    /// Only hashes present in this data source qualify.
    pub data_source: Option<i64>,
    pub mime_types: Option<BTreeSet<String>>,
}

impl FileQuery {
    pub fn new(data_source: Option<i64>, filter: MimeFilter) -> Self {
        Self {
            data_source,
            mime_types: filter.allow_list(),
        }
    }

    /// Known-status and mime restriction shared by every file query.
    pub fn admits(&self, known: KnownStatus, mime_type: Option<&str>) -> bool {
        if known == KnownStatus::Known {
            return false;
        }
        match &self.mime_types {
            Some(allowed) => mime_type.is_some_and(|mime| allowed.contains(mime)),
            None => true,
        }
    }
}

impl fmt::Display for FileQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "known != known-good")?;
        if let Some(ds) = self.data_source {
            write!(f, " AND data_source = {ds}")?;
        }
        if let Some(types) = &self.mime_types {
            write!(f, " AND mime_type IN ({} types)", types.len())?;
        }
        write!(f, " GROUP BY md5 HAVING COUNT(DISTINCT data_source) > 1")
    }
}
