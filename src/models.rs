//! Core data models: document records and insight kinds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::slug::Slug;

/// Descriptive record for one uploaded syllabus, as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub slug: Slug,
    /// Filename as supplied by the uploader.
    pub filename: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub quarter: String,
    #[serde(default)]
    pub year: Option<i32>,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Title if present, else course code, else the original filename.
    pub fn display_name(&self) -> &str {
        if !self.title.trim().is_empty() {
            &self.title
        } else if !self.course_code.trim().is_empty() {
            &self.course_code
        } else {
            &self.filename
        }
    }
}

/// Fields supplied with an upload, before a slug has been assigned.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub filename: String,
    /// Explicit slug request; derived from the other fields when absent.
    pub slug: Option<String>,
    pub title: String,
    pub course_code: String,
    pub instructor: String,
    pub quarter: String,
    pub year: Option<i32>,
}

impl NewDocument {
    /// Text the slug is derived from when none was requested explicitly.
    ///
    /// Course fields win (`course_code-instructor-quarter-year`), then the
    /// title, then the filename stem.
    pub fn slug_source(&self) -> String {
        if let Some(explicit) = self.slug.as_deref().filter(|s| !s.trim().is_empty()) {
            return explicit.to_string();
        }
        if !self.course_code.trim().is_empty() {
            let year = self.year.map(|y| y.to_string()).unwrap_or_default();
            return [
                self.course_code.as_str(),
                self.instructor.as_str(),
                self.quarter.as_str(),
                year.as_str(),
            ]
            .iter()
            .filter(|part| !part.trim().is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("-");
        }
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        std::path::Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The closed set of derived-text categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InsightKind {
    Summary,
    Workload,
    Grading,
    Prereqs,
}

impl InsightKind {
    pub const ALL: [InsightKind; 4] = [
        InsightKind::Summary,
        InsightKind::Workload,
        InsightKind::Grading,
        InsightKind::Prereqs,
    ];

    /// Canonical key, used in URLs and cache file names.
    pub fn key(self) -> &'static str {
        match self {
            InsightKind::Summary => "summary",
            InsightKind::Workload => "workload",
            InsightKind::Grading => "grading",
            InsightKind::Prereqs => "prereqs",
        }
    }

    /// Tab label for the detail page.
    pub fn label(self) -> &'static str {
        match self {
            InsightKind::Summary => "TLDR",
            InsightKind::Workload => "Workload",
            InsightKind::Grading => "Grading",
            InsightKind::Prereqs => "Prereqs",
        }
    }
}

impl fmt::Display for InsightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for InsightKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" | "tldr" => Ok(InsightKind::Summary),
            "workload" => Ok(InsightKind::Workload),
            "grading" => Ok(InsightKind::Grading),
            "prereqs" | "prerequisites" => Ok(InsightKind::Prereqs),
            other => Err(Error::UnknownInsightKind(other.to_string())),
        }
    }
}
