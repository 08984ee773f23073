//! The structured summary returned to callers and kept in the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One of the four summary sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Guidance,
    Achievements,
    Risks,
    StrategicFocus,
}

impl Section {
    /// All sections in prompt order.
    pub const ALL: [Section; 4] = [
        Section::Guidance,
        Section::Achievements,
        Section::Risks,
        Section::StrategicFocus,
    ];

    /// Header text the model is asked to emit.
    pub fn title(self) -> &'static str {
        match self {
            Section::Guidance => "Future Guidance & Outlook",
            Section::Achievements => "Key Achievements & Highlights",
            Section::Risks => "Risks & Challenges",
            Section::StrategicFocus => "Strategic Focus Areas",
        }
    }

    /// Requested sentence count range `(min, max)`.
    pub fn sentence_target(self) -> (usize, usize) {
        match self {
            Section::StrategicFocus => (6, 8),
            _ => (8, 10),
        }
    }
}

/// Four-section summary of a concall presentation.
///
/// Every sequence is present (possibly empty) and holds no blank entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub guidance: Vec<String>,
    pub achievements: Vec<String>,
    pub risks: Vec<String>,
    pub strategic_focus: Vec<String>,
    /// Quarter label of the source presentation (URL when unlabeled).
    pub source_label: String,
    pub generated_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn section(&self, section: Section) -> &[String] {
        match section {
            Section::Guidance => &self.guidance,
            Section::Achievements => &self.achievements,
            Section::Risks => &self.risks,
            Section::StrategicFocus => &self.strategic_focus,
        }
    }

    /// Sections the model left empty.
    pub fn empty_sections(&self) -> Vec<Section> {
        Section::ALL
            .into_iter()
            .filter(|s| self.section(*s).is_empty())
            .collect()
    }

    /// Render as Markdown, one bullet per sentence.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Concall summary — {}\n", self.source_label);
        for section in Section::ALL {
            let _ = writeln!(md, "## {}\n", section.title());
            let sentences = self.section(section);
            if sentences.is_empty() {
                md.push_str("_Not covered in the presentation._\n\n");
                continue;
            }
            for sentence in sentences {
                let _ = writeln!(md, "- {sentence}");
            }
            md.push('\n');
        }
        let _ = writeln!(
            md,
            "_Generated {}_",
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        );
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> AnalysisResult {
        AnalysisResult {
            guidance: vec!["Revenue to grow 15% in FY25.".into()],
            achievements: vec!["Volumes rose 8%.".into(), "EBITDA margin hit 24%.".into()],
            risks: vec![],
            strategic_focus: vec!["Expanding OTR capacity.".into()],
            source_label: "Nov 2024".into(),
            generated_at: Utc.with_ymd_and_hms(2024, 11, 20, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn markdown_lists_every_section_in_order() {
        let md = sample().to_markdown();
        let g = md.find("Future Guidance & Outlook").unwrap();
        let a = md.find("Key Achievements & Highlights").unwrap();
        let r = md.find("Risks & Challenges").unwrap();
        let s = md.find("Strategic Focus Areas").unwrap();
        assert!(g < a && a < r && r < s);
        assert!(md.contains("- EBITDA margin hit 24%."));
        assert!(md.contains("_Not covered in the presentation._"));
        assert!(md.contains("2024-11-20 09:30 UTC"));
    }

    #[test]
    fn empty_sections_reported() {
        assert_eq!(sample().empty_sections(), vec![Section::Risks]);
    }

    #[test]
    fn serialises_with_snake_case_fields() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("strategic_focus").is_some());
        assert_eq!(json["source_label"], "Nov 2024");
    }
}
