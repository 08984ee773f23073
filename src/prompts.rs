//! Prompts for concall presentation analysis.
//!
//! The section titles come from [`Section::title`], the same source the
//! normaliser matches against, so the prompt and the parser cannot drift
//! apart.

use crate::output::Section;

/// System instruction sent ahead of the document.
pub const SYSTEM_PROMPT: &str = "You are an equity research analyst reading an investor \
presentation published alongside a quarterly earnings call. Write in a clear, professional \
tone suitable for investors. Prefer concrete numbers, timelines and named initiatives taken \
from the document over generic statements.";

/// Talking points per section.
fn section_focus(section: Section) -> &'static [&'static str] {
    match section {
        Section::Guidance => &[
            "Revenue and profit projections",
            "Growth targets and timelines",
            "Expansion plans and capex",
            "Market opportunities being targeted",
            "Strategic initiatives planned",
        ],
        Section::Achievements => &[
            "Recent financial performance",
            "Operational milestones achieved",
            "Market share gains or competitive advantages",
            "Product launches or innovations",
            "Awards, certifications, or recognitions",
        ],
        Section::Risks => &[
            "Market risks and competitive threats",
            "Regulatory or compliance challenges",
            "Supply chain or operational risks",
            "Financial risks (debt, forex, etc.)",
            "Industry-specific headwinds",
        ],
        Section::StrategicFocus => &[
            "Key priorities for the coming quarters",
            "Investment areas (R&D, technology, infrastructure)",
            "Sustainability and ESG initiatives",
            "Geographic or segment focus",
        ],
    }
}

/// Build the structured-extraction prompt for one company.
pub fn analysis_prompt(symbol: &str) -> String {
    let mut prompt = format!(
        "You are analyzing an investor presentation/concall document for {symbol}.\n\n\
         Provide an analysis in exactly four sections, in this order, each starting with \
         its numbered title on its own line exactly as written below:\n\n"
    );

    for (i, section) in Section::ALL.into_iter().enumerate() {
        let (min, max) = section.sentence_target();
        prompt.push_str(&format!(
            "{}. {} ({}-{} sentences):\n",
            i + 1,
            section.title(),
            min,
            max
        ));
        for point in section_focus(section) {
            prompt.push_str(&format!("   - {point}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Write each section as plain sentences, one per line, each ending with a full stop. \
         If the document says nothing relevant for a section, keep its title and leave the \
         section empty. Do not add any other sections, preamble or closing remarks.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_section_with_targets() {
        let p = analysis_prompt("BALKRISIND");
        assert!(p.contains("BALKRISIND"));
        assert!(p.contains("1. Future Guidance & Outlook (8-10 sentences)"));
        assert!(p.contains("2. Key Achievements & Highlights (8-10 sentences)"));
        assert!(p.contains("3. Risks & Challenges (8-10 sentences)"));
        assert!(p.contains("4. Strategic Focus Areas (6-8 sentences)"));
    }

    #[test]
    fn prompt_sections_in_order() {
        let p = analysis_prompt("TCS");
        let positions: Vec<usize> = Section::ALL
            .iter()
            .map(|s| p.find(s.title()).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }
}
