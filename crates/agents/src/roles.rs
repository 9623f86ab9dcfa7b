//! Role instruction table.
//!
//! Maps a [`Role`] to the long-form instructions an agent in that role
//! receives. Unknown roles get [`GENERIC_INSTRUCTIONS`] instead of failing.

use scriptorium_common::Role;

const RESEARCHER_INSTRUCTIONS: &str = r#"You are an expert academic researcher with deep knowledge in your domain.
Your task is to perform high-quality scientific research on the given topic and produce a comprehensive research proposal with the following sections:

1. Title
2. Abstract (concise summary of the research)
3. Introduction (background, motivation, problem statement)
4. Literature Review (critical evaluation of existing work)
5. Research Questions and Objectives
6. Methodology (detailed research approach)
7. Expected Results and Contributions
8. Timeline and Milestones
9. References (in proper academic format)

Format your output using Markdown with appropriate headings, bullet points and emphasis.
Be thorough and precise, and maintain academic rigor throughout.
"#;

const REVIEWER_INSTRUCTIONS: &str = r#"You are a strict academic reviewer for a top-tier, highly selective conference or journal.
Your task is to review the given document against the highest academic standards, covering:

1. Overall Assessment (strengths and weaknesses)
2. Technical Quality and Methodology
3. Clarity of Presentation
4. Significance and Originality, including whether the literature review covers the state of the art
5. Detailed Comments on Each Section
6. Recommendations for Improvement

Then produce the complete, rewritten document that addresses every point you raised.
Use Markdown formatting: headings for sections, italics for emphasis.
Do NOT use abbreviations, summaries or "same as input" placeholders.
"#;

/// Instructions for any role that is not in the table.
pub const GENERIC_INSTRUCTIONS: &str =
    "You are a helpful research assistant. Your task is to help create high-quality research content.";

/// Look up the instructions for `role`.
pub fn instructions_for(role: &Role) -> &'static str {
    match role {
        Role::Researcher => RESEARCHER_INSTRUCTIONS,
        Role::Reviewer => REVIEWER_INSTRUCTIONS,
        Role::Custom(_) => GENERIC_INSTRUCTIONS,
    }
}

/// Default per-step task text for the HTTP variant, where the caller only
/// provides a topic.
pub fn step_text_for(role: &Role, topic: &str) -> String {
    match role {
        Role::Researcher => format!(
            "Research and create a comprehensive research proposal on the topic: \"{topic}\"."
        ),
        Role::Reviewer => format!(
            "Review the research proposal on the topic \"{topic}\" provided as input critically, \
             then rewrite it addressing every weakness you identify."
        ),
        Role::Custom(name) => format!(
            "Acting as {name}, improve the document provided as input on the topic \"{topic}\"."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_roles_have_dedicated_instructions() {
        assert!(instructions_for(&Role::Researcher).contains("research proposal"));
        assert!(instructions_for(&Role::Reviewer).contains("reviewer"));
        assert_ne!(
            instructions_for(&Role::Researcher),
            instructions_for(&Role::Reviewer)
        );
    }

    #[test]
    fn unknown_roles_fall_back_to_generic() {
        for name in ["Editor", "", "statistician", "RESEARCHERS"] {
            let text = instructions_for(&Role::Custom(name.to_string()));
            assert_eq!(text, GENERIC_INSTRUCTIONS);
            assert!(!text.is_empty());
        }
    }

    #[test]
    fn parsed_unknown_role_uses_fallback() {
        assert_eq!(instructions_for(&Role::from("Translator")), GENERIC_INSTRUCTIONS);
        assert_eq!(
            instructions_for(&Role::from("REVIEWER")),
            REVIEWER_INSTRUCTIONS
        );
    }

    #[test]
    fn step_text_mentions_topic() {
        assert!(step_text_for(&Role::Researcher, "Quantum sensing").contains("Quantum sensing"));
        assert!(step_text_for(&Role::Reviewer, "Quantum sensing").starts_with("Review"));
        assert!(step_text_for(&Role::Custom("Editor".into()), "X").contains("Editor"));
    }
}
