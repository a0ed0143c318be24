//! Prompts for lecture narration.
//!
//! Every prompt lives here so a wording change touches one place, and so
//! tests can inspect the exact request text without calling a provider.
//! Callers can override the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`].

/// Default system prompt for narrating a slide deck as a spoken lecture.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an experienced university lecturer recording a video lecture over a slide deck.

For each slide you are given, write the words you would say aloud while that slide is on screen.

1. LENGTH
   - Aim for roughly one minute of speech (about 130-160 words)

2. CONTINUITY
   - The lecture so far is provided; continue from it naturally
   - Do not greet the audience again or re-introduce topics already covered
   - Refer back to earlier slides when it helps understanding

3. SPOKEN STYLE
   - Plain sentences only, written to be read aloud
   - No markdown, bullet points, headings, or emphasis markers
   - Spell out symbols and abbreviations the way a speaker would say them
   - Do not say "this slide says" or read the slide text verbatim

4. OUTPUT FORMAT
   - Output ONLY the narration
   - Do NOT prefix it with "Slide N" or any label"#;

/// Header prepended to every history entry.
///
/// The history is a growing transcript of everything narrated so far for
/// the current document.
pub fn history_entry(page_number: usize, narration: &str) -> String {
    format!("\n\nLecture for slide {}:\n{}", page_number, narration)
}

/// Build the user request for one slide.
///
/// The request contains the full lecture history followed by the current
/// slide's extracted text.
pub fn narration_request(history: &str, page_number: usize, slide_text: &str) -> String {
    format!(
        "Here is the lecture so far: {}.\nNow, generate a lecture speech for slide {}: {}",
        history,
        page_number,
        slide_text.trim()
    )
}
