//! Post-processing: deterministic cleanup of generated narration and subtitles.
//!
//! ## Why is post-processing necessary?
//!
//! Narration text goes straight to a speech synthesiser, so anything a
//! chat model adds for a *reader* gets read aloud: markdown fences, `**`
//! emphasis markers, `# headings`, a leading `Slide 3:` label, zero-width
//! characters. These rules strip that residue without touching the words.
//!
//! Subtitle files come back from the transcription service with whatever
//! line endings and BOM it chose; [`normalise_srt`] makes them uniform.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised so the fence
//! regex sees the raw payload; per-line rules run before blank-line
//! collapsing so emptied lines are collapsed too.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every narration cleanup rule.
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Drop a leading `Slide N:` / `Lecture for slide N:` label
/// 5. Strip heading and bullet markers at line start
/// 6. Strip emphasis markers (`**`, `__`, `` ` ``)
/// 7. Collapse runs of spaces and tabs, trim each line
/// 8. Collapse blank-line runs to one blank line and trim the whole text
pub fn clean_narration(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = strip_slide_label(&s);
    let s = strip_line_markers(&s);
    let s = strip_emphasis(&s);
    let s = collapse_inline_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

/// Normalise an SRT payload: no BOM, LF line endings, no trailing
/// whitespace, exactly one final newline.
pub fn normalise_srt(input: &str) -> String {
    let s = input.trim_start_matches('\u{FEFF}');
    let s = normalise_line_endings(s);
    let s = s
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    ensure_final_newline(&s)
}

/// Number of cues (timing lines) in an SRT payload.
pub fn count_cues(srt: &str) -> usize {
    srt.lines().filter(|l| RE_SRT_TIMING.is_match(l)).count()
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:[a-zA-Z]+)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Drop a leading slide label ───────────────────────────────────────

static RE_SLIDE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*|#+\s*)?(?:lecture\s+for\s+)?slide\s+\d+\s*(?:\*\*)?\s*[:.\-]\s*(?:\*\*)?\s*")
        .unwrap()
});

fn strip_slide_label(input: &str) -> String {
    RE_SLIDE_LABEL.replace(input, "").to_string()
}

// ── Rule 5: Strip heading and bullet markers ────────────────────────────────

static RE_LINE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]+|[-*+][ \t]+|>[ \t]?)").unwrap());

fn strip_line_markers(input: &str) -> String {
    RE_LINE_MARKER.replace_all(input, "").to_string()
}

// ── Rule 6: Strip emphasis markers ──────────────────────────────────────────

static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|`").unwrap());

fn strip_emphasis(input: &str) -> String {
    RE_EMPHASIS.replace_all(input, "").to_string()
}

// ── Rule 7: Collapse inline whitespace ──────────────────────────────────────

static RE_INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

fn collapse_inline_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| RE_INLINE_WS.replace_all(line.trim(), " ").to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 8: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── SRT helpers ─────────────────────────────────────────────────────────────

static RE_SRT_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2}:\d{2}:\d{2},\d{3} --> \d{2}:\d{2}:\d{2},\d{3}").unwrap()
});

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
