//! Pipeline stages for slide-deck-to-lecture conversion.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own against in-memory fakes of the external services.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌──▶ text ──────┐
//! input ─────┤               ├──▶ narrate ──▶ speech ──▶ transcribe
//! (download) └──▶ render ────┘    (LLM)       (TTS)      (STT, terminal)
//!                 (pdfium, registers pages)
//! ```
//!
//! 1. [`input`]  — download the document and validate its magic bytes
//! 2. [`text`] / [`render`] — the two extractors; both run pdfium inside
//!    `spawn_blocking` and are joined before narration starts
//! 3. [`narrate`] — sequential, history-carrying narration; all-or-nothing
//! 4. [`speech`] — one MP3 per narration unit, reported as `audio_url`
//! 5. [`transcribe`] — one SRT per audio file, reported as `transcription`
//!
//! [`retry`] wraps every provider call; [`postprocess`] cleans narration
//! and subtitle text; [`encode`] handles PNG and base64 conversion.

pub mod encode;
pub mod input;
pub mod narrate;
pub(crate) mod pdf;
pub mod postprocess;
pub mod render;
pub mod retry;
pub mod speech;
pub mod text;
pub mod transcribe;
