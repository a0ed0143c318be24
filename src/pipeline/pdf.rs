//! pdfium binding and document loading shared by both extractors.
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks while parsing. Every function here is synchronous and is
//! only ever called from inside `tokio::task::spawn_blocking`.

use crate::error::LectureError;
use pdfium_render::prelude::*;
use std::path::Path;

/// Bind to pdfium, from `lib_dir` when given, else from the system library path.
pub(crate) fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, LectureError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| LectureError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Open an in-memory PDF. Any parse failure is fatal for the run.
pub(crate) fn load_document<'a>(
    pdfium: &'a Pdfium,
    url: &str,
    bytes: Vec<u8>,
) -> Result<PdfDocument<'a>, LectureError> {
    pdfium
        .load_pdf_from_byte_vec(bytes, None)
        .map_err(|e| LectureError::CorruptPdf {
            url: url.to_string(),
            detail: format!("{:?}", e),
        })
}
