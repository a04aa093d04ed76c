//! Output finalization

use crate::{OverlayError, Result};
use pdf_core::Canvas;
use std::io::Write;

/// Serialize the canvas and write every byte to `sink`.
///
/// The output is produced in memory first; `sink` sees nothing when
/// serialization fails.
pub fn finalize(canvas: Box<dyn Canvas>, sink: &mut dyn Write) -> Result<()> {
    let bytes = canvas.finish().map_err(OverlayError::Render)?;
    log::debug!("finalized {} bytes", bytes.len());
    sink.write_all(&bytes)?;
    sink.flush()?;
    Ok(())
}
