//! Diagnostic bundles.
//!
//! A bundle is a zip of the artifacts a rendering run produced, written
//! even after a failed run for post-mortem analysis: the template media
//! type, the init script, the compiled program and the execution trace.
//! With the debug flag the template source and the rendered XML are
//! included as well.

use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::document::package::ArchiveError;
use crate::document::RenderReport;

/// Serializes `report` into bundle bytes. Artifacts the run never produced
/// are omitted.
pub fn write(report: &RenderReport, debug: bool) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut out);
        let options = FileOptions::default();

        let mut add = |name: &str, data: &[u8]| -> Result<(), ArchiveError> {
            zip.start_file(name, options)?;
            zip.write_all(data)?;
            Ok(())
        };

        if let Some(mime_type) = &report.template_mime_type {
            add("mimetype.txt", mime_type.as_bytes())?;
        }
        if let Some(init_script) = &report.init_script {
            add("init.lua", init_script.as_bytes())?;
        }
        if let Some(program) = &report.program {
            add("program.lua", program.as_bytes())?;
        }
        if !report.trace.is_empty() {
            let mut trace = report.trace.join("\n");
            trace.push('\n');
            add("trace.txt", trace.as_bytes())?;
        }
        if debug {
            if let Some(content) = &report.content_xml {
                add("content.xml", content.as_bytes())?;
            }
            if let Some(result) = &report.result_xml {
                add("result.xml", result.as_bytes())?;
            }
        }

        zip.finish()?;
    }
    Ok(out.into_inner())
}
