//! Multipart body assembly.
//!
//! Merges the payload categories (request arguments, own arguments,
//! static files, selected dynamic files, variable files) into one ordered
//! multipart body. The body is built once into owned buffers and can then
//! be serialized repeatedly: once as a `reqwest::multipart::Form` for the
//! wire and once as the loggable copy stored on the sample result, where
//! literal file bytes can be suppressed behind a placeholder.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::content_cache::{CacheError, FileContentCache};
use crate::files::{Argument, FileReference, VariableFileEntry};
use crate::router::{select_attachments, PayloadGates};

/// Placeholder substituted for file bytes in the loggable body when
/// "log file contents" is off.
pub const FILE_CONTENT_PLACEHOLDER: &str = "<actual file content, not shown here>";

/// Whole-body placeholder used when the posted body cannot be reproduced
/// as text (file bytes are not valid UTF-8 while logging of contents is
/// requested).
pub const BODY_NOT_VIEWABLE: &str = "<Multipart was not repeatable, cannot view what was sent>";

/// Boundary used only for the loggable rendering; the wire form generates
/// its own.
const LOG_BOUNDARY: &str = "----multipart-sampler-boundary";

/// Errors that can occur when serializing the body for the wire.
#[derive(Error, Debug)]
pub enum BodyError {
    #[error("invalid MIME type '{mime_type}' for part '{field_name}'")]
    InvalidMimeType {
        field_name: String,
        mime_type: String,
    },
}

/// Content of one part: either argument text or file bytes.
#[derive(Debug, Clone)]
enum PartContent {
    Text(String),
    File {
        bytes: Arc<[u8]>,
        file_name: String,
        mime_type: String,
    },
}

/// One multipart part with its field name.
#[derive(Debug, Clone)]
pub struct BodyPart {
    field_name: String,
    content: PartContent,
}

impl BodyPart {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn is_file(&self) -> bool {
        matches!(self.content, PartContent::File { .. })
    }

    /// File name for file parts, None for text parts.
    pub fn file_name(&self) -> Option<&str> {
        match &self.content {
            PartContent::File { file_name, .. } => Some(file_name),
            PartContent::Text(_) => None,
        }
    }
}

/// An assembled multipart body, serializable more than once.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    parts: Vec<BodyPart>,
}

impl MultipartBody {
    pub fn parts(&self) -> &[BodyPart] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Build the wire form. Can be called again to rebuild the body for a
    /// retried send; the parts own their buffers.
    pub fn to_form(&self) -> Result<reqwest::multipart::Form, BodyError> {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.parts {
            let wire_part = match &part.content {
                PartContent::Text(value) => reqwest::multipart::Part::text(value.clone()),
                PartContent::File {
                    bytes,
                    file_name,
                    mime_type,
                } => reqwest::multipart::Part::bytes(bytes.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(mime_type)
                    .map_err(|_| BodyError::InvalidMimeType {
                        field_name: part.field_name.clone(),
                        mime_type: mime_type.clone(),
                    })?,
            };
            form = form.part(part.field_name.clone(), wire_part);
        }
        Ok(form)
    }

    /// Render the loggable copy of the body.
    ///
    /// With `log_file_contents` off, every file part's bytes are replaced
    /// by [`FILE_CONTENT_PLACEHOLDER`] while the wire body still carries
    /// the real bytes. With it on, file bytes are included verbatim; if
    /// any file is not valid UTF-8 the body cannot be reproduced as text
    /// and the whole rendering degrades to [`BODY_NOT_VIEWABLE`].
    pub fn loggable(&self, log_file_contents: bool) -> String {
        let mut out = String::new();
        for part in &self.parts {
            out.push_str("--");
            out.push_str(LOG_BOUNDARY);
            out.push('\n');
            match &part.content {
                PartContent::Text(value) => {
                    out.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{}\"\n\n",
                        part.field_name
                    ));
                    out.push_str(value);
                }
                PartContent::File {
                    bytes,
                    file_name,
                    mime_type,
                } => {
                    out.push_str(&format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\n",
                        part.field_name, file_name
                    ));
                    out.push_str(&format!("Content-Type: {}\n\n", mime_type));
                    if log_file_contents {
                        match std::str::from_utf8(bytes) {
                            Ok(text) => out.push_str(text),
                            Err(_) => return BODY_NOT_VIEWABLE.to_string(),
                        }
                    } else {
                        out.push_str(FILE_CONTENT_PLACEHOLDER);
                    }
                }
            }
            out.push('\n');
        }
        out.push_str("--");
        out.push_str(LOG_BOUNDARY);
        out.push_str("--\n");
        out
    }
}

/// Assembles multipart bodies, reading file content through the shared
/// cache.
pub struct MultipartBodyBuilder<'a> {
    cache: &'a FileContentCache,
}

impl<'a> MultipartBodyBuilder<'a> {
    pub fn new(cache: &'a FileContentCache) -> Self {
        Self { cache }
    }

    /// Merge all payload categories into one body.
    ///
    /// Ordering is fixed: request arguments, own arguments (if gated in),
    /// static files, selected dynamic files in selector order, variable
    /// files. Empty entries are expected to be weeded at configuration
    /// time but are skipped here as well.
    pub fn build(
        &self,
        arguments: &[Argument],
        own_arguments: &[Argument],
        static_files: &[FileReference],
        dynamic_files: &[FileReference],
        variable_files: &[VariableFileEntry],
        gates: PayloadGates,
        attachment_selector: &str,
    ) -> Result<MultipartBody, CacheError> {
        let mut parts = Vec::new();

        for arg in arguments.iter().filter(|a| !a.is_skippable()) {
            parts.push(text_part(arg));
        }

        if gates.own_arguments {
            for arg in own_arguments.iter().filter(|a| !a.is_skippable()) {
                parts.push(text_part(arg));
            }
        }

        if gates.static_files {
            for file in static_files.iter().filter(|f| !f.is_empty()) {
                parts.push(self.file_part(file)?);
            }
        }

        if gates.dynamic_files {
            for index in select_attachments(attachment_selector, dynamic_files.len()) {
                parts.push(self.file_part(&dynamic_files[index])?);
            }
        }

        if gates.variable_files {
            for file in variable_files.iter().filter(|f| !f.is_empty()) {
                parts.push(BodyPart {
                    field_name: file.param_name.clone(),
                    content: PartContent::File {
                        bytes: file.content.as_bytes().into(),
                        file_name: file.name.clone(),
                        mime_type: file.mime_type.clone(),
                    },
                });
            }
        }

        if parts.is_empty() {
            // Not an error: the POST is still sent with an empty body and
            // the server decides what to do with it.
            warn!("multipart body has no parts, sending empty POST");
        }

        Ok(MultipartBody { parts })
    }

    fn file_part(&self, file: &FileReference) -> Result<BodyPart, CacheError> {
        Ok(BodyPart {
            field_name: file.param_name.clone(),
            content: PartContent::File {
                bytes: self.cache.content(&file.path)?,
                file_name: file.file_name().to_string(),
                mime_type: file.mime_type.clone(),
            },
        })
    }
}

fn text_part(arg: &Argument) -> BodyPart {
    BodyPart {
        field_name: arg.name.clone(),
        content: PartContent::Text(arg.value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_gates() -> PayloadGates {
        PayloadGates {
            own_arguments: true,
            static_files: true,
            dynamic_files: true,
            variable_files: true,
        }
    }

    fn cache_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, FileContentCache) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let cache = FileContentCache::new(dir.path());
        (dir, cache)
    }

    #[test]
    fn test_category_order_is_fixed() {
        let (_dir, cache) = cache_with(&[("s.bin", b"s"), ("d.bin", b"d")]);
        let builder = MultipartBodyBuilder::new(&cache);

        let body = builder
            .build(
                &[Argument::new("base", "1")],
                &[Argument::new("own", "2")],
                &[FileReference::new("s.bin", "fs", "application/octet-stream")],
                &[FileReference::new("d.bin", "fd", "application/octet-stream")],
                &[VariableFileEntry::new("v", "v.txt", "fv", "text/plain")],
                open_gates(),
                "1",
            )
            .unwrap();

        let names: Vec<_> = body.parts().iter().map(|p| p.field_name()).collect();
        assert_eq!(names, vec!["base", "own", "fs", "fd", "fv"]);
    }

    #[test]
    fn test_gated_out_categories_are_absent() {
        let (_dir, cache) = cache_with(&[("s.bin", b"s")]);
        let builder = MultipartBodyBuilder::new(&cache);

        let gates = PayloadGates {
            own_arguments: false,
            static_files: false,
            dynamic_files: true,
            variable_files: true,
        };
        let body = builder
            .build(
                &[Argument::new("base", "1")],
                &[Argument::new("own", "2")],
                &[FileReference::new("s.bin", "fs", "application/octet-stream")],
                &[],
                &[],
                gates,
                "",
            )
            .unwrap();

        let names: Vec<_> = body.parts().iter().map(|p| p.field_name()).collect();
        assert_eq!(names, vec!["base"]);
    }

    #[test]
    fn test_empty_entries_are_skipped() {
        let (_dir, cache) = cache_with(&[]);
        let builder = MultipartBodyBuilder::new(&cache);

        let body = builder
            .build(
                &[Argument::new("", "skipped"), Argument::new("k", "v")],
                &[],
                &[FileReference::new("", "blank", "")],
                &[],
                &[VariableFileEntry::new("", "", "blank", "")],
                open_gates(),
                "",
            )
            .unwrap();

        assert_eq!(body.part_count(), 1);
        assert_eq!(body.parts()[0].field_name(), "k");
    }

    #[test]
    fn test_dynamic_selection_order_and_skips() {
        let (_dir, cache) = cache_with(&[("d1", b"1"), ("d2", b"2"), ("d3", b"3"), ("d4", b"4")]);
        let builder = MultipartBodyBuilder::new(&cache);
        let dynamic = vec![
            FileReference::new("d1", "a1", "application/octet-stream"),
            FileReference::new("d2", "a2", "application/octet-stream"),
            FileReference::new("d3", "a3", "application/octet-stream"),
            FileReference::new("d4", "a4", "application/octet-stream"),
        ];

        let body = builder
            .build(&[], &[], &[], &dynamic, &[], open_gates(), "3,1,99")
            .unwrap();

        let names: Vec<_> = body.parts().iter().map(|p| p.field_name()).collect();
        assert_eq!(names, vec!["a3", "a1"]);
    }

    #[test]
    fn test_zero_part_body_is_not_an_error() {
        let (_dir, cache) = cache_with(&[]);
        let builder = MultipartBodyBuilder::new(&cache);
        let body = builder
            .build(&[], &[], &[], &[], &[], open_gates(), "")
            .unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_loggable_suppresses_file_bytes_by_default() {
        let (_dir, cache) = cache_with(&[("a.jpg", b"rawjpegbytes")]);
        let builder = MultipartBodyBuilder::new(&cache);
        let body = builder
            .build(
                &[Argument::new("k", "v")],
                &[],
                &[FileReference::new("a.jpg", "f1", "image/jpeg")],
                &[],
                &[],
                open_gates(),
                "",
            )
            .unwrap();

        let logged = body.loggable(false);
        assert!(logged.contains("name=\"k\""));
        assert!(logged.contains("v"));
        assert!(logged.contains("filename=\"a.jpg\""));
        assert!(logged.contains(FILE_CONTENT_PLACEHOLDER));
        assert!(!logged.contains("rawjpegbytes"));
    }

    #[test]
    fn test_loggable_includes_file_bytes_when_enabled() {
        let (_dir, cache) = cache_with(&[("a.txt", b"visible text")]);
        let builder = MultipartBodyBuilder::new(&cache);
        let body = builder
            .build(
                &[],
                &[],
                &[FileReference::new("a.txt", "f1", "text/plain")],
                &[],
                &[],
                open_gates(),
                "",
            )
            .unwrap();

        let logged = body.loggable(true);
        assert!(logged.contains("visible text"));
    }

    #[test]
    fn test_loggable_degrades_for_non_utf8_content() {
        let (_dir, cache) = cache_with(&[("bin", &[0xff, 0xfe, 0x00, 0x01])]);
        let builder = MultipartBodyBuilder::new(&cache);
        let body = builder
            .build(
                &[],
                &[],
                &[FileReference::new("bin", "f1", "application/octet-stream")],
                &[],
                &[],
                open_gates(),
                "",
            )
            .unwrap();

        assert_eq!(body.loggable(true), BODY_NOT_VIEWABLE);
        // Suppressed rendering still works: the placeholder stands in.
        assert!(body.loggable(false).contains(FILE_CONTENT_PLACEHOLDER));
    }

    #[test]
    fn test_wire_form_is_rebuildable() {
        let (_dir, cache) = cache_with(&[("a.txt", b"x")]);
        let builder = MultipartBodyBuilder::new(&cache);
        let body = builder
            .build(
                &[Argument::new("k", "v")],
                &[],
                &[FileReference::new("a.txt", "f1", "text/plain")],
                &[],
                &[],
                open_gates(),
                "",
            )
            .unwrap();

        // Two forms from the same body, as a retried send needs.
        assert!(body.to_form().is_ok());
        assert!(body.to_form().is_ok());
    }

    #[test]
    fn test_invalid_mime_type_fails_wire_serialization() {
        let (_dir, cache) = cache_with(&[("a.txt", b"x")]);
        let builder = MultipartBodyBuilder::new(&cache);
        let body = builder
            .build(
                &[],
                &[],
                &[FileReference::new("a.txt", "f1", "not a mime type")],
                &[],
                &[],
                open_gates(),
                "",
            )
            .unwrap();

        assert!(matches!(
            body.to_form(),
            Err(BodyError::InvalidMimeType { .. })
        ));
    }
}
