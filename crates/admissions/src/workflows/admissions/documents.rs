//! Upload validation for applicant documents.

use serde::{Deserialize, Serialize};

use super::domain::DocumentType;
use super::error::AdmissionError;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Extensions accepted on applicant uploads, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];

/// Metadata of a file the applicant wants to attach. The bytes themselves live in object
/// storage outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub file_type: DocumentType,
    pub filename: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Check size and extension, returning the normalized file name.
    pub fn validate(&self, upload: &DocumentUpload) -> Result<String, AdmissionError> {
        let filename = upload.filename.trim();
        if filename.is_empty() {
            return Err(AdmissionError::Validation(
                "file name is required".to_string(),
            ));
        }
        if upload.size_bytes == 0 {
            return Err(AdmissionError::Validation(format!("{filename} is empty")));
        }
        if upload.size_bytes > self.max_bytes {
            return Err(AdmissionError::Validation(format!(
                "{filename} is {} bytes, the limit is {} bytes",
                upload.size_bytes, self.max_bytes
            )));
        }

        let extension = extension_of(filename).ok_or_else(|| {
            AdmissionError::Validation(format!("{filename} has no file extension"))
        })?;
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AdmissionError::Validation(format!(
                "files of type .{extension} are not accepted; use one of {}",
                ALLOWED_EXTENSIONS.join(", ")
            )));
        }

        Ok(filename.to_string())
    }
}

fn extension_of(filename: &str) -> Option<String> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Best guess at the MIME type, falling back to `application/octet-stream`.
pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or(mime::APPLICATION_OCTET_STREAM)
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(filename: &str, size_bytes: u64) -> DocumentUpload {
        DocumentUpload {
            file_type: DocumentType::Transcript,
            filename: filename.to_string(),
            size_bytes,
        }
    }

    #[test]
    fn accepts_allowed_extensions_in_any_case() {
        let policy = UploadPolicy::default();
        for name in ["transcript.pdf", "scan.JPG", "photo.jpeg", "id.Png"] {
            assert!(policy.validate(&upload(name, 1024)).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_oversized_and_disallowed_files() {
        let policy = UploadPolicy::default();
        assert!(matches!(
            policy.validate(&upload("transcript.pdf", 6 * 1024 * 1024)),
            Err(AdmissionError::Validation(_))
        ));
        assert!(policy
            .validate(&upload("transcript.pdf", DEFAULT_MAX_UPLOAD_BYTES))
            .is_ok());
        for name in ["notes.docx", "archive.tar.gz", "README", ".pdf", "  "] {
            assert!(
                matches!(
                    policy.validate(&upload(name, 10)),
                    Err(AdmissionError::Validation(_))
                ),
                "{name}"
            );
        }
        assert!(matches!(
            policy.validate(&upload("empty.pdf", 0)),
            Err(AdmissionError::Validation(_))
        ));
    }

    #[test]
    fn guesses_content_type_from_extension() {
        assert_eq!(content_type_for("transcript.pdf"), "application/pdf");
        assert_eq!(content_type_for("scan.PNG"), "image/png");
        assert_eq!(content_type_for("mystery"), "application/octet-stream");
    }
}
