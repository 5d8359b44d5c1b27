//! Lesson document import.
//!
//! Plain text is read directly. PDFs go through the remote converter when
//! one is configured; other files are read as text on a best-effort basis.

pub mod converter;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub use converter::PdfConverter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
    Other,
}

impl DocumentKind {
    pub fn classify(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mime = mime_guess::from_path(path).first();

        if extension.as_deref() == Some("txt")
            || mime.as_ref().is_some_and(|m| m.type_() == mime_guess::mime::TEXT)
        {
            Self::Text
        } else if extension.as_deref() == Some("pdf")
            || mime.as_ref().is_some_and(|m| *m == mime_guess::mime::APPLICATION_PDF)
        {
            Self::Pdf
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0} is not UTF-8 text; save it as .txt or paste the content")]
    NotText(String),
    #[error("{0} is empty")]
    Empty(String),
    #[error("PDF conversion is not configured; convert the file to text or paste its content")]
    ConverterDisabled,
    #[error("PDF conversion failed: {0}")]
    Conversion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDocument {
    pub name: String,
    pub kind: DocumentKind,
    pub text: String,
}

pub struct DocumentImporter {
    converter: Option<PdfConverter>,
}

impl DocumentImporter {
    pub fn new(converter: Option<PdfConverter>) -> Self {
        Self { converter }
    }

    pub async fn import(&self, path: &Path) -> Result<ImportedDocument, ImportError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let kind = DocumentKind::classify(path);
        info!("Importing {name} ({kind:?})");

        let bytes = tokio::fs::read(path).await.map_err(|source| ImportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());

        let text = match kind {
            DocumentKind::Pdf => {
                let converter = self.converter.as_ref().ok_or(ImportError::ConverterDisabled)?;
                converter.convert(&name, &bytes).await?
            }
            DocumentKind::Text | DocumentKind::Other => {
                String::from_utf8(bytes).map_err(|_| ImportError::NotText(name.clone()))?
            }
        };

        if text.trim().is_empty() {
            return Err(ImportError::Empty(name));
        }

        info!("Imported {name}: {} characters", text.chars().count());
        Ok(ImportedDocument {
            name,
            kind,
            text: text.trim().to_string(),
        })
    }
}
