//! Remote PDF → text conversion (ConvertAPI-compatible).
//!
//! The PDF is posted base64-encoded; the service answers with either a
//! download URL for the extracted text or the text inline as base64.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::ImportError;
use crate::config::ConverterConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConvertResponse {
    #[serde(default)]
    files: Vec<ConvertedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConvertedFile {
    url: Option<String>,
    file_data: Option<String>,
}

pub struct PdfConverter {
    endpoint: String,
    secret: String,
    client: Client,
}

impl PdfConverter {
    /// Returns `None` when conversion is disabled or no secret is set.
    pub fn from_config(config: &ConverterConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        if config.secret.is_empty() {
            warn!("PDF converter enabled without a secret, disabling it");
            return None;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build converter HTTP client ({e}), using defaults");
                Client::new()
            });

        Some(Self {
            endpoint: config.endpoint.clone(),
            secret: config.secret.clone(),
            client,
        })
    }

    pub async fn convert(&self, file_name: &str, pdf: &[u8]) -> Result<String, ImportError> {
        let data = BASE64.encode(pdf);
        info!("Converting {file_name} to text ({} base64 chars)", data.len());

        let body = json!({
            "Parameters": [
                {
                    "Name": "File",
                    "FileValue": { "Name": file_name, "Data": data }
                }
            ]
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("Secret", self.secret.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ImportError::Conversion(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(ImportError::Conversion(format!(
                "converter returned status {}",
                resp.status()
            )));
        }

        let parsed: ConvertResponse = resp
            .json()
            .await
            .map_err(|e| ImportError::Conversion(format!("unreadable response: {e}")))?;
        let file = parsed
            .files
            .into_iter()
            .next()
            .ok_or_else(|| ImportError::Conversion("no output from converter".into()))?;

        let text = self.fetch_text(file).await?;
        debug!("Extracted {} characters from {file_name}", text.len());
        if text.trim().is_empty() {
            return Err(ImportError::Conversion("no text found in PDF".into()));
        }
        Ok(text)
    }

    async fn fetch_text(&self, file: ConvertedFile) -> Result<String, ImportError> {
        if let Some(inline) = file.file_data {
            let bytes = BASE64
                .decode(inline.trim())
                .map_err(|e| ImportError::Conversion(format!("bad inline data: {e}")))?;
            return String::from_utf8(bytes)
                .map_err(|_| ImportError::Conversion("converted text is not UTF-8".into()));
        }

        let url = file
            .url
            .ok_or_else(|| ImportError::Conversion("converter returned no file".into()))?;
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImportError::Conversion(format!("download failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ImportError::Conversion(format!(
                "download returned status {}",
                resp.status()
            )));
        }
        resp.text()
            .await
            .map_err(|e| ImportError::Conversion(format!("download failed: {e}")))
    }
}
