//! Input resolution: turn a user-supplied path or URL into a [`Document`].
//!
//! The whole file is read into memory; page splitting works on bytes. The
//! PDF magic (`%PDF`) is checked here so that a wrong upload is reported as
//! a client error rather than surfacing later as a split failure.

use crate::error::PipelineError;
use crate::output::Document;
use std::path::PathBuf;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a validated [`Document`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, PipelineError> {
    let document = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(PipelineError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };
    validate(&document)?;
    Ok(document)
}

/// Reject empty uploads and anything without the PDF magic.
pub fn validate(document: &Document) -> Result<(), PipelineError> {
    if document.bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    if !document.bytes.starts_with(PDF_MAGIC) {
        return Err(PipelineError::NotAPdf {
            name: document.display_name(),
            magic: document.bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

async fn read_local(path_str: &str) -> Result<Document, PipelineError> {
    let path = PathBuf::from(path_str);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path });
        }
        Err(_) => return Err(PipelineError::FileNotFound { path }),
    };

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    Ok(Document::new(bytes, filename))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(Document::new(bytes.to_vec(), filename))
}

/// Last non-empty path segment of the URL, if any.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty()).then(|| last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_comes_from_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/a/b/scan.pdf?x=1"),
            Some("scan.pdf".to_string())
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[test]
    fn empty_document_is_rejected() {
        let err = validate(&Document::new(vec![], Some("a.pdf".into()))).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let err = validate(&Document::new(b"PK\x03\x04rest".to_vec(), None)).unwrap_err();
        match err {
            PipelineError::NotAPdf { name, magic } => {
                assert_eq!(name, "upload.pdf");
                assert_eq!(magic, b"PK\x03\x04".to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_file_is_read_with_its_name() {
        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.7\n...").unwrap();
        let doc = resolve_input(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert!(doc.display_name().ends_with(".pdf"));
        assert!(doc.bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_input("/nonexistent/definitely/missing.pdf", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}
