use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use askpdf_core::{AnnotationSet, AskPdfError};

use crate::host::{AssetLocation, EditorHost};

static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!?\[[^\]]*\]\(\s*([^)\s]+)\s*\)$").expect("valid markdown link regex")
});

/// A PDF and its decoded highlights.
#[derive(Debug)]
pub struct PdfAsset {
    pub location: AssetLocation,
    pub bytes: Vec<u8>,
    pub highlights: AnnotationSet,
}

impl PdfAsset {
    /// Stable key for the index cache.
    pub fn cache_path(&self) -> String {
        self.location.to_string()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{location} could not be read: {reason}")]
    NotFound {
        location: AssetLocation,
        reason: String,
    },
    #[error("{location} is not a valid annotation file: {source}")]
    InvalidAnnotations {
        location: AssetLocation,
        #[source]
        source: AskPdfError,
    },
}

/// Target of a property value written as a markdown link, or the value itself.
pub fn asset_path_from_property(value: &str) -> &str {
    let value = value.trim();
    MARKDOWN_LINK
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|target| target.as_str())
        .unwrap_or(value)
}

/// Fetches the PDF at `raw_path` and its `.edn` sidecar, then decodes the highlights.
pub async fn load_pdf_with_annotations(
    host: &dyn EditorHost,
    http: &reqwest::Client,
    raw_path: &str,
) -> Result<PdfAsset, StoreError> {
    let location = host.resolve_asset(asset_path_from_property(raw_path));
    let sidecar = location.sidecar();
    let (bytes, edn) = tokio::try_join!(fetch(http, &location), fetch(http, &sidecar))?;
    let text = String::from_utf8(edn).map_err(|err| StoreError::InvalidAnnotations {
        location: sidecar.clone(),
        source: AskPdfError::Other(format!("annotation file is not UTF-8: {err}")),
    })?;
    let highlights = AnnotationSet::from_edn_str(&text).map_err(|source| {
        StoreError::InvalidAnnotations {
            location: sidecar.clone(),
            source,
        }
    })?;
    tracing::info!(
        pdf = %location,
        bytes = bytes.len(),
        highlights = highlights.len(),
        "loaded pdf and annotations"
    );
    Ok(PdfAsset {
        location,
        bytes,
        highlights,
    })
}

async fn fetch(http: &reqwest::Client, location: &AssetLocation) -> Result<Vec<u8>, StoreError> {
    let not_found = |reason: String| StoreError::NotFound {
        location: location.clone(),
        reason,
    };
    match location {
        AssetLocation::Local(path) => tokio::fs::read(path)
            .await
            .map_err(|err| not_found(err.to_string())),
        AssetLocation::Remote(url) => {
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|err| not_found(err.to_string()))?;
            if !response.status().is_success() {
                return Err(not_found(format!("status {}", response.status())));
            }
            let body = response
                .bytes()
                .await
                .map_err(|err| not_found(err.to_string()))?;
            Ok(body.to_vec())
        }
    }
}
