//! Reference-image catalog client.
//!
//! The catalog is an external collaborator: it knows which reference
//! photos exist for an employee and where their bytes live.

use crate::config::VerifyConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("catalog returned {status} for {url}")]
    BadStatus { status: u16, url: String },
}

/// One reference image location for a subject.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceImage {
    pub url: String,
}

/// Catalog collaborator contract.
#[async_trait]
pub trait ReferenceCatalog: Send + Sync {
    /// List reference image locations enrolled for the subject.
    async fn list_reference_images(&self, subject: &str)
        -> Result<Vec<ReferenceImage>, CatalogError>;

    /// Fetch the raw bytes of one reference image.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CatalogError>;
}

/// HTTP catalog client.
pub struct HttpCatalog {
    http: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(config: &VerifyConfig) -> Result<Self, CatalogError> {
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self {
            http,
            base_url: config.catalog_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReferenceCatalog for HttpCatalog {
    async fn list_reference_images(
        &self,
        subject: &str,
    ) -> Result<Vec<ReferenceImage>, CatalogError> {
        let url = format!("{}/employees/{}/face-references", self.base_url, subject);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::BadStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CatalogError::BadStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
