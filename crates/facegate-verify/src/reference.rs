//! Reference descriptor loading.
//!
//! Turns a subject's enrolled reference images into a labeled descriptor
//! set. Individual images that cannot be fetched or embedded are skipped;
//! the load fails only when nothing usable remains.

use crate::catalog::ReferenceCatalog;
use crate::error::VerifyError;
use facegate_vision::{FaceAnalyzer, LabeledDescriptors};
use std::sync::Arc;

#[derive(Clone)]
pub struct ReferenceLoader {
    catalog: Arc<dyn ReferenceCatalog>,
    analyzer: Arc<dyn FaceAnalyzer>,
}

impl ReferenceLoader {
    pub fn new(catalog: Arc<dyn ReferenceCatalog>, analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        Self { catalog, analyzer }
    }

    /// Fetch and embed every reference image enrolled for the subject.
    pub async fn load(&self, subject: &str) -> Result<LabeledDescriptors, VerifyError> {
        let listed = self.catalog.list_reference_images(subject).await?;
        tracing::debug!(subject, count = listed.len(), "listed reference images");

        let mut embeddings = Vec::new();
        for reference in &listed {
            let bytes = match self.catalog.fetch_image(&reference.url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(url = %reference.url, error = %e, "reference fetch failed; skipping");
                    continue;
                }
            };

            let analyzer = self.analyzer.clone();
            let embedded =
                tokio::task::spawn_blocking(move || analyzer.embed_primary_face(&bytes)).await;
            match embedded {
                Ok(Ok(Some(embedding))) => embeddings.push(embedding),
                Ok(Ok(None)) => {
                    tracing::warn!(url = %reference.url, "no face in reference image; skipping");
                }
                Ok(Err(e)) => {
                    tracing::warn!(url = %reference.url, error = %e, "reference embed failed; skipping");
                }
                Err(_) => {
                    tracing::warn!(url = %reference.url, "reference embed task failed; skipping");
                }
            }
        }

        if embeddings.is_empty() {
            return Err(VerifyError::NoReferenceImages {
                subject: subject.to_string(),
            });
        }

        tracing::info!(
            subject,
            descriptors = embeddings.len(),
            "reference descriptors ready"
        );
        Ok(LabeledDescriptors::new(subject, embeddings))
    }
}
