//! Ingestion pipeline: crawl portals, extract article content, annotate
//! embedded images, and emit the records the index is built from.

pub mod crawler;
pub mod extractor;
pub mod fetcher;
pub mod vision;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::CrawlSettings;
use crate::core::errors::ApiError;
use crate::llm::ModelProvider;

pub use crawler::PortalCrawler;
pub use extractor::ArticleDraft;
pub use fetcher::{FetchError, FetchedPage, PageFetcher};
pub use vision::VisualAnnotator;

/// Separator between extracted text and image annotations, so retrieval can
/// match on visual content without confusing it with article prose.
pub const VISUAL_CONTEXT_SEPARATOR: &str = "--- Visual Context ---";

/// The canonical ingestion unit. Immutable once assembled; bodies shorter
/// than the configured minimum never become records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub title: String,
    pub body: String,
    pub source_url: String,
    pub product: String,
}

impl ContentRecord {
    /// Combines a draft with its visual annotation and validates length.
    /// Near-empty stub pages are rejected here so they never reach the
    /// index.
    pub fn assemble(
        draft: ArticleDraft,
        annotation: &str,
        source_url: &str,
        product: &str,
        min_content_len: usize,
    ) -> Option<Self> {
        let body = if annotation.is_empty() {
            draft.body
        } else {
            format!(
                "{}\n\n{}\n{}",
                draft.body, VISUAL_CONTEXT_SEPARATOR, annotation
            )
        };

        if body.chars().count() < min_content_len {
            return None;
        }

        Some(Self {
            title: draft.title,
            body,
            source_url: source_url.to_string(),
            product: product.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Stop after this many records (fast rebuilds).
    pub limit: Option<usize>,
    /// Skip image download + captioning entirely.
    pub skip_images: bool,
}

/// Crawls every configured site root and extracts one record per viable
/// article. Per-URL failures are logged and skipped; the run itself only
/// fails on setup errors.
pub async fn scrape_portal(
    settings: &CrawlSettings,
    models: Arc<dyn ModelProvider>,
    options: ScrapeOptions,
) -> Result<Vec<ContentRecord>, ApiError> {
    let fetcher = Arc::new(PageFetcher::new(settings)?);
    let crawler = PortalCrawler::new(Arc::clone(&fetcher), settings.clone());
    let annotator = VisualAnnotator::new(settings, models)?;

    let urls = crawler.crawl_all().await;
    tracing::info!("Crawl finished: {} candidate articles", urls.len());

    let mut records = Vec::new();
    for (i, url) in urls.iter().enumerate() {
        if let Some(limit) = options.limit {
            if records.len() >= limit {
                break;
            }
        }

        if i > 0 && settings.article_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(settings.article_delay_ms)).await;
        }

        let page = match fetcher.fetch(url).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!("Article {} unreachable: {}; dropping", url, err);
                continue;
            }
        };

        let Some(draft) = extractor::extract(&page.body) else {
            tracing::debug!("No content container in {}; dropping", url);
            continue;
        };

        let annotation = if options.skip_images || draft.image_urls.is_empty() {
            String::new()
        } else {
            annotator.annotate(&draft.image_urls, &page.final_url).await
        };

        match ContentRecord::assemble(
            draft,
            &annotation,
            url,
            &settings.product,
            settings.min_content_len,
        ) {
            Some(record) => records.push(record),
            None => tracing::debug!("Content below minimum threshold in {}; dropping", url),
        }
    }

    tracing::info!("Scraped {} records", records.len());
    Ok(records)
}
