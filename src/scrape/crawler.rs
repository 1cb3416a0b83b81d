//! Portal crawler: walks the home page, solutions listing, category and
//! folder levels of one help-center instance down to its article URLs.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;

use crate::core::config::CrawlSettings;

use super::fetcher::{FetchedPage, PageFetcher};

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("hardcoded selector"));

#[derive(Clone)]
pub struct PortalCrawler {
    fetcher: Arc<PageFetcher>,
    settings: CrawlSettings,
}

impl PortalCrawler {
    pub fn new(fetcher: Arc<PageFetcher>, settings: CrawlSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Crawls every configured site root in parallel and returns the sorted
    /// union of discovered article URLs. Roots share no state until their
    /// independent crawls complete.
    pub async fn crawl_all(&self) -> Vec<String> {
        let mut handles = Vec::new();
        for root in &self.settings.site_roots {
            let crawler = self.clone();
            let root = root.clone();
            handles.push(tokio::spawn(async move { crawler.crawl_root(&root).await }));
        }

        let mut union: HashSet<String> = HashSet::new();
        for handle in handles {
            match handle.await {
                Ok(articles) => union.extend(articles),
                Err(err) => tracing::warn!("Crawl task panicked: {}", err),
            }
        }

        let mut urls: Vec<String> = union.into_iter().collect();
        urls.sort();
        urls
    }

    /// Crawls one site root. Unreachable pages at any level cost only the
    /// URLs below them; the crawl itself never aborts.
    pub async fn crawl_root(&self, root: &str) -> HashSet<String> {
        let home = match self.fetcher.fetch(root).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!("Site root {} unreachable: {}; skipping site", root, err);
                return HashSet::new();
            }
        };

        let index_page = self.fetch_listing(home).await;
        tracing::info!("Crawling structure under {}", index_page.final_url);

        let folders = self.discover_folders(&index_page).await;
        tracing::info!("Found {} folders on {}", folders.len(), root);

        let mut articles: HashSet<String> = HashSet::new();
        for (i, folder) in folders.iter().enumerate() {
            if i > 0 && self.settings.folder_delay_ms > 0 {
                // Be polite to the remote host.
                tokio::time::sleep(Duration::from_millis(self.settings.folder_delay_ms)).await;
            }

            match self.fetcher.fetch(folder).await {
                Ok(page) => {
                    let found = collect_marked_links(
                        &page.body,
                        &page.final_url,
                        &self.settings.article_marker,
                    );
                    articles.extend(found);
                }
                Err(err) => {
                    tracing::warn!("Folder {} unreachable: {}; skipping", folder, err);
                }
            }
        }

        tracing::info!("Found {} unique articles on {}", articles.len(), root);
        articles
    }

    /// Fetches the solutions listing derived from the resolved home URL,
    /// falling back to the home page's own links when the listing is
    /// unreachable.
    async fn fetch_listing(&self, home: FetchedPage) -> FetchedPage {
        let Some(listing) = listing_url(&home.final_url, &self.settings) else {
            return home;
        };

        match self.fetcher.fetch(listing.as_str()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(
                    "Solutions listing {} unreachable: {}; scanning home page instead",
                    listing,
                    err
                );
                home
            }
        }
    }

    /// Folder links come from the listing directly and from each category
    /// page one hop down; the set collapses folders referenced by both.
    async fn discover_folders(&self, index_page: &FetchedPage) -> HashSet<String> {
        let mut folders: HashSet<String> = collect_marked_links(
            &index_page.body,
            &index_page.final_url,
            &self.settings.folder_marker,
        )
        .into_iter()
        .collect();

        let categories: HashSet<String> = collect_marked_links(
            &index_page.body,
            &index_page.final_url,
            &self.settings.category_marker,
        )
        .into_iter()
        .collect();

        for category in categories {
            match self.fetcher.fetch(&category).await {
                Ok(page) => {
                    folders.extend(collect_marked_links(
                        &page.body,
                        &page.final_url,
                        &self.settings.folder_marker,
                    ));
                }
                Err(err) => {
                    tracing::warn!("Category {} unreachable: {}; skipping", category, err);
                }
            }
        }

        folders
    }
}

/// Derives the solutions listing URL from a resolved home URL. Hosts with
/// non-derivable listings are configured in `listing_overrides`; otherwise a
/// leading two-letter locale segment is preserved.
fn listing_url(home: &Url, settings: &CrawlSettings) -> Option<Url> {
    if let Some(host) = home.host_str() {
        if let Some(path) = settings.listing_overrides.get(host) {
            return home.join(path).ok();
        }
    }

    let locale = home
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|seg| seg.len() == 2 && seg.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_string);

    let path = match locale {
        Some(locale) => format!("/{}{}", locale, settings.listing_path),
        None => settings.listing_path.clone(),
    };

    home.join(&path).ok()
}

/// Collects anchors whose path contains `marker`, resolved against `base`
/// and normalized to scheme+host+path (fragment and query dropped) so set
/// membership dedupes reliably.
fn collect_marked_links(html: &str, base: &Url, marker: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| href.contains(marker))
        .filter_map(|href| base.join(href).ok())
        .map(normalize_url)
        .collect()
}

fn normalize_url(mut url: Url) -> String {
    url.set_fragment(None);
    url.set_query(None);
    url.to_string()
}
