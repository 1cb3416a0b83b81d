//! Visual annotation: turns images embedded in an article into text the
//! retriever can match on.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::core::config::CrawlSettings;
use crate::core::errors::ApiError;
use crate::llm::ModelProvider;

pub struct VisualAnnotator {
    client: Client,
    models: Arc<dyn ModelProvider>,
}

impl VisualAnnotator {
    pub fn new(
        settings: &CrawlSettings,
        models: Arc<dyn ModelProvider>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.image_timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self { client, models })
    }

    /// Captions every image reference, newline-joining the annotations.
    /// A failed download or caption skips that image only.
    pub async fn annotate(&self, image_urls: &[String], base: &Url) -> String {
        let mut annotations = Vec::new();

        for src in image_urls {
            let absolute = match base.join(src) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!("Unresolvable image reference {}: {}", src, err);
                    continue;
                }
            };

            match self.caption_one(absolute.clone()).await {
                Ok(caption) => annotations.push(format!("[Image Description: {}]", caption)),
                Err(err) => {
                    tracing::warn!("Skipping image {}: {}", absolute, err);
                }
            }
        }

        annotations.join("\n")
    }

    async fn caption_one(&self, url: Url) -> Result<String, ApiError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ApiError::internal)?
            .error_for_status()
            .map_err(ApiError::internal)?;

        let bytes = resp.bytes().await.map_err(ApiError::internal)?;
        let decoded = image::load_from_memory(&bytes).map_err(ApiError::internal)?;

        // Re-encode to PNG so the captioning capability sees one format.
        let mut png = Vec::new();
        decoded
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(ApiError::internal)?;

        self.models.caption(&png).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::StubProvider;

    fn png_fixture() -> Vec<u8> {
        let pixel = image::RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(pixel)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode fixture");
        bytes
    }

    fn annotator() -> VisualAnnotator {
        VisualAnnotator::new(
            &CrawlSettings::default(),
            Arc::new(StubProvider::default()),
        )
        .expect("annotator")
    }

    #[tokio::test]
    async fn images_become_wrapped_captions() {
        let mut server = mockito::Server::new_async().await;
        let _img = server
            .mock("GET", "/images/step.png")
            .with_status(200)
            .with_body(png_fixture())
            .create_async()
            .await;

        let base = Url::parse(&server.url()).expect("base");
        let annotation = annotator()
            .annotate(&["/images/step.png".to_string()], &base)
            .await;

        assert_eq!(annotation, "[Image Description: a screenshot]");
    }

    #[tokio::test]
    async fn failed_downloads_and_bad_bytes_are_skipped() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/images/gone.png")
            .with_status(404)
            .create_async()
            .await;
        let _garbage = server
            .mock("GET", "/images/garbage.png")
            .with_status(200)
            .with_body("not an image")
            .create_async()
            .await;
        let _good = server
            .mock("GET", "/images/ok.png")
            .with_status(200)
            .with_body(png_fixture())
            .create_async()
            .await;

        let base = Url::parse(&server.url()).expect("base");
        let annotation = annotator()
            .annotate(
                &[
                    "/images/gone.png".to_string(),
                    "/images/garbage.png".to_string(),
                    "/images/ok.png".to_string(),
                ],
                &base,
            )
            .await;

        assert_eq!(annotation, "[Image Description: a screenshot]");
    }
}
