use async_trait::async_trait;
use reqwest::Response;

/// Seam over the HTTP transport used by the usage-log downloader.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> reqwest::Result<Response>;
}
