mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Result, bail};

/// POSTs a form payload and returns the response body, treating non-2xx
/// statuses and empty bodies as errors (an empty body means the service
/// had no file for the request).
pub async fn post_form_bytes<C: HttpClient>(
    client: &C,
    url: &str,
    form: &[(String, String)],
) -> Result<Vec<u8>> {
    let resp = client.post_form(url, form).await?;

    let status = resp.status();
    if !status.is_success() {
        bail!("API responded with status {status}");
    }

    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        bail!("API responded with an empty body");
    }

    Ok(bytes.to_vec())
}
