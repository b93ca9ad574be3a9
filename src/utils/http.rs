// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::{AppError, Result};
use crate::models::SourceConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &SourceConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Turn a non-2xx response into `AppError::Status`.
pub fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AppError::status(response.url().as_str(), status))
    }
}

/// Fetch a page body, failing on non-2xx status.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = ensure_success(client.get(url).send().await?)?;
    Ok(response.text().await?)
}
