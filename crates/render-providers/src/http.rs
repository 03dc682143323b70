// http.rs
//
// Implementaciones HTTP de los colaboradores. Las formas de petición son
// deliberadamente planas: el shaping específico de cada proveedor real vive
// detrás de estos endpoints, no aquí.
use crate::{AssetStore, GenerationProvider, GenerationRequest, JobSummary, ProviderError, ReportingSink};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

fn map_send_err(e: reqwest::Error) -> ProviderError {
  ProviderError::Http(format!("request: {}", e))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
  let status = resp.status();
  if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
    return Err(ProviderError::RateLimited(format!("status {}", status)));
  }
  if !status.is_success() {
    let body = resp.text().await.unwrap_or_default();
    return Err(ProviderError::Http(format!("status {}: {}", status, body)));
  }
  Ok(resp)
}

/// Cliente HTTP del proveedor de generación: POST de la petición más la URL
/// de callback; la respuesta inmediata sólo trae el id del task.
pub struct HttpGenerationProvider {
  client: reqwest::Client,
  endpoint: String,
  api_key: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
  task_id: String,
}

impl HttpGenerationProvider {
  pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
    Self { client: reqwest::Client::new(), endpoint: endpoint.to_string(), api_key }
  }

  /// Lee `PROVIDER_URL` (y `PROVIDER_API_KEY` opcional) del entorno.
  pub fn from_env() -> Result<Self, ProviderError> {
    dotenvy::dotenv().ok();
    let endpoint = std::env::var("PROVIDER_URL")
      .map_err(|_| ProviderError::Other("PROVIDER_URL no definida".into()))?;
    Ok(Self::new(&endpoint, std::env::var("PROVIDER_API_KEY").ok()))
  }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
  async fn submit(&self, request: &GenerationRequest, webhook_url: &str) -> Result<String, ProviderError> {
    let mut req = self.client.post(&self.endpoint).json(&json!({
      "operation": request.operation,
      "prompt": request.prompt,
      "image_urls": request.image_urls,
      "aspect_ratio": request.aspect_ratio,
      "webhook_url": webhook_url,
    }));
    if let Some(key) = &self.api_key {
      req = req.bearer_auth(key);
    }
    let resp = check_status(req.send().await.map_err(map_send_err)?).await?;
    let parsed: SubmitResponse = resp.json()
                                     .await
                                     .map_err(|e| ProviderError::InvalidResponse(format!("submit: {}", e)))?;
    Ok(parsed.task_id)
  }
}

/// Cliente HTTP del almacén permanente de assets.
pub struct HttpAssetStore {
  client: reqwest::Client,
  endpoint: String,
}

#[derive(Deserialize)]
struct UploadResponse {
  url: String,
}

impl HttpAssetStore {
  pub fn new(endpoint: &str) -> Self {
    Self { client: reqwest::Client::new(), endpoint: endpoint.to_string() }
  }

  pub fn from_env() -> Result<Self, ProviderError> {
    dotenvy::dotenv().ok();
    let endpoint = std::env::var("ASSET_STORE_URL")
      .map_err(|_| ProviderError::Other("ASSET_STORE_URL no definida".into()))?;
    Ok(Self::new(&endpoint))
  }

  async fn upload(&self, source_url: &str, folder: &str, crop_ratio: Option<&str>) -> Result<String, ProviderError> {
    let resp = self.client
                   .post(&self.endpoint)
                   .json(&json!({
                     "source_url": source_url,
                     "folder": folder,
                     "crop_ratio": crop_ratio,
                   }))
                   .send()
                   .await
                   .map_err(|e| ProviderError::Upload(format!("upload: {}", e)))?;
    let status = resp.status();
    if !status.is_success() {
      return Err(ProviderError::Upload(format!("upload status {}", status)));
    }
    let parsed: UploadResponse = resp.json()
                                     .await
                                     .map_err(|e| ProviderError::InvalidResponse(format!("upload: {}", e)))?;
    Ok(parsed.url)
  }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
  async fn upload_permanent(&self, url: &str, folder: &str) -> Result<String, ProviderError> {
    self.upload(url, folder, None).await
  }

  async fn upload_and_crop(&self, url: &str, ratio: &str, folder: &str) -> Result<String, ProviderError> {
    self.upload(url, folder, Some(ratio)).await
  }
}

/// Sink de reporting HTTP: un POST del resumen y nada más.
pub struct HttpReportingSink {
  client: reqwest::Client,
  endpoint: String,
}

impl HttpReportingSink {
  pub fn new(endpoint: &str) -> Self {
    Self { client: reqwest::Client::new(), endpoint: endpoint.to_string() }
  }

  pub fn from_env() -> Result<Self, ProviderError> {
    dotenvy::dotenv().ok();
    let endpoint = std::env::var("REPORT_SINK_URL")
      .map_err(|_| ProviderError::Other("REPORT_SINK_URL no definida".into()))?;
    Ok(Self::new(&endpoint))
  }
}

#[async_trait]
impl ReportingSink for HttpReportingSink {
  async fn export(&self, summary: &JobSummary) -> Result<(), ProviderError> {
    let resp = self.client.post(&self.endpoint).json(summary).send().await.map_err(map_send_err)?;
    check_status(resp).await?;
    Ok(())
  }
}
