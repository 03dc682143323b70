//! render-providers: colaboradores externos del orquestador
//!
//! Define los contratos de los colaboradores (`GenerationProvider`,
//! `AssetStore`, `ReportingSink`), la normalización del payload de callbacks
//! (cuya forma varía por proveedor) y las implementaciones HTTP. Los
//! resultados de generación nunca se consultan por polling en el camino
//! caliente: llegan siempre por el endpoint de callbacks.
mod callback;
mod errors;
mod http;
mod retry;
pub mod stubs;

pub use callback::{CallbackPayload, TaskStatus};
pub use errors::ProviderError;
pub use http::{HttpAssetStore, HttpGenerationProvider, HttpReportingSink};
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Petición de generación/edición. El shaping fino por proveedor es
/// responsabilidad del cliente concreto; el orquestador sólo describe la
/// operación y sus entradas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
  /// Operación solicitada: `style_extract`, `prompt_enrich`, `image_edit`,
  /// `compose` o `enhance`.
  pub operation: String,
  pub prompt: Option<String>,
  pub image_urls: Vec<String>,
  pub aspect_ratio: Option<String>,
}

/// Proveedor asíncrono de generación: acepta la petición y devuelve el id
/// del task. El resultado terminal llega después vía webhook.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
  async fn submit(&self, request: &GenerationRequest, webhook_url: &str) -> Result<String, ProviderError>;
}

/// Almacén de assets permanentes. Las URLs del proveedor expiran; todo output
/// debe copiarse aquí antes de registrarse en el job.
#[async_trait]
pub trait AssetStore: Send + Sync {
  /// Copia permanente sin transformación.
  async fn upload_permanent(&self, url: &str, folder: &str) -> Result<String, ProviderError>;
  /// Copia permanente con recorte centrado a la relación dada.
  async fn upload_and_crop(&self, url: &str, ratio: &str, folder: &str) -> Result<String, ProviderError>;
}

/// Resumen de un job completado para el sink de reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
  pub job_id: Uuid,
  pub kind: String,
  pub status: String,
  pub outputs: Vec<String>,
  pub note: Option<String>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Sink de reporting best-effort: los fallos se loguean y nada más.
#[async_trait]
pub trait ReportingSink: Send + Sync {
  async fn export(&self, summary: &JobSummary) -> Result<(), ProviderError>;
}
