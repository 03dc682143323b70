// errors.rs
use thiserror::Error;

/// Errores de los colaboradores externos.
///
/// La partición retryable/fatal gobierna el helper de reintentos: un fallo
/// de red o un rate-limit puede resolverse reintentando; una respuesta
/// malformada no.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
  /// Fallo de transporte o status 5xx del colaborador.
  #[error("Error HTTP del proveedor: {0}")]
  Http(String),
  /// El colaborador rechazó por límite de tasa (429).
  #[error("Límite de tasa del proveedor: {0}")]
  RateLimited(String),
  /// Respuesta sin la forma esperada (sin task_id, sin url, etc.).
  #[error("Respuesta inválida del proveedor: {0}")]
  InvalidResponse(String),
  /// Fallo al subir un asset al almacén permanente.
  #[error("Error de subida al almacén de assets: {0}")]
  Upload(String),
  /// Otro tipo de error.
  #[error("Otro error de proveedor: {0}")]
  Other(String),
}

impl ProviderError {
  /// Un error retryable puede resolverse en un intento posterior; uno fatal
  /// se propaga inmediatamente.
  pub fn is_retryable(&self) -> bool {
    matches!(self,
             ProviderError::Http(_) | ProviderError::RateLimited(_) | ProviderError::Upload(_))
  }
}
