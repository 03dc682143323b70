use thiserror::Error;

// Errores comunes del orquestador.
//
// Este enum centraliza los errores que pueden ocurrir al procesar un
// callback: errores del almacén de jobs (`StoreError`), del dominio
// (`DomainError`), de los colaboradores externos (`ProviderError`),
// validaciones y errores de serializacion.
#[derive(Error, Debug)]
pub enum OrchestratorError {
  /// Errores originados por el almacén de jobs.
  #[error("Error de almacén: {0}")]
  Store(#[from] jobstore::StoreError),

  /// Errores originados por el dominio de pipelines.
  #[error("Error de dominio: {0}")]
  Domain(#[from] render_domain::DomainError),

  /// Errores de los colaboradores externos (proveedor, assets, reporting).
  #[error("Error de colaborador: {0}")]
  Provider(#[from] render_providers::ProviderError),

  /// Errores de serializacion/deserializacion JSON.
  #[error("Error de serializacion: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Errores de validacion local (por ejemplo una etapa que no corresponde
  /// al kind del job).
  #[error("Error de validacion: {0}")]
  Validation(String),

  /// Error generico: captura otros tipos de errores no tipados.
  #[error("Otro error: {0}")]
  Other(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
