// Archivo: errors.rs
// Propósito: definir los errores del almacén de jobs y el alias Result<T>
// usado por las APIs del crate.
use thiserror::Error;
/// Errores comunes del almacén de jobs.
///
/// - `NotFound`: entidad no encontrada.
/// - `Storage`: error al acceder al almacenamiento externo.
/// - `Other`: cualquier otro error.
///
/// Los conflictos de concurrencia no son errores: el resultado del claim
/// condicional los expresa como `ClaimResult::Lost`.
#[derive(Error, Debug)]
pub enum StoreError {
  /// Entidad no encontrada (por ejemplo, job o registro de completitud).
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Error genérico de almacenamiento (BD, pool, etc.).
  #[error("Error de almacenamiento: {0}")]
  Storage(String),
  /// Otro tipo de error.
  #[error("Otro: {0}")]
  Other(String),
}
/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, StoreError>;
