// kind.rs
use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topología del pipeline de un job.
///
/// - `SingleCall`: una sola llamada al proveedor y finalización.
/// - `LinearChain`: cadena de llamadas dependientes (estilo → enriquecimiento
///   → edición final), cada una alimentando la siguiente.
/// - `FanInCompose`: N sub-tasks paralelos que deben completarse todos antes
///   de una composición única, con mejora opcional posterior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
  SingleCall,
  LinearChain,
  FanInCompose,
}

impl JobKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobKind::SingleCall => "single_call",
      JobKind::LinearChain => "linear_chain",
      JobKind::FanInCompose => "fanin_compose",
    }
  }

  pub fn parse(s: &str) -> Result<Self, DomainError> {
    match s {
      "single_call" => Ok(JobKind::SingleCall),
      "linear_chain" => Ok(JobKind::LinearChain),
      "fanin_compose" => Ok(JobKind::FanInCompose),
      other => Err(DomainError::ValidationError(format!("kind de job desconocido: {}", other))),
    }
  }

  /// Política de mejora automática: los kinds en este conjunto generan un
  /// job dependiente de realce por cada asset de salida al finalizar. Los
  /// jobs de realce son `SingleCall` y no vuelven a generar descendencia.
  pub fn wants_enhancement(&self) -> bool {
    matches!(self, JobKind::LinearChain | JobKind::FanInCompose)
  }
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
