// stage.rs
//
// Etapas de las máquinas de estado por kind. Las etapas se persisten como
// strings: son el valor que compara el update condicional (compare-and-set)
// del almacén, así que `as_str`/`parse` definen el vocabulario exacto.
use crate::DomainError;

/// Etapa terminal exitosa (espejo del status). Es el destino del claim
/// cuando un callback reintentado retoma una finalización interrumpida.
pub const STAGE_COMPLETED: &str = "completed";

/// Etapas del pipeline de llamada única.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleStage {
  AwaitingTask,
  Finalizing,
}

impl SingleStage {
  pub fn as_str(&self) -> &'static str {
    match self {
      SingleStage::AwaitingTask => "awaiting_task",
      SingleStage::Finalizing => "finalizing",
    }
  }

  pub fn parse(s: &str) -> Result<Self, DomainError> {
    match s {
      "awaiting_task" => Ok(SingleStage::AwaitingTask),
      "finalizing" => Ok(SingleStage::Finalizing),
      other => Err(DomainError::ValidationError(format!("etapa single desconocida: {}", other))),
    }
  }
}

/// Etapas de la cadena lineal (derivar estilo → enriquecer prompt → edición
/// final). Las etapas opcionales pueden saltarse según configuración: ver
/// `LinearChainState::initial_stage` y `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearStage {
  AwaitingStyle,
  AwaitingEnrichment,
  AwaitingEdit,
  Finalizing,
}

impl LinearStage {
  pub fn as_str(&self) -> &'static str {
    match self {
      LinearStage::AwaitingStyle => "awaiting_style",
      LinearStage::AwaitingEnrichment => "awaiting_enrichment",
      LinearStage::AwaitingEdit => "awaiting_edit",
      LinearStage::Finalizing => "finalizing",
    }
  }

  pub fn parse(s: &str) -> Result<Self, DomainError> {
    match s {
      "awaiting_style" => Ok(LinearStage::AwaitingStyle),
      "awaiting_enrichment" => Ok(LinearStage::AwaitingEnrichment),
      "awaiting_edit" => Ok(LinearStage::AwaitingEdit),
      "finalizing" => Ok(LinearStage::Finalizing),
      other => Err(DomainError::ValidationError(format!("etapa lineal desconocida: {}", other))),
    }
  }

  /// Siguiente etapa de la cadena. `enrichment_enabled` decide si el
  /// enriquecimiento del prompt participa o se salta.
  pub fn next(&self, enrichment_enabled: bool) -> Option<LinearStage> {
    match self {
      LinearStage::AwaitingStyle if enrichment_enabled => Some(LinearStage::AwaitingEnrichment),
      LinearStage::AwaitingStyle => Some(LinearStage::AwaitingEdit),
      LinearStage::AwaitingEnrichment => Some(LinearStage::AwaitingEdit),
      LinearStage::AwaitingEdit => Some(LinearStage::Finalizing),
      LinearStage::Finalizing => None,
    }
  }
}

/// Etapas del pipeline fan-in-then-compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanInStage {
  AwaitingBatch,
  Composing,
  Finalizing,
}

impl FanInStage {
  pub fn as_str(&self) -> &'static str {
    match self {
      FanInStage::AwaitingBatch => "awaiting_batch",
      FanInStage::Composing => "composing",
      FanInStage::Finalizing => "finalizing",
    }
  }

  pub fn parse(s: &str) -> Result<Self, DomainError> {
    match s {
      "awaiting_batch" => Ok(FanInStage::AwaitingBatch),
      "composing" => Ok(FanInStage::Composing),
      "finalizing" => Ok(FanInStage::Finalizing),
      other => Err(DomainError::ValidationError(format!("etapa fan-in desconocida: {}", other))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn linear_next_respects_enrichment_flag() {
    assert_eq!(LinearStage::AwaitingStyle.next(true), Some(LinearStage::AwaitingEnrichment));
    assert_eq!(LinearStage::AwaitingStyle.next(false), Some(LinearStage::AwaitingEdit));
    assert_eq!(LinearStage::AwaitingEnrichment.next(false), Some(LinearStage::AwaitingEdit));
    assert_eq!(LinearStage::AwaitingEdit.next(true), Some(LinearStage::Finalizing));
    assert_eq!(LinearStage::Finalizing.next(true), None);
  }

  #[test]
  fn stage_strings_round_trip() {
    for s in [LinearStage::AwaitingStyle, LinearStage::AwaitingEnrichment, LinearStage::AwaitingEdit] {
      assert_eq!(LinearStage::parse(s.as_str()).unwrap(), s);
    }
    for s in [FanInStage::AwaitingBatch, FanInStage::Composing, FanInStage::Finalizing] {
      assert_eq!(FanInStage::parse(s.as_str()).unwrap(), s);
    }
    assert!(LinearStage::parse("no_such_stage").is_err());
  }
}
