// state.rs
//
// Estado tipado por pipeline. En el almacén esto viaja como un blob JSON
// opaco (`JobRecord::pipeline_state`); aquí se le da forma de unión etiquetada
// para que el controlador trabaje con tipos y no con un mapa suelto. La
// (de)serialización ocurre sólo en el borde con el repositorio.
use crate::stage::{FanInStage, LinearStage, SingleStage};
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Unión etiquetada de los estados por kind de pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pipeline")]
pub enum PipelineState {
  #[serde(rename = "single_call")]
  Single(SingleState),
  #[serde(rename = "linear_chain")]
  LinearChain(LinearChainState),
  #[serde(rename = "fanin_compose")]
  FanIn(FanInState),
}

impl PipelineState {
  /// Deserializa desde el blob del almacén. Las claves desconocidas del blob
  /// se ignoran aquí pero sobreviven en el almacén: el merge las preserva.
  pub fn from_value(value: &JsonValue) -> Result<Self, DomainError> {
    serde_json::from_value(value.clone()).map_err(DomainError::from)
  }

  /// Serializa el estado completo como patch de merge para el almacén.
  pub fn to_value(&self) -> Result<JsonValue, DomainError> {
    serde_json::to_value(self).map_err(DomainError::from)
  }
}

/// Estado del pipeline de llamada única (también usado por los jobs de
/// realce generados automáticamente).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleState {
  pub prompt: String,
  /// Relación de aspecto nativa esperada de la salida del proveedor.
  #[serde(default)]
  pub aspect_ratio: Option<String>,
  /// Relación objetivo del recorte al subir; `None` = copia sin recorte.
  #[serde(default)]
  pub target_ratio: Option<String>,
}

impl SingleState {
  pub fn initial_stage(&self) -> SingleStage {
    SingleStage::AwaitingTask
  }
}

/// Estado de la cadena lineal. Los campos intermedios se rellenan a medida
/// que cada etapa entrega su salida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearChainState {
  pub prompt: String,
  /// Plantilla de la que derivar un prompt de estilo; `None` salta la
  /// extracción de estilo.
  #[serde(default)]
  pub template_url: Option<String>,
  #[serde(default)]
  pub enrichment_enabled: bool,
  /// Candidatas a imágenes de referencia para la edición final; se filtran
  /// a URLs http(s) absolutas antes de construir la petición.
  #[serde(default)]
  pub reference_urls: Vec<String>,
  #[serde(default)]
  pub aspect_ratio: Option<String>,
  #[serde(default)]
  pub target_ratio: Option<String>,
  /// Salida de `awaiting_style`.
  #[serde(default)]
  pub style_prompt: Option<String>,
  /// Salida de `awaiting_enrichment`.
  #[serde(default)]
  pub enriched_prompt: Option<String>,
}

impl LinearChainState {
  /// Etapa inicial correcta según las etapas opcionales activas: sin
  /// plantilla no hay extracción de estilo; sin enriquecimiento se va
  /// directo a la edición.
  pub fn initial_stage(&self) -> LinearStage {
    if self.template_url.is_some() {
      LinearStage::AwaitingStyle
    } else if self.enrichment_enabled {
      LinearStage::AwaitingEnrichment
    } else {
      LinearStage::AwaitingEdit
    }
  }

  /// Prompt efectivo para la edición final: el enriquecido si existe, si no
  /// el original con el prompt de estilo anexado.
  pub fn effective_prompt(&self) -> String {
    if let Some(enriched) = &self.enriched_prompt {
      return enriched.clone();
    }
    match &self.style_prompt {
      Some(style) => format!("{}\n\nEstilo: {}", self.prompt, style),
      None => self.prompt.clone(),
    }
  }
}

/// Estado del pipeline fan-in-then-compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanInState {
  /// Ids de los sub-tasks declarados del batch; el total del batch es
  /// `expected_tasks.len()`. El resolver de respaldo busca membresía aquí.
  pub expected_tasks: Vec<String>,
  /// Instrucción de composición.
  pub prompt: String,
  #[serde(default)]
  pub template_url: Option<String>,
  #[serde(default)]
  pub aspect_ratio: Option<String>,
  #[serde(default)]
  pub target_ratio: Option<String>,
  /// Deadline explícito de la etapa de composición. Se fija al entrar en
  /// `composing`; si un callback posterior lo observa vencido, aplica la
  /// finalización suave con las salidas del batch.
  #[serde(default)]
  pub compose_deadline: Option<DateTime<Utc>>,
}

impl FanInState {
  pub fn initial_stage(&self) -> FanInStage {
    FanInStage::AwaitingBatch
  }

  pub fn declared_total(&self) -> usize {
    self.expected_tasks.len()
  }

  pub fn is_batch_member(&self, task_id: &str) -> bool {
    self.expected_tasks.iter().any(|t| t == task_id)
  }

  pub fn compose_deadline_passed(&self, now: DateTime<Utc>) -> bool {
    matches!(self.compose_deadline, Some(deadline) if now > deadline)
  }
}

/// Relación de recorte a aplicar al materializar: sólo cuando el estado
/// declara una relación objetivo distinta de la nativa del proveedor.
pub fn crop_ratio_for(target: &Option<String>, native: &Option<String>) -> Option<String> {
  match target {
    Some(t) if !crate::validation::ratios_equal(t, native.as_deref()) => Some(t.clone()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn tagged_serialization_round_trips() {
    let state = PipelineState::FanIn(FanInState { expected_tasks: vec!["t1".into(), "t2".into()],
                                                  prompt: "componer con plantilla".into(),
                                                  template_url: Some("https://cdn.example/tpl.png".into()),
                                                  aspect_ratio: Some("1:1".into()),
                                                  target_ratio: Some("4:5".into()),
                                                  compose_deadline: None });
    let value = state.to_value().expect("serialize");
    assert_eq!(value["pipeline"], json!("fanin_compose"));
    let back = PipelineState::from_value(&value).expect("deserialize");
    match back {
      PipelineState::FanIn(s) => {
        assert_eq!(s.declared_total(), 2);
        assert!(s.is_batch_member("t2"));
        assert!(!s.is_batch_member("t9"));
      }
      _ => panic!("variante inesperada"),
    }
  }

  #[test]
  fn unknown_blob_keys_do_not_break_decoding() {
    // the submission path may stash keys this controller does not own
    let value = json!({
      "pipeline": "linear_chain",
      "prompt": "un gato en acuarela",
      "enrichment_enabled": true,
      "submitter_hint": {"ui": "v2"}
    });
    let state = PipelineState::from_value(&value).expect("deserialize");
    match state {
      PipelineState::LinearChain(s) => {
        assert_eq!(s.initial_stage(), crate::LinearStage::AwaitingEnrichment);
        assert!(s.template_url.is_none());
      }
      _ => panic!("variante inesperada"),
    }
  }

  #[test]
  fn linear_initial_stage_skips_disabled_stages() {
    let base = LinearChainState { prompt: "p".into(),
                                  template_url: None,
                                  enrichment_enabled: false,
                                  reference_urls: vec![],
                                  aspect_ratio: None,
                                  target_ratio: None,
                                  style_prompt: None,
                                  enriched_prompt: None };
    assert_eq!(base.initial_stage(), crate::LinearStage::AwaitingEdit);

    let with_template = LinearChainState { template_url: Some("https://x/t.png".into()), ..base.clone() };
    assert_eq!(with_template.initial_stage(), crate::LinearStage::AwaitingStyle);
  }

  #[test]
  fn crop_only_when_target_differs_from_native() {
    assert_eq!(crop_ratio_for(&Some("4:5".into()), &Some("1:1".into())), Some("4:5".into()));
    assert_eq!(crop_ratio_for(&Some("1:1".into()), &Some("1:1".into())), None);
    assert_eq!(crop_ratio_for(&Some("2:2".into()), &Some("1:1".into())), None);
    assert_eq!(crop_ratio_for(&None, &Some("1:1".into())), None);
    assert_eq!(crop_ratio_for(&Some("4:5".into()), &None), Some("4:5".into()));
  }
}
