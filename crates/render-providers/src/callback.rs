// callback.rs
//
// Normalización del payload de callbacks. Cada proveedor reporta su salida
// con una forma distinta (url suelta, array de urls, objetos `generated`
// anidados); aquí se reduce todo a un `CallbackPayload` uniforme antes de
// entrar al orquestador.
use crate::ProviderError;
use serde_json::Value as JsonValue;

/// Status terminal (o no) de un task del proveedor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
  Queued,
  Running,
  Succeeded,
  Failed,
  Canceled,
}

impl TaskStatus {
  pub fn parse(s: &str) -> Result<Self, ProviderError> {
    match s.to_ascii_lowercase().as_str() {
      "queued" | "pending" | "submitted" => Ok(TaskStatus::Queued),
      "running" | "processing" | "in_progress" | "generating" => Ok(TaskStatus::Running),
      "succeeded" | "success" | "completed" | "done" => Ok(TaskStatus::Succeeded),
      "failed" | "error" => Ok(TaskStatus::Failed),
      "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
      other => Err(ProviderError::InvalidResponse(format!("status desconocido: {}", other))),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Queued => "queued",
      TaskStatus::Running => "running",
      TaskStatus::Succeeded => "succeeded",
      TaskStatus::Failed => "failed",
      TaskStatus::Canceled => "canceled",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled)
  }
}

/// Callback normalizado: id del task, status terminal (o no), urls de salida
/// y/o salida textual (las etapas de estilo/enriquecimiento producen texto).
#[derive(Debug, Clone)]
pub struct CallbackPayload {
  pub task_id: String,
  pub status: TaskStatus,
  pub output_urls: Vec<String>,
  pub text_output: Option<String>,
  pub nsfw: bool,
  /// Razón de fallo reportada por el proveedor, si la hay.
  pub failure_reason: Option<String>,
}

impl CallbackPayload {
  /// Construye el payload normalizado desde el JSON crudo del callback.
  pub fn from_value(raw: &JsonValue) -> Result<Self, ProviderError> {
    let task_id = raw.get("task_id")
                     .or_else(|| raw.get("id"))
                     .and_then(|v| v.as_str())
                     .ok_or(ProviderError::InvalidResponse("callback sin task_id".into()))?
                     .to_string();
    let status_s = raw.get("status")
                      .and_then(|v| v.as_str())
                      .ok_or(ProviderError::InvalidResponse("callback sin status".into()))?;
    let status = TaskStatus::parse(status_s)?;

    let mut urls = Vec::new();
    if let Some(generated) = raw.get("generated") {
      collect_urls(generated, &mut urls);
    }
    if let Some(output) = raw.get("output") {
      collect_urls(output, &mut urls);
    }
    if let Some(more) = raw.get("urls") {
      collect_urls(more, &mut urls);
    }

    // salida textual: un `output` string que no sea URL
    let text_output = raw.get("output")
                         .and_then(|v| v.as_str())
                         .filter(|s| !looks_like_url(s))
                         .map(|s| s.to_string())
                         .or_else(|| raw.get("text").and_then(|v| v.as_str()).map(|s| s.to_string()));

    let nsfw = raw.get("nsfw_flags")
                  .and_then(|v| v.as_array())
                  .map(|flags| flags.iter().any(|f| f.as_bool() == Some(true)))
                  .unwrap_or(false);

    let failure_reason = raw.get("error")
                            .or_else(|| raw.get("failure_reason"))
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());

    Ok(CallbackPayload { task_id, status, output_urls: urls, text_output, nsfw, failure_reason })
  }
}

fn looks_like_url(s: &str) -> bool {
  s.starts_with("http://") || s.starts_with("https://")
}

/// Acumula urls desde cualquiera de las formas conocidas: string, array de
/// strings, array de objetos `{url}`, u objeto anidado `{url | urls | images}`.
fn collect_urls(value: &JsonValue, out: &mut Vec<String>) {
  match value {
    JsonValue::String(s) if looks_like_url(s) => out.push(s.clone()),
    JsonValue::Array(items) => {
      for item in items {
        collect_urls(item, out);
      }
    }
    JsonValue::Object(map) => {
      for key in ["url", "urls", "image_url", "images", "output"] {
        if let Some(inner) = map.get(key) {
          collect_urls(inner, out);
        }
      }
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn normalizes_generated_array_of_objects() {
    let raw = json!({
      "task_id": "t-1",
      "status": "succeeded",
      "generated": [{"url": "https://eph.example/1.png"}, {"url": "https://eph.example/2.png"}],
      "nsfw_flags": [false, false]
    });
    let cb = CallbackPayload::from_value(&raw).expect("parse");
    assert_eq!(cb.task_id, "t-1");
    assert_eq!(cb.status, TaskStatus::Succeeded);
    assert_eq!(cb.output_urls.len(), 2);
    assert!(!cb.nsfw);
  }

  #[test]
  fn normalizes_single_url_and_nested_object() {
    let single = json!({"id": "t-2", "status": "completed", "output": "https://eph.example/a.png"});
    let cb = CallbackPayload::from_value(&single).expect("parse");
    assert_eq!(cb.output_urls, vec!["https://eph.example/a.png"]);
    assert!(cb.text_output.is_none());

    let nested = json!({
      "task_id": "t-3",
      "status": "done",
      "output": {"images": ["https://eph.example/b.png", "https://eph.example/c.png"]}
    });
    let cb = CallbackPayload::from_value(&nested).expect("parse");
    assert_eq!(cb.output_urls.len(), 2);
  }

  #[test]
  fn text_output_is_not_confused_with_urls() {
    let raw = json!({"task_id": "t-4", "status": "succeeded", "output": "estilo impresionista, pinceladas sueltas"});
    let cb = CallbackPayload::from_value(&raw).expect("parse");
    assert!(cb.output_urls.is_empty());
    assert_eq!(cb.text_output.as_deref(), Some("estilo impresionista, pinceladas sueltas"));
  }

  #[test]
  fn terminal_and_failure_statuses() {
    let raw = json!({"task_id": "t-5", "status": "cancelled", "error": "user aborted"});
    let cb = CallbackPayload::from_value(&raw).expect("parse");
    assert_eq!(cb.status, TaskStatus::Canceled);
    assert!(cb.status.is_terminal());
    assert_eq!(cb.failure_reason.as_deref(), Some("user aborted"));

    assert!(!TaskStatus::parse("running").expect("parse").is_terminal());
    assert!(TaskStatus::parse("no-such-status").is_err());
  }

  #[test]
  fn nsfw_flag_set_when_any_true() {
    let raw = json!({"task_id": "t-6", "status": "succeeded", "nsfw_flags": [false, true]});
    let cb = CallbackPayload::from_value(&raw).expect("parse");
    assert!(cb.nsfw);
  }

  #[test]
  fn missing_task_id_is_rejected() {
    let raw = json!({"status": "succeeded"});
    assert!(CallbackPayload::from_value(&raw).is_err());
  }
}
