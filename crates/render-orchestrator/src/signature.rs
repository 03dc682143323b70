// signature.rs
//
// Verificación de firmas de webhooks. El proveedor firma
// `{id}.{timestamp}.{body}` con HMAC-SHA256 sobre un secreto compartido;
// la cabecera de firma puede traer varias candidatas versionadas separadas
// por espacios ("v1,<base64> v2,<base64>") y basta con que una coincida.
// El timestamp limita la ventana de replay a ±5 minutos.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Tolerancia de replay: el timestamp no puede alejarse más de 5 minutos
/// del reloj local, en ninguna dirección.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Prefijo de secretos codificados: el resto es base64 y debe decodificarse
/// antes de usarse como clave HMAC.
const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
  #[error("falta la cabecera {0}")]
  MissingHeader(&'static str),
  #[error("timestamp inválido o fuera de la ventana de tolerancia")]
  StaleTimestamp,
  #[error("ninguna firma candidata coincide")]
  NoMatch,
  #[error("secreto de webhook inválido: {0}")]
  BadSecret(String),
}

/// Verificador de callbacks entrantes.
pub struct WebhookVerifier {
  secret: Vec<u8>,
  bypass: bool,
}

impl WebhookVerifier {
  /// Construye el verificador desde el secreto compartido. Un secreto con
  /// prefijo `whsec_` se decodifica de base64; cualquier otro se usa tal
  /// cual como bytes.
  pub fn new(secret: &str) -> Result<Self, SignatureError> {
    let raw = match secret.strip_prefix(SECRET_PREFIX) {
      Some(encoded) => BASE64.decode(encoded).map_err(|e| SignatureError::BadSecret(e.to_string()))?,
      None => secret.as_bytes().to_vec(),
    };
    if raw.is_empty() {
      return Err(SignatureError::BadSecret("secreto vacío".into()));
    }
    Ok(WebhookVerifier { secret: raw, bypass: false })
  }

  /// Modo sin verificación para entornos no productivos. La decisión es
  /// explícita y se loguea en cada aceptación: nunca silenciosa.
  pub fn bypassed() -> Self {
    log::warn!("verificación de firma de webhooks DESACTIVADA: todo callback será aceptado");
    WebhookVerifier { secret: Vec::new(), bypass: true }
  }

  /// Verifica un callback a partir de las cabeceras tal como llegan
  /// (posiblemente ausentes) y el cuerpo crudo, leído una sola vez.
  pub fn verify(&self,
                id: Option<&str>,
                timestamp: Option<&str>,
                signature: Option<&str>,
                body: &[u8],
                now: DateTime<Utc>)
                -> Result<(), SignatureError> {
    if self.bypass {
      log::warn!("aceptando callback sin verificar firma (modo bypass)");
      return Ok(());
    }
    let id = id.ok_or(SignatureError::MissingHeader("webhook-id"))?;
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader("webhook-timestamp"))?;
    let signature = signature.ok_or(SignatureError::MissingHeader("webhook-signature"))?;

    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::StaleTimestamp)?;
    if (now.timestamp() - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
      return Err(SignatureError::StaleTimestamp);
    }

    let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| SignatureError::BadSecret(e.to_string()))?;
    mac.update(id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    for candidate in signature.split_whitespace() {
      // cada candidata viene como "v1,<base64>"; sin versión también se acepta
      let encoded = candidate.split_once(',').map(|(_, s)| s).unwrap_or(candidate);
      let Ok(bytes) = BASE64.decode(encoded) else {
        continue;
      };
      // verify_slice compara en tiempo constante
      if mac.clone().verify_slice(&bytes).is_ok() {
        return Ok(());
      }
    }
    Err(SignatureError::NoMatch)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sign(secret: &[u8], id: &str, ts: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("clave");
    mac.update(format!("{}.{}.", id, ts).as_bytes());
    mac.update(body);
    format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
  }

  #[test]
  fn accepts_a_valid_signature() {
    let secret = format!("whsec_{}", BASE64.encode(b"clave-secreta"));
    let verifier = WebhookVerifier::new(&secret).expect("verifier");
    let now = Utc::now();
    let ts = now.timestamp();
    let body = br#"{"task_id":"t-1","status":"succeeded"}"#;
    let sig = sign(b"clave-secreta", "msg-1", ts, body);
    assert!(verifier.verify(Some("msg-1"), Some(&ts.to_string()), Some(&sig), body, now).is_ok());
  }

  #[test]
  fn any_matching_candidate_among_many_passes() {
    let verifier = WebhookVerifier::new("clave-plana").expect("verifier");
    let now = Utc::now();
    let ts = now.timestamp();
    let body = b"{}";
    let good = sign(b"clave-plana", "msg-2", ts, body);
    let header = format!("v1,AAAA {} v2,BBBB", good);
    assert!(verifier.verify(Some("msg-2"), Some(&ts.to_string()), Some(&header), body, now).is_ok());
  }

  #[test]
  fn stale_timestamp_is_rejected_even_with_valid_signature() {
    let verifier = WebhookVerifier::new("clave-plana").expect("verifier");
    let now = Utc::now();
    let ts = now.timestamp() - 600; // 10 minutos atrás
    let body = b"{}";
    let sig = sign(b"clave-plana", "msg-3", ts, body);
    let err = verifier.verify(Some("msg-3"), Some(&ts.to_string()), Some(&sig), body, now).unwrap_err();
    assert_eq!(err, SignatureError::StaleTimestamp);
  }

  #[test]
  fn wrong_signature_and_missing_headers_fail() {
    let verifier = WebhookVerifier::new("clave-plana").expect("verifier");
    let now = Utc::now();
    let ts = now.timestamp().to_string();
    let err = verifier.verify(Some("msg-4"), Some(&ts), Some("v1,Zm9ybWFkbw=="), b"{}", now).unwrap_err();
    assert_eq!(err, SignatureError::NoMatch);
    let err = verifier.verify(None, Some(&ts), Some("v1,x"), b"{}", now).unwrap_err();
    assert_eq!(err, SignatureError::MissingHeader("webhook-id"));
  }

  #[test]
  fn bypass_mode_accepts_anything() {
    let verifier = WebhookVerifier::bypassed();
    assert!(verifier.verify(None, None, None, b"{}", Utc::now()).is_ok());
  }
}
