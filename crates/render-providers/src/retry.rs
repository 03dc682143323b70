// retry.rs
//
// Reintentos acotados con backoff lineal, compartidos por la subida de
// assets y por la sumisión de tasks al proveedor. Sólo se reintentan los
// errores marcados como retryables; los fatales se propagan de inmediato.
use crate::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Política de reintentos: número fijo de intentos y delay base lineal
/// (delay = base * intento).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy { attempts: 3, base_delay: Duration::from_millis(500) }
  }
}

/// Ejecuta `op` hasta `policy.attempts` veces. Devuelve el primer éxito o el
/// último error; los errores no retryables cortan el ciclo inmediatamente.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T, ProviderError>
  where F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>
{
  let mut last_err = ProviderError::Other(format!("{}: sin intentos configurados", op_name));
  for attempt in 1..=policy.attempts.max(1) {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_retryable() && attempt < policy.attempts => {
        log::warn!("{} falló (intento {}/{}): {}", op_name, attempt, policy.attempts, e);
        tokio::time::sleep(policy.base_delay * attempt).await;
        last_err = e;
      }
      Err(e) => return Err(e),
    }
  }
  Err(last_err)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_policy() -> RetryPolicy {
    RetryPolicy { attempts: 3, base_delay: Duration::from_millis(1) }
  }

  #[tokio::test]
  async fn retries_transient_errors_until_success() {
    let calls = AtomicU32::new(0);
    let result = with_retry(&fast_policy(), "op", || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if n < 2 {
          Err(ProviderError::RateLimited("429".into()))
        } else {
          Ok("listo")
        }
      }
    }).await;
    assert_eq!(result.expect("retry"), "listo");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn fatal_errors_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&fast_policy(), "op", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(ProviderError::InvalidResponse("sin task_id".into())) }
    }).await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn exhaustion_returns_last_error() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&fast_policy(), "op", || {
      calls.fetch_add(1, Ordering::SeqCst);
      async { Err(ProviderError::Upload("bucket no disponible".into())) }
    }).await;
    match result {
      Err(ProviderError::Upload(_)) => {}
      other => panic!("se esperaba Upload, llegó {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }
}
