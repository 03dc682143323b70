// materializer.rs
//
// Materialización de salidas: toda URL efímera del proveedor se copia al
// almacén permanente antes de registrarse como output del job. La subida se
// reintenta con backoff lineal; si una sola referencia agota sus intentos,
// la etapa entera falla — nunca se publica un job con outputs ausentes ni
// con URLs efímeras.
use render_providers::{with_retry, AssetStore, ProviderError, RetryPolicy};
use std::sync::Arc;

pub struct OutputMaterializer {
  assets: Arc<dyn AssetStore>,
  folder: String,
  retry: RetryPolicy,
}

impl OutputMaterializer {
  pub fn new(assets: Arc<dyn AssetStore>, folder: impl Into<String>, retry: RetryPolicy) -> Self {
    OutputMaterializer { assets, folder: folder.into(), retry }
  }

  /// Copia cada referencia al almacén permanente, con recorte centrado si
  /// se pide una relación de aspecto. Todo-o-nada: el primer agotamiento de
  /// reintentos aborta y propaga el error.
  pub async fn materialize(&self, ephemeral_urls: &[String], crop_ratio: Option<&str>)
                           -> Result<Vec<String>, ProviderError> {
    let mut permanent = Vec::with_capacity(ephemeral_urls.len());
    for url in ephemeral_urls {
      let stored = match crop_ratio {
        Some(ratio) => {
          with_retry(&self.retry, "upload_and_crop", || self.assets.upload_and_crop(url, ratio, &self.folder)).await?
        }
        None => with_retry(&self.retry, "upload_permanent", || self.assets.upload_permanent(url, &self.folder)).await?,
      };
      permanent.push(stored);
    }
    Ok(permanent)
  }
}
