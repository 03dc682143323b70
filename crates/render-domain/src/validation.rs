// validation.rs
//
// Validaciones de formato para construir peticiones al proveedor: sólo URLs
// http(s) absolutas pasan el filtro, y las relaciones de aspecto se comparan
// de forma normalizada ("2:2" equivale a "1:1").

/// Filtra candidatas dejando sólo URLs http(s) absolutas sintácticamente
/// razonables (esquema + host no vacío, sin espacios).
pub fn filter_http_urls(candidates: &[String]) -> Vec<String> {
  candidates.iter().filter(|u| is_http_url(u)).cloned().collect()
}

fn is_http_url(candidate: &str) -> bool {
  let rest = if let Some(r) = candidate.strip_prefix("https://") {
    r
  } else if let Some(r) = candidate.strip_prefix("http://") {
    r
  } else {
    return false;
  };
  let host = rest.split(['/', '?', '#']).next().unwrap_or("");
  !host.is_empty() && !candidate.contains(char::is_whitespace)
}

/// Parsea "W:H" a un par de enteros positivos.
fn parse_ratio(s: &str) -> Option<(u64, u64)> {
  let (w, h) = s.split_once(':')?;
  let w: u64 = w.trim().parse().ok()?;
  let h: u64 = h.trim().parse().ok()?;
  if w == 0 || h == 0 {
    return None;
  }
  Some((w, h))
}

/// Compara una relación objetivo con la nativa (posiblemente ausente).
/// Relaciones no parseables se consideran distintas para forzar el recorte
/// explícito en lugar de asumir igualdad.
pub fn ratios_equal(target: &str, native: Option<&str>) -> bool {
  let (Some((tw, th)), Some((nw, nh))) = (parse_ratio(target), native.and_then(parse_ratio)) else {
    return false;
  };
  // comparación por producto cruzado, sin flotantes
  tw * nh == nw * th
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_filter_keeps_only_absolute_http() {
    let candidates = vec!["https://cdn.example/a.png".to_string(),
                          "http://cdn.example/b.jpg".to_string(),
                          "ftp://cdn.example/c.png".to_string(),
                          "cdn.example/relative.png".to_string(),
                          "https://".to_string(),
                          "https://cdn.example/mal formada.png".to_string()];
    let valid = filter_http_urls(&candidates);
    assert_eq!(valid, vec!["https://cdn.example/a.png", "http://cdn.example/b.jpg"]);
  }

  #[test]
  fn ratio_comparison_normalizes() {
    assert!(ratios_equal("1:1", Some("2:2")));
    assert!(ratios_equal("16:9", Some("16:9")));
    assert!(!ratios_equal("4:5", Some("1:1")));
    // unparseable ratios never compare equal
    assert!(!ratios_equal("wide", Some("1:1")));
    assert!(!ratios_equal("1:0", Some("1:1")));
  }
}
