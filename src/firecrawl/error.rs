//! Tipos de erro para o cliente de scrape do FireCrawl.
//!
//! Define [`ScrapeError`] com variantes para rate limiting, erros da API,
//! respostas vazias e erros de rede. Usa `thiserror` para derivar `Display`
//! e `Error` a partir dos atributos `#[error(...)]`. Todas as variantes são
//! retentadas pelo estágio de scrape do pipeline.

use thiserror::Error;

/// Erros que podem ocorrer ao raspar um artigo.
///
/// As variantes cobrem os cenários de falha observados na API:
/// - [`RateLimited`](ScrapeError::RateLimited: o servidor retornou HTTP 429
/// - [`ApiError`](ScrapeError::ApiError: outro erro HTTP ou `success: false`
/// - [`Empty`](ScrapeError::Empty: resposta sem conteúdo em markdown
/// - [`NetworkError`](ScrapeError::NetworkError: falha na camada de rede
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// O servidor retornou HTTP 429 (rate limit).
    /// `retry_after_ms` vem do header `retry-after` quando presente, saturando
    /// em `u64::MAX` para valores absurdos.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Status fora de 2xx, ou corpo 2xx com `success: false`.
    /// Contém o código HTTP e a mensagem retornada.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A resposta não trouxe conteúdo em markdown.
    #[error("empty scrape result for {0}")]
    Empty(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    /// Encapsula o erro original do `reqwest` via `#[from]`.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = ScrapeError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
    }

    #[test]
    fn api_error_display() {
        let err = ScrapeError::ApiError {
            status: 402,
            message: "Payment required".into(),
        };
        assert_eq!(err.to_string(), "API error (status 402): Payment required");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScrapeError>();
    }
}
