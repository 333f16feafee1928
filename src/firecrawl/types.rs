//! Tipos de request e response da API de scrape do FireCrawl.
//!
//! Structs serializáveis com `serde` que mapeiam o formato JSON do endpoint
//! `POST /v1/scrape`, além de [`DatasetRecord`], a linha que o pipeline
//! grava em `dataset.jsonl` para os estágios seguintes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Corpo da requisição para `POST /v1/scrape`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
    /// Formatos de saída pedidos ao FireCrawl; o pipeline só pede markdown.
    pub formats: Vec<String>,
}

impl ScrapeRequest {
    /// Requisição de scrape de `url` apenas em markdown.
    pub fn markdown(url: &str) -> Self {
        Self {
            url: url.to_string(),
            formats: vec!["markdown".to_string()],
        }
    }
}

/// Resposta completa do endpoint de scrape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<ScrapeData>,
    /// Presente quando `success` é falso.
    #[serde(default)]
    pub error: Option<String>,
}

/// Conteúdo raspado: o markdown e os metadados da página.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeData {
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub metadata: Option<PageMetadata>,
}

/// Metadados da página; só o título é usado pelo pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Um artigo raspado, independente do serviço que o buscou.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedArticle {
    pub url: String,
    pub title: String,
    pub markdown: String,
}

/// Uma linha de `dataset.jsonl`.
///
/// O `id` segue o formato `article-1-<último segmento da URL>`, que os
/// scripts dos estágios usam para nomear suas saídas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub extracted_at: DateTime<Utc>,
}

impl DatasetRecord {
    pub fn from_article(article: &ScrapedArticle) -> Self {
        let tail = article
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .unwrap_or("page");
        Self {
            id: format!("article-1-{tail}"),
            url: article.url.clone(),
            title: article.title.clone(),
            content: article.markdown.clone(),
            extracted_at: Utc::now(),
        }
    }
}
