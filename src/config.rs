//! Configuração do videogen carregada a partir de `videogen.toml`.
//!
//! A struct [`VideogenConfig`] é lida uma única vez na inicialização e depois
//! apenas emprestada por referência para o pipeline, o batch e a UI.
//! Valores ausentes no arquivo usam defaults sensíveis, definidos pelas
//! funções `default_*` abaixo. A variável de ambiente `FIRECRAWL_API_KEY`
//! (opcionalmente vinda de `.env`) tem precedência sobre o arquivo.
//!
//! Caminhos relativos em `[paths]` são resolvidos contra o diretório de
//! invocação por [`PathsConfig::resolved_work_dir`] e
//! [`PathsConfig::resolved_stage_dir`], para que o valor substituído em
//! `{work_dir}` signifique o mesmo para o videogen e para cada estágio.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VideogenError};
use crate::runner::RetryPolicy;

const DEFAULT_CONFIG_FILE: &str = "videogen.toml";

/// Backend de montagem de vídeo escolhido para uma execução.
///
/// Estágios com `backend` definido só rodam quando o backend selecionado
/// coincide; os demais rodam sempre.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Montagem local com FFmpeg (gratuita, sem legendas).
    #[default]
    Ffmpeg,
    /// Exportação pelo Descript com legendas automáticas.
    Descript,
    /// Renderização na nuvem pelo Shotstack.
    Shotstack,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Ffmpeg => write!(f, "ffmpeg"),
            Backend::Descript => write!(f, "descript"),
            Backend::Shotstack => write!(f, "shotstack"),
        }
    }
}

/// Configuração de nível superior carregada de `videogen.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideogenConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    /// Estágios executados como subprocessos após o scrape, na ordem declarada.
    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

/// Seção `[runner]`: concorrência, retentativas e limites de tempo.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Número de jobs por janela do batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Tentativas por estágio, contando a primeira.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Limite por job dentro de um batch. Ausente significa sem limite.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Limite padrão para um único subprocesso, em segundos.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Seção `[paths]`: onde ficam checkpoints, logs, artefatos e scripts.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Diretório dos checkpoints JSON, criado no primeiro save.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Diretório do arquivo `batch-results-<data>.json`.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// Diretório dos artefatos de uma execução. Recebe `dataset.jsonl`, é o
    /// valor de `{work_dir}` e a base dos caminhos em `produces`.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Diretório em que os estágios são executados, normalmente onde estão
    /// os scripts. Não muda entre os tópicos de um batch.
    #[serde(default = "default_stage_dir")]
    pub stage_dir: PathBuf,
}

/// Seção `[budget]`.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Teto flexível em dólares; ultrapassá-lo apenas gera um aviso.
    #[serde(default = "default_ceiling_usd")]
    pub ceiling_usd: f64,
}

/// Seção `[scraper]`: acesso à API do FireCrawl.
#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    /// Executa o scrape embutido do FireCrawl antes dos estágios configurados.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Chave da API. Sobrescrita por `FIRECRAWL_API_KEY` quando definida.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_scraper_base_url")]
    pub base_url: String,
    #[serde(default = "default_scraper_timeout_secs")]
    pub timeout_secs: u64,
    /// Custo registrado por página raspada. Zero não registra nada.
    #[serde(default)]
    pub cost_per_page_usd: f64,
}

/// Seção `[batch]`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Tentativas por tópico. Cada tentativa reexecuta o pipeline inteiro.
    #[serde(default = "default_batch_max_attempts")]
    pub max_attempts: u32,
}

/// Um estágio do pipeline, executado como subprocesso sem shell.
///
/// O mesmo `name` pode aparecer mais de uma vez desde que cada ocorrência
/// tenha um `backend` diferente; a validação rejeita qualquer outra repetição.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StageSpec {
    pub name: String,
    pub program: String,
    /// Argumentos; `{url}`, `{work_dir}`, `{backend}` e `{run_id}` são substituídos.
    /// `{work_dir}` é sempre um caminho absoluto.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arquivos que devem existir após o estágio terminar com sucesso,
    /// relativos a `work_dir`.
    #[serde(default)]
    pub produces: Vec<PathBuf>,
    /// Variáveis de ambiente exigidas antes de qualquer trabalho começar.
    #[serde(default)]
    pub requires_env: Vec<String>,
    /// Só executa quando este backend estiver selecionado.
    #[serde(default)]
    pub backend: Option<Backend>,
    /// Sobrescreve `runner.command_timeout_secs` para este estágio.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Custo registrado no ledger quando o estágio termina com sucesso.
    #[serde(default)]
    pub cost: Option<CostSpec>,
}

/// Uma chamada paga, registrada via [`CostTracker::add_call`](crate::cost::CostTracker::add_call).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CostSpec {
    pub service: String,
    pub operation: String,
    pub amount_usd: f64,
    #[serde(default)]
    pub metadata: Value,
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_command_timeout_secs() -> u64 {
    1800
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_stage_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_ceiling_usd() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_scraper_base_url() -> String {
    "https://api.firecrawl.dev".to_string()
}

// Páginas do FireCrawl podem levar minutos para renderizar.
fn default_scraper_timeout_secs() -> u64 {
    300
}

fn default_batch_max_attempts() -> u32 {
    1
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            job_timeout_secs: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            logs_dir: default_logs_dir(),
            work_dir: default_work_dir(),
            stage_dir: default_stage_dir(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            ceiling_usd: default_ceiling_usd(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            base_url: default_scraper_base_url(),
            timeout_secs: default_scraper_timeout_secs(),
            cost_per_page_usd: 0.0,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_batch_max_attempts(),
        }
    }
}

impl RunnerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

impl PathsConfig {
    /// `work_dir` como caminho absoluto, resolvido contra o diretório atual.
    pub fn resolved_work_dir(&self) -> PathBuf {
        absolute_or_self(&self.work_dir)
    }

    /// `stage_dir` como caminho absoluto, resolvido contra o diretório atual.
    pub fn resolved_stage_dir(&self) -> PathBuf {
        absolute_or_self(&self.stage_dir)
    }
}

// `absolute` só falha para um caminho vazio ou sem diretório atual; nesses
// casos o caminho segue como veio e o erro aparece no primeiro uso.
fn absolute_or_self(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StageSpec {
    pub fn runs_for(&self, backend: Backend) -> bool {
        self.backend.is_none_or(|b| b == backend)
    }
}

impl VideogenConfig {
    /// Carrega de `path`, ou de `videogen.toml` no diretório atual.
    ///
    /// Um caminho explícito precisa existir; o arquivo padrão é opcional e,
    /// na sua ausência, todos os defaults são usados. Depois da leitura a
    /// chave do ambiente é aplicada e a configuração é validada.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if !path.exists() => {
                return Err(VideogenError::MissingInput(path.to_path_buf()));
            }
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        // O ambiente tem precedência sobre o arquivo para a chave da API.
        if let Ok(key) = std::env::var("FIRECRAWL_API_KEY") {
            if !key.is_empty() {
                config.scraper.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Rejeita configurações que só falhariam no meio de uma execução:
    /// concorrência zero, orçamento inválido, estágios sem nome ou programa,
    /// estágios repetidos e custos não finitos.
    pub fn validate(&self) -> Result<()> {
        if self.runner.concurrency == 0 {
            return Err(VideogenError::Config(
                "runner.concurrency must be at least 1".into(),
            ));
        }
        if !self.budget.ceiling_usd.is_finite() || self.budget.ceiling_usd < 0.0 {
            return Err(VideogenError::Config(
                "budget.ceiling_usd must be a non-negative number".into(),
            ));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(VideogenError::Config("stage name must not be empty".into()));
            }
            if stage.program.trim().is_empty() {
                return Err(VideogenError::Config(format!(
                    "stage '{}' has no program",
                    stage.name
                )));
            }
            // Variantes por backend podem repetir o nome.
            if !names.insert((stage.name.as_str(), stage.backend)) {
                return Err(VideogenError::Config(format!(
                    "duplicate stage '{}'",
                    stage.name
                )));
            }
            if stage.cost.as_ref().is_some_and(|c| !c.amount_usd.is_finite()) {
                return Err(VideogenError::Config(format!(
                    "stage '{}' has an invalid cost amount",
                    stage.name
                )));
            }
        }
        Ok(())
    }

    /// A chave do FireCrawl, ou um erro de credencial quando ausente.
    pub fn scraper_api_key(&self) -> Result<&str> {
        if self.scraper.api_key.is_empty() {
            Err(VideogenError::MissingCredential("FIRECRAWL_API_KEY".into()))
        } else {
            Ok(&self.scraper.api_key)
        }
    }
}
