//! Definição da interface de linha de comando do videogen.
//!
//! Usa `clap` com derive macros para gerar o parser de argumentos.
//! A struct [`Cli`] contém as flags globais (`--config`, `--verbose`) e o
//! enum [`Command`] define os subcomandos: `pipeline` para um artigo,
//! `batch` para uma lista de tópicos, `checkpoints` para inspecionar o
//! histórico gravado e `example` para gerar uma configuração inicial.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Backend;

/// videogen: transforma artigos em vídeos narrados, um de cada vez ou em lote.
#[derive(Debug, Parser)]
#[command(name = "videogen", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração. Usa ./videogen.toml quando presente.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita logs em nível debug (RUST_LOG continua tendo precedência).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Subcomandos disponíveis na CLI.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o pipeline completo para um artigo.
    Pipeline {
        /// URL do artigo. Usa o artigo de exemplo embutido quando omitida.
        url: Option<String>,

        /// Backend de montagem do vídeo.
        #[arg(long, value_enum, default_value_t = Backend::Ffmpeg)]
        backend: Backend,

        /// Sobrescreve `paths.work_dir` nesta execução. Caminhos relativos
        /// são resolvidos contra o diretório atual.
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Mostra o que seria executado sem raspar nem executar nada.
        #[arg(long)]
        dry_run: bool,
    },

    /// Executa um pipeline por tópico, em janelas de jobs paralelos.
    Batch {
        /// Array JSON de tópicos. Usa a lista embutida quando omitido.
        topics: Option<PathBuf>,

        /// Jobs por janela (sobrescreve `runner.concurrency`).
        #[arg(long, conflicts_with = "sequential", value_parser = clap::value_parser!(u16).range(1..))]
        parallel: Option<u16>,

        /// Um job de cada vez.
        #[arg(long)]
        sequential: bool,

        /// Reporta todos os tópicos como pulados sem executar nada.
        #[arg(long)]
        dry_run: bool,

        /// Backend de montagem repassado a cada pipeline.
        #[arg(long, value_enum, default_value_t = Backend::Ffmpeg)]
        backend: Backend,

        /// Termina com código não-zero se algum tópico falhar.
        #[arg(long)]
        strict: bool,
    },

    /// Lista os checkpoints gravados, do mais antigo ao mais recente.
    Checkpoints {
        /// Mostra apenas este estágio.
        stage: Option<String>,
    },

    /// Imprime uma configuração de exemplo comentada.
    Example,
}

impl Command {
    /// Tamanho da janela do batch: `--sequential` vence, depois
    /// `--parallel`, depois o valor configurado.
    pub fn batch_concurrency(sequential: bool, parallel: Option<u16>, configured: usize) -> usize {
        if sequential {
            1
        } else {
            parallel.map(usize::from).unwrap_or(configured)
        }
    }
}
