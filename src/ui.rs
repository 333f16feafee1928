//! Interface de terminal do videogen: barra de progresso e relatórios coloridos.
//!
//! Usa as crates `indicatif` para a barra de progresso do batch e `console`
//! para estilização com cores. Os logs estruturados vão para stderr via
//! `tracing`; tudo aqui imprime o resumo voltado ao usuário em stdout.
//! A saída dos pipelines filhos é capturada pelo runner e nunca disputa o
//! terminal com a barra.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::TopicRun;
use crate::checkpoint::Checkpoint;
use crate::pipeline::PipelineSummary;
use crate::runner::{BatchReport, Outcome};

/// Indicador visual de progresso de um batch no terminal.
///
/// Avança uma posição a cada tópico concluído e imprime acima da barra uma
/// linha verde (sucesso) ou vermelha (falha) com o título do tópico.
pub struct BatchProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Estilo verde para tópicos concluídos.
    green: Style,
    // Estilo vermelho para tópicos que falharam.
    red: Style,
}

impl BatchProgress {
    /// Cria a barra com `total` posições e inicia a animação do spinner.
    pub fn new(total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Registra a conclusão de um tópico e avança a barra.
    pub fn finished(&self, label: &str, ok: bool) {
        let icon = if ok {
            self.green.apply_to("✓")
        } else {
            self.red.apply_to("✗")
        };
        self.pb.println(format!("  {icon} {label}"));
        self.pb.set_message(label.to_string());
        self.pb.inc(1);
    }

    /// Remove a barra do terminal antes do relatório final.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Formata uma duração em milissegundos: `850ms`, `12.3s` ou `4.5min`.
pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{:.1}min", ms as f64 / 60_000.0)
    }
}

/// Imprime o resultado de cada tópico na ordem de entrada, seguido da
/// contagem de sucessos, falhas e pulos. Falhas mostram a mensagem de erro,
/// que inclui o final do stderr do pipeline filho.
pub fn print_batch_report(report: &BatchReport<TopicRun>) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    let dim = Style::new().dim();

    println!();
    println!("{}", Style::new().bold().apply_to("─── Batch Results ───"));
    for (idx, outcome) in report.outcomes().iter().enumerate() {
        let n = idx + 1;
        match &outcome.outcome {
            Outcome::Success { value, elapsed_ms } => {
                let retries = if value.attempts > 1 {
                    format!(", {} attempts", value.attempts)
                } else {
                    String::new()
                };
                println!(
                    "  {} {n}. {} {}",
                    green.apply_to("✓"),
                    outcome.label,
                    dim.apply_to(format!("({}{retries})", format_duration(*elapsed_ms)))
                );
            }
            Outcome::Failure { error, elapsed_ms } => {
                println!(
                    "  {} {n}. {} {}",
                    red.apply_to("✗"),
                    outcome.label,
                    dim.apply_to(format!("({})", format_duration(*elapsed_ms)))
                );
                println!("       {}", red.apply_to(error));
            }
            Outcome::Skipped { reason } => {
                println!("  {} {n}. {}", yellow.apply_to("○"), outcome.label);
                println!("       {}", dim.apply_to(reason));
            }
        }
    }

    println!();
    println!(
        "  {} succeeded, {} failed, {} skipped in {} window(s), {}",
        green.apply_to(report.succeeded()),
        red.apply_to(report.failed()),
        yellow.apply_to(report.skipped()),
        report.windows(),
        format_duration(report.elapsed_ms())
    );
}

/// Imprime o resumo de uma execução do pipeline: estágios concluídos,
/// custos por serviço e o total comparado ao orçamento. Em dry run lista
/// apenas os passos planejados.
pub fn print_pipeline_summary(summary: &PipelineSummary) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let dim = Style::new().dim();

    println!();
    if summary.dry_run {
        println!("{}", Style::new().yellow().apply_to("─── Dry Run ───"));
        for (idx, name) in summary.planned.iter().enumerate() {
            println!("  {}. {name}", idx + 1);
        }
        return;
    }

    println!("{}", green.apply_to("─── Pipeline Complete ───"));
    println!("  {} {}", dim.apply_to("run"), summary.run_id);
    println!("  {} {}", dim.apply_to("url"), summary.url);
    for stage in &summary.stages {
        let attempts = if stage.attempts > 1 {
            format!(", {} attempts", stage.attempts)
        } else {
            String::new()
        };
        println!(
            "  {} {} {}",
            green.apply_to("✓"),
            stage.name,
            dim.apply_to(format!("({}{attempts})", format_duration(stage.elapsed_ms)))
        );
    }

    let costs = &summary.costs;
    if !costs.by_service.is_empty() {
        println!();
        println!("  Costs");
        for service in &costs.by_service {
            println!("    {:<16} ${:.2}", service.service, service.amount_usd);
        }
    }
    let total = format!("${:.2} / ${:.2}", costs.total_usd, costs.budget_usd);
    if costs.over_budget {
        println!("  Total {} {}", red.apply_to(total), red.apply_to("over budget"));
    } else {
        println!("  Total {total}");
    }
    println!("  Took {}", format_duration(summary.elapsed_ms));
}

/// Lista checkpoints com data, estágio e caminho do arquivo.
pub fn print_checkpoints(checkpoints: &[Checkpoint]) {
    let dim = Style::new().dim();
    if checkpoints.is_empty() {
        println!("No checkpoints found.");
        return;
    }
    for checkpoint in checkpoints {
        println!(
            "{}  {:<24} {}",
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.stage_name,
            dim.apply_to(checkpoint.path.display())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_picks_unit() {
        assert_eq!(format_duration(850), "850ms");
        assert_eq!(format_duration(12_345), "12.3s");
        assert_eq!(format_duration(270_000), "4.5min");
    }
}
