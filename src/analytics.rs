//! Terminal reporting of pipeline results.

use crate::analysis::{PersistenceSummary, TransitionMatrix};
use crate::data::DataSummary;
use crate::performance::PerformanceRecord;
use crate::pipeline::EngineReport;
use crate::strategy::StrategyPerformance;
use colored::Colorize;
use std::fmt::Display;
use tabled::{builder::Builder, settings::Style};

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print a full run report to stdout.
    pub fn print_report(report: &EngineReport) {
        let summary = report.summary();
        let fit = &report.hmm.fit;

        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " REGIME DETECTION RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!(
            "  Period:          {} to {}",
            summary.start_date, summary.end_date
        );
        println!("  Observations:    {}", summary.num_observations);
        println!(
            "  Vol thresholds:  low {:.4} / high {:.4}",
            summary.vol_thresholds.0, summary.vol_thresholds.1
        );
        println!();

        println!("{}", "Rule-Based Regimes".bold().underline());
        println!("{}", Self::performance_table("Signal", &report.rules.performance));
        println!("{}", Self::persistence_table("Signal", &report.rules.persistence_summary));
        println!("{}", Self::transition_table(&report.rules.transitions));
        println!();

        println!("{}", "HMM Regimes".bold().underline());
        println!(
            "  Iterations:      {} (restart {}, seed {})",
            fit.n_iter, fit.restart, fit.seed
        );
        println!("  Log-likelihood:  {:.4}", fit.log_likelihood);
        if fit.converged {
            println!("  Converged:       {}", "yes".green());
        } else {
            println!(
                "  {}",
                format!(
                    "Warning: EM did not converge after {} iterations; using best parameters",
                    fit.n_iter
                )
                .yellow()
            );
        }
        println!("{}", Self::performance_table("State", &report.hmm.state_summary));
        println!("{}", Self::persistence_table("State", &report.hmm.persistence_summary));
        println!("{}", Self::transition_table(&report.hmm.transitions));
        let ranking: Vec<String> = report
            .hmm
            .exposure
            .ranking
            .iter()
            .map(|s| {
                let level = report
                    .hmm
                    .exposure
                    .exposures
                    .get(s)
                    .map_or_else(String::new, |l| l.to_string());
                format!("{} ({})", s, level)
            })
            .collect();
        println!("  Exposure rank:   {}", ranking.join(" > "));
        println!();

        println!("{}", "Strategy Comparison".bold().underline());
        println!("{}", Self::strategy_table(&report.backtest.performance));
        println!();

        println!("{}", "═".repeat(60).blue());
    }

    /// Per-label performance as a table.
    pub fn performance_table<L: Display>(
        label_header: &str,
        records: &[PerformanceRecord<L>],
    ) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            label_header,
            "Days",
            "Avg Daily %",
            "Annual %",
            "Vol %",
            "Sharpe",
            "Max DD %",
            "Hit %",
        ]);

        for r in records {
            builder.push_record([
                r.label.to_string(),
                r.num_days.to_string(),
                format!("{:.3}", r.avg_daily_return * 100.0),
                format!("{:.2}", r.annualized_return * 100.0),
                Self::format_opt(r.annualized_volatility.map(|v| v * 100.0)),
                Self::format_opt(r.sharpe_ratio),
                format!("{:.2}", r.max_drawdown * 100.0),
                Self::format_opt(r.hit_ratio.map(|h| h * 100.0)),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Run-length statistics as a table.
    pub fn persistence_table<L: Display>(
        label_header: &str,
        summary: &[PersistenceSummary<L>],
    ) -> String {
        let mut builder = Builder::new();
        builder.push_record([label_header, "Runs", "Days", "Avg Run", "Max Run", "Time %"]);

        for s in summary {
            builder.push_record([
                s.label.to_string(),
                s.num_runs.to_string(),
                s.total_days.to_string(),
                format!("{:.1}", s.mean_duration),
                s.max_duration.to_string(),
                format!("{:.1}", s.share_of_time * 100.0),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Transition probabilities with one row per current label.
    pub fn transition_table<L: Display>(matrix: &TransitionMatrix<L>) -> String {
        let mut builder = Builder::new();
        let mut header = vec!["From \\ To".to_string()];
        header.extend(matrix.labels.iter().map(|l| l.to_string()));
        builder.push_record(header);

        for (label, row) in matrix.labels.iter().zip(&matrix.probabilities) {
            let mut record = vec![label.to_string()];
            record.extend(row.iter().map(|p| format!("{:.3}", p)));
            builder.push_record(record);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Strategy comparison as a table.
    pub fn strategy_table(performance: &[StrategyPerformance]) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Strategy", "Sharpe", "Max DD %", "Total %", "Annual %"]);

        for p in performance {
            builder.push_record([
                p.strategy.clone(),
                Self::format_opt(p.sharpe_ratio),
                format!("{:.2}", p.max_drawdown * 100.0),
                Self::format_pct_change(p.total_return * 100.0),
                format!("{:.2}", p.annualized_return * 100.0),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Print a loaded data summary.
    pub fn print_data_summary(summary: &DataSummary) {
        println!("{}", "Data Summary".bold().underline());
        println!("  Rows:            {}", summary.rows);
        println!("  Period:          {} to {}", summary.start, summary.end);
        println!(
            "  Close range:     {:.2} - {:.2} (avg {:.2})",
            summary.min_close, summary.max_close, summary.avg_close
        );
        println!("  Avg volume:      {:.0}", summary.avg_volume);
    }

    /// Run summary as pretty JSON.
    pub fn to_json(report: &EngineReport) -> String {
        serde_json::to_string_pretty(&report.summary()).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_opt(value: Option<f64>) -> String {
        value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("+{:.2}", pct).green().to_string()
        } else {
            format!("{:.2}", pct).red().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{compute_persistence, compute_transition_matrix, summarize_persistence};
    use crate::performance::summarize_by_label;
    use crate::regime::RiskSignal;

    #[test]
    fn test_performance_table_marks_undefined() {
        let labels = [RiskSignal::RiskOn, RiskSignal::RiskOff, RiskSignal::RiskOff];
        let records = summarize_by_label(&labels, &[0.01, 0.02, -0.01], true, 252.0).unwrap();
        let table = ResultFormatter::performance_table("Signal", &records);
        assert!(table.contains("RISK-ON"));
        assert!(table.contains("RISK-OFF"));
        assert!(table.contains("n/a"));
    }

    #[test]
    fn test_transition_and_persistence_tables() {
        let labels = [1, 1, 2, 1];
        let matrix = ResultFormatter::transition_table(&compute_transition_matrix(&labels));
        assert!(matrix.contains("0.500"));
        assert!(matrix.contains("1.000"));

        let summary = summarize_persistence(&compute_persistence(&labels));
        let table = ResultFormatter::persistence_table("State", &summary);
        assert!(table.contains("Runs"));
        assert!(table.contains("75.0"));
    }

    #[test]
    fn test_strategy_table() {
        let perf = vec![StrategyPerformance::from_returns(
            "Buy & Hold",
            &[0.01, -0.02, 0.03],
            252.0,
        )];
        let table = ResultFormatter::strategy_table(&perf);
        assert!(table.contains("Buy & Hold"));
        assert!(table.contains("Sharpe"));
    }
}
