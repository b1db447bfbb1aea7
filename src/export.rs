//! Export of pipeline results.
//!
//! Every table is written as CSV with a header row; undefined values (an
//! undefined Sharpe ratio or volatility) become empty cells. A JSON digest of
//! the whole run goes to `report.json`.
//!
//! | File | Contents |
//! |------|----------|
//! | `risk_regimes.csv` | per-day features and rule labels |
//! | `regime_persistence.csv` | runs of rule signals |
//! | `transition_matrix.csv` | rule signal transition probabilities |
//! | `regime_performance.csv` | performance per rule signal |
//! | `hmm_regimes.csv` | per-day features and HMM state |
//! | `hmm_state_summary.csv` | performance per HMM state |
//! | `hmm_persistence.csv` | runs of HMM states |
//! | `hmm_transition_matrix.csv` | HMM state transition probabilities |
//! | `strategy_returns.csv` | daily returns of every strategy |
//! | `strategy_performance.csv` | Sharpe ratio and max drawdown per strategy |
//! | `report.json` | run summary and HMM diagnostics |
//!
//! # Example
//!
//! ```ignore
//! use regime_engine::export::Exporter;
//!
//! let written = Exporter::new(&report).export_all("results")?;
//! ```

use crate::analysis::{PersistenceRecord, TransitionMatrix};
use crate::error::Result;
use crate::performance::PerformanceRecord;
use crate::pipeline::EngineReport;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const RISK_REGIMES_FILE: &str = "risk_regimes.csv";
pub const REGIME_PERSISTENCE_FILE: &str = "regime_persistence.csv";
pub const TRANSITION_MATRIX_FILE: &str = "transition_matrix.csv";
pub const REGIME_PERFORMANCE_FILE: &str = "regime_performance.csv";
pub const HMM_REGIMES_FILE: &str = "hmm_regimes.csv";
pub const HMM_STATE_SUMMARY_FILE: &str = "hmm_state_summary.csv";
pub const HMM_PERSISTENCE_FILE: &str = "hmm_persistence.csv";
pub const HMM_TRANSITION_MATRIX_FILE: &str = "hmm_transition_matrix.csv";
pub const STRATEGY_RETURNS_FILE: &str = "strategy_returns.csv";
pub const STRATEGY_PERFORMANCE_FILE: &str = "strategy_performance.csv";
pub const REPORT_JSON_FILE: &str = "report.json";

/// Configuration for exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Date format for CSV exports.
    pub date_format: String,
    /// Fixed decimal places; `None` writes the shortest exact representation.
    pub precision: Option<usize>,
    /// Whether to include headers in CSV.
    pub include_headers: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y-%m-%d".to_string(),
            precision: None,
            include_headers: true,
        }
    }
}

/// Writes an [`EngineReport`] to files.
pub struct Exporter<'a> {
    report: &'a EngineReport,
    config: ExportConfig,
}

impl<'a> Exporter<'a> {
    /// Create a new exporter.
    pub fn new(report: &'a EngineReport) -> Self {
        Self {
            report,
            config: ExportConfig::default(),
        }
    }

    /// Create exporter with custom config.
    pub fn with_config(report: &'a EngineReport, config: ExportConfig) -> Self {
        Self { report, config }
    }

    /// Write every table and the JSON report into `dir`, creating it if needed.
    pub fn export_all(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let jobs: [(&str, fn(&Self, &Path) -> Result<()>); 11] = [
            (RISK_REGIMES_FILE, Self::export_risk_regimes_csv),
            (REGIME_PERSISTENCE_FILE, Self::export_regime_persistence_csv),
            (TRANSITION_MATRIX_FILE, Self::export_transition_matrix_csv),
            (REGIME_PERFORMANCE_FILE, Self::export_regime_performance_csv),
            (HMM_REGIMES_FILE, Self::export_hmm_regimes_csv),
            (HMM_STATE_SUMMARY_FILE, Self::export_hmm_state_summary_csv),
            (HMM_PERSISTENCE_FILE, Self::export_hmm_persistence_csv),
            (HMM_TRANSITION_MATRIX_FILE, Self::export_hmm_transition_matrix_csv),
            (STRATEGY_RETURNS_FILE, Self::export_strategy_returns_csv),
            (STRATEGY_PERFORMANCE_FILE, Self::export_strategy_performance_csv),
            (REPORT_JSON_FILE, Self::export_report_json),
        ];

        let mut written = Vec::with_capacity(jobs.len());
        for (name, export) in jobs {
            let path = dir.join(name);
            export(self, &path)?;
            written.push(path);
        }

        info!("Wrote {} files to {}", written.len(), dir.display());
        Ok(written)
    }

    /// Per-day features with rule labels.
    pub fn export_risk_regimes_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            writeln!(
                writer,
                "date,close,returns,volatility_20d,drawdown,vol_state,risk_regime,risk_signal"
            )?;
        }

        for r in &self.report.rules.classification.records {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{}",
                self.date(r.date),
                self.num(r.close),
                self.num(r.returns),
                self.num(r.volatility),
                self.num(r.drawdown),
                r.vol_state,
                r.risk_regime,
                r.risk_signal,
            )?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn export_regime_persistence_csv(&self, path: &Path) -> Result<()> {
        self.write_persistence(path, "risk_signal", &self.report.rules.persistence)
    }

    pub fn export_transition_matrix_csv(&self, path: &Path) -> Result<()> {
        self.write_transitions(path, "risk_signal", &self.report.rules.transitions)
    }

    pub fn export_regime_performance_csv(&self, path: &Path) -> Result<()> {
        self.write_performance(path, "risk_signal", &self.report.rules.performance, true)
    }

    /// Per-day features with the decoded HMM state.
    pub fn export_hmm_regimes_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            writeln!(
                writer,
                "date,close,returns,volatility_20d,drawdown,hmm_state"
            )?;
        }

        for (obs, state) in self.report.series.iter().zip(&self.report.hmm.fit.states) {
            writeln!(
                writer,
                "{},{},{},{},{},{}",
                self.date(obs.date),
                self.num(obs.close),
                self.num(obs.returns),
                self.num(obs.volatility),
                self.num(obs.drawdown),
                state,
            )?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn export_hmm_state_summary_csv(&self, path: &Path) -> Result<()> {
        self.write_performance(path, "hmm_state", &self.report.hmm.state_summary, false)
    }

    pub fn export_hmm_persistence_csv(&self, path: &Path) -> Result<()> {
        self.write_persistence(path, "hmm_state", &self.report.hmm.persistence)
    }

    pub fn export_hmm_transition_matrix_csv(&self, path: &Path) -> Result<()> {
        self.write_transitions(path, "hmm_state", &self.report.hmm.transitions)
    }

    pub fn export_strategy_returns_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            writeln!(
                writer,
                "date,returns,bh_returns,rule_strategy_returns,hmm_strategy_returns"
            )?;
        }

        for row in &self.report.backtest.rows {
            writeln!(
                writer,
                "{},{},{},{},{}",
                self.date(row.date),
                self.num(row.returns),
                self.num(row.bh_returns),
                self.num(row.rule_strategy_returns),
                self.num(row.hmm_strategy_returns),
            )?;
        }

        writer.flush()?;
        Ok(())
    }

    pub fn export_strategy_performance_csv(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            writeln!(writer, "strategy,sharpe_ratio,max_drawdown")?;
        }

        for p in &self.report.backtest.performance {
            writeln!(
                writer,
                "{},{},{}",
                p.strategy,
                self.opt(p.sharpe_ratio),
                self.num(p.max_drawdown),
            )?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Run summary and HMM diagnostics as pretty JSON.
    pub fn export_report_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.report.summary())?;
        Ok(())
    }

    fn write_persistence<L: Display>(
        &self,
        path: &Path,
        label_column: &str,
        records: &[PersistenceRecord<L>],
    ) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            writeln!(writer, "regime_block,{},duration_days", label_column)?;
        }
        for r in records {
            writeln!(writer, "{},{},{}", r.block, r.label, r.duration)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn write_transitions<L: Display>(
        &self,
        path: &Path,
        label_column: &str,
        matrix: &TransitionMatrix<L>,
    ) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            write!(writer, "{}", label_column)?;
            for label in &matrix.labels {
                write!(writer, ",{}", label)?;
            }
            writeln!(writer)?;
        }

        for (label, row) in matrix.labels.iter().zip(&matrix.probabilities) {
            write!(writer, "{}", label)?;
            for &p in row {
                write!(writer, ",{}", self.num(p))?;
            }
            writeln!(writer)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn write_performance<L: Display>(
        &self,
        path: &Path,
        label_column: &str,
        records: &[PerformanceRecord<L>],
        include_hit_ratio: bool,
    ) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        if self.config.include_headers {
            write!(
                writer,
                "{},avg_daily_return,annualized_return,annualized_volatility,sharpe_ratio,max_drawdown",
                label_column
            )?;
            if include_hit_ratio {
                write!(writer, ",hit_ratio")?;
            }
            writeln!(writer, ",num_days")?;
        }

        for r in records {
            write!(
                writer,
                "{},{},{},{},{},{}",
                r.label,
                self.num(r.avg_daily_return),
                self.num(r.annualized_return),
                self.opt(r.annualized_volatility),
                self.opt(r.sharpe_ratio),
                self.num(r.max_drawdown),
            )?;
            if include_hit_ratio {
                write!(writer, ",{}", self.opt(r.hit_ratio))?;
            }
            writeln!(writer, ",{}", r.num_days)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn date(&self, date: NaiveDate) -> impl Display + '_ {
        date.format(&self.config.date_format)
    }

    fn num(&self, value: f64) -> String {
        match self.config.precision {
            Some(prec) => format!("{:.prec$}", value),
            None => value.to_string(),
        }
    }

    fn opt(&self, value: Option<f64>) -> String {
        value.map(|v| self.num(v)).unwrap_or_default()
    }
}
