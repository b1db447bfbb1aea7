//! Regime Engine - market regime detection and regime-aware backtesting.
//!
//! # Overview
//!
//! Labels every trading day of a price series with a market regime, two ways,
//! and measures what trading on those labels would have been worth:
//!
//! - **Rule-based regimes**: volatility terciles plus drawdown depth give a
//!   RISK-ON / NEUTRAL / RISK-OFF signal
//! - **HMM regimes**: a Gaussian hidden Markov model over returns, volatility
//!   and drawdown, fitted by Baum-Welch EM and decoded with Viterbi
//! - **Regime analytics**: run-length persistence, transition matrices and
//!   per-regime performance for any label sequence
//! - **Exposure overlay**: scale exposure by regime and compare against
//!   buy-and-hold on Sharpe ratio and maximum drawdown
//!
//! # Quick Start
//!
//! ```no_run
//! use regime_engine::{
//!     data::{load_csv, DataConfig},
//!     export::Exporter,
//!     pipeline::{EngineConfig, RegimeEngine},
//! };
//!
//! let bars = load_csv("data/index_daily.csv", &DataConfig::default()).unwrap();
//! let engine = RegimeEngine::new(EngineConfig::default()).unwrap();
//! let report = engine.run(&bars).unwrap();
//!
//! for p in &report.backtest.performance {
//!     println!("{}: max drawdown {:.2}%", p.strategy, p.max_drawdown * 100.0);
//! }
//! Exporter::new(&report).export_all("results").unwrap();
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (Bar, Observation)
//! - [`data`]: CSV loading and series validation
//! - [`metrics`]: Return, volatility, Sharpe and drawdown formulas
//! - [`features`]: Returns, rolling volatility and drawdown
//! - [`regime`]: Rule-based regime classifier
//! - [`hmm`]: Gaussian HMM with EM fitting and Viterbi decoding
//! - [`analysis`]: Persistence and transition analysis
//! - [`performance`]: Per-regime performance summaries
//! - [`strategy`]: Exposure overlays and strategy comparison
//! - [`pipeline`]: End-to-end orchestration
//! - [`export`]: CSV and JSON result files
//! - [`analytics`]: Terminal reporting
//! - [`config`]: TOML configuration file support

pub mod analysis;
pub mod analytics;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod features;
pub mod hmm;
pub mod metrics;
pub mod performance;
pub mod pipeline;
pub mod regime;
pub mod strategy;
pub mod types;

pub use analysis::{
    compute_persistence, compute_transition_matrix, PersistenceRecord, TransitionMatrix,
};
pub use data::{load_csv, DataConfig};
pub use error::{RegimeError, Result};
pub use features::{FeatureConfig, FeaturePipeline, ObservationSeries};
pub use hmm::{GaussianHmm, HmmConfig, HmmFit, StateId};
pub use performance::{summarize_by_label, PerformanceRecord};
pub use pipeline::{EngineConfig, EngineReport, RegimeEngine};
pub use regime::{RiskRegime, RiskSignal, RuleClassifier, RuleConfig, VolState};
pub use strategy::{ExposureLevel, ExposureTiers, StrategyPerformance};
pub use types::{Bar, Observation};
