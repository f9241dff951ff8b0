//! riskgate-core — real-time fraud risk-decision engine and the
//! transaction/refund monetary state machine it gates.
//!
//! One evaluation flows: velocity counter + anomaly detectors (parallel
//! reads) -> rule set -> scorer -> decision gate -> transaction state
//! machine. Refund and chargeback operations later mutate the monetary
//! ledger under an optimistic version check.

pub mod anomaly;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod gate;
pub mod refund;
pub mod review;
pub mod rules;
pub mod scoring;
pub mod stats;
pub mod store;
pub mod transaction;
pub mod types;
pub mod velocity;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, MerchantFraudSettings};
pub use engine::{FraudAnalysis, FraudEngine};
pub use error::{EngineError, EngineResult};
pub use gate::GateAction;
pub use scoring::{RiskAssessment, RiskLevel};
pub use store::EngineStore;
pub use transaction::{TransactionAttempt, TransactionRecord, TransactionStatus};
