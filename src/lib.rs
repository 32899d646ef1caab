//! ethoflux - behaviour detection engine for rodent pose-tracking sessions
//!
//! ethoflux turns per-frame body-part tracks into scored behaviour episodes
//! through a deterministic pipeline: input adaptation → feature extraction →
//! size calibration → zone construction → prioritised classification →
//! episode resolution.
//!
//! ## Modules
//!
//! - **Scoring pipeline**: score one session, a batch, or reprocess a saved session
//! - **Episode editing**: resize episodes with neighbour reconciliation, manage exclusion ranges
//! - **Persistence**: saved-session JSON with configuration and processing history

pub mod adapter;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod episodes;
pub mod error;
pub mod exclusion;
pub mod features;
pub mod geometry;
pub mod paradigm;
pub mod pipeline;
pub mod session;
pub mod signal;
pub mod size;
pub mod types;
pub mod zones;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use adapter::{parse_session, SessionInput};
pub use config::ScoringConfig;
pub use error::ScoringError;
pub use paradigm::Paradigm;
pub use pipeline::{score_session, score_session_with_config, BehaviourProcessor};
pub use session::{SavedSession, ScoringResult, SessionContext};
pub use types::{Behaviour, BehaviourMap, BehaviourMask, Episode, ScoringFlag};

/// Engine version recorded in every processing history entry
pub const ETHOFLUX_VERSION: &str = env!("CARGO_PKG_VERSION");
