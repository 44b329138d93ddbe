//! Prompt allocation and resumable batch execution.
//!
//! - [`QueueManager`]: the allocation ledger. Owns the prompt pool and
//!   every queue entry, serialises all mutations, and persists before
//!   returning.
//! - [`BatchEngine`]: drives selected entries through an
//!   [`AutomationSession`] one batch at a time, persisting progress after
//!   every prompt.
//! - [`RunRegistry`]: cancellation handles for in-flight runs.
//! - [`DryRunFactory`]: a paced session that submits nothing.

pub mod dry_run;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod options;
pub mod runs;
pub mod session;

pub use dry_run::{DryRunFactory, DryRunSession};
pub use engine::{BatchEngine, EntryOutcome, RunReport};
pub use error::{AllocationError, AllocationErrorKind, EngineError, LedgerError};
pub use ledger::QueueManager;
pub use options::{AdvancedOptions, GenerationOptions, LyricsMode, VocalGender};
pub use runs::RunRegistry;
pub use session::{AutomationSession, ItemResult, SessionError, SessionFactory};
