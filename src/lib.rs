pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod lexicon;
pub mod media;
pub mod models;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use database::{AudioLinkStore, BatchReport, FileOutcome, ImportFailure};
pub use error::{AudioError, LexiconError};
pub use lexicon::Lexicon;
pub use models::*;
pub use validation::{Finding, FindingKind, Severity, ValidationResult, Validator};
