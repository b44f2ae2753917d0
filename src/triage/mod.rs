//! Inbound message triage: keyword filter, classification oracle, relay.

pub mod filter;
pub mod mock;
pub mod oracle;
pub mod relay;

#[cfg(test)]
mod proptests;

pub use filter::{KeywordFilter, DEFAULT_KEYWORDS};
pub use mock::{ScriptedClassifier, Verdict};
pub use oracle::{Classifier, ClassifierError, ClassifierResult, GeminiClassifier};
pub use relay::{RelayLedger, RelayOutcome, TriageRelay};
