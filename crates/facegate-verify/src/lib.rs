//! facegate-verify — The facial-verification session state machine.
//!
//! An in-process library: the presentation layer starts a session for a
//! subject, observes phase/progress/presence through a watch channel,
//! triggers the multi-shot capture, and receives the verdict through the
//! session's event channel.

pub mod catalog;
pub mod config;
pub mod error;
pub mod reference;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use catalog::{CatalogError, HttpCatalog, ReferenceCatalog, ReferenceImage};
pub use config::VerifyConfig;
pub use error::VerifyError;
pub use reference::ReferenceLoader;
pub use session::{Phase, Session, SessionEvent, Snapshot, VerificationReport, Verifier};
