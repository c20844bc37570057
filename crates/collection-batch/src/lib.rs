//! collection-batch: browser-driven download and install engine for mod collections.
//!
//! The engine attaches to a real, logged-in browser session, extracts the
//! ordered mod queue from a collection page, acquires each mod through an
//! ordered list of strategies, reconciles the files that land in the
//! downloads folder, stages and installs the archives, and writes an
//! auditable run report.

pub mod acquisition;
pub mod collection;
pub mod config;
pub mod error;
pub mod install;
pub mod progress;
pub mod queue;
pub mod reconcile;
pub mod report;
pub mod run;
pub mod session;
pub mod types;

pub use collection::CollectionRef;
pub use config::{RunConfig, Timing};
pub use error::{AcquisitionError, BatchError, ExtractionError, InstallError, SessionError};
pub use run::{RunOutcome, Runner, StopFlag};
pub use session::{BrowserSession, SessionSource};
pub use types::*;
