//! Delivery delegated to an external sender process

mod classifier;
mod process;

pub use classifier::{OutputClassifier, OutputLine};
pub use process::{ExternalSender, OutputSink, ProcessExit};
