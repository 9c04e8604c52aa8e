//! Media fetch pipeline
//! Classifies listed posts and downloads their images under a global concurrency ceiling

pub mod classifier;
pub mod dispatcher;
pub mod fetch;
pub mod filename;
pub mod post;
pub mod report;

pub use classifier::{Classification, ClassificationPolicy, Classifier};
pub use dispatcher::{Dispatcher, DispatcherConfig, RunSummary};
pub use fetch::{FetchOutcome, FetchTask};
pub use post::{Channel, Post};
pub use report::{ReportSink, TracingSink};
