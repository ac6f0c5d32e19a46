pub mod config;
pub mod error;
pub mod notebook;
pub mod convert;
pub mod scan;
pub mod watch;

pub use config::Config;
pub use error::{ClassificationError, Result, RmwatchError};
pub use notebook::{classify, FormatVersion, NotebookFile};
pub use convert::{resolve, ConversionDispatcher, ConversionJob, ConversionOutcome, ConversionResult};
pub use watch::{RunSummary, WatchEventSource, WatchRoot, WatcherEngine};
