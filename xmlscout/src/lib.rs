pub mod config;
pub mod errors;
pub mod ftp;
pub mod local;
pub mod progress;
pub mod results;
pub mod search;
pub mod source;

pub use config::{ConnectionConfig, LayoutConfig, SearchConfig, SearchMode, StreamConfig};
pub use errors::{SearchError, SearchResult};
pub use ftp::RemoteCatalog;
pub use local::LocalTree;
pub use progress::{ProgressSnapshot, ProgressTracker, StopSignal};
pub use results::{MatchKind, MatchRecord};
pub use search::{SearchCoordinator, SearchReport};
pub use source::{FileEntry, FileSource};
