pub mod backup;
pub mod instance;
pub mod logs;

pub use backup::Backup;
pub use instance::Instance;
pub use logs::{LogEntry, LogWriter};
