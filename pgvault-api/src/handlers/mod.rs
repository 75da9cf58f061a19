pub mod app;
pub mod backups;
pub mod instances;
pub mod logs;

pub use app::{add_routes, AppState};
