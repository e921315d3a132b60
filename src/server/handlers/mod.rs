// API处理器模块

pub mod files;
pub mod logs;
pub mod mutation;
pub mod ui;

pub use files::{download_file, list_directory, upload_files, UploadResponse};
pub use logs::{list_log_dates, read_log, LogDatesResponse, LogQuery};
pub use mutation::{delete_entry, make_directory, rename_entry};
pub use ui::{health_check, index, not_found, HealthResponse};
