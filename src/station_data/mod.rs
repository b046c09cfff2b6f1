pub mod bulk;
pub mod clean;
pub mod convert;
pub mod data_loader;
pub mod error;
pub mod frame_fetcher;
pub mod reader;
