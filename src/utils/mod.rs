pub mod config;
pub mod error;

pub use config::{AlignmentConfig, PipelineConfig, ReaderConfig, ScanConfig, StabilizerConfig};
pub use error::PassportError;
