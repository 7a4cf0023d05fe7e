pub mod assembler;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod utils;
pub mod validation;
pub mod verification;

pub use assembler::DocumentAssembler;
pub use pipeline::{ChipReadCoordinator, FramePipeline, ReadEvent, ScanEvent, TextRecognizer};
pub use utils::{PassportError, ScanConfig};
