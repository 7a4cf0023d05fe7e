pub mod alignment;
pub mod biometric;
pub mod candidates;
pub mod chinese_name;
pub mod data_groups;
pub mod field_correction;
pub mod geometry;
pub mod image;
pub mod parsers;
pub mod pki;
pub mod stabilizer;

pub use biometric::BiometricProcessor;
pub use data_groups::DataGroupDecoder;
pub use parsers::MrzParserManager;
pub use pki::PKIProcessor;
