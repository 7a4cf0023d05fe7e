pub mod check_digit;
pub mod expiry;
pub mod format;

pub use expiry::ExpiryValidator;
pub use format::FormatClassifier;
