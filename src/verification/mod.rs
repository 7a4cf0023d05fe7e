pub mod apdu;
pub mod authenticator;
pub mod bac;
pub mod channel;
pub mod crypto;
pub mod ec;
pub mod mrtd;
pub mod pace;
pub mod reader;
pub mod secure_messaging;
#[cfg(test)]
pub(crate) mod simulator;
pub mod tlv;

pub use authenticator::{AuthenticationResult, Authenticator};
pub use bac::BacKey;
pub use channel::{CardChannel, CardConnection};
pub use mrtd::{read_document, AuthSession, ChipSession, ReaderContext};
