use std::time::Duration;

use log::debug;

use crate::utils::PassportError;
use crate::verification::apdu::{CommandApdu, ResponseApdu};
use crate::verification::secure_messaging::SecureMessaging;

/// Blocking half-duplex link to the contactless chip (NFC IsoDep, PC/SC...).
/// Implementations report link failures as `TransportError`.
pub trait CardChannel: Send {
    fn connect(&mut self) -> Result<(), PassportError>;

    fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>, PassportError>;

    fn close(&mut self);

    fn set_timeout(&mut self, _timeout: Duration) {}
}

/// A connected chip plus the secure messaging state, if any. Commands are
/// wrapped transparently once a channel has been established.
pub struct CardConnection {
    channel: Box<dyn CardChannel>,
    secure: Option<SecureMessaging>,
}

impl CardConnection {
    pub fn new(channel: Box<dyn CardChannel>) -> Self {
        CardConnection { channel, secure: None }
    }

    pub fn is_secure(&self) -> bool {
        self.secure.is_some()
    }

    pub fn set_secure_messaging(&mut self, secure: SecureMessaging) {
        self.secure = Some(secure);
    }

    pub fn clear_secure_messaging(&mut self) {
        self.secure = None;
    }

    pub fn connect(&mut self) -> Result<(), PassportError> {
        self.channel.connect()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.channel.set_timeout(timeout);
    }

    pub fn close(&mut self) {
        self.secure = None;
        self.channel.close();
    }

    /// Send one command, wrapping and unwrapping it when secure messaging
    /// is active. Status words are returned as-is.
    pub fn transmit(&mut self, command: &CommandApdu) -> Result<ResponseApdu, PassportError> {
        let outgoing = match self.secure.as_mut() {
            Some(sm) => sm.wrap(command)?,
            None => command.clone(),
        };
        let bytes = outgoing.to_bytes();
        debug!(">> {}", hex::encode_upper(&bytes));
        let raw = self.channel.transceive(&bytes)?;
        debug!("<< {}", hex::encode_upper(&raw));
        let response = ResponseApdu::parse(&raw)?;
        match self.secure.as_mut() {
            Some(sm) => sm.unwrap(&response),
            None => Ok(response),
        }
    }

    /// `transmit` that fails on any non-9000 status.
    pub fn transmit_ok(&mut self, command: &CommandApdu, context: &str) -> Result<ResponseApdu, PassportError> {
        self.transmit(command)?.check(context)
    }
}

impl Drop for CardConnection {
    fn drop(&mut self) {
        self.channel.close();
    }
}
