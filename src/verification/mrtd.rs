use std::sync::Arc;

use log::{info, warn};

use crate::assembler::DocumentAssembler;
use crate::models::{AuthMethod, DocumentRecord};
use crate::processing::biometric::ImageDecoders;
use crate::processing::parsers::MrzParserManager;
use crate::utils::config::ReaderConfig;
use crate::utils::PassportError;
use crate::verification::authenticator::Authenticator;
use crate::verification::bac::BacKey;
use crate::verification::channel::{CardChannel, CardConnection};
use crate::verification::reader::DataGroupReader;

/// Everything a chip session needs besides the channel. Built once and
/// shared between sessions.
pub struct ReaderContext {
    pub config: ReaderConfig,
    pub parsers: MrzParserManager,
    pub decoders: ImageDecoders,
}

impl ReaderContext {
    pub fn new(config: ReaderConfig) -> Self {
        ReaderContext {
            config,
            parsers: MrzParserManager::new(),
            decoders: ImageDecoders::default(),
        }
    }

    pub fn with_decoders(mut self, decoders: ImageDecoders) -> Self {
        self.decoders = decoders;
        self
    }
}

impl Default for ReaderContext {
    fn default() -> Self {
        Self::new(ReaderConfig::default())
    }
}

/// Established access control for one chip tap.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub method: AuthMethod,
    pub key: BacKey,
}

/// One tap of one document. The channel is closed by `close` or on drop.
pub struct ChipSession {
    connection: CardConnection,
    context: Arc<ReaderContext>,
    auth: Option<AuthSession>,
}

impl ChipSession {
    pub fn open(channel: Box<dyn CardChannel>, context: Arc<ReaderContext>) -> Result<Self, PassportError> {
        let mut connection = CardConnection::new(channel);
        connection.set_timeout(context.config.transceive_timeout());
        connection.connect()?;
        info!("Chip session opened");
        Ok(ChipSession {
            connection,
            context,
            auth: None,
        })
    }

    pub fn auth(&self) -> Option<&AuthSession> {
        self.auth.as_ref()
    }

    /// PACE or BAC. A refused key is an `AuthenticationError` carrying the
    /// user-facing message.
    pub fn authenticate(&mut self, key: &BacKey) -> Result<AuthMethod, PassportError> {
        let result = Authenticator::new(&self.context.config).authenticate(&mut self.connection, key)?;
        match (result.success, result.method) {
            (true, Some(method)) => {
                self.auth = Some(AuthSession {
                    method,
                    key: key.clone(),
                });
                Ok(method)
            }
            _ => Err(PassportError::AuthenticationError(
                result.error.unwrap_or_else(|| "Authentication failed".to_string()),
            )),
        }
    }

    /// Read the LDS and assemble the record. Requires `authenticate` first.
    pub fn read(&mut self, progress: &mut dyn FnMut(&str, u8)) -> Result<DocumentRecord, PassportError> {
        let auth = self
            .auth
            .clone()
            .ok_or_else(|| PassportError::AuthenticationError("Chip session is not authenticated".to_string()))?;
        let context = Arc::clone(&self.context);
        let reader = DataGroupReader::new(&context.config, &context.parsers, &context.decoders);
        let inventory = reader.read_all(&mut self.connection, progress)?;
        if inventory.mrz.is_none() {
            warn!("DG1 missing or unreadable");
        }
        let record = DocumentAssembler::assemble(inventory, auth.method, &auth.key);
        progress("Done", 100);
        Ok(record)
    }

    pub fn close(mut self) {
        self.connection.close();
        info!("Chip session closed");
    }
}

/// Open, authenticate, read and close in one go.
pub fn read_document(
    channel: Box<dyn CardChannel>,
    context: Arc<ReaderContext>,
    key: &BacKey,
    progress: &mut dyn FnMut(&str, u8),
) -> Result<DocumentRecord, PassportError> {
    let mut session = ChipSession::open(channel, context)?;
    progress("Authenticating", 0);
    session.authenticate(key)?;
    let record = session.read(progress)?;
    session.close();
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FamilyDetails, HashCheck};
    use crate::processing::pki::tests::build_sod;
    use crate::verification::apdu::EF_SOD;
    use crate::verification::crypto::CipherSuite;
    use crate::verification::reader::tests::{dg1, specimen_chip, specimen_key, SPECIMEN_MRZ};
    use std::collections::BTreeMap;

    #[test]
    fn test_full_read_over_pace() {
        let mut hashed = BTreeMap::new();
        hashed.insert(1u8, dg1(SPECIMEN_MRZ));
        let chip = specimen_chip()
            .with_pace(CipherSuite::Aes128, 13)
            .with_file(EF_SOD, build_sod(&hashed, "DS UTOPIA"))
            .build();
        let mut percents = Vec::new();
        let record = read_document(
            Box::new(chip),
            Arc::new(ReaderContext::default()),
            &specimen_key(),
            &mut |_: &str, percent: u8| percents.push(percent),
        )
        .unwrap();

        assert_eq!(record.authentication, AuthMethod::PACE);
        assert_eq!(record.identity.document_number, "L898902C3");
        assert_eq!(record.identity.face_images.len(), 1);
        assert_eq!(record.data_groups_advertised, vec![1, 2, 15]);
        assert_eq!(record.hash_checks.get(&1), Some(&HashCheck::Match));
        assert_eq!(
            record.security_object.as_ref().and_then(|s| s.signer_name.as_deref()),
            Some("DS UTOPIA")
        );
        assert!(matches!(record.details, FamilyDetails::Passport(_)));
        assert_eq!(percents.last(), Some(&100));
    }

    #[test]
    fn test_read_requires_authentication() {
        let chip = specimen_chip().build();
        let mut session = ChipSession::open(Box::new(chip), Arc::new(ReaderContext::default())).unwrap();
        assert!(session.auth().is_none());
        assert!(matches!(
            session.read(&mut |_: &str, _: u8| {}),
            Err(PassportError::AuthenticationError(_))
        ));
    }

    #[test]
    fn test_refused_key_is_an_error() {
        let chip = specimen_chip().build();
        let wrong = BacKey::new("L898902C3", "740812", "120416").unwrap();
        let result = read_document(Box::new(chip), Arc::new(ReaderContext::default()), &wrong, &mut |_: &str, _: u8| {});
        match result {
            Err(PassportError::AuthenticationError(message)) => assert!(message.contains("120416")),
            other => panic!("unexpected {:?}", other.map(|r| r.identity.document_number)),
        }
    }
}
