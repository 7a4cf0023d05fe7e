use log::{debug, info, warn};

use crate::models::{AuthMethod, SecurityInfo, SecurityInfoKind};
use crate::processing::data_groups::DataGroupDecoder;
use crate::utils::config::ReaderConfig;
use crate::utils::PassportError;
use crate::verification::apdu::{CommandApdu, EF_CARD_ACCESS, MRTD_AID};
use crate::verification::bac::{self, BacKey};
use crate::verification::channel::CardConnection;
use crate::verification::pace;
use crate::verification::reader;

/// Outcome of the access-control phase.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub method: Option<AuthMethod>,
    pub success: bool,
    pub error: Option<String>,
    /// What EF.CardAccess advertised, if it could be read.
    pub security_infos: Vec<SecurityInfo>,
}

impl AuthenticationResult {
    fn succeeded(method: AuthMethod, security_infos: Vec<SecurityInfo>) -> Self {
        AuthenticationResult {
            method: Some(method),
            success: true,
            error: None,
            security_infos,
        }
    }

    fn failed(error: String, security_infos: Vec<SecurityInfo>) -> Self {
        AuthenticationResult {
            method: None,
            success: false,
            error: Some(error),
            security_infos,
        }
    }
}

/// Tries PACE first when the chip advertises it, then BAC.
pub struct Authenticator {
    try_pace: bool,
    read_chunk_size: u8,
}

impl Authenticator {
    pub fn new(config: &ReaderConfig) -> Self {
        Authenticator {
            try_pace: config.try_pace,
            read_chunk_size: config.read_chunk_size,
        }
    }

    /// EF.CardAccess lives in the master file; some chips only expose it
    /// once the eMRTD application is selected.
    fn read_card_access(&self, connection: &mut CardConnection) -> Result<Vec<SecurityInfo>, PassportError> {
        let bytes = match reader::read_elementary_file(connection, EF_CARD_ACCESS, self.read_chunk_size) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                debug!("EF.CardAccess not readable before application selection: {}", e);
                connection.transmit_ok(&CommandApdu::select_application(&MRTD_AID), "SELECT eMRTD application")?;
                match reader::read_elementary_file(connection, EF_CARD_ACCESS, self.read_chunk_size) {
                    Ok(bytes) => Some(bytes),
                    Err(e) if e.is_transport() => return Err(e),
                    Err(e) => {
                        debug!("No EF.CardAccess: {}", e);
                        None
                    }
                }
            }
        };
        Ok(match bytes {
            Some(bytes) => DataGroupDecoder::security_infos(&bytes).unwrap_or_else(|e| {
                warn!("EF.CardAccess could not be decoded: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        })
    }

    fn attempt_pace(
        &self,
        connection: &mut CardConnection,
        key: &BacKey,
        infos: &[SecurityInfo],
    ) -> Result<bool, PassportError> {
        let params = match pace::select_parameters(infos) {
            Ok(params) => params,
            Err(e) => {
                info!("PACE advertised but not usable, falling back to BAC: {}", e);
                return Ok(false);
            }
        };
        let attempt = pace::perform_pace(connection, key, &params).and_then(|secure| {
            connection.set_secure_messaging(secure);
            connection
                .transmit_ok(&CommandApdu::select_application(&MRTD_AID), "SELECT eMRTD application")
                .map(|_| ())
        });
        match attempt {
            Ok(()) => Ok(true),
            Err(e) if e.is_transport() && !matches!(e, PassportError::SecureMessagingError(_)) => Err(e),
            Err(e) => {
                warn!("PACE failed, falling back to BAC: {}", e);
                connection.clear_secure_messaging();
                Ok(false)
            }
        }
    }

    /// Establish secure messaging on `connection`. Only transport failures
    /// are returned as errors; a refused key ends up in the result.
    pub fn authenticate(
        &self,
        connection: &mut CardConnection,
        key: &BacKey,
    ) -> Result<AuthenticationResult, PassportError> {
        let infos = self.read_card_access(connection)?;
        let pace_advertised = infos.iter().any(|i| i.kind == SecurityInfoKind::Pace);

        if pace_advertised && self.try_pace {
            if self.attempt_pace(connection, key, &infos)? {
                return Ok(AuthenticationResult::succeeded(AuthMethod::PACE, infos));
            }
        } else if pace_advertised {
            debug!("PACE disabled by configuration");
        }

        connection.transmit_ok(&CommandApdu::select_application(&MRTD_AID), "SELECT eMRTD application")?;
        match bac::perform_bac(connection, key) {
            Ok(secure) => {
                connection.set_secure_messaging(secure);
                if pace_advertised {
                    info!("Authenticated with BAC although the chip supports PACE");
                }
                Ok(AuthenticationResult::succeeded(AuthMethod::BAC, infos))
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                warn!("BAC failed: {}", e);
                Ok(AuthenticationResult::failed(
                    format!(
                        "Access denied. Check document number {}, date of birth {} and date of expiry {}",
                        key.document_number(),
                        key.date_of_birth(),
                        key.date_of_expiry()
                    ),
                    infos,
                ))
            }
        }
    }
}
