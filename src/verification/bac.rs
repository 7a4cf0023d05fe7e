use log::{debug, info};

use crate::models::ParsedMrzRecord;
use crate::utils::PassportError;
use crate::validation::check_digit;
use crate::validation::ExpiryValidator;
use crate::verification::apdu::CommandApdu;
use crate::verification::channel::CardConnection;
use crate::verification::crypto::{self, BlockCipher, CipherSuite, KDF_ENC, KDF_MAC};
use crate::verification::secure_messaging::SecureMessaging;

/// The three MRZ fields both BAC and PACE derive their keys from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacKey {
    document_number: String,
    date_of_birth: String,
    date_of_expiry: String,
}

/// Double-length 3DES key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct BacKeys {
    pub k_enc: Vec<u8>,
    pub k_mac: Vec<u8>,
}

impl BacKey {
    /// Validated before any chip I/O: a non-empty document number and two
    /// plausible YYMMDD dates.
    pub fn new(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<Self, PassportError> {
        let number = document_number.trim().to_ascii_uppercase();
        if number.is_empty() {
            return Err(PassportError::InvalidSeed("Document number is empty".to_string()));
        }
        if !number.chars().all(|c| c.is_ascii_alphanumeric() || c == '<') {
            return Err(PassportError::InvalidSeed(format!("Document number {} has invalid characters", number)));
        }
        for (label, date) in [("date of birth", date_of_birth), ("date of expiry", date_of_expiry)] {
            if date.len() != 6 || !date.chars().all(|c| c.is_ascii_digit()) {
                return Err(PassportError::InvalidSeed(format!("{} must be 6 digits, got {:?}", label, date)));
            }
            if !ExpiryValidator::is_plausible_date(date) {
                return Err(PassportError::InvalidSeed(format!("{} {} is not a calendar date", label, date)));
            }
        }
        Ok(BacKey {
            document_number: number,
            date_of_birth: date_of_birth.to_string(),
            date_of_expiry: date_of_expiry.to_string(),
        })
    }

    pub fn from_record(record: &ParsedMrzRecord) -> Result<Self, PassportError> {
        Self::new(&record.document_number, &record.date_of_birth, &record.date_of_expiry)
    }

    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    pub fn date_of_birth(&self) -> &str {
        &self.date_of_birth
    }

    pub fn date_of_expiry(&self) -> &str {
        &self.date_of_expiry
    }

    /// Document number (padded to 9) + check, birth + check, expiry + check.
    pub fn mrz_information(&self) -> String {
        let mut number = self.document_number.clone();
        while number.len() < 9 {
            number.push('<');
        }
        format!(
            "{}{}{}{}{}{}",
            number,
            check_digit::checksum_char(&number),
            self.date_of_birth,
            check_digit::checksum_char(&self.date_of_birth),
            self.date_of_expiry,
            check_digit::checksum_char(&self.date_of_expiry)
        )
    }

    /// Kseed: first 16 bytes of SHA-1 over the MRZ information.
    pub fn key_seed(&self) -> Vec<u8> {
        crypto::sha1(self.mrz_information().as_bytes())[..16].to_vec()
    }

    pub fn derive_keys(&self) -> BacKeys {
        let seed = self.key_seed();
        BacKeys {
            k_enc: crypto::derive_key(&seed, KDF_ENC, CipherSuite::Tdes),
            k_mac: crypto::derive_key(&seed, KDF_MAC, CipherSuite::Tdes),
        }
    }
}

/// Terminal side of the BAC challenge/response. Returns the session
/// secure messaging on success.
pub fn perform_bac(connection: &mut CardConnection, key: &BacKey) -> Result<SecureMessaging, PassportError> {
    let rnd_ifd = crypto::random_bytes(8)?;
    let k_ifd = crypto::random_bytes(16)?;
    perform_bac_with(connection, key, &rnd_ifd, &k_ifd)
}

fn auth_error(message: &str) -> PassportError {
    PassportError::AuthenticationError(message.to_string())
}

pub(crate) fn perform_bac_with(
    connection: &mut CardConnection,
    key: &BacKey,
    rnd_ifd: &[u8],
    k_ifd: &[u8],
) -> Result<SecureMessaging, PassportError> {
    let keys = key.derive_keys();
    let cipher = BlockCipher::new(CipherSuite::Tdes, &keys.k_enc)?;

    let challenge = connection.transmit_ok(&CommandApdu::get_challenge(), "GET CHALLENGE")?;
    let rnd_ic = challenge.data;
    if rnd_ic.len() != 8 {
        return Err(auth_error("Chip challenge is not 8 bytes"));
    }

    let mut s = rnd_ifd.to_vec();
    s.extend_from_slice(&rnd_ic);
    s.extend_from_slice(k_ifd);
    let e_ifd = cipher.cbc_encrypt(&[0u8; 8], &s)?;
    let m_ifd = crypto::retail_mac(&keys.k_mac, &e_ifd)?;
    let mut cryptogram = e_ifd;
    cryptogram.extend(m_ifd);

    let response = connection
        .transmit(&CommandApdu::external_authenticate(cryptogram))?
        .check("EXTERNAL AUTHENTICATE")
        .map_err(|e| {
            debug!("EXTERNAL AUTHENTICATE refused: {}", e);
            auth_error("Chip rejected the access key")
        })?;
    if response.data.len() != 40 {
        return Err(auth_error("Unexpected EXTERNAL AUTHENTICATE response length"));
    }
    let (e_ic, m_ic) = response.data.split_at(32);
    if crypto::retail_mac(&keys.k_mac, e_ic)? != m_ic {
        return Err(auth_error("Chip cryptogram MAC mismatch"));
    }
    let r = cipher.cbc_decrypt(&[0u8; 8], e_ic)?;
    if r[..8] != rnd_ic[..] || r[8..16] != rnd_ifd[..] {
        return Err(auth_error("Chip echoed the wrong nonces"));
    }
    let k_ic = &r[16..32];

    let seed = crypto::xor(k_ifd, k_ic);
    let ks_enc = crypto::derive_key(&seed, KDF_ENC, CipherSuite::Tdes);
    let ks_mac = crypto::derive_key(&seed, KDF_MAC, CipherSuite::Tdes);
    let mut ssc = rnd_ic[4..8].to_vec();
    ssc.extend_from_slice(&rnd_ifd[4..8]);

    info!("BAC established");
    SecureMessaging::new(CipherSuite::Tdes, &ks_enc, &ks_mac, ssc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::simulator::SimulatedChip;

    fn h(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    fn specimen_key() -> BacKey {
        BacKey::new("L898902C", "690806", "940623").unwrap()
    }

    #[test]
    fn test_worked_example_keys() {
        // Doc 9303 Part 11, Appendix D.2
        let key = specimen_key();
        assert_eq!(key.mrz_information(), "L898902C<369080619406236");
        assert_eq!(key.key_seed(), h("239AB9CB282DAF66231DC5A4DF6BFBAE"));
        let keys = key.derive_keys();
        assert_eq!(keys.k_enc, h("AB94FDECF2674FDFB9B391F85D7F76F2"));
        assert_eq!(keys.k_mac, h("7962D9ECE03D1ACD4C76089DCE131543"));
    }

    #[test]
    fn test_seed_validation() {
        assert!(matches!(BacKey::new("", "690806", "940623"), Err(PassportError::InvalidSeed(_))));
        assert!(matches!(BacKey::new("L898902C", "69086", "940623"), Err(PassportError::InvalidSeed(_))));
        assert!(matches!(BacKey::new("L898902C", "691306", "940623"), Err(PassportError::InvalidSeed(_))));
        assert!(matches!(BacKey::new("L8989-02C", "690806", "940623"), Err(PassportError::InvalidSeed(_))));
    }

    #[test]
    fn test_worked_example_handshake() {
        let chip = SimulatedChip::builder(specimen_key())
            .with_bac_nonces(h("4608F91988702212"), h("0B4F80323EB3191CB04970CB4052790B"))
            .build();
        let mut connection = CardConnection::new(Box::new(chip));
        let sm = perform_bac_with(
            &mut connection,
            &specimen_key(),
            &h("781723860C06C226"),
            &h("0B795240CB7049B01C19B33E32804F0B"),
        )
        .unwrap();
        assert_eq!(sm.ssc(), h("887022120C06C226").as_slice());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let chip = SimulatedChip::builder(specimen_key()).build();
        let mut connection = CardConnection::new(Box::new(chip));
        let wrong = BacKey::new("L898902C", "690806", "940624").unwrap();
        assert!(matches!(perform_bac(&mut connection, &wrong), Err(PassportError::AuthenticationError(_))));
    }
}
