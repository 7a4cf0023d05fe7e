use log::{debug, info};
use num_bigint::BigUint;

use crate::models::{SecurityInfo, SecurityInfoKind};
use crate::utils::PassportError;
use crate::verification::apdu::CommandApdu;
use crate::verification::bac::BacKey;
use crate::verification::channel::CardConnection;
use crate::verification::crypto::{self, BlockCipher, CipherSuite, KDF_ENC, KDF_MAC, KDF_PACE};
use crate::verification::ec::{Curve, EcPoint};
use crate::verification::secure_messaging::SecureMessaging;
use crate::verification::tlv::{self, Tlv};

pub const ID_PACE: &str = "0.4.0.127.0.7.2.2.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceMapping {
    DhGeneric,
    EcdhGeneric,
    DhIntegrated,
    EcdhIntegrated,
    EcdhChipAuthentication,
}

/// A PACE protocol OID broken down into mapping and cipher suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaceProtocol {
    pub oid: String,
    pub mapping: PaceMapping,
    pub suite: CipherSuite,
}

impl PaceProtocol {
    pub fn from_oid(oid: &str) -> Option<PaceProtocol> {
        let rest = oid.strip_prefix(ID_PACE)?.strip_prefix('.')?;
        let mut arcs = rest.split('.');
        let mapping = match arcs.next()? {
            "1" => PaceMapping::DhGeneric,
            "2" => PaceMapping::EcdhGeneric,
            "3" => PaceMapping::DhIntegrated,
            "4" => PaceMapping::EcdhIntegrated,
            "6" => PaceMapping::EcdhChipAuthentication,
            _ => return None,
        };
        let suite = match arcs.next()? {
            "1" => CipherSuite::Tdes,
            "2" => CipherSuite::Aes128,
            "3" => CipherSuite::Aes192,
            "4" => CipherSuite::Aes256,
            _ => return None,
        };
        if arcs.next().is_some() {
            return None;
        }
        Some(PaceProtocol {
            oid: oid.to_string(),
            mapping,
            suite,
        })
    }
}

/// The PACEInfo the reader will run, with its resolved curve.
#[derive(Debug, Clone)]
pub struct PaceParameters {
    pub protocol: PaceProtocol,
    pub parameter_id: u32,
    pub curve: Curve,
}

/// Pick the first PACEInfo this reader can run: ECDH generic mapping on a
/// supported standardized curve.
pub fn select_parameters(infos: &[SecurityInfo]) -> Result<PaceParameters, PassportError> {
    let mut seen = Vec::new();
    for info in infos.iter().filter(|i| i.kind == SecurityInfoKind::Pace) {
        seen.push(info.protocol.clone());
        let Some(protocol) = PaceProtocol::from_oid(&info.protocol) else {
            continue;
        };
        if protocol.mapping != PaceMapping::EcdhGeneric {
            continue;
        }
        let Some(parameter_id) = info.parameter_id else {
            continue;
        };
        if let Some(curve) = Curve::from_parameter_id(parameter_id) {
            return Ok(PaceParameters {
                protocol,
                parameter_id,
                curve,
            });
        }
    }
    if seen.is_empty() {
        Err(PassportError::UnsupportedProtocol("No PACEInfo advertised".to_string()))
    } else {
        Err(PassportError::UnsupportedProtocol(format!(
            "No supported PACE variant among {}",
            seen.join(", ")
        )))
    }
}

/// Kπ, derived from the full SHA-1 of the MRZ information.
pub fn password_key(key: &BacKey, suite: CipherSuite) -> Vec<u8> {
    let digest = crypto::sha1(key.mrz_information().as_bytes());
    crypto::derive_key(&digest, KDF_PACE, suite)
}

pub fn decrypt_nonce(k_pi: &[u8], suite: CipherSuite, encrypted: &[u8]) -> Result<Vec<u8>, PassportError> {
    let cipher = BlockCipher::new(suite, k_pi)?;
    cipher.cbc_decrypt(&vec![0u8; suite.block_size()], encrypted)
}

/// G' = s * G + H, with H the shared point of the mapping key exchange.
pub fn generic_mapping(curve: &Curve, nonce: &[u8], shared: &EcPoint) -> Result<EcPoint, PassportError> {
    if *shared == EcPoint::Infinity {
        return Err(PassportError::AuthenticationError("Mapping produced the point at infinity".to_string()));
    }
    let s = BigUint::from_bytes_be(nonce);
    let mapped = curve.add(&curve.multiply(&s, &curve.generator()), shared);
    if mapped == EcPoint::Infinity {
        return Err(PassportError::AuthenticationError("Mapped generator is the point at infinity".to_string()));
    }
    Ok(mapped)
}

/// Input of the authentication token: the other side's public key data object.
pub fn token_input(oid: &str, public_key: &[u8]) -> Result<Vec<u8>, PassportError> {
    let mut body = tlv::encode(0x06, &tlv::encode_oid(oid)?);
    body.extend(tlv::encode(0x86, public_key));
    Ok(tlv::encode(0x7F49, &body))
}

pub fn authentication_token(suite: CipherSuite, ks_mac: &[u8], oid: &str, public_key: &[u8]) -> Result<Vec<u8>, PassportError> {
    crypto::mac(suite, ks_mac, &token_input(oid, public_key)?)
}

/// Session keys from the x coordinate of the agreed point.
pub fn session_keys(suite: CipherSuite, shared_x: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (
        crypto::derive_key(shared_x, KDF_ENC, suite),
        crypto::derive_key(shared_x, KDF_MAC, suite),
    )
}

fn general_authenticate(
    connection: &mut CardConnection,
    data: Option<(u32, &[u8])>,
    last: bool,
    expected: u32,
    step: &str,
) -> Result<Vec<u8>, PassportError> {
    let inner = data.map(|(tag, value)| tlv::encode(tag, value)).unwrap_or_default();
    let command = CommandApdu::general_authenticate(tlv::encode(0x7C, &inner), last);
    let response = connection.transmit_ok(&command, step)?;
    let (container, _) = Tlv::parse(&response.data)?;
    if container.tag != 0x7C {
        return Err(PassportError::AuthenticationError(format!("{}: missing dynamic authentication data", step)));
    }
    container
        .find(expected)
        .map(|t| t.value)
        .ok_or_else(|| PassportError::AuthenticationError(format!("{}: missing tag {:02X}", step, expected)))
}

/// Run PACE with the MRZ password. The connection must not have secure
/// messaging active; the returned session is installed by the caller.
pub fn perform_pace(
    connection: &mut CardConnection,
    key: &BacKey,
    params: &PaceParameters,
) -> Result<SecureMessaging, PassportError> {
    let suite = params.protocol.suite;
    let curve = &params.curve;
    let oid_bytes = tlv::encode_oid(&params.protocol.oid)?;
    debug!("PACE {} on {}", params.protocol.oid, curve.name);

    connection.transmit_ok(
        &CommandApdu::mse_set_at_pace(&oid_bytes, Some(params.parameter_id as u8)),
        "MSE:Set AT",
    )?;

    let encrypted_nonce = general_authenticate(connection, None, false, 0x80, "PACE nonce")?;
    let k_pi = password_key(key, suite);
    let nonce = decrypt_nonce(&k_pi, suite, &encrypted_nonce)?;

    let map_sk = curve.random_scalar()?;
    let map_pk = curve.encode_point(&curve.multiply(&map_sk, &curve.generator()))?;
    let chip_map_pk = general_authenticate(connection, Some((0x81, map_pk.as_slice())), false, 0x82, "PACE mapping")?;
    let chip_map_pk = curve.decode_point(&chip_map_pk)?;
    let shared = curve.multiply(&map_sk, &chip_map_pk);
    let mapped = generic_mapping(curve, &nonce, &shared)?;

    let eph_sk = curve.random_scalar()?;
    let eph_pk = curve.encode_point(&curve.multiply(&eph_sk, &mapped))?;
    let chip_eph_raw = general_authenticate(connection, Some((0x83, eph_pk.as_slice())), false, 0x84, "PACE key agreement")?;
    if chip_eph_raw == eph_pk {
        return Err(PassportError::AuthenticationError("Chip echoed the terminal key".to_string()));
    }
    let chip_eph = curve.decode_point(&chip_eph_raw)?;
    let agreed = curve.multiply(&eph_sk, &chip_eph);
    let shared_x = curve
        .encode_x(&agreed)
        .ok_or_else(|| PassportError::AuthenticationError("Key agreement produced the point at infinity".to_string()))?;
    let (ks_enc, ks_mac) = session_keys(suite, &shared_x);

    let terminal_token = authentication_token(suite, &ks_mac, &params.protocol.oid, &chip_eph_raw)?;
    let chip_token = general_authenticate(connection, Some((0x85, terminal_token.as_slice())), true, 0x86, "PACE mutual authentication")
        .map_err(|e| match e {
            PassportError::CardStatus { .. } => {
                PassportError::AuthenticationError("Chip rejected the PACE token".to_string())
            }
            other => other,
        })?;
    let expected = authentication_token(suite, &ks_mac, &params.protocol.oid, &eph_pk)?;
    if chip_token != expected {
        return Err(PassportError::AuthenticationError("Chip PACE token mismatch".to_string()));
    }

    info!("PACE established ({:?}, {})", suite, curve.name);
    SecureMessaging::new(suite, &ks_enc, &ks_mac, vec![0u8; suite.block_size()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::simulator::SimulatedChip;

    fn h(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    fn pace_info(protocol: &str, parameter_id: Option<u32>) -> SecurityInfo {
        SecurityInfo {
            kind: SecurityInfoKind::Pace,
            protocol: protocol.to_string(),
            version: Some(2),
            parameter_id,
        }
    }

    #[test]
    fn test_protocol_oids() {
        let aes = PaceProtocol::from_oid("0.4.0.127.0.7.2.2.4.2.2").unwrap();
        assert_eq!(aes.mapping, PaceMapping::EcdhGeneric);
        assert_eq!(aes.suite, CipherSuite::Aes128);
        let dh = PaceProtocol::from_oid("0.4.0.127.0.7.2.2.4.1.1").unwrap();
        assert_eq!(dh.mapping, PaceMapping::DhGeneric);
        assert_eq!(dh.suite, CipherSuite::Tdes);
        assert!(PaceProtocol::from_oid("0.4.0.127.0.7.2.2.3.2.1").is_none());
        assert!(PaceProtocol::from_oid("0.4.0.127.0.7.2.2.4.2.9").is_none());
    }

    #[test]
    fn test_parameter_selection() {
        let infos = vec![
            pace_info("0.4.0.127.0.7.2.2.4.1.2", Some(2)),
            pace_info("0.4.0.127.0.7.2.2.4.2.2", Some(13)),
        ];
        let selected = select_parameters(&infos).unwrap();
        assert_eq!(selected.parameter_id, 13);
        assert_eq!(selected.curve.name, "brainpoolP256r1");

        let unsupported = vec![pace_info("0.4.0.127.0.7.2.2.4.2.2", Some(8))];
        assert!(matches!(select_parameters(&unsupported), Err(PassportError::UnsupportedProtocol(_))));
        assert!(matches!(select_parameters(&[]), Err(PassportError::UnsupportedProtocol(_))));
    }

    #[test]
    fn test_worked_example_mapping() {
        // Doc 9303 Part 11, Appendix G.1 (ECDH generic mapping, brainpoolP256r1)
        let key = BacKey::new("T22000129", "640812", "101031").unwrap();
        let k_pi = password_key(&key, CipherSuite::Aes128);
        assert_eq!(k_pi, h("89DED1B26624EC1E634C1989302849DD"));
        let nonce = decrypt_nonce(&k_pi, CipherSuite::Aes128, &h("95A3A016522EE98D01E76CB6B98B42C3")).unwrap();
        assert_eq!(nonce, h("3F00C4D39D153F2B2A214A078D899B22"));

        let curve = Curve::brainpool_p256r1();
        let terminal_sk =
            BigUint::from_bytes_be(&h("7F4EF07B9EA82FD78AD689B38D0BC78CF21F249D953BC46F4C6E19259C010F99"));
        let chip_pk = curve
            .decode_point(&h(concat!(
                "04",
                "824FBA91C9CBE26BEF53A0EBE7342A3BF178CEA9F45DE0B70AA601651FBA3F57",
                "30D8C879AAA9C9F73991E61B58F4D52EB87A0A0C709A49DC63719363CCD13C54"
            )))
            .unwrap();
        let mapped = generic_mapping(&curve, &nonce, &curve.multiply(&terminal_sk, &chip_pk)).unwrap();
        assert_eq!(
            hex::encode_upper(curve.encode_point(&mapped).unwrap()),
            concat!(
                "04",
                "8CED63C91426D4F0EB1435E7CB1D74A46723A0AF21C89634F65A9AE87A9265E2",
                "8C879506743F8611AC33645C5B985C80B5F09A0B83407C1B6A4D857AE76FE522"
            )
        );
    }

    #[test]
    fn test_full_exchange_with_chip() {
        let key = BacKey::new("T22000129", "640812", "101031").unwrap();
        let chip = SimulatedChip::builder(key.clone()).with_pace(CipherSuite::Aes128, 13).build();
        let mut connection = CardConnection::new(Box::new(chip));
        let params = select_parameters(&[pace_info("0.4.0.127.0.7.2.2.4.2.2", Some(13))]).unwrap();
        let sm = perform_pace(&mut connection, &key, &params).unwrap();
        assert_eq!(sm.suite(), CipherSuite::Aes128);
        assert_eq!(sm.ssc(), vec![0u8; 16].as_slice());
    }

    #[test]
    fn test_wrong_password_fails() {
        let key = BacKey::new("T22000129", "640812", "101031").unwrap();
        let chip = SimulatedChip::builder(key).with_pace(CipherSuite::Aes128, 12).build();
        let mut connection = CardConnection::new(Box::new(chip));
        let params = select_parameters(&[pace_info("0.4.0.127.0.7.2.2.4.2.2", Some(12))]).unwrap();
        let wrong = BacKey::new("T22000129", "640812", "101030").unwrap();
        assert!(matches!(
            perform_pace(&mut connection, &wrong, &params),
            Err(PassportError::AuthenticationError(_))
        ));
    }
}
