use std::collections::BTreeMap;

use log::{debug, warn};

use crate::models::{HashCheck, SodRecord};
use crate::utils::PassportError;
use crate::verification::crypto;
use crate::verification::tlv::{self, Tlv};

const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_LDS_SECURITY_OBJECT: &str = "2.23.136.1.1.1";
const OID_COMMON_NAME: &str = "2.5.4.3";

/// EF.SOD reader. Only the structure is parsed; the document signer
/// signature and its certificate chain are not verified.
pub struct PKIProcessor;

fn sod_error(message: &str) -> PassportError {
    PassportError::SodError(message.to_string())
}

fn child(parent: &Tlv, tag: u32, what: &str) -> Result<Tlv, PassportError> {
    parent.find(tag).ok_or_else(|| sod_error(&format!("{} missing", what)))
}

pub fn digest_algorithm_name(oid: &str) -> Option<&'static str> {
    let name = match oid {
        "1.3.14.3.2.26" => "SHA-1",
        "2.16.840.1.101.3.4.2.4" => "SHA-224",
        "2.16.840.1.101.3.4.2.1" => "SHA-256",
        "2.16.840.1.101.3.4.2.2" => "SHA-384",
        "2.16.840.1.101.3.4.2.3" => "SHA-512",
        _ => return None,
    };
    Some(name)
}

pub fn signature_algorithm_name(oid: &str) -> Option<&'static str> {
    let name = match oid {
        "1.2.840.113549.1.1.1" => "rsaEncryption",
        "1.2.840.113549.1.1.5" => "sha1WithRSAEncryption",
        "1.2.840.113549.1.1.10" => "RSASSA-PSS",
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption",
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption",
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption",
        "1.2.840.10045.4.1" => "ecdsa-with-SHA1",
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
        "1.2.840.10045.4.3.4" => "ecdsa-with-SHA512",
        _ => return None,
    };
    Some(name)
}

fn algorithm_oid(identifier: &Tlv) -> Result<String, PassportError> {
    let oid = child(identifier, 0x06, "algorithm OID")?;
    Ok(tlv::decode_oid(&oid.value))
}

fn directory_string(value: &Tlv) -> Option<String> {
    match value.tag {
        0x0C | 0x13 | 0x16 | 0x14 => Some(String::from_utf8_lossy(&value.value).to_string()),
        // BMPString
        0x1E => {
            let units: Vec<u16> = value
                .value
                .chunks(2)
                .filter(|pair| pair.len() == 2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Some(String::from_utf16_lossy(&units))
        }
        _ => None,
    }
}

/// CN attribute of an X.501 Name.
fn common_name(name: &Tlv) -> Option<String> {
    for rdn in name.children().ok()?.into_iter().filter(|t| t.tag == 0x31) {
        for attribute in rdn.children().ok()? {
            let parts = attribute.children().ok()?;
            if parts.len() == 2 && parts[0].tag == 0x06 && tlv::decode_oid(&parts[0].value) == OID_COMMON_NAME {
                return directory_string(&parts[1]);
            }
        }
    }
    None
}

/// Subject CN of the first embedded certificate.
fn certificate_subject(certificates: &Tlv) -> Option<String> {
    let certificate = certificates.children().ok()?.into_iter().find(|t| t.tag == 0x30)?;
    let tbs = certificate.find(0x30)?;
    // signature, issuer, validity, subject
    let subject = tbs.children().ok()?.into_iter().filter(|t| t.tag == 0x30).nth(3)?;
    common_name(&subject)
}

/// LDS version info "0107"/"040000" style strings to dotted form.
fn version_string(value: &Tlv) -> String {
    let raw = String::from_utf8_lossy(&value.value).to_string();
    if raw.len() % 2 == 0 && !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        raw.as_bytes()
            .chunks(2)
            .map(|pair| ((pair[0] - b'0') * 10 + (pair[1] - b'0')).to_string())
            .collect::<Vec<_>>()
            .join(".")
    } else {
        raw
    }
}

impl PKIProcessor {
    pub fn parse_sod(bytes: &[u8]) -> Result<SodRecord, PassportError> {
        let (outer, _) = Tlv::parse(bytes)?;
        let content_info = if outer.tag == 0x77 {
            child(&outer, 0x30, "ContentInfo")?
        } else {
            outer
        };
        let content_type = algorithm_oid(&content_info)?;
        if content_type != OID_SIGNED_DATA {
            return Err(sod_error(&format!("Unexpected content type {}", content_type)));
        }
        let signed_data = child(&child(&content_info, 0xA0, "content")?, 0x30, "SignedData")?;

        let encap = child(&signed_data, 0x30, "encapContentInfo")?;
        let econtent_type = algorithm_oid(&encap)?;
        if econtent_type != OID_LDS_SECURITY_OBJECT {
            warn!("SOD content type is {}, expected LDSSecurityObject", econtent_type);
        }
        let econtent = child(&child(&encap, 0xA0, "eContent")?, 0x04, "eContent octets")?;
        let (lds_object, _) = Tlv::parse(&econtent.value)?;
        let lds_fields = lds_object.children()?;

        let hash_algorithm = lds_fields
            .iter()
            .find(|t| t.tag == 0x30)
            .ok_or_else(|| sod_error("hashAlgorithm missing"))?;
        let digest_algorithm_oid = algorithm_oid(hash_algorithm)?;
        let digest_algorithm = digest_algorithm_name(&digest_algorithm_oid)
            .map(str::to_string)
            .unwrap_or_else(|| digest_algorithm_oid.clone());

        let hash_list = lds_fields
            .iter()
            .filter(|t| t.tag == 0x30)
            .nth(1)
            .ok_or_else(|| sod_error("dataGroupHashValues missing"))?;
        let mut data_group_hashes = BTreeMap::new();
        for entry in hash_list.children()? {
            let (number, hash) = match (entry.find(0x02), entry.find(0x04)) {
                (Some(number), Some(hash)) => (tlv::decode_integer(&number.value), hash.value),
                _ => return Err(sod_error("Malformed DataGroupHash")),
            };
            if !(1..=16).contains(&number) {
                return Err(sod_error(&format!("Data group number {} out of range", number)));
            }
            data_group_hashes.insert(number as u8, hash);
        }

        let (lds_version, unicode_version) = match lds_fields.iter().filter(|t| t.tag == 0x30).nth(2) {
            Some(info) => {
                let strings: Vec<String> = info.children()?.iter().map(version_string).collect();
                (strings.first().cloned(), strings.get(1).cloned())
            }
            None => (None, None),
        };

        // digestAlgorithms is the first SET, signerInfos the last
        let sets: Vec<Tlv> = signed_data.children()?.into_iter().filter(|t| t.tag == 0x31).collect();
        let signer_infos = match sets.as_slice() {
            [_, .., last] => last,
            _ => return Err(sod_error("signerInfos missing")),
        };
        let signer = child(signer_infos, 0x30, "SignerInfo")?;
        let signer_fields = signer.children()?;
        let signature_identifier = signer_fields
            .iter()
            .filter(|t| t.tag == 0x30)
            .last()
            .ok_or_else(|| sod_error("signatureAlgorithm missing"))?;
        let signature_algorithm_oid = algorithm_oid(signature_identifier)?;
        let signature_algorithm = signature_algorithm_name(&signature_algorithm_oid)
            .map(str::to_string)
            .unwrap_or_else(|| signature_algorithm_oid.clone());
        if !signer_fields.iter().any(|t| t.tag == 0x04) {
            return Err(sod_error("signature missing"));
        }

        let signer_name = signed_data
            .find(0xA0)
            .and_then(|certificates| certificate_subject(&certificates))
            .or_else(|| {
                // issuerAndSerialNumber
                let sid = signer_fields.iter().find(|t| t.tag == 0x30)?;
                common_name(&sid.find(0x30)?)
            });
        debug!(
            "SOD: {} hashes, {} / {}, signer {:?}",
            data_group_hashes.len(),
            digest_algorithm,
            signature_algorithm,
            signer_name
        );

        Ok(SodRecord {
            digest_algorithm,
            digest_algorithm_oid,
            signature_algorithm,
            signature_algorithm_oid,
            data_group_hashes,
            lds_version,
            unicode_version,
            signer_name,
            raw_size: bytes.len(),
            has_valid_signature: true,
        })
    }

    /// Hash every read group with the SOD digest and compare.
    pub fn compare_hashes(sod: &SodRecord, raw: &BTreeMap<u8, Vec<u8>>) -> BTreeMap<u8, HashCheck> {
        sod.data_group_hashes
            .iter()
            .map(|(dg, expected)| {
                let check = match raw.get(dg) {
                    None => HashCheck::NotRead,
                    Some(bytes) => match crypto::hash(&sod.digest_algorithm, bytes) {
                        Some(actual) if &actual == expected => HashCheck::Match,
                        Some(_) => {
                            warn!("DG{} hash does not match the SOD", dg);
                            HashCheck::Mismatch
                        }
                        None => HashCheck::UnsupportedAlgorithm,
                    },
                };
                (*dg, check)
            })
            .collect()
    }
}
