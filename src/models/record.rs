use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{DocumentFamily, ParsedMrzRecord};

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    serializer.serialize_str(&STANDARD.encode(bytes))
}

fn serialize_optional_base64<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serialize_base64(bytes, serializer),
        None => serializer.serialize_none(),
    }
}

fn serialize_hex_map<S: Serializer>(map: &BTreeMap<u8, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (dg, hash) in map {
        out.serialize_entry(&format!("DG{}", dg), &hex::encode_upper(hash))?;
    }
    out.end()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthMethod {
    PACE,
    BAC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageMime {
    Jpeg,
    Jpeg2000,
    Png,
    Wsq,
    Unknown,
}

impl ImageMime {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Jpeg2000 => "image/jp2",
            ImageMime::Png => "image/png",
            ImageMime::Wsq => "image/x-wsq",
            ImageMime::Unknown => "application/octet-stream",
        }
    }

    /// Identify an image payload from its leading bytes.
    pub fn sniff(data: &[u8]) -> ImageMime {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageMime::Jpeg
        } else if data.starts_with(&[0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20])
            || data.starts_with(&[0xFF, 0x4F, 0xFF, 0x51])
        {
            ImageMime::Jpeg2000
        } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            ImageMime::Png
        } else if data.starts_with(&[0xFF, 0xA0]) {
            ImageMime::Wsq
        } else {
            ImageMime::Unknown
        }
    }
}

/// An image taken from DG2, DG5 or DG7. The encoded bytes are always kept;
/// dimensions are only filled in when decoding succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct FaceImage {
    pub mime: ImageMime,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub decode_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiometricTemplate {
    pub format_owner: Option<u16>,
    pub format_type: Option<u16>,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
}

/// DG3 (fingerprints) or DG4 (iris).
#[derive(Debug, Clone, Serialize)]
pub struct BiometricGroup {
    pub data_group: u8,
    pub templates: Vec<BiometricTemplate>,
}

/// EF.COM contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComInfo {
    pub lds_version: Option<String>,
    pub unicode_version: Option<String>,
    pub data_groups: BTreeSet<u8>,
}

/// DG11
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdditionalPersonalDetails {
    pub full_name: Option<String>,
    pub other_names: Vec<String>,
    pub personal_number: Option<String>,
    /// YYYYMMDD
    pub full_date_of_birth: Option<String>,
    pub place_of_birth: Option<String>,
    pub permanent_address: Option<String>,
    pub telephone: Option<String>,
    pub profession: Option<String>,
    pub title: Option<String>,
    pub personal_summary: Option<String>,
    pub other_travel_document_numbers: Vec<String>,
    pub custody_information: Option<String>,
}

/// DG12
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdditionalDocumentDetails {
    pub issuing_authority: Option<String>,
    /// YYYYMMDD
    pub date_of_issue: Option<String>,
    pub names_of_other_persons: Vec<String>,
    pub endorsements_and_observations: Option<String>,
    pub tax_or_exit_requirements: Option<String>,
    pub personalization_time: Option<String>,
    pub personalization_device_serial: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecurityInfoKind {
    Pace,
    ChipAuthentication,
    ChipAuthenticationPublicKey,
    ActiveAuthentication,
    TerminalAuthentication,
    Other,
}

/// One SecurityInfo from EF.CardAccess or DG14.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityInfo {
    pub kind: SecurityInfoKind,
    pub protocol: String,
    pub version: Option<u32>,
    pub parameter_id: Option<u32>,
}

/// EF.SOD summary. `has_valid_signature` only says the structure parsed;
/// no certificate chain is checked.
#[derive(Debug, Clone, Serialize)]
pub struct SodRecord {
    pub digest_algorithm: String,
    pub digest_algorithm_oid: String,
    pub signature_algorithm: String,
    pub signature_algorithm_oid: String,
    #[serde(serialize_with = "serialize_hex_map")]
    pub data_group_hashes: BTreeMap<u8, Vec<u8>>,
    pub lds_version: Option<String>,
    pub unicode_version: Option<String>,
    pub signer_name: Option<String>,
    pub raw_size: usize,
    pub has_valid_signature: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HashCheck {
    Match,
    Mismatch,
    NotRead,
    UnsupportedAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChipAuthenticationStatus {
    NotAdvertised,
    /// DG14 advertises it; the protocol itself is not run
    NotPerformed,
}

/// Everything pulled off the chip, before family-specific assembly.
#[derive(Debug, Clone, Default)]
pub struct DataGroupInventory {
    pub com: Option<ComInfo>,
    /// Raw file contents keyed by data-group number
    pub raw: BTreeMap<u8, Vec<u8>>,
    /// Groups that were attempted and reported absent or unreadable
    pub absent: BTreeSet<u8>,
    pub attempted: BTreeSet<u8>,
    pub mrz: Option<ParsedMrzRecord>,
    pub mrz_text: Option<String>,
    pub faces: Vec<FaceImage>,
    pub fingerprints: Option<BiometricGroup>,
    pub irises: Option<BiometricGroup>,
    pub displayed_portraits: Vec<FaceImage>,
    pub signatures: Vec<FaceImage>,
    pub personal_details: Option<AdditionalPersonalDetails>,
    pub document_details: Option<AdditionalDocumentDetails>,
    pub security_infos: Vec<SecurityInfo>,
    pub active_authentication_key: Option<Vec<u8>>,
    pub sod: Option<SodRecord>,
    pub sod_raw: Option<Vec<u8>>,
}

impl DataGroupInventory {
    pub fn insert_raw(&mut self, dg: u8, bytes: Vec<u8>) {
        self.absent.remove(&dg);
        self.raw.insert(dg, bytes);
    }

    pub fn mark_absent(&mut self, dg: u8) {
        self.absent.insert(dg);
    }

    pub fn has(&self, dg: u8) -> bool {
        self.raw.contains_key(&dg)
    }

    pub fn read_groups(&self) -> Vec<u8> {
        self.raw.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityFields {
    pub name: Option<String>,
    pub primary_identifier: Option<String>,
    pub secondary_identifier: Option<String>,
    pub document_code: Option<String>,
    pub document_number: String,
    pub date_of_birth: String,
    pub date_of_expiry: String,
    pub nationality: Option<String>,
    pub sex: Option<String>,
    pub issuing_state: Option<String>,
    pub face_images: Vec<FaceImage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassportDetails {
    pub fingerprints: Option<BiometricGroup>,
    pub irises: Option<BiometricGroup>,
    pub displayed_portraits: Vec<FaceImage>,
    pub signatures: Vec<FaceImage>,
    pub personal_details: Option<AdditionalPersonalDetails>,
    pub document_details: Option<AdditionalDocumentDetails>,
    pub security_infos: Vec<SecurityInfo>,
    #[serde(serialize_with = "serialize_optional_base64")]
    pub active_authentication_key: Option<Vec<u8>>,
    pub chip_authentication: ChipAuthenticationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct EepDetails {
    pub chinese_name: Option<String>,
    pub endorsements: Vec<String>,
    pub issuing_authority: Option<String>,
    pub date_of_issue: Option<String>,
    pub is_expired: bool,
    pub check_digits_valid: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "family")]
pub enum FamilyDetails {
    Passport(PassportDetails),
    Eep(EepDetails),
}

impl FamilyDetails {
    pub fn family(&self) -> DocumentFamily {
        match self {
            FamilyDetails::Passport(_) => DocumentFamily::TD3,
            FamilyDetails::Eep(_) => DocumentFamily::EEP,
        }
    }
}

/// Final result of a chip read.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub identity: IdentityFields,
    pub authentication: AuthMethod,
    pub data_groups_advertised: Vec<u8>,
    pub data_groups_read: Vec<u8>,
    pub security_object: Option<SodRecord>,
    pub hash_checks: BTreeMap<u8, HashCheck>,
    pub details: FamilyDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_sniffing() {
        assert_eq!(ImageMime::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), ImageMime::Jpeg);
        assert_eq!(
            ImageMime::sniff(&[0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A]),
            ImageMime::Jpeg2000
        );
        assert_eq!(ImageMime::sniff(&[0xFF, 0x4F, 0xFF, 0x51]), ImageMime::Jpeg2000);
        assert_eq!(ImageMime::sniff(b"hello"), ImageMime::Unknown);
    }

    #[test]
    fn test_inventory_absent_then_read() {
        let mut inventory = DataGroupInventory::default();
        inventory.mark_absent(11);
        inventory.insert_raw(11, vec![0x6B, 0x00]);
        assert!(inventory.has(11));
        assert!(!inventory.absent.contains(&11));
        assert_eq!(inventory.read_groups(), vec![11]);
    }

    #[test]
    fn test_sod_serializes_hashes_as_hex() {
        let mut hashes = BTreeMap::new();
        hashes.insert(1u8, vec![0xAB, 0x01]);
        let sod = SodRecord {
            digest_algorithm: "SHA-256".to_string(),
            digest_algorithm_oid: "2.16.840.1.101.3.4.2.1".to_string(),
            signature_algorithm: "sha256WithRSAEncryption".to_string(),
            signature_algorithm_oid: "1.2.840.113549.1.1.11".to_string(),
            data_group_hashes: hashes,
            lds_version: None,
            unicode_version: None,
            signer_name: None,
            raw_size: 10,
            has_valid_signature: true,
        };
        let json = serde_json::to_value(&sod).unwrap();
        assert_eq!(json["data_group_hashes"]["DG1"], "AB01");
    }
}
