//! Decoders for the LDS elementary files that are not biometric: EF.COM,
//! DG1, DG11, DG12, the SecurityInfos of DG14 / EF.CardAccess and DG15.

use log::debug;

use crate::models::{
    AdditionalDocumentDetails, AdditionalPersonalDetails, ComInfo, ParsedMrzRecord, SecurityInfo,
    SecurityInfoKind,
};
use crate::processing::parsers::MrzParserManager;
use crate::utils::PassportError;
use crate::verification::apdu::data_group_from_tag;
use crate::verification::tlv::{self, Tlv};

const OID_PACE: &str = "0.4.0.127.0.7.2.2.4";
const OID_CA: &str = "0.4.0.127.0.7.2.2.3";
const OID_CA_PUBLIC_KEY: &str = "0.4.0.127.0.7.2.2.1";
const OID_TA: &str = "0.4.0.127.0.7.2.2.2";
const OID_AA: &str = "2.23.136.1.1.5";

pub struct DataGroupDecoder;

fn dg_error(dg: &str, message: &str) -> PassportError {
    PassportError::DataGroupError(format!("{}: {}", dg, message))
}

/// Open the outer template and check its tag.
fn open(bytes: &[u8], tag: u32, dg: &str) -> Result<Tlv, PassportError> {
    let (outer, _) = Tlv::parse(bytes)?;
    if outer.tag != tag {
        return Err(dg_error(dg, &format!("expected tag {:02X}, found {:X}", tag, outer.tag)));
    }
    Ok(outer)
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).trim().to_string()
}

fn non_empty(value: &[u8]) -> Option<String> {
    let s = text(value);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// "0107" -> "1.7", "040000" -> "4.0.0"
fn dotted_version(value: &[u8]) -> Option<String> {
    let digits = text(value);
    if digits.is_empty() || digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return non_empty(value);
    }
    let parts: Vec<String> = digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let n = (pair[0] - b'0') * 10 + (pair[1] - b'0');
            n.to_string()
        })
        .collect();
    Some(parts.join("."))
}

/// Full dates are ASCII YYYYMMDD, some issuers store them as 4 BCD bytes.
fn full_date(value: &[u8]) -> Option<String> {
    if value.len() == 4 && value.iter().any(|b| *b < 0x30) {
        return Some(hex::encode(value));
    }
    non_empty(value)
}

/// ICAO name fields use '<' as separator.
fn name_field(value: &[u8]) -> String {
    text(value)
        .split("<<")
        .map(|part| part.replace('<', " ").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

impl DataGroupDecoder {
    pub fn com(bytes: &[u8]) -> Result<ComInfo, PassportError> {
        let outer = open(bytes, 0x60, "EF.COM")?;
        let lds_version = outer.find(0x5F01).and_then(|t| dotted_version(&t.value));
        let unicode_version = outer.find(0x5F36).and_then(|t| dotted_version(&t.value));
        let tags = outer
            .find(0x5C)
            .ok_or_else(|| dg_error("EF.COM", "tag list missing"))?;
        let data_groups = tags.value.iter().filter_map(|tag| data_group_from_tag(*tag)).collect();
        Ok(ComInfo {
            lds_version,
            unicode_version,
            data_groups,
        })
    }

    /// Raw MRZ text of DG1.
    pub fn dg1_text(bytes: &[u8]) -> Result<String, PassportError> {
        let outer = open(bytes, 0x61, "DG1")?;
        let mrz = outer.find(0x5F1F).ok_or_else(|| dg_error("DG1", "MRZ data object missing"))?;
        Ok(text(&mrz.value))
    }

    /// Lay the DG1 text out the way it is printed so the line parsers can
    /// work on it.
    pub fn mrz_lines(mrz: &str) -> String {
        let compact: String = mrz.chars().filter(|c| !c.is_whitespace()).collect();
        let width = match compact.len() {
            _ if compact.starts_with("CS") => return compact,
            88 => 44,
            72 => 36,
            90 => 30,
            _ => return compact,
        };
        compact
            .as_bytes()
            .chunks(width)
            .map(|chunk| String::from_utf8_lossy(chunk).to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn dg1(bytes: &[u8], parsers: &MrzParserManager) -> Result<(String, ParsedMrzRecord), PassportError> {
        let mrz = Self::dg1_text(bytes)?;
        let record = parsers.parse_required(&Self::mrz_lines(&mrz))?;
        Ok((mrz, record))
    }

    pub fn dg11(bytes: &[u8]) -> Result<AdditionalPersonalDetails, PassportError> {
        let outer = open(bytes, 0x6B, "DG11")?;
        let mut details = AdditionalPersonalDetails::default();
        for field in outer.children()? {
            match field.tag {
                0x5F0E => details.full_name = Some(name_field(&field.value)),
                0x5F10 => details.personal_number = non_empty(&field.value),
                0x5F2B => details.full_date_of_birth = full_date(&field.value),
                0x5F11 => details.place_of_birth = non_empty(&field.value).map(|s| s.replace('<', " ")),
                0x5F42 => details.permanent_address = non_empty(&field.value).map(|s| s.replace('<', " ")),
                0x5F12 => details.telephone = non_empty(&field.value),
                0x5F13 => details.profession = non_empty(&field.value),
                0x5F14 => details.title = non_empty(&field.value),
                0x5F15 => details.personal_summary = non_empty(&field.value),
                0x5F17 => details.other_travel_document_numbers.extend(non_empty(&field.value)),
                0x5F18 => details.custody_information = non_empty(&field.value),
                0xA0 => {
                    for other in field.children()?.into_iter().filter(|t| t.tag == 0x5F0F) {
                        details.other_names.push(name_field(&other.value));
                    }
                }
                0x5F0F => details.other_names.push(name_field(&field.value)),
                0x5C => {}
                other => debug!("DG11: skipping tag {:X}", other),
            }
        }
        Ok(details)
    }

    pub fn dg12(bytes: &[u8]) -> Result<AdditionalDocumentDetails, PassportError> {
        let outer = open(bytes, 0x6C, "DG12")?;
        let mut details = AdditionalDocumentDetails::default();
        for field in outer.children()? {
            match field.tag {
                0x5F19 => details.issuing_authority = non_empty(&field.value),
                0x5F26 => details.date_of_issue = full_date(&field.value),
                0x5F1B => details.endorsements_and_observations = non_empty(&field.value),
                0x5F1C => details.tax_or_exit_requirements = non_empty(&field.value),
                0x5F55 => details.personalization_time = full_date(&field.value),
                0x5F56 => details.personalization_device_serial = non_empty(&field.value),
                0xA0 => {
                    for other in field.children()?.into_iter().filter(|t| t.tag == 0x5F1A) {
                        details.names_of_other_persons.push(name_field(&other.value));
                    }
                }
                0x5C => {}
                other => debug!("DG12: skipping tag {:X}", other),
            }
        }
        Ok(details)
    }

    /// SecurityInfos from EF.CardAccess (a bare SET) or DG14 (wrapped in 6E).
    pub fn security_infos(bytes: &[u8]) -> Result<Vec<SecurityInfo>, PassportError> {
        let (outer, _) = Tlv::parse(bytes)?;
        let set = match outer.tag {
            0x31 => outer,
            0x6E => outer
                .find(0x31)
                .ok_or_else(|| dg_error("DG14", "SecurityInfos set missing"))?,
            other => return Err(dg_error("SecurityInfos", &format!("unexpected tag {:X}", other))),
        };
        let mut infos = Vec::new();
        for entry in set.children()?.into_iter().filter(|t| t.tag == 0x30) {
            match Self::security_info(&entry) {
                Some(info) => infos.push(info),
                None => debug!("Skipping malformed SecurityInfo"),
            }
        }
        Ok(infos)
    }

    fn security_info(entry: &Tlv) -> Option<SecurityInfo> {
        let fields = entry.children().ok()?;
        let oid_field = fields.first().filter(|t| t.tag == 0x06)?;
        let protocol = tlv::decode_oid(&oid_field.value);
        let integer_at = |index: usize| {
            fields
                .get(index)
                .filter(|t| t.tag == 0x02)
                .map(|t| tlv::decode_integer(&t.value) as u32)
        };
        let arcs = protocol.split('.').count();
        let under = |prefix: &str| {
            protocol
                .strip_prefix(prefix)
                .map_or(false, |rest| rest.starts_with('.'))
        };

        let kind = if under(OID_PACE) && arcs == 11 {
            SecurityInfoKind::Pace
        } else if under(OID_CA) && arcs == 11 {
            SecurityInfoKind::ChipAuthentication
        } else if under(OID_CA_PUBLIC_KEY) {
            SecurityInfoKind::ChipAuthenticationPublicKey
        } else if protocol == OID_AA {
            SecurityInfoKind::ActiveAuthentication
        } else if protocol == OID_TA {
            SecurityInfoKind::TerminalAuthentication
        } else {
            SecurityInfoKind::Other
        };
        let (version, parameter_id) = match kind {
            SecurityInfoKind::Pace | SecurityInfoKind::ChipAuthentication => (integer_at(1), integer_at(2)),
            SecurityInfoKind::ActiveAuthentication | SecurityInfoKind::TerminalAuthentication => {
                (integer_at(1), None)
            }
            SecurityInfoKind::ChipAuthenticationPublicKey => (None, integer_at(2)),
            SecurityInfoKind::Other => (None, integer_at(2)),
        };
        Some(SecurityInfo {
            kind,
            protocol,
            version,
            parameter_id,
        })
    }

    /// Active Authentication public key, kept as the encoded
    /// SubjectPublicKeyInfo.
    pub fn dg15(bytes: &[u8]) -> Result<Vec<u8>, PassportError> {
        let outer = open(bytes, 0x6F, "DG15")?;
        if outer.value.is_empty() {
            return Err(dg_error("DG15", "empty public key"));
        }
        Ok(outer.value)
    }
}
