use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::models::{ComInfo, DataGroupInventory};
use crate::processing::biometric::{BiometricProcessor, ImageDecoders};
use crate::processing::data_groups::DataGroupDecoder;
use crate::processing::parsers::MrzParserManager;
use crate::processing::pki::PKIProcessor;
use crate::utils::config::ReaderConfig;
use crate::utils::PassportError;
use crate::verification::apdu::{self, CommandApdu, EF_CARD_ACCESS, EF_COM, EF_SOD, MAX_SHORT_OFFSET, SW_END_OF_FILE};
use crate::verification::channel::CardConnection;
use crate::verification::tlv::{self, Tlv};

/// Always attempted.
const REQUIRED_GROUPS: [u8; 2] = [1, 2];
/// Attempted whatever EF.COM says; absence is normal.
const OPPORTUNISTIC_GROUPS: [u8; 4] = [11, 12, 14, 15];
/// Need Extended Access Control on most documents.
const EAC_GROUPS: [u8; 2] = [3, 4];

pub fn file_name(fid: u16) -> String {
    match fid {
        EF_CARD_ACCESS => "EF.CardAccess".to_string(),
        EF_SOD => "EF.SOD".to_string(),
        EF_COM => "EF.COM".to_string(),
        0x0101..=0x0110 => format!("DG{}", fid & 0xFF),
        other => format!("EF {:04X}", other),
    }
}

fn read_chunk(connection: &mut CardConnection, offset: usize, le: u8, name: &str) -> Result<Vec<u8>, PassportError> {
    let extended = offset > MAX_SHORT_OFFSET;
    let command = if extended {
        CommandApdu::read_binary_extended(offset, le)
    } else {
        CommandApdu::read_binary(offset, le)?
    };
    let response = connection.transmit(&command)?;
    // a short file answers "end of file reached" with whatever it has
    if !(response.is_success() || (response.sw() == SW_END_OF_FILE && !response.data.is_empty())) {
        return Err(PassportError::CardStatus {
            sw: response.sw(),
            context: format!("READ BINARY {}", name),
        });
    }
    if !extended {
        return Ok(response.data);
    }
    match Tlv::parse(&response.data)? {
        (object, _) if object.tag == 0x53 => Ok(object.value),
        (object, _) => Err(PassportError::DataGroupError(format!(
            "{} extended read answered tag {:X}",
            name, object.tag
        ))),
    }
}

/// SELECT a file and read all of it: the TLV header first to learn the
/// size, then chunks of at most `chunk` bytes. Offsets past 0x7FFF switch
/// to the odd-INS READ BINARY.
pub fn read_elementary_file(connection: &mut CardConnection, fid: u16, chunk: u8) -> Result<Vec<u8>, PassportError> {
    let name = file_name(fid);
    connection.transmit_ok(&CommandApdu::select_file(fid), &format!("SELECT {}", name))?;

    let mut contents = read_chunk(connection, 0, 8, &name)?;
    let total = tlv::object_size(&contents)?;
    while contents.len() < total {
        let remaining = total - contents.len();
        let le = remaining.min(chunk as usize) as u8;
        let part = read_chunk(connection, contents.len(), le, &name)?;
        if part.is_empty() {
            return Err(PassportError::DataGroupError(format!("{} ended early", name)));
        }
        contents.extend(part);
    }
    contents.truncate(total);
    debug!("Read {} ({} bytes)", name, total);
    Ok(contents)
}

/// Which groups to attempt, in order, given EF.COM.
pub fn plan_reads(com: Option<&ComInfo>, config: &ReaderConfig) -> Vec<u8> {
    let advertised: BTreeSet<u8> = com.map(|c| c.data_groups.clone()).unwrap_or_default();
    let mut plan: Vec<u8> = REQUIRED_GROUPS.to_vec();
    for dg in 3..=16u8 {
        let wanted = if OPPORTUNISTIC_GROUPS.contains(&dg) {
            true
        } else if EAC_GROUPS.contains(&dg) {
            config.read_eac_protected_groups && advertised.contains(&dg)
        } else {
            advertised.contains(&dg)
        };
        if wanted {
            plan.push(dg);
        }
    }
    plan
}

/// Reads and decodes the LDS over an authenticated connection.
pub struct DataGroupReader<'a> {
    config: &'a ReaderConfig,
    parsers: &'a MrzParserManager,
    decoders: &'a ImageDecoders,
}

impl<'a> DataGroupReader<'a> {
    pub fn new(config: &'a ReaderConfig, parsers: &'a MrzParserManager, decoders: &'a ImageDecoders) -> Self {
        DataGroupReader {
            config,
            parsers,
            decoders,
        }
    }

    /// Read a file, turning "not there" answers into `None`. Transport
    /// failures are returned as errors and end the read.
    fn try_read(&self, connection: &mut CardConnection, fid: u16) -> Result<Option<Vec<u8>>, PassportError> {
        match read_elementary_file(connection, fid, self.config.read_chunk_size) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_transport() => Err(e),
            Err(e) if e.is_absent() => {
                debug!("{} not available: {}", file_name(fid), e);
                Ok(None)
            }
            Err(e) => {
                warn!("Failed to read {}: {}", file_name(fid), e);
                Ok(None)
            }
        }
    }

    pub fn read_all(
        &self,
        connection: &mut CardConnection,
        progress: &mut dyn FnMut(&str, u8),
    ) -> Result<DataGroupInventory, PassportError> {
        let mut inventory = DataGroupInventory::default();

        progress("Reading EF.COM", 5);
        if let Some(bytes) = self.try_read(connection, EF_COM)? {
            match DataGroupDecoder::com(&bytes) {
                Ok(com) => {
                    info!("EF.COM advertises {:?}", com.data_groups);
                    inventory.com = Some(com);
                }
                Err(e) => warn!("Could not decode EF.COM: {}", e),
            }
        }

        let plan = plan_reads(inventory.com.as_ref(), self.config);
        let step = 80 / plan.len().max(1);
        for (index, dg) in plan.iter().copied().enumerate() {
            let percent = (10 + index * step).min(90) as u8;
            progress(&format!("Reading DG{}", dg), percent);
            let Some(fid) = apdu::data_group_fid(dg) else {
                continue;
            };
            inventory.attempted.insert(dg);
            match self.try_read(connection, fid)? {
                Some(bytes) => {
                    self.decode(&mut inventory, dg, &bytes);
                    inventory.insert_raw(dg, bytes);
                }
                None => inventory.mark_absent(dg),
            }
        }

        progress("Reading EF.SOD", 92);
        if let Some(bytes) = self.try_read(connection, EF_SOD)? {
            match PKIProcessor::parse_sod(&bytes) {
                Ok(sod) => inventory.sod = Some(sod),
                Err(e) => warn!("Could not parse EF.SOD: {}", e),
            }
            inventory.sod_raw = Some(bytes);
        }
        Ok(inventory)
    }

    /// Decode one group into the inventory. A decoding failure leaves the
    /// matching fields empty.
    fn decode(&self, inventory: &mut DataGroupInventory, dg: u8, bytes: &[u8]) {
        let result = match dg {
            1 => DataGroupDecoder::dg1(bytes, self.parsers).map(|(text, record)| {
                inventory.mrz_text = Some(text);
                inventory.mrz = Some(record);
            }),
            2 => BiometricProcessor::faces(bytes, self.decoders).map(|faces| inventory.faces = faces),
            3 => BiometricProcessor::template_group(3, bytes).map(|group| inventory.fingerprints = Some(group)),
            4 => BiometricProcessor::template_group(4, bytes).map(|group| inventory.irises = Some(group)),
            5 => BiometricProcessor::displayed_images(bytes, 0x5F40, self.decoders)
                .map(|images| inventory.displayed_portraits = images),
            7 => BiometricProcessor::displayed_images(bytes, 0x5F43, self.decoders)
                .map(|images| inventory.signatures = images),
            11 => DataGroupDecoder::dg11(bytes).map(|details| inventory.personal_details = Some(details)),
            12 => DataGroupDecoder::dg12(bytes).map(|details| inventory.document_details = Some(details)),
            14 => DataGroupDecoder::security_infos(bytes).map(|infos| inventory.security_infos = infos),
            15 => DataGroupDecoder::dg15(bytes).map(|key| inventory.active_authentication_key = Some(key)),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("DG{} could not be decoded: {}", dg, e);
        }
    }
}
