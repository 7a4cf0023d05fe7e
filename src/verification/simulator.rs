//! In-memory eMRTD used by the tests: a file system behind BAC and/or PACE
//! with secure messaging, speaking raw APDUs through `CardChannel`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::utils::PassportError;
use crate::verification::apdu::{self, CommandApdu, ResponseApdu, EF_CARD_ACCESS, MRTD_AID};
use crate::verification::bac::BacKey;
use crate::verification::channel::CardChannel;
use crate::verification::crypto::{self, BlockCipher, CipherSuite, KDF_ENC, KDF_MAC};
use crate::verification::ec::{Curve, EcPoint};
use crate::verification::pace::{self, PaceProtocol};
use crate::verification::secure_messaging::SecureMessaging;
use crate::verification::tlv::{self, Tlv};

const SW_OK: u16 = 0x9000;
const SW_AUTH_FAILED: u16 = 0x6300;
const SW_WRONG_DATA: u16 = 0x6A80;
const SW_WRONG_LENGTH: u16 = 0x6700;

#[derive(Default)]
struct PaceState {
    protocol: Option<PaceProtocol>,
    curve: Option<Curve>,
    nonce: Vec<u8>,
    mapped: Option<EcPoint>,
    chip_eph_pk: Vec<u8>,
    terminal_eph_pk: Vec<u8>,
    keys: Option<(Vec<u8>, Vec<u8>)>,
    step: u8,
}

/// What the chip saw, shared with the test after the chip has been boxed.
#[derive(Default, Debug)]
pub struct ChipLog {
    pub selected: Vec<u16>,
    pub instructions: Vec<u8>,
}

pub struct SimulatedChip {
    key: BacKey,
    files: BTreeMap<u16, Vec<u8>>,
    pace: Option<(CipherSuite, u32)>,
    refuse_pace: bool,
    fixed_rnd_ic: Option<Vec<u8>>,
    fixed_k_ic: Option<Vec<u8>>,
    lose_link_on: Option<u16>,
    denied: Vec<u16>,
    application_selected: bool,
    selected: Option<u16>,
    rnd_ic: Vec<u8>,
    sm: Option<SecureMessaging>,
    pace_state: PaceState,
    log: Arc<Mutex<ChipLog>>,
}

pub struct SimulatedChipBuilder {
    chip: SimulatedChip,
}

impl SimulatedChipBuilder {
    pub fn with_file(mut self, fid: u16, bytes: Vec<u8>) -> Self {
        self.chip.files.insert(fid, bytes);
        self
    }

    pub fn with_data_group(self, number: u8, bytes: Vec<u8>) -> Self {
        let fid = apdu::data_group_fid(number).unwrap_or(0);
        self.with_file(fid, bytes)
    }

    /// Advertise and run PACE ECDH-GM with this suite and curve.
    pub fn with_pace(mut self, suite: CipherSuite, parameter_id: u32) -> Self {
        self.chip.pace = Some((suite, parameter_id));
        let suffix = match suite {
            CipherSuite::Tdes => 1,
            CipherSuite::Aes128 => 2,
            CipherSuite::Aes192 => 3,
            CipherSuite::Aes256 => 4,
        };
        let oid = format!("{}.2.{}", pace::ID_PACE, suffix);
        let info = [
            tlv::encode(0x06, &tlv::encode_oid(&oid).unwrap_or_default()),
            tlv::encode(0x02, &[2]),
            tlv::encode(0x02, &[parameter_id as u8]),
        ]
        .concat();
        let card_access = tlv::encode(0x31, &tlv::encode(0x30, &info));
        self.chip.files.insert(EF_CARD_ACCESS, card_access);
        self
    }

    /// Advertise PACE in EF.CardAccess but answer MSE:Set AT with an error.
    pub fn refusing_pace(mut self) -> Self {
        self.chip.refuse_pace = true;
        self
    }

    pub fn with_bac_nonces(mut self, rnd_ic: Vec<u8>, k_ic: Vec<u8>) -> Self {
        self.chip.fixed_rnd_ic = Some(rnd_ic);
        self.chip.fixed_k_ic = Some(k_ic);
        self
    }

    /// Drop the link when this file is selected.
    pub fn losing_link_on(mut self, fid: u16) -> Self {
        self.chip.lose_link_on = Some(fid);
        self
    }

    /// Answer SELECT of this file with "security status not satisfied".
    pub fn denying_access_to(mut self, fid: u16) -> Self {
        self.chip.denied.push(fid);
        self
    }

    pub fn build(self) -> SimulatedChip {
        self.chip
    }
}

fn random(length: usize) -> Vec<u8> {
    crypto::random_bytes(length).unwrap_or_else(|_| vec![0x5A; length])
}

impl SimulatedChip {
    pub fn builder(key: BacKey) -> SimulatedChipBuilder {
        SimulatedChipBuilder {
            chip: SimulatedChip {
                key,
                files: BTreeMap::new(),
                pace: None,
                refuse_pace: false,
                fixed_rnd_ic: None,
                fixed_k_ic: None,
                lose_link_on: None,
                denied: Vec::new(),
                application_selected: false,
                selected: None,
                rnd_ic: Vec::new(),
                sm: None,
                pace_state: PaceState::default(),
                log: Arc::new(Mutex::new(ChipLog::default())),
            },
        }
    }

    pub fn log(&self) -> Arc<Mutex<ChipLog>> {
        self.log.clone()
    }

    fn authenticated(&self) -> bool {
        self.sm.is_some()
    }

    fn respond(&mut self, command: &CommandApdu) -> Result<ResponseApdu, PassportError> {
        if let Ok(mut log) = self.log.lock() {
            log.instructions.push(command.ins);
        }
        match command.ins {
            0xA4 => self.select(command),
            0xB0 => Ok(self.read_binary(command)),
            0xB1 => Ok(self.read_binary_extended(command)),
            0x84 => Ok(self.get_challenge()),
            0x82 => self.external_authenticate(command),
            0x22 => Ok(self.mse_set_at(command)),
            0x86 => self.general_authenticate(command),
            _ => Ok(ResponseApdu::new(Vec::new(), 0x6D00)),
        }
    }

    fn select(&mut self, command: &CommandApdu) -> Result<ResponseApdu, PassportError> {
        if command.p1 == 0x04 {
            self.application_selected = command.data == MRTD_AID;
            self.selected = None;
            let sw = if self.application_selected { SW_OK } else { 0x6A82 };
            return Ok(ResponseApdu::new(Vec::new(), sw));
        }
        if command.data.len() != 2 {
            return Ok(ResponseApdu::new(Vec::new(), SW_WRONG_LENGTH));
        }
        let fid = u16::from_be_bytes([command.data[0], command.data[1]]);
        if let Ok(mut log) = self.log.lock() {
            log.selected.push(fid);
        }
        if self.lose_link_on == Some(fid) {
            return Err(PassportError::TransportError("Tag was lost".to_string()));
        }
        if (fid != EF_CARD_ACCESS && !self.authenticated()) || self.denied.contains(&fid) {
            return Ok(ResponseApdu::new(Vec::new(), 0x6982));
        }
        if self.files.contains_key(&fid) {
            self.selected = Some(fid);
            Ok(ResponseApdu::new(Vec::new(), SW_OK))
        } else {
            self.selected = None;
            Ok(ResponseApdu::new(Vec::new(), 0x6A82))
        }
    }

    fn read_from(&self, offset: usize, le: usize) -> Result<(Vec<u8>, u16), u16> {
        let file = self.selected.and_then(|fid| self.files.get(&fid)).ok_or(0x6986u16)?;
        if offset > file.len() {
            return Err(0x6B00);
        }
        let end = (offset + le).min(file.len());
        let sw = if offset + le > file.len() { 0x6282 } else { SW_OK };
        Ok((file[offset..end].to_vec(), sw))
    }

    fn read_binary(&self, command: &CommandApdu) -> ResponseApdu {
        // bit 8 of P1 selects by short file identifier, which this chip lacks
        if command.p1 & 0x80 != 0 {
            return ResponseApdu::new(Vec::new(), 0x6A81);
        }
        let offset = u16::from_be_bytes([command.p1, command.p2]) as usize;
        match self.read_from(offset, command.le.unwrap_or(256)) {
            Ok((data, sw)) => ResponseApdu::new(data, sw),
            Err(sw) => ResponseApdu::new(Vec::new(), sw),
        }
    }

    fn read_binary_extended(&self, command: &CommandApdu) -> ResponseApdu {
        let offset = match Tlv::parse(&command.data) {
            Ok((object, _)) if object.tag == 0x54 && !object.value.is_empty() && object.value.len() <= 4 => {
                object.value.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
            }
            _ => return ResponseApdu::new(Vec::new(), SW_WRONG_DATA),
        };
        match self.read_from(offset, command.le.unwrap_or(256)) {
            Ok((data, sw)) => ResponseApdu::new(tlv::encode(0x53, &data), sw),
            Err(sw) => ResponseApdu::new(Vec::new(), sw),
        }
    }

    fn get_challenge(&mut self) -> ResponseApdu {
        self.rnd_ic = self.fixed_rnd_ic.clone().unwrap_or_else(|| random(8));
        ResponseApdu::new(self.rnd_ic.clone(), SW_OK)
    }

    fn external_authenticate(&mut self, command: &CommandApdu) -> Result<ResponseApdu, PassportError> {
        let keys = self.key.derive_keys();
        if command.data.len() != 40 || self.rnd_ic.len() != 8 {
            return Ok(ResponseApdu::new(Vec::new(), SW_WRONG_LENGTH));
        }
        let (e_ifd, m_ifd) = command.data.split_at(32);
        if crypto::retail_mac(&keys.k_mac, e_ifd)? != m_ifd {
            return Ok(ResponseApdu::new(Vec::new(), SW_AUTH_FAILED));
        }
        let cipher = BlockCipher::new(CipherSuite::Tdes, &keys.k_enc)?;
        let s = cipher.cbc_decrypt(&[0u8; 8], e_ifd)?;
        if s[8..16] != self.rnd_ic[..] {
            return Ok(ResponseApdu::new(Vec::new(), SW_AUTH_FAILED));
        }
        let rnd_ifd = s[..8].to_vec();
        let k_ifd = s[16..32].to_vec();
        let k_ic = self.fixed_k_ic.clone().unwrap_or_else(|| random(16));

        let mut r = self.rnd_ic.clone();
        r.extend_from_slice(&rnd_ifd);
        r.extend_from_slice(&k_ic);
        let e_ic = cipher.cbc_encrypt(&[0u8; 8], &r)?;
        let mut answer = e_ic.clone();
        answer.extend(crypto::retail_mac(&keys.k_mac, &e_ic)?);

        let seed = crypto::xor(&k_ifd, &k_ic);
        let mut ssc = self.rnd_ic[4..8].to_vec();
        ssc.extend_from_slice(&rnd_ifd[4..8]);
        self.sm = Some(SecureMessaging::new(
            CipherSuite::Tdes,
            &crypto::derive_key(&seed, KDF_ENC, CipherSuite::Tdes),
            &crypto::derive_key(&seed, KDF_MAC, CipherSuite::Tdes),
            ssc,
        )?);
        Ok(ResponseApdu::new(answer, SW_OK))
    }

    fn mse_set_at(&mut self, command: &CommandApdu) -> ResponseApdu {
        if self.refuse_pace || self.pace.is_none() {
            return ResponseApdu::new(Vec::new(), SW_WRONG_DATA);
        }
        let objects = Tlv::parse_all(&command.data).unwrap_or_default();
        let protocol = objects
            .iter()
            .find(|t| t.tag == 0x80)
            .and_then(|t| PaceProtocol::from_oid(&tlv::decode_oid(&t.value)));
        let curve = objects
            .iter()
            .find(|t| t.tag == 0x84)
            .and_then(|t| t.value.first().copied())
            .and_then(|id| Curve::from_parameter_id(id as u32));
        match (protocol, curve) {
            (Some(protocol), Some(curve)) => {
                self.pace_state = PaceState {
                    protocol: Some(protocol),
                    curve: Some(curve),
                    ..PaceState::default()
                };
                ResponseApdu::new(Vec::new(), SW_OK)
            }
            _ => ResponseApdu::new(Vec::new(), SW_WRONG_DATA),
        }
    }

    fn dynamic_data(tag: u32, value: &[u8]) -> ResponseApdu {
        ResponseApdu::new(tlv::encode(0x7C, &tlv::encode(tag, value)), SW_OK)
    }

    fn general_authenticate(&mut self, command: &CommandApdu) -> Result<ResponseApdu, PassportError> {
        let (Some(protocol), Some(curve)) = (self.pace_state.protocol.clone(), self.pace_state.curve.clone()) else {
            return Ok(ResponseApdu::new(Vec::new(), 0x6985));
        };
        let suite = protocol.suite;
        let (container, _) = Tlv::parse(&command.data)?;
        let field = |tag: u32| container.find(tag).map(|t| t.value);

        match self.pace_state.step {
            0 => {
                let nonce = random(suite.block_size());
                let k_pi = pace::password_key(&self.key, suite);
                let cipher = BlockCipher::new(suite, &k_pi)?;
                let encrypted = cipher.cbc_encrypt(&vec![0u8; suite.block_size()], &nonce)?;
                self.pace_state.nonce = nonce;
                self.pace_state.step = 1;
                Ok(Self::dynamic_data(0x80, &encrypted))
            }
            1 => {
                let terminal_pk = curve.decode_point(&field(0x81).unwrap_or_default())?;
                let sk = curve.random_scalar()?;
                let pk = curve.encode_point(&curve.multiply(&sk, &curve.generator()))?;
                let shared = curve.multiply(&sk, &terminal_pk);
                self.pace_state.mapped = Some(pace::generic_mapping(&curve, &self.pace_state.nonce, &shared)?);
                self.pace_state.step = 2;
                Ok(Self::dynamic_data(0x82, &pk))
            }
            2 => {
                let Some(mapped) = self.pace_state.mapped.clone() else {
                    return Ok(ResponseApdu::new(Vec::new(), 0x6985));
                };
                let terminal_raw = field(0x83).unwrap_or_default();
                let terminal_pk = curve.decode_point(&terminal_raw)?;
                let sk = curve.random_scalar()?;
                let pk = curve.encode_point(&curve.multiply(&sk, &mapped))?;
                let agreed = curve.multiply(&sk, &terminal_pk);
                let shared_x = curve.encode_x(&agreed).unwrap_or_default();
                self.pace_state.keys = Some(pace::session_keys(suite, &shared_x));
                self.pace_state.terminal_eph_pk = terminal_raw;
                self.pace_state.chip_eph_pk = pk.clone();
                self.pace_state.step = 3;
                Ok(Self::dynamic_data(0x84, &pk))
            }
            _ => {
                let Some((ks_enc, ks_mac)) = self.pace_state.keys.clone() else {
                    return Ok(ResponseApdu::new(Vec::new(), 0x6985));
                };
                let expected =
                    pace::authentication_token(suite, &ks_mac, &protocol.oid, &self.pace_state.chip_eph_pk)?;
                if field(0x85).unwrap_or_default() != expected {
                    self.pace_state = PaceState::default();
                    return Ok(ResponseApdu::new(Vec::new(), SW_AUTH_FAILED));
                }
                let token =
                    pace::authentication_token(suite, &ks_mac, &protocol.oid, &self.pace_state.terminal_eph_pk)?;
                self.sm = Some(SecureMessaging::new(suite, &ks_enc, &ks_mac, vec![0u8; suite.block_size()])?);
                self.pace_state = PaceState::default();
                Ok(Self::dynamic_data(0x86, &token))
            }
        }
    }
}

impl CardChannel for SimulatedChip {
    fn connect(&mut self) -> Result<(), PassportError> {
        Ok(())
    }

    fn transceive(&mut self, bytes: &[u8]) -> Result<Vec<u8>, PassportError> {
        let command = parse_command(bytes)?;
        let protected = command.cla & 0x0C == 0x0C;
        if !protected {
            if self.sm.is_some() {
                // a plain command ends the secure session
                self.sm = None;
                return Ok(ResponseApdu::new(Vec::new(), 0x6988).to_bytes());
            }
            return Ok(self.respond(&command)?.to_bytes());
        }
        let Some(mut sm) = self.sm.take() else {
            return Ok(ResponseApdu::new(Vec::new(), 0x6988).to_bytes());
        };
        let plain = match sm.unwrap_command(&command) {
            Ok(plain) => plain,
            Err(_) => return Ok(ResponseApdu::new(Vec::new(), 0x6988).to_bytes()),
        };
        self.sm = Some(sm);
        let answer = self.respond(&plain)?;
        match self.sm.as_mut() {
            Some(sm) => Ok(sm.wrap_response(plain.ins, &answer)?.to_bytes()),
            None => Ok(answer.to_bytes()),
        }
    }

    fn close(&mut self) {}
}

/// Short-APDU decoder for the chip side.
fn parse_command(bytes: &[u8]) -> Result<CommandApdu, PassportError> {
    if bytes.len() < 4 {
        return Err(PassportError::TransportError("Command shorter than header".to_string()));
    }
    let mut command = CommandApdu::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let body = &bytes[4..];
    match body.len() {
        0 => {}
        1 => command.le = Some(if body[0] == 0 { 256 } else { body[0] as usize }),
        _ => {
            let lc = body[0] as usize;
            command.data = body
                .get(1..1 + lc)
                .ok_or_else(|| PassportError::TransportError("Lc exceeds command".to_string()))?
                .to_vec();
            if let Some(le) = body.get(1 + lc) {
                command.le = Some(if *le == 0 { 256 } else { *le as usize });
            }
        }
    }
    Ok(command)
}
