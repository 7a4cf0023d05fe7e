//! ISO 7816-4 command and response APDUs used by the eMRTD reader.

use std::fmt;

use crate::utils::PassportError;
use crate::verification::tlv;

/// eMRTD application identifier (LDS1).
pub const MRTD_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];

pub const EF_CARD_ACCESS: u16 = 0x011C;
pub const EF_SOD: u16 = 0x011D;
pub const EF_COM: u16 = 0x011E;

/// Highest offset a short READ BINARY can address.
pub const MAX_SHORT_OFFSET: usize = 0x7FFF;

pub const SW_SUCCESS: u16 = 0x9000;
pub const SW_END_OF_FILE: u16 = 0x6282;
pub const SW_SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
pub const SW_COMMAND_NOT_ALLOWED: u16 = 0x6986;
pub const SW_SM_DATA_MISSING: u16 = 0x6987;
pub const SW_SM_DATA_INCORRECT: u16 = 0x6988;
pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;
pub const SW_REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;
pub const SW_WRONG_P1P2: u16 = 0x6B00;

/// File identifier of DG1..DG16 (0x0101..0x0110).
pub fn data_group_fid(number: u8) -> Option<u16> {
    if (1..=16).contains(&number) {
        Some(0x0100 | number as u16)
    } else {
        None
    }
}

/// LDS tag of DG1..DG16, as listed in EF.COM.
pub fn data_group_tag(number: u8) -> Option<u8> {
    let tag = match number {
        1 => 0x61,
        2 => 0x75,
        3 => 0x63,
        4 => 0x76,
        5 => 0x65,
        6 => 0x66,
        7 => 0x67,
        8 => 0x68,
        9 => 0x69,
        10 => 0x6A,
        11 => 0x6B,
        12 => 0x6C,
        13 => 0x6D,
        14 => 0x6E,
        15 => 0x6F,
        16 => 0x70,
        _ => return None,
    };
    Some(tag)
}

pub fn data_group_from_tag(tag: u8) -> Option<u8> {
    (1..=16).find(|n| data_group_tag(*n) == Some(tag))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; 256 is encoded as 0x00
    pub le: Option<usize>,
}

impl CommandApdu {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        CommandApdu {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn with_le(mut self, le: usize) -> Self {
        self.le = Some(le);
        self
    }

    /// SELECT EF by file identifier, no response data.
    pub fn select_file(fid: u16) -> Self {
        CommandApdu::new(0x00, 0xA4, 0x02, 0x0C).with_data(fid.to_be_bytes().to_vec())
    }

    /// SELECT by DF name.
    pub fn select_application(aid: &[u8]) -> Self {
        CommandApdu::new(0x00, 0xA4, 0x04, 0x0C).with_data(aid.to_vec())
    }

    /// READ BINARY with a 15-bit offset. P1 bit 8 would mean a short file
    /// identifier, so larger offsets need `read_binary_extended`.
    pub fn read_binary(offset: usize, le: u8) -> Result<Self, PassportError> {
        if offset > MAX_SHORT_OFFSET {
            return Err(PassportError::DataGroupError(format!(
                "Offset {:#X} needs an extended READ BINARY",
                offset
            )));
        }
        let [p1, p2] = (offset as u16).to_be_bytes();
        let le = if le == 0 { 256 } else { le as usize };
        Ok(CommandApdu::new(0x00, 0xB0, p1, p2).with_le(le))
    }

    /// READ BINARY (odd INS) with the offset in data object 54. The answer
    /// comes back wrapped in data object 53.
    pub fn read_binary_extended(offset: usize, le: u8) -> Self {
        let bytes = (offset as u32).to_be_bytes();
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(3);
        let le = if le == 0 { 256 } else { le as usize };
        CommandApdu::new(0x00, 0xB1, 0x00, 0x00)
            .with_data(tlv::encode(0x54, &bytes[start..]))
            .with_le(le)
    }

    pub fn get_data(p1: u8, p2: u8, le: u8) -> Self {
        let le = if le == 0 { 256 } else { le as usize };
        CommandApdu::new(0x00, 0xCA, p1, p2).with_le(le)
    }

    pub fn get_challenge() -> Self {
        CommandApdu::new(0x00, 0x84, 0x00, 0x00).with_le(8)
    }

    pub fn external_authenticate(data: Vec<u8>) -> Self {
        CommandApdu::new(0x00, 0x82, 0x00, 0x00).with_data(data).with_le(0x28)
    }

    /// MSE:Set AT for PACE with an MRZ derived password.
    pub fn mse_set_at_pace(oid: &[u8], parameter_id: Option<u8>) -> Self {
        let mut data = Vec::with_capacity(oid.len() + 8);
        data.push(0x80);
        data.push(oid.len() as u8);
        data.extend_from_slice(oid);
        // password reference: MRZ
        data.extend_from_slice(&[0x83, 0x01, 0x01]);
        if let Some(id) = parameter_id {
            data.extend_from_slice(&[0x84, 0x01, id]);
        }
        CommandApdu::new(0x00, 0x22, 0xC1, 0xA4).with_data(data)
    }

    /// GENERAL AUTHENTICATE; every step but the last uses command chaining.
    pub fn general_authenticate(data: Vec<u8>, last: bool) -> Self {
        let cla = if last { 0x00 } else { 0x10 };
        CommandApdu::new(cla, 0x86, 0x00, 0x00).with_data(data).with_le(256)
    }

    /// Short APDU encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.cla, self.ins, self.p1, self.p2];
        if !self.data.is_empty() {
            bytes.push(self.data.len() as u8);
            bytes.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            bytes.push(if le >= 256 { 0x00 } else { le as u8 });
        }
        bytes
    }
}

impl fmt::Display for CommandApdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ResponseApdu {
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        let [sw1, sw2] = sw.to_be_bytes();
        ResponseApdu { data, sw1, sw2 }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, PassportError> {
        if bytes.len() < 2 {
            return Err(PassportError::TransportError(format!(
                "Response too short ({} bytes)",
                bytes.len()
            )));
        }
        let (data, sw) = bytes.split_at(bytes.len() - 2);
        Ok(ResponseApdu {
            data: data.to_vec(),
            sw1: sw[0],
            sw2: sw[1],
        })
    }

    pub fn sw(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub fn is_success(&self) -> bool {
        self.sw() == SW_SUCCESS
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.data.clone();
        bytes.push(self.sw1);
        bytes.push(self.sw2);
        bytes
    }

    /// Turn a non-9000 status into a `CardStatus` error.
    pub fn check(self, context: &str) -> Result<Self, PassportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PassportError::CardStatus {
                sw: self.sw(),
                context: context.to_string(),
            })
        }
    }
}
