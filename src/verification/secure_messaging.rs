use log::trace;

use crate::utils::PassportError;
use crate::verification::apdu::{CommandApdu, ResponseApdu};
use crate::verification::crypto::{self, BlockCipher, CipherSuite};
use crate::verification::tlv::{self, Tlv};

/// Secure messaging session keys and send sequence counter. Every wrapped
/// command and every unwrapped response advances the counter by one.
pub struct SecureMessaging {
    suite: CipherSuite,
    cipher: BlockCipher,
    ks_enc: Vec<u8>,
    ks_mac: Vec<u8>,
    ssc: Vec<u8>,
}

impl SecureMessaging {
    pub fn new(suite: CipherSuite, ks_enc: &[u8], ks_mac: &[u8], ssc: Vec<u8>) -> Result<Self, PassportError> {
        if ssc.len() != suite.block_size() {
            return Err(PassportError::SecureMessagingError(format!(
                "SSC must be {} bytes for {:?}",
                suite.block_size(),
                suite
            )));
        }
        Ok(SecureMessaging {
            suite,
            cipher: BlockCipher::new(suite, ks_enc)?,
            ks_enc: ks_enc.to_vec(),
            ks_mac: ks_mac.to_vec(),
            ssc,
        })
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn ssc(&self) -> &[u8] {
        &self.ssc
    }

    fn increment_ssc(&mut self) {
        for byte in self.ssc.iter_mut().rev() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }

    /// 3DES uses a zero IV; AES encrypts the SSC to get one.
    fn iv(&self) -> Result<Vec<u8>, PassportError> {
        match self.suite {
            CipherSuite::Tdes => Ok(vec![0u8; 8]),
            _ => {
                let keyed = BlockCipher::new(self.suite, &self.ks_enc)?;
                Ok(keyed.ecb_encrypt(&self.ssc))
            }
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<Vec<u8>, PassportError> {
        let mut input = self.ssc.clone();
        input.extend_from_slice(payload);
        match self.suite {
            // retail_mac pads internally
            CipherSuite::Tdes => crypto::retail_mac(&self.ks_mac, &input),
            _ => crypto::mac(self.suite, &self.ks_mac, &crypto::pad(&input, 16)),
        }
    }

    /// Odd instructions carry BER-TLV data in DO85 with no padding-content
    /// indicator; even ones use DO87.
    fn cryptogram(ins: u8, encrypted: Vec<u8>) -> Vec<u8> {
        if ins & 0x01 == 0x01 {
            tlv::encode(0x85, &encrypted)
        } else {
            let mut value = vec![0x01];
            value.extend(encrypted);
            tlv::encode(0x87, &value)
        }
    }

    pub fn wrap(&mut self, command: &CommandApdu) -> Result<CommandApdu, PassportError> {
        self.increment_ssc();
        let block = self.suite.block_size();
        let cla = command.cla | 0x0C;
        let header = crypto::pad(&[cla, command.ins, command.p1, command.p2], block);

        let mut do87 = Vec::new();
        if !command.data.is_empty() {
            let encrypted = self.cipher.cbc_encrypt(&self.iv()?, &crypto::pad(&command.data, block))?;
            do87 = Self::cryptogram(command.ins, encrypted);
        }
        let do97 = match command.le {
            Some(le) => tlv::encode(0x97, &[if le >= 256 { 0x00 } else { le as u8 }]),
            None => Vec::new(),
        };

        let mut mac_input = header;
        mac_input.extend_from_slice(&do87);
        mac_input.extend_from_slice(&do97);
        let mac = self.mac(&mac_input)?;

        let mut body = do87;
        body.extend(do97);
        body.extend(tlv::encode(0x8E, &mac));
        trace!("SM wrapped INS {:02X} with SSC {}", command.ins, hex::encode_upper(&self.ssc));

        Ok(CommandApdu::new(cla, command.ins, command.p1, command.p2)
            .with_data(body)
            .with_le(256))
    }

    pub fn unwrap(&mut self, response: &ResponseApdu) -> Result<ResponseApdu, PassportError> {
        self.increment_ssc();
        if response.data.is_empty() {
            // the chip answers an SM error in plain
            return Ok(response.clone());
        }

        let objects = Tlv::parse_all(&response.data)
            .map_err(|e| PassportError::SecureMessagingError(format!("Bad protected response: {}", e)))?;
        let find = |tag: u32| objects.iter().find(|t| t.tag == tag);

        let received_mac = find(0x8E)
            .ok_or_else(|| PassportError::SecureMessagingError("Response MAC missing".to_string()))?;
        let mut mac_input = Vec::new();
        for tag in [0x85, 0x87, 0x99] {
            if let Some(object) = find(tag) {
                mac_input.extend(object.encode());
            }
        }
        if self.mac(&mac_input)? != received_mac.value {
            return Err(PassportError::SecureMessagingError("Response MAC mismatch".to_string()));
        }

        let encrypted = match (find(0x87), find(0x85)) {
            (Some(do87), _) => Some(
                do87.value
                    .get(1..)
                    .ok_or_else(|| PassportError::SecureMessagingError("Empty DO87".to_string()))?
                    .to_vec(),
            ),
            (None, Some(do85)) => Some(do85.value.clone()),
            (None, None) => None,
        };
        let data = match encrypted {
            Some(encrypted) => {
                let plain = self.cipher.cbc_decrypt(&self.iv()?, &encrypted)?;
                crypto::unpad(&plain)?
            }
            None => Vec::new(),
        };
        let sw = match find(0x99) {
            Some(do99) if do99.value.len() == 2 => u16::from_be_bytes([do99.value[0], do99.value[1]]),
            _ => response.sw(),
        };
        Ok(ResponseApdu::new(data, sw))
    }
}

/// Chip side of the channel, for the simulated chip used in tests.
#[cfg(test)]
impl SecureMessaging {
    pub(crate) fn unwrap_command(&mut self, command: &CommandApdu) -> Result<CommandApdu, PassportError> {
        self.increment_ssc();
        let objects = Tlv::parse_all(&command.data)?;
        let find = |tag: u32| objects.iter().find(|t| t.tag == tag);
        let received_mac = find(0x8E)
            .ok_or_else(|| PassportError::SecureMessagingError("Command MAC missing".to_string()))?;

        let mut mac_input = crypto::pad(&[command.cla, command.ins, command.p1, command.p2], self.suite.block_size());
        for tag in [0x85, 0x87, 0x97] {
            if let Some(object) = find(tag) {
                mac_input.extend(object.encode());
            }
        }
        if self.mac(&mac_input)? != received_mac.value {
            return Err(PassportError::SecureMessagingError("Command MAC mismatch".to_string()));
        }

        let mut plain = CommandApdu::new(command.cla & !0x0C, command.ins, command.p1, command.p2);
        let encrypted = match (find(0x87), find(0x85)) {
            (Some(do87), _) => Some(do87.value.get(1..).unwrap_or_default().to_vec()),
            (None, Some(do85)) => Some(do85.value.clone()),
            (None, None) => None,
        };
        if let Some(encrypted) = encrypted {
            let decrypted = self.cipher.cbc_decrypt(&self.iv()?, &encrypted)?;
            plain.data = crypto::unpad(&decrypted)?;
        }
        if let Some(do97) = find(0x97) {
            let le = do97.value.first().copied().unwrap_or(0);
            plain.le = Some(if le == 0 { 256 } else { le as usize });
        }
        Ok(plain)
    }

    pub(crate) fn wrap_response(&mut self, ins: u8, response: &ResponseApdu) -> Result<ResponseApdu, PassportError> {
        self.increment_ssc();
        let mut body = Vec::new();
        if !response.data.is_empty() {
            let encrypted = self
                .cipher
                .cbc_encrypt(&self.iv()?, &crypto::pad(&response.data, self.suite.block_size()))?;
            body.extend(Self::cryptogram(ins, encrypted));
        }
        body.extend(tlv::encode(0x99, &response.sw().to_be_bytes()));
        let mac = self.mac(&body)?;
        body.extend(tlv::encode(0x8E, &mac));
        Ok(ResponseApdu::new(body, response.sw()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    fn worked_example() -> SecureMessaging {
        // Doc 9303 Part 11, Appendix D.3 and D.4
        SecureMessaging::new(
            CipherSuite::Tdes,
            &h("979EC13B1CBFE9DCD01AB0FED307EAE5"),
            &h("F1CB1F1FB5ADF208806B89DC579DC1F8"),
            h("887022120C06C226"),
        )
        .unwrap()
    }

    #[test]
    fn test_select_and_read_worked_example() {
        let mut sm = worked_example();

        let select = sm.wrap(&CommandApdu::select_file(0x011E)).unwrap();
        assert_eq!(select.to_string(), "0CA4020C158709016375432908C044F68E08BF8B92D635FF24F800");
        let response = sm
            .unwrap(&ResponseApdu::parse(&h("990290008E08FA855A5D4C50A8ED9000")).unwrap())
            .unwrap();
        assert!(response.is_success());
        assert!(response.data.is_empty());

        let read = sm.wrap(&CommandApdu::read_binary(0, 4).unwrap()).unwrap();
        assert_eq!(read.to_string(), "0CB000000D9701048E08ED6705417E96BA5500");
        let response = sm
            .unwrap(&ResponseApdu::parse(&h("8709019FF0EC34F9922651990290008E08AD55CC17140B2DED9000")).unwrap())
            .unwrap();
        assert_eq!(response.data, h("60145F01"));
        assert_eq!(sm.ssc(), h("887022120C06C22A").as_slice());
    }

    #[test]
    fn test_tampered_mac_is_rejected() {
        let mut sm = worked_example();
        sm.wrap(&CommandApdu::select_file(0x011E)).unwrap();
        let tampered = ResponseApdu::parse(&h("990290008E08FA855A5D4C50A8EE9000")).unwrap();
        assert!(matches!(sm.unwrap(&tampered), Err(PassportError::SecureMessagingError(_))));
    }

    #[test]
    fn test_aes_round_trip_between_two_ends() {
        let key_enc = h("000102030405060708090A0B0C0D0E0F");
        let key_mac = h("0F0E0D0C0B0A09080706050403020100");
        let mut terminal = SecureMessaging::new(CipherSuite::Aes128, &key_enc, &key_mac, vec![0u8; 16]).unwrap();
        let mut chip = SecureMessaging::new(CipherSuite::Aes128, &key_enc, &key_mac, vec![0u8; 16]).unwrap();

        let wrapped = terminal.wrap(&CommandApdu::read_binary(0x10, 0x20).unwrap()).unwrap();
        let received = chip.unwrap_command(&wrapped).unwrap();
        assert_eq!(received, CommandApdu::read_binary(0x10, 0x20).unwrap());

        let answer = chip.wrap_response(0xB0, &ResponseApdu::new(b"hello".to_vec(), 0x9000)).unwrap();
        let plain = terminal.unwrap(&answer).unwrap();
        assert_eq!(plain.data, b"hello".to_vec());
        assert!(plain.is_success());
        assert_eq!(terminal.ssc(), chip.ssc());
    }

    #[test]
    fn test_odd_instruction_uses_do85() {
        let key_enc = h("000102030405060708090A0B0C0D0E0F");
        let key_mac = h("0F0E0D0C0B0A09080706050403020100");
        let mut terminal = SecureMessaging::new(CipherSuite::Aes128, &key_enc, &key_mac, vec![0u8; 16]).unwrap();
        let mut chip = SecureMessaging::new(CipherSuite::Aes128, &key_enc, &key_mac, vec![0u8; 16]).unwrap();

        let command = CommandApdu::read_binary_extended(0x8015, 0xDF);
        let wrapped = terminal.wrap(&command).unwrap();
        assert_eq!(wrapped.data[0], 0x85);
        assert_eq!(chip.unwrap_command(&wrapped).unwrap(), command);

        let answer = chip
            .wrap_response(0xB1, &ResponseApdu::new(tlv::encode(0x53, b"tail"), 0x9000))
            .unwrap();
        assert_eq!(answer.data[0], 0x85);
        assert_eq!(terminal.unwrap(&answer).unwrap().data, tlv::encode(0x53, b"tail"));
    }

    #[test]
    fn test_ssc_carry() {
        let mut sm = SecureMessaging::new(
            CipherSuite::Tdes,
            &h("979EC13B1CBFE9DCD01AB0FED307EAE5"),
            &h("F1CB1F1FB5ADF208806B89DC579DC1F8"),
            h("00000000000000FF"),
        )
        .unwrap();
        sm.increment_ssc();
        assert_eq!(sm.ssc(), h("0000000000000100").as_slice());
    }
}
