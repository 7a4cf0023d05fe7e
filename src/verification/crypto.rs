//! Symmetric primitives for BAC, PACE and secure messaging (ICAO Doc 9303
//! Part 11): 3DES/AES block ciphers in CBC, ISO 9797-1 MAC algorithm 3,
//! AES-CMAC and the counter based key derivation.

use aes::{Aes128, Aes192, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use cmac::{Cmac, Mac};
use des::{Des, TdesEde2};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::utils::PassportError;

pub const KDF_ENC: u32 = 1;
pub const KDF_MAC: u32 = 2;
pub const KDF_PACE: u32 = 3;

/// Cipher suite of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Tdes,
    Aes128,
    Aes192,
    Aes256,
}

impl CipherSuite {
    pub fn key_length(&self) -> usize {
        match self {
            CipherSuite::Tdes | CipherSuite::Aes128 => 16,
            CipherSuite::Aes192 => 24,
            CipherSuite::Aes256 => 32,
        }
    }

    pub fn block_size(&self) -> usize {
        match self {
            CipherSuite::Tdes => 8,
            _ => 16,
        }
    }
}

fn crypto_error<E: std::fmt::Display>(e: E) -> PassportError {
    PassportError::CryptoError(e.to_string())
}

pub fn sha1(data: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data).as_ref().to_vec()
}

/// Hash with a digest named the way the SOD reports it.
pub fn hash(algorithm: &str, data: &[u8]) -> Option<Vec<u8>> {
    let normalized = algorithm.to_ascii_uppercase().replace('-', "");
    let out = match normalized.as_str() {
        "SHA1" => sha1(data),
        "SHA224" => Sha224::digest(data).to_vec(),
        "SHA256" => Sha256::digest(data).to_vec(),
        "SHA384" => Sha384::digest(data).to_vec(),
        "SHA512" => Sha512::digest(data).to_vec(),
        _ => return None,
    };
    Some(out)
}

pub fn random_bytes(length: usize) -> Result<Vec<u8>, PassportError> {
    let mut buffer = vec![0u8; length];
    SystemRandom::new()
        .fill(&mut buffer)
        .map_err(|_| PassportError::CryptoError("System randomness unavailable".to_string()))?;
    Ok(buffer)
}

/// Set the DES parity bit (odd parity) on every byte.
pub fn adjust_parity(key: &mut [u8]) {
    for byte in key.iter_mut() {
        let upper = *byte & 0xFE;
        *byte = if upper.count_ones() % 2 == 0 { upper | 1 } else { upper };
    }
}

/// KDF(K, c) = H(K || c), truncated to the cipher's key length.
pub fn derive_key(seed: &[u8], counter: u32, suite: CipherSuite) -> Vec<u8> {
    let mut input = seed.to_vec();
    input.extend_from_slice(&counter.to_be_bytes());
    match suite {
        CipherSuite::Tdes => {
            let mut key = sha1(&input)[..16].to_vec();
            adjust_parity(&mut key);
            key
        }
        CipherSuite::Aes128 => sha1(&input)[..16].to_vec(),
        CipherSuite::Aes192 => Sha256::digest(&input)[..24].to_vec(),
        CipherSuite::Aes256 => Sha256::digest(&input).to_vec(),
    }
}

/// ISO 9797-1 padding method 2.
pub fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    out.push(0x80);
    while out.len() % block_size != 0 {
        out.push(0x00);
    }
    out
}

pub fn unpad(data: &[u8]) -> Result<Vec<u8>, PassportError> {
    let end = data
        .iter()
        .rposition(|b| *b != 0x00)
        .ok_or_else(|| PassportError::CryptoError("Padding marker missing".to_string()))?;
    if data[end] != 0x80 {
        return Err(PassportError::CryptoError("Invalid padding".to_string()));
    }
    Ok(data[..end].to_vec())
}

pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// A keyed block cipher for one of the secure-messaging suites.
pub enum BlockCipher {
    Tdes(TdesEde2),
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self, PassportError> {
        Ok(match suite {
            CipherSuite::Tdes => BlockCipher::Tdes(TdesEde2::new_from_slice(key).map_err(crypto_error)?),
            CipherSuite::Aes128 => BlockCipher::Aes128(Aes128::new_from_slice(key).map_err(crypto_error)?),
            CipherSuite::Aes192 => BlockCipher::Aes192(Aes192::new_from_slice(key).map_err(crypto_error)?),
            CipherSuite::Aes256 => BlockCipher::Aes256(Aes256::new_from_slice(key).map_err(crypto_error)?),
        })
    }

    pub fn block_size(&self) -> usize {
        match self {
            BlockCipher::Tdes(_) => 8,
            _ => 16,
        }
    }

    /// `block` must be exactly one block long.
    pub fn encrypt_block(&self, block: &mut [u8]) {
        match self {
            BlockCipher::Tdes(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes128(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes192(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes256(c) => c.encrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    pub fn decrypt_block(&self, block: &mut [u8]) {
        match self {
            BlockCipher::Tdes(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes128(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes192(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
            BlockCipher::Aes256(c) => c.decrypt_block(GenericArray::from_mut_slice(block)),
        }
    }

    fn check_blocks(&self, data: &[u8], iv: &[u8]) -> Result<(), PassportError> {
        let size = self.block_size();
        if data.len() % size != 0 || iv.len() != size {
            return Err(PassportError::CryptoError(format!(
                "CBC input of {} bytes (iv {}) is not block aligned",
                data.len(),
                iv.len()
            )));
        }
        Ok(())
    }

    /// CBC over already padded data.
    pub fn cbc_encrypt(&self, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
        self.check_blocks(data, iv)?;
        let size = self.block_size();
        let mut previous = iv.to_vec();
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(size) {
            let mut block = xor(chunk, &previous);
            self.encrypt_block(&mut block);
            out.extend_from_slice(&block);
            previous = block;
        }
        Ok(out)
    }

    pub fn cbc_decrypt(&self, iv: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
        self.check_blocks(data, iv)?;
        let size = self.block_size();
        let mut previous = iv.to_vec();
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(size) {
            let mut block = chunk.to_vec();
            self.decrypt_block(&mut block);
            out.extend(xor(&block, &previous));
            previous = chunk.to_vec();
        }
        Ok(out)
    }

    pub fn ecb_encrypt(&self, block: &[u8]) -> Vec<u8> {
        let mut out = block.to_vec();
        self.encrypt_block(&mut out);
        out
    }
}

/// ISO 9797-1 MAC algorithm 3 (retail MAC) with padding method 2 applied
/// here. `key` is the 16 byte double-length key Ka || Kb.
pub fn retail_mac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
    if key.len() != 16 {
        return Err(PassportError::CryptoError(format!("Retail MAC key must be 16 bytes, got {}", key.len())));
    }
    let ka = Des::new_from_slice(&key[..8]).map_err(crypto_error)?;
    let kb = Des::new_from_slice(&key[8..]).map_err(crypto_error)?;

    let mut state = [0u8; 8];
    for chunk in pad(data, 8).chunks(8) {
        for (s, d) in state.iter_mut().zip(chunk) {
            *s ^= d;
        }
        ka.encrypt_block(GenericArray::from_mut_slice(&mut state));
    }
    kb.decrypt_block(GenericArray::from_mut_slice(&mut state));
    ka.encrypt_block(GenericArray::from_mut_slice(&mut state));
    Ok(state.to_vec())
}

/// AES-CMAC over `data` as given (callers pad when the protocol says so).
pub fn aes_cmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
    fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
        let mut mac = <M as KeyInit>::new_from_slice(key).map_err(crypto_error)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
    match key.len() {
        16 => run::<Cmac<Aes128>>(key, data),
        24 => run::<Cmac<Aes192>>(key, data),
        32 => run::<Cmac<Aes256>>(key, data),
        other => Err(PassportError::CryptoError(format!("Invalid AES key length {}", other))),
    }
}

/// MAC of the channel's suite, truncated to 8 bytes.
pub fn mac(suite: CipherSuite, key: &[u8], data: &[u8]) -> Result<Vec<u8>, PassportError> {
    match suite {
        CipherSuite::Tdes => retail_mac(key, data),
        _ => Ok(aes_cmac(key, data)?[..8].to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_key_derivation_worked_example() {
        // Doc 9303 Part 11, Appendix D.2
        let seed = h("239AB9CB282DAF66231DC5A4DF6BFBAE");
        assert_eq!(derive_key(&seed, KDF_ENC, CipherSuite::Tdes), h("AB94FDECF2674FDFB9B391F85D7F76F2"));
        assert_eq!(derive_key(&seed, KDF_MAC, CipherSuite::Tdes), h("7962D9ECE03D1ACD4C76089DCE131543"));
    }

    #[test]
    fn test_cbc_and_retail_mac_worked_example() {
        let k_enc = h("AB94FDECF2674FDFB9B391F85D7F76F2");
        let k_mac = h("7962D9ECE03D1ACD4C76089DCE131543");
        let s = h("781723860C06C2264608F919887022120B795240CB7049B01C19B33E32804F0B");
        let cipher = BlockCipher::new(CipherSuite::Tdes, &k_enc).unwrap();
        let e_ifd = cipher.cbc_encrypt(&[0u8; 8], &s).unwrap();
        assert_eq!(e_ifd, h("72C29C2371CC9BDB65B779B8E8D37B29ECC154AA56A8799FAE2F498F76ED92F2"));
        assert_eq!(retail_mac(&k_mac, &e_ifd).unwrap(), h("5F1448EEA8AD90A7"));
        assert_eq!(cipher.cbc_decrypt(&[0u8; 8], &e_ifd).unwrap(), s);
    }

    #[test]
    fn test_padding() {
        assert_eq!(pad(&[0x01], 8), vec![0x01, 0x80, 0, 0, 0, 0, 0, 0]);
        assert_eq!(pad(&[0u8; 8], 8).len(), 16);
        assert_eq!(unpad(&[0x01, 0x80, 0, 0]).unwrap(), vec![0x01]);
        assert!(unpad(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_aes_cmac_rfc4493() {
        let key = h("2b7e151628aed2a6abf7158809cf4f3c");
        assert_eq!(aes_cmac(&key, &[]).unwrap(), h("bb1d6929e95937287fa37d129b756746"));
        let msg = h("6bc1bee22e409f96e93d7e117393172a");
        assert_eq!(aes_cmac(&key, &msg).unwrap(), h("070a16b46b4d4144f79bdd9dd04a287c"));
    }

    #[test]
    fn test_hash_names() {
        assert_eq!(hash("SHA-256", b"abc").unwrap().len(), 32);
        assert_eq!(hash("sha1", b"abc").unwrap(), h("a9993e364706816aba3e25717850c26c9cd0d89d"));
        assert!(hash("MD5", b"abc").is_none());
    }

    #[test]
    fn test_parity() {
        let mut key = [0x00, 0x01, 0xFE, 0xFF];
        adjust_parity(&mut key);
        assert_eq!(key, [0x01, 0x01, 0xFE, 0xFE]);
    }
}
