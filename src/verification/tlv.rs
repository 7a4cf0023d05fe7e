//! Minimal BER-TLV reader/writer plus the OID and INTEGER helpers needed for
//! LDS files, SecurityInfos and the SOD.

use crate::utils::PassportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u32,
    pub value: Vec<u8>,
}

fn truncated(what: &str) -> PassportError {
    PassportError::TlvError(format!("Truncated {}", what))
}

/// Read a tag (one or more bytes) starting at `*pos`.
pub fn read_tag(data: &[u8], pos: &mut usize) -> Result<u32, PassportError> {
    let first = *data.get(*pos).ok_or_else(|| truncated("tag"))?;
    *pos += 1;
    let mut tag = first as u32;
    if first & 0x1F == 0x1F {
        loop {
            let next = *data.get(*pos).ok_or_else(|| truncated("tag"))?;
            *pos += 1;
            tag = (tag << 8) | next as u32;
            if next & 0x80 == 0 {
                break;
            }
            if tag > 0x00FF_FFFF {
                return Err(PassportError::TlvError("Tag longer than 4 bytes".to_string()));
            }
        }
    }
    Ok(tag)
}

pub fn read_length(data: &[u8], pos: &mut usize) -> Result<usize, PassportError> {
    let first = *data.get(*pos).ok_or_else(|| truncated("length"))?;
    *pos += 1;
    if first < 0x80 {
        return Ok(first as usize);
    }
    let count = (first & 0x7F) as usize;
    if count == 0 || count > 4 {
        return Err(PassportError::TlvError(format!("Unsupported length form {:02X}", first)));
    }
    let bytes = data.get(*pos..*pos + count).ok_or_else(|| truncated("length"))?;
    *pos += count;
    Ok(bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
}

/// Size of the full object announced by the first bytes of a file, used to
/// know how much to READ BINARY.
pub fn object_size(header: &[u8]) -> Result<usize, PassportError> {
    let mut pos = 0;
    read_tag(header, &mut pos)?;
    let length = read_length(header, &mut pos)?;
    Ok(pos + length)
}

impl Tlv {
    pub fn new(tag: u32, value: Vec<u8>) -> Self {
        Tlv { tag, value }
    }

    /// Parse one object, returning it and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Tlv, usize), PassportError> {
        let mut pos = 0;
        let tag = read_tag(data, &mut pos)?;
        let length = read_length(data, &mut pos)?;
        let value = data
            .get(pos..pos + length)
            .ok_or_else(|| PassportError::TlvError(format!("Value of tag {:X} exceeds buffer", tag)))?;
        Ok((Tlv::new(tag, value.to_vec()), pos + length))
    }

    /// Parse consecutive objects until the buffer ends. Trailing zero
    /// padding is ignored.
    pub fn parse_all(data: &[u8]) -> Result<Vec<Tlv>, PassportError> {
        let mut items = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            if data[offset..].iter().all(|b| *b == 0x00 || *b == 0xFF) {
                break;
            }
            let (tlv, used) = Tlv::parse(&data[offset..])?;
            items.push(tlv);
            offset += used;
        }
        Ok(items)
    }

    pub fn children(&self) -> Result<Vec<Tlv>, PassportError> {
        Tlv::parse_all(&self.value)
    }

    /// First direct child with the given tag.
    pub fn find(&self, tag: u32) -> Option<Tlv> {
        self.children().ok()?.into_iter().find(|t| t.tag == tag)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.tag, &self.value)
    }
}

pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        vec![length as u8]
    } else if length <= 0xFF {
        vec![0x81, length as u8]
    } else if length <= 0xFFFF {
        vec![0x82, (length >> 8) as u8, length as u8]
    } else {
        vec![0x83, (length >> 16) as u8, (length >> 8) as u8, length as u8]
    }
}

pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 6);
    let tag_bytes = tag.to_be_bytes();
    let skip = tag_bytes.iter().take_while(|b| **b == 0).count().min(3);
    out.extend_from_slice(&tag_bytes[skip..]);
    out.extend(encode_length(value.len()));
    out.extend_from_slice(value);
    out
}

/// Content octets of an OBJECT IDENTIFIER, from dotted notation.
pub fn encode_oid(dotted: &str) -> Result<Vec<u8>, PassportError> {
    let arcs: Vec<u64> = dotted
        .split('.')
        .map(|a| a.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| PassportError::TlvError(format!("Bad OID {}", dotted)))?;
    if arcs.len() < 2 || arcs[0] > 2 {
        return Err(PassportError::TlvError(format!("Bad OID {}", dotted)));
    }
    let mut out = Vec::new();
    let mut push_arc = |mut arc: u64| {
        let mut chunk = vec![(arc & 0x7F) as u8];
        arc >>= 7;
        while arc > 0 {
            chunk.push(0x80 | (arc & 0x7F) as u8);
            arc >>= 7;
        }
        chunk.reverse();
        out.extend(chunk);
    };
    push_arc(arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        push_arc(*arc);
    }
    Ok(out)
}

pub fn decode_oid(content: &[u8]) -> String {
    let mut arcs: Vec<u64> = Vec::new();
    let mut value: u64 = 0;
    for byte in content {
        value = (value << 7) | (byte & 0x7F) as u64;
        if byte & 0x80 == 0 {
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
    }
    arcs.iter().map(|a| a.to_string()).collect::<Vec<String>>().join(".")
}

/// Unsigned value of a small DER INTEGER.
pub fn decode_integer(content: &[u8]) -> u64 {
    content.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}
