//! # ABI Word Encoding
//!
//! The ledger's `abi.encode` layout: each static value occupies one 32-byte
//! big-endian word (integers left-padded, addresses left-padded to 32 bytes,
//! `bytes32` as-is). Dynamic values (`string`, `bytes`) put an offset in the
//! head and a length-prefixed, right-padded body in the tail.
//!
//! Attestation payloads use only static words, so their encoding is the plain
//! concatenation of words. Call data and event data use the full head/tail
//! layout.

use crate::digest::{keccak256, Hash32};
use crate::error::AbiError;
use crate::identity::Address;

/// Width of one ABI word.
pub const WORD: usize = 32;

/// One ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `uintN` up to 128 bits of magnitude.
    Uint(u128),
    /// `address`.
    Address(Address),
    /// `bytes32`.
    Bytes32(Hash32),
    /// `bool`.
    Bool(bool),
    /// Dynamic UTF-8 `string`.
    String(String),
    /// Dynamic `bytes`.
    Bytes(Vec<u8>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_) | Token::Bytes(_))
    }
}

/// The first four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&h.as_bytes()[..4]);
    out
}

/// A `uint256` word for an unsigned integer.
pub fn uint_word(value: u128) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[16..].copy_from_slice(&value.to_be_bytes());
    w
}

/// An `address` word.
pub fn address_word(address: &Address) -> [u8; WORD] {
    let mut w = [0u8; WORD];
    w[12..].copy_from_slice(address.as_bytes());
    w
}

/// Encode a tuple of tokens with the standard head/tail layout.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            let body: &[u8] = match token {
                Token::String(s) => s.as_bytes(),
                Token::Bytes(b) => b,
                _ => &[],
            };
            tail.extend_from_slice(&uint_word(body.len() as u128));
            tail.extend_from_slice(body);
            let pad = (WORD - body.len() % WORD) % WORD;
            tail.extend(std::iter::repeat(0u8).take(pad));
        } else {
            head.extend_from_slice(&static_word(token));
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode(tokens));
    out
}

fn static_word(token: &Token) -> [u8; WORD] {
    match token {
        Token::Uint(v) => uint_word(*v),
        Token::Address(a) => address_word(a),
        Token::Bytes32(h) => *h.as_bytes(),
        Token::Bool(b) => uint_word(u128::from(*b)),
        Token::String(_) | Token::Bytes(_) => [0u8; WORD],
    }
}

/// Positional reader over ABI-encoded data.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Wrap encoded bytes (without a selector).
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// The raw word at head position `index`.
    pub fn word(&self, index: usize) -> Result<&'a [u8], AbiError> {
        self.word_at(index * WORD)
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], AbiError> {
        let end = self.end(offset, WORD)?;
        Ok(&self.data[offset..end])
    }

    /// End of the `len` bytes at `start`, checked against the buffer.
    fn end(&self, start: usize, len: usize) -> Result<usize, AbiError> {
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(end),
            needed => Err(AbiError::TooShort {
                needed: needed.unwrap_or(usize::MAX),
                available: self.data.len(),
            }),
        }
    }

    /// A word read as a position or size inside the buffer.
    fn usize_at(&self, offset: usize, target: &'static str) -> Result<usize, AbiError> {
        let v = self.uint_at(offset, target)?;
        usize::try_from(v).map_err(|_| AbiError::Overflow { offset, target })
    }

    /// An unsigned integer that must fit in 128 bits.
    pub fn uint(&self, index: usize) -> Result<u128, AbiError> {
        self.uint_at(index * WORD, "u128")
    }

    fn uint_at(&self, offset: usize, target: &'static str) -> Result<u128, AbiError> {
        let w = self.word_at(offset)?;
        if w[..16].iter().any(|b| *b != 0) {
            return Err(AbiError::Overflow { offset, target });
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&w[16..]);
        Ok(u128::from_be_bytes(buf))
    }

    /// An unsigned integer that must fit in 64 bits.
    pub fn u64(&self, index: usize) -> Result<u64, AbiError> {
        let v = self.uint_at(index * WORD, "u64")?;
        u64::try_from(v).map_err(|_| AbiError::Overflow {
            offset: index * WORD,
            target: "u64",
        })
    }

    /// A `uint8`.
    pub fn u8(&self, index: usize) -> Result<u8, AbiError> {
        let v = self.uint_at(index * WORD, "u8")?;
        u8::try_from(v).map_err(|_| AbiError::Overflow {
            offset: index * WORD,
            target: "u8",
        })
    }

    /// A left-padded `address`.
    pub fn address(&self, index: usize) -> Result<Address, AbiError> {
        let offset = index * WORD;
        let w = self.word_at(offset)?;
        if w[..12].iter().any(|b| *b != 0) {
            return Err(AbiError::BadAddress { offset });
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&w[12..]);
        Ok(Address::from_bytes(out))
    }

    /// A `bytes32`.
    pub fn bytes32(&self, index: usize) -> Result<Hash32, AbiError> {
        let w = self.word(index)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(w);
        Ok(Hash32::from_bytes(out))
    }

    /// A dynamic `bytes` value whose offset sits at head position `index`.
    pub fn bytes(&self, index: usize) -> Result<Vec<u8>, AbiError> {
        let start = self.usize_at(index * WORD, "offset")?;
        let len = self.usize_at(start, "length")?;
        let body_start = self.end(start, WORD)?;
        let end = self.end(body_start, len)?;
        Ok(self.data[body_start..end].to_vec())
    }

    /// A dynamic `string` value whose offset sits at head position `index`.
    pub fn string(&self, index: usize) -> Result<String, AbiError> {
        let raw = self.bytes(index)?;
        String::from_utf8(raw).map_err(|_| AbiError::BadString {
            offset: index * WORD,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_selector_matches_erc20() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("approve(address,uint256)"), [0x09, 0x5e, 0xa7, 0xb3]);
    }

    #[test]
    fn static_tokens_are_plain_words() {
        let a = Address::from_bytes([0xee; 20]);
        let enc = encode(&[Token::Uint(1), Token::Address(a), Token::Bool(true)]);
        assert_eq!(enc.len(), 96);
        assert_eq!(enc[31], 1);
        assert_eq!(&enc[44..64], &[0xee; 20]);
        assert_eq!(enc[95], 1);
    }

    #[test]
    fn dynamic_string_layout() {
        let enc = encode(&[Token::Uint(5), Token::String("hello".into())]);
        // head: uint, offset(64); tail: len(5), "hello" padded
        assert_eq!(enc.len(), 32 * 4);
        let d = Decoder::new(&enc);
        assert_eq!(d.uint(0).unwrap(), 5);
        assert_eq!(d.uint(1).unwrap(), 64);
        assert_eq!(d.string(1).unwrap(), "hello");
    }

    #[test]
    fn empty_string_has_no_body_words() {
        let enc = encode(&[Token::String(String::new())]);
        assert_eq!(enc.len(), 64);
        assert_eq!(Decoder::new(&enc).string(0).unwrap(), "");
    }

    #[test]
    fn decoder_reads_address_and_bytes32() {
        let a = Address::from_bytes([7; 20]);
        let h = keccak256(b"x");
        let enc = encode(&[Token::Address(a), Token::Bytes32(h), Token::Bytes(vec![1, 2, 3])]);
        let d = Decoder::new(&enc);
        assert_eq!(d.address(0).unwrap(), a);
        assert_eq!(d.bytes32(1).unwrap(), h);
        assert_eq!(d.bytes(2).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn decoder_rejects_short_data() {
        let d = Decoder::new(&[0u8; 16]);
        assert!(matches!(d.uint(0), Err(AbiError::TooShort { .. })));
    }

    #[test]
    fn decoder_rejects_overflow() {
        let mut w = [0u8; 32];
        w[0] = 1;
        let d = Decoder::new(&w);
        assert!(matches!(d.uint(0), Err(AbiError::Overflow { .. })));
        assert!(matches!(d.address(0), Err(AbiError::BadAddress { .. })));
    }

    #[test]
    fn hostile_offset_is_an_error() {
        let mut enc = encode(&[Token::String("hello".into())]);
        enc[16..32].copy_from_slice(&[0xff; 16]);
        let d = Decoder::new(&enc);
        assert!(matches!(d.string(0), Err(AbiError::Overflow { .. } | AbiError::TooShort { .. })));

        let mut enc = encode(&[Token::String("hello".into())]);
        enc[24..32].copy_from_slice(&(u64::MAX - 8).to_be_bytes());
        assert!(matches!(Decoder::new(&enc).bytes(0), Err(AbiError::TooShort { .. })));
    }

    #[test]
    fn hostile_length_is_an_error() {
        let mut enc = encode(&[Token::Bytes(vec![1, 2, 3])]);
        enc[48..64].copy_from_slice(&[0xff; 16]);
        assert!(matches!(
            Decoder::new(&enc).bytes(0),
            Err(AbiError::Overflow { .. } | AbiError::TooShort { .. })
        ));

        let mut enc = encode(&[Token::Bytes(vec![1, 2, 3])]);
        enc[56..64].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(matches!(Decoder::new(&enc).bytes(0), Err(AbiError::TooShort { .. })));
    }

    #[test]
    fn encode_call_prefixes_selector() {
        let data = encode_call("holdPayment(bytes32)", &[Token::Bytes32(Hash32::ZERO)]);
        assert_eq!(&data[..4], &selector("holdPayment(bytes32)"));
        assert_eq!(data.len(), 36);
    }
}
