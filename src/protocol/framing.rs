use std::fmt::Display;

use bytes::BufMut;
use thiserror::Error;

use super::constants::{
	BINARY_OPCODE, CLOSE_OPCODE, CONTINUATION_OPCODE, EXTENDED_LENGTH_16, EXTENDED_LENGTH_64, FIN_BIT, LENGTH_BITS,
	MASK_BIT, MASK_LENGTH, MAX_BASE_LENGTH, MAX_CONTROL_PAYLOAD, MAX_HEADER_LENGTH, MIN_HEADER_LENGTH, OPCODE_BITS,
	PING_OPCODE, PONG_OPCODE, RSV_BITS, TEXT_OPCODE,
};
use crate::errors::ErrorKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
	#[error("frame header incomplete, {needed} more byte(s) required")]
	Incomplete { needed: usize },
	#[error("frame contains invalid opcode: {0:#x}")]
	InvalidOpcode(u8),
	#[error("control frames must not be fragmented")]
	FragmentedControl,
	#[error("control frame payload too large: {0} bytes (max 125)")]
	ControlTooLarge(u64),
	#[error("reserved bits set without a negotiated extension: {0:#05b}")]
	ReservedBits(u8),
	#[error("payload length out of bounds: {length} (max {max})")]
	PayloadTooLarge { length: u64, max: u64 },
	#[error("client frames must be masked")]
	UnmaskedClientFrame,
	#[error("most significant bit of a 64 bit payload length must be 0")]
	LengthOverflow,
}

impl FrameError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			FrameError::Incomplete { .. } => ErrorKind::IncompleteData,
			FrameError::InvalidOpcode(_) => ErrorKind::MalformedInput,
			_ => ErrorKind::ProtocolViolation,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
/// Frame Opcodes occupy the low nibble of the first header byte and describe how the payload is
/// to be interpreted.
///
/// Control frames (**Close**, **Ping**, **Pong**) can not be fragmented and carry at most 125
/// payload bytes. Data frames can be split across any number of **Continuation** frames.
pub enum Opcode {
	Continuation = CONTINUATION_OPCODE,
	Text = TEXT_OPCODE,
	Binary = BINARY_OPCODE,
	Close = CLOSE_OPCODE,
	Ping = PING_OPCODE,
	Pong = PONG_OPCODE,
}

impl Opcode {
	/// Indicates whether the opcode belongs to a control frame.
	pub fn is_control(&self) -> bool { matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong) }

	/// Indicates whether the opcode belongs to a data frame.
	pub fn is_data(&self) -> bool { !self.is_control() }
}

impl TryFrom<u8> for Opcode {
	type Error = FrameError;

	fn try_from(opcode: u8) -> Result<Self, <Opcode as TryFrom<u8>>::Error> {
		match opcode {
			CONTINUATION_OPCODE => Ok(Opcode::Continuation),
			TEXT_OPCODE => Ok(Opcode::Text),
			BINARY_OPCODE => Ok(Opcode::Binary),
			CLOSE_OPCODE => Ok(Opcode::Close),
			PING_OPCODE => Ok(Opcode::Ping),
			PONG_OPCODE => Ok(Opcode::Pong),
			_ => Err(FrameError::InvalidOpcode(opcode)),
		}
	}
}

impl Display for Opcode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Opcode::Continuation => "Continuation",
			Opcode::Text => "Text",
			Opcode::Binary => "Binary",
			Opcode::Close => "Close",
			Opcode::Ping => "Ping",
			Opcode::Pong => "Pong",
		};
		f.write_str(name)
	}
}

/// A decoded WebSocket frame header (RFC 6455 section 5.2).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
/// |                 Masking-key, if MASK set to 1                 |
/// +---------------------------------------------------------------+
/// ```
///
/// The mask is present exactly when the frame is masked, so an unmasked header can never carry
/// mask bytes onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	fin: bool,
	rsv: u8,
	opcode: Opcode,
	mask: Option<[u8; MASK_LENGTH]>,
	length: u64,
}

impl Header {
	/// Creates an unmasked header. Only the low 3 bits of `rsv` are kept.
	pub fn new(fin: bool, rsv: u8, opcode: Opcode, length: u64) -> Self {
		Self {
			fin,
			rsv: rsv & 0b111,
			opcode,
			mask: None,
			length,
		}
	}

	/// Returns a copy of the header carrying the given mask. Only client originated frames are
	/// masked.
	pub fn with_mask(mut self, mask: [u8; MASK_LENGTH]) -> Self {
		self.mask = Some(mask);
		self
	}

	/// Returns a copy of the header with the mask removed.
	pub fn unmasked(mut self) -> Self {
		self.mask = None;
		self
	}

	/// Decodes a header from the start of `src`, returning it along with the number of bytes it
	/// occupied.
	///
	/// When `src` holds fewer bytes than the header requires, [FrameError::Incomplete] reports how
	/// many more are needed. Nothing is retained between calls, so the caller simply invokes this
	/// again with a longer buffer.
	pub fn decode(src: &[u8]) -> Result<(Self, usize), FrameError> {
		if src.len() < MIN_HEADER_LENGTH {
			return Err(FrameError::Incomplete {
				needed: MIN_HEADER_LENGTH - src.len(),
			});
		}

		let fin = src[0] & FIN_BIT != 0;
		let rsv = (src[0] & RSV_BITS) >> 4;
		let opcode = Opcode::try_from(src[0] & OPCODE_BITS)?;
		let masked = src[1] & MASK_BIT != 0;
		let base_length = src[1] & LENGTH_BITS;

		let extended = match base_length {
			EXTENDED_LENGTH_16 => 2,
			EXTENDED_LENGTH_64 => 8,
			_ => 0,
		};
		let required = MIN_HEADER_LENGTH + extended + if masked { MASK_LENGTH } else { 0 };
		if src.len() < required {
			return Err(FrameError::Incomplete {
				needed: required - src.len(),
			});
		}

		let mut cursor = MIN_HEADER_LENGTH;
		let length = match extended {
			2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
			8 => {
				let mut be = [0u8; 8];
				be.copy_from_slice(&src[2..10]);
				if be[0] & 0x80 != 0 {
					return Err(FrameError::LengthOverflow);
				}
				u64::from_be_bytes(be)
			},
			_ => u64::from(base_length),
		};
		cursor += extended;

		let mask = if masked {
			let mut key = [0u8; MASK_LENGTH];
			key.copy_from_slice(&src[cursor..cursor + MASK_LENGTH]);
			cursor += MASK_LENGTH;
			Some(key)
		} else {
			None
		};

		let header = Self {
			fin,
			rsv,
			opcode,
			mask,
			length,
		};
		header.validate()?;

		Ok((header, cursor))
	}

	/// Checks the control frame invariant: Close, Ping and Pong must be final and carry at most
	/// 125 payload bytes.
	pub fn validate(&self) -> Result<(), FrameError> {
		if self.opcode.is_control() {
			if !self.fin {
				return Err(FrameError::FragmentedControl);
			}
			if self.length > MAX_CONTROL_PAYLOAD {
				return Err(FrameError::ControlTooLarge(self.length));
			}
		}
		Ok(())
	}

	/// Number of bytes [Header::encode] will write for this header.
	pub fn encoded_len(&self) -> usize {
		let extended = if self.length <= MAX_BASE_LENGTH {
			0
		} else if self.length <= u64::from(u16::MAX) {
			2
		} else {
			8
		};
		MIN_HEADER_LENGTH + extended + if self.mask.is_some() { MASK_LENGTH } else { 0 }
	}

	/// Writes the header into `dst`, choosing the shortest length form that represents the
	/// length exactly. Mask bytes are written only for masked headers.
	pub fn encode<B: BufMut>(&self, dst: &mut B) {
		let mut first = (self.rsv << 4) | self.opcode as u8;
		if self.fin {
			first |= FIN_BIT;
		}
		dst.put_u8(first);

		let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
		if self.length <= MAX_BASE_LENGTH {
			dst.put_u8(mask_bit | self.length as u8);
		} else if let Ok(length) = u16::try_from(self.length) {
			dst.put_u8(mask_bit | EXTENDED_LENGTH_16);
			dst.put_u16(length);
		} else {
			dst.put_u8(mask_bit | EXTENDED_LENGTH_64);
			dst.put_u64(self.length);
		}

		if let Some(mask) = self.mask {
			dst.put_slice(&mask);
		}
	}

	/// Convenience wrapper around [Header::encode] returning a fresh buffer.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buffer = Vec::with_capacity(MAX_HEADER_LENGTH);
		self.encode(&mut buffer);
		buffer
	}

	/* Getters */
	pub fn fin(&self) -> bool { self.fin }

	pub fn rsv(&self) -> u8 { self.rsv }

	pub fn opcode(&self) -> Opcode { self.opcode }

	pub fn is_masked(&self) -> bool { self.mask.is_some() }

	pub fn mask(&self) -> Option<[u8; MASK_LENGTH]> { self.mask }

	pub fn length(&self) -> u64 { self.length }
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use rand::Rng;

	use super::*;

	#[test]
	fn test_decode_unmasked_text() {
		let (header, consumed) = Header::decode(&[0x81, 0x05, b'H', b'e']).unwrap();
		assert_eq!(consumed, 2);
		assert!(header.fin());
		assert_eq!(header.rsv(), 0);
		assert_eq!(header.opcode(), Opcode::Text);
		assert!(!header.is_masked());
		assert_eq!(header.length(), 5);
	}

	#[test]
	fn test_decode_masked() {
		let bytes = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f];
		let (header, consumed) = Header::decode(&bytes).unwrap();
		assert_eq!(consumed, 6);
		assert_eq!(header.mask(), Some([0x37, 0xfa, 0x21, 0x3d]));
		assert_eq!(header.length(), 5);
	}

	#[test]
	fn test_length_forms() {
		let cases: [(u64, usize, u8); 6] = [
			(0, 2, 0),
			(125, 2, 125),
			(126, 4, 126),
			(65535, 4, 126),
			(65536, 10, 127),
			(u64::MAX >> 1, 10, 127),
		];

		for (length, size, marker) in cases {
			let header = Header::new(true, 0, Opcode::Binary, length);
			let bytes = header.to_bytes();
			assert_eq!(bytes.len(), size, "length {length}");
			assert_eq!(bytes[1] & LENGTH_BITS, marker);
			assert_eq!(header.encoded_len(), size);

			let (decoded, consumed) = Header::decode(&bytes).unwrap();
			assert_eq!(consumed, size);
			assert_eq!(decoded.length(), length);
		}
	}

	#[test]
	fn test_round_trip_random_headers() {
		let mut rng = rand::thread_rng();
		let opcodes = [
			Opcode::Continuation,
			Opcode::Text,
			Opcode::Binary,
			Opcode::Close,
			Opcode::Ping,
			Opcode::Pong,
		];

		for _ in 0..256 {
			let opcode = opcodes[rng.gen_range(0..opcodes.len())];
			let (fin, length) = if opcode.is_control() {
				(true, rng.gen_range(0..=125))
			} else {
				(rng.gen(), rng.gen_range(0..200_000))
			};
			let mut header = Header::new(fin, rng.gen_range(0..8), opcode, length);
			if rng.gen() {
				header = header.with_mask(rng.gen());
			}

			let bytes = header.to_bytes();
			assert_eq!(Header::decode(&bytes).unwrap(), (header, bytes.len()));
		}
	}

	#[test]
	fn test_incomplete_is_distinct() {
		assert_eq!(Header::decode(&[]), Err(FrameError::Incomplete { needed: 2 }));
		assert_eq!(Header::decode(&[0x82]), Err(FrameError::Incomplete { needed: 1 }));
		// 64 bit length plus mask: 14 bytes total
		assert_eq!(
			Header::decode(&[0x82, 0xFF, 0, 0, 0]),
			Err(FrameError::Incomplete { needed: 9 })
		);
		assert_eq!(
			Header::decode(&[0x82, 0xFF, 0, 0, 0]).unwrap_err().kind(),
			ErrorKind::IncompleteData
		);
	}

	#[test]
	fn test_64_bit_length_with_high_bit_is_rejected() {
		let mut src = vec![0x82, 0x7F];
		src.extend_from_slice(&[0xFF; 8]);
		let err = Header::decode(&src).unwrap_err();
		assert_eq!(err, FrameError::LengthOverflow);
		assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

		src[2] = 0x7F;
		let (header, len) = Header::decode(&src).unwrap();
		assert_eq!(header.length(), u64::MAX >> 1);
		assert_eq!(len, 10);
	}

	#[test]
	fn test_invalid_opcode() {
		let err = Header::decode(&[0x83, 0x00]).unwrap_err();
		assert_eq!(err, FrameError::InvalidOpcode(0x3));
		assert_eq!(err.kind(), ErrorKind::MalformedInput);
	}

	#[test]
	fn test_oversized_close_is_violation() {
		let header = Header::new(true, 0, Opcode::Close, 200);
		assert_eq!(header.validate(), Err(FrameError::ControlTooLarge(200)));

		let err = Header::decode(&header.to_bytes()).unwrap_err();
		assert_eq!(err, FrameError::ControlTooLarge(200));
		assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
	}

	#[test]
	fn test_fragmented_ping_is_violation() {
		assert_eq!(Header::decode(&[0x09, 0x00]), Err(FrameError::FragmentedControl));
	}

	#[test]
	fn test_unmasked_header_writes_no_mask() {
		let header = Header::new(true, 0, Opcode::Text, 3).with_mask([1, 2, 3, 4]).unmasked();
		assert_eq!(header.to_bytes(), vec![0x81, 0x03]);
	}
}
