use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::{
	apply_mask,
	constants::{DEFAULT_MAX_PAYLOAD, MAX_CONTROL_PAYLOAD},
	FrameError, Header, Opcode,
};
use crate::errors::Error;

/// A header together with its payload.
///
/// For inbound frames the payload is already unmasked and the header no longer carries the mask.
/// Every constructor builds a final, unmasked frame whose header length equals the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	header: Header,
	payload: Bytes,
}

impl Frame {
	fn unmasked(opcode: Opcode, payload: Bytes) -> Self {
		Self {
			header: Header::new(true, 0, opcode, payload.len() as u64),
			payload,
		}
	}

	pub fn text(payload: impl Into<Bytes>) -> Self { Self::unmasked(Opcode::Text, payload.into()) }

	pub fn binary(payload: impl Into<Bytes>) -> Self { Self::unmasked(Opcode::Binary, payload.into()) }

	pub fn ping(payload: impl Into<Bytes>) -> Self { Self::unmasked(Opcode::Ping, payload.into()) }

	pub fn pong(payload: impl Into<Bytes>) -> Self { Self::unmasked(Opcode::Pong, payload.into()) }

	pub fn close(payload: impl Into<Bytes>) -> Self { Self::unmasked(Opcode::Close, payload.into()) }

	/// Builds a Close frame whose payload is the big-endian status `code` followed by `reason`.
	///
	/// The reason is cut at a character boundary so the payload never exceeds 125 bytes.
	pub fn close_with_status(code: u16, reason: &str) -> Self {
		let limit = MAX_CONTROL_PAYLOAD as usize - 2;
		let mut end = reason.len().min(limit);
		while !reason.is_char_boundary(end) {
			end -= 1;
		}

		let mut payload = BytesMut::with_capacity(2 + end);
		payload.put_u16(code);
		payload.put_slice(&reason.as_bytes()[..end]);
		Self::close(payload.freeze())
	}

	/// Maps an application reply to the frame that carries it.
	///
	/// Each opcode maps to its own constructor; a Ping reply is sent as a Ping and a Pong reply as
	/// a Pong. Continuation has no standalone constructor and yields `None`.
	pub fn reply(opcode: Opcode, payload: impl Into<Bytes>) -> Option<Self> {
		match opcode {
			Opcode::Text => Some(Self::text(payload)),
			Opcode::Binary => Some(Self::binary(payload)),
			Opcode::Ping => Some(Self::ping(payload)),
			Opcode::Pong => Some(Self::pong(payload)),
			Opcode::Close => Some(Self::close(payload)),
			Opcode::Continuation => None,
		}
	}

	/// Reads the status code of a Close frame, if it carries one.
	pub fn close_code(&self) -> Option<u16> {
		match (self.header.opcode(), self.payload.as_ref()) {
			(Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
			_ => None,
		}
	}

	/// Writes the header followed by the payload. The payload is masked on the way out only when
	/// the header carries a mask.
	pub fn encode(&self, dst: &mut BytesMut) {
		dst.reserve(self.header.encoded_len() + self.payload.len());
		self.header.encode(dst);

		let start = dst.len();
		dst.put_slice(&self.payload);
		if let Some(mask) = self.header.mask() {
			apply_mask(&mut dst[start..], mask, 0);
		}
	}

	pub fn to_bytes(&self) -> Bytes {
		let mut dst = BytesMut::new();
		self.encode(&mut dst);
		dst.freeze()
	}

	pub fn into_payload(self) -> Bytes { self.payload }

	/* Getters */
	pub fn header(&self) -> &Header { &self.header }

	pub fn opcode(&self) -> Opcode { self.header.opcode() }

	pub fn payload(&self) -> &Bytes { &self.payload }
}

/// Server side frame codec for use with [tokio_util::codec::Framed].
///
/// Decoding unmasks client payloads. Encoding always strips the mask, so frames written through
/// this codec are never masked.
#[derive(Debug, Clone)]
pub struct FrameCodec {
	max_payload: u64,
	allow_unmasked: bool,
	allow_reserved_bits: bool,
}

impl FrameCodec {
	pub fn new() -> Self {
		Self {
			max_payload: DEFAULT_MAX_PAYLOAD,
			allow_unmasked: false,
			allow_reserved_bits: false,
		}
	}

	/// Sets the largest payload accepted from a client.
	pub fn max_payload(mut self, max_payload: u64) -> Self {
		self.max_payload = max_payload;
		self
	}

	/// Accepts client frames that arrive without a mask.
	pub fn allow_unmasked(mut self, allow: bool) -> Self {
		self.allow_unmasked = allow;
		self
	}

	/// Accepts non-zero RSV bits, for connections that negotiated an extension using them.
	pub fn allow_reserved_bits(mut self, allow: bool) -> Self {
		self.allow_reserved_bits = allow;
		self
	}

	fn check(&self, header: &Header) -> Result<(), FrameError> {
		if header.rsv() != 0 && !self.allow_reserved_bits {
			return Err(FrameError::ReservedBits(header.rsv()));
		}
		if !header.is_masked() && !self.allow_unmasked {
			return Err(FrameError::UnmaskedClientFrame);
		}
		if header.length() > self.max_payload {
			return Err(FrameError::PayloadTooLarge {
				length: header.length(),
				max: self.max_payload,
			});
		}
		Ok(())
	}
}

impl Default for FrameCodec {
	fn default() -> Self { Self::new() }
}

impl Decoder for FrameCodec {
	type Error = Error;
	type Item = Frame;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		let (header, header_len) = match Header::decode(&src[..]) {
			Ok(decoded) => decoded,
			Err(FrameError::Incomplete { needed }) => {
				src.reserve(needed);
				return Ok(None);
			},
			Err(e) => return Err(e.into()),
		};
		self.check(&header)?;

		let payload_len = usize::try_from(header.length()).map_err(|_| FrameError::PayloadTooLarge {
			length: header.length(),
			max: self.max_payload,
		})?;

		let available = src.len() - header_len;
		if available < payload_len {
			src.reserve(payload_len - available);
			return Ok(None);
		}

		src.advance(header_len);
		let mut payload = src.split_to(payload_len);
		if let Some(mask) = header.mask() {
			apply_mask(&mut payload, mask, 0);
		}

		trace!("Decoded {} frame with {} byte payload", header.opcode(), payload_len);
		Ok(Some(Frame {
			header: header.unmasked(),
			payload: payload.freeze(),
		}))
	}
}

impl Encoder<Frame> for FrameCodec {
	type Error = Error;

	fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
		item.header.validate()?;

		let frame = Frame {
			header: item.header.unmasked(),
			payload: item.payload,
		};
		frame.encode(dst);
		Ok(())
	}
}
