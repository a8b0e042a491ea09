pub(crate) mod constants;
mod frame;
mod framing;
mod handshake;
mod masking;
mod rejection;
mod tokens;

pub use self::{
	frame::{Frame, FrameCodec},
	framing::{FrameError, Header, Opcode},
	handshake::*,
	masking::apply_mask,
	rejection::{status_text, Rejection, ResponseHeaders, DEFAULT_REJECTION_STATUS},
	tokens::*,
};
