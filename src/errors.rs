use std::fmt::Display;

use thiserror::Error;

use crate::protocol::{FrameError, Rejection};

/// Error type for the ripplews library.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error("Invalid Frame: {0}")]
	Frame(#[from] FrameError),
	#[error("Handshake Rejected: {0}")]
	Handshake(#[from] Rejection),
	#[error(transparent)]
	ServerError(#[from] ServerErrors),
}

#[derive(Debug, Error)]
pub enum ServerErrors {
	#[error("Handshake not completed within {0} ms")]
	HandshakeTimeout(u64),
	#[error("Connection closed before the handshake completed")]
	ClosedDuringHandshake,
}

/// The four families every engine failure falls into.
///
/// Only [ErrorKind::IncompleteData] is recoverable: the caller buffers more bytes and invokes the
/// same operation again. Every other kind is terminal for the current handshake or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// The bytes do not follow the grammar at all.
	MalformedInput,
	/// Parseable, but not compliant with RFC 6455.
	ProtocolViolation,
	/// A caller supplied hook refused the request.
	ApplicationRejected,
	/// Not enough bytes are buffered yet.
	IncompleteData,
}

impl Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorKind::MalformedInput => write!(f, "malformed input"),
			ErrorKind::ProtocolViolation => write!(f, "protocol violation"),
			ErrorKind::ApplicationRejected => write!(f, "rejected by application"),
			ErrorKind::IncompleteData => write!(f, "incomplete data"),
		}
	}
}

impl Error {
	/// Classifies the error, if it originated in the protocol engine.
	pub fn kind(&self) -> Option<ErrorKind> {
		match self {
			Error::Frame(e) => Some(e.kind()),
			Error::Handshake(rejection) => Some(rejection.kind()),
			_ => None,
		}
	}
}
