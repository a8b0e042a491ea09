use std::{borrow::Cow, fmt::Display};

use bytes::{BufMut, BytesMut};

use super::constants::{
	HEADER_CONNECTION, HEADER_HOST, HEADER_SEC_KEY, HEADER_SEC_VERSION, HEADER_UPGRADE, SUPPORTED_VERSION,
};
use crate::errors::ErrorKind;

/// Status used when a hook rejects a request without choosing one.
pub const DEFAULT_REJECTION_STATUS: u16 = 500;

/// An ordered list of extra response headers.
///
/// Headers are written verbatim in insertion order, so duplicates are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
	entries: Vec<(String, String)>,
}

impl ResponseHeaders {
	pub fn new() -> Self { Self::default() }

	/// Appends a header line.
	pub fn insert(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.push(name, value);
		self
	}

	pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.entries.push((name.into(), value.into()));
	}

	/// Appends every header of `other` after the existing ones.
	pub fn extend(&mut self, other: &ResponseHeaders) { self.entries.extend(other.entries.iter().cloned()); }

	pub fn is_empty(&self) -> bool { self.entries.is_empty() }

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(name, value)| (name.as_str(), value.as_str()))
	}

	/// Writes every header as a `Name: value\r\n` line.
	pub fn write_to(&self, dst: &mut BytesMut) {
		for (name, value) in self.iter() {
			write_header(dst, name, value);
		}
	}
}

pub(crate) fn write_header(dst: &mut BytesMut, name: &str, value: &str) {
	dst.reserve(name.len() + value.len() + 4);
	dst.put_slice(name.as_bytes());
	dst.put_slice(b": ");
	dst.put_slice(value.as_bytes());
	dst.put_slice(b"\r\n");
}

/// A refused handshake.
///
/// A rejection is both the error value propagated out of negotiation and the description of the
/// HTTP response sent back to the client: `status` becomes the status line, `reason` becomes the
/// body and `headers` are written alongside. It is immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
	kind: ErrorKind,
	status: u16,
	reason: Cow<'static, str>,
	headers: ResponseHeaders,
}

impl Rejection {
	fn protocol(status: u16, reason: impl Into<Cow<'static, str>>) -> Self {
		Self {
			kind: ErrorKind::ProtocolViolation,
			status,
			reason: reason.into(),
			headers: ResponseHeaders::default(),
		}
	}

	fn bad_header(name: &str) -> Self { Self::protocol(400, format!("handshake error: bad {name:?} header")) }

	/// Request line or header line does not parse.
	pub fn malformed_request() -> Self {
		Self {
			kind: ErrorKind::MalformedInput,
			status: 400,
			reason: Cow::Borrowed("malformed HTTP request"),
			headers: ResponseHeaders::default(),
		}
	}

	/// HTTP version other than 1.x with x >= 1.
	pub fn bad_protocol_version() -> Self { Self::protocol(505, "handshake error: bad HTTP protocol version") }

	/// Method other than GET.
	pub fn bad_method() -> Self { Self::protocol(405, "handshake error: bad HTTP request method") }

	pub fn bad_host() -> Self { Self::bad_header(HEADER_HOST) }

	pub fn bad_upgrade() -> Self { Self::bad_header(HEADER_UPGRADE) }

	pub fn bad_connection() -> Self { Self::bad_header(HEADER_CONNECTION) }

	/// `Sec-WebSocket-Version` missing.
	pub fn bad_sec_version() -> Self { Self::bad_header(HEADER_SEC_VERSION) }

	/// `Sec-WebSocket-Version` present with a version this server does not speak.
	pub fn upgrade_required() -> Self {
		let mut rejection = Self::bad_header(HEADER_SEC_VERSION);
		rejection.status = 426;
		rejection.headers.push(HEADER_SEC_VERSION, SUPPORTED_VERSION);
		rejection
	}

	pub fn bad_sec_key() -> Self { Self::bad_header(HEADER_SEC_KEY) }

	/// The request head is larger than the configured limit.
	pub fn request_too_large() -> Self { Self::protocol(431, "handshake error: request head too large") }

	/// A rejection raised by application code, answered with status 500 unless
	/// [Rejection::with_status] says otherwise.
	pub fn application(reason: impl Into<Cow<'static, str>>) -> Self {
		Self {
			kind: ErrorKind::ApplicationRejected,
			status: DEFAULT_REJECTION_STATUS,
			reason: reason.into(),
			headers: ResponseHeaders::default(),
		}
	}

	pub fn with_status(mut self, status: u16) -> Self {
		self.status = status;
		self
	}

	pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
		self.reason = reason.into();
		self
	}

	pub fn with_headers(mut self, headers: ResponseHeaders) -> Self {
		self.headers = headers;
		self
	}

	/// Renders the complete HTTP error response. `static_headers` are written before the
	/// rejection's own headers.
	pub fn render(&self, static_headers: &ResponseHeaders) -> BytesMut {
		let body = self.reason.as_bytes();
		let mut dst = BytesMut::with_capacity(128 + body.len());

		write_status_line(&mut dst, self.status);
		static_headers.write_to(&mut dst);
		self.headers.write_to(&mut dst);
		write_header(&mut dst, "Content-Type", "text/plain; charset=utf-8");
		write_header(&mut dst, "Content-Length", &body.len().to_string());
		dst.put_slice(b"\r\n");
		dst.put_slice(body);
		dst
	}

	/* Getters */
	pub fn kind(&self) -> ErrorKind { self.kind }

	pub fn status(&self) -> u16 { self.status }

	pub fn reason(&self) -> &str { &self.reason }

	pub fn headers(&self) -> &ResponseHeaders { &self.headers }
}

impl Display for Rejection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} {} ({})", self.status, self.reason, self.kind)
	}
}

impl std::error::Error for Rejection {}

pub(crate) fn write_status_line(dst: &mut BytesMut, status: u16) {
	dst.put_slice(format!("HTTP/1.1 {} {}\r\n", status, status_text(status)).as_bytes());
}

/// Reason phrase for the status codes a handshake can end with.
pub fn status_text(status: u16) -> &'static str {
	match status {
		101 => "Switching Protocols",
		400 => "Bad Request",
		401 => "Unauthorized",
		403 => "Forbidden",
		404 => "Not Found",
		405 => "Method Not Allowed",
		408 => "Request Timeout",
		409 => "Conflict",
		426 => "Upgrade Required",
		429 => "Too Many Requests",
		431 => "Request Header Fields Too Large",
		500 => "Internal Server Error",
		501 => "Not Implemented",
		503 => "Service Unavailable",
		505 => "HTTP Version Not Supported",
		_ => "Unknown Status",
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn test_render_error_response() {
		let rejection = Rejection::bad_host();
		let response = rejection.render(&ResponseHeaders::new().insert("Server", "ripplews"));

		assert_eq!(
			std::str::from_utf8(&response).unwrap(),
			"HTTP/1.1 400 Bad Request\r\n\
			 Server: ripplews\r\n\
			 Content-Type: text/plain; charset=utf-8\r\n\
			 Content-Length: 34\r\n\
			 \r\n\
			 handshake error: bad \"Host\" header"
		);
	}

	#[test]
	fn test_upgrade_required_carries_version() {
		let rejection = Rejection::upgrade_required();
		assert_eq!(rejection.status(), 426);
		assert_eq!(rejection.kind(), ErrorKind::ProtocolViolation);

		let response = rejection.render(&ResponseHeaders::default());
		let text = String::from_utf8_lossy(&response);
		assert!(text.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
		assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
	}

	#[test]
	fn test_application_rejection_defaults() {
		let rejection = Rejection::application("nope");
		assert_eq!(rejection.status(), 500);
		assert_eq!(rejection.kind(), ErrorKind::ApplicationRejected);

		let custom = rejection
			.with_status(403)
			.with_reason("forbidden origin")
			.with_headers(ResponseHeaders::new().insert("X-Reason", "origin"));
		let text = String::from_utf8_lossy(&custom.render(&ResponseHeaders::default())).into_owned();
		assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\nX-Reason: origin\r\n"));
		assert!(text.ends_with("\r\n\r\nforbidden origin"));
	}

	#[test]
	fn test_malformed_is_distinct_kind() {
		assert_eq!(Rejection::malformed_request().kind(), ErrorKind::MalformedInput);
		assert_eq!(Rejection::bad_method().status(), 405);
		assert_eq!(Rejection::bad_protocol_version().status(), 505);
	}
}
