//! Server side of the RFC 6455 opening handshake.
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! is answered with
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use std::{fmt::Debug, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_getters::{Dissolve, Getters};
use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use super::{
	constants::{
		CONNECTION_VALUE, HEADER_CONNECTION, HEADER_HOST, HEADER_SEC_ACCEPT, HEADER_SEC_EXTENSIONS, HEADER_SEC_KEY,
		HEADER_SEC_PROTOCOL, HEADER_SEC_VERSION, HEADER_UPGRADE, NONCE_SIZE, SUPPORTED_VERSION, UPGRADE_VALUE,
		WEBSOCKET_GUID,
	},
	rejection::{write_header, write_status_line},
	tokens::{join_options, negotiate_all, select_first_match},
	HeaderOption, Rejection, ResponseHeaders,
};

/// Default upper bound for a buffered request head.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8 * 1024;

/// Derives the `Sec-WebSocket-Accept` value from the key exactly as the client sent it.
pub fn compute_accept_key(key: &str) -> String {
	let mut hasher = Sha1::new();
	hasher.update(key.as_bytes());
	hasher.update(WEBSOCKET_GUID.as_bytes());
	BASE64.encode(hasher.finalize())
}

/// Inspects the request target. Called once, right after the request line parsed.
pub trait RequestHook: Fn(&str) -> Result<(), Rejection> + Sync + Send + 'static {}
impl<F> RequestHook for F where F: Fn(&str) -> Result<(), Rejection> + Sync + Send + 'static {}

/// Inspects the `Host` header value.
pub trait HostHook: Fn(&str) -> Result<(), Rejection> + Sync + Send + 'static {}
impl<F> HostHook for F where F: Fn(&str) -> Result<(), Rejection> + Sync + Send + 'static {}

/// Receives every header the handshake itself does not use, as `(name, value)`.
pub trait HeaderHook: Fn(&str, &str) -> Result<(), Rejection> + Sync + Send + 'static {}
impl<F> HeaderHook for F where F: Fn(&str, &str) -> Result<(), Rejection> + Sync + Send + 'static {}

/// Decides whether an offered subprotocol is acceptable.
pub trait ProtocolSelector: Fn(&str) -> bool + Sync + Send + 'static {}
impl<F> ProtocolSelector for F where F: Fn(&str) -> bool + Sync + Send + 'static {}

/// Turns one offered extension into the accepted form, or declines it with `Ok(None)`.
pub trait ExtensionNegotiator:
	Fn(&HeaderOption) -> Result<Option<HeaderOption>, Rejection> + Sync + Send + 'static
{
}
impl<F> ExtensionNegotiator for F where
	F: Fn(&HeaderOption) -> Result<Option<HeaderOption>, Rejection> + Sync + Send + 'static
{
}

/// Last check before the 101 response is written. May add response headers.
pub trait BeforeUpgradeHook: Fn() -> Result<ResponseHeaders, Rejection> + Sync + Send + 'static {}
impl<F> BeforeUpgradeHook for F where F: Fn() -> Result<ResponseHeaders, Rejection> + Sync + Send + 'static {}

/// Every hook the negotiator calls, each with a no-op default.
///
/// Hooks run synchronously, at most once per occurrence, and may only return data or abort the
/// handshake with a [Rejection].
#[derive(Clone)]
pub struct HandshakeHooks {
	/// Called with the request target. Default: accept.
	on_request: Arc<dyn RequestHook>,
	/// Called with the `Host` value. Default: accept.
	on_host: Arc<dyn HostHook>,
	/// Called for each unrecognized header. Default: ignore.
	on_header: Arc<dyn HeaderHook>,
	/// Called per offered subprotocol until one is selected. Default: the header is not read and
	/// no protocol is selected.
	select_protocol: Option<Arc<dyn ProtocolSelector>>,
	/// Called per offered extension. Default: the header is not read and no extension is accepted.
	negotiate_extension: Option<Arc<dyn ExtensionNegotiator>>,
	/// Called once all required headers were seen. Default: no extra headers.
	before_upgrade: Arc<dyn BeforeUpgradeHook>,
}

impl HandshakeHooks {
	pub fn on_request(mut self, hook: impl RequestHook) -> Self {
		self.on_request = Arc::new(hook);
		self
	}

	pub fn on_host(mut self, hook: impl HostHook) -> Self {
		self.on_host = Arc::new(hook);
		self
	}

	pub fn on_header(mut self, hook: impl HeaderHook) -> Self {
		self.on_header = Arc::new(hook);
		self
	}

	pub fn select_protocol(mut self, selector: impl ProtocolSelector) -> Self {
		self.select_protocol = Some(Arc::new(selector));
		self
	}

	pub fn negotiate_extension(mut self, negotiator: impl ExtensionNegotiator) -> Self {
		self.negotiate_extension = Some(Arc::new(negotiator));
		self
	}

	pub fn before_upgrade(mut self, hook: impl BeforeUpgradeHook) -> Self {
		self.before_upgrade = Arc::new(hook);
		self
	}
}

impl Default for HandshakeHooks {
	fn default() -> Self {
		Self {
			on_request: Arc::new(|_: &str| -> Result<(), Rejection> { Ok(()) }),
			on_host: Arc::new(|_: &str| -> Result<(), Rejection> { Ok(()) }),
			on_header: Arc::new(|_: &str, _: &str| -> Result<(), Rejection> { Ok(()) }),
			select_protocol: None,
			negotiate_extension: None,
			before_upgrade: Arc::new(|| -> Result<ResponseHeaders, Rejection> {
				Ok(ResponseHeaders::default())
			}),
		}
	}
}

impl Debug for HandshakeHooks {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HandshakeHooks")
			.field("select_protocol", &self.select_protocol.is_some())
			.field("negotiate_extension", &self.negotiate_extension.is_some())
			.finish_non_exhaustive()
	}
}

/// What a successful upgrade agreed on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
pub struct HandshakeResult {
	/// The selected subprotocol.
	protocol: Option<String>,
	/// Accepted extensions, in the order they were accepted.
	extensions: Vec<HeaderOption>,
}

/// The outcome of one handshake attempt along with the bytes to send back.
///
/// A response is produced for rejections too, so the client always gets a well-formed HTTP
/// answer.
#[derive(Debug, Getters, Dissolve)]
pub struct Negotiation {
	outcome: Result<HandshakeResult, Rejection>,
	response: Bytes,
	/// Number of request bytes taken off the input buffer.
	consumed: usize,
}

impl Negotiation {
	pub fn is_accepted(&self) -> bool { self.outcome.is_ok() }
}

/// Drives the opening handshake.
///
/// An `Upgrader` holds only immutable configuration and can be shared between connections.
#[derive(Debug, Clone)]
pub struct Upgrader {
	hooks: HandshakeHooks,
	/// Written into every handshake response, accepted or not.
	headers: ResponseHeaders,
	max_request_size: usize,
}

impl Upgrader {
	pub fn new() -> Self {
		Self {
			hooks: HandshakeHooks::default(),
			headers: ResponseHeaders::default(),
			max_request_size: DEFAULT_MAX_REQUEST_SIZE,
		}
	}

	pub fn with_hooks(mut self, hooks: HandshakeHooks) -> Self {
		self.hooks = hooks;
		self
	}

	/// Adds a header written into every handshake response.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push(name, value);
		self
	}

	/// Limits the size of a request head, whether it is still buffering or already complete.
	pub fn max_request_size(mut self, size: usize) -> Self {
		self.max_request_size = size;
		self
	}

	/// Runs the handshake over the request head at the start of `src`.
	///
	/// Returns `None` while the head (request line, headers and the terminating blank line) is
	/// not fully buffered; nothing is consumed in that case and the caller retries once more bytes
	/// arrived. Otherwise the head is removed from `src` and any bytes after it are left in place.
	pub fn negotiate(&self, src: &mut BytesMut) -> Option<Negotiation> {
		let head_len = match find_head_end(src) {
			Some(head_len) => head_len,
			None if src.len() > self.max_request_size => {
				let consumed = src.len();
				src.clear();
				return Some(self.finish(Err(Rejection::request_too_large()), consumed));
			},
			None => return None,
		};
		if head_len > self.max_request_size {
			src.advance(head_len);
			return Some(self.finish(Err(Rejection::request_too_large()), head_len));
		}

		let head = src.split_to(head_len);
		let outcome = self.process(&head);
		Some(self.finish(outcome, head_len))
	}

	fn finish(&self, outcome: Result<Accepted<'_>, Rejection>, consumed: usize) -> Negotiation {
		match outcome {
			Ok(accepted) => {
				let response = self.render_upgrade(&accepted);
				debug!(
					"Accepted upgrade (protocol={:?}, extensions={})",
					accepted.result.protocol,
					accepted.result.extensions.len()
				);
				Negotiation {
					outcome: Ok(accepted.result),
					response,
					consumed,
				}
			},
			Err(rejection) => {
				debug!("Rejected upgrade: {}", rejection);
				let response = rejection.render(&self.headers).freeze();
				Negotiation {
					outcome: Err(rejection),
					response,
					consumed,
				}
			},
		}
	}

	fn process<'a>(&self, head: &'a [u8]) -> Result<Accepted<'a>, Rejection> {
		let text = std::str::from_utf8(head).map_err(|_| Rejection::malformed_request())?;
		let mut lines = text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

		let request = RequestLine::parse(lines.next().unwrap_or_default()).ok_or_else(Rejection::malformed_request)?;
		trace!("Handshake request line: {:?}", request);

		if request.major != 1 || request.minor < 1 {
			return Err(Rejection::bad_protocol_version());
		}
		if request.method != "GET" {
			return Err(Rejection::bad_method());
		}
		(self.hooks.on_request)(request.target)?;

		let mut seen = SeenHeaders::default();
		let mut result = HandshakeResult::default();
		let mut key = "";

		for line in lines {
			if line.trim().is_empty() {
				break;
			}
			let (name, value) = parse_header_line(line).ok_or_else(Rejection::malformed_request)?;

			match KnownHeader::from_name(name) {
				Some(KnownHeader::Host) => {
					seen.host = true;
					(self.hooks.on_host)(value)?;
				},
				Some(KnownHeader::Upgrade) => {
					seen.upgrade = true;
					if !value.eq_ignore_ascii_case(UPGRADE_VALUE) {
						return Err(Rejection::bad_upgrade());
					}
				},
				Some(KnownHeader::Connection) => {
					seen.connection = true;
					if value != CONNECTION_VALUE {
						return Err(Rejection::bad_connection());
					}
				},
				Some(KnownHeader::SecVersion) => {
					seen.version = true;
					if value != SUPPORTED_VERSION {
						return Err(Rejection::upgrade_required());
					}
				},
				Some(KnownHeader::SecKey) => {
					seen.key = true;
					match BASE64.decode(value) {
						Ok(nonce) if nonce.len() == NONCE_SIZE => key = value,
						_ => return Err(Rejection::bad_sec_key()),
					}
				},
				Some(KnownHeader::SecProtocol) => match &self.hooks.select_protocol {
					Some(select) if result.protocol.is_none() => {
						result.protocol = select_first_match(value, |token| select(token)).map_err(|e| {
							debug!("Malformed {} header {:?}: {}", HEADER_SEC_PROTOCOL, value, e);
							Rejection::malformed_request()
						})?;
					},
					_ => {},
				},
				Some(KnownHeader::SecExtensions) => {
					if let Some(negotiate) = &self.hooks.negotiate_extension {
						let accepted = std::mem::take(&mut result.extensions);
						result.extensions = negotiate_all(value, accepted, |offer| negotiate(offer))?;
					}
				},
				None => (self.hooks.on_header)(name, value)?,
			}
		}

		if let Some(rejection) = seen.first_missing() {
			return Err(rejection);
		}
		let headers = (self.hooks.before_upgrade)()?;

		Ok(Accepted { result, key, headers })
	}

	fn render_upgrade(&self, accepted: &Accepted<'_>) -> Bytes {
		let mut dst = BytesMut::with_capacity(256);

		write_status_line(&mut dst, 101);
		write_header(&mut dst, HEADER_UPGRADE, UPGRADE_VALUE);
		write_header(&mut dst, HEADER_CONNECTION, CONNECTION_VALUE);
		write_header(&mut dst, HEADER_SEC_ACCEPT, &compute_accept_key(accepted.key));
		if let Some(protocol) = &accepted.result.protocol {
			write_header(&mut dst, HEADER_SEC_PROTOCOL, protocol);
		}
		if !accepted.result.extensions.is_empty() {
			write_header(&mut dst, HEADER_SEC_EXTENSIONS, &join_options(&accepted.result.extensions));
		}
		self.headers.write_to(&mut dst);
		accepted.headers.write_to(&mut dst);
		dst.put_slice(b"\r\n");

		dst.freeze()
	}
}

impl Default for Upgrader {
	fn default() -> Self { Self::new() }
}

/// A handshake that passed every check. `key` borrows the request buffer and lives only for the
/// duration of the negotiate call.
struct Accepted<'a> {
	result: HandshakeResult,
	key: &'a str,
	headers: ResponseHeaders,
}

#[derive(Debug, PartialEq, Eq)]
struct RequestLine<'a> {
	method: &'a str,
	target: &'a str,
	major: u8,
	minor: u8,
}

impl<'a> RequestLine<'a> {
	/// Parses `METHOD SP TARGET SP HTTP/<major>.<minor>`.
	fn parse(line: &'a str) -> Option<Self> {
		let mut parts = line.split(' ');
		let method = parts.next().filter(|method| !method.is_empty())?;
		let target = parts.next().filter(|target| !target.is_empty())?;
		let version = parts.next()?;
		if parts.next().is_some() {
			return None;
		}

		let (major, minor) = version.strip_prefix("HTTP/")?.split_once('.')?;
		let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
		if !digits(major) || !digits(minor) {
			return None;
		}

		Some(Self {
			method,
			target,
			major: major.parse().ok()?,
			minor: minor.parse().ok()?,
		})
	}
}

/// Splits `Name: value` on the first colon. The name must be non-empty and free of whitespace.
fn parse_header_line(line: &str) -> Option<(&str, &str)> {
	let (name, value) = line.split_once(':')?;
	if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
		return None;
	}
	Some((name, value.trim()))
}

/// Returns the length of the request head including its terminating blank line.
fn find_head_end(src: &[u8]) -> Option<usize> {
	let mut start = 0;
	for (i, _) in src.iter().enumerate().filter(|(_, b)| **b == b'\n') {
		let line = &src[start..i];
		if start > 0 && line.iter().all(u8::is_ascii_whitespace) {
			return Some(i + 1);
		}
		start = i + 1;
	}
	None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownHeader {
	Host,
	Upgrade,
	Connection,
	SecVersion,
	SecKey,
	SecProtocol,
	SecExtensions,
}

impl KnownHeader {
	fn from_name(name: &str) -> Option<Self> {
		[
			(HEADER_HOST, KnownHeader::Host),
			(HEADER_UPGRADE, KnownHeader::Upgrade),
			(HEADER_CONNECTION, KnownHeader::Connection),
			(HEADER_SEC_VERSION, KnownHeader::SecVersion),
			(HEADER_SEC_KEY, KnownHeader::SecKey),
			(HEADER_SEC_PROTOCOL, KnownHeader::SecProtocol),
			(HEADER_SEC_EXTENSIONS, KnownHeader::SecExtensions),
		]
		.into_iter()
		.find(|(canonical, _)| canonical.eq_ignore_ascii_case(name))
		.map(|(_, header)| header)
	}
}

/// Which of the required headers have been seen.
#[derive(Debug, Default)]
struct SeenHeaders {
	host: bool,
	upgrade: bool,
	connection: bool,
	version: bool,
	key: bool,
}

impl SeenHeaders {
	/// Names the first missing header in the order Host, Upgrade, Connection, Version, Key.
	fn first_missing(&self) -> Option<Rejection> {
		if !self.host {
			Some(Rejection::bad_host())
		} else if !self.upgrade {
			Some(Rejection::bad_upgrade())
		} else if !self.connection {
			Some(Rejection::bad_connection())
		} else if !self.version {
			Some(Rejection::bad_sec_version())
		} else if !self.key {
			Some(Rejection::bad_sec_key())
		} else {
			None
		}
	}
}
