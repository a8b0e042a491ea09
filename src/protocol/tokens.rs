//! Grammar for the list-valued headers used during negotiation.
//!
//! ```text
//! options   = option *( OWS "," OWS option )
//! option    = token *( OWS ";" OWS param )
//! param     = token [ OWS "=" OWS ( token / quoted-string ) ]
//! ```
//!
//! Empty list elements are skipped. Options and parameters keep the order the client sent them
//! in and duplicate parameter names are preserved.

use std::fmt::{Display, Write};

use thiserror::Error;
use tracing::debug;

use super::Rejection;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
	#[error("unexpected byte {byte:#04x} at position {position}")]
	UnexpectedByte { byte: u8, position: usize },
	#[error("expected a token at position {0}")]
	MissingToken(usize),
	#[error("unterminated quoted-string starting at position {0}")]
	UnterminatedQuote(usize),
}

/// One element of a negotiation header: a name with its ordered parameters.
///
/// Flag parameters (no `=`) are stored with an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderOption {
	name: String,
	params: Vec<(String, String)>,
}

impl HeaderOption {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			params: Vec::new(),
		}
	}

	/// Appends a parameter. Pass an empty value for a flag parameter.
	pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.push((name.into(), value.into()));
		self
	}

	/// Returns the value of the first parameter called `name`.
	pub fn param(&self, name: &str) -> Option<&str> {
		self.params
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/* Getters */
	pub fn name(&self) -> &str { &self.name }

	pub fn params(&self) -> &[(String, String)] { &self.params }
}

impl Display for HeaderOption {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.name)?;
		for (name, value) in &self.params {
			write!(f, "; {name}")?;
			if value.is_empty() {
				continue;
			}
			if value.bytes().all(is_tchar) {
				write!(f, "={value}")?;
			} else {
				f.write_str("=\"")?;
				for c in value.chars() {
					if c == '"' || c == '\\' {
						f.write_char('\\')?;
					}
					f.write_char(c)?;
				}
				f.write_char('"')?;
			}
		}
		Ok(())
	}
}

/// Renders options the way they appear in a `Sec-WebSocket-Extensions` response header.
pub fn join_options(options: &[HeaderOption]) -> String {
	options.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// RFC 7230 `tchar`.
fn is_tchar(byte: u8) -> bool {
	matches!(byte,
		b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
	) || byte.is_ascii_alphanumeric()
}

struct Lexer<'a> {
	src: &'a str,
	pos: usize,
}

impl<'a> Lexer<'a> {
	fn new(src: &'a str) -> Self { Self { src, pos: 0 } }

	fn peek(&self) -> Option<u8> { self.src.as_bytes().get(self.pos).copied() }

	fn skip_ows(&mut self) {
		while matches!(self.peek(), Some(b' ' | b'\t')) {
			self.pos += 1;
		}
	}

	fn unexpected(&self) -> TokenError {
		match self.peek() {
			Some(byte) => TokenError::UnexpectedByte {
				byte,
				position: self.pos,
			},
			None => TokenError::MissingToken(self.pos),
		}
	}

	fn token(&mut self) -> Result<&'a str, TokenError> {
		let start = self.pos;
		while self.peek().is_some_and(is_tchar) {
			self.pos += 1;
		}
		if start == self.pos {
			return Err(self.unexpected());
		}
		Ok(&self.src[start..self.pos])
	}

	fn quoted(&mut self) -> Result<String, TokenError> {
		let start = self.pos;
		self.pos += 1;
		let mut value = String::new();
		let mut chars = self.src[self.pos..].char_indices();
		while let Some((i, c)) = chars.next() {
			match c {
				'"' => {
					self.pos += i + 1;
					return Ok(value);
				},
				'\\' => match chars.next() {
					Some((_, escaped)) => value.push(escaped),
					None => break,
				},
				_ => value.push(c),
			}
		}
		Err(TokenError::UnterminatedQuote(start))
	}

	/// Consumes the separator after a list element. Returns false at the end of input.
	fn element_end(&mut self) -> Result<bool, TokenError> {
		self.skip_ows();
		match self.peek() {
			None => Ok(false),
			Some(b',') => {
				self.pos += 1;
				Ok(true)
			},
			Some(_) => Err(self.unexpected()),
		}
	}

	/// Skips blank list elements. Returns false once the input is exhausted.
	fn next_element(&mut self) -> bool {
		loop {
			self.skip_ows();
			match self.peek() {
				None => return false,
				Some(b',') => self.pos += 1,
				Some(_) => return true,
			}
		}
	}
}

/// Iterator over the plain tokens of a header value such as `Sec-WebSocket-Protocol`.
pub struct Tokens<'a> {
	lexer: Lexer<'a>,
	done: bool,
}

impl<'a> Iterator for Tokens<'a> {
	type Item = Result<&'a str, TokenError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done || !self.lexer.next_element() {
			return None;
		}

		let result = self.lexer.token().and_then(|token| {
			if !self.lexer.element_end()? {
				self.done = true;
			}
			Ok(token)
		});
		if result.is_err() {
			self.done = true;
		}
		Some(result)
	}
}

/// Iterator over the options of a header value such as `Sec-WebSocket-Extensions`.
pub struct Options<'a> {
	lexer: Lexer<'a>,
	done: bool,
}

impl Options<'_> {
	fn option(&mut self) -> Result<HeaderOption, TokenError> {
		let mut option = HeaderOption::new(self.lexer.token()?);

		loop {
			self.lexer.skip_ows();
			match self.lexer.peek() {
				None => {
					self.done = true;
					return Ok(option);
				},
				Some(b',') => {
					self.lexer.pos += 1;
					return Ok(option);
				},
				Some(b';') => {
					self.lexer.pos += 1;
					self.lexer.skip_ows();
					let name = self.lexer.token()?;
					self.lexer.skip_ows();

					let value = if self.lexer.peek() == Some(b'=') {
						self.lexer.pos += 1;
						self.lexer.skip_ows();
						if self.lexer.peek() == Some(b'"') {
							self.lexer.quoted()?
						} else {
							self.lexer.token()?.to_string()
						}
					} else {
						String::new()
					};
					option.params.push((name.to_string(), value));
				},
				Some(_) => return Err(self.lexer.unexpected()),
			}
		}
	}
}

impl Iterator for Options<'_> {
	type Item = Result<HeaderOption, TokenError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.done || !self.lexer.next_element() {
			return None;
		}

		let result = self.option();
		if result.is_err() {
			self.done = true;
		}
		Some(result)
	}
}

/// Lazily scans the comma separated tokens of `value`.
pub fn tokens(value: &str) -> Tokens<'_> {
	Tokens {
		lexer: Lexer::new(value),
		done: false,
	}
}

/// Lazily scans the options of `value`, in the order they were offered.
pub fn options(value: &str) -> Options<'_> {
	Options {
		lexer: Lexer::new(value),
		done: false,
	}
}

/// Parses every option of `value`.
pub fn parse_options(value: &str) -> Result<Vec<HeaderOption>, TokenError> { options(value).collect() }

/// Returns the first offered token accepted by `predicate`, in offer order.
///
/// Scanning stops at the first match, so grammar errors after it go unnoticed.
pub fn select_first_match<P>(value: &str, mut predicate: P) -> Result<Option<String>, TokenError>
where
	P: FnMut(&str) -> bool,
{
	for token in tokens(value) {
		let token = token?;
		if predicate(token) {
			return Ok(Some(token.to_string()));
		}
	}
	Ok(None)
}

/// Offers every option of `value` to `negotiate`, in offer order, appending each accepted result
/// to `accepted`.
///
/// Deduplicating options with the same name is up to `negotiate`, which sees every offer. A
/// grammar error turns into a malformed request rejection; a rejection from `negotiate` is
/// returned unchanged.
pub fn negotiate_all<F>(
	value: &str, mut accepted: Vec<HeaderOption>, mut negotiate: F,
) -> Result<Vec<HeaderOption>, Rejection>
where
	F: FnMut(&HeaderOption) -> Result<Option<HeaderOption>, Rejection>,
{
	for offer in options(value) {
		let offer = offer.map_err(|e| {
			debug!("Malformed extension offer {:?}: {}", value, e);
			Rejection::malformed_request()
		})?;

		if let Some(option) = negotiate(&offer)? {
			accepted.push(option);
		}
	}
	Ok(accepted)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::errors::ErrorKind;

	#[test]
	fn test_select_first_match_uses_offer_order() {
		let selected = select_first_match("a, b, c", |token| token == "b" || token == "c").unwrap();
		assert_eq!(selected.as_deref(), Some("b"));
	}

	#[test]
	fn test_select_no_match() {
		assert_eq!(select_first_match("chat, superchat", |_| false).unwrap(), None);
		assert_eq!(select_first_match("", |_| true).unwrap(), None);
	}

	#[test]
	fn test_select_skips_empty_elements() {
		let collected: Result<Vec<_>, _> = tokens(" ,a,, b ,").collect();
		assert_eq!(collected.unwrap(), vec!["a", "b"]);
	}

	#[test]
	fn test_select_malformed() {
		let err = select_first_match("a b", |_| false).unwrap_err();
		assert_eq!(err, TokenError::UnexpectedByte { byte: b'b', position: 2 });
	}

	#[test]
	fn test_parse_options_with_params() {
		let parsed =
			parse_options("permessage-deflate; client_max_window_bits; server_max_window_bits=10, foo;x=\"a b\";x=2")
				.unwrap();

		assert_eq!(parsed, vec![
			HeaderOption::new("permessage-deflate")
				.with_param("client_max_window_bits", "")
				.with_param("server_max_window_bits", "10"),
			HeaderOption::new("foo").with_param("x", "a b").with_param("x", "2"),
		]);
		assert_eq!(parsed[1].param("x"), Some("a b"));
	}

	#[test]
	fn test_parse_options_errors() {
		assert_eq!(parse_options("foo; =1"), Err(TokenError::UnexpectedByte { byte: b'=', position: 5 }));
		assert_eq!(parse_options("foo; x=\"open"), Err(TokenError::UnterminatedQuote(7)));
		assert_eq!(parse_options("foo;"), Err(TokenError::MissingToken(4)));
	}

	#[test]
	fn test_quoted_escapes() {
		let parsed = parse_options(r#"ext; v="a\"b\\c""#).unwrap();
		assert_eq!(parsed[0].param("v"), Some(r#"a"b\c"#));
		assert_eq!(parsed[0].to_string(), r#"ext; v="a\"b\\c""#);
	}

	#[test]
	fn test_display_and_join() {
		let options = vec![
			HeaderOption::new("permessage-deflate").with_param("client_no_context_takeover", ""),
			HeaderOption::new("x-custom").with_param("level", "3"),
		];
		assert_eq!(join_options(&options), "permessage-deflate; client_no_context_takeover, x-custom; level=3");
	}

	#[test]
	fn test_negotiate_all_keeps_acceptance_order() {
		let mut seen = Vec::new();
		let accepted = negotiate_all("a, b; p=1, a; p=2, c", vec![HeaderOption::new("z")], |offer| {
			seen.push(offer.name().to_string());
			// accept the first "a" and every "c"
			if offer.name() == "c" || (offer.name() == "a" && offer.param("p").is_none()) {
				Ok(Some(offer.clone()))
			} else {
				Ok(None)
			}
		})
		.unwrap();

		assert_eq!(seen, vec!["a", "b", "a", "c"]);
		assert_eq!(accepted, vec![HeaderOption::new("z"), HeaderOption::new("a"), HeaderOption::new("c")]);
	}

	#[test]
	fn test_negotiate_all_malformed() {
		let rejection = negotiate_all("a;;", Vec::new(), |offer| Ok(Some(offer.clone()))).unwrap_err();
		assert_eq!(rejection.status(), 400);
		assert_eq!(rejection.kind(), ErrorKind::MalformedInput);
	}

	#[test]
	fn test_negotiate_all_propagates_rejection() {
		let rejection = negotiate_all("a, b", Vec::new(), |offer| {
			if offer.name() == "b" {
				Err(Rejection::application("no b").with_status(403))
			} else {
				Ok(None)
			}
		})
		.unwrap_err();
		assert_eq!(rejection.status(), 403);
		assert_eq!(rejection.reason(), "no b");
	}
}
