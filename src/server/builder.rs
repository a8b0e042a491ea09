use std::{
	net::{IpAddr, Ipv4Addr, SocketAddr},
	sync::Arc,
};

use tokio::net::TcpListener;
use tracing::debug;

use super::{
	connection::{ConnectionConfig, Peer},
	server_struct::Server,
	CloseCallback, ConnectCallback, MessageCallback, OpenCallback, ServerResult,
};
use crate::{
	errors::Error as LibraryError,
	pin_callback,
	protocol::{constants::DEFAULT_MAX_PAYLOAD, Frame, FrameCodec, HandshakeResult, Upgrader},
};

/// Utility Struct to build a [Server] as needed
pub struct ServerBuilder {
	/// The Ip Address to bind the server to.
	address: IpAddr,
	/// The port number to bind to. 0 lets the OS pick one.
	port: u16,
	/// The accepted delay (in ms) in which a client must complete the upgrade.
	handshake_timeout: u64,
	/// Largest inbound payload accepted, in bytes.
	max_payload: u64,
	/// Whether client frames without a mask are tolerated.
	allow_unmasked: bool,
	/// Handshake hooks and static response headers.
	upgrader: Upgrader,
	/// The event handler that will be invoked when a data frame is received.
	on_message: Option<Arc<dyn MessageCallback>>,
	/// The event handler that will be invoked when a socket is accepted.
	on_connect: Option<Arc<dyn ConnectCallback>>,
	/// The event handler that will be invoked when a connection is upgraded.
	on_open: Option<Arc<dyn OpenCallback>>,
	// The event handler that will be invoked when a connection is closed.
	on_close: Option<Arc<dyn CloseCallback>>,
}

impl ServerBuilder {
	fn new() -> Self {
		Self {
			address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
			port: 9001,
			handshake_timeout: 2000,
			max_payload: DEFAULT_MAX_PAYLOAD,
			allow_unmasked: false,
			upgrader: Upgrader::default(),
			on_message: None,
			on_close: None,
			on_open: None,
			on_connect: None,
		}
	}

	/// Sets the ip address to bind the server to (localhost loopback by
	/// default).
	pub fn address(mut self, address: impl Into<IpAddr>) -> Self {
		self.address = address.into();
		self
	}

	/// Sets the port number to bind to (9001 by default).
	pub fn port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	/// Sets the accepted delay (in ms) in which a client must complete the
	/// upgrade before the server drops the connection.
	///
	/// 2000 ms by default.
	pub fn set_handshake_timeout(mut self, handshake_timeout: u64) -> Self {
		self.handshake_timeout = handshake_timeout;
		self
	}

	/// Frames declaring a larger payload end the connection with status 1009.
	pub fn max_payload(mut self, max_payload: u64) -> Self {
		self.max_payload = max_payload;
		self
	}

	/// Accept client frames that carry no masking key.
	pub fn allow_unmasked(mut self, allow_unmasked: bool) -> Self {
		self.allow_unmasked = allow_unmasked;
		self
	}

	/// Sets the [Upgrader] used to negotiate every incoming handshake.
	pub fn upgrader(mut self, upgrader: Upgrader) -> Self {
		self.upgrader = upgrader;
		self
	}

	/// Sets the event handler for all incoming text, binary and continuation
	/// frames. Control frames are answered by the server itself.
	pub fn onmessage(mut self, event_handler: impl MessageCallback) -> Self {
		self.on_message = Some(Arc::new(event_handler));
		self
	}

	/// Sets the event handler for accepted sockets, invoked before the
	/// handshake starts.
	pub fn onconnect(mut self, event_handler: impl ConnectCallback) -> Self {
		self.on_connect = Some(Arc::new(event_handler));
		self
	}

	/// Sets the event handler for upgraded connections that end, along with
	/// the error that ended them, if any.
	pub fn onclose(mut self, event_handler: impl CloseCallback) -> Self {
		self.on_close = Some(Arc::new(event_handler));
		self
	}

	/// Sets the event handler for successful upgrades (e.g new connections.)
	pub fn onopen(mut self, event_handler: impl OpenCallback) -> Self {
		self.on_open = Some(Arc::new(event_handler));
		self
	}

	pub async fn build(self) -> ServerResult<Server> {
		let listener = TcpListener::bind(SocketAddr::new(self.address, self.port)).await?;
		let address = listener.local_addr()?;

		let config = ConnectionConfig {
			upgrader: self.upgrader,
			codec: FrameCodec::new()
				.max_payload(self.max_payload)
				.allow_unmasked(self.allow_unmasked),
			handshake_timeout: self.handshake_timeout,
			on_connect: self.on_connect.unwrap_or_else(Self::default_connect_handler),
			on_open: self.on_open.unwrap_or_else(Self::default_open_handler),
			on_message: self.on_message.unwrap_or_else(Self::default_message_handler),
			on_close: self.on_close.unwrap_or_else(Self::default_close_handler),
		};

		Ok(Server::new(listener, address, config))
	}

	fn default_message_handler() -> Arc<dyn MessageCallback> {
		let handler = |frame: Frame, _: Arc<Peer>| {
			pin_callback!({
				debug!(target: "default_message_handler", "Received frame: {:?}", frame);
				None
			})
		};
		Arc::new(handler)
	}

	fn default_close_handler() -> Arc<dyn CloseCallback> {
		let handler = |peer: Arc<Peer>, cause: Option<Arc<LibraryError>>| {
			pin_callback!({
				debug!(target: "default_close_handler", "Connection closed: {} ({:?})", peer.address(), cause);
			})
		};
		Arc::new(handler)
	}

	fn default_connect_handler() -> Arc<dyn ConnectCallback> {
		let handler = |address: SocketAddr| {
			pin_callback!({
				debug!(target: "default_connect_handler", "Accepted socket from {}", address);
			})
		};
		Arc::new(handler)
	}

	fn default_open_handler() -> Arc<dyn OpenCallback> {
		let handler = |result: HandshakeResult, peer: Arc<Peer>| {
			pin_callback!({
				debug!(target: "default_open_handler", "Client connected from {} ({:?})", peer.address(), result);
			})
		};

		Arc::new(handler)
	}
}

impl Default for ServerBuilder {
	fn default() -> Self { Self::new() }
}
