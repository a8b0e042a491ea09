use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::TcpStream,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, error, info, trace};

use super::{CloseCallback, ConnectCallback, MessageCallback, OpenCallback, ServerResult};
use crate::{
	errors::{Error as LibraryError, ServerErrors},
	protocol::{
		constants::{CLOSE_PROTOCOL_ERROR, CLOSE_TOO_BIG},
		Frame, FrameCodec, FrameError, HandshakeResult, Opcode, Upgrader,
	},
};

/// The remote end of an upgraded connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
	address: SocketAddr,
	/// The subprotocol agreed on during the handshake.
	protocol: Option<String>,
}

impl Peer {
	pub(crate) fn new(address: SocketAddr, protocol: Option<String>) -> Self { Self { address, protocol } }

	/* Getters */
	pub fn address(&self) -> SocketAddr { self.address }

	pub fn protocol(&self) -> Option<&str> { self.protocol.as_deref() }
}

/// What a message handler wants sent back.
///
/// The opcode is mapped onto an outbound frame with [Frame::reply]; a continuation opcode sends
/// nothing and a close opcode ends the connection once the frame is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
	opcode: Opcode,
	payload: Bytes,
}

impl Reply {
	pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
		Self {
			opcode,
			payload: payload.into(),
		}
	}

	pub fn text(payload: impl Into<Bytes>) -> Self { Self::new(Opcode::Text, payload) }

	pub fn binary(payload: impl Into<Bytes>) -> Self { Self::new(Opcode::Binary, payload) }

	pub fn close() -> Self { Self::new(Opcode::Close, Bytes::new()) }

	/* Getters */
	pub fn opcode(&self) -> Opcode { self.opcode }

	pub fn payload(&self) -> &Bytes { &self.payload }
}

/// Echoes a frame back with the opcode it arrived with.
impl From<Frame> for Reply {
	fn from(frame: Frame) -> Self { Self::new(frame.opcode(), frame.into_payload()) }
}

/// Where a connection is in its lifecycle. Owned by the task driving the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
	/// Waiting for a complete upgrade request.
	Handshaking,
	/// Upgraded; frames flow in both directions.
	Open,
	Closed,
}

/// Everything a connection task needs, shared between all connections of a [super::Server].
pub(crate) struct ConnectionConfig {
	pub upgrader: Upgrader,
	pub codec: FrameCodec,
	/// In ms.
	pub handshake_timeout: u64,
	pub on_connect: Arc<dyn ConnectCallback>,
	pub on_open: Arc<dyn OpenCallback>,
	pub on_message: Arc<dyn MessageCallback>,
	pub on_close: Arc<dyn CloseCallback>,
}

pub(crate) struct Connection {
	address: SocketAddr,
	state: ConnectionState,
	config: Arc<ConnectionConfig>,
}

impl Connection {
	pub(crate) fn new(address: SocketAddr, config: Arc<ConnectionConfig>) -> Self {
		Self {
			address,
			state: ConnectionState::Handshaking,
			config,
		}
	}

	/// Drives the connection from the first request byte until it closes.
	///
	/// Handshake failures are returned. Once upgraded, the connection always ends through the
	/// close callback, which receives any error that ended it.
	pub(crate) async fn run(mut self, mut stream: TcpStream) -> ServerResult<()> {
		(self.config.on_connect)(self.address).await;

		let mut buffer = BytesMut::with_capacity(4096);
		let timeout = Duration::from_millis(self.config.handshake_timeout);

		let result = match tokio::time::timeout(timeout, self.handshake(&mut stream, &mut buffer)).await {
			Ok(Ok(result)) => result,
			Ok(Err(e)) => {
				self.transition(ConnectionState::Closed);
				let _ = stream.shutdown().await;
				return Err(e);
			},
			Err(_) => {
				self.transition(ConnectionState::Closed);
				return Err(ServerErrors::HandshakeTimeout(self.config.handshake_timeout).into());
			},
		};

		self.transition(ConnectionState::Open);
		info!("Upgraded connection for {}", self.address);
		let peer = Arc::new(Peer::new(self.address, result.protocol().clone()));
		(self.config.on_open)(result, peer.clone()).await;

		// Bytes that arrived right behind the request head already belong to the first frame.
		let mut parts = FramedParts::new::<Frame>(stream, self.config.codec.clone());
		parts.read_buf = buffer;
		let cause = self.serve(Framed::from_parts(parts), &peer).await.err().map(Arc::new);
		if let Some(e) = &cause {
			error!("Connection with {} ended with error: {}", self.address, e);
		}

		self.transition(ConnectionState::Closed);
		(self.config.on_close)(peer, cause).await;
		Ok(())
	}

	/// Reads until the upgrader has a complete request head and writes its response.
	async fn handshake(&self, stream: &mut TcpStream, buffer: &mut BytesMut) -> ServerResult<HandshakeResult> {
		loop {
			if let Some(negotiation) = self.config.upgrader.negotiate(buffer) {
				let (outcome, response, _) = negotiation.dissolve();
				stream.write_all(&response).await?;
				return outcome.map_err(LibraryError::from);
			}

			if stream.read_buf(buffer).await? == 0 {
				return Err(ServerErrors::ClosedDuringHandshake.into());
			}
		}
	}

	async fn serve(&self, mut framed: Framed<TcpStream, FrameCodec>, peer: &Arc<Peer>) -> ServerResult<()> {
		debug_assert_eq!(self.state(), ConnectionState::Open);

		while let Some(frame) = framed.next().await {
			let frame = match frame {
				Ok(frame) => frame,
				Err(LibraryError::Frame(e)) => {
					error!("Invalid frame from {}: {}", peer.address(), e);
					let code = match e {
						FrameError::PayloadTooLarge { .. } => CLOSE_TOO_BIG,
						_ => CLOSE_PROTOCOL_ERROR,
					};
					framed.send(Frame::close_with_status(code, &e.to_string())).await?;
					return Err(e.into());
				},
				Err(e) => return Err(e),
			};
			trace!("Received {} frame of {} bytes from {}", frame.opcode(), frame.payload().len(), peer.address());

			match frame.opcode() {
				Opcode::Ping => framed.send(Frame::pong(frame.into_payload())).await?,
				Opcode::Pong => debug!("Received pong from {}", peer.address()),
				Opcode::Close => {
					debug!("{} sent close (code: {:?})", peer.address(), frame.close_code());
					let answer = match frame.close_code() {
						Some(code) => Frame::close_with_status(code, ""),
						None => Frame::close(Bytes::new()),
					};
					framed.send(answer).await?;
					return Ok(());
				},
				Opcode::Text | Opcode::Binary | Opcode::Continuation => {
					let Some(reply) = (self.config.on_message)(frame, peer.clone()).await else {
						continue;
					};
					let Some(answer) = Frame::reply(reply.opcode, reply.payload) else {
						continue;
					};

					let closing = answer.opcode() == Opcode::Close;
					framed.send(answer).await?;
					if closing {
						debug!("Closing connection with {} on application request", peer.address());
						return Ok(());
					}
				},
			}
		}

		debug!("{} closed the connection", peer.address());
		Ok(())
	}

	pub(crate) fn state(&self) -> ConnectionState { self.state }

	fn transition(&mut self, state: ConnectionState) {
		trace!("Connection {} moved from {:?} to {:?}", self.address, self.state, state);
		self.state = state;
	}
}
