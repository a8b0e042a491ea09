mod builder;
mod connection;
mod server_struct;
pub use builder::*;
pub use connection::*;
pub use server_struct::*;

use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc};

use crate::{
	errors::Error as LibraryError,
	protocol::{Frame, HandshakeResult},
};

pub type ServerResult<T> = std::result::Result<T, LibraryError>;

/// Type alias used to indicate a pinned and boxed future.
pub type BoxedCallbackFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A pinned and boxed future resolving to the optional answer of a message handler.
pub type BoxedReplyFuture = Pin<Box<dyn Future<Output = Option<Reply>> + Send + 'static>>;

/// Invoked for every inbound data frame. The returned [Reply], if any, is sent back to the peer.
pub trait MessageCallback: Fn(Frame, Arc<Peer>) -> BoxedReplyFuture + Sync + Send + 'static {}

impl<F> MessageCallback for F where F: Fn(Frame, Arc<Peer>) -> BoxedReplyFuture + Sync + Send + 'static {}

/// Invoked once a connection completed its upgrade.
pub trait OpenCallback: Fn(HandshakeResult, Arc<Peer>) -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> OpenCallback for F where F: Fn(HandshakeResult, Arc<Peer>) -> BoxedCallbackFuture + Sync + Send + 'static {}

/// Invoked when a socket is accepted, before any handshake byte is read.
pub trait ConnectCallback: Fn(SocketAddr) -> BoxedCallbackFuture + Sync + Send + 'static {}

impl<F> ConnectCallback for F where F: Fn(SocketAddr) -> BoxedCallbackFuture + Sync + Send + 'static {}

/// Invoked when an upgraded connection ends. The error is `None` for an orderly close.
pub trait CloseCallback:
	Fn(Arc<Peer>, Option<Arc<LibraryError>>) -> BoxedCallbackFuture + Sync + Send + 'static
{
}

impl<F> CloseCallback for F where
	F: Fn(Arc<Peer>, Option<Arc<LibraryError>>) -> BoxedCallbackFuture + Sync + Send + 'static
{
}
