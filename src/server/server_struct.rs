use std::{net::SocketAddr, sync::Arc};

#[cfg(feature = "signals")]
use tokio::signal;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::{
	connection::{Connection, ConnectionConfig},
	ServerResult,
};
use crate::errors::Error as LibraryError;

pub struct Server {
	listener: TcpListener,
	address: SocketAddr,
	config: Arc<ConnectionConfig>,
}

impl Server {
	/// Used internally by the ServerBuilder to create a new [Server] instance.
	pub(super) fn new(listener: TcpListener, address: SocketAddr, config: ConnectionConfig) -> Self {
		Self {
			listener,
			address,
			config: Arc::new(config),
		}
	}

	/// Listens for incoming connections, blocking the current task.
	///
	/// Every accepted socket gets its own task which performs the upgrade and then serves frames
	/// for the lifetime of the connection. With the `signals` feature the loop also returns on
	/// ctrl + c.
	pub async fn listen(&self) -> ServerResult<()> {
		#[cfg(feature = "signals")]
		{
			tokio::select! {
				result = self.accept_loop() => result,
				_ = signal::ctrl_c() => {
					info!("Received ctrl + c, shutting down server on {}", self.address);
					Ok(())
				},
			}
		}
		#[cfg(not(feature = "signals"))]
		{
			self.accept_loop().await
		}
	}

	async fn accept_loop(&self) -> ServerResult<()> {
		loop {
			match self.listener.accept().await {
				Ok((socket, addr)) => {
					debug!("Accepted connection from {:?}", addr);
					self.handle_client(socket, addr);
				},
				Err(e) => {
					error!("Error accepting connection: {:?}", e);
					return Err(e.into());
				},
			}
		}
	}

	/// Spawns the task driving a single connection.
	fn handle_client(&self, socket: TcpStream, addr: SocketAddr) {
		let connection = Connection::new(addr, self.config.clone());

		tokio::task::spawn(async move {
			match connection.run(socket).await {
				Ok(()) => debug!("Connection with {} closed", addr),
				Err(LibraryError::Handshake(rejection)) => debug!("Handshake with {} rejected: {}", addr, rejection),
				Err(e) => error!("Connection with {} failed: {}", addr, e),
			}
		});
	}

	/* Getters */
	pub fn address(&self) -> SocketAddr { self.address }
}
