use std::{
	net::{IpAddr, SocketAddr},
	sync::Arc,
};

use ripplews::{
	errors::Error,
	pin_callback,
	protocol::{Frame, HandshakeHooks, HandshakeResult, Opcode, Rejection, ResponseHeaders, Upgrader},
	server::{Peer, Reply, ServerBuilder},
};
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

const ALLOWED_ORIGIN: &str = "http://localhost:8080";

fn check_header(name: &str, value: &str) -> std::result::Result<(), Rejection> {
	if name.eq_ignore_ascii_case("Origin") && value != ALLOWED_ORIGIN {
		return Err(Rejection::application(format!("origin {value} is not allowed")).with_status(403));
	}
	Ok(())
}

async fn callback_function(frame: Frame, peer: Arc<Peer>) -> Option<Reply> {
	debug!("Received {} frame from {}", frame.opcode(), peer.address());

	match frame.opcode() {
		Opcode::Text if frame.payload().as_ref() == b"bye" => Some(Reply::close()),
		Opcode::Text => {
			let text = String::from_utf8_lossy(frame.payload()).to_uppercase();
			Some(Reply::text(text))
		},
		_ => Some(Reply::from(frame)),
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt().with_max_level(LevelFilter::DEBUG).init();

	let hooks = HandshakeHooks::default()
		.on_request(|uri: &str| -> std::result::Result<(), Rejection> {
			match uri {
				"/" | "/chat" => Ok(()),
				_ => Err(Rejection::application("no such endpoint").with_status(404)),
			}
		})
		.on_header(check_header)
		.select_protocol(|protocol: &str| protocol == "chat")
		.before_upgrade(|| -> std::result::Result<ResponseHeaders, Rejection> {
			Ok(ResponseHeaders::new().insert("X-Upgraded-By", "ripplews-demo"))
		});
	let upgrader = Upgrader::new().with_hooks(hooks).header("Server", "ripplews");

	let server = ServerBuilder::default()
		.address("0.0.0.0".parse::<IpAddr>()?)
		.upgrader(upgrader)
		.onopen(|result: HandshakeResult, peer: Arc<Peer>| {
			pin_callback!({
				info!("{} joined with protocol {:?}", peer.address(), result.protocol());
			})
		})
		.onmessage(|frame: Frame, peer: Arc<Peer>| {
			pin_callback!({ callback_function(frame, peer).await })
		})
		.onconnect(|address: SocketAddr| {
			pin_callback!({
				debug!("Accepted socket from {}", address);
			})
		})
		.onclose(|peer: Arc<Peer>, cause: Option<Arc<Error>>| {
			pin_callback!({
				match cause {
					Some(e) => info!("{} left with error: {}", peer.address(), e),
					None => info!("{} left", peer.address()),
				}
			})
		})
		.build()
		.await?;

	info!("ripplews demo server listening on {}", server.address());
	server.listen().await?;

	Ok(())
}
