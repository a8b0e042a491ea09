use std::sync::Arc;

use ripplews::{
	pin_callback,
	protocol::Frame,
	server::{Peer, Reply, ServerBuilder},
};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Echoes every data frame back to its sender.
#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt().with_max_level(LevelFilter::DEBUG).init();

	let server = ServerBuilder::default()
		.onmessage(|frame: Frame, _: Arc<Peer>| pin_callback!({ Some(Reply::from(frame)) }))
		.build()
		.await?;

	info!("ripplews echo server listening on {}", server.address());
	server.listen().await?;

	Ok(())
}
