pub mod errors;
pub mod protocol;
pub mod server;

use errors::Error;

pub type RippleResult<T> = std::result::Result<T, Error>;

/// Boxes and pins an `async move` block into the future type server callbacks return.
///
/// ```ignore
/// ServerBuilder::default()
/// 	.onmessage(|frame: Frame, _: Arc<Peer>| pin_callback!({ Some(Reply::from(frame)) }));
/// ```
#[macro_export]
macro_rules! pin_callback {
	($body:block) => {{
		let future: ::std::pin::Pin<Box<dyn ::std::future::Future<Output = _> + Send + 'static>> =
			Box::pin(async move $body);
		future
	}};
}
