use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use rand::Rng;
use ripplews::{
	errors::Error,
	pin_callback,
	protocol::{Frame, FrameError, HandshakeHooks, HandshakeResult, Rejection, Upgrader},
	server::{Peer, Reply, Server, ServerBuilder},
};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::TcpStream,
	sync::mpsc,
};
use tokio_tungstenite::{
	connect_async,
	tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
};

async fn spawn(builder: ServerBuilder) -> SocketAddr {
	let server = Arc::new(builder.port(0).build().await.unwrap());
	let address = server.address();

	tokio::task::spawn({
		let task_server: Arc<Server> = server.clone();
		async move {
			task_server.listen().await.unwrap();
		}
	});

	address
}

fn echo_server() -> ServerBuilder {
	ServerBuilder::default().onmessage(|frame: Frame, _: Arc<Peer>| {
		pin_callback!({
			if frame.payload().as_ref() == b"bye" {
				Some(Reply::close())
			} else {
				Some(Reply::from(frame))
			}
		})
	})
}

/// Writes a raw upgrade request and reads back the full response head.
async fn raw_upgrade(address: SocketAddr) -> TcpStream {
	let mut stream = TcpStream::connect(address).await.unwrap();
	stream
		.write_all(
			b"GET / HTTP/1.1\r\n\
			  Host: localhost\r\n\
			  Upgrade: websocket\r\n\
			  Connection: Upgrade\r\n\
			  Sec-WebSocket-Version: 13\r\n\
			  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
		)
		.await
		.unwrap();

	let mut head = Vec::new();
	while !head.ends_with(b"\r\n\r\n") {
		let byte = stream.read_u8().await.unwrap();
		head.push(byte);
	}
	let head = String::from_utf8(head).unwrap();
	assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
	assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

	stream
}

#[tokio::test]
async fn test_echo_text_and_binary() {
	let address = spawn(echo_server()).await;
	let (mut ws, _) = connect_async(format!("ws://{address}/")).await.unwrap();

	ws.send(Message::Text("hello".to_string())).await.unwrap();
	assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("hello".to_string()));

	let mut payload = vec![0u8; 70_000];
	rand::thread_rng().fill(&mut payload[..]);
	ws.send(Message::Binary(payload.clone())).await.unwrap();
	assert_eq!(ws.next().await.unwrap().unwrap(), Message::Binary(payload));
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
	let address = spawn(echo_server()).await;
	let (mut ws, _) = connect_async(format!("ws://{address}/")).await.unwrap();

	ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
	assert_eq!(ws.next().await.unwrap().unwrap(), Message::Pong(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_client_close_is_echoed() {
	let address = spawn(echo_server()).await;
	let (mut ws, _) = connect_async(format!("ws://{address}/")).await.unwrap();

	ws.close(None).await.unwrap();
	let message = ws.next().await.unwrap().unwrap();
	assert!(matches!(message, Message::Close(_)));
}

#[tokio::test]
async fn test_close_reply_ends_connection() {
	let address = spawn(echo_server()).await;
	let (mut ws, _) = connect_async(format!("ws://{address}/")).await.unwrap();

	ws.send(Message::Text("bye".to_string())).await.unwrap();
	let message = ws.next().await.unwrap().unwrap();
	assert!(matches!(message, Message::Close(_)));
}

#[tokio::test]
async fn test_subprotocol_selection() {
	let upgrader = Upgrader::new()
		.with_hooks(HandshakeHooks::default().select_protocol(|protocol: &str| protocol == "chat"))
		.header("Server", "ripplews");
	let address = spawn(echo_server().upgrader(upgrader)).await;

	let mut request = format!("ws://{address}/").into_client_request().unwrap();
	request
		.headers_mut()
		.insert("Sec-WebSocket-Protocol", HeaderValue::from_static("superchat, chat"));
	let (_, response) = connect_async(request).await.unwrap();

	assert_eq!(response.headers().get("Sec-WebSocket-Protocol").unwrap(), "chat");
	assert_eq!(response.headers().get("Server").unwrap(), "ripplews");
}

#[tokio::test]
async fn test_lifecycle_callbacks() {
	let (tx, mut rx) = mpsc::unbounded_channel::<String>();
	let open_tx = tx.clone();
	let connect_tx = tx.clone();
	let builder = echo_server()
		.onconnect(move |_: SocketAddr| {
			let tx = connect_tx.clone();
			pin_callback!({
				let _ = tx.send("connect".to_string());
			})
		})
		.onopen(move |result: HandshakeResult, _: Arc<Peer>| {
			let tx = open_tx.clone();
			pin_callback!({
				let _ = tx.send(format!("open {:?}", result.protocol()));
			})
		})
		.onclose(move |_: Arc<Peer>, cause: Option<Arc<Error>>| {
			let tx = tx.clone();
			pin_callback!({
				let _ = tx.send(format!("close {}", cause.is_some()));
			})
		});
	let address = spawn(builder).await;

	let (mut ws, _) = connect_async(format!("ws://{address}/")).await.unwrap();
	assert_eq!(rx.recv().await.unwrap(), "connect");
	assert_eq!(rx.recv().await.unwrap(), "open None");

	ws.close(None).await.unwrap();
	while ws.next().await.is_some() {}
	assert_eq!(rx.recv().await.unwrap(), "close false");
}

#[tokio::test]
async fn test_close_callback_receives_error() {
	let (tx, mut rx) = mpsc::unbounded_channel::<Option<Arc<Error>>>();
	let builder = echo_server().onclose(move |_: Arc<Peer>, cause: Option<Arc<Error>>| {
		let tx = tx.clone();
		pin_callback!({
			let _ = tx.send(cause);
		})
	});
	let address = spawn(builder).await;

	let mut stream = raw_upgrade(address).await;
	stream.write_all(b"\x81\x02hi").await.unwrap();

	let cause = rx.recv().await.unwrap().unwrap();
	assert!(matches!(cause.as_ref(), Error::Frame(FrameError::UnmaskedClientFrame)));
}

#[tokio::test]
async fn test_missing_headers_are_rejected() {
	let address = spawn(echo_server()).await;
	let mut stream = TcpStream::connect(address).await.unwrap();
	stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();

	let mut response = String::new();
	stream.read_to_string(&mut response).await.unwrap();
	assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
	assert!(response.ends_with("\r\n\r\nhandshake error: bad \"Upgrade\" header"));
}

#[tokio::test]
async fn test_hook_rejection_reaches_client() {
	let hooks = HandshakeHooks::default().on_request(|uri: &str| -> Result<(), Rejection> {
		if uri.starts_with("/private") {
			Err(Rejection::application("forbidden").with_status(403))
		} else {
			Ok(())
		}
	});
	let address = spawn(echo_server().upgrader(Upgrader::new().with_hooks(hooks))).await;

	match connect_async(format!("ws://{address}/private")).await {
		Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 403),
		other => panic!("expected an HTTP error, got {:?}", other.map(|(_, response)| response)),
	}
	assert!(connect_async(format!("ws://{address}/public")).await.is_ok());
}

#[tokio::test]
async fn test_handshake_timeout_drops_connection() {
	let address = spawn(echo_server().set_handshake_timeout(100)).await;
	let mut stream = TcpStream::connect(address).await.unwrap();

	let mut buf = [0u8; 16];
	let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await.unwrap();
	assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_unmasked_frame_closes_with_protocol_error() {
	let address = spawn(echo_server()).await;
	let mut stream = raw_upgrade(address).await;

	stream.write_all(b"\x81\x02hi").await.unwrap();

	let mut close = [0u8; 4];
	stream.read_exact(&mut close).await.unwrap();
	assert_eq!(close[0], 0x88);
	assert_eq!(u16::from_be_bytes([close[2], close[3]]), 1002);
}

#[tokio::test]
async fn test_frame_right_after_request_is_served() {
	let address = spawn(echo_server()).await;
	let mut stream = TcpStream::connect(address).await.unwrap();

	let mask = [0x37, 0xfa, 0x21, 0x3d];
	let mut request = b"GET / HTTP/1.1\r\n\
		Host: localhost\r\n\
		Upgrade: websocket\r\n\
		Connection: Upgrade\r\n\
		Sec-WebSocket-Version: 13\r\n\
		Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
		.to_vec();
	request.extend_from_slice(&[0x81, 0x85]);
	request.extend_from_slice(&mask);
	request.extend(b"Hello".iter().zip(mask.iter().cycle()).map(|(b, m)| b ^ m));
	stream.write_all(&request).await.unwrap();

	let mut received = Vec::new();
	while !received.ends_with(b"\x81\x05Hello") {
		received.push(stream.read_u8().await.unwrap());
	}
	let text = String::from_utf8_lossy(&received);
	assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
}
