/* Opcode Consts */
/** Data Frames */
pub const CONTINUATION_OPCODE: u8 = 0x0;
pub const TEXT_OPCODE: u8 = 0x1;
pub const BINARY_OPCODE: u8 = 0x2;

/** Control Frames */
pub const CLOSE_OPCODE: u8 = 0x8;
pub const PING_OPCODE: u8 = 0x9;
pub const PONG_OPCODE: u8 = 0xA;

/* Header Bit Masks */
pub const FIN_BIT: u8 = 0b1000_0000;
pub const RSV_BITS: u8 = 0b0111_0000;
pub const OPCODE_BITS: u8 = 0b0000_1111;
pub const MASK_BIT: u8 = 0b1000_0000;
pub const LENGTH_BITS: u8 = 0b0111_1111;

/* Framing Constants */
/// Largest length that fits in the 7 bit base length field.
pub const MAX_BASE_LENGTH: u64 = 125;
/// Base length marker for a 16 bit extended length.
pub const EXTENDED_LENGTH_16: u8 = 126;
/// Base length marker for a 64 bit extended length.
pub const EXTENDED_LENGTH_64: u8 = 127;
/// The maximum payload length of a control frame.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;
pub const MIN_HEADER_LENGTH: usize = 2;
pub const MAX_HEADER_LENGTH: usize = 14;
pub const MASK_LENGTH: usize = 4;
/// Default upper bound for an inbound payload accepted by the server codec.
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/* Close Codes */
/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The endpoint received a frame that violates the protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// The endpoint received a payload too big to process.
pub const CLOSE_TOO_BIG: u16 = 1009;

/* Handshake Constants */
/// GUID appended to the client key when deriving `Sec-WebSocket-Accept`.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
/// Size of the decoded `Sec-WebSocket-Key` nonce.
pub const NONCE_SIZE: usize = 16;
pub const SUPPORTED_VERSION: &str = "13";

pub const HEADER_HOST: &str = "Host";
pub const HEADER_UPGRADE: &str = "Upgrade";
pub const HEADER_CONNECTION: &str = "Connection";
pub const HEADER_SEC_VERSION: &str = "Sec-WebSocket-Version";
pub const HEADER_SEC_KEY: &str = "Sec-WebSocket-Key";
pub const HEADER_SEC_PROTOCOL: &str = "Sec-WebSocket-Protocol";
pub const HEADER_SEC_EXTENSIONS: &str = "Sec-WebSocket-Extensions";
pub const HEADER_SEC_ACCEPT: &str = "Sec-WebSocket-Accept";

pub const UPGRADE_VALUE: &str = "websocket";
pub const CONNECTION_VALUE: &str = "Upgrade";
