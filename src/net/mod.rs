pub mod assembler;
pub mod framing;
pub mod handshake;
pub mod mask;
pub mod message;
pub mod tcp_opt;
pub mod tls_client;
pub mod transport;
pub mod ws_client;
