//! Veil Proto - Share-Link Descriptors
//!
//! Turns proxy share links into a canonical [`ServerDescriptor`].
//!
//! # Supported Schemes
//!
//! ```text
//! vless://<uuid>@<host>:<port>?type=ws&security=tls#Name
//! vmess://<base64 JSON>
//! trojan://<password>@<host>[:<port>]?sni=...#Name
//! ss://<base64(method:password)>@<host>:<port>#Name
//! ss://<method>:<password>@<host>:<port>#Name
//! ```
//!
//! Parsing is pure apart from stamping a fresh id and creation time
//! onto each descriptor.

mod descriptor;
mod encoding;
mod parse;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

pub use descriptor::{new_id, Protocol, ServerDescriptor};
pub use encoding::{decode_base64, Base64Error};
pub use parse::{parse_uri, ParseError};
