use std::fmt;

use bytes::{Buf, BytesMut};
use fedsender_core::{Result, err};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Yields complete `\n`-terminated lines from a byte stream. Records split
/// across reads and multiple records per read are both handled; a trailing
/// `\r` is tolerated and empty lines are discarded. The newline is
/// authoritative; nothing is inferred from read boundaries.
pub(crate) struct LineFramer<R> {
	reader: R,
	buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
	pub(crate) fn new(reader: R) -> Self {
		Self { reader, buffer: BytesMut::with_capacity(8192) }
	}

	/// The next complete line, or `None` on a clean end of stream.
	pub(crate) async fn next_line(&mut self) -> Result<Option<String>> {
		loop {
			if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
				let mut line = self.buffer.split_to(pos.saturating_add(1));
				line.truncate(pos);
				if line.last() == Some(&b'\r') {
					line.truncate(pos.saturating_sub(1));
				}

				if line.is_empty() {
					continue;
				}

				return Ok(Some(String::from_utf8(line.to_vec())?));
			}

			let read = self.reader.read_buf(&mut self.buffer).await?;
			if read == 0 {
				if !self.buffer.is_empty() {
					self.buffer.advance(self.buffer.len());
					return Err(err!(Replication("stream ended mid-record")));
				}

				return Ok(None);
			}
		}
	}
}

/// Commands this client writes to the replication server.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ClientCommand {
	/// Identify; sent immediately on connect.
	Name(String),
	/// Subscribe to a stream; position `"-1"` means "latest".
	Replicate { stream: String, position: String },
	/// Keepalive with an opaque payload.
	Ping(u64),
}

impl fmt::Display for ClientCommand {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| Self::Name(client) => write!(f, "NAME {client}"),
			| Self::Replicate { stream, position } => {
				write!(f, "REPLICATE {stream} {position}")
			},
			| Self::Ping(payload) => write!(f, "PING {payload}"),
		}
	}
}

/// Commands the replication server writes to this client. Trailing fields
/// may contain spaces and are taken verbatim up to end-of-line.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ServerCommand {
	Server(String),
	RData { stream: String, position: String, row: String },
	Position { stream: String, position: String },
	Ping(String),
	Error(String),
}

impl ServerCommand {
	pub(crate) fn parse(line: &str) -> Result<Self> {
		let (command, rest) = line
			.split_once(' ')
			.unwrap_or((line, ""));

		match command {
			| "SERVER" => Ok(Self::Server(rest.to_owned())),
			| "RDATA" => {
				let mut fields = rest.splitn(3, ' ');
				match (fields.next(), fields.next(), fields.next()) {
					| (Some(stream), Some(position), Some(row)) => Ok(Self::RData {
						stream: stream.to_owned(),
						position: position.to_owned(),
						row: row.to_owned(),
					}),
					| _ => Err(err!(Replication("malformed RDATA: {line:?}"))),
				}
			},
			| "POSITION" => {
				let mut fields = rest.splitn(2, ' ');
				match (fields.next(), fields.next()) {
					| (Some(stream), Some(position)) if !position.is_empty() =>
						Ok(Self::Position {
							stream: stream.to_owned(),
							position: position.to_owned(),
						}),
					| _ => Err(err!(Replication("malformed POSITION: {line:?}"))),
				}
			},
			| "PING" => Ok(Self::Ping(rest.to_owned())),
			| "ERROR" => Ok(Self::Error(rest.to_owned())),
			| _ => Err(err!(Replication("unknown command: {line:?}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::AsyncWriteExt;

	use super::{ClientCommand, LineFramer, ServerCommand};

	#[tokio::test]
	async fn lines_split_across_reads_are_reassembled() {
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut framer = LineFramer::new(rx);

		tx.write_all(b"RDATA events ba").await.unwrap();
		tx.write_all(b"tch {\"a\":1}\nPING 12").await.unwrap();
		tx.write_all(b"3\n").await.unwrap();
		drop(tx);

		assert_eq!(
			framer.next_line().await.unwrap().as_deref(),
			Some("RDATA events batch {\"a\":1}"),
		);
		assert_eq!(framer.next_line().await.unwrap().as_deref(), Some("PING 123"));
		assert_eq!(framer.next_line().await.unwrap(), None);
	}

	#[tokio::test]
	async fn multiple_records_per_read_and_empty_lines() {
		let (mut tx, rx) = tokio::io::duplex(256);
		let mut framer = LineFramer::new(rx);

		tx.write_all(b"SERVER origin.example\r\n\nPING 1\n")
			.await
			.unwrap();
		drop(tx);

		assert_eq!(
			framer.next_line().await.unwrap().as_deref(),
			Some("SERVER origin.example"),
		);
		assert_eq!(framer.next_line().await.unwrap().as_deref(), Some("PING 1"));
		assert_eq!(framer.next_line().await.unwrap(), None);
	}

	#[tokio::test]
	async fn eof_mid_record_is_an_error() {
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut framer = LineFramer::new(rx);

		tx.write_all(b"RDATA events 5").await.unwrap();
		drop(tx);

		assert!(framer.next_line().await.is_err());
	}

	#[test]
	fn server_commands_parse() {
		assert_eq!(
			ServerCommand::parse("RDATA events batch {\"a\": 1}").unwrap(),
			ServerCommand::RData {
				stream: "events".to_owned(),
				position: "batch".to_owned(),
				row: "{\"a\": 1}".to_owned(),
			},
		);

		assert_eq!(
			ServerCommand::parse("POSITION events 57").unwrap(),
			ServerCommand::Position {
				stream: "events".to_owned(),
				position: "57".to_owned(),
			},
		);

		assert_eq!(
			ServerCommand::parse("ERROR subscription refused: no such stream").unwrap(),
			ServerCommand::Error("subscription refused: no such stream".to_owned()),
		);

		assert!(ServerCommand::parse("BOGUS hello").is_err());
		assert!(ServerCommand::parse("RDATA events").is_err());
	}

	#[test]
	fn client_commands_format() {
		assert_eq!(
			ClientCommand::Name("NETCORESynapseReplication".to_owned()).to_string(),
			"NAME NETCORESynapseReplication",
		);
		assert_eq!(
			ClientCommand::Replicate {
				stream: "events".to_owned(),
				position: "-1".to_owned(),
			}
			.to_string(),
			"REPLICATE events -1",
		);
		assert_eq!(ClientCommand::Ping(123).to_string(), "PING 123");
	}
}
