mod codec;
mod streams;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fedsender_core::{
	Result, Server, debug, debug_warn, err, info, trace,
	utils::{self, backoff_delay},
	warn,
};
use serde::de::DeserializeOwned;
use tokio::{
	io::AsyncWriteExt,
	net::{TcpStream, tcp::OwnedWriteHalf},
	time::{Instant, MissedTickBehavior, interval, sleep, sleep_until},
};

use self::codec::{ClientCommand, LineFramer, ServerCommand};
use self::streams::Streams;
pub use self::streams::StreamUpdate;

/// Long-lived client of the upstream replication protocol: keeps one TCP
/// link subscribed, reassembles batched row delivery, and fans flushed
/// updates out to typed per-stream subscribers.
pub struct Service {
	server: Arc<Server>,
	streams: Streams,
}

/// Link state, in connection order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LinkState {
	Disconnected,
	Resolving,
	Connected,
	Named,
	Ready,
}

enum SessionEnd {
	Shutdown,
	Lost { error: fedsender_core::Error, was_ready: bool },
}

impl Service {
	pub fn build(server: &Arc<Server>) -> Result<Arc<Self>> {
		Ok(Arc::new(Self { server: server.clone(), streams: Streams::new() }))
	}

	/// Subscribe to a replication stream, decoding rows as `T`. Must be
	/// called before the worker establishes the link.
	pub fn subscribe<T>(&self, stream: &str) -> loole::Receiver<StreamUpdate<T>>
	where
		T: DeserializeOwned + Send + 'static,
	{
		self.streams.subscribe(stream)
	}

	async fn session(&self, state: &mut LinkState) -> Result<SessionEnd> {
		let config = &self.server.config;

		*state = LinkState::Resolving;
		let link = match TcpStream::connect((
			config.replication_host.as_str(),
			config.replication_port,
		))
		.await
		{
			| Ok(link) => link,
			| Err(e) =>
				return Ok(SessionEnd::Lost { error: e.into(), was_ready: false }),
		};

		*state = LinkState::Connected;
		debug!(
			host = %config.replication_host,
			port = %config.replication_port,
			"replication link established"
		);

		let (reader, mut writer) = link.into_split();
		let mut framer = LineFramer::new(reader);

		let name = ClientCommand::Name(config.client_name.clone());
		if let Err(error) = send_command(&mut writer, &name).await {
			return Ok(SessionEnd::Lost { error, was_ready: false });
		}

		*state = LinkState::Named;
		for (stream, position) in self.streams.subscriptions() {
			let replicate = ClientCommand::Replicate { stream, position };
			if let Err(error) = send_command(&mut writer, &replicate).await {
				return Ok(SessionEnd::Lost { error, was_ready: false });
			}
		}

		let liveness = Duration::from_secs(config.liveness_timeout);
		let mut ping = interval(Duration::from_secs(config.ping_interval));
		ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut last_rx = Instant::now();
		loop {
			let was_ready = *state == LinkState::Ready;
			tokio::select! {
				() = self.server.until_shutdown() => return Ok(SessionEnd::Shutdown),

				_ = ping.tick(), if was_ready => {
					let ping = ClientCommand::Ping(utils::millis_since_unix_epoch());
					if let Err(error) = send_command(&mut writer, &ping).await {
						return Ok(SessionEnd::Lost { error, was_ready });
					}
				},

				() = sleep_until(last_rx + liveness) => {
					let error = err!(Replication("no traffic for {liveness:?}"));
					return Ok(SessionEnd::Lost { error, was_ready });
				},

				line = framer.next_line() => {
					last_rx = Instant::now();
					let line = match line {
						| Err(error) => return Ok(SessionEnd::Lost { error, was_ready }),
						| Ok(None) => {
							let error = err!(Replication("connection closed by server"));
							return Ok(SessionEnd::Lost { error, was_ready });
						},
						| Ok(Some(line)) => line,
					};

					match ServerCommand::parse(&line) {
						| Err(e) => debug_warn!("ignoring malformed line: {e}"),
						| Ok(ServerCommand::Error(text)) if was_ready => {
							let error = err!(Replication("server error: {text}"));
							return Ok(SessionEnd::Lost { error, was_ready });
						},
						| Ok(ServerCommand::Error(text)) => {
							// refused during the handshake: unrecoverable
							return Err(err!(Replication(
								"server refused replication: {text}"
							)));
						},
						| Ok(command) => {
							if *state == LinkState::Named {
								*state = LinkState::Ready;
								debug!("replication link ready");
							}

							self.handle_command(command);
						},
					}
				},
			}
		}
	}

	fn handle_command(&self, command: ServerCommand) {
		match command {
			| ServerCommand::Server(name) => info!(%name, "replicating from server"),
			| ServerCommand::Ping(payload) => trace!(%payload, "server ping"),
			| ServerCommand::RData { stream, position, row } =>
				self.streams.handle_rdata(&stream, &position, &row),
			| ServerCommand::Position { stream, position } =>
				self.streams.handle_position(&stream, &position),
			| ServerCommand::Error(_) => unreachable!("handled by the session loop"),
		}
	}
}

#[async_trait]
impl crate::Service for Service {
	async fn worker(self: Arc<Self>) -> Result {
		let reconnect_base = Duration::from_secs(1);
		let reconnect_cap = Duration::from_secs(self.server.config.reconnect_backoff_cap);

		let mut state = LinkState::Disconnected;
		let mut failures: u32 = 0;
		while self.server.running() {
			match self.session(&mut state).await {
				| Ok(SessionEnd::Shutdown) => break,
				| Ok(SessionEnd::Lost { error, was_ready }) => {
					if was_ready {
						failures = 0;
					}

					failures = failures.saturating_add(1);
					let delay = backoff_delay(reconnect_base, reconnect_cap, failures);
					warn!("replication link lost: {error}; reconnecting in {delay:?}");

					state = LinkState::Disconnected;
					tokio::select! {
						() = sleep(delay) => {},
						() = self.server.until_shutdown() => break,
					}
				},
				| Err(e) => {
					self.streams.close();
					return Err(e);
				},
			}
		}

		self.streams.close();
		Ok(())
	}

	async fn interrupt(&self) { self.streams.close(); }

	fn name(&self) -> &'static str { crate::service::make_name(std::module_path!()) }
}

async fn send_command(writer: &mut OwnedWriteHalf, command: &ClientCommand) -> Result {
	trace!(%command, "sending");
	writer
		.write_all(format!("{command}\n").as_bytes())
		.await?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::Value as JsonValue;
	use tokio::{
		io::{AsyncReadExt, AsyncWriteExt},
		net::TcpListener,
	};

	use super::Service;
	use crate::{Service as _, test_utils};

	async fn listener_and_service(listener: &TcpListener) -> Arc<Service> {
		let port = listener.local_addr().unwrap().port();
		let server = test_utils::server(&format!(
			r#"
				server_name = "origin.example"
				replication_port = {port}
				liveness_timeout = 60
			"#,
		));

		Service::build(&server).unwrap()
	}

	#[tokio::test]
	async fn handshake_sends_name_then_subscriptions() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let service = listener_and_service(&listener).await;
		let updates = service.subscribe::<JsonValue>("events");

		let worker = tokio::spawn(service.clone().worker());

		let (mut socket, _) = listener.accept().await.unwrap();
		let mut lines = String::new();
		let mut buf = vec![0_u8; 256];
		while !lines.contains("REPLICATE events -1\n") {
			let n = socket.read(&mut buf).await.unwrap();
			assert!(n > 0, "client closed during handshake");
			lines.push_str(&String::from_utf8_lossy(&buf[..n]));
		}

		assert!(lines.starts_with("NAME NETCORESynapseReplication\n"));

		socket
			.write_all(b"SERVER origin.example\nRDATA events 5 {\"a\":1}\n")
			.await
			.unwrap();

		let update = updates.recv_async().await.unwrap();
		assert_eq!(update.position, "5");

		service.server.shutdown().unwrap();
		worker.await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn error_during_handshake_is_fatal() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let service = listener_and_service(&listener).await;
		let _updates = service.subscribe::<JsonValue>("events");

		let worker = tokio::spawn(service.clone().worker());

		let (mut socket, _) = listener.accept().await.unwrap();
		socket
			.write_all(b"ERROR unknown client name\n")
			.await
			.unwrap();

		let result = worker.await.unwrap();
		assert!(result.is_err(), "handshake refusal ends the worker");
	}
}
