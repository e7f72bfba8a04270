use std::{
	collections::HashMap,
	sync::{Mutex, RwLock},
};

use fedsender_core::{debug_warn, error};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// Sentinel position marking the continuation of an open row group.
pub(crate) const BATCH_POSITION: &str = "batch";

/// A flushed group of homogeneous rows for one logical stream. `position`
/// is the stream's new cursor, an opaque monotonic token.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamUpdate<T> {
	pub position: String,
	pub rows: Vec<T>,
}

type Dispatcher = Box<dyn Fn(&str, Vec<JsonValue>) + Send + Sync>;

/// Demultiplexes the replication link onto typed per-stream subscriptions.
///
/// Each subscription registers a decoder chosen at subscription time; rows
/// arriving for that stream are decoded and delivered as one
/// [`StreamUpdate`] per flushed batch. Rows with `batch` positions buffer
/// until a positioned row closes the group.
#[derive(Default)]
pub(crate) struct Streams {
	registry: RwLock<HashMap<String, Dispatcher>>,
	pending: Mutex<HashMap<String, Vec<JsonValue>>>,
	cursors: Mutex<HashMap<String, String>>,
}

impl Streams {
	pub(crate) fn new() -> Self { Self::default() }

	/// Subscribe to `stream`, decoding each row as `T`. Rows failing to
	/// decode are logged and skipped rather than wedging the stream.
	pub(crate) fn subscribe<T>(&self, stream: &str) -> loole::Receiver<StreamUpdate<T>>
	where
		T: DeserializeOwned + Send + 'static,
	{
		let (sender, receiver) = loole::unbounded();
		let name = stream.to_owned();
		let dispatcher: Dispatcher = Box::new(move |position, rows| {
			let rows = rows
				.into_iter()
				.filter_map(|row| {
					serde_json::from_value(row)
						.inspect_err(|e| error!(stream = %name, "undecodable row: {e}"))
						.ok()
				})
				.collect();

			sender
				.send(StreamUpdate { position: position.to_owned(), rows })
				.ok();
		});

		self.registry
			.write()
			.expect("locked")
			.insert(stream.to_owned(), dispatcher);

		receiver
	}

	/// Streams to subscribe on (re)connect, with the position to resume
	/// from; `"-1"` requests the latest.
	pub(crate) fn subscriptions(&self) -> Vec<(String, String)> {
		let cursors = self.cursors.lock().expect("locked");
		self.registry
			.read()
			.expect("locked")
			.keys()
			.map(|stream| {
				let position = cursors
					.get(stream)
					.cloned()
					.unwrap_or_else(|| "-1".to_owned());

				(stream.clone(), position)
			})
			.collect()
	}

	pub(crate) fn handle_rdata(&self, stream: &str, position: &str, row: &str) {
		let row: JsonValue = match serde_json::from_str(row) {
			| Ok(row) => row,
			| Err(e) => {
				debug_warn!(%stream, "dropping undecodable RDATA row: {e}");
				return;
			},
		};

		if position == BATCH_POSITION {
			self.pending
				.lock()
				.expect("locked")
				.entry(stream.to_owned())
				.or_default()
				.push(row);

			return;
		}

		let mut rows = self
			.pending
			.lock()
			.expect("locked")
			.remove(stream)
			.unwrap_or_default();

		rows.push(row);
		self.flush(stream, position, rows);
	}

	pub(crate) fn handle_position(&self, stream: &str, position: &str) {
		// authoritative cursor; any open batch for the stream is stale
		self.pending.lock().expect("locked").remove(stream);
		self.flush(stream, position, Vec::new());
	}

	fn flush(&self, stream: &str, position: &str, rows: Vec<JsonValue>) {
		self.cursors
			.lock()
			.expect("locked")
			.insert(stream.to_owned(), position.to_owned());

		if let Some(dispatcher) = self.registry.read().expect("locked").get(stream) {
			dispatcher(position, rows);
		}
	}

	/// Drop all subscriptions; receivers observe closed channels.
	pub(crate) fn close(&self) { self.registry.write().expect("locked").clear(); }
}
