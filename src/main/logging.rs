use fedsender_core::{Config, Result, err};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};

pub(crate) fn init(config: &Config) -> Result {
	let console_filter = EnvFilter::builder()
		.parse(&config.log)
		.map_err(|e| err!(Config("log", "{e}.")))?;

	let console_layer = fmt::Layer::new()
		.with_ansi(config.log_colors)
		.with_target(true);

	let subscriber = Registry::default().with(console_layer.with_filter(console_filter));

	tracing::subscriber::set_global_default(subscriber)
		.map_err(|e| err!("the global default tracing subscriber failed to initialize: {e}"))
}
