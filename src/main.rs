use std::{process::ExitCode, time::Duration};

use clap::Parser;
use nfc_presence::{
	config::{BrokerOptions, ScanOptions},
	controller::{stop_signal, Controller, StopHandle},
	impls::{MqttPublisher, PcscReader},
	publisher::Publisher as _,
	Error,
};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Publish the identifier of the NFC tag on a reader, and its removal, to an MQTT topic.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
	/// Name of the reader to open.
	device: String,

	/// Topic to publish presence events on.
	topic: String,

	/// MQTT broker host.
	#[arg(long, default_value = "localhost")]
	broker_host: String,

	/// MQTT broker port.
	#[arg(long, default_value_t = 1883)]
	broker_port: u16,

	/// MQTT client identifier.
	#[arg(long, default_value = "nfc-scanner")]
	client_id: String,

	/// MQTT keep-alive interval, in seconds.
	#[arg(long, default_value_t = 60)]
	keep_alive: u64,

	/// Times each modulation is polled before a poll gives up.
	#[arg(long, default_value_t = 20)]
	poll_attempts: u8,

	/// Time between poll attempts, in units of 150 ms.
	#[arg(long, default_value_t = 2)]
	poll_period: u8,

	/// Pages of tag memory to read, counting from page 0.
	#[arg(long, default_value_t = 45)]
	page_limit: u8,
}

impl Args {
	fn broker_options(&self) -> BrokerOptions {
		BrokerOptions::new(&self.broker_host, self.broker_port)
			.with_client_id(&self.client_id)
			.with_keep_alive(Duration::from_secs(self.keep_alive))
	}

	fn scan_options(&self) -> ScanOptions {
		ScanOptions::default()
			.with_poll_attempts(self.poll_attempts)
			.with_poll_period(self.poll_period)
			.with_page_limit(self.page_limit)
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("nfc_presence=debug")),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let args = Args::parse();
	match run(args).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			tracing::error!(%err, "exiting");
			ExitCode::FAILURE
		}
	}
}

async fn run(args: Args) -> Result<(), Error> {
	let (handle, stop) = stop_signal();
	tokio::spawn(stop_on_signal(handle));

	let mut publisher = MqttPublisher::connect(&args.broker_options());

	let reader = match PcscReader::open(&args.device) {
		Ok(reader) => reader,
		Err(source) => {
			publisher.close().await;
			return Err(Error::Setup {
				device: args.device,
				source,
			});
		}
	};
	tracing::info!(device = %args.device, topic = %args.topic, "reader opened and initialised");

	Controller::new(reader, publisher, &args.topic, args.scan_options(), stop)
		.run()
		.await
}

async fn stop_on_signal(handle: StopHandle) {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		match signal(SignalKind::terminate()) {
			Ok(mut terminate) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {}
					_ = terminate.recv() => {}
				}
			}
			Err(err) => {
				tracing::warn!(%err, "cannot listen for SIGTERM");
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}

	#[cfg(not(unix))]
	let _ = tokio::signal::ctrl_c().await;

	tracing::info!("stop requested");
	handle.stop();
}
