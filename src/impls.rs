#[cfg(feature = "mqtt")]
pub use mqtt_broker::MqttPublisher;
#[cfg(feature = "pcsc")]
pub use pcsc_reader::PcscReader;

pub mod in_memory;

#[cfg(feature = "mqtt")]
mod mqtt_broker;

#[cfg(feature = "pcsc")]
mod pcsc_reader;
