//! DSMR P1 to MQTT bridge
//!
//! Reads plain or encrypted P1 smart meter telegrams forwarded over
//! MQTT, decodes them and publishes the metered values back to the
//! broker.

pub mod config;
pub mod metering_dsmr;
pub mod mqtt;
pub mod obis_utils;

// Re-export common types for easier access
pub use config::CONFIG;
pub use metering_dsmr::DsmrManager;
pub use mqtt::{CALLBACKS, MeteringData};

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap().as_secs();
}

pub fn get_id(protocol: &str, meter_name: &str) -> String {
    return format!("{}-{}-{:?}", protocol, meter_name, get_unix_ts());
}
