use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::config::{ConfigBases, MeterConfig};
use crate::mqtt::{PublishData, SubscribeData, Transmission};
use crate::{get_config_or_panic, get_id, get_unix_ts, MeteringData, CONFIG};

pub mod crypto;
pub mod custom_sensors;
pub mod meter_definitions;
pub mod parser;
pub mod reader;
pub mod structs;
pub mod utils;

use custom_sensors::{CustomSensorRouter, CustomValue};
use meter_definitions::{DsmrRegistry, MbusChannels};
use reader::{DsmrReader, QueueTransport, ReaderSettings};
use structs::FramingError;

/// Meter setup errors, raised before any telegram is read.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsmrError {
    #[error("Decryption key is not valid hex")]
    KeyNotHex,
    #[error("Decryption key must be 16 bytes, got {0}")]
    KeyWrongLength(usize),
}

pub struct DsmrManager {
    sender: Sender<Transmission>,
}

impl DsmrManager {
    pub fn new(sender: Sender<Transmission>) -> Self {
        return DsmrManager { sender: sender };
    }

    /// Spawns one task per configured meter and waits for all of them.
    pub async fn start_thread(&mut self) {
        info!("Starting DSMR thread");
        let meters = get_config_or_panic!("meters", ConfigBases::Meters);

        let mut tasks = Vec::new();
        for meter in meters {
            let sender = self.sender.clone();
            tasks.push(tokio::spawn(async move {
                run_meter(meter, sender).await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn run_meter(meter: MeterConfig, sender: Sender<Transmission>) {
    let key = match utils::decode_decryption_key(&meter.decryption_key) {
        Ok(key) => key,
        Err(e) => {
            error!("Meter {} is misconfigured: {e}", meter.name);
            return;
        }
    };

    let input_topic = meter.input_topic();
    info!(
        "Meter {} listening on {} ({} input, crc check {}, max {} bytes, timeout {} ms, interval {} ms)",
        meter.name,
        input_topic,
        if key.is_some() { "encrypted" } else { "plain" },
        meter.crc_check,
        meter.max_telegram_len,
        meter.receive_timeout_ms,
        meter.request_interval_ms
    );

    let channels = MbusChannels {
        gas: meter.gas_mbus_id,
        water: meter.water_mbus_id,
        thermal: meter.thermal_mbus_id,
        sub: meter.sub_mbus_id,
    };
    let mut registry = DsmrRegistry::new(&channels);

    let mut router = CustomSensorRouter::new();
    for sensor in &meter.custom_sensors {
        match registry.disable_code(&sensor.obis_code) {
            Some(field) => info!(
                "Meter {}: custom sensor {} takes over standard field {}",
                meter.name, sensor.name, field
            ),
            None => info!(
                "Meter {}: custom sensor {} on {}",
                meter.name, sensor.name, sensor.obis_code
            ),
        }
        router.add_sensor(&sensor.name, &sensor.obis_code, sensor.kind);
    }

    let settings = ReaderSettings {
        max_telegram_len: meter.max_telegram_len,
        receive_timeout: Duration::from_millis(meter.receive_timeout_ms),
        request_interval: Duration::from_millis(meter.request_interval_ms),
    };
    let mut reader = DsmrReader::new(QueueTransport::new(), settings, key);

    /* We need to subscribe to an MQTT topic and wait for data to fill our buffers */
    let (tx, mut rx) = tokio::sync::mpsc::channel(10);
    let register = Transmission::Subscribe(SubscribeData {
        topic: input_topic.clone(),
        sender: tx,
    });
    let _ = sender.send(register).await;

    /* Tick often enough for receive timeouts to fire between payloads */
    let poll_ms = meter.receive_timeout_ms.clamp(100, 1000);
    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Meter {} waiting for messages", meter.name);
    loop {
        tokio::select! {
            payload = rx.recv() => {
                let Some(payload) = payload else {
                    info!("Input channel closed, stopping meter {}", meter.name);
                    return;
                };
                feed_payload(&mut reader, key.is_some(), &payload, &meter.name);
            }
            _ = ticker.tick() => {}
        }

        drain_reader(&mut reader, &registry, &mut router, &meter, &sender).await;
    }
}

fn feed_payload(
    reader: &mut DsmrReader<QueueTransport>,
    encrypted: bool,
    payload: &str,
    meter_name: &str,
) {
    if encrypted {
        /* Encrypted frames arrive hex encoded to survive MQTT as text */
        match hex::decode(payload.trim()) {
            Ok(bytes) => reader.transport_mut().feed(&bytes),
            Err(_) => error!("Meter {meter_name}: non hex payload on encrypted input"),
        }
    } else {
        reader.transport_mut().feed(payload.as_bytes());
    }
}

async fn drain_reader(
    reader: &mut DsmrReader<QueueTransport>,
    registry: &DsmrRegistry,
    router: &mut CustomSensorRouter,
    meter: &MeterConfig,
    sender: &Sender<Transmission>,
) {
    loop {
        match reader.poll() {
            Ok(Some(telegram)) => {
                handle_telegram(&telegram, registry, router, meter, sender).await;
            }
            Ok(None) => return,
            Err(FramingError::Timeout) => {
                debug!("Meter {}: reception attempt timed out", meter.name);
            }
            Err(e) => {
                warn!("Meter {}: {e}", meter.name);
            }
        }
    }
}

async fn handle_telegram(
    telegram: &[u8],
    registry: &DsmrRegistry,
    router: &mut CustomSensorRouter,
    meter: &MeterConfig,
    sender: &Sender<Transmission>,
) {
    match parser::parse_telegram(registry, telegram, meter.crc_check, meter.fail_on_unknown) {
        Ok(data) => {
            let mut mr = MeteringData::new();
            mr.id = get_id("dsmr", &meter.name);
            mr.meter_name = meter.name.clone();
            mr.transmission_time = get_unix_ts();
            mr.metered_time = data.metered_time(registry).unwrap_or_else(get_unix_ts);
            data.append_metered_values(registry, &mut mr.metered_values);
            let _ = sender.send(Transmission::Metering(mr)).await;
        }
        Err(e) => {
            warn!(
                "Meter {}: telegram rejected\n{}",
                meter.name,
                utils::render_parse_error(telegram, &e)
            );
        }
    }

    /* Custom sensors see every telegram, rejected ones included */
    for publish in router.process_telegram(telegram, Instant::now()) {
        let payload = match publish.value {
            CustomValue::Numeric(value) => value.to_string(),
            CustomValue::Text(value) => value,
        };
        let publish = PublishData {
            topic: format!("p1mqtt/custom/{}/{}", meter.name, publish.sensor),
            payload,
            qos: 0,
            retain: false,
        };
        let _ = sender.send(Transmission::Publish(publish)).await;
    }

    if meter.publish_telegram {
        let publish = PublishData {
            topic: format!("p1mqtt/telegram/{}", meter.name),
            payload: String::from_utf8_lossy(telegram).to_string(),
            qos: 0,
            retain: false,
        };
        let _ = sender.send(Transmission::Publish(publish)).await;
    }
}
