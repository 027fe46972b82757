use lazy_static::lazy_static;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::error::Error;
use std::fs::{self, File};
use std::io::prelude::*;
use std::sync::RwLock;

fn mqtt_client_name_default() -> String { return "p1mqtt".to_string() }

#[derive(Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum CustomSensorKind {
    Numeric,
    Text,
}

/// An extra OBIS code to publish besides the standard fields. When the
/// code matches a standard field the custom sensor replaces it.
#[derive(Deserialize, Serialize, Clone)]
pub struct CustomSensorConfig {
    pub name: String,
    pub obis_code: String,
    pub kind: CustomSensorKind,
}

fn meter_input_topic_default() -> String { return "".to_string() }
fn meter_max_telegram_len_default() -> usize { return 1500 }
fn meter_receive_timeout_ms_default() -> u64 { return 200 }
fn meter_request_interval_ms_default() -> u64 { return 0 }
fn meter_crc_check_default() -> bool { return true }
fn meter_decryption_key_default() -> String { return "".to_string() }
fn meter_publish_telegram_default() -> bool { return false }
fn meter_fail_on_unknown_default() -> bool { return false }
fn meter_gas_mbus_id_default() -> u8 { return 1 }
fn meter_water_mbus_id_default() -> u8 { return 2 }
fn meter_thermal_mbus_id_default() -> u8 { return 3 }
fn meter_sub_mbus_id_default() -> u8 { return 4 }
fn meter_custom_sensors_default() -> Vec<CustomSensorConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone)]
pub struct MeterConfig {
    pub name: String,
    /* Topic below the application prefix the meter bytes arrive on */
    #[serde(default="meter_input_topic_default")]
    pub input_topic: String,
    #[serde(default="meter_max_telegram_len_default")]
    pub max_telegram_len: usize,
    #[serde(default="meter_receive_timeout_ms_default")]
    pub receive_timeout_ms: u64,
    #[serde(default="meter_request_interval_ms_default")]
    pub request_interval_ms: u64,
    #[serde(default="meter_crc_check_default")]
    pub crc_check: bool,
    /* 32 hex characters, or empty for an unencrypted P1 port */
    #[serde(default="meter_decryption_key_default")]
    pub decryption_key: String,
    #[serde(default="meter_publish_telegram_default")]
    pub publish_telegram: bool,
    #[serde(default="meter_fail_on_unknown_default")]
    pub fail_on_unknown: bool,
    #[serde(default="meter_gas_mbus_id_default")]
    pub gas_mbus_id: u8,
    #[serde(default="meter_water_mbus_id_default")]
    pub water_mbus_id: u8,
    #[serde(default="meter_thermal_mbus_id_default")]
    pub thermal_mbus_id: u8,
    #[serde(default="meter_sub_mbus_id_default")]
    pub sub_mbus_id: u8,
    #[serde(default="meter_custom_sensors_default")]
    pub custom_sensors: Vec<CustomSensorConfig>,
}

impl MeterConfig {
    /// The configured input topic, or `<name>/input` when left empty.
    pub fn input_topic(&self) -> String {
        if self.input_topic.is_empty() {
            return format!("{}/input", self.name);
        }
        return self.input_topic.clone();
    }
}

fn meters_default() -> Vec<MeterConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default="meters_default")]
    pub meters: Vec<MeterConfig>,
}

pub struct ConfigHolder {
    pub config: Config,
    pub dirty: bool,
    pub lock: RwLock<bool>,
    pub base_path: String,
}

pub enum ConfigBases {
    Mqtt(MqttConfig),
    Meters(Vec<MeterConfig>),
}

impl ConfigHolder {
    pub fn load() -> Self {

        let mut bpath = "config/".to_string();
        /* Check for the two paths of the config file */
        let mut file = File::open("config/p1mqtt.yaml");
        if file.is_err() {
            file = Ok(File::open("p1mqtt.yaml").expect("Unable to read the config on config/p1mqtt.yaml or p1mqtt.yaml"));
            bpath = "".to_string();
        }

        let mut file = file.unwrap();

        let mut contents = String::new();
        file.read_to_string(&mut contents).expect("Unable to read config file");
        let c: Config = serde_yml::from_str(&contents).expect("Unable to parse config file");
        return ConfigHolder {
            config: c,
            dirty: false,
            lock: RwLock::new(true),
            base_path: bpath,
        }
    }

    pub fn save(&mut self) {
        /* No need to write config if it's not dirty */
        if !self.dirty {
            debug!("Who ever called me, the config is not dirty");
            return;
        }

        let config_path = format!("{}p1mqtt.yaml", self.base_path);
        let backup_path = format!("{}backup.yaml", self.base_path);

        if fs::copy(config_path.clone(), backup_path).is_err() {
            error!("Backing up config failed, not replacing it");
        } else {
            let x = serde_yml::to_string(&self.config).unwrap_or_default();
            match fs::write(config_path, x.as_bytes()) {
                Ok(_) => { info!("New Config written"); self.dirty = false; }
                Err(e) => { error!("Error writing config {e:?}"); }
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        return self.dirty;
    }

    pub fn get_copy(&self, base: &str) -> Result<ConfigBases, Box<dyn Error>> {
        /* Lock against modifications during copy */
        let _lock = self.lock.read().unwrap();

        match base {
            "mqtt" => { return Ok(ConfigBases::Mqtt(self.config.mqtt.clone())) },
            "meters" => { return Ok(ConfigBases::Meters(self.config.meters.clone())) },
            _ => { Err("Type not known")? }
        }
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<ConfigHolder> = RwLock::new(ConfigHolder::load());
}

#[macro_export]
macro_rules! get_config_or_panic {
    ($base: expr, $pat: path) => {
        {
            let c = CONFIG.read().unwrap().get_copy($base).unwrap();
            if let $pat(a) = c { // #1
                a
            } else {
                panic!(
                    "mismatch variant when cast to {}",
                    stringify!($pat)); // #2
            }
        }
    };
}
