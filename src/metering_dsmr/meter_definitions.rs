use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::obis_utils::ObisId;

use super::parser;
use super::structs::{FieldKind, FieldValue, Parsed, ParseError, ParseErrorKind, ParseResult};
use super::utils;

/// M-Bus channels the meter reports its slave devices on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbusChannels {
    pub gas: u8,
    pub water: u8,
    pub thermal: u8,
    pub sub: u8,
}

impl Default for MbusChannels {
    fn default() -> Self {
        return MbusChannels {
            gas: 1,
            water: 2,
            thermal: 3,
            sub: 4,
        };
    }
}

/// One standard field a meter may report.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub obis: ObisId,
    pub kind: FieldKind,
}

impl FieldDef {
    /// The textual code custom sensor overrides are matched against.
    /// The identification line has no OBIS code and uses a fixed key.
    pub fn code(&self) -> String {
        if self.obis == ObisId::IDENTIFICATION {
            return "identification".to_string();
        }
        return self.obis.to_string();
    }
}

fn raw(name: &'static str, obis: [u8; 6]) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::Raw };
}

fn string(name: &'static str, obis: [u8; 6], min: usize, max: usize) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::Str { min, max } };
}

fn timestamp(name: &'static str, obis: [u8; 6]) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::Timestamp };
}

fn fixed(name: &'static str, obis: [u8; 6], unit: &'static str, int_unit: &'static str) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::Fixed { unit, int_unit } };
}

fn ts_fixed(name: &'static str, obis: [u8; 6], unit: &'static str, int_unit: &'static str) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::TimestampedFixed { unit, int_unit } };
}

fn last_fixed(name: &'static str, obis: [u8; 6], unit: &'static str, int_unit: &'static str) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::LastFixed { unit, int_unit } };
}

fn int(name: &'static str, obis: [u8; 6], unit: &'static str) -> FieldDef {
    return FieldDef { name, obis: ObisId(obis), kind: FieldKind::Int { unit } };
}

/// All standard DSMR fields, including the Luxembourg, Belgium and
/// Swiss channel variants and the M-Bus slave slots.
fn standard_fields(channels: &MbusChannels) -> Vec<FieldDef> {
    let gas = channels.gas;
    let water = channels.water;
    let thermal = channels.thermal;
    let sub = channels.sub;

    return vec![
        raw("identification", [255, 255, 255, 255, 255, 255]),
        string("p1_version", [1, 3, 0, 2, 8, 255], 2, 2),
        string("p1_version_be", [0, 0, 96, 1, 4, 255], 2, 96),
        timestamp("timestamp", [0, 0, 1, 0, 0, 255]),
        string("equipment_id", [0, 0, 96, 1, 1, 255], 0, 96),
        fixed("energy_delivered_lux", [1, 0, 1, 8, 0, 255], "kWh", "Wh"),
        fixed("energy_delivered_tariff1", [1, 0, 1, 8, 1, 255], "kWh", "Wh"),
        fixed("energy_delivered_tariff2", [1, 0, 1, 8, 2, 255], "kWh", "Wh"),
        fixed("energy_delivered_tariff3", [1, 0, 1, 8, 3, 255], "kWh", "Wh"),
        fixed("energy_delivered_tariff4", [1, 0, 1, 8, 4, 255], "kWh", "Wh"),
        fixed("reactive_energy_delivered_tariff1", [1, 0, 3, 8, 1, 255], "kvarh", "kvarh"),
        fixed("reactive_energy_delivered_tariff2", [1, 0, 3, 8, 2, 255], "kvarh", "kvarh"),
        fixed("reactive_energy_delivered_tariff3", [1, 0, 3, 8, 3, 255], "kvarh", "kvarh"),
        fixed("reactive_energy_delivered_tariff4", [1, 0, 3, 8, 4, 255], "kvarh", "kvarh"),
        fixed("energy_delivered_tariff1_ch", [1, 1, 1, 8, 1, 255], "kWh", "Wh"),
        fixed("energy_delivered_tariff2_ch", [1, 1, 1, 8, 2, 255], "kWh", "Wh"),
        fixed("energy_returned_lux", [1, 0, 2, 8, 0, 255], "kWh", "Wh"),
        fixed("energy_returned_tariff1", [1, 0, 2, 8, 1, 255], "kWh", "Wh"),
        fixed("energy_returned_tariff2", [1, 0, 2, 8, 2, 255], "kWh", "Wh"),
        fixed("energy_returned_tariff3", [1, 0, 2, 8, 3, 255], "kWh", "Wh"),
        fixed("energy_returned_tariff4", [1, 0, 2, 8, 4, 255], "kWh", "Wh"),
        fixed("reactive_energy_returned_tariff1", [1, 0, 4, 8, 1, 255], "kvarh", "kvarh"),
        fixed("reactive_energy_returned_tariff2", [1, 0, 4, 8, 2, 255], "kvarh", "kvarh"),
        fixed("reactive_energy_returned_tariff3", [1, 0, 4, 8, 3, 255], "kvarh", "kvarh"),
        fixed("reactive_energy_returned_tariff4", [1, 0, 4, 8, 4, 255], "kvarh", "kvarh"),
        fixed("energy_returned_tariff1_ch", [1, 1, 2, 8, 1, 255], "kWh", "Wh"),
        fixed("energy_returned_tariff2_ch", [1, 1, 2, 8, 2, 255], "kWh", "Wh"),
        fixed("total_imported_energy", [1, 0, 3, 8, 0, 255], "kvarh", "kvarh"),
        fixed("total_exported_energy", [1, 0, 4, 8, 0, 255], "kvarh", "kvarh"),
        string("electricity_tariff", [0, 0, 96, 14, 0, 255], 4, 4),
        fixed("power_delivered", [1, 0, 1, 7, 0, 255], "kW", "W"),
        fixed("power_returned", [1, 0, 2, 7, 0, 255], "kW", "W"),
        fixed("reactive_power_delivered", [1, 0, 3, 7, 0, 255], "kvar", "kvar"),
        fixed("reactive_power_returned", [1, 0, 4, 7, 0, 255], "kvar", "kvar"),
        fixed("power_delivered_ch", [1, 1, 1, 7, 0, 255], "kW", "W"),
        fixed("power_returned_ch", [1, 1, 2, 7, 0, 255], "kW", "W"),
        fixed("electricity_threshold", [0, 0, 17, 0, 0, 255], "kW", "W"),
        int("electricity_switch_position", [0, 0, 96, 3, 10, 255], ""),
        int("electricity_failures", [0, 0, 96, 7, 21, 255], ""),
        int("electricity_long_failures", [0, 0, 96, 7, 9, 255], ""),
        raw("electricity_failure_log", [1, 0, 99, 97, 0, 255]),
        int("electricity_sags_l1", [1, 0, 32, 32, 0, 255], ""),
        int("voltage_sag_time_l1", [1, 0, 32, 33, 0, 255], "s"),
        int("voltage_sag_l1", [1, 0, 32, 34, 0, 255], "V"),
        int("electricity_sags_l2", [1, 0, 52, 32, 0, 255], ""),
        int("voltage_sag_time_l2", [1, 0, 52, 33, 0, 255], "s"),
        int("voltage_sag_l2", [1, 0, 52, 34, 0, 255], "V"),
        int("electricity_sags_l3", [1, 0, 72, 32, 0, 255], ""),
        int("voltage_sag_time_l3", [1, 0, 72, 33, 0, 255], "s"),
        int("voltage_sag_l3", [1, 0, 72, 34, 0, 255], "V"),
        int("electricity_swells_l1", [1, 0, 32, 36, 0, 255], ""),
        int("voltage_swell_time_l1", [1, 0, 32, 37, 0, 255], "s"),
        int("voltage_swell_l1", [1, 0, 32, 38, 0, 255], "V"),
        int("electricity_swells_l2", [1, 0, 52, 36, 0, 255], ""),
        int("voltage_swell_time_l2", [1, 0, 52, 37, 0, 255], "s"),
        int("voltage_swell_l2", [1, 0, 52, 38, 0, 255], "V"),
        int("electricity_swells_l3", [1, 0, 72, 36, 0, 255], ""),
        int("voltage_swell_time_l3", [1, 0, 72, 37, 0, 255], "s"),
        int("voltage_swell_l3", [1, 0, 72, 38, 0, 255], "V"),
        string("message_short", [0, 0, 96, 13, 1, 255], 0, 16),
        string("message_long", [0, 0, 96, 13, 0, 255], 0, 2048),
        fixed("voltage_l1", [1, 0, 32, 7, 0, 255], "V", "mV"),
        fixed("voltage_avg_l1", [1, 0, 32, 24, 0, 255], "V", "mV"),
        fixed("voltage_l2", [1, 0, 52, 7, 0, 255], "V", "mV"),
        fixed("voltage_avg_l2", [1, 0, 52, 24, 0, 255], "V", "mV"),
        fixed("voltage_l3", [1, 0, 72, 7, 0, 255], "V", "mV"),
        fixed("voltage_avg_l3", [1, 0, 72, 24, 0, 255], "V", "mV"),
        fixed("voltage", [1, 0, 12, 7, 0, 255], "V", "mV"),
        fixed("frequency", [1, 0, 14, 7, 0, 255], "kHz", "Hz"),
        fixed("abs_power", [1, 0, 15, 7, 0, 255], "kW", "W"),
        fixed("current_l1", [1, 0, 31, 7, 0, 255], "A", "mA"),
        fixed("current_fuse_l1", [1, 0, 31, 4, 0, 255], "A", "mA"),
        fixed("current_l2", [1, 0, 51, 7, 0, 255], "A", "mA"),
        fixed("current_fuse_l2", [1, 0, 51, 4, 0, 255], "A", "mA"),
        fixed("current_l3", [1, 0, 71, 7, 0, 255], "A", "mA"),
        fixed("current_fuse_l3", [1, 0, 71, 4, 0, 255], "A", "mA"),
        fixed("current", [1, 0, 11, 7, 0, 255], "A", "mA"),
        fixed("current_n", [1, 0, 91, 7, 0, 255], "A", "mA"),
        fixed("current_sum", [1, 0, 90, 7, 0, 255], "A", "mA"),
        fixed("power_delivered_l1", [1, 0, 21, 7, 0, 255], "kW", "W"),
        fixed("power_delivered_l2", [1, 0, 41, 7, 0, 255], "kW", "W"),
        fixed("power_delivered_l3", [1, 0, 61, 7, 0, 255], "kW", "W"),
        fixed("power_returned_l1", [1, 0, 22, 7, 0, 255], "kW", "W"),
        fixed("power_returned_l2", [1, 0, 42, 7, 0, 255], "kW", "W"),
        fixed("power_returned_l3", [1, 0, 62, 7, 0, 255], "kW", "W"),
        fixed("reactive_power_delivered_l1", [1, 0, 23, 7, 0, 255], "kvar", "kvar"),
        fixed("reactive_power_delivered_l2", [1, 0, 43, 7, 0, 255], "kvar", "kvar"),
        fixed("reactive_power_delivered_l3", [1, 0, 63, 7, 0, 255], "kvar", "kvar"),
        fixed("reactive_power_returned_l1", [1, 0, 24, 7, 0, 255], "kvar", "kvar"),
        fixed("reactive_power_returned_l2", [1, 0, 44, 7, 0, 255], "kvar", "kvar"),
        fixed("reactive_power_returned_l3", [1, 0, 64, 7, 0, 255], "kvar", "kvar"),
        fixed("apparent_delivery_power", [1, 0, 9, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_delivery_power_l1", [1, 0, 29, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_delivery_power_l2", [1, 0, 49, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_delivery_power_l3", [1, 0, 69, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_return_power", [1, 0, 10, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_return_power_l1", [1, 0, 30, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_return_power_l2", [1, 0, 50, 7, 0, 255], "kVA", "VA"),
        fixed("apparent_return_power_l3", [1, 0, 70, 7, 0, 255], "kVA", "VA"),
        fixed("active_demand_power", [1, 0, 1, 24, 0, 255], "kW", "W"),
        fixed("active_demand_abs", [1, 0, 15, 24, 0, 255], "kW", "W"),
        int("gas_device_type", [0, gas, 24, 1, 0, 255], ""),
        string("gas_equipment_id", [0, gas, 96, 1, 0, 255], 0, 96),
        string("gas_equipment_id_be", [0, gas, 96, 1, 1, 255], 0, 96),
        int("gas_valve_position", [0, gas, 24, 4, 0, 255], ""),
        ts_fixed("gas_delivered", [0, gas, 24, 2, 1, 255], "m3", "dm3"),
        ts_fixed("gas_delivered_be", [0, gas, 24, 2, 3, 255], "m3", "dm3"),
        raw("gas_delivered_text", [0, gas, 24, 3, 0, 255]),
        int("thermal_device_type", [0, thermal, 24, 1, 0, 255], ""),
        string("thermal_equipment_id", [0, thermal, 96, 1, 0, 255], 0, 96),
        int("thermal_valve_position", [0, thermal, 24, 4, 0, 255], ""),
        ts_fixed("thermal_delivered", [0, thermal, 24, 2, 1, 255], "GJ", "MJ"),
        int("water_device_type", [0, water, 24, 1, 0, 255], ""),
        string("water_equipment_id", [0, water, 96, 1, 0, 255], 0, 96),
        int("water_valve_position", [0, water, 24, 4, 0, 255], ""),
        ts_fixed("water_delivered", [0, water, 24, 2, 1, 255], "m3", "dm3"),
        int("sub_device_type", [0, sub, 24, 1, 0, 255], ""),
        string("sub_equipment_id", [0, sub, 96, 1, 0, 255], 0, 96),
        int("sub_valve_position", [0, sub, 24, 4, 0, 255], ""),
        ts_fixed("sub_delivered", [0, sub, 24, 2, 1, 255], "m3", "dm3"),
        fixed("active_energy_import_current_average_demand", [1, 0, 1, 4, 0, 255], "kW", "W"),
        fixed("active_energy_export_current_average_demand", [1, 0, 2, 4, 0, 255], "kW", "W"),
        fixed("reactive_energy_import_current_average_demand", [1, 0, 3, 4, 0, 255], "kvar", "kvar"),
        fixed("reactive_energy_export_current_average_demand", [1, 0, 4, 4, 0, 255], "kvar", "kvar"),
        fixed("apparent_energy_import_current_average_demand", [1, 0, 9, 4, 0, 255], "kVA", "VA"),
        fixed("apparent_energy_export_current_average_demand", [1, 0, 10, 4, 0, 255], "kVA", "VA"),
        fixed("active_energy_import_last_completed_demand", [1, 0, 1, 5, 0, 255], "kW", "W"),
        fixed("active_energy_export_last_completed_demand", [1, 0, 2, 5, 0, 255], "kW", "W"),
        fixed("reactive_energy_import_last_completed_demand", [1, 0, 3, 5, 0, 255], "kvar", "kvar"),
        fixed("reactive_energy_export_last_completed_demand", [1, 0, 4, 5, 0, 255], "kvar", "kvar"),
        fixed("apparent_energy_import_last_completed_demand", [1, 0, 9, 5, 0, 255], "kVA", "VA"),
        fixed("apparent_energy_export_last_completed_demand", [1, 0, 10, 5, 0, 255], "kVA", "VA"),
        ts_fixed("active_energy_import_maximum_demand_running_month", [1, 0, 1, 6, 0, 255], "kW", "W"),
        last_fixed("active_energy_import_maximum_demand_last_13_months", [0, 0, 98, 1, 0, 255], "kW", "W"),
        fixed("fw_core_version", [1, 0, 0, 2, 0, 255], "", ""),
        string("fw_core_checksum", [1, 0, 0, 2, 8, 255], 0, 8),
        fixed("fw_module_version", [1, 1, 0, 2, 0, 255], "", ""),
        string("fw_module_checksum", [1, 1, 0, 2, 8, 255], 0, 8),
    ];
}

/// The standard field table plus a publish-enable flag per field.
/// Custom sensors can take over a field's OBIS code, which keeps the
/// field parsing but drops it from the published values.
pub struct DsmrRegistry {
    defs: Vec<FieldDef>,
    index: HashMap<ObisId, usize>,
    enabled: Vec<bool>,
}

impl DsmrRegistry {
    pub fn new(channels: &MbusChannels) -> Self {
        let defs = standard_fields(channels);
        let mut index = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            /* When channel ids collide the first definition wins */
            index.entry(def.obis).or_insert(i);
        }
        let enabled = vec![true; defs.len()];
        return DsmrRegistry { defs, index, enabled };
    }

    pub fn defs(&self) -> &[FieldDef] {
        return &self.defs;
    }

    pub fn find(&self, id: &ObisId) -> Option<usize> {
        return self.index.get(id).copied();
    }

    pub fn is_enabled(&self, idx: usize) -> bool {
        return self.enabled[idx];
    }

    /// Disables standard publication of the field whose textual code
    /// matches and returns its name, if any.
    pub fn disable_code(&mut self, code: &str) -> Option<&'static str> {
        for (i, def) in self.defs.iter().enumerate() {
            if def.code() == code {
                self.enabled[i] = false;
                return Some(def.name);
            }
        }
        return None;
    }
}

/// The values one telegram carried, slot for slot parallel to the
/// registry definitions.
#[derive(Debug, Clone)]
pub struct TelegramData {
    slots: Vec<Option<FieldValue>>,
}

impl TelegramData {
    pub fn new(registry: &DsmrRegistry) -> Self {
        return TelegramData {
            slots: vec![None; registry.defs().len()],
        };
    }

    /// Parses the value at `pos` for the field at `idx` and stores it.
    /// Each field may appear at most once per telegram.
    pub fn set_field(
        &mut self,
        registry: &DsmrRegistry,
        idx: usize,
        telegram: &[u8],
        pos: usize,
        end: usize,
    ) -> ParseResult<()> {
        if self.slots[idx].is_some() {
            return Err(ParseError::new(ParseErrorKind::DuplicateField, pos));
        }
        let parsed = parser::parse_field(&registry.defs()[idx].kind, telegram, pos, end)?;
        self.slots[idx] = Some(parsed.value);
        return Ok(Parsed {
            value: (),
            next: parsed.next,
        });
    }

    pub fn get_by_index(&self, idx: usize) -> Option<&FieldValue> {
        return self.slots.get(idx).and_then(|slot| slot.as_ref());
    }

    pub fn get(&self, registry: &DsmrRegistry, name: &str) -> Option<&FieldValue> {
        let idx = registry.defs().iter().position(|def| def.name == name)?;
        return self.get_by_index(idx);
    }

    /// Whether every known field was seen, for completeness checks.
    pub fn all_present(&self) -> bool {
        return self.slots.iter().all(|slot| slot.is_some());
    }

    /// Unix time the meter stamped the telegram with, when present.
    pub fn metered_time(&self, registry: &DsmrRegistry) -> Option<u64> {
        match self.get(registry, "timestamp") {
            Some(FieldValue::Text(ts)) => return utils::decode_timestamp(ts),
            _ => return None,
        }
    }

    /// Appends all present and still enabled fields to a flat JSON
    /// map: the value under the field name, its unit under
    /// `<name>_unit` and M-Bus reading times under `<name>_timestamp`.
    pub fn append_metered_values(&self, registry: &DsmrRegistry, values: &mut Map<String, Value>) {
        for (idx, def) in registry.defs().iter().enumerate() {
            let Some(value) = self.get_by_index(idx) else {
                continue;
            };
            if !registry.is_enabled(idx) {
                continue;
            }

            match value {
                FieldValue::Text(s) => {
                    values.insert(def.name.to_string(), Value::from(s.clone()));
                }
                FieldValue::Int(v) => {
                    values.insert(def.name.to_string(), Value::from(*v));
                }
                FieldValue::Fixed(v) => {
                    values.insert(def.name.to_string(), Value::from(v.value()));
                }
                FieldValue::TimestampedFixed(v) => {
                    values.insert(def.name.to_string(), Value::from(v.value.value()));
                    values.insert(
                        format!("{}_timestamp", def.name),
                        Value::from(v.timestamp.clone()),
                    );
                }
            }

            if let Some(unit) = def.kind.unit() {
                values.insert(format!("{}_unit", def.name), Value::from(unit));
            }
        }
    }
}
