use std::time::{Duration, Instant};

use log::warn;

use crate::config::CustomSensorKind;

/// Numeric changes below this are considered noise.
const FLOAT_TOLERANCE: f64 = 0.001;
/// Unchanged values are still republished this often.
const MIN_PUBLISH_INTERVAL: Duration = Duration::from_millis(5000);

/// One user defined OBIS mapping plus its debounce state.
struct CustomSensor {
    name: String,
    obis_code: String,
    kind: CustomSensorKind,
    last_number: Option<f64>,
    last_text: Option<String>,
    last_publish: Option<Instant>,
}

impl CustomSensor {
    fn process(
        &mut self,
        expression: &str,
        now: Instant,
        tolerance: f64,
        interval: Duration,
    ) -> Option<CustomPublish> {
        match self.kind {
            CustomSensorKind::Numeric => {
                let Some(value) = parse_numeric_value(expression) else {
                    warn!(
                        "Custom sensor {} got a non numeric value {}",
                        self.name, expression
                    );
                    return None;
                };
                if !self.should_publish_number(value, now, tolerance, interval) {
                    return None;
                }
                self.last_number = Some(value);
                self.last_publish = Some(now);
                return Some(CustomPublish {
                    sensor: self.name.clone(),
                    value: CustomValue::Numeric(value),
                });
            }
            CustomSensorKind::Text => {
                let value = parse_text_value(expression);
                if !self.should_publish_text(&value, now, interval) {
                    return None;
                }
                self.last_text = Some(value.clone());
                self.last_publish = Some(now);
                return Some(CustomPublish {
                    sensor: self.name.clone(),
                    value: CustomValue::Text(value),
                });
            }
        }
    }

    fn should_publish_number(
        &self,
        value: f64,
        now: Instant,
        tolerance: f64,
        interval: Duration,
    ) -> bool {
        let Some(last) = self.last_number else {
            return true;
        };
        if (value - last).abs() > tolerance {
            return true;
        }
        return self.interval_elapsed(now, interval);
    }

    fn should_publish_text(&self, value: &str, now: Instant, interval: Duration) -> bool {
        let Some(last) = &self.last_text else {
            return true;
        };
        if last != value {
            return true;
        }
        return self.interval_elapsed(now, interval);
    }

    fn interval_elapsed(&self, now: Instant, interval: Duration) -> bool {
        let Some(last) = self.last_publish else {
            return true;
        };
        return now.duration_since(last) >= interval;
    }
}

/// A value accepted for publication.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomValue {
    Numeric(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomPublish {
    pub sensor: String,
    pub value: CustomValue,
}

/// Routes raw telegram lines to user defined sensors. Matching is by
/// the literal code before the first value group, so codes a meter
/// sends outside the standard tables still reach MQTT.
pub struct CustomSensorRouter {
    sensors: Vec<CustomSensor>,
    min_publish_interval: Duration,
    float_tolerance: f64,
}

impl CustomSensorRouter {
    pub fn new() -> Self {
        return CustomSensorRouter {
            sensors: Vec::new(),
            min_publish_interval: MIN_PUBLISH_INTERVAL,
            float_tolerance: FLOAT_TOLERANCE,
        };
    }

    pub fn with_limits(min_publish_interval: Duration, float_tolerance: f64) -> Self {
        return CustomSensorRouter {
            sensors: Vec::new(),
            min_publish_interval,
            float_tolerance,
        };
    }

    pub fn add_sensor(&mut self, name: &str, obis_code: &str, kind: CustomSensorKind) {
        self.sensors.push(CustomSensor {
            name: name.to_string(),
            obis_code: obis_code.to_string(),
            kind,
            last_number: None,
            last_text: None,
            last_publish: None,
        });
    }

    pub fn is_empty(&self) -> bool {
        return self.sensors.is_empty();
    }

    /// Walks all data lines of a plaintext telegram and returns the
    /// values that passed the per sensor debounce.
    pub fn process_telegram(&mut self, telegram: &[u8], now: Instant) -> Vec<CustomPublish> {
        let mut publishes = Vec::new();
        if self.sensors.is_empty() {
            return publishes;
        }

        let text = String::from_utf8_lossy(telegram);
        for line in text.split(['\r', '\n']) {
            if line.is_empty() {
                continue;
            }
            if line.starts_with('!') {
                break;
            }

            let Some(open) = line.find('(') else {
                continue;
            };
            let Some(close) = line.rfind(')') else {
                continue;
            };
            if close <= open + 1 {
                /* An empty () carries nothing to publish */
                continue;
            }
            let code: String = line[..open].split_whitespace().collect();
            if code.is_empty() {
                continue;
            }
            let expression = &line[open + 1..close];

            for sensor in self.sensors.iter_mut() {
                if sensor.obis_code != code {
                    continue;
                }
                if let Some(publish) = sensor.process(
                    expression,
                    now,
                    self.float_tolerance,
                    self.min_publish_interval,
                ) {
                    publishes.push(publish);
                }
                break;
            }
        }

        return publishes;
    }
}

impl Default for CustomSensorRouter {
    fn default() -> Self {
        return CustomSensorRouter::new();
    }
}

/* "01.193*kW" becomes 1.193, the unit and any whitespace are dropped */
fn parse_numeric_value(expression: &str) -> Option<f64> {
    let mut value = expression;
    if let Some(star) = value.find('*') {
        value = &value[..star];
    }
    if value.starts_with('(') && value.ends_with(')') {
        value = &value[1..value.len() - 1];
    }
    let value: String = value.split_whitespace().collect();
    if value.is_empty() {
        return None;
    }
    return value.parse::<f64>().ok();
}

/* One enclosing pair of parentheses is dropped, anything inside stays */
fn parse_text_value(expression: &str) -> String {
    if expression.starts_with('(') && expression.ends_with(')') {
        return expression[1..expression.len() - 1].to_string();
    }
    return expression.to_string();
}

#[cfg(test)]
mod tests {
    use super::*;

    const TELEGRAM: &[u8] = b"/ABC5\r\n\
        1-0:1.7.0(01.193*kW)\r\n\
        0-0:96.13.0(HELLO)\r\n\
        0-0:96.13.1()\r\n\
        !0000\r\n";

    fn numeric(sensor: &str, value: f64) -> CustomPublish {
        return CustomPublish {
            sensor: sensor.to_string(),
            value: CustomValue::Numeric(value),
        };
    }

    #[test]
    fn test_numeric_sensor_matches_line() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("power", "1-0:1.7.0", CustomSensorKind::Numeric);

        let publishes = router.process_telegram(TELEGRAM, Instant::now());
        assert_eq!(publishes, vec![numeric("power", 1.193)]);
    }

    #[test]
    fn test_text_sensor_keeps_value_verbatim() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("message", "0-0:96.13.0", CustomSensorKind::Text);

        let publishes = router.process_telegram(TELEGRAM, Instant::now());
        assert_eq!(
            publishes,
            vec![CustomPublish {
                sensor: "message".to_string(),
                value: CustomValue::Text("HELLO".to_string()),
            }]
        );
    }

    #[test]
    fn test_empty_group_and_unknown_code_are_skipped() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("empty", "0-0:96.13.1", CustomSensorKind::Text);
        router.add_sensor("unknown", "9-9:9.9.9", CustomSensorKind::Numeric);

        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()), vec![]);
    }

    #[test]
    fn test_first_matching_sensor_wins() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("first", "1-0:1.7.0", CustomSensorKind::Numeric);
        router.add_sensor("second", "1-0:1.7.0", CustomSensorKind::Numeric);

        let publishes = router.process_telegram(TELEGRAM, Instant::now());
        assert_eq!(publishes, vec![numeric("first", 1.193)]);
    }

    #[test]
    fn test_malformed_numeric_value_is_dropped() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("message", "0-0:96.13.0", CustomSensorKind::Numeric);

        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()), vec![]);
    }

    #[test]
    fn test_lines_after_terminator_are_ignored() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("power", "1-0:1.7.0", CustomSensorKind::Numeric);

        let telegram = b"/ABC5\r\n!0000\r\n1-0:1.7.0(99.999*kW)\r\n";
        assert_eq!(router.process_telegram(telegram, Instant::now()), vec![]);
    }

    #[test]
    fn test_unchanged_number_is_debounced() {
        let mut router =
            CustomSensorRouter::with_limits(Duration::from_secs(3600), FLOAT_TOLERANCE);
        router.add_sensor("power", "1-0:1.7.0", CustomSensorKind::Numeric);

        assert_eq!(
            router.process_telegram(TELEGRAM, Instant::now()),
            vec![numeric("power", 1.193)]
        );
        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()), vec![]);

        /* Within tolerance the change still counts as unchanged */
        let wiggle = b"/ABC5\r\n1-0:1.7.0(01.1935*kW)\r\n!0000\r\n";
        assert_eq!(router.process_telegram(wiggle, Instant::now()), vec![]);

        let changed = b"/ABC5\r\n1-0:1.7.0(01.200*kW)\r\n!0000\r\n";
        assert_eq!(
            router.process_telegram(changed, Instant::now()),
            vec![numeric("power", 1.2)]
        );
    }

    #[test]
    fn test_changed_text_is_published() {
        let mut router =
            CustomSensorRouter::with_limits(Duration::from_secs(3600), FLOAT_TOLERANCE);
        router.add_sensor("message", "0-0:96.13.0", CustomSensorKind::Text);

        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()).len(), 1);
        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()), vec![]);

        let changed = b"/ABC5\r\n0-0:96.13.0(BYE)\r\n!0000\r\n";
        assert_eq!(
            router.process_telegram(changed, Instant::now()),
            vec![CustomPublish {
                sensor: "message".to_string(),
                value: CustomValue::Text("BYE".to_string()),
            }]
        );
    }

    #[test]
    fn test_elapsed_interval_republishes_unchanged_value() {
        let mut router = CustomSensorRouter::with_limits(Duration::ZERO, FLOAT_TOLERANCE);
        router.add_sensor("power", "1-0:1.7.0", CustomSensorKind::Numeric);

        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()).len(), 1);
        assert_eq!(router.process_telegram(TELEGRAM, Instant::now()).len(), 1);
    }

    #[test]
    fn test_text_value_drops_one_enclosing_paren_pair() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("display", "0-0:96.13.2", CustomSensorKind::Text);

        let telegram = b"/ABC5\r\n0-0:96.13.2(((A)B))\r\n!0000\r\n";
        assert_eq!(
            router.process_telegram(telegram, Instant::now()),
            vec![CustomPublish {
                sensor: "display".to_string(),
                value: CustomValue::Text("(A)B".to_string()),
            }]
        );
    }

    #[test]
    fn test_numeric_value_ignores_whitespace() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("power", "1-0:1.7.0", CustomSensorKind::Numeric);

        let telegram = b"/ABC5\r\n1-0:1.7.0(1 234.5*kW)\r\n!0000\r\n";
        assert_eq!(
            router.process_telegram(telegram, Instant::now()),
            vec![numeric("power", 1234.5)]
        );
    }

    #[test]
    fn test_code_whitespace_is_ignored_when_matching() {
        let mut router = CustomSensorRouter::new();
        router.add_sensor("power", "1-0:1.7.0", CustomSensorKind::Numeric);

        let telegram = b"/ABC5\r\n1-0: 1.7.0 (01.193*kW)\r\n!0000\r\n";
        assert_eq!(
            router.process_telegram(telegram, Instant::now()),
            vec![numeric("power", 1.193)]
        );
    }
}
