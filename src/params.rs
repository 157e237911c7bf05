//! Parameter table: logical names, wire codes and value domains.
//!
//! The unit exposes every readable/controllable attribute as a short code
//! (`Pow`, `SetTem`, ...). Status polls enumerate the whole table, and typed
//! setters validate against it before anything is put on the wire.

use crate::error::{GreeError, Result};
use log::warn;
use std::collections::HashMap;
use std::ops::RangeInclusive;

pub const POWER: &str = "Pow";
pub const MODE: &str = "Mod";
pub const TARGET_TEMPERATURE: &str = "SetTem";
pub const TEMPERATURE_UNIT: &str = "TemUn";
pub const ROOM_TEMPERATURE: &str = "TemSen";
pub const FAN_SPEED: &str = "WdSpd";
pub const FRESH_AIR: &str = "Air";
pub const X_FAN: &str = "Blo";
pub const HEALTH: &str = "Health";
pub const SLEEP: &str = "SwhSlp";
pub const LIGHT: &str = "Lig";
pub const HORIZONTAL_SWING: &str = "SwingLfRig";
pub const VERTICAL_SWING: &str = "SwUpDn";
pub const QUIET: &str = "Quiet";
pub const TURBO: &str = "Tur";
pub const STEADY_HEAT: &str = "StHt";
pub const HEAT_COOL_TYPE: &str = "HeatCoolType";
pub const TEMPERATURE_RECORD: &str = "TemRec";
pub const ENERGY_SAVING: &str = "SvSt";

define_wire_enum! {
    /// Operating mode (`Mod`).
    Mode {
        Auto = (0, "auto"),
        Cool = (1, "cool"),
        Dry = (2, "dry"),
        Fan = (3, "fan"),
        Heat = (4, "heat"),
    }
}

define_wire_enum! {
    /// Fan speed (`WdSpd`).
    FanSpeed {
        Auto = (0, "auto"),
        Low = (1, "low"),
        MediumLow = (2, "medium-low"),
        Medium = (3, "medium"),
        MediumHigh = (4, "medium-high"),
        High = (5, "high"),
    }
}

define_wire_enum! {
    /// Vertical louver position or sweep (`SwUpDn`).
    VerticalSwing {
        Default = (0, "default"),
        Full = (1, "full"),
        FixedTop = (2, "fixed-top"),
        FixedMidTop = (3, "fixed-mid-top"),
        FixedMid = (4, "fixed-mid"),
        FixedMidBottom = (5, "fixed-mid-bottom"),
        FixedBottom = (6, "fixed-bottom"),
        SwingBottom = (7, "swing-bottom"),
        SwingMidBottom = (8, "swing-mid-bottom"),
        SwingMid = (9, "swing-mid"),
        SwingMidTop = (10, "swing-mid-top"),
        SwingTop = (11, "swing-top"),
    }
}

impl VerticalSwing {
    /// True for positions where the louver does not move.
    pub fn is_fixed(self) -> bool {
        matches!(
            self,
            VerticalSwing::Default
                | VerticalSwing::FixedTop
                | VerticalSwing::FixedMidTop
                | VerticalSwing::FixedMid
                | VerticalSwing::FixedMidBottom
                | VerticalSwing::FixedBottom
        )
    }
}

define_wire_enum! {
    /// Unit for `SetTem` (`TemUn`).
    TemperatureUnit {
        Celsius = (0, "celsius"),
        Fahrenheit = (1, "fahrenheit"),
    }
}

/// Values a parameter may take when written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueDomain {
    /// Inclusive numeric range
    Range(RangeInclusive<i64>),
    /// One of an explicit set of codes
    OneOf(Vec<i64>),
    /// Reported by the unit only
    ReadOnly,
}

impl ValueDomain {
    fn switch() -> Self {
        ValueDomain::Range(0..=1)
    }

    fn codes(values: &[impl Copy + Into<i64>]) -> Self {
        ValueDomain::OneOf(values.iter().map(|&v| v.into()).collect())
    }

    pub fn accepts(&self, value: i64) -> bool {
        match self {
            ValueDomain::Range(r) => r.contains(&value),
            ValueDomain::OneOf(values) => values.contains(&value),
            ValueDomain::ReadOnly => false,
        }
    }
}

/// One entry of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub code: String,
    pub domain: ValueDomain,
}

impl Parameter {
    pub fn new(name: impl Into<String>, code: impl Into<String>, domain: ValueDomain) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            domain,
        }
    }
}

/// Ordered set of parameters, looked up by wire code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterTable {
    params: Vec<Parameter>,
    by_code: HashMap<String, usize>,
}

impl ParameterTable {
    /// Build a table from `entries`. A repeated code replaces the earlier
    /// entry in place, so every code is polled once.
    pub fn new(entries: Vec<Parameter>) -> Self {
        let mut params: Vec<Parameter> = Vec::with_capacity(entries.len());
        let mut by_code: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        for param in entries {
            match by_code.get(&param.code) {
                Some(&i) => {
                    warn!("Duplicate parameter code {}, keeping the last definition", param.code);
                    params[i] = param;
                }
                None => {
                    by_code.insert(param.code.clone(), params.len());
                    params.push(param);
                }
            }
        }
        Self { params, by_code }
    }

    pub fn get(&self, code: &str) -> Option<&Parameter> {
        self.by_code.get(code).map(|&i| &self.params[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// All wire codes in table order, as enumerated by a status poll.
    pub fn codes(&self) -> Vec<String> {
        self.params.iter().map(|p| p.code.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Check a command before it is encoded.
    ///
    /// Codes missing from the table are let through untouched so callers can
    /// drive attributes the table does not describe.
    pub fn validate(&self, codes: &[String], values: &[i64]) -> Result<()> {
        if codes.len() != values.len() {
            return Err(GreeError::InvalidArgument(format!(
                "{} codes but {} values",
                codes.len(),
                values.len()
            )));
        }
        if codes.is_empty() {
            return Err(GreeError::InvalidArgument("empty command".into()));
        }
        for (code, &value) in codes.iter().zip(values) {
            if let Some(param) = self.get(code)
                && !param.domain.accepts(value)
            {
                return Err(GreeError::InvalidArgument(match param.domain {
                    ValueDomain::ReadOnly => format!("{} ({}) is read-only", param.name, code),
                    _ => format!("{} is not a valid value for {} ({})", value, param.name, code),
                }));
            }
        }
        Ok(())
    }
}

impl Default for ParameterTable {
    fn default() -> Self {
        let target_range = ValueDomain::Range(16..=30);
        Self::new(vec![
            Parameter::new("power", POWER, ValueDomain::switch()),
            Parameter::new("mode", MODE, ValueDomain::codes(Mode::ALL)),
            Parameter::new("temperature", TARGET_TEMPERATURE, target_range),
            Parameter::new(
                "temperatureUnit",
                TEMPERATURE_UNIT,
                ValueDomain::codes(TemperatureUnit::ALL),
            ),
            Parameter::new("roomTemperature", ROOM_TEMPERATURE, ValueDomain::ReadOnly),
            Parameter::new("fanSpeed", FAN_SPEED, ValueDomain::codes(FanSpeed::ALL)),
            Parameter::new("air", FRESH_AIR, ValueDomain::Range(0..=3)),
            Parameter::new("blow", X_FAN, ValueDomain::switch()),
            Parameter::new("health", HEALTH, ValueDomain::switch()),
            Parameter::new("sleep", SLEEP, ValueDomain::switch()),
            Parameter::new("lights", LIGHT, ValueDomain::switch()),
            Parameter::new("swingHor", HORIZONTAL_SWING, ValueDomain::Range(0..=6)),
            Parameter::new(
                "swingVert",
                VERTICAL_SWING,
                ValueDomain::codes(VerticalSwing::ALL),
            ),
            Parameter::new("quiet", QUIET, ValueDomain::Range(0..=2)),
            Parameter::new("turbo", TURBO, ValueDomain::switch()),
            Parameter::new("steadyHeat", STEADY_HEAT, ValueDomain::switch()),
            Parameter::new("heatCoolType", HEAT_COOL_TYPE, ValueDomain::ReadOnly),
            Parameter::new("temperatureRecord", TEMPERATURE_RECORD, ValueDomain::switch()),
            Parameter::new("energySaving", ENERGY_SAVING, ValueDomain::switch()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_polls_every_code_once() {
        let table = ParameterTable::default();
        let codes = table.codes();
        assert_eq!(codes.len(), table.len());
        assert_eq!(codes[0], POWER);
        assert!(codes.iter().any(|c| c == VERTICAL_SWING));
        let mut dedup = codes.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), codes.len());
    }

    #[test]
    fn validate_checks_domains() {
        let table = ParameterTable::default();
        assert!(table.validate(&[POWER.into()], &[1]).is_ok());
        assert!(table.validate(&[POWER.into()], &[2]).is_err());
        assert!(table.validate(&[TARGET_TEMPERATURE.into()], &[31]).is_err());
        assert!(table.validate(&[MODE.into()], &[Mode::Heat.code()]).is_ok());
        assert!(table.validate(&[ROOM_TEMPERATURE.into()], &[20]).is_err());
    }

    #[test]
    fn validate_rejects_mismatched_and_empty_commands() {
        let table = ParameterTable::default();
        assert!(table.validate(&[POWER.into(), MODE.into()], &[1]).is_err());
        assert!(table.validate(&[], &[]).is_err());
    }

    #[test]
    fn repeated_codes_are_polled_once() {
        let table = ParameterTable::new(vec![
            Parameter::new("power", POWER, ValueDomain::switch()),
            Parameter::new("mode", MODE, ValueDomain::codes(Mode::ALL)),
            Parameter::new("temperature", TARGET_TEMPERATURE, ValueDomain::Range(16..=30)),
            Parameter::new("mode", MODE, ValueDomain::Range(0..=1)),
        ]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.codes(), vec![POWER, MODE, TARGET_TEMPERATURE]);
        assert_eq!(table.get(MODE).unwrap().domain, ValueDomain::Range(0..=1));
        assert!(table.validate(&[MODE.into()], &[4]).is_err());
    }

    #[test]
    fn unknown_codes_pass_through() {
        let table = ParameterTable::default();
        assert!(table.validate(&["Dmod".into()], &[42]).is_ok());
    }

    #[test]
    fn wire_enums_round_trip_codes() {
        assert_eq!(Mode::try_from(4).unwrap(), Mode::Heat);
        assert!(Mode::try_from(9).is_err());
        assert_eq!(FanSpeed::from_code(0), Some(FanSpeed::Auto));
        assert!(VerticalSwing::FixedMid.is_fixed());
        assert!(!VerticalSwing::Full.is_fixed());
        assert_eq!(TemperatureUnit::Fahrenheit.to_string(), "fahrenheit");
    }
}
