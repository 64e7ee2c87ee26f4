//! Sparse power state of a smart plug.
//!
//! Every field is optional. In an update, an absent field leaves that setting
//! untouched on the device; in a reply, an absent field means the device did
//! not report it. Absent fields are omitted from the serialized form entirely.
//!
//! # Example
//!
//! ```
//! use broadlink_core::PowerState;
//!
//! // Switch outlet 1 on without touching outlet 2 or the brightness.
//! let update = PowerState::new().with_pwr1(true);
//! assert_eq!(update.to_json().unwrap(), r#"{"pwr1":1}"#);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Power state of a smart plug.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerState {
    /// Master switch (1 = on, 0 = off).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwr: Option<u8>,

    /// Outlet 1 (1 = on, 0 = off).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwr1: Option<u8>,

    /// Outlet 2 (1 = on, 0 = off).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pwr2: Option<u8>,

    /// Maximum run time limit for the master switch, 0 = unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxworktime: Option<u32>,

    /// Maximum run time limit for outlet 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxworktime1: Option<u32>,

    /// Maximum run time limit for outlet 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxworktime2: Option<u32>,

    /// Indicator LED brightness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idcbrightness: Option<u32>,
}

fn flag(on: bool) -> Option<u8> {
    Some(u8::from(on))
}

impl PowerState {
    /// Creates an empty state. Sent as an update it changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Master switch on.
    pub fn all_on() -> Self {
        Self::new().with_pwr(true)
    }

    /// Master switch off.
    pub fn all_off() -> Self {
        Self::new().with_pwr(false)
    }

    /// Outlet 1 on, everything else untouched.
    pub fn pwr1_on() -> Self {
        Self::new().with_pwr1(true)
    }

    /// Outlet 1 off, everything else untouched.
    pub fn pwr1_off() -> Self {
        Self::new().with_pwr1(false)
    }

    /// Outlet 2 on, everything else untouched.
    pub fn pwr2_on() -> Self {
        Self::new().with_pwr2(true)
    }

    /// Outlet 2 off, everything else untouched.
    pub fn pwr2_off() -> Self {
        Self::new().with_pwr2(false)
    }

    /// Sets the master switch.
    pub fn with_pwr(mut self, on: bool) -> Self {
        self.pwr = flag(on);
        self
    }

    /// Sets outlet 1.
    pub fn with_pwr1(mut self, on: bool) -> Self {
        self.pwr1 = flag(on);
        self
    }

    /// Sets outlet 2.
    pub fn with_pwr2(mut self, on: bool) -> Self {
        self.pwr2 = flag(on);
        self
    }

    /// Sets the master run time limit.
    pub fn with_maxworktime(mut self, limit: u32) -> Self {
        self.maxworktime = Some(limit);
        self
    }

    /// Sets the outlet 1 run time limit.
    pub fn with_maxworktime1(mut self, limit: u32) -> Self {
        self.maxworktime1 = Some(limit);
        self
    }

    /// Sets the outlet 2 run time limit.
    pub fn with_maxworktime2(mut self, limit: u32) -> Self {
        self.maxworktime2 = Some(limit);
        self
    }

    /// Sets the indicator brightness.
    pub fn with_idcbrightness(mut self, brightness: u32) -> Self {
        self.idcbrightness = Some(brightness);
        self
    }

    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Serializes the set fields as compact JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON state document. Missing fields stay unset.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("pwr", self.pwr.map(u32::from)),
            ("pwr1", self.pwr1.map(u32::from)),
            ("pwr2", self.pwr2.map(u32::from)),
            ("maxworktime", self.maxworktime),
            ("maxworktime1", self.maxworktime1),
            ("maxworktime2", self.maxworktime2),
            ("idcbrightness", self.idcbrightness),
        ];

        let mut first = true;
        for (name, value) in fields {
            if let Some(value) = value {
                if !first {
                    f.write_str(" ")?;
                }
                write!(f, "{}:{}", name, value)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_set_fields_serialize() {
        let json = PowerState::pwr1_on().to_json().unwrap();
        assert_eq!(json, r#"{"pwr1":1}"#);
    }

    #[test]
    fn test_empty_state_serializes_to_empty_object() {
        assert_eq!(PowerState::new().to_json().unwrap(), "{}");
        assert!(PowerState::new().is_empty());
    }

    #[test]
    fn test_field_names_and_order() {
        let state = PowerState::new()
            .with_idcbrightness(50)
            .with_pwr2(false)
            .with_maxworktime1(30);
        assert_eq!(
            state.to_json().unwrap(),
            r#"{"pwr2":0,"maxworktime1":30,"idcbrightness":50}"#
        );
    }

    #[test]
    fn test_missing_fields_stay_unset() {
        let state = PowerState::from_json(br#"{"pwr":1,"idcbrightness":76}"#).unwrap();
        assert_eq!(state.pwr, Some(1));
        assert_eq!(state.idcbrightness, Some(76));
        assert_eq!(state.pwr1, None);
        assert_eq!(state.maxworktime2, None);
    }

    #[test]
    fn test_zero_is_distinct_from_absent() {
        let state = PowerState::from_json(br#"{"pwr2":0}"#).unwrap();
        assert_eq!(state.pwr2, Some(0));
        assert!(!state.is_empty());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let state = PowerState::from_json(br#"{"pwr":0,"ntlight":1}"#).unwrap();
        assert_eq!(state, PowerState::all_off());
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        let err = PowerState::from_json(b"{\"pwr\":").unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_display_lists_present_fields() {
        let state = PowerState::all_on().with_pwr2(false).with_idcbrightness(76);
        assert_eq!(state.to_string(), "pwr:1 pwr2:0 idcbrightness:76");
        assert_eq!(PowerState::new().to_string(), "");
    }
}
