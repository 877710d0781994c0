//! Typed view of a single mower, as last reported by the Automower Connect API.
//!
//! Wire documents are converted into a [`MowerSnapshot`] once, when the mower list is fetched,
//! and then kept current by merging websocket events into it with [`MowerSnapshot::apply`].

use crate::schemas::automower::JsonApiData;
use crate::schemas::websocket::Event;

/// Declares an enumeration of vendor string constants.
///
/// Values the API reports that are not listed end up in `Other` verbatim, so that they can still
/// be passed through to the attributes.
macro_rules! vendor_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $wire:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
        #[serde(from = "String")]
        pub(crate) enum $name {
            $($variant,)*
            Other(String),
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($wire => Self::$variant,)*
                    _ => Self::Other(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_owned())
            }
        }

        impl $name {
            pub(crate) fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)*
                    Self::Other(value) => value,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vendor_enum! {
    MowerState {
        Paused = "PAUSED",
        WaitUpdating = "WAIT_UPDATING",
        WaitPowerUp = "WAIT_POWER_UP",
        Restricted = "RESTRICTED",
        InOperation = "IN_OPERATION",
        Off = "OFF",
        Stopped = "STOPPED",
        Error = "ERROR",
        FatalError = "FATAL_ERROR",
        ErrorAtPowerUp = "ERROR_AT_POWER_UP",
        NotApplicable = "NOT_APPLICABLE",
        Unknown = "UNKNOWN",
    }
}

vendor_enum! {
    MowerActivity {
        ParkedInCs = "PARKED_IN_CS",
        Charging = "CHARGING",
        Mowing = "MOWING",
        Leaving = "LEAVING",
        GoingHome = "GOING_HOME",
        StoppedInGarden = "STOPPED_IN_GARDEN",
        Unknown = "UNKNOWN",
        NotApplicable = "NOT_APPLICABLE",
    }
}

vendor_enum! {
    /// Why the planner keeps the mower parked. Only meaningful in [`MowerState::Restricted`].
    RestrictedReason {
        WeekSchedule = "WEEK_SCHEDULE",
        ParkOverride = "PARK_OVERRIDE",
        Sensor = "SENSOR",
        DailyLimit = "DAILY_LIMIT",
        NotApplicable = "NOT_APPLICABLE",
    }
}

impl MowerState {
    /// The three states in which `error_code` describes a current fault.
    pub(crate) fn is_fault(&self) -> bool {
        matches!(self, Self::Error | Self::FatalError | Self::ErrorAtPowerUp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Mower {
    pub(crate) state: MowerState,
    pub(crate) activity: MowerActivity,
    pub(crate) mode: String,
    pub(crate) error_code: Option<u16>,
    /// Milliseconds since the Unix epoch.
    pub(crate) error_code_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Planner {
    /// Milliseconds since the Unix epoch, `0` if nothing is scheduled.
    pub(crate) next_start_timestamp: i64,
    pub(crate) restricted_reason: RestrictedReason,
    pub(crate) override_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MowerSnapshot {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) connected: bool,
    pub(crate) mower: Mower,
    /// As reported; not guaranteed to be within `0..=100`.
    pub(crate) battery_percent: i64,
    pub(crate) planner: Planner,
}

impl From<JsonApiData> for MowerSnapshot {
    fn from(datum: JsonApiData) -> Self {
        let data = datum.attributes;
        Self {
            id: datum.id,
            name: data.system.name,
            connected: data.metadata.connected,
            mower: Mower {
                state: data.mower.state,
                activity: data.mower.activity,
                mode: data.mower.mode,
                error_code: data.mower.error_code,
                error_code_timestamp: data.mower.error_code_timestamp,
            },
            battery_percent: data.battery.battery_percent,
            planner: Planner {
                next_start_timestamp: data.planner.next_start_timestamp,
                restricted_reason: data.planner.restricted_reason,
                override_action: data.planner.r#override.map(|o| o.action),
            },
        }
    }
}

impl MowerSnapshot {
    /// Merge a websocket event into the snapshot.
    ///
    /// Returns `true` if the event carried anything the translator looks at. Fields absent from
    /// the event keep their previous value.
    pub(crate) fn apply(&mut self, event: Event) -> bool {
        match event {
            Event::BatteryEventV2 { attributes: a, .. } => {
                let Some(pct) = a.battery.and_then(|b| b.battery_percent) else {
                    return false;
                };
                self.battery_percent = pct;
                true
            }
            Event::MowerEventV2 { attributes: a, .. } => {
                let Some(mower) = a.mower else { return false };
                if let Some(state) = mower.state {
                    self.mower.state = state;
                }
                if let Some(activity) = mower.activity {
                    self.mower.activity = activity;
                }
                if let Some(mode) = mower.mode {
                    self.mower.mode = mode;
                }
                if mower.error_code.is_some() {
                    self.mower.error_code = mower.error_code;
                }
                if mower.error_code_timestamp.is_some() {
                    self.mower.error_code_timestamp = mower.error_code_timestamp;
                }
                true
            }
            Event::PlannerEventV2 { attributes: a, .. } => {
                let Some(planner) = a.planner else {
                    return false;
                };
                if let Some(t) = planner.next_start_timestamp {
                    self.planner.next_start_timestamp = t;
                }
                if let Some(reason) = planner.restricted_reason {
                    self.planner.restricted_reason = reason;
                }
                if let Some(o) = planner.r#override {
                    self.planner.override_action = Some(o.action);
                }
                true
            }
            Event::CalendarEventV2 { .. }
            | Event::CuttingHeightEventV2 { .. }
            | Event::HeadlightsEventV2 { .. }
            | Event::MessageEventV2 { .. }
            | Event::PositionEventV2 { .. } => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A docked, charging mower with nothing scheduled.
    pub(crate) fn snapshot() -> MowerSnapshot {
        MowerSnapshot {
            id: "c7233734-b219-4287-a173-08e3643f89f0".into(),
            name: "Rasmus".into(),
            connected: true,
            mower: Mower {
                state: MowerState::InOperation,
                activity: MowerActivity::Charging,
                mode: "MAIN_AREA".into(),
                error_code: None,
                error_code_timestamp: None,
            },
            battery_percent: 57,
            planner: Planner {
                next_start_timestamp: 0,
                restricted_reason: RestrictedReason::NotApplicable,
                override_action: Some("NOT_ACTIVE".into()),
            },
        }
    }

    #[test]
    fn unlisted_values_are_kept_verbatim() {
        let state = MowerState::from("IN_SERVICE");
        assert_eq!(state, MowerState::Other("IN_SERVICE".into()));
        assert_eq!(state.as_str(), "IN_SERVICE");
        assert_eq!(MowerActivity::from("GOING_HOME"), MowerActivity::GoingHome);
        assert_eq!(RestrictedReason::from("SENSOR").to_string(), "SENSOR");
    }

    #[test]
    fn deserializes_from_vendor_strings() {
        let state: MowerState = serde_json::from_str(r#""ERROR_AT_POWER_UP""#).unwrap();
        assert_eq!(state, MowerState::ErrorAtPowerUp);
        assert!(state.is_fault());
        assert!(!MowerState::Stopped.is_fault());
    }

    #[test]
    fn converts_mower_list_entry() {
        let document = r#"{
            "type": "mower",
            "id": "c7233734-b219-4287-a173-08e3643f89f0",
            "attributes": {
                "system": { "name": "Rasmus", "model": "450XH", "serialNumber": 192401442 },
                "battery": { "batteryPercent": 104 },
                "mower": {
                    "mode": "MAIN_AREA",
                    "activity": "PARKED_IN_CS",
                    "state": "RESTRICTED",
                    "errorCode": 0,
                    "errorCodeTimestamp": 0
                },
                "planner": {
                    "nextStartTimestamp": 1717394400000,
                    "override": { "action": "NOT_ACTIVE" },
                    "restrictedReason": "WEEK_SCHEDULE"
                },
                "metadata": { "connected": true, "statusTimestamp": 1717300000000 }
            }
        }"#;
        let datum: JsonApiData = serde_json::from_str(document).unwrap();
        let snapshot = MowerSnapshot::from(datum);
        assert_eq!(snapshot.name, "Rasmus");
        assert_eq!(snapshot.battery_percent, 104);
        assert_eq!(snapshot.mower.state, MowerState::Restricted);
        assert_eq!(snapshot.mower.activity, MowerActivity::ParkedInCs);
        assert_eq!(snapshot.planner.next_start_timestamp, 1717394400000);
        assert_eq!(snapshot.planner.restricted_reason, RestrictedReason::WeekSchedule);
        assert_eq!(snapshot.planner.override_action.as_deref(), Some("NOT_ACTIVE"));
    }

    #[test]
    fn events_only_touch_fields_they_carry() {
        let mut s = snapshot();
        let event: Event = serde_json::from_str(
            r#"{"type":"mower-event-v2","id":"x","attributes":{"mower":{"activity":"LEAVING"}}}"#,
        )
        .unwrap();
        assert!(s.apply(event));
        assert_eq!(s.mower.activity, MowerActivity::Leaving);
        assert_eq!(s.mower.state, MowerState::InOperation);
        assert_eq!(s.mower.mode, "MAIN_AREA");

        let event: Event = serde_json::from_str(
            r#"{"type":"planner-event-v2","id":"x","attributes":{"planner":{"nextStartTimestamp":42}}}"#,
        )
        .unwrap();
        assert!(s.apply(event));
        assert_eq!(s.planner.next_start_timestamp, 42);
        assert_eq!(s.planner.override_action.as_deref(), Some("NOT_ACTIVE"));

        let event: Event = serde_json::from_str(
            r#"{"type":"battery-event-v2","id":"x","attributes":{"battery":{"batteryPercent":-5}}}"#,
        )
        .unwrap();
        assert!(s.apply(event));
        assert_eq!(s.battery_percent, -5);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let mut s = snapshot();
        let event: Event = serde_json::from_str(
            r#"{"type":"position-event-v2","id":"x","attributes":{"position":{"latitude":57.7,"longitude":14.1}}}"#,
        )
        .unwrap();
        assert!(!s.apply(event));
        assert_eq!(s, snapshot());
    }
}
