//! Translation of a [`MowerSnapshot`] into the vocabulary of a vacuum cleaner.
//!
//! Nothing here is cached: every accessor derives its value from the snapshot it is given.

use crate::error_codes;
use crate::snapshot::{MowerActivity, MowerSnapshot, MowerState, RestrictedReason};
use jiff::Zoned;
use jiff::tz::TimeZone;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceState {
    Cleaning,
    Docked,
    Error,
    Idle,
    Paused,
    Returning,
}

impl DeviceState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            DeviceState::Cleaning => "cleaning",
            DeviceState::Docked => "docked",
            DeviceState::Error => "error",
            DeviceState::Idle => "idle",
            DeviceState::Paused => "paused",
            DeviceState::Returning => "returning",
        }
    }
}

struct Rule {
    name: &'static str,
    matches: fn(&MowerSnapshot) -> bool,
    state: DeviceState,
}

/// Evaluated in order, the first rule that matches decides the state.
///
/// State and activity overlap, so the order is significant.
static STATE_RULES: [Rule; 6] = [
    Rule {
        name: "paused",
        matches: is_paused,
        state: DeviceState::Paused,
    },
    Rule {
        name: "waiting",
        matches: is_waiting,
        state: DeviceState::Idle,
    },
    Rule {
        name: "docked",
        matches: is_docked,
        state: DeviceState::Docked,
    },
    Rule {
        name: "mowing",
        matches: is_mowing,
        state: DeviceState::Cleaning,
    },
    Rule {
        name: "going home",
        matches: is_going_home,
        state: DeviceState::Returning,
    },
    Rule {
        name: "inoperable",
        matches: is_inoperable,
        state: DeviceState::Error,
    },
];

fn is_paused(s: &MowerSnapshot) -> bool {
    s.mower.state == MowerState::Paused
}

fn is_waiting(s: &MowerSnapshot) -> bool {
    matches!(
        s.mower.state,
        MowerState::WaitUpdating | MowerState::WaitPowerUp
    )
}

fn is_docked(s: &MowerSnapshot) -> bool {
    s.mower.state == MowerState::Restricted
        || matches!(
            s.mower.activity,
            MowerActivity::ParkedInCs | MowerActivity::Charging
        )
}

fn is_mowing(s: &MowerSnapshot) -> bool {
    matches!(
        s.mower.activity,
        MowerActivity::Mowing | MowerActivity::Leaving
    )
}

fn is_going_home(s: &MowerSnapshot) -> bool {
    s.mower.activity == MowerActivity::GoingHome
}

fn is_inoperable(s: &MowerSnapshot) -> bool {
    matches!(
        s.mower.state,
        MowerState::FatalError
            | MowerState::Error
            | MowerState::ErrorAtPowerUp
            | MowerState::NotApplicable
            | MowerState::Unknown
            | MowerState::Stopped
            | MowerState::Off
    ) || matches!(
        s.mower.activity,
        MowerActivity::StoppedInGarden | MowerActivity::Unknown | MowerActivity::NotApplicable
    )
}

/// Render a date-time the way Homie `datetime` properties expect it.
pub(crate) fn iso8601(time: &Zoned) -> String {
    time.strftime("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// The extra attributes published next to the device state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Attributes<'a> {
    pub(crate) status: String,
    pub(crate) mode: &'a str,
    pub(crate) activity: &'a str,
    pub(crate) state: &'a str,
    pub(crate) error_message: Option<&'static str>,
    pub(crate) error_time: Option<Zoned>,
    pub(crate) next_start: Option<Zoned>,
    pub(crate) action: Option<&'a str>,
    pub(crate) restricted_reason: &'a str,
}

pub(crate) struct StatusTranslator {
    time_zone: TimeZone,
}

impl StatusTranslator {
    /// Date-times are presented in `time_zone`.
    pub(crate) fn new(time_zone: TimeZone) -> Self {
        Self { time_zone }
    }

    pub(crate) fn state(&self, s: &MowerSnapshot) -> DeviceState {
        if let Some(rule) = STATE_RULES.iter().find(|rule| (rule.matches)(s)) {
            tracing::trace!(mower = %s.id, rule = rule.name, "state rule matched");
            return rule.state;
        }
        debug!(
            mower = %s.id,
            state = %s.mower.state,
            activity = %s.mower.activity,
            "no state rule matched, reporting an error"
        );
        DeviceState::Error
    }

    pub(crate) fn battery_level(&self, s: &MowerSnapshot) -> u8 {
        s.battery_percent.clamp(0, 100) as u8
    }

    /// The error message, only while the mower is in the [`DeviceState::Error`] state.
    pub(crate) fn error(&self, s: &MowerSnapshot) -> Option<&'static str> {
        if self.state(s) != DeviceState::Error {
            return None;
        }
        fault_message(s)
    }

    pub(crate) fn status(&self, s: &MowerSnapshot) -> String {
        let next_start = || {
            self.next_start(s)
                .map(|t| t.strftime(", next start: %a %H:%M").to_string())
                .unwrap_or_default()
        };
        match &s.mower.state {
            MowerState::Unknown => "Unknown".into(),
            MowerState::NotApplicable => "Not applicable".into(),
            MowerState::Paused => "Paused".into(),
            MowerState::InOperation => match &s.mower.activity {
                MowerActivity::Unknown => "Unknown".into(),
                MowerActivity::NotApplicable => "Not applicable".into(),
                MowerActivity::Mowing => "Mowing".into(),
                MowerActivity::GoingHome => "Going to charging station".into(),
                MowerActivity::Charging => format!("Charging{}", next_start()),
                MowerActivity::Leaving => "Leaving charging station".into(),
                MowerActivity::ParkedInCs => "Parked".into(),
                MowerActivity::StoppedInGarden => "Stopped".into(),
                MowerActivity::Other(_) => "Unknown".into(),
            },
            MowerState::WaitUpdating => "Updating".into(),
            MowerState::WaitPowerUp => "Powering up".into(),
            MowerState::Restricted => match &s.planner.restricted_reason {
                RestrictedReason::WeekSchedule => format!("Schedule{}", next_start()),
                RestrictedReason::ParkOverride => "Park override".into(),
                RestrictedReason::Sensor => "Weather timer".into(),
                RestrictedReason::DailyLimit => "Daily limit".into(),
                RestrictedReason::NotApplicable => "Parked until further notice".into(),
                RestrictedReason::Other(_) => "Unknown".into(),
            },
            MowerState::Off => "Off".into(),
            MowerState::Stopped => "Stopped".into(),
            MowerState::Error | MowerState::FatalError | MowerState::ErrorAtPowerUp => {
                fault_message(s).unwrap_or_default().into()
            }
            MowerState::Other(_) => "Unknown".into(),
        }
    }

    pub(crate) fn next_start(&self, s: &MowerSnapshot) -> Option<Zoned> {
        match s.planner.next_start_timestamp {
            0 => None,
            t => self.local_time(t),
        }
    }

    pub(crate) fn attributes<'a>(&self, s: &'a MowerSnapshot) -> Attributes<'a> {
        let (error_message, error_time) = if s.mower.state.is_fault() {
            let time = s
                .mower
                .error_code_timestamp
                .and_then(|t| self.local_time(t));
            (fault_message(s), time)
        } else {
            (None, None)
        };
        Attributes {
            status: self.status(s),
            mode: &s.mower.mode,
            activity: s.mower.activity.as_str(),
            state: s.mower.state.as_str(),
            error_message,
            error_time,
            next_start: self.next_start(s),
            action: s.planner.override_action.as_deref(),
            restricted_reason: s.planner.restricted_reason.as_str(),
        }
    }

    fn local_time(&self, millis: i64) -> Option<Zoned> {
        match jiff::Timestamp::from_millisecond(millis) {
            Ok(t) => Some(t.to_zoned(self.time_zone.clone())),
            Err(e) => {
                warn!(
                    millis,
                    error = &e as &dyn std::error::Error,
                    "timestamp out of range"
                );
                None
            }
        }
    }
}

fn fault_message(s: &MowerSnapshot) -> Option<&'static str> {
    s.mower.error_code.and_then(error_codes::message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::snapshot;

    fn translator() -> StatusTranslator {
        StatusTranslator::new(TimeZone::UTC)
    }

    fn with(state: &str, activity: &str) -> MowerSnapshot {
        let mut s = snapshot();
        s.mower.state = state.into();
        s.mower.activity = activity.into();
        s
    }

    const ACTIVITIES: [&str; 9] = [
        "PARKED_IN_CS",
        "CHARGING",
        "MOWING",
        "LEAVING",
        "GOING_HOME",
        "STOPPED_IN_GARDEN",
        "UNKNOWN",
        "NOT_APPLICABLE",
        "SOMETHING_NEW",
    ];

    #[test]
    fn paused_wins_over_any_activity() {
        for activity in ACTIVITIES {
            assert_eq!(
                translator().state(&with("PAUSED", activity)),
                DeviceState::Paused,
                "{activity}"
            );
        }
    }

    #[test]
    fn restricted_is_docked_even_while_mowing() {
        for activity in ACTIVITIES {
            assert_eq!(
                translator().state(&with("RESTRICTED", activity)),
                DeviceState::Docked,
                "{activity}"
            );
        }
    }

    #[test]
    fn rules_apply_in_order() {
        let t = translator();
        assert_eq!(t.state(&with("WAIT_UPDATING", "MOWING")), DeviceState::Idle);
        assert_eq!(t.state(&with("WAIT_POWER_UP", "UNKNOWN")), DeviceState::Idle);
        assert_eq!(t.state(&with("ERROR", "CHARGING")), DeviceState::Docked);
        assert_eq!(t.state(&with("IN_OPERATION", "LEAVING")), DeviceState::Cleaning);
        assert_eq!(t.state(&with("OFF", "MOWING")), DeviceState::Cleaning);
        assert_eq!(t.state(&with("IN_OPERATION", "GOING_HOME")), DeviceState::Returning);
        assert_eq!(t.state(&with("FATAL_ERROR", "SOMETHING_NEW")), DeviceState::Error);
        assert_eq!(t.state(&with("IN_OPERATION", "STOPPED_IN_GARDEN")), DeviceState::Error);
    }

    #[test]
    fn unmatched_snapshot_is_an_error() {
        let s = with("IN_OPERATION", "SOMETHING_NEW");
        assert_eq!(translator().state(&s), DeviceState::Error);
    }

    #[test]
    fn battery_is_clamped() {
        let t = translator();
        let mut s = snapshot();
        for (reported, expected) in [(-5, 0), (150, 100), (57, 57), (0, 0), (100, 100)] {
            s.battery_percent = reported;
            assert_eq!(t.battery_level(&s), expected);
        }
    }

    #[test]
    fn error_only_in_error_state() {
        let t = translator();
        let mut s = with("ERROR", "STOPPED_IN_GARDEN");
        s.mower.error_code = Some(10);
        assert_eq!(t.error(&s), Some("Upside down"));
        s.mower.error_code = Some(600);
        assert_eq!(t.error(&s), None);
        s.mower.error_code = None;
        assert_eq!(t.error(&s), None);

        let mut s = with("ERROR", "PARKED_IN_CS");
        s.mower.error_code = Some(10);
        assert_eq!(t.error(&s), None);
    }

    #[test]
    fn charging_status_mentions_next_start() {
        let tz = TimeZone::fixed(jiff::tz::offset(2));
        let t = StatusTranslator::new(tz.clone());
        let monday = jiff::civil::date(2024, 6, 3)
            .at(6, 0, 0, 0)
            .to_zoned(tz)
            .unwrap();
        let mut s = with("IN_OPERATION", "CHARGING");
        s.planner.next_start_timestamp = monday.timestamp().as_millisecond();
        assert_eq!(t.status(&s), "Charging, next start: Mon 06:00");

        s.mower.state = MowerState::Restricted;
        s.planner.restricted_reason = RestrictedReason::WeekSchedule;
        assert_eq!(t.status(&s), "Schedule, next start: Mon 06:00");
    }

    #[test]
    fn nothing_scheduled_means_no_next_start() {
        let t = translator();
        let mut s = with("IN_OPERATION", "CHARGING");
        s.planner.next_start_timestamp = 0;
        assert_eq!(t.status(&s), "Charging");
        assert_eq!(t.next_start(&s), None);
        assert_eq!(t.attributes(&s).next_start, None);

        s.mower.state = MowerState::Restricted;
        s.planner.restricted_reason = RestrictedReason::WeekSchedule;
        assert_eq!(t.status(&s), "Schedule");
    }

    #[test]
    fn status_texts() {
        let t = translator();
        let cases = [
            ("UNKNOWN", "MOWING", "Unknown"),
            ("NOT_APPLICABLE", "MOWING", "Not applicable"),
            ("PAUSED", "MOWING", "Paused"),
            ("IN_OPERATION", "UNKNOWN", "Unknown"),
            ("IN_OPERATION", "NOT_APPLICABLE", "Not applicable"),
            ("IN_OPERATION", "MOWING", "Mowing"),
            ("IN_OPERATION", "GOING_HOME", "Going to charging station"),
            ("IN_OPERATION", "LEAVING", "Leaving charging station"),
            ("IN_OPERATION", "PARKED_IN_CS", "Parked"),
            ("IN_OPERATION", "STOPPED_IN_GARDEN", "Stopped"),
            ("IN_OPERATION", "SOMETHING_NEW", "Unknown"),
            ("WAIT_UPDATING", "UNKNOWN", "Updating"),
            ("WAIT_POWER_UP", "UNKNOWN", "Powering up"),
            ("OFF", "NOT_APPLICABLE", "Off"),
            ("STOPPED", "NOT_APPLICABLE", "Stopped"),
            ("SOMETHING_NEW", "MOWING", "Unknown"),
        ];
        for (state, activity, expected) in cases {
            assert_eq!(t.status(&with(state, activity)), expected, "{state}/{activity}");
        }
    }

    #[test]
    fn restricted_status_texts() {
        let t = translator();
        let mut s = with("RESTRICTED", "PARKED_IN_CS");
        let cases = [
            ("PARK_OVERRIDE", "Park override"),
            ("SENSOR", "Weather timer"),
            ("DAILY_LIMIT", "Daily limit"),
            ("NOT_APPLICABLE", "Parked until further notice"),
            ("FROST", "Unknown"),
        ];
        for (reason, expected) in cases {
            s.planner.restricted_reason = reason.into();
            assert_eq!(t.status(&s), expected, "{reason}");
        }
    }

    #[test]
    fn fault_status_is_the_error_message() {
        let t = translator();
        let mut s = with("FATAL_ERROR", "NOT_APPLICABLE");
        s.mower.error_code = Some(9);
        assert_eq!(t.status(&s), "Trapped");
        s.mower.error_code = None;
        assert_eq!(t.status(&s), "");
    }

    #[test]
    fn attributes_for_a_fault() {
        let t = translator();
        let mut s = with("ERROR_AT_POWER_UP", "STOPPED_IN_GARDEN");
        s.mower.error_code = Some(14);
        s.mower.error_code_timestamp = Some(1_717_394_400_000);
        let attributes = t.attributes(&s);
        assert_eq!(attributes.status, "Mower lifted");
        assert_eq!(attributes.error_message, Some("Mower lifted"));
        assert_eq!(
            attributes.error_time.as_ref().map(iso8601).as_deref(),
            Some("2024-06-03T06:00:00+00:00")
        );
        assert_eq!(attributes.state, "ERROR_AT_POWER_UP");
        assert_eq!(attributes.activity, "STOPPED_IN_GARDEN");
        assert_eq!(attributes.mode, "MAIN_AREA");
        assert_eq!(attributes.action, Some("NOT_ACTIVE"));
        assert_eq!(attributes.restricted_reason, "NOT_APPLICABLE");
    }

    #[test]
    fn attributes_without_a_fault() {
        let t = StatusTranslator::new(TimeZone::fixed(jiff::tz::offset(-5)));
        let mut s = with("STOPPED", "STOPPED_IN_GARDEN");
        s.mower.error_code = Some(14);
        s.mower.error_code_timestamp = Some(1_717_394_400_000);
        s.planner.next_start_timestamp = 1_717_394_400_000;
        let attributes = t.attributes(&s);
        assert_eq!(attributes.error_message, None);
        assert_eq!(attributes.error_time, None);
        assert_eq!(
            attributes.next_start.as_ref().map(iso8601).as_deref(),
            Some("2024-06-03T01:00:00-05:00")
        );
    }
}
