//! Settable properties of the `vacuum` node and the commands they map to.

use crate::commands::{CalendarRequest, CommandForwarder, InvalidRange, Session};
use homie5::HomieID;

pub(crate) static COMMAND_PROP_ID: HomieID = HomieID::new_const("command");
pub(crate) static PARK_AND_START_PROP_ID: HomieID = HomieID::new_const("park-and-start");
pub(crate) static CALENDAR_PROP_ID: HomieID = HomieID::new_const("calendar");
pub(crate) static CUSTOM_COMMAND_PROP_ID: HomieID = HomieID::new_const("custom-command");

#[derive(thiserror::Error, Debug)]
pub(crate) enum ServiceError {
    #[error("`{0}` is not a settable property")]
    UnknownProperty(HomieID),
    #[error("`{0}` is not a known command")]
    UnknownCommand(String),
    #[error("could not parse the value set to `{1}`")]
    Payload(#[source] serde_json::Error, &'static HomieID),
}

#[derive(Debug, PartialEq)]
pub(crate) enum ServiceCall {
    Start,
    Pause,
    Stop,
    ReturnToBase,
    ParkAndStart { command: String, duration: i64 },
    Calendar(CalendarRequest),
    CustomCommand { command_type: String, json_string: String },
}

#[derive(serde::Deserialize)]
struct ParkAndStart {
    command: String,
    duration: i64,
}

#[derive(serde::Deserialize)]
struct CustomCommand {
    command_type: String,
    json_string: String,
}

fn json<'a, T: serde::Deserialize<'a>>(
    value: &'a str,
    prop_id: &'static HomieID,
) -> Result<T, ServiceError> {
    serde_json::from_str(value).map_err(|e| ServiceError::Payload(e, prop_id))
}

impl ServiceCall {
    pub(crate) fn parse(prop_id: &HomieID, value: &str) -> Result<Self, ServiceError> {
        if *prop_id == COMMAND_PROP_ID {
            return match value.trim() {
                "start" => Ok(ServiceCall::Start),
                "pause" => Ok(ServiceCall::Pause),
                "stop" => Ok(ServiceCall::Stop),
                "return-to-base" => Ok(ServiceCall::ReturnToBase),
                other => Err(ServiceError::UnknownCommand(other.to_owned())),
            };
        }
        if *prop_id == PARK_AND_START_PROP_ID {
            let ParkAndStart { command, duration } = json(value, &PARK_AND_START_PROP_ID)?;
            return Ok(ServiceCall::ParkAndStart { command, duration });
        }
        if *prop_id == CALENDAR_PROP_ID {
            return Ok(ServiceCall::Calendar(json(value, &CALENDAR_PROP_ID)?));
        }
        if *prop_id == CUSTOM_COMMAND_PROP_ID {
            let CustomCommand {
                command_type,
                json_string,
            } = json(value, &CUSTOM_COMMAND_PROP_ID)?;
            return Ok(ServiceCall::CustomCommand {
                command_type,
                json_string,
            });
        }
        Err(ServiceError::UnknownProperty(prop_id.clone()))
    }

    pub(crate) async fn dispatch<S: Session>(
        self,
        forwarder: &CommandForwarder<'_, S>,
    ) -> Result<(), InvalidRange> {
        match self {
            ServiceCall::Start => forwarder.start().await,
            ServiceCall::Pause => forwarder.pause().await,
            ServiceCall::Stop => forwarder.stop().await,
            ServiceCall::ReturnToBase => forwarder.return_to_base().await,
            ServiceCall::ParkAndStart { command, duration } => {
                forwarder.park_and_start(&command, duration).await
            }
            ServiceCall::Calendar(request) => return forwarder.calendar(&request).await,
            ServiceCall::CustomCommand {
                command_type,
                json_string,
            } => forwarder.custom_command(&command_type, json_string).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::RecordingSession;
    use futures::executor::block_on;
    use jiff::civil::Time;

    #[test]
    fn parses_command_verbs() {
        let parse = |v: &str| ServiceCall::parse(&COMMAND_PROP_ID, v).unwrap();
        assert_eq!(parse("start"), ServiceCall::Start);
        assert_eq!(parse("pause"), ServiceCall::Pause);
        assert_eq!(parse("stop\n"), ServiceCall::Stop);
        assert_eq!(parse("return-to-base"), ServiceCall::ReturnToBase);
        assert!(matches!(
            ServiceCall::parse(&COMMAND_PROP_ID, "clean"),
            Err(ServiceError::UnknownCommand(c)) if c == "clean"
        ));
    }

    #[test]
    fn parses_park_and_start() {
        let call = ServiceCall::parse(
            &PARK_AND_START_PROP_ID,
            r#"{"command": "Start", "duration": 90}"#,
        )
        .unwrap();
        assert_eq!(
            call,
            ServiceCall::ParkAndStart {
                command: "Start".into(),
                duration: 90
            }
        );
        assert!(matches!(
            ServiceCall::parse(&PARK_AND_START_PROP_ID, r#"{"command": "Start"}"#),
            Err(ServiceError::Payload(_, _))
        ));
    }

    #[test]
    fn parses_calendar() {
        let call = ServiceCall::parse(
            &CALENDAR_PROP_ID,
            r#"{"start": "08:00", "end": "17:30:00", "monday": true, "tuesday": true,
                "wednesday": false, "thursday": false, "friday": true, "saturday": false,
                "sunday": false}"#,
        )
        .unwrap();
        let ServiceCall::Calendar(request) = call else {
            panic!("expected a calendar call");
        };
        assert_eq!(request.start, Time::new(8, 0, 0, 0).unwrap());
        assert_eq!(request.end, Time::new(17, 30, 0, 0).unwrap());
        assert!(request.monday && request.friday && !request.sunday);
    }

    #[test]
    fn rejects_unknown_property() {
        let prop = HomieID::new_const("level");
        assert!(matches!(
            ServiceCall::parse(&prop, "1"),
            Err(ServiceError::UnknownProperty(_))
        ));
    }

    #[test]
    fn custom_command_round_trips_the_payload() {
        let session = RecordingSession::default();
        let forwarder = CommandForwarder::new(&session, "mower");
        let raw = r#"{"data":{"type":"headlight","attributes":{"headlight":{"mode":"ALWAYS_ON"}}}}"#;
        let value = serde_json::json!({ "command_type": "settings", "json_string": raw });
        let call = ServiceCall::parse(&CUSTOM_COMMAND_PROP_ID, &value.to_string()).unwrap();
        block_on(call.dispatch(&forwarder)).unwrap();
        let calls = session.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command_type, "settings");
        assert_eq!(calls[0].payload, raw);
    }

    #[test]
    fn dispatch_reports_invalid_range_without_sending() {
        let session = RecordingSession::default();
        let forwarder = CommandForwarder::new(&session, "mower");
        let call = ServiceCall::parse(
            &CALENDAR_PROP_ID,
            r#"{"start": "08:00", "end": "07:00", "monday": true, "tuesday": true,
                "wednesday": true, "thursday": true, "friday": true, "saturday": true,
                "sunday": true}"#,
        )
        .unwrap();
        assert!(block_on(call.dispatch(&forwarder)).is_err());
        assert!(session.calls().is_empty());
    }

    #[test]
    fn dispatch_forwards_verbs() {
        let session = RecordingSession::default();
        let forwarder = CommandForwarder::new(&session, "mower");
        block_on(ServiceCall::ReturnToBase.dispatch(&forwarder)).unwrap();
        assert_eq!(
            session.calls()[0].payload,
            r#"{"data":{"type":"ParkUntilFurtherNotice"}}"#
        );
    }
}
