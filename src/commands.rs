//! Forwarding of user commands to the Automower Connect API.
//!
//! Request failures stop here: they are logged and the caller carries on as if the command was
//! sent. The only error a caller ever sees is [`InvalidRange`], raised before anything is sent.

use crate::schemas::command::{CalendarAttributes, CalendarTask, Document, DurationAttributes};
use jiff::civil::Time;
use tracing::{debug, error};

pub(crate) const ACTIONS: &str = "actions";
pub(crate) const CALENDAR: &str = "calendar";

#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestError {
    #[error("could not obtain an access token")]
    Token(#[source] Box<crate::Error>),
    #[error("could not make a request to `{1}`")]
    Send(#[source] reqwest::Error, String),
    #[error("`{endpoint}` responded with {status}")]
    Rejected {
        status: reqwest::StatusCode,
        endpoint: String,
    },
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("the calendar task must end after it starts, got {start} to {end}")]
pub(crate) struct InvalidRange {
    pub(crate) start: Time,
    pub(crate) end: Time,
}

/// Something that can deliver a command document to the mower's command queue.
pub(crate) trait Session {
    async fn action(
        &self,
        mower_id: &str,
        payload: String,
        command_type: &str,
    ) -> Result<(), RequestError>;
}

/// A single weekly calendar task, with the times given as wall-clock times.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub(crate) struct CalendarRequest {
    pub(crate) start: Time,
    pub(crate) end: Time,
    pub(crate) monday: bool,
    pub(crate) tuesday: bool,
    pub(crate) wednesday: bool,
    pub(crate) thursday: bool,
    pub(crate) friday: bool,
    pub(crate) saturday: bool,
    pub(crate) sunday: bool,
}

impl CalendarRequest {
    fn task(&self) -> Result<CalendarTask, InvalidRange> {
        let start = minutes_since_midnight(self.start);
        debug!(start, "calendar task start in minutes");
        let end = minutes_since_midnight(self.end);
        debug!(end, "calendar task end in minutes");
        let duration = end - start;
        if duration <= 0 {
            return Err(InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(CalendarTask {
            start,
            duration,
            monday: self.monday,
            tuesday: self.tuesday,
            wednesday: self.wednesday,
            thursday: self.thursday,
            friday: self.friday,
            saturday: self.saturday,
            sunday: self.sunday,
        })
    }
}

fn minutes_since_midnight(time: Time) -> i32 {
    i32::from(time.hour()) * 60 + i32::from(time.minute())
}

pub(crate) struct CommandForwarder<'a, S> {
    session: &'a S,
    mower_id: &'a str,
}

impl<'a, S: Session> CommandForwarder<'a, S> {
    pub(crate) fn new(session: &'a S, mower_id: &'a str) -> Self {
        Self { session, mower_id }
    }

    /// Resume the schedule.
    pub(crate) async fn start(&self) {
        self.send_action("ResumeSchedule").await
    }

    pub(crate) async fn pause(&self) {
        self.send_action("Pause").await
    }

    /// Park until the next scheduled start.
    pub(crate) async fn stop(&self) {
        self.send_action("ParkUntilNextSchedule").await
    }

    /// Park until told otherwise.
    pub(crate) async fn return_to_base(&self) {
        self.send_action("ParkUntilFurtherNotice").await
    }

    /// Send an action that takes a duration in minutes, such as `Park` or `Start`.
    pub(crate) async fn park_and_start(&self, command: &str, duration: i64) {
        let document = Document::new(command, Some(DurationAttributes { duration }));
        self.submit(ACTIONS, &document).await
    }

    /// Replace the mower's calendar with a single task.
    pub(crate) async fn calendar(&self, request: &CalendarRequest) -> Result<(), InvalidRange> {
        let task = request.task()?;
        let attributes = CalendarAttributes { tasks: vec![task] };
        let document = Document::new(CALENDAR, Some(attributes));
        self.submit(CALENDAR, &document).await;
        Ok(())
    }

    /// Send `payload` as-is.
    pub(crate) async fn custom_command(&self, command_type: &str, payload: String) {
        self.forward(command_type, payload).await
    }

    async fn send_action(&self, r#type: &str) {
        self.submit(ACTIONS, &Document::<()>::new(r#type, None))
            .await
    }

    async fn submit<A: serde::Serialize>(&self, command_type: &str, document: &Document<'_, A>) {
        match serde_json::to_string(document) {
            Ok(payload) => self.forward(command_type, payload).await,
            Err(e) => error!(
                mower = self.mower_id,
                command_type,
                error = &e as &dyn std::error::Error,
                "could not serialize the command"
            ),
        }
    }

    async fn forward(&self, command_type: &str, payload: String) {
        debug!(mower = self.mower_id, command_type, %payload, "forwarding command");
        if let Err(e) = self
            .session
            .action(self.mower_id, payload, command_type)
            .await
        {
            error!(
                mower = self.mower_id,
                command_type,
                error = &e as &dyn std::error::Error,
                "command couldn't be sent to the command queue"
            );
        }
    }
}
