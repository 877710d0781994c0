pub(crate) mod oauth {
    #[derive(Debug, serde::Deserialize)]
    pub(crate) struct TokenResponse {
        pub(crate) access_token: String,
        pub(crate) expires_in: f32,
    }
}

pub(crate) mod automower {
    use crate::snapshot::{MowerActivity, MowerState, RestrictedReason};

    #[derive(Debug, serde::Deserialize)]
    pub(crate) struct JsonApiDataListDocument {
        pub(crate) data: Vec<JsonApiData>,
    }

    #[derive(Debug, serde::Deserialize)]
    pub(crate) struct JsonApiData {
        pub(crate) r#type: String,
        pub(crate) id: String,
        pub(crate) attributes: MowerData,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct MowerData {
        pub(crate) system: System,
        pub(crate) battery: Battery,
        pub(crate) mower: MowerApp,
        pub(crate) planner: Planner,
        pub(crate) metadata: Metadata,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct System {
        pub(crate) name: String,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Battery {
        pub(crate) battery_percent: i64,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct MowerApp {
        pub(crate) mode: String,
        pub(crate) activity: MowerActivity,
        pub(crate) state: MowerState,
        pub(crate) error_code: Option<u16>,
        pub(crate) error_code_timestamp: Option<i64>,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Planner {
        pub(crate) next_start_timestamp: i64,
        pub(crate) r#override: Option<PlannerOverride>,
        pub(crate) restricted_reason: RestrictedReason,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct PlannerOverride {
        pub(crate) action: String,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Metadata {
        pub(crate) connected: bool,
    }
}

pub(crate) mod websocket {
    use super::automower::PlannerOverride;
    use crate::snapshot::{MowerActivity, MowerState, RestrictedReason};
    use serde::de::IgnoredAny;

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Battery {
        pub(crate) battery_percent: Option<i64>,
    }

    #[derive(Debug, serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct BatteryAttributes {
        pub(crate) battery: Option<Battery>,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Mower {
        pub(crate) mode: Option<String>,
        pub(crate) activity: Option<MowerActivity>,
        pub(crate) state: Option<MowerState>,
        pub(crate) error_code: Option<u16>,
        pub(crate) error_code_timestamp: Option<i64>,
    }

    #[derive(Debug, serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct MowerAttributes {
        pub(crate) mower: Option<Mower>,
    }

    #[derive(Debug, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct Planner {
        pub(crate) next_start_timestamp: Option<i64>,
        pub(crate) r#override: Option<PlannerOverride>,
        pub(crate) restricted_reason: Option<RestrictedReason>,
    }

    #[derive(Debug, serde::Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct PlannerAttributes {
        pub(crate) planner: Option<Planner>,
    }

    /// Events the vacuum does not consume still have to be recognized, their attributes are
    /// skipped.
    #[derive(Debug, serde::Deserialize)]
    #[serde(tag = "type")]
    #[serde(rename_all = "kebab-case")]
    pub(crate) enum Event {
        BatteryEventV2 {
            id: String,
            attributes: BatteryAttributes,
        },
        CalendarEventV2 {
            id: String,
            attributes: IgnoredAny,
        },
        #[serde(rename = "cuttingHeight-event-v2")]
        CuttingHeightEventV2 {
            id: String,
            attributes: IgnoredAny,
        },
        HeadlightsEventV2 {
            id: String,
            attributes: IgnoredAny,
        },
        MessageEventV2 {
            id: String,
            attributes: IgnoredAny,
        },
        MowerEventV2 {
            id: String,
            attributes: MowerAttributes,
        },
        PlannerEventV2 {
            id: String,
            attributes: PlannerAttributes,
        },
        PositionEventV2 {
            id: String,
            attributes: IgnoredAny,
        },
    }

    impl Event {
        pub(crate) fn mower_id(&self) -> &str {
            match self {
                Event::BatteryEventV2 { id, .. }
                | Event::CalendarEventV2 { id, .. }
                | Event::CuttingHeightEventV2 { id, .. }
                | Event::HeadlightsEventV2 { id, .. }
                | Event::MessageEventV2 { id, .. }
                | Event::MowerEventV2 { id, .. }
                | Event::PlannerEventV2 { id, .. }
                | Event::PositionEventV2 { id, .. } => id,
            }
        }
    }
}

/// Documents accepted by `POST /mowers/{id}/actions` and `POST /mowers/{id}/calendar`.
pub(crate) mod command {
    #[derive(Debug, serde::Serialize)]
    pub(crate) struct Document<'a, A> {
        pub(crate) data: Data<'a, A>,
    }

    #[derive(Debug, serde::Serialize)]
    pub(crate) struct Data<'a, A> {
        pub(crate) r#type: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub(crate) attributes: Option<A>,
    }

    #[derive(Debug, serde::Serialize)]
    pub(crate) struct DurationAttributes {
        /// Minutes.
        pub(crate) duration: i64,
    }

    #[derive(Debug, serde::Serialize)]
    pub(crate) struct CalendarAttributes {
        pub(crate) tasks: Vec<CalendarTask>,
    }

    #[derive(Debug, serde::Serialize)]
    pub(crate) struct CalendarTask {
        /// Minutes after midnight.
        pub(crate) start: i32,
        /// Minutes.
        pub(crate) duration: i32,
        pub(crate) monday: bool,
        pub(crate) tuesday: bool,
        pub(crate) wednesday: bool,
        pub(crate) thursday: bool,
        pub(crate) friday: bool,
        pub(crate) saturday: bool,
        pub(crate) sunday: bool,
    }

    impl<'a, A> Document<'a, A> {
        pub(crate) fn new(r#type: &'a str, attributes: Option<A>) -> Self {
            Self {
                data: Data { r#type, attributes },
            }
        }
    }
}
