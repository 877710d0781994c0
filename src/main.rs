use clap::Parser as _;
use commands::{CommandForwarder, RequestError, Session};
use futures::{SinkExt as _, StreamExt as _};
use homie5::HOMIE_UNIT_PERCENT;
use homie5::HomieDataType;
use homie5::client::Publish as HomiePublish;
use homie5::client::Subscription;
use homie5::device_description::DeviceDescriptionBuilder;
use homie5::device_description::HomieDeviceDescription;
use homie5::device_description::NodeDescriptionBuilder;
use homie5::device_description::PropertyDescriptionBuilder;
use homie5::{Homie5DeviceProtocol, HomieDeviceStatus, HomieID};
use rumqttc::v5::MqttOptions;
use rumqttc::v5::mqttbytes::v5::LastWill;
use services::ServiceCall;
use snapshot::MowerSnapshot;
use std::collections::BTreeMap;
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Bytes;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use translate::StatusTranslator;

mod commands;
mod error_codes;
mod schemas;
mod services;
mod snapshot;
mod translate;

static AUTOMOWER_CONNECT_API_BASE: &str = "https://api.amc.husqvarna.dev/v1";
static AUTOMOWER_TOKEN_ENDPOINT: &str =
    "https://api.authentication.husqvarnagroup.dev/v1/oauth2/token";
static AUTOMOWER_WEBSOCKET: &str = "wss://ws.openapi.husqvarna.dev/v1";
static BATTERY_NODE_ID: HomieID = HomieID::new_const("battery");
static BATTERY_LEVEL_PROP_ID: HomieID = HomieID::new_const("level");
static VACUUM_NODE_ID: HomieID = HomieID::new_const("vacuum");
static VACUUM_STATE_PROP_ID: HomieID = HomieID::new_const("state");
static VACUUM_STATUS_PROP_ID: HomieID = HomieID::new_const("status");
static VACUUM_ERROR_PROP_ID: HomieID = HomieID::new_const("error");
static VACUUM_ERROR_MESSAGE_PROP_ID: HomieID = HomieID::new_const("error-message");
static VACUUM_ERROR_TIME_PROP_ID: HomieID = HomieID::new_const("error-time");
static VACUUM_NEXT_START_PROP_ID: HomieID = HomieID::new_const("next-start");
static VACUUM_MODE_PROP_ID: HomieID = HomieID::new_const("mode");
static VACUUM_ACTIVITY_PROP_ID: HomieID = HomieID::new_const("activity");
static VACUUM_MOWER_STATE_PROP_ID: HomieID = HomieID::new_const("mower-state");
static VACUUM_OVERRIDE_PROP_ID: HomieID = HomieID::new_const("override-action");
static VACUUM_RESTRICTED_REASON_PROP_ID: HomieID = HomieID::new_const("restricted-reason");

const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_REPOSITORY"),
    ")"
);
const CONNECT_TIMEOUT: Duration = Duration::new(3, 0);
const API_REQUEST_TIMEOUT: Duration = Duration::new(10, 0);
const TOKEN_EXPIRATION_HEADROOM: Duration = Duration::new(30, 0);
const WEBSOCKET_PING_INTERVAL: Duration = Duration::new(10, 0);

/// Expose Husqvarna Automowers as vacuum cleaners over MQTT, following the Homie convention.
#[derive(clap::Parser)]
struct Args {
    /// How to connect to the MQTT broker.
    ///
    /// The value is expected to be provided as an URL, such as:
    /// `mqtt://location:1883?client_id=hostname` for plain text connection or
    /// `mqtts://location:1883?client_id=hostname` for TLS protected connection.
    #[clap(short = 'm', long)]
    mqtt_broker: String,

    /// To be provided together with `--mqtt-password` to use password based authentication
    /// with the broker.
    #[clap(short = 'u', long, requires = "mqtt_password")]
    mqtt_user: Option<String>,

    /// To be provided together with `--mqtt-user` to use password based authentication with
    /// the broker.
    #[clap(short = 'p', long, requires = "mqtt_user")]
    mqtt_password: Option<String>,

    #[clap(long, default_value = "automower-vacuum")]
    device_name: HomieID,

    #[clap(long, default_value = "info", env = "AUTOMOWER_VACUUM_LOG")]
    log_filter: tracing_subscriber::filter::targets::Targets,

    /// Application key credential from your application in Husqvarna Developer API portal.
    #[clap(short = 'k', long, env = "AUTOMOWER_APP_KEY")]
    app_key: String,

    /// Application secret credential from your application in Husqvarna Developer API portal.
    #[clap(short = 's', long, env = "AUTOMOWER_APP_SECRET")]
    app_secret: String,

    /// IANA time zone in which the next start and error times are presented.
    ///
    /// Defaults to the time zone of the system.
    #[clap(long, env = "AUTOMOWER_VACUUM_TIME_ZONE")]
    time_zone: Option<String>,
}

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error("could not set up the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error("could not set up the HTTP client")]
    HttpClient(#[source] reqwest::Error),
    #[error("could not find the `{1}` time zone")]
    TimeZone(#[source] jiff::Error, String),
    #[error("could not parse the `--mqtt-broker` argument")]
    ParseMqttBroker(#[source] rumqttc::v5::OptionError),
    #[error("mqtt connection error")]
    MqttConnection(#[source] rumqttc::v5::ConnectionError),
    #[error("could not publish init value to the state topic")]
    PublishInitState(#[source] rumqttc::v5::ClientError),
    #[error("could not construct device description message")]
    GenerateDescription(#[source] homie5::Homie5ProtocolError),
    #[error("could not publish the device description")]
    PublishDescription(#[source] rumqttc::v5::ClientError),
    #[error("could not publish ready value to the state topic")]
    PublishReadyState(#[source] rumqttc::v5::ClientError),
    #[error("could not construct the mqtt subscribtion message")]
    GenerateSubscribtions(#[source] homie5::Homie5ProtocolError),
    #[error("could not subscribe to the homie properties")]
    Subscribe(#[source] rumqttc::v5::ClientError),
    #[error("could not obtain an access token")]
    RequestToken(#[source] reqwest::Error),
    #[error("could not read the access token response")]
    ReadToken(#[source] reqwest::Error),
    #[error("could not make a request to the `{1}` API endpoint")]
    GetApi(#[source] reqwest::Error, &'static str),
    #[error("could not read the API response for `{1}`")]
    ReadResponse(#[source] reqwest::Error, &'static str),
    #[error("mower id `{0}` cannot be used as a homie device id")]
    MowerId(String),
    #[error("could not publish value to `{0}/{1}`")]
    PublishValue(
        #[source] rumqttc::v5::ClientError,
        &'static HomieID,
        &'static HomieID,
    ),
    #[error("could not construct the websocket request")]
    WebsocketRequest(#[source] tungstenite::Error),
    #[error("could not put the credentials into the websocket request")]
    WebsocketHeader(#[source] tungstenite::http::header::InvalidHeaderValue),
    #[error("an error in websocket")]
    Websocket(#[source] tungstenite::Error),
    #[error("could not join the monitor thread")]
    MonitorJoin(#[source] tokio::task::JoinError),
    #[error("disconnected from the MQTT server")]
    MqttDisconnect,
}

fn main() {
    let args = Args::parse();
    std::process::exit(match setup_and_run(args) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn setup_and_run(args: Args) -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(args.log_filter.clone())
        .init();
    tracing::debug!(filter = ?args.log_filter, message = "logging initiated");
    let time_zone = match args.time_zone {
        Some(name) => jiff::tz::TimeZone::get(&name).map_err(|e| Error::TimeZone(e, name))?,
        None => jiff::tz::TimeZone::system(),
    };
    tracing::debug!(time_zone = time_zone.iana_name(), "presenting times");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;
    let client = reqwest::ClientBuilder::new()
        .user_agent(USER_AGENT)
        .referer(false)
        .connect_timeout(CONNECT_TIMEOUT)
        .connection_verbose(true)
        .timeout(API_REQUEST_TIMEOUT)
        .https_only(true)
        .build()
        .map_err(Error::HttpClient)?;
    let state = State {
        token: Default::default(),
        token_expiration: boot_time::Instant::now(),
        mowers: Default::default(),
    };
    let (protocol, lw) = Homie5DeviceProtocol::new(args.device_name, homie5::HomieDomain::Default);
    let mut mqtt_options =
        MqttOptions::parse_url(&args.mqtt_broker).map_err(Error::ParseMqttBroker)?;
    if let (Some(u), Some(p)) = (args.mqtt_user.as_ref(), args.mqtt_password.as_ref()) {
        mqtt_options.set_credentials(u, p);
    }
    let lw = LastWill::new(lw.topic, lw.message, convert_qos(lw.qos), lw.retain, None);
    mqtt_options.set_last_will(lw);
    let (mqtt, mqtt_loop) = rumqttc::v5::AsyncClient::new(mqtt_options, 100);
    let context = Arc::new(Context {
        client,
        state: Mutex::new(state),
        protocol,
        mqtt,
        translator: StatusTranslator::new(time_zone),
        app_key: args.app_key,
        app_secret: args.app_secret,
    });
    runtime.block_on(context.run(mqtt_loop))
}

struct MowerContext {
    mqtt: rumqttc::v5::AsyncClient,
    protocol: Homie5DeviceProtocol,
    description: HomieDeviceDescription,
    api_id: String,
    snapshot: Mutex<MowerSnapshot>,
}

struct State {
    token: Arc<str>,
    token_expiration: boot_time::Instant,
    mowers: BTreeMap<String, MowerContext>,
}

struct Context {
    client: reqwest::Client,
    state: Mutex<State>,
    protocol: Homie5DeviceProtocol,
    mqtt: rumqttc::v5::AsyncClient,
    translator: StatusTranslator,
    app_key: String,
    app_secret: String,
}

impl Context {
    async fn get_token(&self) -> Result<Arc<str>, Error> {
        let now = boot_time::Instant::now();
        {
            let state = self.state.lock().await;
            if state.token_expiration > now {
                return Ok(Arc::clone(&state.token));
            }
        }
        let response = self
            .client
            .post(AUTOMOWER_TOKEN_ENDPOINT)
            .header("accept", "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.app_key),
                ("client_secret", &self.app_secret),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(Error::RequestToken)?
            .json::<schemas::oauth::TokenResponse>()
            .await
            .map_err(Error::ReadToken)?;

        let mut state = self.state.lock().await;
        state.token = response.access_token.into();
        let token_duration =
            Duration::from_secs_f32(response.expires_in).saturating_sub(TOKEN_EXPIRATION_HEADROOM);
        state.token_expiration = boot_time::Instant::now()
            .checked_add(token_duration)
            .unwrap_or(now);
        debug!(?token_duration, "obtained a new access token");
        return Ok(Arc::clone(&state.token));
    }

    async fn update_mower_data(&self) -> Result<Vec<MowerContext>, Error> {
        let token = self.get_token().await?;
        let response = self
            .client
            .get(format!("{AUTOMOWER_CONNECT_API_BASE}/mowers"))
            .header("accept", "application/vnd.api+json")
            .header("x-api-key", &self.app_key)
            .header("authorization", format!("Bearer {token}"))
            .header("authorization-provider", "husqvarna")
            .send()
            .await
            .map_err(|e| Error::GetApi(e, "GET /mowers"))?;
        let response = response
            .json::<schemas::automower::JsonApiDataListDocument>()
            .await
            .map_err(|e| Error::ReadResponse(e, "GET /mowers"))?;
        tracing::debug!(?response, uri = "/mowers", method = "GET");
        let mut result = Vec::with_capacity(response.data.len());
        for datum in response.data {
            if "mower" != datum.r#type {
                continue;
            }
            let snapshot = MowerSnapshot::from(datum);
            result.push(MowerContext::new(snapshot, self.mqtt.clone(), &self.protocol)?);
        }
        Ok(result)
    }

    async fn monitor(self: Arc<Self>) -> Error {
        'reconnect: loop {
            let token = match self.get_token().await {
                Ok(t) => t,
                Err(e) => break 'reconnect e,
            };
            let mut request = match AUTOMOWER_WEBSOCKET.into_client_request() {
                Ok(r) => r,
                Err(e) => break 'reconnect Error::WebsocketRequest(e),
            };
            let headers = request.headers_mut();
            let credentials = [
                ("x-api-key", self.app_key.parse()),
                ("authorization", format!("Bearer {token}").parse()),
                ("authorization-provider", "husqvarna".parse()),
            ];
            for (name, value) in credentials {
                match value {
                    Ok(value) => headers.insert(name, value),
                    Err(e) => break 'reconnect Error::WebsocketHeader(e),
                };
            }
            let (mut stream, _response) = match tokio_tungstenite::connect_async(request).await {
                Ok(connection) => connection,
                Err(e) => break 'reconnect Error::Websocket(e),
            };
            debug!(response = ?_response, "connected");
            let mut ping_timer = tokio::time::interval(WEBSOCKET_PING_INTERVAL);
            loop {
                tokio::select! {
                    result = stream.next() => {
                        let Some(result) = result else {
                            continue 'reconnect;
                        };
                        debug!(websocket_message=?result, "received a websocket message");
                        let message: Result<schemas::websocket::Event ,_> = match result {
                            Ok(tungstenite::Message::Text(text)) => {
                                serde_json::from_str(&text)
                            },
                            Ok(tungstenite::Message::Binary(bytes)) => {
                                serde_json::from_slice(&bytes)
                            },
                            Ok(tungstenite::Message::Ping(payload)) => {
                                if let Err(e) = stream.send(tungstenite::Message::Pong(payload)).await {
                                    break 'reconnect Error::Websocket(e);
                                }
                                continue;
                            },
                            Ok(tungstenite::Message::Pong(_)) => {
                                debug!("got a pong!");
                                continue;
                            },
                            Ok(tungstenite::Message::Close(_)) => continue 'reconnect,
                            Err(tungstenite::Error::Protocol(_)) => continue 'reconnect,
                            Ok(tungstenite::Message::Frame(_)) => unreachable!(),
                            Err(err) => break 'reconnect Error::Websocket(err),
                        };
                        let event = match message {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(
                                    error = &e as &dyn std::error::Error,
                                    "could not deserialize a websocket message"
                                );
                                continue;
                            }
                        };
                        let guard = self.state.lock().await;
                        let id = event.mower_id();
                        let key = MowerContext::id_to_key(id, &self.protocol);
                        let Some(mower) = guard.mowers.get(&key) else {
                            warn!(id, "received event for mower we don't know about, consider restarting?");
                            continue;
                        };
                        if let Err(e) = mower.record_event(event, &self.translator).await {
                            break 'reconnect e;
                        }
                    },
                    _ = ping_timer.tick() => {
                        debug!("sending ping");
                        let ping = tungstenite::Message::Ping(
                            Bytes::from_static(b"would be very nice of you to pong, thank you very much")
                        );
                        if let Err(e) = stream.send(ping).await {
                            break 'reconnect Error::Websocket(e);
                        }
                    },
                }
            }
        }
    }

    async fn publish_root_device(&self) -> Result<(), Error> {
        let mut root_description = DeviceDescriptionBuilder::new().name("Husqvarna Automowers");
        {
            let mower_data = self.update_mower_data().await?;
            let mut state = self.state.lock().await;
            state.mowers.clear();
            for mower in mower_data {
                let mower_id = mower.protocol.device_ref().device_id();
                root_description = root_description.add_child(mower_id.clone());
                state.mowers.insert(mower_id.to_string(), mower);
            }
        }
        let root_description = root_description.build();
        for step in homie5::homie_device_publish_steps() {
            match step {
                homie5::DevicePublishStep::DeviceStateInit => {
                    let p = self.protocol.publish_state(HomieDeviceStatus::Init);
                    self.mqtt
                        .homie_publish(p)
                        .await
                        .map_err(Error::PublishInitState)?;
                }
                homie5::DevicePublishStep::DeviceDescription => {
                    let p = self
                        .protocol
                        .publish_description(&root_description)
                        .map_err(Error::GenerateDescription)?;
                    self.mqtt
                        .homie_publish(p)
                        .await
                        .map_err(Error::PublishDescription)?;
                }
                homie5::DevicePublishStep::PropertyValues => {}
                homie5::DevicePublishStep::SubscribeProperties => {}
                homie5::DevicePublishStep::DeviceStateReady => {
                    let p = self.protocol.publish_state(HomieDeviceStatus::Ready);
                    self.mqtt
                        .homie_publish(p)
                        .await
                        .map_err(Error::PublishReadyState)?;
                }
            }
        }
        Ok(())
    }

    /// Route a `/set` message to the mower it addresses.
    async fn handle_publish(&self, topic: &str, payload: &[u8]) {
        let message = match homie5::parse_mqtt_message(topic, payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    topic,
                    error = &e as &dyn std::error::Error,
                    "could not parse an incoming message"
                );
                return;
            }
        };
        let homie5::Homie5Message::PropertySet {
            property,
            set_value,
        } = message
        else {
            tracing::trace!(topic, "not a property set message");
            return;
        };
        let call = match ServiceCall::parse(property.prop_id(), &set_value) {
            Ok(call) => call,
            Err(e) => {
                warn!(
                    topic,
                    error = &e as &dyn std::error::Error,
                    "rejected a property set message"
                );
                return;
            }
        };
        let api_id = {
            let state = self.state.lock().await;
            let key = property.device_id().to_string();
            match state.mowers.get(&key) {
                Some(mower) => mower.api_id.clone(),
                None => {
                    warn!(device = %key, "command for a mower we don't know about");
                    return;
                }
            }
        };
        debug!(mower = %api_id, ?call, "handling a command");
        let forwarder = CommandForwarder::new(self, &api_id);
        if let Err(e) = call.dispatch(&forwarder).await {
            warn!(
                mower = %api_id,
                error = &e as &dyn std::error::Error,
                "rejected a calendar command"
            );
        }
    }

    async fn run(self: Arc<Self>, mut mqtt_loop: rumqttc::v5::EventLoop) -> Result<(), Error> {
        let mut handle: Option<tokio::task::JoinHandle<Error>> = None;
        loop {
            use rumqttc::Outgoing;
            use rumqttc::v5::Event;
            use rumqttc::v5::mqttbytes::v5::Packet;

            let result = tokio::select! {
                r = mqtt_loop.poll() => r,
                join_result = async {
                    match handle.as_mut() {
                        Some(h) => h.await,
                        None => std::future::pending().await,
                    }
                } => {
                    match join_result {
                        Ok(error) => return Err(error),
                        Err(join_error) => return Err(Error::MonitorJoin(join_error)),
                    }
                }
            };
            match result.map_err(Error::MqttConnection)? {
                Event::Incoming(Packet::ConnAck(_)) => {
                    tracing::debug!("connected to mqtt");
                    if let Some(previous) = handle.take() {
                        previous.abort();
                    }
                    let this = Arc::clone(&self);
                    let joiner = tokio::spawn(async move {
                        if let Err(e) = this.publish_root_device().await {
                            return e;
                        }
                        {
                            let state = this.state.lock().await;
                            for mower in state.mowers.values() {
                                if let Err(e) = mower.publish_device(&this.translator).await {
                                    return e;
                                };
                            }
                        }
                        this.monitor().await
                    });
                    handle = Some(joiner);
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    let Ok(topic) = String::from_utf8(publish.topic.to_vec()) else {
                        warn!(topic = ?publish.topic, "ignoring a message with a non UTF-8 topic");
                        continue;
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.handle_publish(&topic, &publish.payload).await;
                    });
                }
                Event::Outgoing(Outgoing::Disconnect) => {
                    return Err(Error::MqttDisconnect);
                }
                event @ Event::Incoming(_) | event @ Event::Outgoing(_) => {
                    tracing::trace!(?event, "not handled in any way");
                }
            }
        }
    }
}

impl Session for Context {
    async fn action(
        &self,
        mower_id: &str,
        payload: String,
        command_type: &str,
    ) -> Result<(), RequestError> {
        let token = self
            .get_token()
            .await
            .map_err(|e| RequestError::Token(Box::new(e)))?;
        let endpoint = format!("{AUTOMOWER_CONNECT_API_BASE}/mowers/{mower_id}/{command_type}");
        let response = self
            .client
            .post(&endpoint)
            .header("accept", "application/vnd.api+json")
            .header("content-type", "application/vnd.api+json")
            .header("x-api-key", &self.app_key)
            .header("authorization", format!("Bearer {token}"))
            .header("authorization-provider", "husqvarna")
            .body(payload)
            .send()
            .await
            .map_err(|e| RequestError::Send(e, endpoint.clone()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RequestError::Rejected { status, endpoint });
        }
        debug!(%status, %endpoint, "command accepted");
        Ok(())
    }
}

impl MowerContext {
    fn id_to_key(id: &str, root_protocol: &Homie5DeviceProtocol) -> String {
        let root_id = root_protocol.device_ref().device_id();
        format!("{}-{}", root_id, id)
    }

    fn new(
        snapshot: MowerSnapshot,
        mqtt: rumqttc::v5::AsyncClient,
        root_protocol: &Homie5DeviceProtocol,
    ) -> Result<Self, Error> {
        let root_id = root_protocol.device_ref().device_id();
        let key = Self::id_to_key(&snapshot.id, root_protocol);
        let child_device_id = HomieID::try_from(key.clone()).map_err(|_| Error::MowerId(key))?;
        let protocol = root_protocol.clone_for_child(child_device_id);
        let description = Self::description(&snapshot.name, root_id);
        Ok(Self {
            mqtt,
            protocol,
            description,
            api_id: snapshot.id.clone(),
            snapshot: Mutex::new(snapshot),
        })
    }

    fn description(name: &str, root_id: &HomieID) -> HomieDeviceDescription {
        let battery_level_prop = PropertyDescriptionBuilder::new(HomieDataType::Integer)
            .unit(HOMIE_UNIT_PERCENT)
            .format(0..=100)
            .build();
        let battery_node = NodeDescriptionBuilder::new()
            .add_property(BATTERY_LEVEL_PROP_ID.clone(), battery_level_prop)
            .build();
        // FIXME: specify the format for enums...
        let enum_prop = || PropertyDescriptionBuilder::new(HomieDataType::Enum).build();
        let string_prop = || PropertyDescriptionBuilder::new(HomieDataType::String).build();
        let datetime_prop = || PropertyDescriptionBuilder::new(HomieDataType::Datetime).build();
        let settable_prop = |datatype| {
            PropertyDescriptionBuilder::new(datatype)
                .settable(true)
                .retained(false)
                .build()
        };
        let vacuum_node = NodeDescriptionBuilder::new()
            .add_property(VACUUM_STATE_PROP_ID.clone(), enum_prop())
            .add_property(VACUUM_STATUS_PROP_ID.clone(), string_prop())
            .add_property(VACUUM_ERROR_PROP_ID.clone(), string_prop())
            .add_property(VACUUM_ERROR_MESSAGE_PROP_ID.clone(), string_prop())
            .add_property(VACUUM_ERROR_TIME_PROP_ID.clone(), datetime_prop())
            .add_property(VACUUM_NEXT_START_PROP_ID.clone(), datetime_prop())
            .add_property(VACUUM_MODE_PROP_ID.clone(), enum_prop())
            .add_property(VACUUM_ACTIVITY_PROP_ID.clone(), enum_prop())
            .add_property(VACUUM_MOWER_STATE_PROP_ID.clone(), enum_prop())
            .add_property(VACUUM_OVERRIDE_PROP_ID.clone(), enum_prop())
            .add_property(VACUUM_RESTRICTED_REASON_PROP_ID.clone(), enum_prop())
            .add_property(
                services::COMMAND_PROP_ID.clone(),
                settable_prop(HomieDataType::Enum),
            )
            .add_property(
                services::PARK_AND_START_PROP_ID.clone(),
                settable_prop(HomieDataType::JSON),
            )
            .add_property(
                services::CALENDAR_PROP_ID.clone(),
                settable_prop(HomieDataType::JSON),
            )
            .add_property(
                services::CUSTOM_COMMAND_PROP_ID.clone(),
                settable_prop(HomieDataType::JSON),
            )
            .build();
        DeviceDescriptionBuilder::new()
            .name(name.to_owned())
            .root(root_id.clone())
            .parent(root_id.clone())
            .add_node(BATTERY_NODE_ID.clone(), battery_node)
            .add_node(VACUUM_NODE_ID.clone(), vacuum_node)
            .build()
    }

    fn is_retained(&self, node_id: &HomieID, prop_id: &HomieID) -> bool {
        self.description
            .nodes
            .get(node_id)
            .unwrap_or_else(|| panic!("attempting to publish unkonwn automower node `{node_id}`"))
            .properties
            .get(prop_id)
            .unwrap_or_else(|| {
                panic!("attempting to publish unkonwn automower property `{node_id}/{prop_id}`")
            })
            .retained
    }

    async fn record_event(
        &self,
        event: schemas::websocket::Event,
        translator: &StatusTranslator,
    ) -> Result<(), Error> {
        if !self.snapshot.lock().await.apply(event) {
            return Ok(());
        }
        self.publish_values(translator).await
    }

    async fn publish_values(&self, translator: &StatusTranslator) -> Result<(), Error> {
        let values = property_values(translator, &*self.snapshot.lock().await);
        for (node_id, prop_id, value) in values {
            let retained = Self::is_retained(&self, node_id, prop_id);
            let p = self
                .protocol
                .publish_value(node_id, prop_id, value, retained);
            self.mqtt
                .homie_publish(p)
                .await
                .map_err(|e| Error::PublishValue(e, node_id, prop_id))?;
        }
        Ok(())
    }

    async fn publish_device(&self, translator: &StatusTranslator) -> Result<(), Error> {
        let initial_state = if self.snapshot.lock().await.connected {
            HomieDeviceStatus::Init
        } else {
            HomieDeviceStatus::Disconnected
        };
        for step in homie5::homie_device_publish_steps() {
            match step {
                homie5::DevicePublishStep::DeviceStateInit => {
                    let p = self.protocol.publish_state(initial_state);
                    self.mqtt
                        .homie_publish(p)
                        .await
                        .map_err(Error::PublishInitState)?;
                }
                homie5::DevicePublishStep::DeviceDescription => {
                    let p = self
                        .protocol
                        .publish_description(&self.description)
                        .map_err(Error::GenerateDescription)?;
                    self.mqtt
                        .homie_publish(p)
                        .await
                        .map_err(Error::PublishDescription)?;
                }
                homie5::DevicePublishStep::PropertyValues => {
                    if initial_state == HomieDeviceStatus::Disconnected {
                        continue;
                    }
                    self.publish_values(translator).await?;
                }
                homie5::DevicePublishStep::SubscribeProperties => {
                    if initial_state == HomieDeviceStatus::Disconnected {
                        continue;
                    }
                    let p = self
                        .protocol
                        .subscribe_props(&self.description)
                        .map_err(Error::GenerateSubscribtions)?;
                    self.mqtt
                        .homie_subscribe(p)
                        .await
                        .map_err(Error::Subscribe)?;
                }
                homie5::DevicePublishStep::DeviceStateReady => {
                    if initial_state == HomieDeviceStatus::Disconnected {
                        continue;
                    }
                    let p = self.protocol.publish_state(HomieDeviceStatus::Ready);
                    self.mqtt
                        .homie_publish(p)
                        .await
                        .map_err(Error::PublishReadyState)?;
                }
            }
        }
        Ok(())
    }
}

/// Everything published for a mower, derived afresh from its snapshot.
///
/// Absent values are published as empty strings to clear whatever was retained before.
fn property_values(
    translator: &StatusTranslator,
    snapshot: &MowerSnapshot,
) -> Vec<(&'static HomieID, &'static HomieID, String)> {
    let state = translator.state(snapshot);
    let error = translator.error(snapshot);
    let battery = translator.battery_level(snapshot);
    let attributes = translator.attributes(snapshot);
    let datetime = |t: Option<jiff::Zoned>| t.as_ref().map(translate::iso8601).unwrap_or_default();
    vec![
        (&BATTERY_NODE_ID, &BATTERY_LEVEL_PROP_ID, battery.to_string()),
        (&VACUUM_NODE_ID, &VACUUM_STATE_PROP_ID, state.as_str().into()),
        (&VACUUM_NODE_ID, &VACUUM_STATUS_PROP_ID, attributes.status),
        (&VACUUM_NODE_ID, &VACUUM_ERROR_PROP_ID, error.unwrap_or_default().into()),
        (
            &VACUUM_NODE_ID,
            &VACUUM_ERROR_MESSAGE_PROP_ID,
            attributes.error_message.unwrap_or_default().into(),
        ),
        (
            &VACUUM_NODE_ID,
            &VACUUM_ERROR_TIME_PROP_ID,
            datetime(attributes.error_time),
        ),
        (
            &VACUUM_NODE_ID,
            &VACUUM_NEXT_START_PROP_ID,
            datetime(attributes.next_start),
        ),
        (&VACUUM_NODE_ID, &VACUUM_MODE_PROP_ID, attributes.mode.into()),
        (&VACUUM_NODE_ID, &VACUUM_ACTIVITY_PROP_ID, attributes.activity.into()),
        (&VACUUM_NODE_ID, &VACUUM_MOWER_STATE_PROP_ID, attributes.state.into()),
        (
            &VACUUM_NODE_ID,
            &VACUUM_OVERRIDE_PROP_ID,
            attributes.action.unwrap_or_default().into(),
        ),
        (
            &VACUUM_NODE_ID,
            &VACUUM_RESTRICTED_REASON_PROP_ID,
            attributes.restricted_reason.into(),
        ),
    ]
}

trait MqttClientExt {
    type PublishError;
    type SubscribeError;
    async fn homie_publish(&self, p: HomiePublish) -> Result<(), Self::PublishError>;
    async fn homie_subscribe(
        &self,
        subs: impl Iterator<Item = Subscription> + Send,
    ) -> Result<(), Self::SubscribeError>;
}

impl MqttClientExt for rumqttc::v5::AsyncClient {
    type PublishError = rumqttc::v5::ClientError;
    type SubscribeError = rumqttc::v5::ClientError;
    async fn homie_publish(&self, p: HomiePublish) -> Result<(), Self::PublishError> {
        self.publish(p.topic, convert_qos(p.qos), p.retain, p.payload)
            .await
    }

    async fn homie_subscribe(
        &self,
        subs: impl Iterator<Item = Subscription> + Send,
    ) -> Result<(), Self::SubscribeError> {
        let subs = subs
            .map(|sub| rumqttc::v5::mqttbytes::v5::Filter::new(sub.topic, convert_qos(sub.qos)))
            .collect::<Vec<_>>();
        if subs.is_empty() {
            return Ok(());
        }
        self.subscribe_many(subs).await
    }
}

fn convert_qos(homie: homie5::client::QoS) -> rumqttc::v5::mqttbytes::QoS {
    use homie5::client::QoS::*;
    match homie {
        AtMostOnce => rumqttc::v5::mqttbytes::QoS::AtMostOnce,
        AtLeastOnce => rumqttc::v5::mqttbytes::QoS::AtLeastOnce,
        ExactlyOnce => rumqttc::v5::mqttbytes::QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::snapshot;

    #[test]
    fn published_values_are_described() {
        let root_id = HomieID::new_const("automower-vacuum");
        let description = MowerContext::description("Rasmus", &root_id);
        let translator = StatusTranslator::new(jiff::tz::TimeZone::UTC);
        for (node_id, prop_id, _) in property_values(&translator, &snapshot()) {
            let node = description.nodes.get(node_id).expect("node is described");
            let prop = node.properties.get(prop_id).expect("property is described");
            assert!(prop.retained, "{node_id}/{prop_id}");
            assert!(!prop.settable, "{node_id}/{prop_id}");
        }
    }

    #[test]
    fn commands_are_settable() {
        let root_id = HomieID::new_const("automower-vacuum");
        let description = MowerContext::description("Rasmus", &root_id);
        let node = description.nodes.get(&VACUUM_NODE_ID).unwrap();
        for prop_id in [
            &services::COMMAND_PROP_ID,
            &services::PARK_AND_START_PROP_ID,
            &services::CALENDAR_PROP_ID,
            &services::CUSTOM_COMMAND_PROP_ID,
        ] {
            let prop = node.properties.get(prop_id).unwrap();
            assert!(prop.settable, "{prop_id}");
            assert!(!prop.retained, "{prop_id}");
        }
    }

    #[test]
    fn values_for_a_charging_mower() {
        let translator = StatusTranslator::new(jiff::tz::TimeZone::UTC);
        let mut s = snapshot();
        s.battery_percent = 150;
        s.planner.next_start_timestamp = 1_717_394_400_000;
        let values: BTreeMap<String, String> = property_values(&translator, &s)
            .into_iter()
            .map(|(node, prop, value)| (format!("{node}/{prop}"), value))
            .collect();
        assert_eq!(values["battery/level"], "100");
        assert_eq!(values["vacuum/state"], "docked");
        assert_eq!(values["vacuum/status"], "Charging, next start: Mon 06:00");
        assert_eq!(values["vacuum/next-start"], "2024-06-03T06:00:00+00:00");
        assert_eq!(values["vacuum/error"], "");
        assert_eq!(values["vacuum/error-time"], "");
        assert_eq!(values["vacuum/mower-state"], "IN_OPERATION");
        assert_eq!(values["vacuum/activity"], "CHARGING");
        assert_eq!(values["vacuum/override-action"], "NOT_ACTIVE");
    }
}
