use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::{CommandError, SYSTEM_ERROR};

pub mod socket;
pub mod surface;

pub use surface::{ControlSurface, Wakeup};

pub const FLASHER_COMPONENT: &str = "ledflasher";
pub const FLASHER_TRAIT: &str = "_ledflasher";
pub const BASE_COMPONENT: &str = "base";
pub const BASE_TRAIT: &str = "base";
pub const LED_COMPONENT_PREFIX: &str = "led";
pub const ON_OFF_TRAIT: &str = "onOff";
pub const LED_INFO_TRAIT: &str = "_ledInfo";

pub const ANIMATE_COMMAND: &str = "animate";
pub const IDENTIFY_COMMAND: &str = "identify";
pub const SET_CONFIG_COMMAND: &str = "setConfig";

/// Name of the component exposing the peripheral at `index`. Numbered from one.
pub fn led_component(index: usize) -> String {
    format!("{}{}", LED_COMPONENT_PREFIX, index + 1)
}

/// Inverse of [`led_component`].
pub fn led_index(component: &str) -> Option<usize> {
    component
        .strip_prefix(LED_COMPONENT_PREFIX)?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

pub fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Animating,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Animating => "animating",
        }
    }
}

/// The single terminal outcome of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed { results: Map<String, Value> },
    Aborted { code: String, message: String },
}

/// An inbound request from the operator.
///
/// Resolving a command consumes it. A command dropped without being
/// resolved is aborted with a system error.
#[derive(Debug)]
pub struct Command {
    component: String,
    name: String,
    parameters: Map<String, Value>,
    responder: Option<oneshot::Sender<Outcome>>,
}

impl Command {
    pub fn new(
        component: impl Into<String>,
        name: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> (Command, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let command = Command {
            component: component.into(),
            name: name.into(),
            parameters,
            responder: Some(tx),
        };

        (command, rx)
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads a required parameter.
    pub fn parameter<T: DeserializeOwned>(&self, name: &str) -> Result<T, CommandError> {
        let value = self
            .parameters
            .get(name)
            .ok_or_else(|| CommandError::invalid_parameter(format!("missing parameter `{}`", name)))?;

        serde_json::from_value(value.clone())
            .map_err(|e| CommandError::invalid_parameter(format!("invalid parameter `{}`: {}", name, e)))
    }

    pub fn complete(mut self, results: Map<String, Value>) {
        self.resolve(Outcome::Completed { results });
    }

    pub fn abort(mut self, error: CommandError) {
        log::debug!("Aborting {}.{}: {}", self.component, self.name, error);
        self.resolve(Outcome::Aborted {
            code: error.code.to_string(),
            message: error.message,
        });
    }

    fn resolve(&mut self, outcome: Outcome) {
        if let Some(responder) = self.responder.take() {
            // The requester may have gone away, nobody is left to tell
            let _ = responder.send(outcome);
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        if self.responder.is_some() {
            log::warn!("Command {}.{} dropped without an outcome", self.component, self.name);
            self.resolve(Outcome::Aborted {
                code: SYSTEM_ERROR.to_string(),
                message: "command was not handled".to_string(),
            });
        }
    }
}

/// Opaque pairing session details. Only its presence matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingInfo {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug)]
pub enum ControlEvent {
    Command(Command),
    /// `None` once pairing has ended
    PairingChanged(Option<PairingInfo>),
}

/// Something made visible to the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Publication {
    Component {
        component: String,
        traits: Vec<String>,
    },
    CommandHandler {
        component: String,
        #[serde(rename = "trait")]
        trait_name: String,
        command: String,
    },
    State {
        component: String,
        #[serde(rename = "trait")]
        trait_name: String,
        property: String,
        value: Value,
    },
}

pub trait StatePublisher {
    fn publish(&mut self, publication: Publication);

    fn add_component(&mut self, component: &str, traits: &[&str]) {
        self.publish(Publication::Component {
            component: component.to_string(),
            traits: traits.iter().map(|t| t.to_string()).collect(),
        });
    }

    fn add_command_handler(&mut self, component: &str, trait_name: &str, command: &str) {
        self.publish(Publication::CommandHandler {
            component: component.to_string(),
            trait_name: trait_name.to_string(),
            command: command.to_string(),
        });
    }

    fn set_state_property(&mut self, component: &str, trait_name: &str, property: &str, value: Value) {
        self.publish(Publication::State {
            component: component.to_string(),
            trait_name: trait_name.to_string(),
            property: property.to_string(),
            value,
        });
    }
}

impl StatePublisher for Vec<Publication> {
    fn publish(&mut self, publication: Publication) {
        self.push(publication);
    }
}
