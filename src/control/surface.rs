use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Map};
use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::config::Config;
use crate::control::{
    led_component, led_index, on_off, Command, ControlEvent, PairingInfo, StatePublisher, Status,
    ANIMATE_COMMAND, BASE_COMPONENT, BASE_TRAIT, FLASHER_COMPONENT, FLASHER_TRAIT, IDENTIFY_COMMAND,
    LED_INFO_TRAIT, ON_OFF_TRAIT, SET_CONFIG_COMMAND,
};
use crate::engine::AnimationEngine;
use crate::error::{AnimationError, CommandError, LinkError, UNKNOWN_COMMAND};
use crate::link::{Connector, PeripheralLink};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Timer {
    Reconnect,
    IdentifyEnd,
    Heartbeat,
}

/// Why the surface needs attention without an inbound event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Wakeup {
    Tick,
    Timer(Timer),
}

/// Mediates between the operator and the peripherals.
///
/// Owns the link, the animation engine and every pending timer. All of them
/// are driven from one task, so handlers never interleave.
pub struct ControlSurface<C: Connector, P: StatePublisher> {
    config: Config,
    link: PeripheralLink<C>,
    engine: AnimationEngine,
    publisher: P,
    status: Status,
    /// The running animation is the pairing attention blink
    attention: bool,
    /// Number of peripherals published for the current connection
    led_components: Option<usize>,
    timers: DelayQueue<Timer>,
    reconnect: Option<Key>,
    heartbeat: Option<Key>,
}

impl<C: Connector, P: StatePublisher> ControlSurface<C, P> {
    pub fn new(config: Config, connector: C, publisher: P) -> Self {
        ControlSurface {
            config,
            link: PeripheralLink::new(connector),
            engine: AnimationEngine::new(),
            publisher,
            status: Status::Idle,
            attention: false,
            led_components: None,
            timers: DelayQueue::new(),
            reconnect: None,
            heartbeat: None,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> Status {
        self.status
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    #[cfg(test)]
    pub fn link(&self) -> &PeripheralLink<C> {
        &self.link
    }

    #[cfg(test)]
    pub fn engine(&self) -> &AnimationEngine {
        &self.engine
    }

    /// Advertises the device level commands and makes the first connection attempt.
    pub async fn start(&mut self) {
        self.publisher.add_component(FLASHER_COMPONENT, &[FLASHER_TRAIT]);
        self.publisher
            .add_command_handler(FLASHER_COMPONENT, FLASHER_TRAIT, ANIMATE_COMMAND);
        self.publisher.add_component(BASE_COMPONENT, &[BASE_TRAIT]);
        self.publisher
            .add_command_handler(BASE_COMPONENT, BASE_TRAIT, IDENTIFY_COMMAND);

        self.update_device_state();
        self.connect_link().await;
    }

    /// Turns the peripherals off before the daemon exits.
    pub async fn shutdown(&mut self) {
        self.stop_animation().await;
        self.timers.clear();
        self.reconnect = None;
        self.heartbeat = None;
    }

    pub async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Command(command) => self.handle_command(command).await,
            ControlEvent::PairingChanged(info) => self.on_pairing_changed(info).await,
        }
    }

    /// Waits for the next animation tick or timer.
    ///
    /// Cancel safe: dropping the future loses nothing.
    pub async fn next_wakeup(&mut self) -> Wakeup {
        tokio::select! {
            () = self.engine.tick_due() => Wakeup::Tick,
            Some(expired) = self.timers.next() => Wakeup::Timer(expired.into_inner()),
        }
    }

    pub async fn on_wakeup(&mut self, wakeup: Wakeup) {
        match wakeup {
            Wakeup::Tick => {
                if let Err(e) = self.engine.tick(&mut self.link).await {
                    self.on_link_error(&e).await;
                }
            }
            Wakeup::Timer(Timer::Reconnect) => {
                self.reconnect = None;
                self.connect_link().await;
            }
            Wakeup::Timer(Timer::IdentifyEnd) => {
                log::debug!("Identify window is over");
                self.stop_animation().await;
            }
            Wakeup::Timer(Timer::Heartbeat) => {
                self.heartbeat = None;
                match self.link.probe().await {
                    Ok(()) => self.schedule_heartbeat(),
                    Err(e) => self.on_link_error(&e).await,
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        log::debug!("Received command {}.{}", command.component(), command.name());

        let result = match (command.component(), command.name()) {
            (FLASHER_COMPONENT, ANIMATE_COMMAND) => self.on_animate(&command).await,
            (BASE_COMPONENT, IDENTIFY_COMMAND) => self.on_identify().await,
            (component, SET_CONFIG_COMMAND) => match led_index(component) {
                Some(index) => self.on_set_config(index, &command).await,
                None => Err(unknown_command(&command)),
            },
            _ => Err(unknown_command(&command)),
        };

        match result {
            Ok(()) => command.complete(Map::new()),
            Err(e) => command.abort(e),
        }
    }

    async fn on_set_config(&mut self, index: usize, command: &Command) -> Result<(), CommandError> {
        let count = self.link.count()?;
        if index >= count {
            return Err(unknown_command(command));
        }

        let state: String = command.parameter("state")?;
        let on = match state.as_str() {
            "on" => true,
            "off" => false,
            other => {
                return Err(CommandError::invalid_parameter(format!(
                    "invalid state `{}`, expected `on` or `off`",
                    other
                )))
            }
        };

        // Direct control always wins over a running animation
        self.stop_animation().await;

        if let Err(e) = self.link.set(index, on).await {
            self.on_link_error(&e).await;
            return Err(e.into());
        }

        self.publish_led_state(index, on);

        Ok(())
    }

    async fn on_animate(&mut self, command: &Command) -> Result<(), CommandError> {
        self.link.count()?;

        let duration: f64 = command.parameter("duration")?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(CommandError::invalid_parameter("duration must be a positive number of seconds"));
        }
        let duration = Duration::try_from_secs_f64(duration)
            .map_err(|e| CommandError::invalid_parameter(format!("invalid duration: {}", e)))?;
        let kind: String = command.parameter("type")?;

        self.start_animation(&kind, duration).await
    }

    async fn on_identify(&mut self) -> Result<(), CommandError> {
        self.link.count()?;

        self.start_animation("blink", self.config.identify_period).await?;
        // Ends the blink even if something else replaced it meanwhile
        self.timers.insert(Timer::IdentifyEnd, self.config.identify_window);

        Ok(())
    }

    async fn on_pairing_changed(&mut self, info: Option<PairingInfo>) {
        match info {
            Some(info) => {
                log::info!("Pairing started: {:?}", info);
                match self.start_animation("blink", self.config.pairing_period).await {
                    Ok(()) => self.attention = true,
                    Err(e) => log::warn!("Unable to show pairing attention: {}", e),
                }
            }
            None => {
                log::info!("Pairing ended");
                // Leave alone whatever replaced the attention blink
                if self.attention {
                    self.stop_animation().await;
                }
            }
        }
    }

    async fn start_animation(&mut self, kind: &str, duration: Duration) -> Result<(), CommandError> {
        let result = self.engine.start(&mut self.link, kind, duration).await;
        if result.is_ok() {
            self.attention = false;
        }

        if let Err(e) = &result {
            match e {
                // Falls back to idle rather than keeping the old animation
                AnimationError::UnknownKind(_) => self.stop_animation().await,
                AnimationError::Link(link_error) => self.on_link_error(link_error).await,
                AnimationError::InvalidDuration | AnimationError::NoPeripherals => (),
            }
        }

        self.update_device_state();

        result.map_err(CommandError::from)
    }

    async fn stop_animation(&mut self) {
        self.attention = false;
        if !self.engine.is_running() {
            return;
        }

        let result = self.engine.stop(&mut self.link).await;
        self.update_device_state();

        match result {
            Ok(()) => self.publish_led_states(),
            Err(e) => self.on_link_error(&e).await,
        }
    }

    async fn on_link_error(&mut self, e: &LinkError) {
        if self.link.is_connected() {
            log::warn!("Peripheral write failed: {}", e);
        } else {
            self.on_link_lost().await;
        }
    }

    /// Tears down everything that depended on the lost connection and
    /// tries to get it back.
    async fn on_link_lost(&mut self) {
        let count = match self.led_components.take() {
            Some(count) => count,
            // Already handled for this connection
            None => return,
        };

        log::warn!("Lost peripheral service, dropping to idle");

        self.engine.abandon();
        self.attention = false;
        self.link.disconnect();
        if let Some(key) = self.heartbeat.take() {
            self.timers.try_remove(&key);
        }

        for index in 0..count {
            self.publish_led_state(index, false);
        }
        self.update_device_state();

        self.connect_link().await;
    }

    async fn connect_link(&mut self) {
        if let Some(key) = self.reconnect.take() {
            self.timers.try_remove(&key);
        }

        match self.link.connect().await {
            Ok(()) => {
                self.create_led_components_if_needed();
                self.update_device_state();
                self.schedule_heartbeat();
            }
            Err(e) => {
                log::debug!(
                    "Peripheral service not ready ({}), retrying in {:?}",
                    e,
                    self.config.reconnect_period
                );
                self.reconnect = Some(self.timers.insert(Timer::Reconnect, self.config.reconnect_period));
            }
        }
    }

    fn schedule_heartbeat(&mut self) {
        if let Some(period) = self.config.heartbeat_period {
            if let Some(key) = self.heartbeat.take() {
                self.timers.try_remove(&key);
            }
            self.heartbeat = Some(self.timers.insert(Timer::Heartbeat, period));
        }
    }

    /// Publishes one component per peripheral, once per connection.
    fn create_led_components_if_needed(&mut self) {
        if self.led_components.is_some() {
            return;
        }

        let (states, names) = match (self.link.get_all(), self.link.names()) {
            (Ok(states), Ok(names)) => (states, names),
            _ => return,
        };

        for (index, (on, name)) in states.iter().zip(names.iter()).enumerate() {
            let component = led_component(index);

            self.publisher.add_component(&component, &[ON_OFF_TRAIT, LED_INFO_TRAIT]);
            self.publisher
                .add_command_handler(&component, ON_OFF_TRAIT, SET_CONFIG_COMMAND);
            self.publisher
                .set_state_property(&component, ON_OFF_TRAIT, "state", json!(on_off(*on)));
            self.publisher
                .set_state_property(&component, LED_INFO_TRAIT, "name", json!(name));
        }

        log::info!("Published {} peripheral components", states.len());
        self.led_components = Some(states.len());
    }

    fn publish_led_state(&mut self, index: usize, on: bool) {
        self.publisher
            .set_state_property(&led_component(index), ON_OFF_TRAIT, "state", json!(on_off(on)));
    }

    fn publish_led_states(&mut self) {
        if let Ok(states) = self.link.get_all() {
            for (index, on) in states.into_iter().enumerate() {
                self.publish_led_state(index, on);
            }
        }
    }

    /// Derives the status from the engine and pushes it out.
    fn update_device_state(&mut self) {
        self.status = if self.engine.is_running() {
            Status::Animating
        } else {
            Status::Idle
        };

        self.publisher
            .set_state_property(FLASHER_COMPONENT, FLASHER_TRAIT, "status", json!(self.status.as_str()));
    }
}

fn unknown_command(command: &Command) -> CommandError {
    CommandError::new(
        UNKNOWN_COMMAND,
        format!("no handler for {}.{}", command.component(), command.name()),
    )
}
