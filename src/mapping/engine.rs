//! Mapping engine: sampled input in, throttled commands and control actions out
//!
//! # Architecture
//!
//! ```text
//!                    ┌─► significance-filtered ─► display watch
//! PositionChanged ───┤
//! submit_position ───┴─► Throttle (100ms) ─► set_position ─► CommandSink
//!
//! ButtonPressed ──► stepped action ─► RepeatTimers (100ms) ─► ActionSink
//!               └─► shock / mute ───────────────────────────► ActionSink
//! ```
//!
//! The engine is called synchronously from the sampling thread and owns every
//! timer it starts. Device loss and sampler stop cancel all of them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use super::actions::{Action, ActionSink, Bindings, ControlAction, StepSizes};
use super::error::MappingError;
use super::repeat::{RepeatTimers, DEFAULT_REPEAT_INTERVAL};
use super::throttle::Throttle;
use crate::controller::{ButtonId, InputEvent, InputSink, Position};
use crate::session::protocol::PositionCommand;
use crate::session::{Command, CommandSink};

pub const DEFAULT_POSITION_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub position_window: Duration,
    pub repeat_interval: Duration,
    pub steps: StepSizes,
    pub bindings: Bindings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            position_window: DEFAULT_POSITION_WINDOW,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
            steps: StepSizes::default(),
            bindings: Bindings::defaults(),
        }
    }
}

pub struct MappingEngine {
    position: Throttle<Position>,
    display: watch::Sender<Position>,
    repeats: RepeatTimers<ButtonId>,
    bindings: Bindings,
    steps: StepSizes,
    actions: Arc<dyn ActionSink>,
    shock_engaged: AtomicBool,
}

impl MappingEngine {
    /// Builds an engine whose timers run on the current tokio runtime
    ///
    /// # Errors
    ///
    /// [`MappingError::InitializationError`] when called outside a runtime.
    pub fn new(
        settings: EngineSettings,
        commands: Arc<dyn CommandSink>,
        actions: Arc<dyn ActionSink>,
    ) -> Result<Self, MappingError> {
        let runtime = Handle::try_current()
            .map_err(|e| MappingError::InitializationError(format!("no tokio runtime: {}", e)))?;
        Ok(Self::with_runtime(settings, commands, actions, runtime))
    }

    pub fn with_runtime(
        settings: EngineSettings,
        commands: Arc<dyn CommandSink>,
        actions: Arc<dyn ActionSink>,
        runtime: Handle,
    ) -> Self {
        let interval = settings.position_window.as_secs_f64();
        let position = Throttle::new(
            "position",
            settings.position_window,
            runtime.clone(),
            move |p: Position| {
                let command = Command::SetPosition(PositionCommand {
                    alpha: Some(f64::from(p.alpha)),
                    beta: Some(f64::from(p.beta)),
                    gamma: None,
                    interval,
                });
                if !commands.send_command(&command) {
                    debug!("Position update dropped, session not open");
                }
            },
        );
        let (display, _) = watch::channel(Position::CENTER);

        info!(
            "Mapping engine ready (position window {:?}, repeat {:?})",
            settings.position_window, settings.repeat_interval
        );
        Self {
            position,
            display,
            repeats: RepeatTimers::new(settings.repeat_interval, runtime),
            bindings: settings.bindings,
            steps: settings.steps,
            actions,
            shock_engaged: AtomicBool::new(false),
        }
    }

    /// Last significant stick position, for display collaborators
    pub fn watch_position(&self) -> watch::Receiver<Position> {
        self.display.subscribe()
    }

    /// Entry point for pointer and touch drags; skips the stick significance filter
    /// and the display channel, and goes straight into the position throttle
    pub fn submit_position(&self, position: Position) {
        self.position.submit(position.clamped());
    }

    pub fn active_repeats(&self) -> usize {
        self.repeats.active()
    }

    /// Cancels every timer the engine owns and lets go of a held shock
    pub fn stop_all(&self) {
        let stopped = self.repeats.stop_all();
        self.position.cancel();
        if self.shock_engaged.swap(false, Ordering::SeqCst) {
            self.actions.apply(ControlAction::Shock { engaged: false });
        }
        debug!("Engine stopped {} repeat timers", stopped);
    }

    fn press(&self, button: ButtonId) {
        let mut stepped = Vec::new();
        for action in self.bindings.actions_for(button) {
            match action {
                Action::Shock => {
                    if !self.shock_engaged.swap(true, Ordering::SeqCst) {
                        self.actions.apply(ControlAction::Shock { engaged: true });
                    }
                }
                Action::Mute => self.actions.apply(ControlAction::ToggleMute),
                _ => stepped.extend(action.adjustment(&self.steps)),
            }
        }

        if stepped.is_empty() {
            return;
        }
        let sink = Arc::clone(&self.actions);
        self.repeats.press(button, move || {
            for action in &stepped {
                sink.apply(*action);
            }
        });
    }

    fn release(&self, button: ButtonId) {
        self.repeats.release(&button);
        if self.bindings.actions_for(button).contains(&Action::Shock)
            && self.shock_engaged.swap(false, Ordering::SeqCst)
        {
            self.actions.apply(ControlAction::Shock { engaged: false });
        }
    }
}

impl InputSink for MappingEngine {
    fn on_input(&self, event: &InputEvent) {
        match event {
            InputEvent::PositionChanged(position) => {
                self.display.send_replace(*position);
                self.position.submit(*position);
            }
            InputEvent::ButtonPressed(button) => self.press(*button),
            InputEvent::ButtonReleased(button) => self.release(*button),
            InputEvent::DeviceConnected(true) => {}
            InputEvent::DeviceConnected(false) | InputEvent::SamplingStopped => self.stop_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::actions::Parameter;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Commands(Mutex<Vec<Command>>);

    impl CommandSink for Commands {
        fn send_command(&self, command: &Command) -> bool {
            self.0.lock().unwrap().push(command.clone());
            true
        }
    }

    #[derive(Default)]
    struct Actions(Mutex<Vec<ControlAction>>);

    impl ActionSink for Actions {
        fn apply(&self, action: ControlAction) {
            self.0.lock().unwrap().push(action);
        }
    }

    fn engine() -> (MappingEngine, Arc<Commands>, Arc<Actions>) {
        let commands = Arc::new(Commands::default());
        let actions = Arc::new(Actions::default());
        let engine = MappingEngine::new(
            EngineSettings::default(),
            commands.clone(),
            actions.clone(),
        )
        .unwrap();
        (engine, commands, actions)
    }

    #[test]
    fn needs_a_runtime() {
        let result = MappingEngine::new(
            EngineSettings::default(),
            Arc::new(Commands::default()),
            Arc::new(Actions::default()),
        );
        assert!(matches!(result, Err(MappingError::InitializationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn position_is_displayed_and_throttled() {
        let (engine, commands, _) = engine();
        let display = engine.watch_position();

        engine.on_input(&InputEvent::PositionChanged(Position::new(0.5, 0.0)));
        engine.on_input(&InputEvent::PositionChanged(Position::new(0.6, 0.0)));
        engine.on_input(&InputEvent::PositionChanged(Position::new(0.7, 0.1)));
        assert_eq!(*display.borrow(), Position::new(0.7, 0.1));
        assert_eq!(commands.0.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        let sent = commands.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        match &sent[1] {
            Command::SetPosition(p) => {
                assert_eq!(p.alpha, Some(f64::from(0.7f32)));
                assert_eq!(p.beta, Some(f64::from(0.1f32)));
                assert_eq!(p.interval, 0.1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pointer_bypasses_display() {
        let (engine, commands, _) = engine();
        let display = engine.watch_position();
        engine.submit_position(Position::new(2.0, -0.001));
        assert_eq!(*display.borrow(), Position::CENTER);
        match &commands.0.lock().unwrap()[0] {
            Command::SetPosition(p) => assert_eq!(p.alpha, Some(1.0)),
            other => panic!("unexpected {:?}", other),
        };
    }

    #[tokio::test(start_paused = true)]
    async fn held_button_repeats_until_release() {
        let (engine, _, actions) = engine();

        engine.on_input(&InputEvent::ButtonPressed(ButtonId::Rb));
        tokio::time::sleep(Duration::from_millis(350)).await;
        engine.on_input(&InputEvent::ButtonReleased(ButtonId::Rb));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let applied = actions.0.lock().unwrap().clone();
        assert_eq!(applied.len(), 4);
        assert!(applied.iter().all(|a| *a
            == ControlAction::Adjust {
                parameter: Parameter::Carrier,
                delta: 10.0
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn shock_engages_once_and_releases() {
        let (engine, _, actions) = engine();
        engine.on_input(&InputEvent::ButtonPressed(ButtonId::A));
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.on_input(&InputEvent::ButtonReleased(ButtonId::A));
        engine.on_input(&InputEvent::ButtonPressed(ButtonId::B));
        engine.on_input(&InputEvent::ButtonReleased(ButtonId::B));

        assert_eq!(
            *actions.0.lock().unwrap(),
            vec![
                ControlAction::Shock { engaged: true },
                ControlAction::Shock { engaged: false },
                ControlAction::ToggleMute,
            ]
        );
        assert_eq!(engine.active_repeats(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn device_loss_stops_everything() {
        let (engine, commands, actions) = engine();
        engine.on_input(&InputEvent::ButtonPressed(ButtonId::DpadUp));
        engine.on_input(&InputEvent::ButtonPressed(ButtonId::A));
        engine.on_input(&InputEvent::PositionChanged(Position::new(0.3, 0.3)));
        engine.on_input(&InputEvent::PositionChanged(Position::new(0.4, 0.3)));
        assert_eq!(engine.active_repeats(), 1);

        engine.on_input(&InputEvent::DeviceConnected(false));
        assert_eq!(engine.active_repeats(), 0);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let applied = actions.0.lock().unwrap().clone();
        assert_eq!(
            applied,
            vec![
                ControlAction::Adjust {
                    parameter: Parameter::Volume,
                    delta: 1.0
                },
                ControlAction::Shock { engaged: true },
                ControlAction::Shock { engaged: false },
            ]
        );
        // the pending trailing position was cancelled too
        assert_eq!(commands.0.lock().unwrap().len(), 1);
    }
}
