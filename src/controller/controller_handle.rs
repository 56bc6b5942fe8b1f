//! Sampler Handle - lifecycle of the sampling thread
//!
//! The loop owns its [`InputSource`] and a [`Sampler`], and hands every produced
//! event straight to an [`InputSink`] on the sampling thread itself. `stop` joins
//! the thread before returning, so no input can reach the sink afterwards.
//!
//! ```text
//! InputSource ──poll──► Sampler::tick ──InputEvent──► InputSink
//!   (gilrs)             (dead zone,                   (mapping engine)
//!                        filter, edges)
//! ```

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

pub use super::event_collector::{InputSource, SamplerError};
pub use super::event_processor::{InputEvent, Sampler, SamplerSettings};

/// Receives input events, on the sampling thread
///
/// Implementations must return quickly; the next tick waits for them.
pub trait InputSink: Send + Sync {
    fn on_input(&self, event: &InputEvent);
}

struct Running {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Stopped/Running state of the single sampling loop
pub struct SamplerHandle {
    settings: SamplerSettings,
    sink: Arc<dyn InputSink>,
    running: Option<Running>,
}

impl SamplerHandle {
    pub fn new(settings: SamplerSettings, sink: Arc<dyn InputSink>) -> Self {
        Self {
            settings,
            sink,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Takes effect on the next `start`
    pub fn update_settings(&mut self, settings: SamplerSettings) {
        self.settings = settings;
    }

    /// Starts the sampling thread; returns `Ok(false)` if it is already running
    ///
    /// The source is built on the sampling thread by `open`, since device
    /// backends are not necessarily `Send`.
    ///
    /// # Errors
    ///
    /// [`SamplerError::InitializationError`] when `open` fails, and
    /// [`SamplerError::ThreadError`] when the thread cannot be spawned.
    pub fn start<S, F>(&mut self, open: F) -> Result<bool, SamplerError>
    where
        S: InputSource + 'static,
        F: FnOnce() -> Result<S, SamplerError> + Send + 'static,
    {
        if self.running.is_some() {
            debug!("Sampler already running, start ignored");
            return Ok(false);
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), SamplerError>>();
        let settings = self.settings;
        let sink = Arc::clone(&self.sink);

        let thread = thread::Builder::new()
            .name("input-sampler".into())
            .spawn(move || {
                let source = match open() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_sampling_loop(source, settings, sink.as_ref(), &stop_rx);
            })
            .map_err(|e| SamplerError::ThreadError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(SamplerError::ThreadError("sampler exited during startup".into())));
        if let Err(e) = ready {
            error!("Failed to start sampler: {}", e);
            if thread.join().is_err() {
                error!("Sampler thread panicked during startup");
            }
            return Err(e);
        }

        info!(
            "Sampler started (tick {:?}, dead zone {:.2})",
            settings.tick, settings.analog.dead_zone
        );
        self.running = Some(Running {
            stop: stop_tx,
            thread,
        });
        Ok(true)
    }

    /// Stops and joins the sampling thread
    ///
    /// Once the thread is gone the sink receives [`InputEvent::SamplingStopped`]
    /// so it can cancel whatever timers it owns.
    pub fn stop(&mut self) {
        let Some(Running { stop, thread }) = self.running.take() else {
            return;
        };
        drop(stop);
        if thread.join().is_err() {
            error!("Sampler thread panicked");
        }
        info!("Sampler stopped");
        self.sink.on_input(&InputEvent::SamplingStopped);
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sampling_loop<S: InputSource>(
    mut source: S,
    settings: SamplerSettings,
    sink: &dyn InputSink,
    stop: &mpsc::Receiver<()>,
) {
    let mut sampler = Sampler::new(&settings);
    let mut ticks: u64 = 0;

    loop {
        let snapshot = source.poll();
        for event in sampler.tick(snapshot.as_ref()) {
            sink.on_input(&event);
        }
        ticks += 1;

        let wait = if snapshot.is_some() {
            settings.tick
        } else {
            settings.idle_poll
        };
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if sampler.device_present() {
        warn!("Sampling stopped while a gamepad is connected");
    }
    debug!("Sampling loop exited after {} ticks", ticks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::buttons::{ButtonId, ButtonReading};
    use crate::controller::event_collector::ScriptedSource;
    use crate::controller::event_processor::DeviceSnapshot;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<InputEvent>>);

    impl InputSink for Recorder {
        fn on_input(&self, event: &InputEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn fast() -> SamplerSettings {
        SamplerSettings {
            tick: Duration::from_millis(1),
            idle_poll: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn runs_until_stopped_and_reports_stop_last() {
        let recorder = Arc::new(Recorder::default());
        let mut handle = SamplerHandle::new(fast(), recorder.clone());

        let pressed = DeviceSnapshot::default().with_button(ButtonId::A, ButtonReading::digital(true));
        assert!(handle
            .start(move || Ok(ScriptedSource::new([Some(pressed)])))
            .unwrap());
        assert!(handle.is_running());

        thread::sleep(Duration::from_millis(30));
        handle.stop();
        assert!(!handle.is_running());

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events[0], InputEvent::DeviceConnected(true));
        assert_eq!(events[1], InputEvent::ButtonPressed(ButtonId::A));
        assert_eq!(events.last(), Some(&InputEvent::SamplingStopped));
        assert_eq!(events.len(), 3);

        // nothing arrives after stop returned
        thread::sleep(Duration::from_millis(10));
        assert_eq!(recorder.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn second_start_is_a_no_op() {
        let recorder = Arc::new(Recorder::default());
        let mut handle = SamplerHandle::new(fast(), recorder);
        assert!(handle.start(|| Ok(ScriptedSource::default())).unwrap());
        assert!(!handle.start(|| Ok(ScriptedSource::default())).unwrap());
        handle.stop();
    }

    #[test]
    fn failed_backend_leaves_handle_stopped() {
        let recorder = Arc::new(Recorder::default());
        let mut handle = SamplerHandle::new(fast(), recorder.clone());
        let result = handle.start(|| {
            Err::<ScriptedSource, _>(SamplerError::InitializationError("no backend".into()))
        });
        assert!(matches!(result, Err(SamplerError::InitializationError(_))));
        assert!(!handle.is_running());
        handle.stop();
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
