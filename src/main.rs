use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use stimlink::config::AppConfig;
use stimlink::controller::{GilrsSource, SamplerHandle};
use stimlink::mapping::MappingEngine;
use stimlink::parameters::RemoteParameters;
use stimlink::session::protocol::kinds;
use stimlink::session::{
    CommandSink, ConnectionState, ServerEvent, Session, TcpConnector, Topic,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::config_path();
    AppConfig::ensure_default_config(&config_path).await?;
    let mut config = AppConfig::load_from(&config_path).await?;
    apply_args(&mut config);

    // Session
    let session = Session::new(TcpConnector::default(), config.session_options());
    register_logging(&session);
    let commands: Arc<dyn CommandSink> = Arc::new(session.clone());

    // Parameter owner and mapping engine
    let parameters = Arc::new(RemoteParameters::new(
        config.limits,
        config.slider_window(),
        Arc::clone(&commands),
        Handle::current(),
    ));
    parameters.attach(&session);

    let engine = Arc::new(
        MappingEngine::new(
            config.engine_settings(),
            Arc::clone(&commands),
            parameters.clone(),
        )
        .map_err(|e| eyre!("Failed to create mapping engine: {}", e))?,
    );

    // Sampler
    let mut sampler = SamplerHandle::new(config.sampler_settings(), engine.clone());
    if config.gamepad.enabled {
        if let Err(e) = sampler.start(GilrsSource::open) {
            warn!("Gamepad input unavailable: {}", e);
        }
    } else {
        info!("Gamepad input disabled in config");
    }

    let _state_sync = spawn_state_requests(session.clone());
    let _status = spawn_status_reporter(session.clone(), engine.clone());

    session.connect(None, config.server.port);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutting down");

    tokio::task::block_in_place(|| sampler.stop());
    parameters.cancel_pending();
    session.disconnect();

    config.save_to(&config_path).await?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

// `--gamepad` / `--no-gamepad` flip the persisted setting
fn apply_args(config: &mut AppConfig) {
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--gamepad" => config.gamepad.enabled = true,
            "--no-gamepad" => config.gamepad.enabled = false,
            other => warn!("Ignoring unknown argument: {}", other),
        }
    }
}

fn register_logging(session: &Session) {
    session.on(Topic::ReconnectFailed, |_| {
        error!("Server unreachable, giving up until restarted");
        Ok(())
    });
    session.on(Topic::message(kinds::WELCOME), |envelope| {
        if let ServerEvent::Welcome(welcome) = ServerEvent::try_from(envelope)? {
            info!(
                "Server says hello (version {})",
                welcome.version.as_deref().unwrap_or("unknown")
            );
        }
        Ok(())
    });
    session.on(Topic::message(kinds::PLAY_STATE_UPDATE), |envelope| {
        if let ServerEvent::PlayStateUpdate { state } = ServerEvent::try_from(envelope)? {
            info!("Play state: {}", state);
        }
        Ok(())
    });
    session.on(Topic::message(kinds::ERROR), |envelope| {
        if let ServerEvent::Error { error } = ServerEvent::try_from(envelope)? {
            warn!("Server reported an error: {}", error);
        }
        Ok(())
    });
}

// Asks for a full snapshot every time the session opens
fn spawn_state_requests(session: Session) -> tokio::task::JoinHandle<()> {
    let mut state = session.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            if current == ConnectionState::Open && !session.request_state() {
                debug!("State request dropped");
            }
        }
    })
}

fn spawn_status_reporter(
    session: Session,
    engine: Arc<MappingEngine>,
) -> tokio::task::JoinHandle<()> {
    let position = engine.watch_position();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let status = session.status();
            let at = *position.borrow();
            info!(
                "Session {:?}: sent {} received {} dropped {}, position ({:.2}, {:.2}), {} repeating",
                status.state,
                status.frames_sent,
                status.frames_received,
                status.frames_dropped,
                at.alpha,
                at.beta,
                engine.active_repeats()
            );
        }
    })
}
