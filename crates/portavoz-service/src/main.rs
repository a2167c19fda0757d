//! portavoz - speech I/O mediator service.
//!
//! Bridges the assistant runtime's event bus (JSON lines on stdio) and the
//! speech transport backends. Exits 0 on clean shutdown (bus EOF),
//! non-zero when initialization fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use portavoz_audio::{EnergyMatcher, TriggerGate};
use portavoz_config::ServiceConfig;
use portavoz_provider::{GoogleCloud, SpeechProvider, VoiceGender};
use portavoz_service::backend::{Backend, NetForwarder, TextLine, VoiceBackend, VoiceOptions};
use portavoz_service::bus::{EventSink, InboundEvent, OutboundEvent, StdioBus};
use portavoz_service::{EventBridge, MethodMultiplexer, OutputStorage};

/// Longest say string accepted from the bus, and the chunk cap for
/// published listen strings.
const EVENT_BODY_MAX_BYTES: usize = 2048;

/// Stand-in trigger matcher sensitivity (normalized mean amplitude).
const TRIGGER_ENERGY_THRESHOLD: f32 = 0.1;

#[derive(Parser)]
#[command(name = "portavoz")]
#[command(author, version, about = "Speech I/O mediator service", long_about = None)]
struct Cli {
    /// Configuration file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the socket directory from the configuration.
    #[arg(long)]
    socket_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    if let Some(dir) = &cli.socket_dir {
        config.service.socket_dir.clone_from(dir);
    }

    run(cli, config)
}

fn load_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    match &cli.config {
        Some(path) => {
            let config = ServiceConfig::load(path)?;
            tracing::info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => Ok(ServiceConfig::default()),
    }
}

fn run(cli: Cli, config: ServiceConfig) -> anyhow::Result<()> {
    let storage = Arc::new(OutputStorage::new(EVENT_BODY_MAX_BYTES));
    let (bus, inbound) = StdioBus::spawn()?;
    let sink: Arc<dyn EventSink> = Arc::new(bus);
    let bridge = Arc::new(EventBridge::new(Arc::clone(&sink), EVENT_BODY_MAX_BYTES));

    let backends = build_backends(&config)?;
    let mux = MethodMultiplexer::spawn(
        backends,
        Arc::clone(&storage),
        Arc::clone(&bridge),
        Duration::from_millis(u64::from(config.service.method_wait_ms)),
    )?;

    tracing::info!("portavoz service initialized");

    // Event dispatch until the runtime closes the bus.
    loop {
        match inbound.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => dispatch(event, &cli, &storage, &mux, &sink),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                tracing::info!("event bus closed, shutting down");
                break;
            }
        }
    }

    drop(mux);
    Ok(())
}

/// Build the backend list in priority order: a connected CLI preempts the
/// forwarder, which preempts voice. A backend that fails to come up is
/// skipped with a warning; a service with no backends at all cannot work.
fn build_backends(config: &ServiceConfig) -> anyhow::Result<Vec<Backend>> {
    let mut backends = Vec::new();

    let cli_socket = portavoz_stream::channel_socket_path(&config.service.socket_dir, "cli");
    match TextLine::new(&cli_socket) {
        Ok(backend) => backends.push(Backend::TextLine(backend)),
        Err(e) => tracing::warn!(error = %e, "failed to add text-line method"),
    }

    match NetForwarder::new(
        &config.text.socket_path,
        Duration::from_secs(u64::from(config.text.receive_timeout_s)),
    ) {
        Ok(backend) => backends.push(Backend::NetForwarder(backend)),
        Err(e) => tracing::warn!(error = %e, "failed to add net-forwarder method"),
    }

    match build_voice(config) {
        Ok(backend) => backends.push(Backend::Voice(Box::new(backend))),
        Err(e) => tracing::warn!(error = %e, "failed to add voice method"),
    }

    if backends.is_empty() {
        anyhow::bail!("no usable speech methods");
    }
    Ok(backends)
}

fn build_voice(config: &ServiceConfig) -> anyhow::Result<VoiceBackend> {
    let provider: Arc<dyn SpeechProvider> = match config.voice.provider.as_str() {
        "google" => Arc::new(GoogleCloud::new()),
        other => anyhow::bail!("unknown speech provider '{other}'"),
    };

    let gate = if config.trigger.enabled {
        // The energy matcher is a development stand-in until a real
        // wake-word recognizer is wired to the configured keyphrase.
        tracing::info!(keyphrase = %config.trigger.keyphrase, "trigger gate enabled");
        TriggerGate::new(
            Box::new(EnergyMatcher::new(TRIGGER_ENERGY_THRESHOLD)),
            Duration::from_secs(u64::from(config.trigger.timeout_s)),
        )
    } else {
        TriggerGate::disabled()
    };

    let backend = VoiceBackend::new(
        VoiceOptions {
            socket_path: config.voice.socket_path.clone(),
            recording_hz: config.voice.recording_hz,
            playback_hz: config.voice.playback_hz,
            recording_timeout: Duration::from_secs(u64::from(config.voice.recording_timeout_s)),
            record_storage_secs: config.voice.record_storage_secs,
            language_code: config.provider.language_code.clone(),
            voice_gender: VoiceGender::from_config(config.provider.voice_gender),
        },
        provider,
        gate,
    )?;
    Ok(backend)
}

fn dispatch(
    event: InboundEvent,
    cli: &Cli,
    storage: &OutputStorage,
    mux: &MethodMultiplexer,
    sink: &Arc<dyn EventSink>,
) {
    let result = match event {
        InboundEvent::SayStringRequest {
            text,
            string_id,
            group_id,
        } => {
            storage.add(text, string_id, group_id);
            Ok(())
        }
        InboundEvent::ListenAvailRequest => sink.emit(&OutboundEvent::ListenAvailResponse {
            available: mux.any_viable(),
        }),
        InboundEvent::SayAvailRequest => sink.emit(&OutboundEvent::SayAvailResponse {
            available: mux.any_viable(),
        }),
        InboundEvent::ResetRequest => {
            storage.clear();
            mux.request_reset();
            // Socket layout changes need a restart; value changes are
            // logged so the operator sees what the reload picked up.
            if let Some(path) = &cli.config {
                match ServiceConfig::load(path) {
                    Ok(_) => tracing::info!("configuration reloaded on reset"),
                    Err(e) => tracing::error!(error = %e, "configuration reload failed"),
                }
            }
            Ok(())
        }
        InboundEvent::ListenGetMethod => sink.emit(&OutboundEvent::ListenMethodResponse {
            method: mux.method(),
        }),
        InboundEvent::SayGetMethod => sink.emit(&OutboundEvent::SayMethodResponse {
            method: mux.method(),
        }),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "failed to answer bus event");
    }
}
