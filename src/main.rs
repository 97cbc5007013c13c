//! voxlink - voice calls with a realtime AI agent from the terminal.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use voxlink::config::SessionConfig;
use voxlink::gateway::{self, GatewayState};
use voxlink::media::capture::list_input_devices;
use voxlink::session::{Role, SessionController, SessionEvent};
use voxlink::signaling::{ControlPlaneClient, SignalingClient};

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "voxlink", about = "voxlink - realtime voice calls", version = VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a voice call using the stored settings.
    Call {
        /// Control-plane gateway URL.
        #[arg(short, long, default_value = "http://localhost:8080")]
        gateway: String,
        /// Override the model from the stored settings.
        #[arg(long)]
        model: Option<String>,
        /// Override the voice from the stored settings.
        #[arg(long)]
        voice: Option<String>,
        /// Capture device name (see `voxlink devices`).
        #[arg(long)]
        microphone: Option<String>,
    },
    /// Run the control-plane gateway.
    Gateway {
        /// Gateway port.
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Show or update the stored call settings.
    Settings {
        /// Control-plane gateway URL.
        #[arg(short, long, default_value = "http://localhost:8080")]
        gateway: String,
        /// New instructions text.
        #[arg(long)]
        instructions: Option<String>,
        /// New voice identifier.
        #[arg(long)]
        voice: Option<String>,
        /// New model identifier.
        #[arg(long)]
        model: Option<String>,
        /// New initial greeting.
        #[arg(long)]
        greeting: Option<String>,
    },
    /// List audio input devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Call { gateway, model, voice, microphone } => {
            run_call(&gateway, model, voice, microphone).await
        }
        Commands::Gateway { port } => {
            gateway::serve(Arc::new(GatewayState::from_env()), port).await
        }
        Commands::Settings { gateway, instructions, voice, model, greeting } => {
            run_settings(&gateway, instructions, voice, model, greeting).await
        }
        Commands::Devices => {
            let devices = list_input_devices();
            if devices.is_empty() {
                println!("No input devices found.");
            } else {
                for name in devices {
                    println!("{}", name);
                }
            }
            Ok(())
        }
    }
}

async fn run_call(
    gateway_url: &str,
    model: Option<String>,
    voice: Option<String>,
    microphone: Option<String>,
) -> anyhow::Result<()> {
    let control_plane = ControlPlaneClient::new(gateway_url);

    let mut config = control_plane.fetch_settings().await.unwrap_or_default();
    if let Some(model) = model {
        config.model = model;
    }
    if let Some(voice) = voice {
        config.voice = voice;
    }
    if let Some(microphone) = microphone {
        config.microphone_id = Some(microphone);
    }

    let (controller, mut events) = SessionController::new(SignalingClient::new(control_plane));
    println!("Calling ({} / {})... press Ctrl+C to hang up.", config.model, config.voice);
    controller.start(config).await?;

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        if print_event(&event) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                controller.stop().await;
            }
        }
    }
    Ok(())
}

/// Print one session event; returns true when the call is over.
fn print_event(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::Transcript { role, text, at } => {
            let who = match role {
                Role::User => "you",
                Role::Assistant => "agent",
            };
            println!("[{}] {}: {}", at.format("%H:%M:%S"), who, text);
            false
        }
        SessionEvent::Notice(text) => {
            println!("* {}", text);
            false
        }
        SessionEvent::Summary(summary) => {
            println!(
                "* Call ended. Total tokens: {} (in: {}, out: {})",
                summary.usage.total_tokens, summary.usage.input_tokens, summary.usage.output_tokens
            );
            println!("* Estimated cost: ${:.4} (~¥{:.0})", summary.cost.usd, summary.cost.converted);
            true
        }
        SessionEvent::Failed(msg) => {
            eprintln!("{}", msg);
            true
        }
    }
}

async fn run_settings(
    gateway_url: &str,
    instructions: Option<String>,
    voice: Option<String>,
    model: Option<String>,
    greeting: Option<String>,
) -> anyhow::Result<()> {
    let control_plane = ControlPlaneClient::new(gateway_url);
    let mut config = control_plane.fetch_settings().await.unwrap_or_else(|| {
        warn!("No stored settings, starting from defaults");
        SessionConfig::default()
    });

    let changed =
        instructions.is_some() || voice.is_some() || model.is_some() || greeting.is_some();
    if let Some(instructions) = instructions {
        config.instructions = instructions;
    }
    if let Some(voice) = voice {
        config.voice = voice;
    }
    if let Some(model) = model {
        config.model = model;
    }
    if let Some(greeting) = greeting {
        config.initial_greeting = Some(greeting);
    }

    if changed {
        control_plane.store_settings(&config).await?;
        println!("Settings saved.");
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
