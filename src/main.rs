use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use eddystone_chat::chat;
use eddystone_chat::codec::FrameCodec;
use eddystone_chat::config::AppConfig;
use eddystone_chat::profile::{AdvertiseMode, TxPowerLevel};
use eddystone_chat::session::BeaconSession;
use eddystone_chat::settings::SettingsStore;
use eddystone_chat::transport::{self, BeaconTransport};

/// Chat with nearby devices through Eddystone service-data advertisements.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = TransportKind::native())]
    transport: TransportKind,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum TransportKind {
    /// The local Bluetooth adapter (Linux)
    Bluez,
    /// An in-process radio that hears only itself
    Loopback,
}

impl TransportKind {
    fn native() -> Self {
        if cfg!(target_os = "linux") {
            TransportKind::Bluez
        } else {
            TransportKind::Loopback
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Advertise one message until interrupted
    Advertise {
        /// Defaults to the last message sent from chat
        message: Option<String>,
        #[arg(long, value_enum)]
        power: Option<TxPowerLevel>,
        #[arg(long, value_enum)]
        mode: Option<AdvertiseMode>,
    },
    /// Print messages from nearby beacons
    Listen {
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;
    let codec = FrameCodec::new(config.max_advertisement_bytes());
    let (inputs_tx, inputs_rx) = transport::input_channel();

    match cli.transport {
        #[cfg(target_os = "linux")]
        TransportKind::Bluez => {
            // No adapter, or one that cannot advertise, ends the program here.
            let transport =
                transport::bluez::BluezTransport::connect(inputs_tx.clone(), config.connectable())
                    .await?;
            let session = BeaconSession::new(transport, codec, inputs_tx, inputs_rx);
            run(cli.command, session, &config).await
        }
        #[cfg(not(target_os = "linux"))]
        TransportKind::Bluez => anyhow::bail!("the bluez transport is only available on Linux"),
        TransportKind::Loopback => {
            let transport = transport::loopback::LoopbackTransport::new(inputs_tx.clone());
            let session = BeaconSession::new(transport, codec, inputs_tx, inputs_rx);
            run(cli.command, session, &config).await
        }
    }
}

async fn run<T: BeaconTransport>(
    command: Option<Command>,
    session: BeaconSession<T>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let store = SettingsStore::new(config.settings_path());
    let mut settings = store.load();

    match command.unwrap_or(Command::Chat) {
        Command::Chat => {
            chat::Chat::new(session, settings, config.scan_duration())
                .run(&store)
                .await
        }
        Command::Advertise {
            message,
            power,
            mode,
        } => {
            if let Some(message) = message {
                settings.last_message = message;
            }
            if let Some(power) = power {
                settings.tx_power_level = power;
            }
            if let Some(mode) = mode {
                settings.advertise_mode = mode;
            }
            chat::advertise(session, &settings.last_message, settings.profile()).await
        }
        Command::Listen { seconds } => {
            let duration = seconds
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.scan_duration());
            chat::listen(session, duration).await
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();

        let cli = Cli::parse_from([
            "eddystone-chat",
            "--transport",
            "loopback",
            "advertise",
            "hi",
            "--power",
            "ultra-low",
        ]);
        assert_eq!(cli.transport, TransportKind::Loopback);
        match cli.command {
            Some(Command::Advertise { message, power, mode }) => {
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(power, Some(TxPowerLevel::UltraLow));
                assert_eq!(mode, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
