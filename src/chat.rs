//! Console front end: one line per command, one line per received message.

use std::time::Duration;

use anyhow::anyhow;
use log::{debug, error};
use tokio::io::{AsyncBufReadExt as _, BufReader};

use crate::messages::SessionEvent;
use crate::profile::{AdvertiseMode, PowerProfile, TxPowerLevel};
use crate::session::BeaconSession;
use crate::settings::{Settings, SettingsStore};
use crate::transport::{BeaconTransport, SCAN_EVENTS_CLOSED};

const HELP: &str = "\
Type a line to set the message, or:
  /tx on|off        start or stop advertising the message
  /listen [seconds] listen for nearby beacons
  /stop             stop listening
  /power <level>    high, medium, low, ultra-low
  /mode <mode>      low-latency, balanced, low-power
  /status           show what is running
  /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Advertise(bool),
    Listen(Option<Duration>),
    StopListening,
    Power(String),
    Mode(String),
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };
    let rest = rest.trim_start();
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let arg = words.next();

    match (name, arg) {
        ("tx", Some("on")) => Ok(Command::Advertise(true)),
        ("tx", Some("off")) => Ok(Command::Advertise(false)),
        ("tx", _) => Err("usage: /tx on|off".to_string()),
        ("listen", None) => Ok(Command::Listen(None)),
        ("listen", Some(seconds)) => seconds
            .parse()
            .map(|s| Command::Listen(Some(Duration::from_secs(s))))
            .map_err(|_| format!("not a number of seconds: {}", seconds)),
        ("stop", _) => Ok(Command::StopListening),
        ("power", Some(_)) => Ok(Command::Power(rest["power".len()..].trim().to_string())),
        ("mode", Some(_)) => Ok(Command::Mode(rest["mode".len()..].trim().to_string())),
        ("power" | "mode", None) => Err(format!("usage: /{} <value>", name)),
        ("status", _) => Ok(Command::Status),
        ("help", _) => Ok(Command::Help),
        ("quit" | "exit", _) => Ok(Command::Quit),
        _ => Err(format!("unknown command /{}, try /help", name)),
    }
}

pub fn show(event: &SessionEvent) {
    match event {
        SessionEvent::Observed(observation) => {
            println!("{}: {}", observation.address, observation.message)
        }
        SessionEvent::AdvertiseStarted => println!("* advertising"),
        SessionEvent::AdvertiseFailed(reason) => println!("* {}", reason),
        SessionEvent::ScanFailed(SCAN_EVENTS_CLOSED) => {
            println!("* the radio stopped reporting, no longer listening")
        }
        SessionEvent::ScanFailed(code) => println!("* scan failed with error {}", code),
        SessionEvent::ScanExpired => println!("* stopped listening"),
    }
}

pub struct Chat<T> {
    session: BeaconSession<T>,
    settings: Settings,
    scan_duration: Duration,
}

impl<T: BeaconTransport> Chat<T> {
    pub fn new(session: BeaconSession<T>, settings: Settings, scan_duration: Duration) -> Self {
        Chat {
            session,
            settings,
            scan_duration,
        }
    }

    /// Runs until `/quit` or end of input, then stops the radio and saves
    /// the operator's choices.
    pub async fn run(mut self, store: &SettingsStore) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("{}", HELP);
        self.print_status();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("End of input");
                        break;
                    };
                    if !self.handle_line(&line).await {
                        break;
                    }
                }
                Some(input) = self.session.next_input() => {
                    if let Some(event) = self.session.apply(input).await {
                        show(&event);
                    }
                }
            }
        }

        self.session.shutdown().await;
        store.save(&self.settings)?;
        Ok(())
    }

    /// Returns false when the operator asked to quit.
    async fn handle_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{}", usage);
                return true;
            }
        };
        self.handle(command).await
    }

    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Say(message) => {
                if self.refuse_if_advertising() {
                    return true;
                }
                let size = message.len();
                let capacity = self.session.capacity();
                self.settings.last_message = message;
                if size > capacity {
                    println!("* message is {} bytes, only {} fit", size, capacity);
                } else {
                    println!("* message set ({}/{} bytes)", size, capacity);
                }
            }
            Command::Advertise(true) => {
                let profile = self.settings.profile();
                match self
                    .session
                    .start_advertising(&self.settings.last_message, profile)
                    .await
                {
                    Ok(()) => println!(
                        "* sending \"{}\" ({})",
                        self.settings.last_message, profile
                    ),
                    Err(err) => println!("* {}", err),
                }
            }
            Command::Advertise(false) => self.session.stop_advertising().await,
            Command::Listen(duration) => {
                let duration = duration.unwrap_or(self.scan_duration);
                match self.session.start_scanning(duration).await {
                    Ok(()) => println!("* listening for {}s", duration.as_secs()),
                    Err(err) => println!("* {}", err),
                }
            }
            Command::StopListening => self.session.stop_scanning().await,
            Command::Power(label) => {
                if !self.refuse_if_advertising() {
                    self.select_power(&label);
                }
            }
            Command::Mode(label) => {
                if !self.refuse_if_advertising() {
                    self.select_mode(&label);
                }
            }
            Command::Status => self.print_status(),
            Command::Help => println!("{}", HELP),
            Command::Quit => return false,
        }
        true
    }

    // Message and profile can't change under a running advertisement.
    // Tells the operator and returns true when that's the case.
    fn refuse_if_advertising(&self) -> bool {
        if self.session.is_advertising() {
            println!("* stop advertising first (/tx off)");
        }
        self.session.is_advertising()
    }

    fn select_power(&mut self, label: &str) {
        match label.parse::<TxPowerLevel>() {
            Ok(level) => {
                self.settings.tx_power_level = level;
                println!("* Tx power = {}", level);
            }
            Err(err) => {
                error!("{}", err);
                println!("* {}", err);
            }
        }
    }

    fn select_mode(&mut self, label: &str) {
        match label.parse::<AdvertiseMode>() {
            Ok(mode) => {
                self.settings.advertise_mode = mode;
                println!("* mode = {}", mode);
            }
            Err(err) => {
                error!("{}", err);
                println!("* {}", err);
            }
        }
    }

    fn print_status(&self) {
        println!(
            "* message \"{}\", {}, {:?}, {} devices seen",
            self.settings.last_message,
            self.settings.profile(),
            self.session.state(),
            self.session.sighting_count()
        );
    }
}

/// Advertises one message until interrupted or the radio gives up.
pub async fn advertise<T: BeaconTransport>(
    mut session: BeaconSession<T>,
    message: &str,
    profile: PowerProfile,
) -> anyhow::Result<()> {
    session.start_advertising(message, profile).await?;
    println!("* sending \"{}\" ({}), Ctrl-C to stop", message, profile);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let outcome = loop {
        tokio::select! {
            _ = &mut interrupted => break Ok(()),
            Some(input) = session.next_input() => match session.apply(input).await {
                Some(SessionEvent::AdvertiseFailed(reason)) => break Err(anyhow!(reason)),
                Some(event) => show(&event),
                None => {}
            }
        }
    };

    session.shutdown().await;
    outcome
}

/// Prints every new message heard until the scan runs out or is interrupted.
pub async fn listen<T: BeaconTransport>(
    mut session: BeaconSession<T>,
    duration: Duration,
) -> anyhow::Result<()> {
    session.start_scanning(duration).await?;
    println!("* listening for {}s, Ctrl-C to stop", duration.as_secs());

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let outcome = loop {
        tokio::select! {
            _ = &mut interrupted => break Ok(()),
            Some(input) = session.next_input() => match session.apply(input).await {
                Some(SessionEvent::ScanFailed(code)) => {
                    break Err(anyhow!("scan failed with error {}", code))
                }
                Some(SessionEvent::ScanExpired) => break Ok(()),
                Some(event) => show(&event),
                None => {}
            }
        }
    };

    session.shutdown().await;
    outcome
}
