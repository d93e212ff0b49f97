//! Headless line console
//!
//! Reads commands from stdin, one per line. Lines starting with `:` are
//! console commands; anything else is sent to the controller as a tracked
//! Action command.

use laserdeck_communication::{OutgoingCommand, RelaysPatch, SerialService};
use laserdeck_core::{Severity, SubscriptionId};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Command that starts a homing cycle
pub const HOMING_COMMAND: &str = "$H";

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Connect,
    Disconnect,
    Status,
    Settings,
    Log,
    Relay(RelaysPatch),
    Home,
    Quit,
    Help,
    /// Free text for the controller
    Send(String),
}

/// A console line that could not be understood
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

const HELP: &str = "\
:connect                  connect to the controller
:disconnect               close the link
:status                   request and show machine status
:settings                 request and show controller settings
:log                      show the traffic log
:relay <name> <on|off>    switch interlock, alarm, lights, accessory or air_assist
:home                     run the homing cycle
:quit                     exit
<anything else>           send as a controller command";

impl ConsoleCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Option<Result<Self, ParseError>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix(':') else {
            return Some(Ok(ConsoleCommand::Send(line.to_string())));
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let command = match (name, args.as_slice()) {
            ("connect", []) => Ok(ConsoleCommand::Connect),
            ("disconnect", []) => Ok(ConsoleCommand::Disconnect),
            ("status", []) => Ok(ConsoleCommand::Status),
            ("settings", []) => Ok(ConsoleCommand::Settings),
            ("log", []) => Ok(ConsoleCommand::Log),
            ("home", []) => Ok(ConsoleCommand::Home),
            ("quit" | "q" | "exit", []) => Ok(ConsoleCommand::Quit),
            ("help" | "?", []) => Ok(ConsoleCommand::Help),
            ("relay", [relay, state]) => parse_relay(relay, state),
            ("relay", _) => Err(ParseError("usage: :relay <name> <on|off>".to_string())),
            _ => Err(ParseError(format!("unknown command :{}, try :help", rest))),
        };
        Some(command)
    }
}

fn parse_relay(relay: &str, state: &str) -> Result<ConsoleCommand, ParseError> {
    let on = match state.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => true,
        "off" | "0" | "false" => false,
        other => return Err(ParseError(format!("expected on or off, got {}", other))),
    };
    RelaysPatch::single(relay, on)
        .map(ConsoleCommand::Relay)
        .ok_or_else(|| ParseError(format!("unknown relay {}", relay)))
}

/// Print notifications as they are published
pub fn watch_notifications(service: &SerialService) -> SubscriptionId {
    service.events().on_notification(|n| {
        let tag = match n.severity {
            Severity::Danger => "!!",
            Severity::Warning => "!",
            Severity::Success | Severity::Info => "*",
        };
        println!("{} {}: {}", tag, n.title, n.message);
    })
}

/// Execute one command; returns false when the console should exit
pub async fn execute(service: &SerialService, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Connect => {
            if let Err(e) = service.connect(false).await {
                println!("connect failed: {}", e);
            }
        }
        ConsoleCommand::Disconnect => service.disconnect().await,
        ConsoleCommand::Status => {
            if service.connection_state().is_connected() {
                send(service, OutgoingCommand::StatusGet).await;
            }
            print_status(service).await;
        }
        ConsoleCommand::Settings => {
            if service.connection_state().is_connected() {
                send(service, OutgoingCommand::SettingsGet).await;
            }
            let settings = service.model().settings.read().clone();
            if settings.loaded {
                match serde_json::to_string_pretty(&settings.settings) {
                    Ok(json) => println!("{}", json),
                    Err(e) => println!("cannot show settings: {}", e),
                }
            } else {
                println!("settings not loaded yet");
            }
        }
        ConsoleCommand::Log => {
            for entry in service.log_entries() {
                println!("{}", entry);
            }
        }
        ConsoleCommand::Relay(patch) => send(service, OutgoingCommand::RelaysSet(patch)).await,
        ConsoleCommand::Home => {
            service.send_tracked_command(HOMING_COMMAND, true).await;
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return false,
        ConsoleCommand::Send(text) => {
            if let Some(id) = service.send_tracked_command(&text, false).await {
                tracing::debug!("Sent #{}: {}", id, text);
            }
        }
    }
    true
}

async fn send(service: &SerialService, command: OutgoingCommand) {
    if let Err(e) = service.send_command(command).await {
        println!("send failed: {}", e);
    }
}

async fn print_status(service: &SerialService) {
    let port = service.port().await.unwrap_or_else(|| "-".to_string());
    println!("link:      {} ({})", service.connection_state(), port);
    if let Some(error) = service.last_error() {
        println!("error:     {}", error);
    }
    println!("pending:   {}", service.has_pending_commands());

    let machine = service.model().machine_status();
    println!("state:     {}", machine.state);
    println!("alarm:     {}", machine.alarm);
    println!("work:      {}", machine.work_position);
    println!("machine:   {}", machine.machine_position);
    println!(
        "feed:      {:.0} mm/min, power {:.0}",
        machine.feed_rate, machine.spindle_speed
    );

    let telemetry = service.model().telemetry_snapshot();
    println!(
        "lids:      front {}, back {}",
        telemetry.front_lid, telemetry.back_lid
    );
    println!("flame:     {}", telemetry.flame_sensor);
    println!("uart:      {}", telemetry.uart);
}

/// Run the console until `:quit` or end of input
pub async fn run<R>(service: Arc<SerialService>, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let subscription = watch_notifications(&service);
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        match ConsoleCommand::parse(&line) {
            None => continue,
            Some(Err(e)) => println!("{}", e),
            Some(Ok(command)) => {
                if !execute(&service, command).await {
                    break;
                }
            }
        }
    }

    service.events().unsubscribe(subscription);
    Ok(())
}
