// Terminal front end for a single LoRa link.
//
// Shows the radio settings and the last received message, sends the
// configured payload with the Send button (or `o`), quits with `q`.
// Logs go to a file so they do not tear up the screen.

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};

use anyhow::{Context, Result};
use clap::Parser;
use cursive::traits::*;
use cursive::views::{Dialog, DummyView, LinearLayout, TextView};
use cursive::Cursive;

use rf95link::{
    run, Bus, CancelToken, LinkConfig, LinkSession, PresentationShell, RF95modem,
    SessionSnapshot, ShellCommand,
};

#[derive(Parser)]
#[command(name = "lorabeacon", about = "Send and receive LoRa test messages through an rf95modem")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial device of the modem, overrides the configuration file
    #[arg(short, long)]
    device: Option<String>,
    #[arg(long, default_value = "lorabeacon.log")]
    log_file: PathBuf,
}

struct CursiveShell {
    siv: Cursive,
    commands: Receiver<ShellCommand>,
}

impl CursiveShell {
    fn new(title: &str) -> Self {
        let (tx, commands) = channel();
        let mut siv = Cursive::default();

        let send = tx.clone();
        siv.add_global_callback('o', move |_| {
            let _ = send.send(ShellCommand::Send);
        });
        let quit = tx.clone();
        siv.add_global_callback('q', move |_| {
            let _ = quit.send(ShellCommand::Quit);
        });

        let send = tx.clone();
        siv.add_layer(
            Dialog::around(
                LinearLayout::vertical()
                    .child(TextView::new("").with_id("radio"))
                    .child(DummyView.fixed_height(1))
                    .child(TextView::new("").with_id("message"))
                    .child(DummyView.fixed_height(1))
                    .child(TextView::new("").with_id("stats")),
            )
            .title(title)
            .button("Send", move |_| {
                let _ = send.send(ShellCommand::Send);
            })
            .button("Quit", move |_| {
                let _ = tx.send(ShellCommand::Quit);
            })
            .fixed_width(40),
        );

        CursiveShell { siv, commands }
    }
}

impl PresentationShell for CursiveShell {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        let radio = format!("Freq: {}", snapshot.configuration_summary);
        let message = match &snapshot.latest_message {
            Some(text) => {
                let signal = match (snapshot.rssi, snapshot.snr) {
                    (Some(rssi), Some(snr)) => format!(" (RSSI {} SNR {})", rssi, snr),
                    _ => String::new(),
                };
                let cut = if snapshot.truncated { " [truncated]" } else { "" };
                format!("Message received{}:\n{}{}", signal, text, cut)
            }
            None => "No message yet".to_string(),
        };
        let stats = format!(
            "tx {} ({} failed)  rx {} ({} failed)",
            snapshot.stats.tx_packets,
            snapshot.stats.tx_errors,
            snapshot.stats.rx_packets,
            snapshot.stats.rx_errors
        );

        self.siv
            .call_on_id("radio", |view: &mut TextView| view.set_content(radio));
        self.siv
            .call_on_id("message", |view: &mut TextView| view.set_content(message));
        self.siv
            .call_on_id("stats", |view: &mut TextView| view.set_content(stats));
        self.siv.refresh();
        self.siv.step();
    }

    fn next_command(&mut self) -> Option<ShellCommand> {
        if !self.siv.is_running() {
            return Some(ShellCommand::Quit);
        }
        self.commands.try_recv().ok()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    rf95link::logging::init_with_file(&cli.log_file)
        .with_context(|| format!("failed to create log file {}", cli.log_file.display()))?;

    let mut config = match &cli.config {
        Some(path) => LinkConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LinkConfig::default(),
    };
    if let Some(device) = cli.device {
        config.serial.device = Some(device);
    }

    let device = config.serial.device_or_default();
    let bus = Bus::new(&device);
    let modem = RF95modem::new(&device, config.serial.baud_rate);
    let mut session = LinkSession::start(&bus, modem, config.radio)
        .with_context(|| format!("failed to start LoRa link on {}", device))?
        .with_payload(config.session.payload.clone());

    let cancel = CancelToken::new();
    let mut shell = CursiveShell::new("LoRa Test App");
    run(&mut session, &mut shell, config.session.tick(), &cancel);

    session.shutdown();
    Ok(())
}
