use anyhow::{Context, Result};
use clap::Parser;

use rf95link::{dump_all_serial_ports, get_default_usb_serial, LoraDevice, RF95modem};

/// Print the firmware status of an attached rf95modem.
#[derive(Parser)]
#[command(name = "modem_status")]
struct Cli {
    /// Serial device of the modem
    #[arg(short, long)]
    device: Option<String>,
    #[arg(short, long, default_value_t = 115_200)]
    baud_rate: u32,
}

fn main() -> Result<()> {
    rf95link::logging::init();
    let cli = Cli::parse();

    dump_all_serial_ports();

    let device = cli.device.unwrap_or_else(get_default_usb_serial);
    let mut modem = RF95modem::new(&device, cli.baud_rate);
    modem
        .open()
        .with_context(|| format!("failed to open {}", device))?;
    let status = modem
        .status()
        .context("modem did not report its status")?;
    println!("{:#?}", status);
    modem.close();
    Ok(())
}
