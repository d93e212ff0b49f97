use clap::Parser;
use laserdeck::{console, init_logging, list_ports, Config, SerialDeviceProvider, SerialService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

/// Headless control console for GRBL/FluidNC laser controllers
#[derive(Debug, Parser)]
#[command(name = "laserdeck", version = laserdeck::VERSION)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(long, env = "LASERDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port to use instead of the configured one
    #[arg(long)]
    port: Option<String>,

    /// Baud rate override
    #[arg(long)]
    baud: Option<u32>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&path)?;

    if let Some(port) = &cli.port {
        config.connection.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.connection.baud_rate = baud;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    if cli.list_ports {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    tracing::info!("LaserDeck {} (built {})", laserdeck::VERSION, laserdeck::BUILD_DATE);

    let provider = SerialDeviceProvider::new(
        config.connection.port.clone(),
        config.connection.vendor_ids.clone(),
    );
    let service = Arc::new(SerialService::new(&config, Arc::new(provider)));

    if config.connection.auto_connect {
        service.connect(true).await?;
    }

    console::run(service.clone(), BufReader::new(tokio::io::stdin())).await?;
    service.disconnect().await;
    Ok(())
}
