use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use qtcfg_core::{HandshakeConfig, HandshakeSession, NusbTransport};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Enable a device's hidden QT configuration and verify it with a PING handshake", long_about = None)]
struct Args {
    /// TOML configuration file; the flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vendor ID (hex)
    #[arg(long, value_parser = parse_hex_u16)]
    vid: Option<u16>,

    /// Product ID (hex)
    #[arg(long, value_parser = parse_hex_u16)]
    pid: Option<u16>,

    /// Configuration value to select after the mode switch
    #[arg(long)]
    configuration: Option<u8>,

    /// Interface carrying the bulk endpoints
    #[arg(long)]
    interface: Option<u8>,

    /// Bulk OUT endpoint address (hex)
    #[arg(long, value_parser = parse_hex_u8)]
    out_ep: Option<u8>,

    /// Bulk IN endpoint address (hex)
    #[arg(long, value_parser = parse_hex_u8)]
    in_ep: Option<u8>,

    /// Per-transfer timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Delay after the mode switch before looking for the device again
    #[arg(long)]
    settle_ms: Option<u64>,

    /// How long to keep polling for the re-enumerated device (0 = one attempt)
    #[arg(long)]
    reconnect_ms: Option<u64>,

    /// Detach kernel drivers from the interface before claiming it
    #[arg(long)]
    detach_kernel_driver: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn load_config(&self) -> Result<HandshakeConfig> {
        let mut config = match &self.config {
            Some(path) => HandshakeConfig::load_from_file(path)?,
            None => HandshakeConfig::default(),
        };

        if let Some(vid) = self.vid {
            config.identity.vendor_id = vid;
        }
        if let Some(pid) = self.pid {
            config.identity.product_id = pid;
        }
        if let Some(configuration) = self.configuration {
            config.target_configuration = configuration;
        }
        if let Some(interface) = self.interface {
            config.interface = interface;
        }
        if let Some(ep) = self.out_ep {
            config.out_endpoint = ep;
        }
        if let Some(ep) = self.in_ep {
            config.in_endpoint = ep;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeouts.transfer_ms = ms;
        }
        if let Some(ms) = self.settle_ms {
            config.timeouts.settle_ms = ms;
        }
        if let Some(ms) = self.reconnect_ms {
            config.timeouts.reconnect_ms = ms;
        }
        Ok(config)
    }
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{s}': {e}"))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_hex(s)?).map_err(|_| format!("'{s}' does not fit in 16 bits"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_hex(s)?).map_err(|_| format!("'{s}' does not fit in 8 bits"))
}

fn run(args: &Args) -> Result<()> {
    let config = args.load_config()?;

    if args.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }
    config.validate()?;

    info!(
        device = %config.identity,
        configuration = config.target_configuration,
        interface = config.interface,
        "Starting qtcfg (nusb backend)..."
    );

    let transport = NusbTransport::new().with_kernel_driver_detach(args.detach_kernel_driver);
    let session = HandshakeSession::new(transport, config);
    session.run().map_err(|e| {
        let stage = e.stage();
        anyhow::Error::new(e).context(format!("Handshake failed at stage '{stage}'"))
    })?;

    println!("PING handshake successful");
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
