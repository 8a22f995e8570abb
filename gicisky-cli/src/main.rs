use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use gicisky_lib::ble::{self, Address, BleConnector};
use gicisky_lib::codec::{self, EncodedImage};
use gicisky_lib::config::{ChunkOrdering, TransferConfig};
use gicisky_lib::registry::{self, DeviceDescriptor};
use gicisky_lib::retry::update_image;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Upload images to Gicisky BLE e-paper and TFT display tags.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode an image and transfer it to a tag
    Write {
        /// Bluetooth address of the tag (AA:BB:CC:DD:EE:FF)
        #[arg(short, long)]
        address: String,
        /// Image file in any common raster format
        #[arg(short, long)]
        image: PathBuf,
        /// Device-type code (e.g. 0x0B); read from the tag's advertisement when omitted
        #[arg(short, long, value_parser = parse_device_type)]
        device_type: Option<u8>,
        /// JSON transfer configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Fail when the tag requests chunks out of sequence
        #[arg(long)]
        strict: bool,
        /// Image bytes per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Also save what the panel will show
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Encode an image offline and render what the panel would show
    Preview {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long, value_parser = parse_device_type)]
        device_type: u8,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List nearby tags and their advertisements
    Scan {
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },
    /// Print every known display model
    Devices,
}

fn parse_device_type(value: &str) -> Result<u8, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid device type '{}': {}", value, e))
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry().with(filter).with(console_layer).init();
}

fn load_config(path: Option<&Path>) -> Result<TransferConfig> {
    match path {
        Some(path) => TransferConfig::load(path).with_context(|| format!("Failed to load config from {:?}", path)),
        None => Ok(TransferConfig::default()),
    }
}

fn save_preview(encoded: &EncodedImage, path: &Path) -> Result<()> {
    encoded
        .preview()
        .save(path)
        .with_context(|| format!("Failed to write preview to {:?}", path))?;
    info!("Preview written to {:?}", path);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    let result = match cli.command {
        Command::Write {
            address,
            image,
            device_type,
            config,
            strict,
            chunk_size,
            preview,
        } => {
            let mut config = load_config(config.as_deref())?;
            if strict {
                config.chunk_ordering = ChunkOrdering::Strict;
            }
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            run_write(&address, &image, device_type, config, preview.as_deref()).await
        }
        Command::Preview {
            image,
            device_type,
            output,
            config,
        } => run_preview(&image, device_type, &output, config.as_deref()),
        Command::Scan { seconds } => run_scan(Duration::from_secs(seconds)).await,
        Command::Devices => {
            run_devices();
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_write(
    address: &str,
    image_path: &Path,
    device_type: Option<u8>,
    config: TransferConfig,
    preview: Option<&Path>,
) -> Result<()> {
    config.validate().context("Invalid transfer configuration")?;
    let address: Address = address
        .parse()
        .with_context(|| format!("Invalid Bluetooth address '{}'", address))?;
    let image = codec::load_image(image_path).with_context(|| format!("Failed to open image {:?}", image_path))?;

    let adapter = ble::default_adapter().await.context("Failed to open Bluetooth adapter")?;
    let descriptor = match device_type {
        Some(code) => registry::lookup(code)?,
        None => {
            let tags = ble::scan(&adapter, config.scan_timeout()).await?;
            let tag = tags
                .iter()
                .find(|t| t.address == address)
                .ok_or_else(|| anyhow!("Tag {} not seen while scanning; pass --device-type", address))?;
            tag.advertisement()?.descriptor
        }
    };
    info!("Target: {}", descriptor);

    let mut connector = BleConnector::new(address, config.clone()).with_adapter(adapter);
    let (encoded, report) = update_image(&mut connector, &image, descriptor, &config)
        .await
        .with_context(|| format!("Failed to update {}", address))?;

    println!(
        "Sent {} bytes in {} chunks ({} exchanges, attempt {})",
        report.payload_len, report.chunks_sent, report.exchanges, report.attempt
    );

    if let Some(path) = preview {
        save_preview(&encoded, path)?;
    }
    Ok(())
}

fn run_preview(image_path: &Path, device_type: u8, output: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let descriptor: &DeviceDescriptor = registry::lookup(device_type)?;
    let image = codec::load_image(image_path).with_context(|| format!("Failed to open image {:?}", image_path))?;
    let encoded = codec::encode(&image, descriptor, config.thresholds)?;

    println!(
        "{}: {} plane(s), {} bytes, frame {}x{}",
        descriptor,
        encoded.planes.len(),
        encoded.payload_len(),
        encoded.width,
        encoded.height
    );
    save_preview(&encoded, output)
}

async fn run_scan(duration: Duration) -> Result<()> {
    if duration.is_zero() {
        bail!("Scan duration must be positive");
    }
    let adapter = ble::default_adapter().await.context("Failed to open Bluetooth adapter")?;
    let tags = ble::scan(&adapter, duration).await?;

    if tags.is_empty() {
        println!("No display tags found");
        return Ok(());
    }
    for tag in tags {
        let name = tag.name.as_deref().unwrap_or("-");
        let rssi = tag.rssi.map_or_else(|| "-".to_string(), |r| format!("{} dBm", r));
        match tag.advertisement() {
            Ok(adv) => println!("{}  {:<16} {:>8}  {}", tag.address, name, rssi, adv),
            Err(e) => println!(
                "{}  {:<16} {:>8}  {} ({})",
                tag.address,
                name,
                rssi,
                hex::encode(&tag.payload),
                e
            ),
        }
    }
    Ok(())
}

fn run_devices() {
    println!("{:<6} {:<20} {:>9} {:<6} {:<8}", "Code", "Model", "Size", "Red", "Panel");
    for d in registry::all() {
        println!(
            "0x{:02X}   {:<20} {:>4}x{:<4} {:<6} {:<8}",
            d.code,
            d.model,
            d.width,
            d.height,
            if d.supports_second_plane { "yes" } else { "no" },
            if d.is_tft_panel { "TFT" } else { "EPD" }
        );
    }
}
