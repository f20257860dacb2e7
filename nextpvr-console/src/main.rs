//! Command-line console for a NextPVR backend.
//!
//! Drives the same session, catalog and stream machinery the
//! host-embedded bridge uses, with results printed to stdout.  Useful
//! for checking a backend before pointing a media center at it.

mod logging;

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use serde::Deserialize;

use nextpvr_bridge::{ConnectionState, HostNotifier, InstanceSettings, NullSyncHooks, PvrClient};
use nextpvr_protocol::ChannelKind;

const DUMP_CHUNK: usize = 32 * 1024;

/// Command-line client for a NextPVR backend
#[derive(Parser, Debug)]
#[command(name = "nextpvr-console", version, about)]
struct Args {
    /// Backend host name or address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Backend control port
    #[arg(short, long)]
    port: Option<u16>,

    /// Login PIN
    #[arg(long)]
    pin: Option<String>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Directory for the channel cache and icon files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory where log files are stored
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print backend information
    Status,
    /// List channels
    Channels {
        /// Radio channels instead of television
        #[arg(long)]
        radio: bool,
    },
    /// List channel groups
    Groups {
        /// Radio groups instead of television
        #[arg(long)]
        radio: bool,
    },
    /// List the channels in one group
    Members {
        /// Group name, as printed by `groups`
        group: String,
        /// Radio group instead of television
        #[arg(long)]
        radio: bool,
    },
    /// Fetch a channel icon into the data directory
    Icon {
        /// Backend channel id
        channel_uid: u32,
    },
    /// Dump a live channel stream to a file
    Watch {
        /// Backend channel id
        channel_uid: u32,
        /// Output file
        #[arg(short, long, default_value = "channel.ts")]
        output: PathBuf,
        /// Stop after this many bytes
        #[arg(long, default_value_t = 8 * 1024 * 1024)]
        limit: u64,
    },
    /// Dump a recording to a file
    Recording {
        /// Backend recording id
        recording_id: String,
        /// Recording duration in seconds, used for time reporting
        #[arg(long, default_value_t = 0)]
        duration: i64,
        /// Output file
        #[arg(short, long, default_value = "recording.ts")]
        output: PathBuf,
        /// Stop after this many bytes (0 reads to the end)
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },
}

/// On-disk configuration.  Every field is optional; the `[backend]`
/// table mirrors the bridge's instance settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: InstanceSettings,
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    log_dir: Option<PathBuf>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config = toml::from_str(&contents)?;
    Ok(config)
}

/// Forwards bridge callbacks to stdout so state changes and refresh
/// requests are visible while a command runs.
struct ConsoleNotifier;

impl HostNotifier for ConsoleNotifier {
    fn connection_state_changed(&self, connection: &str, state: ConnectionState, message: &str) {
        if message.is_empty() {
            println!("{}: {}", connection, state);
        } else {
            println!("{}: {} ({})", connection, state, message);
        }
    }

    fn trigger_channel_update(&self) {
        println!("refresh: channels");
    }

    fn trigger_channel_groups_update(&self) {
        println!("refresh: channel groups");
    }

    fn trigger_recording_update(&self) {
        println!("refresh: recordings");
    }

    fn trigger_timer_update(&self) {
        println!("refresh: timers");
    }

    fn trigger_epg_update(&self, channel_uid: u32) {
        println!("refresh: guide for channel {}", channel_uid);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from("nextpvr-console.toml");
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => {
            load_config(path).map_err(|err| format!("config {}: {}", path.display(), err))?
        }
        None => ConfigFile::default(),
    };

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.clone())
        .unwrap_or_else(|| PathBuf::from("logs"));
    let retention_days = file_config.logging.retention_days.unwrap_or(7);
    logging::init_logging(
        &log_dir,
        retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let mut settings = file_config.backend;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(pin) = args.pin {
        settings.pin = pin;
    }
    if let Some(dir) = args.data_dir {
        settings.instance_dir = dir;
    }

    info!("backend {}", settings.base_url());
    info!("data directory {}", settings.instance_dir.display());

    let client = PvrClient::new(settings, Arc::new(ConsoleNotifier), Arc::new(NullSyncHooks))?;
    client.connect(true)?;

    match args.command {
        Command::Status => run_status(&client),
        Command::Channels { radio } => run_channels(&client, radio),
        Command::Groups { radio } => run_groups(&client, radio),
        Command::Members { group, radio } => run_members(&client, &group, radio),
        Command::Icon { channel_uid } => run_icon(&client, channel_uid),
        Command::Watch {
            channel_uid,
            output,
            limit,
        } => run_watch(&client, channel_uid, &output, limit),
        Command::Recording {
            recording_id,
            duration,
            output,
            limit,
        } => run_recording(&client, &recording_id, duration, &output, limit),
    }
}

fn run_status(client: &PvrClient) -> Result<(), Box<dyn std::error::Error>> {
    println!("name      {}", client.backend_name());
    println!("address   {}", client.connection_string());
    println!("version   {}", client.backend_version());
    println!("state     {}", client.connection_state());
    if client.is_connected() {
        println!("channels  {}", client.channel_count()?);
        println!("groups    {}", client.group_count()?);
    }
    let caps = client.capabilities();
    println!(
        "features  recordings={} timers={} radio={} edl={}",
        caps.recordings, caps.timers, caps.radio, caps.recording_edl
    );
    Ok(())
}

fn run_channels(client: &PvrClient, radio: bool) -> Result<(), Box<dyn std::error::Error>> {
    let channels = client.channels(radio)?;
    for channel in &channels {
        println!(
            "{:>4}.{}  uid={:<6} {}",
            channel.number, channel.minor, channel.uid, channel.name
        );
    }
    println!(
        "{} {} channels",
        channels.len(),
        if radio { "radio" } else { "tv" }
    );
    Ok(())
}

fn run_groups(client: &PvrClient, radio: bool) -> Result<(), Box<dyn std::error::Error>> {
    for group in client.channel_groups(radio)? {
        println!("{:>3}  {}", group.position, group.name);
    }
    Ok(())
}

fn run_members(
    client: &PvrClient,
    group: &str,
    radio: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let members = client.group_members(group, radio)?;
    for member in &members {
        println!(
            "{:>4}.{}  uid={}",
            member.number, member.minor, member.channel_uid
        );
    }
    println!("{} members of {}", members.len(), group);
    Ok(())
}

fn run_icon(client: &PvrClient, channel_uid: u32) -> Result<(), Box<dyn std::error::Error>> {
    match client.channel_icon(channel_uid) {
        Some(path) => println!("saved {}", path.display()),
        None => println!("channel {} has no icon", channel_uid),
    }
    Ok(())
}

fn run_watch(
    client: &PvrClient,
    channel_uid: u32,
    output: &Path,
    limit: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let radio = client.channel_kind(channel_uid) == ChannelKind::Radio;
    client.open_live_stream(channel_uid, radio)?;
    let chunk = client.chunk_size().unwrap_or(DUMP_CHUNK);
    let result = copy_stream(output, limit, chunk, |buf| {
        client.read_live_stream(buf).map_err(Into::into)
    });
    client.close_live_stream();
    let written = result?;
    println!(
        "wrote {} bytes from channel {} to {}",
        written,
        channel_uid,
        output.display()
    );
    Ok(())
}

fn run_recording(
    client: &PvrClient,
    recording_id: &str,
    duration: i64,
    output: &Path,
    limit: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream_id = client.open_recorded_stream(recording_id, duration)?;
    let length = client.recorded_stream_length(stream_id).unwrap_or(-1);
    if length >= 0 {
        info!("recording {} reports {} bytes", recording_id, length);
    }
    let limit = if limit == 0 { u64::MAX } else { limit };
    let result = copy_stream(output, limit, DUMP_CHUNK, |buf| {
        client
            .read_recorded_stream(stream_id, buf)
            .map_err(Into::into)
    });
    client.close_recorded_stream(stream_id);
    let written = result?;
    println!("wrote {} bytes to {}", written, output.display());
    Ok(())
}

fn copy_stream<F>(
    output: &Path,
    limit: u64,
    chunk: usize,
    mut read: F,
) -> Result<u64, Box<dyn std::error::Error>>
where
    F: FnMut(&mut [u8]) -> Result<usize, Box<dyn std::error::Error>>,
{
    let mut file = File::create(output)?;
    let mut buf = vec![0u8; chunk.max(1)];
    let mut written = 0u64;
    while written < limit {
        let n = read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        written += n as u64;
    }
    Ok(written)
}
