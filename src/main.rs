use clap::{Parser, Subcommand};
use serial_command_port::config::{Config, ConfigLoader, LogFormat};
use serial_command_port::port::{PortConfiguration, SerialTransport};
use serial_command_port::{
    CommandArg, CommandCatalog, CommandEngine, EngineEvent, EngineHandle, EngineService,
    OperationMode,
};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "serial-command",
    version,
    about = "Send named commands to a serial device and match its responses.",
    long_about = "Drives a serial device through the commands declared in serial-command.toml. Commands are queued per their operation mode and responses are matched by pattern, expected text or byte count."
)]
struct Args {
    /// Configuration file (defaults to the standard resolution order)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overriding `[serial] port`
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate, overriding `[serial] baud_rate`
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print engine events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Send a configured command and print its response
    Send {
        /// Name of a `[commands.<name>]` table
        name: String,
        /// Values for the payload placeholders, in order
        args: Vec<String>,
    },
    /// Print everything the device sends until Ctrl-C
    Monitor,
    /// Load and validate the configuration, then list the commands
    CheckConfig,
    /// List serial ports found on this system
    Ports,
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config_path = loader.config_path.clone();
    let mut config = loader.into_config();
    if let Some(port) = &args.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.serial.line.baud_rate = baud;
    }

    init_logging(&config, args.verbose);
    match &config_path {
        Some(path) => tracing::debug!(path = %path.display(), "Configuration loaded"),
        None => tracing::debug!("Using built-in configuration defaults"),
    }

    match args.command {
        Cmd::Send { name, args: values } => run_send(&config, &name, values, args.json).await,
        Cmd::Monitor => run_monitor(&config, args.json).await,
        Cmd::CheckConfig => check_config(&config),
        Cmd::Ports => list_ports(),
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let default_level = if verbose { "debug" } else { config.logging.level.as_str() };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so stdout only carries device data
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().with_target(true).init(),
        LogFormat::Compact => builder.compact().with_target(false).init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// Open the configured port and start the engine on it.
fn start_engine(config: &Config) -> Result<EngineHandle, Box<dyn std::error::Error>> {
    let port_name = config
        .serial
        .port
        .as_deref()
        .ok_or("No serial port configured; set [serial] port or pass --port")?;
    let line: PortConfiguration = config.serial.line.clone();
    let transport = SerialTransport::open(port_name, line)?;

    let (link_tx, link_rx) = mpsc::channel(config.engine.channel_capacity);
    transport.spawn_reader(link_tx)?;

    let engine = CommandEngine::new(
        Box::new(transport),
        &config.engine,
        config.device_message_set(),
    );
    let (handle, _task) = EngineService::spawn(engine, config.engine.channel_capacity);
    handle.forward_link(link_rx);
    Ok(handle)
}

/// Integers and floats are passed as numbers, anything else as text.
fn parse_arg(raw: String) -> CommandArg {
    if let Ok(v) = raw.parse::<i64>() {
        CommandArg::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        CommandArg::Float(v)
    } else {
        CommandArg::Text(raw)
    }
}

async fn run_send(
    config: &Config,
    name: &str,
    raw_args: Vec<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = CommandCatalog::from_config(config)?;
    let command = catalog.require(name)?;
    let args: Vec<CommandArg> = raw_args.into_iter().map(parse_arg).collect();
    command.check_args(&args)?;

    let handle = start_engine(config)?;
    let mut events = handle.subscribe();

    match command.mode() {
        OperationMode::Blocking => {
            let response = handle.submit_blocking(command, args).await?;
            if json {
                println!("{}", serde_json::json!({ "response": String::from_utf8_lossy(&response) }));
            } else {
                println!("{}", String::from_utf8_lossy(&response).trim_end());
            }
        }
        OperationMode::NonBlockingNoResponse => {
            let id = handle.submit(command, args).await?;
            wait_for(&mut events, json, |event| {
                matches!(event, EngineEvent::CommandSent { id: s, .. } | EngineEvent::SendFailed { id: s, .. } if *s == id)
            })
            .await;
        }
        OperationMode::NonBlockingWithResponse
        | OperationMode::PullFlux
        | OperationMode::PushFlux => {
            let streaming = command.mode() == OperationMode::PushFlux;
            let id = handle.submit(command, args).await?;
            tokio::select! {
                _ = wait_for(&mut events, json, |event| {
                    event.command_id() == Some(id)
                        && !streaming
                        && matches!(
                            event,
                            EngineEvent::ResponseMatched { .. }
                                | EngineEvent::CommandTimedOut { .. }
                                | EngineEvent::SendFailed { .. }
                        )
                }) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

/// Print events until `done` accepts one or the event stream ends.
async fn wait_for(
    events: &mut broadcast::Receiver<EngineEvent>,
    json: bool,
    done: impl Fn(&EngineEvent) -> bool,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(&event, json);
                if done(&event) {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Dropped events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &EngineEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
        }
        return;
    }
    match event {
        EngineEvent::ResponseMatched { response, .. } => {
            println!("{}", String::from_utf8_lossy(response).trim_end());
        }
        EngineEvent::MessageReceived { translation, .. } => println!("[device] {translation}"),
        EngineEvent::RawData { bytes } => print!("{}", String::from_utf8_lossy(bytes)),
        EngineEvent::CommandSent { .. } => tracing::debug!("{event}"),
        other => eprintln!("{other}"),
    }
}

async fn run_monitor(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let handle = start_engine(config)?;
    let mut events = handle.subscribe();
    handle.set_bypass_mode(true).await?;
    tracing::info!("Monitoring; press Ctrl-C to stop");

    tokio::select! {
        _ = wait_for(&mut events, json, |event| matches!(event, EngineEvent::Disconnected)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    handle.shutdown().await?;
    Ok(())
}

fn check_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let catalog = CommandCatalog::from_config(config)?;

    println!(
        "Serial port: {} @ {} baud",
        config.serial.port.as_deref().unwrap_or("(none)"),
        config.serial.line.baud_rate
    );
    println!(
        "Engine: send queue {} / response buffer {} bytes",
        config.engine.send_queue_capacity, config.engine.response_buffer_capacity
    );
    println!("Device messages: {}", config.device_messages.messages.len());
    println!("Commands ({}):", catalog.len());
    for command in catalog.iter() {
        let matcher = command.match_spec().map_or("none", |m| m.kind());
        println!(
            "  {:<16} {:<26} response={} args={}",
            command.name(),
            command.mode(),
            matcher,
            command.required_args()
        );
    }
    Ok(())
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.port_type {
            serialport::SerialPortType::UsbPort(info) => println!(
                "{}  USB {:04x}:{:04x} {}",
                port.port_name,
                info.vid,
                info.pid,
                info.product.unwrap_or_default()
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}
