//! LoRa secure link CLI tools: key generation, module probing, send and listen.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use lora_common::helpers::env_bool;
use lora_common::{LinkConfig, LinkEvent, MessageRecord};
use lora_crypto::{generate_password, SecureEnvelope};
use lora_link::LinkSession;
use lora_radio::{AirLink, AtRadio, PortOpener, Radio, SystemPorts};
use tracing::info;

/// How long `send --simulate` waits for the looped-back copy.
const SIMULATED_ECHO_WAIT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "lora")]
#[command(about = "LoRa secure link CLI tools")]
struct Args {
    /// JSON link configuration file
    #[arg(short, long, global = true, env = "LORA_CONFIG")]
    config: Option<String>,

    /// Use an in-memory simulated air link instead of serial ports
    /// (also enabled by LORA_SIMULATE=1)
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct KeyArgs {
    /// Shared password to derive the key from
    #[arg(short, long, env = "LORA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Base64 key exported by `lora keygen` (takes precedence over --password)
    #[arg(short, long, env = "LORA_KEY", hide_env_values = true)]
    key: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
struct PortArgs {
    /// Serial port of the transmitting module
    #[arg(long, env = "LORA_SENDER_PORT", default_value = "/dev/ttyUSB0")]
    sender_port: String,

    /// Serial port of the receiving module
    #[arg(long, env = "LORA_RECEIVER_PORT", default_value = "/dev/ttyUSB1")]
    receiver_port: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a random 256-bit key
    Keygen,

    /// Generate a random shared password
    Password {
        #[arg(short, long, default_value_t = lora_crypto::password::DEFAULT_PASSWORD_LEN)]
        length: usize,
    },

    /// Show the fingerprint of a password or key
    Fingerprint {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Connect to one module, check it answers and reset it
    Probe {
        /// Serial port of the module
        #[arg(short = 'P', long, env = "LORA_SENDER_PORT")]
        port: String,
    },

    /// Encrypt and transmit one message
    Send {
        #[command(flatten)]
        ports: PortArgs,

        #[command(flatten)]
        key: KeyArgs,

        /// Priority tag carried in the metadata
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Message text
        message: String,
    },

    /// Print received messages as JSON lines until interrupted
    Listen {
        #[command(flatten)]
        ports: PortArgs,

        #[command(flatten)]
        key: KeyArgs,

        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    lora_common::init_tracing();

    let args = Args::parse();
    let simulate = args.simulate || env_bool("LORA_SIMULATE", false);

    match args.command {
        Command::Keygen => {
            let envelope = SecureEnvelope::from_random_key();
            println!("Key:         {}", envelope.export_key());
            println!("Fingerprint: {}", envelope.fingerprint());
        }
        Command::Password { length } => {
            if length == 0 {
                bail!("password length must be positive");
            }
            let password = generate_password(length);
            let envelope = SecureEnvelope::from_password(&password)?;
            println!("Password:    {}", password);
            println!("Fingerprint: {}", envelope.fingerprint());
        }
        Command::Fingerprint { key } => {
            println!("{}", envelope_from(&key)?.fingerprint());
        }
        Command::Probe { port } => {
            let config = load_config(args.config.as_deref())?;
            probe(&config, opener(simulate), &port)?;
        }
        Command::Send {
            ports,
            key,
            priority,
            message,
        } => {
            let config = load_config(args.config.as_deref())?;
            let (mut session, mut events) = LinkSession::with_opener(config, opener(simulate));
            install_key(&session, &key)?;
            session
                .connect(&ports.sender_port, &ports.receiver_port)
                .context("failed to connect radios")?;

            let outcome = session
                .send_message(&message, &priority)
                .map_err(anyhow::Error::from)
                .and_then(|record| {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    if simulate {
                        print_looped_back(&mut events)?;
                    }
                    Ok(())
                });
            session.disconnect();
            outcome?;
        }
        Command::Listen { ports, key, count } => {
            let config = load_config(args.config.as_deref())?;
            let (mut session, mut events) = LinkSession::with_opener(config, opener(simulate));
            install_key(&session, &key)?;
            session
                .connect(&ports.sender_port, &ports.receiver_port)
                .context("failed to connect radios")?;
            info!(
                receiver = %ports.receiver_port,
                fingerprint = %session.fingerprint().unwrap_or_default(),
                "listening"
            );

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let outcome = rt.block_on(async {
                let ctrl_c = tokio::signal::ctrl_c();
                tokio::pin!(ctrl_c);
                let mut received = 0usize;
                loop {
                    tokio::select! {
                        event = events.recv() => {
                            let Some(event) = event else { break };
                            print_event(&event)?;
                            if matches!(event, LinkEvent::MessageReceived { .. }) {
                                received += 1;
                                if count.is_some_and(|n| received >= n) {
                                    break;
                                }
                            }
                        }
                        _ = &mut ctrl_c => {
                            info!("interrupted");
                            break;
                        }
                    }
                }
                Ok::<(), anyhow::Error>(())
            });

            session.disconnect();
            outcome?;
        }
        Command::Version => {
            println!("lora {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<LinkConfig> {
    match path {
        Some(path) => LinkConfig::load(path).with_context(|| format!("failed to load {path}")),
        None => Ok(LinkConfig::default()),
    }
}

fn opener(simulate: bool) -> Arc<dyn PortOpener> {
    if simulate {
        info!("using simulated air link");
        Arc::new(AirLink::new())
    } else {
        Arc::new(SystemPorts)
    }
}

fn envelope_from(key: &KeyArgs) -> Result<SecureEnvelope> {
    if let Some(encoded) = key.key.as_deref() {
        return SecureEnvelope::import_key(encoded.trim()).context("invalid key");
    }
    match key.password.as_deref() {
        Some(password) if !password.is_empty() => Ok(SecureEnvelope::from_password(password)?),
        _ => bail!("a --password or --key is required"),
    }
}

fn install_key(session: &LinkSession, key: &KeyArgs) -> Result<()> {
    let fingerprint = match (key.key.as_deref(), key.password.as_deref()) {
        (Some(encoded), _) => session.import_key(encoded)?,
        (None, Some(password)) if !password.is_empty() => {
            session.init_crypto(Some(password))?.fingerprint
        }
        _ => bail!("a --password or --key is required"),
    };
    println!("Fingerprint: {}", fingerprint);
    Ok(())
}

fn probe(config: &LinkConfig, opener: Arc<dyn PortOpener>, port: &str) -> Result<()> {
    let radio = AtRadio::with_opener(config.radio.clone(), opener);
    radio
        .connect(port, config.baud_rate, config.connect_timeout())
        .with_context(|| format!("failed to bring up module on {port}"))?;

    let reply = radio.send_command("AT", config.connect_timeout());
    let signal = radio.signal_info();
    let reset = radio.reset();
    radio.disconnect();

    println!("Port:      {}", port);
    println!("Response:  {}", reply?);
    println!("RF config: {}", config.radio.rfcfg_command());
    println!(
        "Signal:    RSSI {} dBm, SNR {} dB{}",
        signal.rssi,
        signal.snr,
        if signal.measured { "" } else { " (no packet yet)" }
    );
    reset.context("module did not accept reset")?;
    Ok(())
}

fn print_event(event: &LinkEvent) -> Result<()> {
    match MessageRecord::from_event(event) {
        Some(record) => println!("{}", serde_json::to_string(&record)?),
        None => println!("{}", serde_json::to_string(event)?),
    }
    Ok(())
}

/// In simulation both modules share one air link, so the receiver hears
/// what the sender transmitted.
fn print_looped_back(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<LinkEvent>,
) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let event = rt.block_on(tokio::time::timeout(SIMULATED_ECHO_WAIT, events.recv()));
    match event {
        Ok(Some(event)) => print_event(&event),
        _ => bail!("simulated receiver heard nothing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_args_parse() {
        let args = Args::try_parse_from([
            "lora",
            "--simulate",
            "send",
            "--sender-port",
            "a",
            "--receiver-port",
            "b",
            "--password",
            "test123",
            "--priority",
            "high",
            "hello there",
        ])
        .unwrap();

        assert!(args.simulate);
        match args.command {
            Command::Send {
                ports,
                key,
                priority,
                message,
            } => {
                assert_eq!(ports.sender_port, "a");
                assert_eq!(ports.receiver_port, "b");
                assert_eq!(key.password.as_deref(), Some("test123"));
                assert_eq!(priority, "high");
                assert_eq!(message, "hello there");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_key_takes_precedence_over_password() {
        let exported = SecureEnvelope::from_random_key();
        let key = KeyArgs {
            password: Some("test123".into()),
            key: Some(exported.export_key()),
        };
        assert_eq!(
            envelope_from(&key).unwrap().fingerprint(),
            exported.fingerprint()
        );

        let password_only = KeyArgs {
            password: Some("test123".into()),
            key: None,
        };
        assert_eq!(
            envelope_from(&password_only).unwrap().fingerprint(),
            "0b323a7e643c2ec2"
        );

        let neither = KeyArgs {
            password: None,
            key: None,
        };
        assert!(envelope_from(&neither).is_err());
    }

    #[test]
    fn test_probe_against_simulated_module() {
        let config = LinkConfig {
            connect_timeout_ms: 300,
            ..LinkConfig::default()
        };
        let air = AirLink::new();
        probe(&config, Arc::new(air.clone()), "sim0").unwrap();
        assert_eq!(
            air.commands("sim0").last().map(String::as_str),
            Some("ATZ")
        );
    }

    #[test]
    fn test_simulated_send_loops_back() {
        let config = LinkConfig {
            connect_timeout_ms: 300,
            poll_timeout_ms: 100,
            reset_settle_ms: 10,
            ..LinkConfig::default()
        };
        let (mut session, mut events) = LinkSession::with_opener(config, opener(true));
        let key = KeyArgs {
            password: Some("test123".into()),
            key: None,
        };
        install_key(&session, &key).unwrap();
        session.connect("a", "b").unwrap();

        session.send_message("over the air", "normal").unwrap();
        print_looped_back(&mut events).unwrap();
        session.disconnect();
    }
}
