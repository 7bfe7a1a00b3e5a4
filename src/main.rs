use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Read};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tone_link_core::{
    audio::{list_audio_devices, AudioInput, AudioOutput},
    measure_throughput, render,
    spectrum::dominant_frequency,
    ChannelSink, Event, Modulator, PacketCodec, PerformanceMonitor, ProtocolConfig, Transceiver,
    ATTACK_TIME, BEEP_TIME, MAX_MESSAGE_LEN, PACKET_GAP_TIME, PACKET_LEN, PARITY_BYTES,
    PAYLOAD_LEN, RELEASE_TIME, START_SYMBOLS,
};

#[derive(Parser)]
#[command(name = "tone-link")]
#[command(about = "Half-duplex acoustic data link", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the protocol constants and the carrier table
    Constants,

    /// Send a message or a raw payload
    Send {
        /// Message to send (if neither this nor --symbols is given, reads stdin)
        #[arg(short, long, conflicts_with = "symbols")]
        message: Option<String>,

        /// Raw payload as symbol mnemonics, e.g. "0123456789"
        #[arg(short, long)]
        symbols: Option<String>,

        /// Volume level (0.0 - 1.0)
        #[arg(long, default_value = "0.5")]
        volume: f32,
    },

    /// Listen and print decoded payloads and messages
    Receive {
        /// Timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Send a message through a simulated channel and decode it again
    Loopback {
        #[arg(default_value = "Hello, tone-link!")]
        message: String,

        #[arg(long, default_value = "44100")]
        sample_rate: u32,
    },

    /// Compare rendered beeps against their intended carriers
    Analyze {
        /// Payload as symbol mnemonics
        #[arg(short, long)]
        symbols: String,

        #[arg(long, default_value = "44100")]
        sample_rate: u32,
    },

    /// Measure receiver throughput relative to real time
    Bench {
        /// Seconds of audio to process
        #[arg(long, default_value = "10")]
        seconds: f32,

        #[arg(long, default_value = "44100")]
        sample_rate: u32,
    },

    /// List available audio devices
    Devices,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Constants => print_constants(),

        Commands::Send {
            message,
            symbols,
            volume,
        } => {
            let message = match (message, &symbols) {
                (Some(m), _) => Some(m.into_bytes()),
                (None, Some(_)) => None,
                (None, None) => {
                    let mut buffer = Vec::new();
                    io::stdin().read_to_end(&mut buffer)?;
                    Some(buffer)
                }
            };
            send(message, symbols, volume.clamp(0.0, 1.0))?;
        }

        Commands::Receive { timeout } => receive(Duration::from_secs(timeout))?,

        Commands::Loopback {
            message,
            sample_rate,
        } => {
            println!("Running loopback test with message: {}", message);
            loopback(message.as_bytes(), sample_rate)?;
        }

        Commands::Analyze {
            symbols,
            sample_rate,
        } => analyze(&symbols, sample_rate)?,

        Commands::Bench {
            seconds,
            sample_rate,
        } => {
            let report = measure_throughput(ProtocolConfig::standard(), sample_rate, seconds)?;
            println!(
                "Processed {} samples in {:.1} ms: {:.1}x real time",
                report.samples,
                report.elapsed.as_secs_f64() * 1000.0,
                report.ratio
            );
            if !report.is_realtime() {
                bail!("receiver is slower than real time");
            }
        }

        Commands::Devices => {
            let devices = list_audio_devices();
            println!("Available audio devices:");
            for device in devices {
                println!("  {}", device);
            }
        }
    }

    Ok(())
}

fn print_constants() {
    let protocol = ProtocolConfig::standard();
    println!("Beep time:        {} s", BEEP_TIME);
    println!("Attack / release: {} s / {} s", ATTACK_TIME, RELEASE_TIME);
    println!("Packet gap:       {} s", PACKET_GAP_TIME);
    println!("Payload length:   {} symbols", PAYLOAD_LEN);
    println!(
        "Packet length:    {} symbols (preamble {}, {} parity bytes)",
        PACKET_LEN,
        protocol.alphabet().format(&START_SYMBOLS),
        PARITY_BYTES
    );
    println!("Max message:      {} bytes", MAX_MESSAGE_LEN);
    println!("Min sample rate:  {} Hz", protocol.min_sample_rate());
    println!("\nSymbol  Frequency");
    let alphabet = protocol.alphabet();
    for symbol in 0..alphabet.len() {
        let symbol = symbol as u8;
        println!(
            "  {}     {:8.1} Hz",
            alphabet.mnemonic(symbol),
            alphabet.frequency(symbol)
        );
    }
}

fn send(message: Option<Vec<u8>>, symbols: Option<String>, volume: f32) -> Result<()> {
    let output = AudioOutput::new()?;
    let (tx, rx) = mpsc::channel();
    let mut trx = Transceiver::new(
        ProtocolConfig::standard(),
        output.sample_rate(),
        ChannelSink::new(tx),
    )?;

    match (message, symbols) {
        (Some(message), _) => {
            if message.is_empty() {
                bail!("no data to send");
            }
            let packets = trx.send_message(&message)?;
            eprintln!("Sending {} bytes in {} packets...", message.len(), packets);
        }
        (None, Some(symbols)) => {
            trx.send_mnemonics(&symbols)?;
            eprintln!("Sending payload {}...", symbols);
        }
        (None, None) => bail!("nothing to send"),
    }

    while let Ok(event) = rx.try_recv() {
        if let Event::Transmit(plan) = event {
            log::debug!("playing {:?}", plan.frequencies());
            output.play_plan(&plan, volume)?;
            trx.render_complete();
        }
    }

    eprintln!("Transmission complete!");
    Ok(())
}

fn receive(timeout: Duration) -> Result<()> {
    let input = AudioInput::new()?;
    let sample_rate = input.sample_rate();
    let protocol = ProtocolConfig::standard();
    let (tx, rx) = mpsc::channel();
    let mut trx = Transceiver::new(protocol.clone(), sample_rate, ChannelSink::new(tx))?;
    let mut monitor = PerformanceMonitor::new(sample_rate, Duration::from_secs(5));

    let _stream = input.stream_into(move |buffer| {
        let started = Instant::now();
        trx.push_samples(buffer);
        monitor.record(buffer.len(), started.elapsed());
    })?;

    eprintln!("Listening at {} Hz for {} seconds...", sample_rate, timeout.as_secs());
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(Event::Payload(payload)) => {
                println!("payload: {}", protocol.alphabet().format(&payload));
            }
            Ok(Event::Message(message)) => {
                println!("message: {}", String::from_utf8_lossy(&message));
            }
            Ok(Event::Transmit(_)) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => bail!("audio stream stopped"),
        }
    }

    Ok(())
}

fn loopback(message: &[u8], sample_rate: u32) -> Result<()> {
    let protocol = ProtocolConfig::standard();
    let mut sender = Transceiver::new(protocol.clone(), sample_rate, Vec::new())?;
    let mut receiver = Transceiver::new(protocol, sample_rate, Vec::new())?;

    let packets = sender.send_message(message)?;
    let mut audio = Vec::new();
    while let Some(Event::Transmit(plan)) = sender.sink_mut().pop() {
        audio.extend(render(&plan, sample_rate, 0.5));
        sender.render_complete();
    }

    println!("Packets: {}", packets);
    println!("Audio samples: {}", audio.len());
    println!(
        "Duration: {:.1} ms",
        audio.len() as f64 * 1000.0 / sample_rate as f64
    );

    receiver.push_samples(&audio);
    let decoded = receiver.sink().iter().find_map(|event| match event {
        Event::Message(m) => Some(m.clone()),
        _ => None,
    });

    let stats = receiver.decode_stats();
    println!(
        "Payloads: {}, incomplete frames: {}, rejected frames: {}, corrected symbols: {}, resyncs: {}",
        stats.payloads,
        stats.incomplete_frames,
        stats.rejected_frames,
        stats.corrected_symbols,
        stats.resyncs
    );

    match decoded {
        Some(decoded) if decoded == message => {
            println!("\nDecoded message: {}", String::from_utf8_lossy(&decoded));
            println!("\n✓ Test PASSED: Messages match!");
            Ok(())
        }
        Some(decoded) => bail!(
            "messages don't match: got {:?}",
            String::from_utf8_lossy(&decoded)
        ),
        None => bail!("no message decoded"),
    }
}

fn analyze(symbols: &str, sample_rate: u32) -> Result<()> {
    let protocol = ProtocolConfig::standard();
    protocol.check_sample_rate(sample_rate)?;
    let payload = protocol.alphabet().parse(symbols)?;
    let wire = PacketCodec::new(protocol.clone())?.encode(&payload)?;
    let plan = Modulator::new(protocol.clone())?.modulate(&payload)?;
    let audio = render(&plan, sample_rate, 0.5);
    let beep = protocol.beep_samples(sample_rate);
    let fft_size = beep.next_power_of_two() * 4;

    println!("Slot  Symbol  Expected (Hz)  Measured (Hz)");
    for (i, tone) in plan.tones.iter().enumerate() {
        let slot = &audio[i * beep..(i + 1) * beep];
        let measured = dominant_frequency(slot, sample_rate, fft_size).unwrap_or(0.0);
        println!(
            "{:4}  {:>6}  {:13.1}  {:13.1}",
            i,
            protocol.alphabet().mnemonic(wire[i]),
            tone.frequency,
            measured
        );
    }

    Ok(())
}
