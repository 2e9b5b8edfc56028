use std::env;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use rtrb::RingBuffer;
use simd_json::prelude::*;

use ws_pump::{Config, Error, Message, Opcode, WssClient};

const DEFAULT_HOST: &str = "stream-testnet.bybit.com";
const DEFAULT_PATH: &str = "/v5/public/linear";
const DEFAULT_SUBSCRIBE: &str = r#"{"op":"subscribe","args":["publicTrade.BTCUSDT"]}"#;

/// What the hot thread hands to the cold one. Kept `Copy` so the ring never allocates.
#[derive(Debug, Clone, Copy)]
struct LogMessage {
    elapsed_us: u64,
    opcode: Opcode,
    len: u32,
    /// 0 = plain, 1 = json, 2 = json with topic
    kind: u8,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("fatal: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    println!("Initializing WebSocket pump...");

    // Loads .env before the WS_* lookups below.
    let config = Config::from_env()?;
    let host = env_or("WS_HOST", DEFAULT_HOST);
    let path = env_or("WS_PATH", DEFAULT_PATH);
    let port = env_or("WS_PORT", "443")
        .parse::<u16>()
        .map_err(|_| Error::InvalidInput("WS_PORT"))?;
    let subscribe = env_or("WS_SUBSCRIBE", DEFAULT_SUBSCRIBE);
    let max_messages = env_or("WS_MAX_MESSAGES", "100")
        .parse::<usize>()
        .map_err(|_| Error::InvalidInput("WS_MAX_MESSAGES"))?;

    let (mut producer, mut consumer) = RingBuffer::<LogMessage>::new(4096);

    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    println!("Detected {} cores.", core_ids.len());
    let hot_core = core_ids.first().copied();
    let cold_core = core_ids.get(1).copied().or(hot_core);

    // COLD THREAD: printing only, never touches the socket.
    let cold_handle = thread::spawn(move || {
        if let Some(core) = cold_core {
            if core_affinity::set_for_current(core) {
                println!("COLD thread pinned to {:?}", core);
            }
        }
        let mut seen = 0usize;
        loop {
            match consumer.pop() {
                Ok(msg) => {
                    seen += 1;
                    println!(
                        "COLD: #{} {:?} {} bytes kind={} at {}us",
                        seen, msg.opcode, msg.len, msg.kind, msg.elapsed_us
                    );
                }
                Err(_) if consumer.is_abandoned() => break,
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
        println!("COLD: {} records", seen);
    });

    // HOT THREAD
    let hot_handle = thread::spawn(move || -> Result<(), Error> {
        if let Some(core) = hot_core {
            if core_affinity::set_for_current(core) {
                println!("HOT thread pinned to {:?}", core);
            }
        }

        println!("HOT: connecting to wss://{}:{}{}", host, port, path);
        let mut client = WssClient::connect_with(&host, &path, port, config)?;
        client.send_message(&Message::text(subscribe))?;

        let started = Instant::now();
        for _ in 0..max_messages {
            let message = match client.wait_message() {
                Ok(message) => message,
                Err(Error::Closed) => {
                    eprintln!("HOT: server went away: {:?}", client.last_error());
                    break;
                }
                Err(e) => return Err(e),
            };

            let kind = match message.as_json() {
                Ok(value) if value.get("topic").and_then(|t| t.as_str()).is_some() => 2,
                Ok(_) => 1,
                Err(_) => 0,
            };
            let record = LogMessage {
                elapsed_us: started.elapsed().as_micros() as u64,
                opcode: message.opcode,
                len: message.payload.len() as u32,
                kind,
            };
            if producer.push(record).is_err() {
                eprintln!("HOT: log ring full, dropping record");
            }
            if message.opcode == Opcode::Close {
                break;
            }
        }

        if client.is_valid() {
            client.close()?;
        }
        println!("HOT: done");
        Ok(())
    });

    let hot_result = hot_handle.join().unwrap_or(Err(Error::Closed));
    if cold_handle.join().is_err() {
        eprintln!("cold thread panicked");
    }
    hot_result
}
