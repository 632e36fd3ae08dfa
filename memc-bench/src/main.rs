//! # Client Benchmark Harness
//!
//! Purpose: Drive a running cache server (or a set of them) through the sync
//! client and report throughput and latency per operation kind, so both wire
//! protocols can be compared on the same workload.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: a fixed PRNG seed picks keys for the get phase.
//! 2. **Allocation Control**: keys and values are pre-built before timing starts.
//! 3. **Machine-Readable Output**: `MEMC_BENCH_JSON=1` prints one JSON report.
//!
//! ## Usage
//!
//! ```text
//! memc-bench <text|binary> <host:port[,host:port...]> [ops] [keys] [value_size]
//! ```

use std::env;
use std::hint::black_box;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memc_client::{CacheClient, GetOutcome, Item, Protocol, StoreOutcome};

const DEFAULT_OP_COUNT: usize = 100_000;
const DEFAULT_KEY_COUNT: usize = 1 << 12;
const DEFAULT_VALUE_SIZE: usize = 128;
const DEFAULT_PORT: u16 = 11211;

struct BenchConfig {
    protocol: Protocol,
    servers: Vec<(String, u16)>,
    op_count: usize,
    key_count: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Result<Self> {
        let mut args = env::args().skip(1);
        let protocol = match args.next() {
            Some(raw) => raw.parse::<Protocol>().map_err(anyhow::Error::msg)?,
            None => bail!(
                "usage: memc-bench <text|binary> <host:port[,...]> [ops] [keys] [value_size]"
            ),
        };
        let servers = args
            .next()
            .context("missing server list")?
            .split(',')
            .filter(|raw| !raw.is_empty())
            .map(parse_server)
            .collect::<Result<Vec<_>>>()?;
        if servers.is_empty() {
            bail!("server list is empty");
        }

        Ok(BenchConfig {
            protocol,
            servers,
            op_count: parse_usize(args.next(), DEFAULT_OP_COUNT).max(1),
            key_count: parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1),
            value_size: parse_usize(args.next(), DEFAULT_VALUE_SIZE),
        })
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Splits `host[:port]`; the port defaults to the well-known cache port.
fn parse_server(raw: &str) -> Result<(String, u16)> {
    match raw.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("invalid port in {:?}", raw))?;
            Ok((host.to_string(), port))
        }
        None => Ok((raw.to_string(), DEFAULT_PORT)),
    }
}

/// Tiny deterministic PRNG; keeps the get phase reproducible across runs.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

fn build_keys(count: usize) -> Vec<String> {
    (0..count).map(|idx| format!("memc-bench:{:08}", idx)).collect()
}

fn build_values(count: usize, size: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut buffers = Vec::with_capacity(count);
    for i in 0..count {
        let mut buffer = vec![0u8; size];
        let bytes = (seed ^ (i as u64)).to_le_bytes();
        let copy_len = buffer.len().min(bytes.len());
        buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
        buffers.push(buffer);
    }
    buffers
}

/// Pairs every key with its value so the timed loops never allocate.
fn build_items(keys: &[String], values: Vec<Vec<u8>>) -> Vec<Item> {
    keys.iter()
        .zip(values)
        .map(|(key, value)| Item::new(key.as_str(), value))
        .collect()
}

#[derive(Debug, Serialize)]
struct PhaseReport {
    label: &'static str,
    ops: usize,
    hits: usize,
    errors: usize,
    secs: f64,
    ops_per_sec: f64,
    nanos_per_op: f64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    protocol: Protocol,
    servers: Vec<String>,
    key_count: usize,
    value_size: usize,
    phases: Vec<PhaseReport>,
}

fn report(
    label: &'static str,
    ops: usize,
    hits: usize,
    errors: usize,
    elapsed: Duration,
) -> PhaseReport {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    PhaseReport {
        label,
        ops,
        hits,
        errors,
        secs,
        ops_per_sec,
        nanos_per_op,
    }
}

fn print_phase(phase: &PhaseReport) {
    println!(
        "{}: {} ops in {:.3}s ({:.0} ops/s, {:.1} ns/op, hits={}, errors={})",
        phase.label,
        phase.ops,
        phase.secs,
        phase.ops_per_sec,
        phase.nanos_per_op,
        phase.hits,
        phase.errors
    );
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run() {
        eprintln!("memc-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args()?;
    let mut client = CacheClient::new(config.protocol);
    for (host, port) in &config.servers {
        client
            .add_connection(host, *port)
            .with_context(|| format!("failed to add server {}:{}", host, port))?;
    }

    let keys = build_keys(config.key_count);
    let values = build_values(config.key_count, config.value_size, 0x5A5A_5A5A_5A5A_5A5A);
    let items = build_items(&keys, values);
    info!(
        protocol = %config.protocol,
        servers = config.servers.len(),
        ops = config.op_count,
        keys = config.key_count,
        value_size = config.value_size,
        "starting benchmark"
    );

    let mut phases = Vec::with_capacity(4);

    // set: writes every key at least once so the get phase can hit.
    let (mut hits, mut errors) = (0, 0);
    let start = Instant::now();
    for idx in 0..config.op_count {
        match client.set(&items[idx % config.key_count]) {
            Ok(StoreOutcome::Stored) => hits += 1,
            Ok(StoreOutcome::NotStored) => {}
            Err(err) => {
                errors += 1;
                warn!(error = %err, "set failed");
            }
        }
    }
    phases.push(report("set", config.op_count, hits, errors, start.elapsed()));

    let (mut hits, mut errors) = (0, 0);
    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0);
    let mut fetched: Vec<Item> = keys.iter().map(|key| Item::for_key(key.as_str())).collect();
    let start = Instant::now();
    for _ in 0..config.op_count {
        let item = &mut fetched[rng.next_index(config.key_count)];
        match client.get(item) {
            Ok(GetOutcome::Found) => {
                hits += 1;
                black_box(item.data());
            }
            Ok(GetOutcome::NotFound) => {}
            Err(err) => {
                errors += 1;
                warn!(error = %err, "get failed");
            }
        }
    }
    phases.push(report("get", config.op_count, hits, errors, start.elapsed()));

    // add against existing keys: every call should come back NOT_STORED.
    let (mut hits, mut errors) = (0, 0);
    let start = Instant::now();
    for idx in 0..config.op_count {
        match client.add(&items[idx % config.key_count]) {
            Ok(StoreOutcome::Stored) => hits += 1,
            Ok(StoreOutcome::NotStored) => {}
            Err(err) => {
                errors += 1;
                warn!(error = %err, "add failed");
            }
        }
    }
    phases.push(report("add", config.op_count, hits, errors, start.elapsed()));

    let (mut hits, mut errors) = (0, 0);
    let start = Instant::now();
    for idx in 0..config.op_count {
        match client.replace(&items[idx % config.key_count]) {
            Ok(StoreOutcome::Stored) => hits += 1,
            Ok(StoreOutcome::NotStored) => {}
            Err(err) => {
                errors += 1;
                warn!(error = %err, "replace failed");
            }
        }
    }
    phases.push(report("replace", config.op_count, hits, errors, start.elapsed()));

    if env::var("MEMC_BENCH_JSON").map(|v| v == "1").unwrap_or(false) {
        let report = BenchReport {
            protocol: config.protocol,
            servers: config
                .servers
                .iter()
                .map(|(host, port)| format!("{}:{}", host, port))
                .collect(),
            key_count: config.key_count,
            value_size: config.value_size,
            phases,
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        for phase in &phases {
            print_phase(phase);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_addresses() {
        assert_eq!(
            parse_server("cache-1:11311").expect("parse"),
            ("cache-1".to_string(), 11311)
        );
        assert_eq!(
            parse_server("localhost").expect("parse"),
            ("localhost".to_string(), DEFAULT_PORT)
        );
        assert!(parse_server("cache-1:http").is_err());
    }

    #[test]
    fn prng_is_deterministic_and_bounded() {
        let mut a = XorShift64::new(7);
        let mut b = XorShift64::new(7);
        for _ in 0..100 {
            let idx = a.next_index(10);
            assert_eq!(idx, b.next_index(10));
            assert!(idx < 10);
        }
    }

    #[test]
    fn items_are_prebuilt_per_slot() {
        let keys = build_keys(4);
        let items = build_items(&keys, build_values(4, 16, 0xAB));
        assert_eq!(items.len(), 4);
        assert_eq!(items[3].key(), b"memc-bench:00000003");
        assert_eq!(items[3].size(), 16);
        assert_eq!(items[3].data()[0], 0xAB ^ 3);
    }

    #[test]
    fn keys_are_valid_text_keys() {
        let keys = build_keys(3);
        assert_eq!(keys[2], "memc-bench:00000002");
        assert!(keys.iter().all(|k| !k.contains(' ')));
    }
}
