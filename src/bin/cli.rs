//! kvpipe CLI Client
//!
//! Command-line interface for talking to a Redis-like server through kvpipe,
//! plus a stress mode that pipelines SET/GET pairs from many threads while
//! injecting panics into completion callbacks.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use kvpipe::{Client, Command, Config, DispatchMode, Response};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{fmt, EnvFilter};

/// kvpipe CLI
#[derive(Parser, Debug)]
#[command(name = "kvpipe-cli")]
#[command(about = "Pipelined client for Redis-like key-value servers")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    /// Connect timeout in milliseconds
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,

    /// Pipeline SET/GET pairs concurrently with panicking SET callbacks
    Stress {
        /// Concurrent submitting threads
        #[arg(short, long, default_value = "100")]
        tasks: usize,

        /// Ids per thread
        #[arg(short, long, default_value = "100")]
        ids: usize,

        /// Probability that a SET callback panics
        #[arg(short, long, default_value = "0.5")]
        fault_rate: f64,

        /// RNG seed for fault injection
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Run callbacks inline on the reader thread instead of the dispatch thread
        #[arg(long)]
        inline: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,kvpipe=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let dispatch_mode = match &args.command {
        Commands::Stress { inline: true, .. } => DispatchMode::Inline,
        _ => DispatchMode::default(),
    };

    let config = Config::builder()
        .server_addr(&args.server)
        .connect_timeout_ms(args.connect_timeout_ms)
        .dispatch_mode(dispatch_mode)
        .build();

    let client = match Client::connect(&config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to connect to {}: {}", args.server, e);
            process::exit(1);
        }
    };

    let outcome = match args.command {
        Commands::Get { key } => client.get(&key).map(|value| match value {
            Some(value) => println!("{}", value),
            None => println!("(nil)"),
        }),
        Commands::Set { key, value } => client.set(&key, &value).map(|_| println!("OK")),
        Commands::Del { key } => client.del(&key).map(|n| println!("(integer) {}", n)),
        Commands::Ping => client.ping().map(|_| println!("PONG")),
        Commands::Stress {
            tasks,
            ids,
            fault_rate,
            seed,
            ..
        } => {
            let mismatches = run_stress(&client, tasks, ids, fault_rate, seed);
            if mismatches > 0 {
                eprintln!("{} mismatched replies", mismatches);
                process::exit(2);
            }
            Ok(())
        }
    };

    if let Err(e) = outcome {
        eprintln!("(error) {}", e);
        process::exit(1);
    }

    if let Err(e) = client.close() {
        tracing::warn!("Connection ended with a fault: {}", e);
    }
}

/// Returns the number of GET replies that did not match their own id
fn run_stress(client: &Client, tasks: usize, ids: usize, fault_rate: f64, seed: u64) -> u64 {
    // Injected panics are expected; keep them out of the terminal
    std::panic::set_hook(Box::new(|_| {}));

    let mismatches = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let workers: Vec<_> = (0..tasks)
        .map(|task| {
            let client = client.clone();
            let mismatches = Arc::clone(&mismatches);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(task as u64));
                let mut handles = Vec::with_capacity(ids * 2);

                for i in 0..ids {
                    let id = i.to_string();

                    let fault = rng.gen_bool(fault_rate.clamp(0.0, 1.0));
                    handles.push(client.submit_with(Command::set(&id, &id), move |_| {
                        if fault {
                            panic!("injected fault");
                        }
                    }));

                    let expected = id.clone();
                    let mismatches = Arc::clone(&mismatches);
                    handles.push(client.submit_with(Command::get(&id), move |result| {
                        let matches = matches!(
                            &result,
                            Ok(Response::Bulk(bytes)) if &bytes[..] == expected.as_bytes()
                        );
                        if !matches {
                            mismatches.fetch_add(1, Ordering::Relaxed);
                            tracing::error!(
                                "Result mismatch! Expected {} but got {:?}",
                                expected,
                                result
                            );
                        }
                    }));
                }

                for handle in handles {
                    let _ = handle.wait_timeout(Duration::from_secs(60));
                }
            })
        })
        .collect();

    for worker in workers {
        let _ = worker.join();
    }

    // Closing joins the dispatch thread, so every callback has run after this
    if let Err(e) = client.close() {
        tracing::warn!("Connection ended with a fault: {}", e);
    }

    let stats = client.stats();
    println!(
        "{} commands in {:?}: {} completed, {} failed, {} callback faults isolated",
        stats.submitted,
        started.elapsed(),
        stats.completed,
        stats.failed,
        stats.continuation_faults
    );

    let _ = std::panic::take_hook();
    mismatches.load(Ordering::Relaxed)
}
