//! FlashMC - command-line memcached client
//!
//! Runs one command against a set of memcached servers and prints the result.

use flashmc::client::MemcachedClient;
use flashmc::{ClientConfig, Expiration, OperationResult, StoreMode};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Command-line configuration
struct Config {
    /// Servers as host:port
    servers: Vec<String>,
    /// Log at debug level
    verbose: bool,
    /// The command and its arguments
    command: Vec<String>,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config {
            servers: Vec::new(),
            verbose: false,
            command: Vec::new(),
        };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--server" | "-s" => {
                    if i + 1 < args.len() {
                        config.servers.push(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --server requires a value");
                        std::process::exit(1);
                    }
                }
                "--verbose" => {
                    config.verbose = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashMC version {}", flashmc::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    config.command = args[i..].to_vec();
                    break;
                }
            }
        }

        if config.servers.is_empty() {
            config
                .servers
                .push(format!("127.0.0.1:{}", flashmc::DEFAULT_PORT));
        }
        config
    }
}

fn print_help() {
    println!(
        r#"
FlashMC - A Failure-Aware Memcached Client

USAGE:
    flashmc [OPTIONS] <COMMAND> [ARGS...]

OPTIONS:
    -s, --server <HOST:PORT>   Server to use (repeatable, default: 127.0.0.1:11211)
        --verbose              Log connection and routing details
    -v, --version              Print version information
        --help                 Print this help message

COMMANDS:
    get <key>
    set <key> <value> [ttl-seconds]
    add <key> <value> [ttl-seconds]
    replace <key> <value> [ttl-seconds]
    delete <key>
    incr <key> <delta> [default]
    decr <key> <delta> [default]
    append <key> <data>
    prepend <key> <data>
    stats [type]
    flush

EXAMPLES:
    flashmc set name Ariz 60
    flashmc -s cache-1:11211 -s cache-2:11211 get name
    flashmc incr visits 1 0
"#
    );
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("Error: {}", message);
    eprintln!("Run with --help for usage.");
    ExitCode::from(2)
}

/// Prints a valued result in redis-cli style.
fn print_value<T: std::fmt::Display>(result: &OperationResult<T>) {
    match result.value() {
        Some(value) if result.success() => println!("\"{}\" (cas {})", value, result.cas()),
        _ => print_status(&result.without_value()),
    }
}

fn print_status(result: &OperationResult) {
    if result.success() {
        println!("OK (cas {})", result.cas());
    } else {
        println!("(error) {}", result);
    }
}

fn parse_ttl(arg: Option<&String>) -> Result<Expiration, String> {
    match arg {
        None => Ok(Expiration::Never),
        Some(raw) => raw
            .parse::<u64>()
            .map(Expiration::seconds)
            .map_err(|_| format!("invalid ttl '{}'", raw)),
    }
}

fn parse_u64(arg: Option<&String>, name: &str, default: u64) -> Result<u64, String> {
    match arg {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("invalid {} '{}'", name, raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(if config.verbose { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = config.command.first() else {
        return Ok(usage_error("no command given"));
    };
    let args = &config.command[1..];

    let mut client_config = ClientConfig::new();
    for server in &config.servers {
        client_config = match client_config.add_server(server) {
            Ok(next) => next,
            Err(e) => return Ok(usage_error(&e.to_string())),
        };
    }
    // One command needs one connection per server.
    client_config.socket_pool.min_pool_size = 1;

    let client = MemcachedClient::connect(client_config).await?;

    let outcome = match (command.as_str(), args.len()) {
        ("get", 1) => {
            let result = client.get(&args[0]).await?;
            if result.success() {
                print_value(&result);
            } else {
                println!("(nil)");
            }
            Ok(())
        }
        ("set" | "add" | "replace", 2..=3) => {
            let mode = match command.as_str() {
                "add" => StoreMode::Add,
                "replace" => StoreMode::Replace,
                _ => StoreMode::Set,
            };
            match parse_ttl(args.get(2)) {
                Ok(ttl) => {
                    print_status(&client.store(mode, &args[0], args[1].as_str(), ttl).await?);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        ("delete", 1) => {
            print_status(&client.remove(&args[0]).await?);
            Ok(())
        }
        ("incr" | "decr", 2..=3) => {
            let delta = parse_u64(args.get(1), "delta", 1);
            let default = parse_u64(args.get(2), "default", 0);
            match (delta, default) {
                (Ok(delta), Ok(default)) => {
                    let result = if command == "incr" {
                        client
                            .increment(&args[0], default, delta, Expiration::Never, 0)
                            .await?
                    } else {
                        client
                            .decrement(&args[0], default, delta, Expiration::Never, 0)
                            .await?
                    };
                    print_value(&result);
                    Ok(())
                }
                (Err(e), _) | (_, Err(e)) => Err(e),
            }
        }
        ("append", 2) => {
            let data = args[1].clone().into_bytes();
            print_status(&client.append(&args[0], 0, data).await?);
            Ok(())
        }
        ("prepend", 2) => {
            let data = args[1].clone().into_bytes();
            print_status(&client.prepend(&args[0], 0, data).await?);
            Ok(())
        }
        ("stats", 0..=1) => {
            let stats = client.stats(args.first().map(String::as_str)).await?;
            let mut servers: Vec<_> = stats.servers().cloned().collect();
            servers.sort();
            for server in servers {
                println!("# {}", server);
                if let Some(table) = stats.server(&server) {
                    let mut names: Vec<_> = table.keys().collect();
                    names.sort();
                    for name in names {
                        println!("{}: {}", name, table[name]);
                    }
                }
            }
            Ok(())
        }
        ("flush", 0) => {
            let results = client.flush_all().await?;
            let failed = results.values().filter(|r| !r.success()).count();
            if failed == 0 {
                println!("OK ({} servers)", results.len());
            } else {
                println!("(error) flush failed on {} of {} servers", failed, results.len());
            }
            Ok(())
        }
        _ => Err(format!("unknown command or wrong arguments: {}", command)),
    };

    client.dispose();
    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(message) => Ok(usage_error(&message)),
    }
}
