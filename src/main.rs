use brmh::backend::dynamo::decode_value;
use brmh::backend::{BackendClient, CreateFunctionRequest, LambdaClient};
use brmh::cache::{HealthProber, HttpRemoteCache, LocalStore, TwoTierCache};
use brmh::clock::{Clock, SystemClock};
use brmh::config::{Config, LoggingConfig};
use brmh::executions::{group_executions, ExecutionGroup, ExecutionLogRow, ExecutionPoller};
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "brmh")]
#[command(about = "Client for the BRMH API-management backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./brmh.yaml or $XDG_CONFIG_HOME/brmh/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log filter, e.g. "debug" or "brmh=trace" (overrides RUST_LOG)
  #[arg(long, global = true)]
  log_level: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read and write the two-tier cache
  #[command(subcommand)]
  Cache(CacheCommand),
  /// Follow execution logs
  #[command(subcommand)]
  Exec(ExecCommand),
  /// LLM-assisted schema generation
  #[command(subcommand)]
  Llm(LlmCommand),
  /// Manage Lambda functions
  #[command(subcommand)]
  Lambda(LambdaCommand),
  /// DynamoDB helpers
  #[command(subcommand)]
  Dynamo(DynamoCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Print the cached value for KEY
  Get { key: String },
  /// Cache VALUE (JSON, or a plain string) under KEY
  Set { key: String, value: String },
  Del { key: String },
  /// Remove keys starting with PREFIX (all keys when omitted)
  Clear { prefix: Option<String> },
  /// List locally cached keys
  Keys,
  /// Probe the remote cache
  Health,
}

#[derive(Subcommand, Debug)]
enum ExecCommand {
  /// Poll an execution until it finishes, printing each update as a JSON line
  Watch {
    /// Execution id (default: the last watched execution)
    exec_id: Option<String>,
  },
  /// Group execution rows read from stdin
  Group,
}

#[derive(Subcommand, Debug)]
enum LlmCommand {
  /// Stream a generated JSON schema for PROMPT
  Schema { prompt: String },
}

#[derive(ClapArgs, Debug)]
struct FunctionArgs {
  name: String,
  #[arg(long, default_value = "nodejs18.x")]
  runtime: String,
  #[arg(long, default_value = "index.handler")]
  handler: String,
  #[arg(long)]
  role: Option<String>,
  #[arg(long)]
  memory_size: Option<u32>,
  #[arg(long)]
  timeout: Option<u32>,
  /// Environment variables as KEY=VALUE
  #[arg(long = "env", value_parser = parse_key_value)]
  environment: Vec<(String, String)>,
}

impl FunctionArgs {
  fn to_request(&self) -> CreateFunctionRequest {
    CreateFunctionRequest {
      role: self.role.clone(),
      memory_size: self.memory_size,
      timeout: self.timeout,
      environment: self.environment.iter().cloned().collect::<BTreeMap<_, _>>(),
      ..CreateFunctionRequest::new(&self.name, &self.runtime, &self.handler)
    }
  }
}

#[derive(Subcommand, Debug)]
enum LambdaCommand {
  Create(FunctionArgs),
  Status { name: String },
  /// Upload a zipped deployment package
  Upload { name: String, zip: PathBuf },
  /// Create a function and upload its code, retrying while it is being created
  Deploy {
    #[command(flatten)]
    function: FunctionArgs,
    #[arg(long)]
    zip: PathBuf,
  },
}

#[derive(Subcommand, Debug)]
enum DynamoCommand {
  /// Convert DynamoDB-typed JSON on stdin to plain JSON
  Decode,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))
}

/// Install the tracing subscriber: stderr always, plus a daily-rotated file
/// when a log directory is configured. The returned guard must outlive all
/// logging.
fn init_tracing(config: &LoggingConfig, level: Option<&str>) -> Result<Option<WorkerGuard>> {
  let filter = match level {
    Some(level) => EnvFilter::try_new(level)?,
    None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?,
  };

  let (file_layer, guard) = match &config.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "brmh.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .try_init()?;

  Ok(guard)
}

fn open_local_store(config: &Config, clock: Arc<dyn Clock>) -> Result<LocalStore> {
  let path = config.cache.db_path();
  let store = LocalStore::open(&path)
    .map_err(|e| eyre!("Failed to open local store at {}: {}", path.display(), e))?;

  Ok(
    store
      .with_clock(clock)
      .with_prefix(config.cache.key_prefix.clone())
      .with_ttl(config.cache.local_ttl())
      .with_quota(config.cache.quota()),
  )
}

fn open_cache(config: &Config) -> Result<TwoTierCache<HttpRemoteCache>> {
  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let local = open_local_store(config, clock.clone())?;
  let remote = HttpRemoteCache::new(&config.backend_url)?;
  let health = HealthProber::new(clock).with_interval(config.cache.health_interval());

  Ok(TwoTierCache::new(remote, local, health))
}

fn read_stdin_json() -> Result<Value> {
  let input = std::io::read_to_string(std::io::stdin())?;
  serde_json::from_str(&input).map_err(|e| eyre!("Invalid JSON on stdin: {}", e))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn run_cache(config: &Config, command: CacheCommand) -> Result<()> {
  let cache = open_cache(config)?;

  match command {
    CacheCommand::Get { key } => match cache.get_with_source::<Value>(&key).await {
      Some((value, source)) => {
        info!(key = %key, %source, "cache hit");
        print_json(&value)?;
      }
      None => return Err(eyre!("{}: not cached", key)),
    },
    CacheCommand::Set { key, value } => {
      let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
      cache.set(&key, &value).await;
    }
    CacheCommand::Del { key } => cache.del(&key).await,
    CacheCommand::Clear { prefix } => cache.clear(prefix.as_deref()).await,
    CacheCommand::Keys => {
      for key in cache.local().keys()? {
        println!("{}", key);
      }
    }
    CacheCommand::Health => {
      let state = cache.health().await;
      println!(
        "remote cache: {}",
        if state.is_healthy { "healthy" } else { "unavailable" }
      );
    }
  }

  Ok(())
}

fn print_group(group: &ExecutionGroup) {
  match serde_json::to_string(group) {
    Ok(line) => println!("{}", line),
    Err(e) => warn!(error = %e, "failed to serialize execution update"),
  }
}

async fn run_exec(config: &Config, command: ExecCommand) -> Result<()> {
  match command {
    ExecCommand::Watch { exec_id } => {
      let store = open_local_store(config, Arc::new(SystemClock))?;
      let client = BackendClient::new(&config.backend_url)?;
      let poller = ExecutionPoller::new(client, store)
        .with_interval(config.poller.interval())
        .with_max_empty_retries(config.poller.max_empty_retries);

      let polling = async {
        match exec_id {
          Some(id) => Ok(poller.start(&id, print_group).await),
          None => poller
            .resume(print_group)
            .await
            .ok_or_else(|| eyre!("No execution id given and none to resume")),
        }
      };

      tokio::select! {
        reason = polling => {
          let reason = reason?;
          info!(%reason, "execution polling stopped");
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted, execution id kept for resume"),
      }
    }
    ExecCommand::Group => {
      let input = decode_value(&read_stdin_json()?);
      let items = match input {
        Value::Object(mut obj) => obj
          .remove("items")
          .or_else(|| obj.remove("Items"))
          .unwrap_or(Value::Array(Vec::new())),
        other => other,
      };
      let rows: Vec<ExecutionLogRow> = serde_json::from_value(items)?;
      print_json(&group_executions(rows))?;
    }
  }

  Ok(())
}

async fn run_llm(config: &Config, command: LlmCommand) -> Result<()> {
  match command {
    LlmCommand::Schema { prompt } => {
      let client = BackendClient::new(&config.backend_url)?;
      let stream = client.generate_schema_stream(&prompt).await?;
      futures::pin_mut!(stream);

      let mut stdout = std::io::stdout();
      while let Some(chunk) = stream.next().await {
        stdout.write_all(chunk?.as_bytes())?;
        stdout.flush()?;
      }
      writeln!(stdout)?;
    }
  }
  Ok(())
}

async fn run_lambda(config: &Config, command: LambdaCommand) -> Result<()> {
  let client = LambdaClient::new(config.aws_url())?
    .with_retry(config.lambda.max_attempts, config.lambda.retry_delay());

  match command {
    LambdaCommand::Create(function) => {
      print_json(&client.create_function(&function.to_request()).await?)?
    }
    LambdaCommand::Status { name } => print_json(&client.get_function(&name).await?)?,
    LambdaCommand::Upload { name, zip } => {
      let bytes = tokio::fs::read(&zip)
        .await
        .map_err(|e| eyre!("Failed to read {}: {}", zip.display(), e))?;
      client.upload_code(&name, bytes).await?;
      println!("uploaded {} to {}", zip.display(), name);
    }
    LambdaCommand::Deploy { function, zip } => {
      let bytes = tokio::fs::read(&zip)
        .await
        .map_err(|e| eyre!("Failed to read {}: {}", zip.display(), e))?;
      let report = client.deploy(&function.to_request(), bytes).await?;
      println!(
        "deployed {} after {} attempt(s), state: {}",
        report.function_name,
        report.attempts,
        report.status.state.as_deref().unwrap_or("unknown")
      );
    }
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_tracing(&config.logging, args.log_level.as_deref())?;

  match args.command {
    Command::Cache(command) => run_cache(&config, command).await,
    Command::Exec(command) => run_exec(&config, command).await,
    Command::Llm(command) => run_llm(&config, command).await,
    Command::Lambda(command) => run_lambda(&config, command).await,
    Command::Dynamo(DynamoCommand::Decode) => print_json(&decode_value(&read_stdin_json()?)),
  }
}
