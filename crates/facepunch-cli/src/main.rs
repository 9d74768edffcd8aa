use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facepunch_core::response::{
    AuthenticateResponse, HistoryResponse, RegisterResponse, UsersResponse,
};
use facepunch_core::{LivenessAnalyzer, DEFAULT_LIVENESS_THRESHOLD};
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and `AttendanceProxyBlocking`.
#[zbus::proxy(
    interface = "io.facepunch.Attendance1",
    default_service = "io.facepunch.Attendance1",
    default_path = "/io/facepunch/Attendance1"
)]
trait Attendance {
    async fn register(&self, name: &str, image: &[u8]) -> zbus::Result<String>;
    async fn authenticate(&self, image: &[u8]) -> zbus::Result<String>;
    async fn history(&self, days: u32) -> zbus::Result<String>;
    async fn list_users(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facepunch", about = "Face-authenticated attendance kiosk CLI")]
struct Cli {
    /// Print the daemon's raw JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new person from a captured image
    Register {
        /// Display name, unique across registered people
        #[arg(short, long)]
        name: String,
        /// Path to a JPEG or PNG capture
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Authenticate a capture and record the next ENTRY/EXIT punch
    Punch {
        /// Path to a JPEG or PNG capture
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show recent punches, most recent first
    History {
        /// Number of days to look back
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// List registered people
    Users,
    /// Show daemon status
    Status,
    /// Score a capture for liveness locally, without the daemon
    Liveness {
        /// Path to an image file
        #[arg(short, long)]
        image: PathBuf,
        /// Acceptance threshold
        #[arg(short, long, default_value_t = DEFAULT_LIVENESS_THRESHOLD)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register { name, image } => {
            let bytes = read_image(&image)?;
            let raw = proxy()
                .await?
                .register(&name, &bytes)
                .await
                .context("Register call failed")?;
            if cli.json {
                println!("{raw}");
                return Ok(());
            }
            let resp: RegisterResponse = serde_json::from_str(&raw)?;
            println!("{}", resp.message);
            if let Some(id) = resp.identity_id {
                println!("  id:       {id}");
            }
            if let Some(score) = resp.liveness_score {
                println!("  liveness: {score:.3}");
            }
            if !resp.success {
                std::process::exit(1);
            }
        }
        Commands::Punch { image } => {
            let bytes = read_image(&image)?;
            let raw = proxy()
                .await?
                .authenticate(&bytes)
                .await
                .context("Authenticate call failed")?;
            if cli.json {
                println!("{raw}");
                return Ok(());
            }
            let resp: AuthenticateResponse = serde_json::from_str(&raw)?;
            print_punch(&resp);
            if !resp.success {
                std::process::exit(1);
            }
        }
        Commands::History { days } => {
            let raw = proxy()
                .await?
                .history(days)
                .await
                .context("History call failed")?;
            if cli.json {
                println!("{raw}");
                return Ok(());
            }
            let resp: HistoryResponse = serde_json::from_str(&raw)?;
            if !resp.success {
                bail!(resp.message.unwrap_or_else(|| "history unavailable".into()));
            }
            if resp.history.is_empty() {
                println!("No punches in the last {days} day(s)");
            }
            for item in &resp.history {
                println!(
                    "{}  {:<5}  {:<24}  {:.2}",
                    item.timestamp,
                    item.punch_type.as_str(),
                    item.name,
                    item.confidence
                );
            }
        }
        Commands::Users => {
            let raw = proxy()
                .await?
                .list_users()
                .await
                .context("ListUsers call failed")?;
            if cli.json {
                println!("{raw}");
                return Ok(());
            }
            let resp: UsersResponse = serde_json::from_str(&raw)?;
            if !resp.success {
                bail!(resp.message.unwrap_or_else(|| "user list unavailable".into()));
            }
            if resp.users.is_empty() {
                println!("No registered users");
            }
            for user in &resp.users {
                println!("{:>4}  {}", user.id, user.name);
            }
        }
        Commands::Status => {
            let raw = proxy()
                .await?
                .status()
                .await
                .context("Status call failed")?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Liveness { image, threshold } => liveness(&image, threshold)?,
    }

    Ok(())
}

/// Connect to facepunchd on the bus selected by `FACEPUNCH_BUS` (session by default).
async fn proxy() -> Result<AttendanceProxy<'static>> {
    let conn = match std::env::var("FACEPUNCH_BUS").as_deref() {
        Ok("system") => zbus::Connection::system().await,
        _ => zbus::Connection::session().await,
    }
    .context("connecting to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("creating facepunchd proxy (is facepunchd running?)")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_punch(resp: &AuthenticateResponse) {
    if resp.success {
        println!(
            "{} {}",
            resp.punch_type.map(|p| p.to_string()).unwrap_or_default(),
            resp.name.as_deref().unwrap_or("?")
        );
        if let Some(ts) = &resp.timestamp {
            println!("  at:         {ts}");
        }
        if let Some(c) = resp.confidence {
            println!("  confidence: {c:.3}");
        }
    } else if let Some(message) = &resp.message {
        println!("{message}");
    }
    if let Some(score) = resp.liveness_score {
        println!("  liveness:   {score:.3}");
    }
}

fn liveness(path: &Path, threshold: f32) -> Result<()> {
    let image = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8();
    let report = LivenessAnalyzer::new(threshold).analyze(&image);
    println!("live:             {}", report.is_live);
    println!("score:            {:.4}", report.score);
    println!("sharpness:        {:.4}", report.sharpness);
    println!("color dispersion: {:.4}", report.color_dispersion);
    println!("threshold:        {threshold}");
    Ok(())
}
