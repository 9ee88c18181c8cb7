use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{BufReader, stdin, stdout};
use workbridge::bridge::{EchoRuntime, FileEntry, OperationRequest, ProgressSink, serve_stdio};
use workbridge::bridge::protocol::AnalyzeFilesParams;
use workbridge::config::load_settings;
use workbridge::{Bridge, BridgeSettings};

/// Message-passing bridge to a background analysis host
#[derive(Parser)]
#[command(name = "workbridge")]
#[command(version)]
#[command(about = "Message-passing bridge to a background analysis host")]
struct Cli {
    /// Settings file layered over the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the echo runtime over framed stdin/stdout
    HostEcho,
    /// Send files to the configured host for analysis and print the result
    Analyze {
        /// Files to analyse
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::HostEcho => {
            let reader = BufReader::new(stdin());
            if let Err(e) = serve_stdio(EchoRuntime::default(), reader, stdout()).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Analyze { files } => {
            let settings = load_settings(cli.config.as_deref()).unwrap_or_else(|e| {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            });
            if let Err(e) = analyze(settings, files).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn analyze(
    mut settings: BridgeSettings,
    paths: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if settings.host_command.is_empty() {
        // Without a configured host, talk to our own echo runtime
        let exe = std::env::current_exe()?;
        settings.host_command = vec![exe.to_string_lossy().into_owned(), "host-echo".to_string()];
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let data = tokio::fs::read(path).await?;
        files.push(FileEntry::new(path.display().to_string(), data));
    }

    let bridge = Bridge::spawn_process(&settings)?;
    let progress = ProgressSink::new(|update| match update.message {
        Some(message) => eprintln!("[{:>5.1}%] {}", update.percentage, message),
        None => eprintln!("[{:>5.1}%]", update.percentage),
    });

    // Raw request: the configured host decides the result shape
    let result = bridge
        .request(
            OperationRequest::AnalyzeFiles(AnalyzeFilesParams { files }),
            Some(progress),
        )
        .await;
    bridge.close();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
