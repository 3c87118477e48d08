use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hubrelay")]
#[command(about = "Messenger / WhatsApp Business webhook relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a template config (if missing) and create the images directory.
    Init {
        /// Config file path (default: HUBRELAY_CONFIG_PATH or ./config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay: platform webhooks on /webhook, aggregator replies on /receptor.
    Serve {
        /// Config file path (default: HUBRELAY_CONFIG_PATH or ./config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Listen port (default from config or 1337)
        #[arg(long, short)]
        port: Option<u16>,

        /// Bind address (default from config or 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("hubrelay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port, bind }) => {
            if let Err(e) = run_serve(config, port, bind).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(hubrelay::config::default_config_path);
    let images = hubrelay::init::init_config_dir(&path)?;
    println!(
        "initialized config at {} (images under {})",
        path.display(),
        images.display()
    );
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, path) = hubrelay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    if let Some(b) = bind {
        config.server.bind = b;
    }
    config.images_dir = hubrelay::config::resolve_images_dir(&config, &path);
    log::info!(
        "starting relay on {}:{} (config {}, images {})",
        config.server.bind,
        config.server.port,
        path.display(),
        config.images_dir.display()
    );
    hubrelay::gateway::run_server(config).await
}
