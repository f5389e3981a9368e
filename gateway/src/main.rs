use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use clap::{Parser, Subcommand};
use http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::anyhow;

use tokenwave_gateway::{
    ServerConfig,
    core::hardware::{HardwareProfile, init_hardware_profile},
    routes,
    state::AppState,
    utils::wav::encode_wav,
};

/// Tokenwave Gateway - long-form speech synthesis server
#[derive(Parser, Debug)]
#[command(name = "tokenwave-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve,

    /// Synthesize text to a WAV file without starting the server
    Synthesize {
        /// Text to synthesize
        #[arg(short = 't', long = "text", conflicts_with = "input")]
        text: Option<String>,

        /// Read the text from a file
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: Option<PathBuf>,

        /// Voice to use (defaults to the configured voice)
        #[arg(short = 'v', long = "voice")]
        voice: Option<String>,

        /// Output WAV path
        #[arg(short = 'o', long = "output", default_value = "output.wav")]
        output: PathBuf,
    },

    /// Print the detected hardware profile as JSON
    Profile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(config_path)?
    } else {
        ServerConfig::from_env()?
    };

    // Probe the hardware once; every request shares the resulting policy
    let probe = config.hardware_probe.probe();
    let profile = init_hardware_profile(probe.as_ref()).clone();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, profile).await,
        Commands::Synthesize {
            text,
            input,
            voice,
            output,
        } => synthesize(config, profile, text, input, voice, output).await,
        Commands::Profile => {
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}

async fn synthesize(
    config: ServerConfig,
    profile: HardwareProfile,
    text: Option<String>,
    input: Option<PathBuf>,
    voice: Option<String>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let text = match (text, input) {
        (Some(text), _) => text,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?,
        (None, None) => anyhow::bail!("Provide --text or --input"),
    };

    let state = AppState::new(config, profile)?;
    let result = state
        .pipeline
        .synthesize(&text, voice.as_deref(), state.pipeline.default_sampling())
        .await?;

    let wav = encode_wav(&result.samples, result.sample_rate)?;
    tokio::fs::write(&output, wav)
        .await
        .map_err(|e| anyhow!("Failed to write {}: {}", output.display(), e))?;

    for warning in &result.warnings {
        println!("warning: {warning}");
    }
    println!(
        "Wrote {:.2}s of audio ({} chunks) to {}",
        result.duration_secs(),
        result.chunk_count,
        output.display()
    );
    Ok(())
}

async fn serve(config: ServerConfig, profile: HardwareProfile) -> anyhow::Result<()> {
    let address = config.address();
    let rate_limit_rps = config.rate_limit_requests_per_second;
    let rate_limit_burst = config.rate_limit_burst_size;
    let cors_origins = config.cors_allowed_origins.clone();

    info!(
        tier = %profile.tier,
        workers = profile.worker_count,
        batch_size = profile.batch_size,
        "Hardware policy selected"
    );
    println!("Starting server on {address}");

    // Create application state
    let app_state = AppState::new(config, profile)?;

    // Configure rate limiting (disabled when rate >= 100000 for performance testing)
    let governor_layer = if rate_limit_rps < 100000 {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(rate_limit_rps as u64)
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("Failed to build rate limiter config"))?;
        Some(GovernorLayer::new(governor_config))
    } else {
        println!("Rate limiting disabled (rate >= 100000/s)");
        None
    };

    // Configure CORS
    let cors_layer = if let Some(ref origins) = cors_origins {
        if origins == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(false)
        } else {
            // Parse comma-separated origins
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true)
        }
    } else {
        info!(
            "CORS not configured, defaulting to same-origin only. \
             Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
        );
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(false)
    };

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::create_app(app_state)
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers);

    // Parse socket address
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    println!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
