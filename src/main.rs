use clap::Parser;
use sqlpipe::client::{Client, DetachedLauncher};
use sqlpipe::config::{self, Cli, Command, ExecArgs, ServeArgs, StopArgs};
use sqlpipe::error::{PipeError, PipeResult};
use sqlpipe::protocol::{Request, mask_credentials};
use sqlpipe::{render, server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve(args) => run_server(args).await,
        Command::Stop(args) => run_stop(args).await,
        Command::Exec(args) => run_exec(args).await,
    };
    if let Err(err) = result {
        report(&err);
        std::process::exit(1);
    }
}

async fn run_server(args: ServeArgs) -> PipeResult<()> {
    let config = config::Config::load(&args.common)?;
    let fallback = if args.nodebug { "warn" } else { "debug" };
    init_logging(&config.logging, fallback);
    server::serve(&config).await
}

async fn run_stop(args: StopArgs) -> PipeResult<()> {
    let config = config::Config::load(&args.common)?;
    init_logging(&config.logging, "warn");
    let socket_path = &config.server.socket_path;
    match Client::connect_existing(socket_path).await {
        Some(client) => {
            client.stop().await?;
            tracing::info!(path = %socket_path, "Shutdown requested");
        }
        None => eprintln!("server is not running ({socket_path})"),
    }
    Ok(())
}

async fn run_exec(args: ExecArgs) -> PipeResult<()> {
    let config = config::Config::load(&args.common)?;
    let fallback = if args.debug { "debug" } else { "warn" };
    init_logging(&config.logging, fallback);

    let launcher =
        DetachedLauncher::current_exe(&config, args.common.config.as_deref(), args.debug)?;
    let mut client = Client::connect(&config, &launcher).await?;
    let request = Request::new(args.conn, args.sql);
    tracing::debug!(
        conn = %mask_credentials(&request.target),
        query = request.is_query_shape,
        "Sending request"
    );
    let output = client.send_request(&request).await?;
    let text = render::render(&output, request.is_query_shape, args.output_format)?;
    print!("{text}");
    Ok(())
}

fn init_logging(logging: &config::LoggingConfig, fallback: &str) {
    let filter = tracing_subscriber::EnvFilter::new(logging.level_or(fallback));
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn report(err: &PipeError) {
    match err {
        PipeError::Api(api) => {
            eprintln!("error [{}]: {}", api.error_code, api.message);
            if let Some(details) = &api.details {
                eprintln!("Details: {details}");
            }
        }
        other => eprintln!("error [{}]: {other}", other.code()),
    }
}
