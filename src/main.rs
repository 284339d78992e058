use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::{FutureExt, StreamExt};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use statecore::ExecuteMode;
use statecore::core::config::{self, DemoConfig};
use statecore::engine::Engine;
use statecore::login::{LoginAction, LoginViewModel, MockLoginService, view_model};

#[derive(Parser)]
#[command(name = "statecore", about = "Drive the login view-model through the engine")]
struct Args {
    /// Lane for actions whose view-model doesn't pick one
    #[arg(short, long, value_enum)]
    mode: Option<ExecuteMode>,

    /// Username to log in with
    #[arg(short, long)]
    username: Option<String>,

    /// Password to log in with
    #[arg(short, long)]
    password: Option<String>,

    /// Log verbosity
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let _ = TermLogger::init(
        args.log_level,
        log_config,
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let file_config = config::load_config()?;
    let engine_config = config::resolve_engine(&file_config, args.mode);
    let demo = config::resolve_demo(
        &file_config,
        args.username.as_deref(),
        args.password.as_deref(),
    );

    log::info!("statecore demo starting as {:?}", demo.username);
    run_login(demo, engine_config).await;
    Ok(())
}

async fn run_login(demo: DemoConfig, engine_config: statecore::EngineConfig) {
    let service = MockLoginService::new(Duration::from_millis(demo.latency_ms));
    let engine = Engine::with_config(LoginViewModel::new(Arc::new(service)), engine_config);
    let signals = engine.signals();

    let valid = view_model::form_valid_binding(signals);
    let _valid_observer = valid.observe(|valid| println!("form valid: {valid}"));

    let mut logging_in = view_model::logging_in(signals);
    let spinner = tokio::spawn(async move {
        while let Some(loading) = logging_in.next().await {
            println!("{}", if loading { "logging in..." } else { "idle" });
        }
    });

    let mut tokens = view_model::logged_in(signals);
    let mut errors = signals.errors();

    engine.execute(LoginAction::SetUsername(demo.username));
    engine.execute(LoginAction::SetPassword(demo.password));
    engine.execute(LoginAction::Login);
    engine.until_idle().await;

    if let Some(Some(token)) = tokens.next().now_or_never() {
        println!("logged in, token: {token}");
    }
    while let Some(Some(err)) = errors.next().now_or_never() {
        println!("login failed: {err}");
    }

    spinner.abort();
}
