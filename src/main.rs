use std::{process, sync::Arc, time::Duration};

use rewind::{
    application::error::AppError,
    cache::RuleTable,
    config::{self, CheckRulesArgs, CliArgs},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::oneshot;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .clone()
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(cli_args, settings).await,
        config::Command::CheckRules(args) => run_check_rules(&settings, &args),
    }
}

async fn run_serve(cli_args: CliArgs, settings: config::Settings) -> Result<(), AppError> {
    let state = HttpState::from_settings(&settings)?;

    let reloader = match state.cache.as_ref() {
        Some(cache) => spawn_rule_reloader(cli_args, cache.filter.rules().clone()),
        None => {
            info!(cache = "response", "response cache disabled");
            None
        }
    };

    let result = serve_http(&settings, state).await;

    if let Some(handle) = reloader {
        handle.abort();
        let _ = handle.await;
    }

    result
}

fn run_check_rules(settings: &config::Settings, args: &CheckRulesArgs) -> Result<(), AppError> {
    let table = RuleTable::parse(&settings.cache.paths, &settings.cache.patterns)?;
    print!("{}", table.describe());
    println!(
        "{} subtree rule(s), {} pattern rule(s)",
        table.subtree_count(),
        table.pattern_count()
    );

    if let Some(path) = args.path.as_deref() {
        match table.resolve(path) {
            Some(rule) => println!("{path} -> {rule}"),
            None => println!("{path} -> no rule"),
        }
    }
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, root = %settings.content.root.display(), "listening");

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        },
    );

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline(signalled_rx, grace) => {
            warn!(grace_seconds = grace.as_secs(), "graceful shutdown timed out");
        }
    }

    Ok(())
}

async fn drain_deadline(signalled: oneshot::Receiver<()>, grace: Duration) {
    if signalled.await.is_err() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(unix)]
fn spawn_rule_reloader(
    cli_args: CliArgs,
    rules: Arc<rewind::cache::RuleResolver>,
) -> Option<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "rule reload on SIGHUP unavailable");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            let settings = match config::load(&cli_args) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(error = %err, "configuration reload failed; keeping current rules");
                    continue;
                }
            };
            if let Err(err) = rules.reconfigure(&settings.cache.paths, &settings.cache.patterns) {
                warn!(error = %err, "cache rules rejected; keeping current rules");
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_rule_reloader(
    _cli_args: CliArgs,
    _rules: Arc<rewind::cache::RuleResolver>,
) -> Option<tokio::task::JoinHandle<()>> {
    None
}
