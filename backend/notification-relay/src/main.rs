use std::sync::Arc;

use actix_web::{middleware, rt, web, App, HttpServer};
use notification_relay::{
    auth::KeyDirectoryVerifier,
    config::Config,
    error::AppError,
    handlers, logging, metrics,
    services::{email, Dispatcher, LivenessProber, NotificationQueue},
    state::AppState,
    websocket::{CloseReason, ConnectionRegistry},
};
use tokio_util::sync::CancellationToken;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let config = Config::from_env()?;
    tracing::info!("Starting notification relay");

    let verifier = KeyDirectoryVerifier::load(&config.auth.keys_directory)
        .map_err(|e| AppError::StartServer(format!("public keys: {e}")))?;
    let email_sender = email::from_config(&config.email)
        .map_err(|e| AppError::StartServer(format!("email: {e}")))?;

    let registry = ConnectionRegistry::new();
    let (queue, queue_rx) = NotificationQueue::new(config.relay.queue_capacity);
    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::from(email_sender),
        config.relay.ack_timeout,
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(queue_rx, shutdown.clone()));

    let prober = LivenessProber::new(
        registry.clone(),
        config.relay.ping_interval,
        config.relay.ack_timeout,
    );
    let prober_task = tokio::spawn(prober.run(shutdown.clone()));

    let state = AppState::new(registry.clone(), Arc::new(verifier), queue);
    let bind_addr = config.app.bind_addr();
    tracing::info!(%bind_addr, "Starting HTTP server");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .configure(handlers::register_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .disable_signals()
    .run();

    // Close push channels before the workers stop so clients see a close frame
    let handle = server.handle();
    let signal_registry = registry.clone();
    let signal_shutdown = shutdown.clone();
    rt::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
        signal_shutdown.cancel();
        let signalled = signal_registry.terminate_all(CloseReason::Shutdown).await;
        tracing::info!(connections = signalled, "Push channels signalled to close");
        handle.stop(true).await;
    });

    server
        .await
        .map_err(|e| AppError::StartServer(format!("run HTTP server: {e}")))?;

    shutdown.cancel();
    registry.terminate_all(CloseReason::Shutdown).await;
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "dispatcher task panicked");
    }
    if let Err(e) = prober_task.await {
        tracing::error!(error = %e, "prober task panicked");
    }

    tracing::info!("Notification relay stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
