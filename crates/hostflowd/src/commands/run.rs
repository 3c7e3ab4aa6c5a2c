use crate::runtime::Runtime;
use anyhow::bail;
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn handle(runtime: Runtime) -> anyhow::Result<()> {
    println!("{}", "Starting hostflowd...".blue());

    let auth = runtime.provider.check_auth().await?;
    if !auth.authenticated {
        bail!(
            "Provider authentication failed: {}",
            auth.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    println!(
        "  Provider: {} ({})",
        runtime.provider.kind().to_string().cyan(),
        auth.account_info.unwrap_or_default()
    );

    let recovered = runtime.relay.recover().await?;
    if recovered > 0 {
        println!("  Resumed {} unfinished task(s)", recovered);
    }

    let cancel = CancellationToken::new();
    let pool = runtime.start_workers();

    let relay = Arc::clone(&runtime.relay);
    let relay_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { relay.run(cancel).await }
    });

    let settings = &runtime.config.provisioner.reconcile;
    let reconcile_task = settings.enabled.then(|| {
        let reconciler = runtime.reconciler();
        let interval = settings.interval;
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(interval, cancel).await })
    });

    println!(
        "{}",
        format!(
            "✓ Running with {} worker(s), press Ctrl+C to stop",
            runtime.config.provisioner.worker.workers
        )
        .green()
    );

    tokio::signal::ctrl_c().await?;
    println!();
    println!("{}", "Shutting down...".yellow());

    cancel.cancel();
    pool.shutdown().await;
    if let Err(e) = relay_task.await {
        tracing::warn!(error = %e, "Outbox relay ended abnormally");
    }
    if let Some(task) = reconcile_task
        && let Err(e) = task.await
    {
        tracing::warn!(error = %e, "Reconciler ended abnormally");
    }

    println!("{}", "✓ Stopped".green());
    Ok(())
}
