use petra_ac::{Config, Notification};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("petra_ac=info".parse()?),
        )
        .init();

    info!("PETRA A&C v{} starting", petra_ac::VERSION);

    let Some(config_path) = std::env::args().nth(1) else {
        error!("Usage: petra-ac <alarms.yaml>");
        std::process::exit(1);
    };

    let config = Config::from_file(&config_path)?;
    info!(
        "Loaded {} variables, {} conditions",
        config.variables.len(),
        config.conditions.len()
    );

    let mut engine = config.build_engine()?;
    let (subscriber, mut notifications) = engine.subscribe(config.subscription.clone())?;
    engine.refresh(subscriber)?;

    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match &notification {
                Notification::Event(_) => match serde_json::to_string(&notification) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to serialize notification: {}", e),
                },
                Notification::RefreshStart | Notification::RefreshEnd => {
                    info!("{:?}", notification);
                }
            }
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        res = engine.run() => {
            if let Err(e) = res {
                error!("Engine error: {}", e);
                std::process::exit(1);
            }
        }
    }

    let stats = engine.stats();
    info!(
        "Final stats: {} events, {} retained, {} dropped, uptime: {}s",
        stats.events_raised, stats.retained, stats.notifications_dropped, stats.uptime_secs
    );

    drop(engine);
    let _ = printer.await;
    Ok(())
}
