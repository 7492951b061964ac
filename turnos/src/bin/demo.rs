//! Queue demo
//!
//! Runs two customers and one teller operator as independent peers on an
//! in-process hub and prints each peer's view after every step:
//!
//! 1. customer 1 takes a teller ticket (#1)
//! 2. customer 2 takes an executive ticket (#2)
//! 3. the teller calls, serves and completes #1
//! 4. a late peer joins and catches up through sync
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info,turnos=debug cargo run --bin demo
//! ```

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnos::identity::resolve_session_id;
use turnos::{Config, LocalHub, QueueClient, SessionEnvironment, SessionId, TicketKind};
use turnos_core::environment::SystemClock;

/// Time given to the hub to deliver a round of broadcasts
const PROPAGATION: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(hub_capacity = config.hub.capacity, "Starting queue demo");

    let hub = LocalHub::new(config.hub.capacity);
    let start = |session_id: SessionId| {
        let env = SessionEnvironment::new(
            Arc::new(SystemClock),
            Arc::new(hub.connect()),
            config.session.clone(),
        );
        QueueClient::start(session_id, env, &config)
    };

    let customer_1 = start(resolve_session_id(&config.session)?).await?;
    let customer_2 = start(SessionId::generate()).await?;
    let teller = start(SessionId::generate()).await?;
    teller.set_operator(Some(TicketKind::Teller)).await?;
    tokio::time::sleep(PROPAGATION).await;

    println!("=== Turnos: peer-synchronized ticket queue ===");

    println!("\n>>> Customer 1 requests a teller ticket");
    customer_1.request_ticket(TicketKind::Teller).await?;
    tokio::time::sleep(PROPAGATION).await;
    print_views(&[("customer 1", &customer_1), ("customer 2", &customer_2), ("teller", &teller)]).await;

    println!("\n>>> Customer 2 requests an executive ticket");
    customer_2.request_ticket(TicketKind::Executive).await?;
    tokio::time::sleep(PROPAGATION).await;
    print_views(&[("customer 1", &customer_1), ("customer 2", &customer_2), ("teller", &teller)]).await;

    let first = customer_1
        .my_ticket()
        .await
        .context("customer 1 lost their ticket")?;

    println!("\n>>> Teller calls {}", first.number);
    teller.call_ticket(first.id.clone()).await?;
    tokio::time::sleep(PROPAGATION).await;
    print_views(&[("customer 1", &customer_1), ("teller", &teller)]).await;
    if let Some(notification) = customer_1.notification().await {
        println!("    customer 1 notification: {}", notification.message());
    }

    println!("\n>>> Teller starts serving {}", first.number);
    teller.start_service(first.id.clone()).await?;
    tokio::time::sleep(PROPAGATION).await;
    print_views(&[("customer 1", &customer_1), ("teller", &teller)]).await;

    println!("\n>>> Teller completes {}", first.number);
    teller.complete_service(first.id.clone()).await?;
    tokio::time::sleep(PROPAGATION).await;
    print_views(&[("customer 1", &customer_1), ("customer 2", &customer_2), ("teller", &teller)]).await;
    if let Some(notification) = customer_1.notification().await {
        println!("    customer 1 notification: {}", notification.message());
    }

    println!("\n>>> A new peer joins and synchronizes");
    let latecomer = start(SessionId::generate()).await?;
    tokio::time::sleep(PROPAGATION).await;
    print_views(&[("latecomer", &latecomer)]).await;

    println!("\n>>> Recent activity (teller)");
    for entry in teller.snapshot().await.activity.iter() {
        println!("    {} {}", entry.at.format("%H:%M:%S%.3f"), entry.message);
    }

    let timeout = Duration::from_secs(1);
    for client in [customer_1, customer_2, teller, latecomer] {
        // Pending notification timers are abandoned on timeout
        if let Err(error) = client.shutdown(timeout).await {
            tracing::debug!(%error, "Client shut down with pending effects");
        }
    }

    println!("\n=== Demo complete ===");
    Ok(())
}

async fn print_views(clients: &[(&str, &QueueClient)]) {
    for (name, client) in clients {
        let queue = client.queue().await;
        let line: Vec<String> = queue
            .iter()
            .map(|t| format!("{} {} {}", t.number, t.kind, t.status))
            .collect();
        let position = client
            .my_position()
            .await
            .map_or_else(String::new, |p| format!(" (my position: {p})"));
        println!("    {name:<11} [{}]{position}", line.join(", "));
    }
}
