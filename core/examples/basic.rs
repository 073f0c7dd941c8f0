//! Gated handlers for a small coffee service
//!
//! Run with `RUST_LOG=debug cargo run --example basic` to see transitions.

use breaker_gate::{CallGate, Config, GateRegistry, IntervalScheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
enum ServiceError {
    DatabaseUnavailable,
    NotFound(u32),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::DatabaseUnavailable => write!(f, "database unavailable"),
            ServiceError::NotFound(id) => write!(f, "coffee #{} not found", id),
        }
    }
}

impl std::error::Error for ServiceError {}

struct CoffeeStore {
    healthy: AtomicBool,
}

impl CoffeeStore {
    async fn find(&self, id: u32) -> Result<String, ServiceError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(ServiceError::DatabaseUnavailable);
        }
        match id {
            1 => Ok("Shipwreck Roast".to_string()),
            2 => Ok("Buddy Brew".to_string()),
            _ => Err(ServiceError::NotFound(id)),
        }
    }
}

fn fibonacci(n: u64) -> u64 {
    if n < 2 { n } else { fibonacci(n - 1) + fibonacci(n - 2) }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = GateRegistry::<ServiceError>::with_config(Config {
        failure_threshold: 3,
        success_threshold: 3,
        open_duration: Duration::from_millis(500),
        ..Default::default()
    })?;
    let store = Arc::new(CoffeeStore {
        healthy: AtomicBool::new(true),
    });
    let coffees: CallGate<ServiceError> = registry.gate("coffees");

    println!("--- Healthy store ---");
    for id in [1, 2, 7] {
        let store = Arc::clone(&store);
        match coffees.execute(|| async move { store.find(id).await }).await {
            Ok(name) => println!("✓ {}", name),
            Err(e) => println!("✗ {}", e),
        }
    }

    println!("\n--- Database goes down ---");
    store.healthy.store(false, Ordering::SeqCst);
    for id in 1..=5 {
        let store = Arc::clone(&store);
        match coffees.execute(|| async move { store.find(id).await }).await {
            Ok(name) => println!("✓ {}", name),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("States: {:?}", registry.states());

    println!("\n--- Fibonacci stays available ---");
    let fib = registry.gate("fibonacci");
    let value = fib.call(|| Ok::<_, ServiceError>(fibonacci(25)))?;
    println!("fib(25) = {}", value);

    println!("\n--- Health check on a schedule ---");
    store.healthy.store(true, Ordering::SeqCst);
    let mut scheduler = IntervalScheduler::new();
    {
        let coffees = coffees.clone();
        let store = Arc::clone(&store);
        scheduler.register("coffee-health", Duration::from_millis(200), move || {
            let coffees = coffees.clone();
            let store = Arc::clone(&store);
            async move {
                let probe = coffees.execute(|| async move { store.find(1).await }).await;
                println!("health probe: {:?}", probe.map(|_| "ok"));
            }
        })?;
    }
    scheduler.start()?;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    scheduler.shutdown();

    println!("States: {:?}", registry.states());
    Ok(())
}
