use std::sync::Arc;
use std::time::Duration;

use apim_loadtest_core::{
    LifecycleDriver, LoadTestConfig, LoadTestError, PrioritizationScenario, PrometheusSink,
    RequestGenerator, StagesShape,
};
use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

mod runner;
mod stats;

use runner::{LoadRunner, UserContext, UserPool};
use stats::StatsCollector;

#[derive(Parser, Debug)]
#[command(name = "apim-loadtest")]
#[command(about = "Priority load test for Azure OpenAI behind API Management", long_about = None)]
#[command(version)]
struct Cli {
    /// APIM gateway base URL (e.g., https://my-apim.azure-api.net)
    #[arg(long, env = "APIM_ENDPOINT")]
    host: Option<String>,

    /// How often the load shape is polled, in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_interval_ms: u64,

    /// Pause between two requests of the same user, in seconds
    #[arg(long, default_value_t = 1)]
    user_wait_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    let cli = Cli::parse();
    let config = LoadTestConfig::load()?;

    let host = cli
        .host
        .clone()
        .or_else(|| config.apim.endpoint.clone())
        .ok_or_else(|| LoadTestError::config("APIM endpoint not set (use --host or APIM_ENDPOINT)"))?;
    let subscription_key = config
        .apim
        .subscription_one_key
        .clone()
        .ok_or_else(|| LoadTestError::config("APIM_SUBSCRIPTION_ONE_KEY is not set"))?;

    let client = reqwest::Client::builder().build()?;
    let generator = RequestGenerator::new(
        client.clone(),
        &host,
        subscription_key,
        config.load.request.clone(),
        Arc::new(PrometheusSink),
    )?;
    let shape = StagesShape::new(config.load.schedule());

    println!("🚀 Starting APIM priority load test");
    println!("   Host: {}", host);
    println!("   Pattern: {} (ramp rate {}/s)", config.load.pattern, config.load.ramp_rate);
    println!(
        "   Request: {} against {}",
        config.load.request.kind(),
        config.load.request.deployment()
    );
    println!("   Duration: {}s", config.load.schedule().total_duration().as_secs());
    println!();

    let scenario = PrioritizationScenario::new(config, client)?;
    let mut driver = LifecycleDriver::new(scenario);
    driver.init().await?;
    driver.start().await?;

    let pool = UserPool::new(UserContext {
        generator: Arc::new(generator),
        observers: Arc::new(driver.observers().clone()),
        stats: Arc::new(StatsCollector::default()),
        wait_time: Duration::from_secs(cli.user_wait_secs),
    });
    let mut runner = LoadRunner::new(
        Box::new(shape),
        pool,
        Duration::from_millis(cli.tick_interval_ms.max(1)),
    );
    let elapsed = runner.run().await;
    let stats = runner.stats().snapshot();

    println!("\n✅ Load generation complete");
    println!("   Total requests: {}", stats.total_requests);
    println!("   Failed: {}", stats.failed_requests);
    println!("   Error rate: {:.2}%", stats.error_rate() * 100.0);
    println!("   Median latency: {}ms", stats.median_latency().as_millis());
    println!("   Throughput: {:.1} RPS", stats.requests_per_second(elapsed));
    println!("   Responses:");
    for (status, count) in &stats.status_counts {
        println!("     {}: {}", status, count);
    }
    println!();

    println!("📊 Collecting results...");
    if let Err(e) = driver.stop().await {
        error!("Report failed: {}", e);
        return Err(e.into());
    }

    println!("✅ Done");
    Ok(())
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_target(false).init();
}
