use std::time::Duration;

use futures_util::StreamExt;
use httputils::{ClientOptions, CompletionMode, HttpUtilFactory, RetryPolicy, RetryTrigger};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Item {
    id: i64,
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base = std::env::var("HTTPUTILS_BASE_URL")?;

    let options = ClientOptions::new()
        .base_address(&base)?
        .timeout(Duration::from_secs(10))?
        .retry_policy(RetryPolicy::exponential(
            3,
            200,
            RetryTrigger::TIMEOUT | RetryTrigger::EXCEPTION,
        ));
    let factory = HttpUtilFactory::new(options);
    let http = factory.get("demo")?;

    let response = http.get("items")?.add_query("page", 1)?.send().await?;
    println!("{}", response.response_info());

    let items: Option<Vec<Item>> = response.read_as().await?;
    for item in items.unwrap_or_default() {
        println!("{} {}", item.id, item.name);
    }

    let mut stream = http
        .get("items/stream")?
        .use_completion_mode(CompletionMode::ResponseHeadersRead)
        .read_as_json_stream::<Item>()
        .await?;
    while let Some(item) = stream.next().await {
        println!("{:?}", item?);
    }

    factory.dispose();
    Ok(())
}
