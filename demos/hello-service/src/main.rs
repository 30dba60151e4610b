//! Minimal Wicker application.
//!
//! Loads the widget documents next to this binary and serves them:
//!
//! ```text
//! GET /greeter/hello/ada   → {"hello": "hello, ada", "visits": 0}
//! GET /greeter/counter     → heartbeat / visit counters from the store
//! ```

use tokio_util::sync::CancellationToken;
use tracing::info;

use wicker::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    LoggingBuilder::new().with_level_name("info").init();

    let runtime = Runtime::new();
    let widgets = concat!(env!("CARGO_MANIFEST_DIR"), "/widgets");

    runtime
        .load_file(WidgetKind::Store, &format!("{widgets}/hits.store.yaml"))
        .await?;
    runtime
        .load_file(WidgetKind::Script, &format!("{widgets}/pulse.script.rhai"))
        .await?;
    runtime
        .load_file(WidgetKind::Flow, &format!("{widgets}/greeting.flow.yaml"))
        .await?;
    runtime
        .load_file(WidgetKind::Schedule, &format!("{widgets}/heartbeat.schedule.yaml"))
        .await?;
    runtime
        .load_file(WidgetKind::Api, &format!("{widgets}/greeter.api.json"))
        .await?;

    let config = ServerConfig::from_env()?;
    info!(addr = %config.bind_addr(), "hello-service starting");
    Server::new(runtime, config)
        .serve(CancellationToken::new(), || info!("hello-service stopped"))
        .await?;
    Ok(())
}
