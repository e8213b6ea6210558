use ossy_payments::{App, AppContext, ConfigBuilder, PaymentsModule};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new().from_env().build()?;
    ossy_payments::init_tracing_with_config(&config);

    let context = AppContext::from_config(&config)?;
    if context.configured_methods().is_empty() {
        tracing::warn!("No payment rails configured; every create-intent request will be rejected");
    }
    // TODO: swap in a durable LedgerStore once the marketplace database schema lands
    tracing::warn!("Transaction ledger is held in memory and is lost on restart");

    App::builder()
        .with_config(config)
        .with_context(context)
        .register_module(PaymentsModule)
        .build()
        .serve()
        .await?;

    Ok(())
}
