use clap::Parser;
use native_yield::{Ctx, Env, launch, setup_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed_env = Env::parse();
    let ctx = Ctx::load_files(&parsed_env.config, &parsed_env.secrets)?;

    let telemetry_guard = if let Some(ref telemetry) = ctx.telemetry {
        match telemetry.setup_telemetry() {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Failed to setup telemetry: {e}");
                setup_tracing(&ctx.log_level);
                None
            }
        }
    } else {
        setup_tracing(&ctx.log_level);
        None
    };

    let result = launch(ctx).await;

    // Flushes pending spans before the process exits.
    drop(telemetry_guard);

    result
}
