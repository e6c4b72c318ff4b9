use tokio_util::sync::CancellationToken;

use pipeline::TelemetryPipeline;

use super::config::Effective;
use super::error::AccelError;
use super::sensor::SimulatedAccelerometer;

pub async fn run(args: &Effective) -> Result<(), AccelError> {
    let pipeline = TelemetryPipeline::mqtt(&args.publisher)?;
    let mut status = pipeline.status();

    println!("Accelerometer publisher");
    println!("  broker  : {}", args.publisher.broker_url);
    println!("  topic   : {}", args.publisher.topic);
    println!("  client  : {}", pipeline.client_id());
    println!("  interval: {} ms", args.sample_interval.as_millis());
    println!();
    println!("Publishing... (Ctrl+C to stop)");

    let (sampler, publisher) = pipeline.into_parts();
    let latest = sampler.latest();

    let token = CancellationToken::new();
    let publishing = publisher.start(token.clone());
    let sampling = sampler.spawn(
        Box::new(SimulatedAccelerometer::new(args.seed)),
        args.sample_interval,
        token.clone(),
    );

    let mut stats_tick = tokio::time::interval(args.stats_interval);
    stats_tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C, shutting down");
                break;
            }
            changed = status.state_changed() => match changed {
                Ok(state) => tracing::info!(%state, "connection state"),
                Err(_) => {
                    tracing::warn!("publisher stopped unexpectedly");
                    break;
                }
            },
            _ = stats_tick.tick() => {
                let current = *latest.borrow();
                if let Some(sample) = current {
                    println!("{}\n", sample.display_text());
                }
                let s = status.snapshot();
                tracing::info!(
                    state = %status.connection_state(),
                    sampled = s.sampled,
                    published = s.published,
                    overflow_dropped = s.overflow_dropped,
                    lost = s.lost(),
                    connect_failures = s.connect_failures,
                    "stats"
                );
            }
        }
    }

    token.cancel();
    publishing.stop().await;
    if let Err(e) = sampling.await {
        tracing::error!(error = %e, "sampler task failed");
    }

    let s = status.snapshot();
    println!(
        "\n  stopped: {} sampled, {} published, {} lost",
        s.sampled,
        s.published,
        s.lost()
    );
    Ok(())
}
