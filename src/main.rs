use anyhow::Context;
use global_done::{DoneWorldBuilder, ROOT_PE};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let config = global_done::config();
    init_tracing(config.debug);

    let world = DoneWorldBuilder::new()
        .build()
        .context("failed to set up the termination protocol")?;
    let my_pe = world.my_pe();
    if config.debug && my_pe == ROOT_PE {
        match world.star_topology() {
            Some(star) => info!("{:?}: {}", world.strategy(), star),
            None => info!("{:?}: {}", world.strategy(), world.topology()),
        }
    }

    if config.work_ms > 0 {
        let work = rand::thread_rng().gen_range(0..=config.work_ms);
        debug!("pe {} working for {} ms", my_pe, work);
        std::thread::sleep(Duration::from_millis(work));
    }
    let elapsed = world.mark_local_done()?;
    debug!("pe {} locally done after {:.3} ms", my_pe, elapsed);

    let termination = world
        .run()
        .with_context(|| format!("pe {} failed while waiting for global completion", my_pe))?;
    debug!(
        "pe {} left as {:?} after {} polls",
        termination.pe, termination.role, termination.polls
    );
    Ok(())
}
