//! Single node launcher for the shmem backend.
//!
//! `gd_run <num_pes> <program> [args..]` starts one process per PE with
//! `GLOBAL_DONE_PE_ID`, `GLOBAL_DONE_NUM_PES`, `GLOBAL_DONE_JOB_ID`, a fresh
//! random `GLOBAL_DONE_LAUNCH_ID` and `GLOBAL_DONE_BACKEND=shmem` set, then
//! waits for all of them.

use anyhow::{bail, Context};
use std::process::{Command, ExitStatus};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

fn job_id() -> u32 {
    match std::env::var("GLOBAL_DONE_JOB_ID") {
        Ok(val) => val.parse().unwrap_or_else(|_| std::process::id()),
        Err(_) => std::process::id(),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let usage = "usage: gd_run <num_pes> <program> [args..]";
    let num_pes: usize = args
        .next()
        .context(usage)?
        .parse()
        .context("num_pes must be a positive integer")?;
    if num_pes == 0 {
        bail!("num_pes must be a positive integer");
    }
    let program = args.next().context(usage)?;
    let program_args: Vec<String> = args.collect();
    let job_id = job_id();
    let launch_id = rand::random::<u64>();

    let mut children = Vec::with_capacity(num_pes);
    for pe in 0..num_pes {
        let child = Command::new(&program)
            .args(&program_args)
            .env("GLOBAL_DONE_BACKEND", "shmem")
            .env("GLOBAL_DONE_PE_ID", pe.to_string())
            .env("GLOBAL_DONE_NUM_PES", num_pes.to_string())
            .env("GLOBAL_DONE_JOB_ID", job_id.to_string())
            .env("GLOBAL_DONE_LAUNCH_ID", launch_id.to_string())
            .spawn()
            .with_context(|| format!("failed to launch pe {} ({})", pe, program))?;
        debug!("launched pe {} as pid {}", pe, child.id());
        children.push(child);
    }

    let mut first_failure = 0;
    for (pe, mut child) in children.into_iter().enumerate() {
        let status = child
            .wait()
            .with_context(|| format!("failed to wait on pe {}", pe))?;
        if !status.success() {
            warn!("pe {} exited with {}", pe, status);
            if first_failure == 0 {
                first_failure = exit_code(status);
            }
        }
    }
    if first_failure != 0 {
        std::process::exit(first_failure);
    }
    Ok(())
}
