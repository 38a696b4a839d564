//! Callback round trip example.
//!
//! Connects to the loopback runtime, triggers a few correlated operations and
//! waits for their completions, then shows the fire-and-forget path.

use std::time::{Duration, Instant};

use anyhow::Context;
use gamesdk_core::logging::init_logging;
use gamesdk_core::native::{LoopbackOp, LoopbackProbe, LoopbackScript, LoopbackSdk};
use gamesdk_core::{Client, CoreConfig, ResultCode};

fn main() -> anyhow::Result<()> {
    init_logging("info,gamesdk_core=debug")?;

    let probe = LoopbackProbe::new();
    let script = LoopbackScript {
        warmup_drains: 4,
        current_user_id: Some(80_351_110_224_678_912),
        ..LoopbackScript::default()
    };

    let connect_started = Instant::now();
    let factory_probe = probe.clone();
    let client = Client::connect_with(CoreConfig::new(418_559_331_265_675_294), move |params| {
        LoopbackSdk::with_script(params, script, factory_probe)
    })
    .context("connecting to the loopback runtime")?;
    println!("Connected in {:?}", connect_started.elapsed());

    let user = client
        .wait_for(Duration::from_secs(2), |sdk| sdk.current_user_id())
        .context("waiting for the current user")?;
    println!("Current user: {}", user);

    let core = client.core();

    // Successful completion
    let payload = core
        .call_correlated(Duration::from_secs(2), |sdk, id| {
            sdk.submit(LoopbackOp::succeed("join-secret-1234").after(3), Some(id))
        })
        .context("requesting a join secret")?;
    println!("Join secret: {:?}", payload.as_text());

    // Completion carrying a failure status
    match core.call_correlated(Duration::from_secs(2), |sdk, id| {
        sdk.submit(LoopbackOp::fail(ResultCode::LOBBY_FULL), Some(id))
    }) {
        Ok(payload) => println!("Unexpected success: {:?}", payload),
        Err(err) => println!("Lobby connect failed as expected: {}", err),
    }

    // Trigger now, collect later
    let id = core.begin_correlated(|sdk, id| sdk.submit(LoopbackOp::succeed(42).after(5), Some(id)))?;
    println!("Triggered {}, waiting for it...", id);
    match core.wait_for_callback_result(id, Duration::from_secs(2)) {
        Some(result) => println!("{} completed with {} -> {:?}", result.id, result.code, result.payload),
        None => println!("{} did not complete in time", id),
    }

    // No callback: the completion is never observed
    core.fire_and_forget(|sdk| sdk.submit(LoopbackOp::succeed("activity"), None))?;
    println!("Activity update sent without a callback");

    println!(
        "Drains: {:?}, native calls: {}, affinity violations: {}",
        core.drain_stats(),
        probe.calls(),
        probe.affinity_violations()
    );

    client.close();
    println!("Destroyed: {}", probe.is_destroyed());

    Ok(())
}
