//! Concurrent callers example.
//!
//! Hammers one native instance from many OS threads and async tasks at once
//! and reports that every call still ran on the owner thread, one at a time.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gamesdk_core::logging::init_logging;
use gamesdk_core::native::{LoopbackOp, LoopbackProbe, LoopbackScript, LoopbackSdk};
use gamesdk_core::{Core, CoreConfig};

const THREADS: usize = 8;
const CALLS_PER_THREAD: usize = 250;
const ASYNC_TASKS: i64 = 32;

fn main() -> anyhow::Result<()> {
    init_logging("info")?;

    let probe = LoopbackProbe::new();
    let script = LoopbackScript {
        call_latency: Duration::from_micros(20),
        ..LoopbackScript::default()
    };

    let factory_probe = probe.clone();
    let core: Arc<Core<LoopbackSdk>> = Arc::new(Core::create_with(
        CoreConfig::new(1),
        move |params| LoopbackSdk::with_script(params, script, factory_probe),
    )?);
    core.start()?;
    anyhow::ensure!(
        core.wait_until_initialized(Duration::from_secs(5)),
        "native runtime did not initialize"
    );

    // Blocking callers on plain threads
    let start = Instant::now();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let core = core.clone();
            thread::spawn(move || -> anyhow::Result<()> {
                for _ in 0..CALLS_PER_THREAD {
                    core.run_on_owner(|sdk| sdk.current_user_id())?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("caller thread panicked"))??;
    }

    let elapsed = start.elapsed();
    let total = THREADS * CALLS_PER_THREAD;
    println!(
        "{} blocking calls from {} threads in {:?} ({:.0} calls/s)",
        total,
        THREADS,
        elapsed,
        total as f64 / elapsed.as_secs_f64()
    );

    // Async callers awaiting correlated completions
    let runtime = tokio::runtime::Runtime::new()?;
    let start = Instant::now();
    let completed = runtime.block_on(async {
        let calls = (0..ASYNC_TASKS).map(|i| {
            let core = core.clone();
            async move {
                core.call_correlated_async(Duration::from_secs(5), move |sdk, id| {
                    sdk.submit(LoopbackOp::succeed(i).after(2), Some(id))
                })
                .await
            }
        });

        futures::future::join_all(calls)
            .await
            .into_iter()
            .filter(|outcome| outcome.is_ok())
            .count()
    });
    println!(
        "{}/{} correlated async calls completed in {:?}",
        completed,
        ASYNC_TASKS,
        start.elapsed()
    );

    println!("Max concurrent native calls: {}", probe.max_in_flight());
    println!("Affinity violations: {}", probe.affinity_violations());

    core.shutdown();
    Ok(())
}
