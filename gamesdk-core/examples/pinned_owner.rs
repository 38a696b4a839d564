//! Pinned owner thread example.
//!
//! Shows how the owner thread is placed on a CPU core and what the pinning
//! result looks like on this machine.

use std::time::Duration;

use gamesdk_core::arch::{detect_cpu_info, PinPolicy};
use gamesdk_core::logging::init_logging;
use gamesdk_core::native::LoopbackSdk;
use gamesdk_core::{Client, CoreConfig};

fn main() -> anyhow::Result<()> {
    init_logging("info")?;

    let cpu_info = detect_cpu_info();
    println!("CPU Information:");
    println!("  Logical cores: {}", cpu_info.logical_cores());
    println!("  Physical cores: {:?}", cpu_info.physical_cores());

    for policy in [PinPolicy::Unpinned, PinPolicy::Core(0), PinPolicy::Auto] {
        let config = CoreConfig {
            owner_pinning: policy,
            owner_thread_name: "gamesdk-pinned".to_string(),
            poll_interval: Duration::from_millis(20),
            ..CoreConfig::new(1)
        };

        let client = Client::<LoopbackSdk>::connect(config)?;
        let core = client.core();

        let thread_name = core.run_on_owner(|_| std::thread::current().name().map(str::to_string))?;

        println!("\nPolicy {:?}:", policy);
        println!("  Requested core: {:?}", core.owner_core());
        println!("  Pinning result: {:?}", core.pinning_result());
        println!("  Owner thread: {:?} ({:?})", thread_name, core.owner_thread_id());
        println!("  State: {:?}", core.state());

        client.close();
    }

    Ok(())
}
