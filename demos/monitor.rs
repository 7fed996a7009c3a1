use hisense_multi_idu::{
    HisenseClient, MessageLogMode, PollResult, DEFAULT_POWER_SCAN_INTERVAL,
    DEFAULT_UNIT_SCAN_INTERVAL,
};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> hisense_multi_idu::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args
        .get(1)
        .expect("usage: monitor <host[:port]> [--lock-write] [--log <path>]");
    let lock_write = args.iter().any(|a| a == "--lock-write");
    let log_path = args
        .iter()
        .position(|a| a == "--log")
        .and_then(|i| args.get(i + 1));

    let mut builder = HisenseClient::builder(host)
        .lock_write(lock_write)
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|units| {
            for unit in units.values() {
                println!(
                    "[{}] {} | {:?} | fan: {:?} | set {}\u{00b0}C | room {} | {:?}",
                    unit.address,
                    unit.name(),
                    unit.mode,
                    unit.fan_speed,
                    unit.set_temp,
                    unit.room_temp
                        .map(|t| format!("{t:.1}\u{00b0}C"))
                        .unwrap_or_else(|| "--".to_string()),
                    unit.status,
                );
            }
        });

    if let Some(path) = log_path {
        println!("Logging gateway traffic to {path}");
        builder = builder.message_log(MessageLogMode::Diffed, path);
    }

    let client = Arc::new(builder.build()?);

    let topology = client.get_topology(false).await?;
    println!(
        "Gateway {} with {} indoor units",
        topology.hub().address,
        topology.indoor_addresses().len()
    );

    let power_client = client.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DEFAULT_POWER_SCAN_INTERVAL);
        loop {
            interval.tick().await;
            match power_client.fetch_power().await {
                Some(watts) => println!("Power: {watts:.0} W"),
                None => println!("Power: unavailable"),
            }
        }
    });

    let mut interval = tokio::time::interval(DEFAULT_UNIT_SCAN_INTERVAL);
    loop {
        interval.tick().await;
        match client.poll_units().await {
            PollResult::Fresh(_) => {}
            PollResult::StaleFallback { error, age, .. } => {
                eprintln!("Poll error: {error} (serving data {}s old)", age.as_secs());
            }
            PollResult::Unavailable(error) => eprintln!("Gateway unavailable: {error}"),
        }
    }
}
