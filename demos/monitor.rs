/**
 * Reading Monitor Demo
 *
 * This demo demonstrates the fundamental monitoring flow: create a device
 * session and consume the stream of reading batches its scheduled polls emit.
 */
use futures_util::StreamExt;
use rustkasa::Device;

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- Rustkasa - Reading Monitor ---");

    // 1. Initialize the device session (first poll fires ~2s after creation)
    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.100".to_string());
    let device = Device::builder(&host).poll_interval_secs(10).build();
    println!("[INFO] Polling {} every 10s...", host);

    // 2. Consume reading batches as polls complete
    let stream = device.stream();
    tokio::pin!(stream);

    let mut count = 0;
    while let Some(batch) = stream.next().await {
        count += 1;
        println!("[{}] Batch of {} readings:", count, batch.len());
        for reading in &batch.readings {
            println!("    {} = {}", reading.name, reading.value);
        }
    }

    println!("[INFO] Stream ended after {count} batches.");
}
