/**
 * Relay Toggle Demo
 *
 * This demo demonstrates command dispatch: switch the relay on, wait, switch
 * it back off. An acknowledged command refreshes all readings immediately.
 */
use rustkasa::{Device, NightMode};
use tokio::time::{Duration, sleep};

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- Rustkasa - Relay Toggle ---");

    // 1. Initialize the device session
    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.100".to_string());
    let device = Device::builder(&host).build();

    // 2. Switch the relay on
    println!("[STEP 1] Switching ON...");
    match device.set_relay(true).await {
        Ok(()) => println!("[SUCCESS] Relay is on"),
        Err(e) => eprintln!("[ERROR] Control failed: {:?}", e),
    }

    sleep(Duration::from_secs(2)).await;

    // 3. Darken the status LED (best effort; never fails)
    println!("[STEP 2] Enabling night mode...");
    device.set_night_mode(NightMode::On).await;

    sleep(Duration::from_secs(2)).await;

    // 4. Switch the relay back off
    println!("[STEP 3] Switching OFF...");
    match device.set_relay(false).await {
        Ok(()) => println!("[SUCCESS] Relay is off"),
        Err(e) => eprintln!("[ERROR] Control failed: {:?}", e),
    }

    println!("[INFO] Demo finished.");
}
