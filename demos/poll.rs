// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Polls a couple of variables off a real S7-200 and prints whatever comes
//! back. Pass the PLC's IP as the first argument.
//!
//! ```text
//! cargo run --example poll -- 192.168.0.40
//! ```

use std::sync::Arc;
use std::time::Duration;

use s7200drv::{install_fatal_error_hook, Direction, Driver, DriverConfig};

fn main() {
    env_logger::init();
    install_fatal_error_hook();

    let ip = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "192.168.0.40".to_owned());

    let driver = Driver::new(
        DriverConfig::default(),
        Arc::new(|key: &str, data: &[u8]| {
            println!("{key} = {data:02X?}");
        }),
    );

    for (dp, address) in [
        (1, format!("{ip}$VW100$2")),
        (2, format!("{ip}$VD200$3")),
        (3, format!("{ip}$V255.3$1")),
    ] {
        match driver.configure(dp, &address, Direction::In, None) {
            Ok(kind) => println!("configured {address} as {kind:?}"),
            Err(e) => eprintln!("cannot configure {address}: {e}"),
        }
    }

    driver.start();
    println!("polling {ip}, ctrl-c to quit");
    loop {
        driver.work_proc();
        std::thread::sleep(Duration::from_millis(100));
    }
}
