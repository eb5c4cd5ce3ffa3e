//! List BLP Ports
//!
//! Prints every attached BLP serial port with its address and strings, then
//! the same list as JSON.

use blp_usb_serial::{Connection, PortInfo};

fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> blp_usb_serial::Result<()> {
    let ports: Vec<PortInfo> = Connection::new().list()?;
    if ports.is_empty() {
        println!("No BLP device found");
        return Ok(());
    }

    println!("Found {} port(s):", ports.len());
    for port in &ports {
        println!("  {}", port);
        println!(
            "    vid {:04x}  pid {:04x}  bcdDevice {:04x}",
            port.vendor_id, port.product_id, port.bcd_device
        );
    }

    match serde_json::to_string_pretty(&ports) {
        Ok(json) => println!("\n{}", json),
        Err(e) => eprintln!("JSON encoding failed: {}", e),
    }

    Ok(())
}
