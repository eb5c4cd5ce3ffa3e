//! Line Control Example
//!
//! Walks an open port through the configuration requests:
//! - Line coding at several baud rates and framings
//! - DTR and RTS toggling
//! - A short break

use std::thread;
use std::time::Duration;

use blp_usb_serial::{Connection, LineConfig, Parity, SetOptions, StopBits};

fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> blp_usb_serial::Result<()> {
    let conn = Connection::new();

    let Some(port) = conn.list()?.into_iter().next() else {
        println!("No BLP device found");
        return Ok(());
    };
    println!("Using {}", port);

    conn.open(&port.address, LineConfig::default())?;
    println!("Opened at {}", LineConfig::default());

    let configs = [
        LineConfig::new(115_200),
        LineConfig::new(57_600).with_parity(Parity::Even),
        LineConfig::new(19_200)
            .with_data_bits(7)
            .with_parity(Parity::Odd)
            .with_stop_bits(StopBits::Two),
        LineConfig::new(9600),
    ];
    for config in configs {
        conn.set_line_config(config)?;
        println!("Line coding  {}  {:02x?}", config, config.pack());
    }

    for (dtr, rts) in [(true, false), (false, true), (true, true), (false, false)] {
        conn.set(&SetOptions::default().dtr(dtr).rts(rts))?;
        println!("DTR={} RTS={}", dtr as u8, rts as u8);
        thread::sleep(Duration::from_millis(100));
    }

    conn.set(&SetOptions::default().brk(true))?;
    println!("Break on");
    thread::sleep(Duration::from_millis(250));
    conn.set(&SetOptions::default().brk(false))?;
    println!("Break off");

    conn.close()?;
    println!("Closed");
    Ok(())
}
