//! Minimal Terminal
//!
//! Opens the first BLP port (or the address given as the first argument),
//! prints everything the device sends and forwards stdin lines to it.
//!
//! Usage: terminal [usb:16c0:<pid>:<index>] [baud]

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;

use blp_usb_serial::{Connection, OpenOptions, SerialError, SetOptions};

fn main() {
    // Initialize logging
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> blp_usb_serial::Result<()> {
    let mut args = std::env::args().skip(1);
    let conn = Arc::new(Connection::new());

    let path = match args.next() {
        Some(path) => path,
        None => match conn.list()?.into_iter().next() {
            Some(port) => port.com_name,
            None => {
                println!("No BLP device found");
                return Ok(());
            }
        },
    };

    let mut options = OpenOptions::default();
    if let Some(baud) = args.next() {
        options.baud_rate = baud
            .parse()
            .map_err(|_| SerialError::InvalidConfig(format!("bad baud rate: {}", baud)))?;
    }

    conn.open_with(&path, &options)?;
    conn.set(&SetOptions::default().dtr(true).rts(true))?;
    println!(
        "Connected to {} at {} baud (Ctrl+D to quit)\n",
        path, options.baud_rate
    );

    let reader = {
        let conn = conn.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            let len = buf.len();
            loop {
                match conn.read(&mut buf, 0, len) {
                    // cancelled by close
                    Ok(0) | Err(SerialError::NotOpen) => break,
                    Ok(n) => {
                        let mut stdout = io::stdout().lock();
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                    }
                    Err(e) => {
                        eprintln!("\nRead error: {}", e);
                        break;
                    }
                }
            }
        })
    };

    for line in io::stdin().lock().lines() {
        let mut line = line?;
        line.push_str("\r\n");
        conn.write(line.as_bytes())?;
    }

    conn.close()?;
    let _ = reader.join();
    println!("\nDisconnected");
    Ok(())
}
