// SKDP console client.
//
// Prompts for the server address and the device key file distributed by
// the server administrator, runs the key exchange, and drops into a
// line-oriented chat loop over the encrypted channel.

use skdp::keystore;
use skdp::transport::{ClientConnection, SessionEvent};
use skdp::{ProtocolConfig, SERVER_PORT};
use std::io::{BufRead, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

const QUIT_COMMAND: &str = "skdp quit";

fn print_banner() {
    println!("****************************************************");
    println!("* SKDP: Symmetric Key Distribution Protocol Client *");
    println!("****************************************************");
    println!();
}

fn prompt(line: &str) -> std::io::Result<String> {
    print!("client> {}", line);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    print_banner();

    let addr = loop {
        let line = match prompt("Enter the servers IPv4 or IPv6 address: ") {
            Ok(line) => line,
            Err(_) => return,
        };
        match line.parse::<IpAddr>() {
            Ok(ip) => break SocketAddr::new(ip, SERVER_PORT),
            Err(_) => println!("client> The address is invalid."),
        }
    };

    let dkey = loop {
        let line = match prompt("Enter the path of the device-key file: ") {
            Ok(line) => line,
            Err(_) => return,
        };
        match keystore::load_device_key(ProtocolConfig::default(), Path::new(&line)) {
            Ok(dkey) => break dkey,
            Err(error) => println!("client> Could not load the device-key: {}", error),
        }
    };

    println!("client> Connecting...");
    let connection = match ClientConnection::connect(addr, &dkey, false).await {
        Ok(connection) => connection,
        Err(error) => {
            println!("client> {}", error);
            println!("client> The key-exchange failed, the application will exit.");
            return;
        }
    };
    println!("client> The session has been established.");

    let sender = connection.sender();
    let mut connection = connection;
    let receiver = tokio::spawn(async move {
        loop {
            match connection.receive().await {
                Ok(SessionEvent::Message(message)) => {
                    println!("{}", String::from_utf8_lossy(&message));
                    print!("client> ");
                    let _ = std::io::stdout().flush();
                }
                Ok(SessionEvent::KeepAlive) | Ok(SessionEvent::Ratcheted) => {}
                Ok(SessionEvent::Closed(reason)) => {
                    match reason {
                        Some(error) => println!("client> Remote closed: {}", error),
                        None => println!("client> The connection was terminated by the remote host."),
                    }
                    break;
                }
                Err(error) => {
                    println!("client> {}", error);
                    connection.abort(error).await;
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("client> ");
        let _ = std::io::stdout().flush();
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.contains(QUIT_COMMAND) {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                if let Err(error) = sender.send(line.as_bytes()).await {
                    println!("client> {}", error);
                    break;
                }
            }
            _ => break,
        }
    }

    receiver.abort();
    let _ = sender.close().await;
    println!("client> The application has exited.");
}
