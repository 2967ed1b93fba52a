// SKDP console server.
//
// First run: prompts for a 16-hex-character master/server identity,
// provisions the master/server/device key files, and tells the operator to
// distribute the device key. Later runs: loads the server key and listens
// for one device, echoing received messages to the console and sending
// typed lines back.

use skdp::keystore;
use skdp::transport::{SessionEvent, SkdpServer};
use skdp::{ProtocolConfig, SkdpError, SERVER_PORT};
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const QUIT_COMMAND: &str = "skdp quit";

fn print_banner() {
    println!("****************************************************");
    println!("* SKDP: Symmetric Key Distribution Protocol Server *");
    println!("****************************************************");
    println!();
}

fn prompt(line: &str) -> std::io::Result<String> {
    print!("server> {}", line);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn storage_dir() -> PathBuf {
    std::env::var_os("SKDP_KEY_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("skdp-keys"))
}

fn key_dialogue(cfg: ProtocolConfig) -> Result<skdp::ServerKey, SkdpError> {
    let dir = storage_dir();
    let skey_path = dir.join(keystore::SERVER_KEY_NAME);

    if skey_path.exists() {
        let skey = keystore::load_server_key(cfg, &skey_path)?;
        println!("server> The server-key has been loaded.");
        return Ok(skey);
    }

    println!("server> The server-key was not detected, generating new master/server keys.");
    println!("server> Enter a 16 character hexadecimal master/server key id, ex. 0102030405060708.");

    for _ in 0..3 {
        let line = prompt("").map_err(|_| SkdpError::InvalidInput)?;
        if let Ok(prefix) = keystore::parse_identity_prefix(&line) {
            let (triplet, dkey_path) = keystore::provision_to_dir(cfg, &prefix, &dir)?;
            println!(
                "server> The device-key has been saved to {}",
                dkey_path.display()
            );
            println!("server> Distribute the device-key to the intended client.");
            println!(
                "server> The server and master keys have been saved to {}",
                dir.display()
            );
            return Ok(triplet.server);
        }
        println!("server> Invalid identity, expecting 16 hexadecimal characters.");
    }

    Err(SkdpError::InvalidInput)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    print_banner();

    let skey = match key_dialogue(ProtocolConfig::default()) {
        Ok(skey) => skey,
        Err(error) => {
            println!("server> {}", error);
            println!("server> The server-key could not be created, the application will exit.");
            return;
        }
    };

    let addr: SocketAddr = ([0, 0, 0, 0], SERVER_PORT).into();
    let server = match SkdpServer::bind(addr, skey, false).await {
        Ok(server) => server,
        Err(error) => {
            println!("server> {}", error);
            return;
        }
    };

    println!("server> Waiting for a connection...");
    let mut connection = match server.accept().await {
        Ok(connection) => connection,
        Err(error) => {
            println!("server> {}", error);
            println!("server> The network key-exchange failed, the application will exit.");
            return;
        }
    };
    println!("server> Connected to remote host.");

    let sender = connection.sender();
    let keepalive = connection.spawn_keepalive();

    let receiver = tokio::spawn(async move {
        loop {
            match connection.receive().await {
                Ok(SessionEvent::Message(message)) => {
                    println!("{}", String::from_utf8_lossy(&message));
                    print!("server> ");
                    let _ = std::io::stdout().flush();
                }
                Ok(SessionEvent::KeepAlive) | Ok(SessionEvent::Ratcheted) => {}
                Ok(SessionEvent::Closed(reason)) => {
                    match reason {
                        Some(error) => println!("server> Remote closed: {}", error),
                        None => println!("server> The connection was terminated by the remote host."),
                    }
                    break;
                }
                Err(error) => {
                    println!("server> {}", error);
                    connection.abort(error).await;
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("server> ");
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
                    println!("server> {}", error);
                    break;
                }
            }
            _ => break,
        }
    }

    keepalive.abort();
    receiver.abort();
    let _ = sender.close(None).await;
    println!("server> The application has exited.");
}
