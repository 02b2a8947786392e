//! Line-mode chat client
//!
//! Registers a name (re-prompting while the server rejects it), then
//! relays stdin lines to the server and prints everything it broadcasts.

use std::io::Write as _;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use chat_relay::client::{validate_name, Input, RegistrationReply, CLEAR_SCREEN};
use chat_relay::config::{DEFAULT_MAX_NAME_LEN, DEFAULT_PORT};
use chat_relay::ClientMessage;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Chat relay client")]
struct Args {
    /// Server IP address
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    debug!("Connected to {}:{}", args.host, args.port);

    let (reader, mut writer) = stream.into_split();
    let mut server_lines = BufReader::new(reader).lines();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // Registration handshake
    let name = loop {
        let Some(name) = prompt_name(&mut stdin).await? else {
            return Ok(());
        };
        let register = ClientMessage::Register { name: name.clone() };
        writer.write_all(register.to_line().as_bytes()).await?;

        let Some(line) = server_lines.next_line().await? else {
            println!("Server disconnected.");
            return Ok(());
        };
        match RegistrationReply::from_line(&line) {
            RegistrationReply::Accepted => break name,
            RegistrationReply::Retry(code) => {
                println!("[Error{}] {}. Please try another.", code.as_u16(), code.description());
            }
            RegistrationReply::Other(line) => println!("{}", line),
        }
    };

    show_prompt(&name)?;
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Input::classify(&line) {
                    Input::Clear => print!("{}", CLEAR_SCREEN),
                    Input::Send(text) => {
                        let chat = ClientMessage::Chat { text };
                        writer.write_all(chat.to_line().as_bytes()).await?;
                    }
                    Input::Empty => {}
                }
                show_prompt(&name)?;
            }
            line = server_lines.next_line() => {
                let Some(line) = line? else {
                    println!("\nServer disconnected.");
                    break;
                };
                println!("\n{}", line);
                show_prompt(&name)?;
            }
        }
    }

    writer.shutdown().await?;
    Ok(())
}

/// Ask for a display name until a valid one is typed; `None` on stdin EOF
async fn prompt_name(stdin: &mut Lines<BufReader<Stdin>>) -> std::io::Result<Option<String>> {
    loop {
        print!("Enter username: ");
        std::io::stdout().flush()?;
        let Some(input) = stdin.next_line().await? else {
            return Ok(None);
        };
        match validate_name(&input, DEFAULT_MAX_NAME_LEN) {
            Ok(name) => return Ok(Some(name.to_string())),
            Err(_) => println!(
                "Username must be 1 to {} bytes long.",
                DEFAULT_MAX_NAME_LEN
            ),
        }
    }
}

fn show_prompt(name: &str) -> std::io::Result<()> {
    print!("{}> ", name);
    std::io::stdout().flush()
}
