use std::error::Error;

use rand::Rng;
use tokio::io::{self, AsyncBufReadExt};

use parlor::client::{Handlers, LobbySocket};
use parlor::protocol::{ChatPayload, Envelope, RoomId, Tag};
use parlor::registry::DEFAULT_PORT;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    // 1. Where to connect and who to chat as.
    let mut args = std::env::args().skip(1);
    let origin = args
        .next()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", DEFAULT_PORT));
    let name = args.next().unwrap_or_else(|| {
        let mut rng = rand::rng();
        format!("Guest {}", rng.random_range(0..10))
    });

    // 2. Join the lobby with a handler that prints inbound chat.
    let mut socket = LobbySocket::new(origin, RoomId::Lobby);

    let mut handlers = Handlers::new();
    handlers.insert(
        Tag::Chat,
        Box::new(|d| {
            if let Ok(chat) = serde_json::from_value::<ChatPayload>(d) {
                println!("\n> {}: {}", chat.name, chat.text);
            }
        }),
    );

    socket.connect(handlers).await?;

    println!("Joined the lobby as {}.", name);
    println!("Type a message and press Enter:");

    // 3. Read stdin and send each line as a chat envelope.
    let mut stdin = io::BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = stdin.next_line().await {
        if line.is_empty() {
            continue;
        }
        socket.send(&Envelope::chat(&ChatPayload {
            name: name.clone(),
            text: line,
        }));
    }

    Ok(())
}
