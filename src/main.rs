use parlor::registry::{DEFAULT_PORT, LobbyServer};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let bind_addr = format!("0.0.0.0:{}", DEFAULT_PORT);

    println!("   Parlor Lobby Server");
    println!("   Binding to {}", bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = LobbyServer::bind(&bind_addr).await?;
    server.run().await
}
