use log::{error, info};
use socket_harbor::{Server, ServerConfig, DEFAULT_PORT};

// A plain echo server, mostly useful for poking at the crate with a browser
// or websocat.
#[tokio::main]
async fn main() {
    env_logger::init();

    let mut server = Server::new("127.0.0.1", DEFAULT_PORT);
    server.set_config(ServerConfig::default());

    server.on_text(|client, text| async move {
        match client.text(&text).await {
            Ok(true) => {}
            Ok(false) => info!("{} went away before the echo", client.address()),
            Err(error) => error!("echo to {} failed: {}", client.address(), error),
        }
    });

    server.on_binary(|client, data| async move {
        if client.binary(&data).await.is_err() {
            error!("echo to {} failed", client.address());
        }
    });

    server.on_disconnect(|client| async move {
        info!("{} disconnected", client.address());
    });

    server.on_error(|_, info| async move {
        error!("{}", info);
    });

    if let Err(error) = server.listen().await {
        error!("server exited: {}", error);
    }
}
