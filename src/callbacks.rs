use crate::client::Client;
use crate::error::ErrorInfo;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type HandshakeHandler = Arc<dyn Fn(&HashMap<String, String>) -> bool + Send + Sync>;
pub(crate) type ClientHandler = Arc<dyn Fn(Arc<Client>) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type TextHandler = Arc<dyn Fn(Arc<Client>, String) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type BinaryHandler =
    Arc<dyn Fn(Arc<Client>, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type ErrorHandler =
    Arc<dyn Fn(Option<Arc<Client>>, ErrorInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// The application handler table. Every entry is optional; unset events are
/// simply not delivered. Filled in through the `Server::on_*` registrars
/// before `listen` and read-only afterwards.
#[derive(Default, Clone)]
pub(crate) struct Callbacks {
    pub handshake: Option<HandshakeHandler>,
    pub disconnect: Option<ClientHandler>,
    pub error: Option<ErrorHandler>,
    pub text: Option<TextHandler>,
    pub binary: Option<BinaryHandler>,
    pub close: Option<ClientHandler>,
    pub ping: Option<ClientHandler>,
    pub pong: Option<ClientHandler>,
}
