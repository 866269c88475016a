pub mod auth;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod request_id;
pub mod server;
pub mod token;

use std::sync::Arc;

use pkg_controllers::Engine;

use crate::token::TokenIssuer;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    pub fn new(engine: Engine, tokens: TokenIssuer) -> Self {
        Self {
            engine,
            tokens: Arc::new(tokens),
        }
    }
}
