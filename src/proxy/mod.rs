pub mod connection;
pub mod error;
pub mod headers;
pub mod http;
pub mod listener;
pub mod tunnel;
pub mod upstream;

use anyhow::Result;
use std::sync::Arc;
use tracing::{Instrument, info_span};

use crate::settings::Settings;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

pub async fn run(app: AppContext) -> Result<()> {
    let listener = listener::ProxyListener::bind(&app.settings).await?;
    let address = listener.local_addr();
    listener
        .serve()
        .instrument(info_span!("listener", address = %address))
        .await
}
