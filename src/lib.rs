pub mod cli;
pub mod logging;
pub mod proxy;
pub mod settings;
pub mod util;

use std::sync::Arc;

use anyhow::Result;

use crate::settings::Settings;

pub async fn run(settings: Settings) -> Result<()> {
    let app = proxy::AppContext::new(Arc::new(settings));
    proxy::run(app).await
}
