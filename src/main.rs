mod api;
mod errors;
mod monitor;
mod notify;
mod probe;
mod registry;
mod types;

use crate::monitor::Monitor;
use crate::notify::SmsGateway;
use crate::probe::SiteProbe;
use env_logger::Env;
use log::info;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting fine-watch");

    let monitor = Monitor::new(
        Arc::new(SiteProbe::from_env()),
        Arc::new(SmsGateway::from_env()),
        monitor::plate_delay_from_env(),
    );
    api::run(monitor).await;
    info!("Exiting main");
}
