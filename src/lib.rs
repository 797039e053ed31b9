pub mod combat;
mod config;
pub mod entities;
pub mod net;
pub mod persistence;
pub mod telemetry;
pub mod world;

use std::sync::Arc;

pub use net::framing::{FrameBuffer, MessageStream, ReceiveOutcome};
pub use net::message::{Message, MessageKind, Refusal, Stage};
pub use net::server::{run_game_server, GameServerConfig, ServerControl};
pub use world::registry::World;

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root)?;

    let store = Arc::new(persistence::store::SaveStore::from_root(&config.root));
    let save_report = store.validate_saves();
    println!("ravenfell: boot");
    println!("- root: {}", config.root.display());
    if save_report.missing_dir {
        println!("- saves: no save directory yet");
    } else {
        println!(
            "- saves: files={}, parsed={}, errors={}",
            save_report.player_files,
            save_report.parsed,
            save_report.errors.len()
        );
    }
    for err in &save_report.errors {
        eprintln!("ravenfell: save validate {}", err);
    }

    let now = telemetry::logging::unix_timestamp().max(0) as u64;
    let world = Arc::new(World::bootstrap());
    world.populate_npcs(now);
    println!("- regions: {}", world.region_ids().len());
    println!("- mobiles: {}", world.mobile_count());
    telemetry::logging::log_game(&format!(
        "world bootstrapped: regions={}, mobiles={}, saves={}",
        world.region_ids().len(),
        world.mobile_count(),
        save_report.parsed
    ));

    let server_config = GameServerConfig {
        bind_addr: config.bind_addr.clone(),
        rate_limit_requests: config.rate_limit_requests,
        rate_limit_window: config.rate_limit_window,
        autosave_interval_seconds: config.autosave_interval_seconds,
        root: Some(config.root.clone()),
        ..GameServerConfig::default()
    };
    let control = Arc::new(ServerControl::new());
    run_game_server(server_config, world, store, control)
}
