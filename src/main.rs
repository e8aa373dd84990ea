mod nvt_config;
mod nvt_controllers;
mod nvt_eta;
mod nvt_models;
mod nvt_polling;
mod nvt_positions;
mod nvt_reconciler;
mod nvt_session;
mod nvt_sources;
mod nvt_views;

use clap::Parser;
use nvt_config::NVTArgs;
use nvt_controllers::NVTControllers;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Set up panic hook for better error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n{}", "═".repeat(70));
        eprintln!("❌ APPLICATION PANIC");
        eprintln!("{}", "═".repeat(70));
        eprintln!("\n{}", panic_info);
        eprintln!("\n💡 Run with RUST_LOG=debug for more detail");
        eprintln!("{}", "═".repeat(70));
    }));

    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = NVTArgs::parse();
    NVTControllers::run(args).await
}
