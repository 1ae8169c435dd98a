use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use log::{error, info};
use tokio::time;

use soundharvest::config::AppConfig;
use soundharvest::controller::SessionController;
use soundharvest::handlers;
use soundharvest::state::AppState;
use soundharvest::store::SessionStore;
use soundharvest::ytdlp::YtDlp;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cfg_path = std::env::args()
        .skip_while(|a| a != "--config")
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let cfg = match AppConfig::load(&cfg_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("[CONFIG] Failed to load {}: {:#}", cfg_path, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cfg.cache_dir) {
        eprintln!(
            "[CONFIG] Cache directory {} is not writable: {}",
            cfg.cache_dir.display(),
            e
        );
        std::process::exit(1);
    }

    println!("========================================");
    println!("  SoundHarvest");
    println!("  http://{}", cfg.listen_addr);
    println!("  cache: {}", cfg.cache_dir.display());
    println!("========================================");
    println!();

    let sessions = Arc::new(SessionStore::new(cfg.cache_dir.clone()));
    let controller = SessionController::new(
        Arc::new(YtDlp::new(cfg.clone())),
        cfg.max_concurrent_extractions,
    );
    let state = web::Data::new(AppState {
        sessions: sessions.clone(),
        controller,
    });

    // End sessions whose user has gone away, together with their cached files.
    {
        let sessions = sessions.clone();
        let ttl = cfg.session_ttl;
        let every = cfg.reap_interval;
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            loop {
                interval.tick().await;
                let reaped = sessions.reap_idle(ttl).await;
                if reaped > 0 {
                    info!("[REAPER] Ended {} idle session(s)", reaped);
                }
            }
        });
    }

    let bind_addr = cfg.listen_addr.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::routes)
    })
    .bind(bind_addr.as_str());

    match server {
        Ok(server) => server.run().await,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            Err(e)
        }
    }
}
