use crate::api::{now_unix_ms, GameClient};
use crate::cache::SnapshotStore;
use crate::config::Config;
use crate::model::Snapshot;
use crate::session::{Notice, Session, SessionChannels};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        if command == "dashboard" {
            return handle_dashboard(&config).await;
        }
        if command == "login" {
            return handle_login(&config).await;
        }
        if command == "logout" {
            return handle_logout(&config);
        }
        if command == "buy" {
            return handle_buy(&config).await;
        }
        if command == "use-shield" {
            return handle_use_shield(&config).await;
        }
        if command == "start-attack" {
            return handle_start_attack(&config).await;
        }
        return Err(format!("unknown command: {command}").into());
    }

    run_daemon(config).await
}

/// Default mode: keep the local view of the game in sync until ctrl-c.
/// The four loops mirror the cadences in `[sync]`; each one is a thin timer
/// around a session entry point so all real decisions live in the engine.
async fn run_daemon(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = SnapshotStore::open(config.cache.path.as_deref())?;
    let (player_id, credential) = resolve_identity(&store)?;
    let client = build_client(&config)?;

    let (session, channels) = Session::new(client, config.sync.clone(), store, player_id, credential);
    let session = Arc::new(session);
    session.bootstrap().await?;
    tracing::info!("session bootstrapped, entering sync loops");

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    {
        let s = session.clone();
        let ms = config.sync.dashboard_refresh_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(ms));
            loop {
                ticker.tick().await;
                s.refresh_dashboard_once(false).await;
            }
        }));
    }
    {
        let s = session.clone();
        let ms = config.sync.status_poll_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(ms));
            loop {
                ticker.tick().await;
                s.poll_status_once().await;
            }
        }));
    }
    {
        let s = session.clone();
        let ms = config.sync.click_flush_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(ms));
            loop {
                ticker.tick().await;
                s.flush_clicks_once().await;
            }
        }));
    }
    {
        let s = session.clone();
        let ms = config.sync.countdown_tick_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(ms));
            loop {
                ticker.tick().await;
                s.tick_countdown().await;
            }
        }));
    }
    tasks.push(tokio::spawn(log_session_events(channels)));

    tokio::signal::ctrl_c().await?;
    eprintln!("shutdown: ctrl-c");
    session.logout();
    for task in tasks {
        task.abort();
    }
    Ok(())
}

async fn log_session_events(mut channels: SessionChannels) {
    loop {
        tokio::select! {
            notice = channels.notices.recv() => match notice {
                Some(Notice::Processing { action }) => {
                    tracing::info!(action, "action sent");
                }
                Some(Notice::ActionOutcome { ok, message }) => {
                    if ok {
                        tracing::info!(%message, "action ok");
                    } else {
                        tracing::warn!(%message, "action failed");
                    }
                }
                Some(Notice::AttackResult { stolen, message }) => {
                    tracing::info!(stolen, %message, "attack resolved");
                }
                None => break,
            },
            changed = channels.snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let money = channels.snapshots.borrow().as_ref().map(|s| s.my_team.money);
                tracing::debug!(?money, "snapshot updated");
            }
        }
    }
}

fn build_client(config: &Config) -> Result<GameClient, Box<dyn std::error::Error>> {
    let base_url = config.require_base_url()?;
    let client = GameClient::builder(base_url)
        .timeout(Duration::from_millis(config.api.timeout_ms))
        .build()?;
    Ok(client)
}

/// The player id comes from `CAMPSYNC_ID` or the id saved by `login`; the
/// credential only ever comes from `CAMPSYNC_PW`, it is not cached anywhere.
fn resolve_identity(store: &SnapshotStore) -> Result<(String, String), Box<dyn std::error::Error>> {
    let player_id = match std::env::var("CAMPSYNC_ID") {
        Ok(id) => id,
        Err(_) => store
            .saved_player_id()
            .map(str::to_string)
            .ok_or("no player id: set CAMPSYNC_ID or run `camp-sync login <id> <pw>`")?,
    };
    let credential =
        std::env::var("CAMPSYNC_PW").map_err(|_| "no credential: set CAMPSYNC_PW")?;
    Ok((player_id, credential))
}

/// One-shot session for CLI commands that need a live login.
async fn open_session(
    config: &Config,
) -> Result<(Session<GameClient>, SessionChannels), Box<dyn std::error::Error>> {
    let store = SnapshotStore::open(config.cache.path.as_deref())?;
    let (player_id, credential) = resolve_identity(&store)?;
    let client = build_client(config)?;
    let (session, channels) = Session::new(client, config.sync.clone(), store, player_id, credential);
    session.bootstrap().await?;
    Ok((session, channels))
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn handle_dashboard(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let id = args.next().ok_or("missing player id")?;
    let credential = args.next().ok_or("missing credential")?;

    let client = build_client(config)?;
    let env = client.fetch_dashboard(&id, &credential).await?;
    if !env.success {
        return Err(env
            .message
            .unwrap_or_else(|| "request rejected".to_string())
            .into());
    }
    println!("{}", serde_json::to_string_pretty(&env)?);
    Ok(())
}

async fn handle_login(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let id = args.next().ok_or("missing player id")?;
    let credential = args.next().ok_or("missing credential")?;

    let client = build_client(config)?;
    let env = client.fetch_dashboard(&id, &credential).await?;
    if !env.success {
        return Err(env
            .message
            .unwrap_or_else(|| "login rejected".to_string())
            .into());
    }
    let snapshot = Snapshot::from_envelope(&env).ok_or("login response carried no snapshot")?;

    let mut store = SnapshotStore::open(config.cache.path.as_deref())?;
    store.store_snapshot(&id, snapshot.clone(), now_unix_ms())?;
    store.set_saved_player_id(&id)?;
    println!(
        "logged in as {} ({}, {})",
        id, snapshot.player.name, snapshot.player.role
    );
    Ok(())
}

fn handle_logout(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = SnapshotStore::open(config.cache.path.as_deref())?;
    store.clear_saved_player_id()?;
    println!("saved player id cleared");
    Ok(())
}

async fn handle_buy(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let item_id = args.next().ok_or("missing item id")?;
    let qty: u32 = args.next().ok_or("missing quantity")?.parse()?;

    let (session, _channels) = open_session(config).await?;
    session.buy(&item_id, qty).await?;
    println!("bought {qty} x {item_id}");
    Ok(())
}

async fn handle_use_shield(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (session, _channels) = open_session(config).await?;
    session.use_shield().await?;
    println!("shield activated");
    Ok(())
}

/// Opens the window and returns. The running daemon (or any other leader
/// device) picks the window up through its status poll and drives the
/// countdown to the finalize.
async fn handle_start_attack(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let target_team_id = args.next().ok_or("missing target team id")?;

    let (session, _channels) = open_session(config).await?;
    session.start_attack(&target_team_id).await?;
    println!("attack window opened against {target_team_id}");
    Ok(())
}
