use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use procwatch::bus::{EventBus, ENTRY_COMMANDS};
use procwatch::config::{self, Config};
use procwatch::editor::{self, EntryCommands};
use procwatch::entry::EntryRemover;
use procwatch::entry_list::EntryList;
use procwatch::event::DaemonEvent;
use procwatch::mirror::{RunningStates, RunningStatesMirror};
use procwatch::mqtt::MqttBridge;
use procwatch::{logging, paths, process_monitor, startup, status};

#[tokio::main]
async fn main() -> Result<()> {
    // ── App data directory + configuration ────────────────────────────────────
    let app_dir = paths::app_data_dir()?;
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("Failed to create app data directory {}", app_dir.display()))?;

    let config_path = paths::config_file_path(&app_dir);
    let loaded = config::load_or_default(&config_path);
    let initial_config = loaded.as_ref().ok();

    // ── Logging ───────────────────────────────────────────────────────────────
    let default_filter = initial_config
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|| config::DEFAULT_LOG_FILTER.to_string());
    let _log_guard = logging::init(&app_dir, &default_filter)?;

    let initial_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!("Config error (using defaults): {e:#}");
            Config::default()
        }
    };

    // ── Startup registration flags ────────────────────────────────────────────
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--register-startup") {
        return startup::register_startup();
    }
    if args.iter().any(|a| a == "--unregister-startup") {
        return startup::unregister_startup();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        entries = initial_config.entries.len(),
        startup_registered = startup::is_startup_registered(),
        log_file = %paths::log_file_path(&app_dir).display(),
        "procwatch-daemon started"
    );

    let mut poll_interval = initial_config.monitor.poll_interval();
    let mut mqtt_config = initial_config.mqtt.clone();
    let entries = Arc::new(RwLock::new(EntryList::new(initial_config.entries)));

    // ── Bus + running-state mirror ────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let states = RunningStates::new();
    let mut mirror = RunningStatesMirror::new(Arc::clone(&bus), states.clone());
    mirror
        .start()
        .await
        .context("Failed to attach running_states mirror")?;

    let status_path = paths::status_file_path(&app_dir);
    status::write_status(&status_path, &status::DaemonStatus::new());
    let status_task = tokio::spawn(status::watch_states(
        status_path.clone(),
        states,
        Arc::clone(&entries),
    ));

    // ── Entry editing ─────────────────────────────────────────────────────────
    let (commands, mut command_rx) = EntryCommands::channel();
    let remover: Arc<dyn EntryRemover> = Arc::new(commands.clone());
    tokio::spawn(editor::forward_commands(
        bus.listen(ENTRY_COMMANDS)
            .context("Failed to listen for entry commands")?,
        commands,
    ));
    if let Err(e) = editor::publish_entries(&*entries.read().await, &bus, Arc::clone(&remover)) {
        debug!("Initial entry list not published: {e}");
    }

    // ── MQTT ──────────────────────────────────────────────────────────────────
    let mut mqtt = Some(
        MqttBridge::start(&mqtt_config, Arc::clone(&bus))
            .context("Failed to start MQTT bridge")?,
    );

    // ── Background tasks ──────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    let mut monitor = tokio::spawn(process_monitor::run(
        Arc::clone(&entries),
        Arc::clone(&bus),
        poll_interval,
    ));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                if let Err(e) =
                    editor::apply_command(&entries, &bus, Arc::clone(&remover), command).await
                {
                    warn!("Entry command rejected: {e}");
                }
            }

            evt = event_rx.recv() => match evt {
                Some(DaemonEvent::ConfigReloaded(new_config)) => {
                    info!(entries = new_config.entries.len(), "Config reloaded");
                    {
                        let mut list = entries.write().await;
                        if list.reload(new_config.entries) {
                            info!(entries = list.len(), "Entry list replaced from config file");
                            if let Err(e) =
                                editor::publish_entries(&list, &bus, Arc::clone(&remover))
                            {
                                debug!("Entry list not published: {e}");
                            }
                        } else {
                            debug!("Config entries unchanged; keeping edited entry list");
                        }
                    }

                    let new_interval = new_config.monitor.poll_interval();
                    if new_interval != poll_interval {
                        info!(?new_interval, "Restarting process monitor");
                        poll_interval = new_interval;
                        monitor.abort();
                        monitor = tokio::spawn(process_monitor::run(
                            Arc::clone(&entries),
                            Arc::clone(&bus),
                            new_interval,
                        ));
                    }

                    if new_config.mqtt != mqtt_config {
                        info!(host = %new_config.mqtt.host, port = new_config.mqtt.port, "Reconnecting MQTT");
                        if let Some(old) = mqtt.take() {
                            old.stop();
                        }
                        mqtt = MqttBridge::start(&new_config.mqtt, Arc::clone(&bus))
                            .map_err(|e| warn!("Failed to restart MQTT bridge: {e}"))
                            .ok();
                        mqtt_config = new_config.mqtt;
                    }
                }

                Some(DaemonEvent::Shutdown) | None => {
                    info!("Shutting down");
                    break;
                }
            },
        }
    }

    mirror.stop().await;
    drop(mqtt);
    bus.close();
    monitor.abort();
    status::finish(status_task, &status_path, mirror.states().get()).await;
    Ok(())
}
