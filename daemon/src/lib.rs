//! Process watcher that mirrors per-entry running flags for a presentation layer.
//!
//! The daemon polls the OS process list ([`process_monitor`]), publishes a
//! `running_states` snapshot on the [`bus::EventBus`], and keeps a local
//! observable copy of it through [`mirror::RunningStatesMirror`].  Entry
//! toggles go out to an MQTT broker through [`mqtt::MqttBridge`], and the
//! entry list is edited through [`editor`].

pub mod bus;
pub mod config;
pub mod editor;
pub mod entry;
pub mod entry_list;
pub mod event;
pub mod logging;
pub mod mirror;
pub mod mqtt;
pub mod paths;
pub mod process_monitor;
pub mod startup;
pub mod status;
