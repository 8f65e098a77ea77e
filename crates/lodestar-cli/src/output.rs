//! Output renderers and formatting helpers for CLI commands.

use anyhow::anyhow;
use lodestar_sync::entities::{PeerEntry, TorrentEntry, TrackerEntry};
use lodestar_sync::{Availability, Cursor, RegistryHealth};
use lodestar_telemetry::Metrics;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};
use crate::commands::{MainDataView, PeersView, TrackersView};

/// Serialisable projection of one view.
#[derive(Serialize)]
struct ViewDocument<'a, T: Serialize> {
    collection: &'static str,
    subject: Option<String>,
    cursor: Cursor,
    availability: &'a Availability,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct MainDataBody<'a> {
    torrents: Vec<(&'a str, &'a TorrentEntry)>,
    categories: Vec<&'a str>,
    tags: Vec<&'a str>,
    trackers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_status: Option<&'a str>,
}

#[derive(Serialize)]
struct PeersBody<'a> {
    peers: Vec<(&'a str, &'a PeerEntry)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    show_flags: Option<bool>,
}

#[derive(Serialize)]
struct TrackersBody<'a> {
    trackers: Vec<&'a TrackerEntry>,
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

fn header(collection: &str, subject: Option<String>, cursor: Cursor, availability: &Availability) {
    let subject = subject.unwrap_or_else(|| "-".to_string());
    println!(
        "== {collection} [{subject}] cursor {cursor} ({})",
        availability_label(availability)
    );
}

pub(crate) fn render_maindata(view: &MainDataView, format: OutputFormat) -> CliResult<()> {
    let snapshot = &view.snapshot;
    let mut torrents: Vec<(&str, &TorrentEntry)> = snapshot
        .torrents
        .iter()
        .map(|(hash, entry)| (hash.as_str(), entry))
        .collect();
    torrents.sort_unstable_by(|a, b| torrent_name(a.1).cmp(torrent_name(b.1)).then(a.0.cmp(b.0)));
    let connection_status = snapshot
        .server_state
        .as_ref()
        .and_then(|state| state.connection_status.as_deref());

    match format {
        OutputFormat::Json => {
            let mut categories: Vec<&str> =
                snapshot.categories.keys().map(String::as_str).collect();
            categories.sort_unstable();
            print_json(&ViewDocument {
                collection: "maindata",
                subject: view.subject.map(|subject| subject.to_string()),
                cursor: view.cursor,
                availability: &view.availability,
                body: MainDataBody {
                    torrents,
                    categories,
                    tags: snapshot.sorted_tags(),
                    trackers: snapshot.trackers.len(),
                    connection_status,
                },
            })
        }
        OutputFormat::Table => {
            header(
                "maindata",
                view.subject.map(|subject| subject.to_string()),
                view.cursor,
                &view.availability,
            );
            if let Some(state) = &snapshot.server_state {
                println!(
                    "connection: {}  down {}  up {}  dht nodes {}",
                    state.connection_status.as_deref().unwrap_or("unknown"),
                    format_rate(state.dl_info_speed.unwrap_or(0)),
                    format_rate(state.up_info_speed.unwrap_or(0)),
                    state.dht_nodes.unwrap_or(0)
                );
            }
            println!(
                "categories: {}  tags: {}  trackers: {}",
                snapshot.categories.len(),
                snapshot.tags.len(),
                snapshot.trackers.len()
            );
            println!(
                "{:<12} {:<14} {:>7} {:>12} {:>12} NAME",
                "HASH", "STATE", "PROG", "DOWN", "UP"
            );
            for (hash, entry) in torrents {
                println!(
                    "{:<12} {:<14} {:>7} {:>12} {:>12} {}",
                    short_hash(hash),
                    entry.state.as_deref().unwrap_or("-"),
                    format_progress(entry.progress),
                    format_rate(entry.dlspeed.unwrap_or(0)),
                    format_rate(entry.upspeed.unwrap_or(0)),
                    torrent_name(entry)
                );
            }
            Ok(())
        }
    }
}

pub(crate) fn render_peers(view: &PeersView, format: OutputFormat) -> CliResult<()> {
    let snapshot = &view.snapshot;
    let mut peers: Vec<(&str, &PeerEntry)> = snapshot
        .iter()
        .map(|(key, entry)| (key.as_str(), entry))
        .collect();
    peers.sort_unstable_by(|a, b| a.0.cmp(b.0));

    match format {
        OutputFormat::Json => print_json(&ViewDocument {
            collection: "peers",
            subject: view.subject.as_ref().map(ToString::to_string),
            cursor: view.cursor,
            availability: &view.availability,
            body: PeersBody {
                peers,
                show_flags: snapshot.auxiliary().show_flags,
            },
        }),
        OutputFormat::Table => {
            header(
                "peers",
                view.subject.as_ref().map(ToString::to_string),
                view.cursor,
                &view.availability,
            );
            let show_flags = snapshot.auxiliary().show_flags.unwrap_or(false);
            println!(
                "{:<24} {:<24} {:>7} {:>12} {:>12}{}",
                "PEER",
                "CLIENT",
                "PROG",
                "DOWN",
                "UP",
                if show_flags { " COUNTRY" } else { "" }
            );
            for (key, entry) in peers {
                let country = if show_flags {
                    format!(" {}", entry.country_code.as_deref().unwrap_or("--"))
                } else {
                    String::new()
                };
                println!(
                    "{:<24} {:<24} {:>7} {:>12} {:>12}{}",
                    key,
                    entry.client.as_deref().unwrap_or("-"),
                    format_progress(entry.progress),
                    format_rate(entry.dl_speed.unwrap_or(0)),
                    format_rate(entry.up_speed.unwrap_or(0)),
                    country
                );
            }
            Ok(())
        }
    }
}

pub(crate) fn render_trackers(view: &TrackersView, format: OutputFormat) -> CliResult<()> {
    let mut trackers: Vec<&TrackerEntry> = view.snapshot.entries().values().collect();
    trackers.sort_unstable_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.url.cmp(&b.url)));

    match format {
        OutputFormat::Json => print_json(&ViewDocument {
            collection: "trackers",
            subject: view.subject.as_ref().map(ToString::to_string),
            cursor: view.cursor,
            availability: &view.availability,
            body: TrackersBody { trackers },
        }),
        OutputFormat::Table => {
            header(
                "trackers",
                view.subject.as_ref().map(ToString::to_string),
                view.cursor,
                &view.availability,
            );
            println!(
                "{:>4} {:<14} {:>6} {:>6} {:>6} URL",
                "TIER", "STATUS", "PEERS", "SEEDS", "LEECH"
            );
            for tracker in trackers {
                println!(
                    "{:>4} {:<14} {:>6} {:>6} {:>6} {}",
                    tracker.tier,
                    tracker.status_label(),
                    tracker.num_peers,
                    tracker.num_seeds,
                    tracker.num_leeches,
                    tracker.url
                );
                if !tracker.msg.is_empty() {
                    println!("     {}", tracker.msg);
                }
            }
            Ok(())
        }
    }
}

pub(crate) fn render_health(health: &RegistryHealth, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(health),
        OutputFormat::Table => {
            println!(
                "tasks: {} total, {} running, {} paused, {} stopped, {} faulted",
                health.total,
                health.running,
                health.paused,
                health.stopped,
                health.faulted.len()
            );
            for status in &health.faulted {
                let cause = status
                    .last_fault
                    .as_ref()
                    .map_or("unknown cause", |fault| fault.message.as_str());
                println!("  faulted {} after {} ticks: {cause}", status.name, status.ticks);
            }
            Ok(())
        }
    }
}

pub(crate) fn render_metrics(metrics: &Metrics) -> CliResult<()> {
    let text = metrics.render().map_err(CliError::failure)?;
    print!("{text}");
    Ok(())
}

#[must_use]
pub(crate) const fn availability_label(availability: &Availability) -> &'static str {
    match availability {
        Availability::Pending => "pending",
        Availability::Live => "live",
        Availability::Unavailable { .. } => "unavailable",
    }
}

fn torrent_name(entry: &TorrentEntry) -> &str {
    entry.name.as_deref().unwrap_or("<unnamed>")
}

#[must_use]
pub(crate) fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[must_use]
pub(crate) fn format_progress(progress: Option<f64>) -> String {
    progress.map_or_else(|| "-".to_string(), |value| format!("{:.1}%", value * 100.0))
}

#[must_use]
pub(crate) fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

#[must_use]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_units_scale() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2_048), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(format_rate(5 * 1024 * 1024 * 1024), "5.00 GiB/s");
    }

    #[test]
    fn progress_is_a_percentage() {
        assert_eq!(format_progress(Some(0.25)), "25.0%");
        assert_eq!(format_progress(Some(1.0)), "100.0%");
        assert_eq!(format_progress(None), "-");
    }

    #[test]
    fn short_hash_handles_short_input() {
        assert_eq!(short_hash("8c4adbf9ebe66f1d804f"), "8c4adbf9ebe6");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn availability_labels() {
        assert_eq!(availability_label(&Availability::Live), "live");
        assert_eq!(
            availability_label(&Availability::Unavailable {
                reason: "gone".to_string()
            }),
            "unavailable"
        );
    }
}
