use std::fmt::Write as _;

use anyhow::{Context, Result};

use crate::client::{Connector, DockerConnector};
use crate::config::{ConnectionConfig, ConnectionHints};
use crate::graph::{self, StatsReport};
use crate::probe::Resolver;
use crate::progress::{Notice, Spinner, StderrNotice};

pub async fn run(hints: ConnectionHints, json: Option<&str>) -> Result<()> {
    let notice = StderrNotice;
    let report = collect(hints, &DockerConnector, &notice).await?;

    if let Some(dest) = json {
        super::write_json(&report, dest)?;
    } else {
        print!("{}", render(&report));
    }

    Ok(())
}

/// Resolve the daemon, list every image including intermediate layers and
/// account for them.
pub async fn collect(
    hints: ConnectionHints,
    connector: &dyn Connector,
    notice: &dyn Notice,
) -> Result<StatsReport> {
    let config = Resolver::new(connector, notice).resolve(hints).await;
    list_and_account(&config, connector, notice).await
}

async fn list_and_account(
    config: &ConnectionConfig,
    connector: &dyn Connector,
    notice: &dyn Notice,
) -> Result<StatsReport> {
    let daemon = connector
        .connect(config)
        .with_context(|| format!("Failed to create Docker client for {config}"))?;

    let spinner = Spinner::new(format!("Listing images from {} ...", config.host));
    let images = match daemon.list_images(true).await {
        Ok(images) => images,
        Err(err) => {
            spinner.abandon();
            return Err(err).with_context(|| format!("Failed to list images from {config}"));
        }
    };
    spinner.finish(format!("Listed {} layers", images.len()));

    graph::build_stats(images, notice).context("Image store has a broken layer graph")
}

/// Plain-text report, one line per tag followed by the totals.
pub fn render(report: &StatsReport) -> String {
    let mut out = String::new();

    for tag in &report.tags {
        let _ = writeln!(
            out,
            "Tag {:<40}: {:>4} layers - {:>8} (virtual)",
            tag.tag,
            tag.layers,
            format_bytes(tag.virtual_size)
        );
    }

    let _ = writeln!(
        out,
        "Total    : {:>4} layers - {:>8} (actual)",
        report.total.layers,
        format_bytes(report.total.size)
    );
    let _ = writeln!(
        out,
        "Reachable: {:>4} layers - {:>8} (actual)",
        report.reachable.layers,
        format_bytes(report.reachable.size)
    );
    let _ = writeln!(
        out,
        "                         {:>8} (virtual)",
        format_bytes(report.reachable.virtual_size)
    );
    let _ = writeln!(
        out,
        "Shared   : {:>4} layers - {:>8} (actual)",
        report.shared.layers,
        format_bytes(report.shared.size)
    );
    let _ = writeln!(
        out,
        "Dangling : {:>4} layers - {:>8} (actual, {} heads)",
        report.dangling.layers,
        format_bytes(report.dangling.size),
        report.dangling.heads
    );

    out
}

/// Binary units, one decimal unless the value is close to whole.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let precision = if value.fract() < 0.05 { 0 } else { 1 };
    format!("{value:.precision$} {}", UNITS[unit])
}
