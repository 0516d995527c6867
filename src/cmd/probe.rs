use anyhow::Result;
use crossterm::style::{self, Stylize};

use crate::client::DockerConnector;
use crate::config::{ConnectionConfig, ConnectionHints};
use crate::probe::Resolver;
use crate::progress::StderrNotice;

/// Resolve the Docker endpoint the same way `sizes` would and print it.
pub async fn run(hints: ConnectionHints, json: Option<&str>) -> Result<()> {
    let notice = StderrNotice;
    let config = Resolver::new(&DockerConnector, &notice).resolve(hints).await;

    if let Some(dest) = json {
        super::write_json(&config, dest)?;
    } else {
        print!("{}", describe(&config));
    }

    Ok(())
}

fn describe(config: &ConnectionConfig) -> String {
    let mut out = format!("{} {}\n", "Host".dim(), style::style(&config.host).green().bold());
    out.push_str(&format!("{} {}\n", "TLS ".dim(), if config.tls { "yes" } else { "no" }));
    if config.tls {
        out.push_str(&format!(
            "{} {}\n",
            "Certs".dim(),
            style::style(config.cert_dir().display()).dim()
        ));
    }
    out
}
