use anyhow::Result;
use clap::Args;

use crate::config::PipelineConfig;
use crate::inventory::{HostRecord, HostRegistry};
use crate::ui;

/// Print resolved host records.
#[derive(Args, Debug, Clone, Default)]
pub struct HostsCommand {
    /// Only this group (aliases such as `workers`/`nodes` are accepted).
    group: Option<String>,
}

fn print_host(host: &HostRecord) {
    ui::print_list_item(&host.name);
    ui::print_kv("    address", &format!("{} (from {})", host.address, host.address_source));
    ui::print_kv("    identity", &format!("{} (from {})", host.identity, host.identity_source));
    let extra: Vec<String> = host
        .attributes
        .iter()
        .filter(|(k, _)| k.as_str() != host.address_key())
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if !extra.is_empty() {
        ui::print_kv("    attributes", &extra.join(" "));
    }
}

impl HostsCommand {
    /// Print the hosts.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is missing or the group is empty.
    pub fn run(&self, config: &PipelineConfig) -> Result<i32> {
        let registry = HostRegistry::load(&config.inventory)?;

        let groups: Vec<String> = match self.group {
            Some(ref g) => vec![g.clone()],
            None => registry.groups().into_iter().map(str::to_string).collect(),
        };

        for group in &groups {
            ui::print_section(&format!("[{group}]"));
            for host in registry.resolve(group)? {
                print_host(&host);
            }
        }
        Ok(0)
    }
}
