//! Startup router registration.

use crate::bus::{BusClient, Message};
use crate::config::RouterEntry;
use crate::errors::Result;

/// Register with every configured router entry that applies to `app_name`.
///
/// A plain-string entry is a bare domain, combined with `router_name`. A
/// structured entry is registered unconditionally unless it names a
/// `services` allowlist that excludes `app_name`.
pub fn register_all(
    bus: &mut dyn BusClient,
    entries: &[RouterEntry],
    router_name: &str,
    app_name: &str,
) -> Result<()> {
    for entry in entries {
        if let Some((name, domain)) = resolve(entry, router_name, app_name) {
            register_one(bus, &name, &domain, app_name)?;
        }
    }
    Ok(())
}

/// Decide whether `entry` applies to `app_name`, returning the
/// `(router_name, domain)` pair to register against if so.
fn resolve(entry: &RouterEntry, router_name: &str, app_name: &str) -> Option<(String, String)> {
    match entry {
        RouterEntry::Domain(domain) => Some((router_name.to_string(), domain.clone())),
        RouterEntry::Full { name, domain, services } => match services {
            Some(allowlist) if !allowlist.iter().any(|s| s == app_name) => None,
            _ => Some((name.clone(), domain.clone())),
        },
    }
}

fn register_one(bus: &mut dyn BusClient, name: &str, domain: &str, app_name: &str) -> Result<()> {
    let to = format!("{name}@{domain}/router");
    let message = Message::control(to, "register", app_name);
    bus.send(&message)
}
