//! Subcommand handlers

use anyhow::{bail, Context};
use sqext_core::plugin::{Capability, PluginDescriptor, RegisterOutcome, RemovalOutcome};
use sqext_core::{ContractKind, InstallError, PluginInstaller};
use std::path::Path;

pub async fn install(installer: &PluginInstaller, archive: &Path) -> anyhow::Result<()> {
    let report = match installer.install(archive).await {
        Ok(report) => report,
        Err(e) => {
            for diagnostic in e.diagnostics() {
                eprintln!("  ✗ {}", diagnostic);
            }
            if let InstallError::DuplicateIdentity { files, .. } = &e {
                for file in files {
                    eprintln!("  ✗ {}", file.display());
                }
            }
            return Err(e.into());
        }
    };

    for (descriptor, (_, outcome)) in report.descriptors.iter().zip(&report.outcomes) {
        let mark = match outcome {
            RegisterOutcome::Registered => "✓ Installed",
            RegisterOutcome::Replaced => "✓ Updated",
            RegisterOutcome::PendingRestart => "… Staged",
        };
        println!("{} {} {} [{}]", mark, descriptor.name, descriptor.version, kinds(descriptor));
    }

    for diagnostic in &report.diagnostics {
        println!("  ! {}", diagnostic);
    }
    for skipped in &report.skipped_entries {
        println!("  ! skipped {}: {}", skipped.entry, skipped.reason);
    }
    if report.requires_restart() {
        println!("\nSome modules are in use. Restart to finish the update.");
    }

    Ok(())
}

pub async fn remove(installer: &PluginInstaller, name: &str) -> anyhow::Result<()> {
    let report = installer
        .remove(name)
        .await
        .with_context(|| format!("cannot remove '{}'", name))?;

    match report.outcome {
        RemovalOutcome::Removed => println!("✓ Removed {}", report.removed.join(", ")),
        RemovalOutcome::PendingRestart => println!(
            "… {} will be removed on next start (module in use)",
            report.removed.join(", ")
        ),
    }

    Ok(())
}

pub async fn list(installer: &PluginInstaller, json: bool) -> anyhow::Result<()> {
    let descriptors = installer.catalog().list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if descriptors.is_empty() {
        println!("No extensions installed.");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<18} {:<36} {}",
        "Name", "Version", "Status", "Contracts", "Extensions"
    );
    println!("{}", "-".repeat(100));

    for descriptor in descriptors {
        let extensions: Vec<&str> = descriptor
            .supported_extensions
            .iter()
            .map(String::as_str)
            .collect();
        println!(
            "{:<24} {:<10} {:<18} {:<36} {}",
            truncate(&descriptor.name, 24),
            truncate(&descriptor.version, 10),
            truncate(&descriptor.status, 18),
            kinds(&descriptor),
            extensions.join(",")
        );
    }

    Ok(())
}

pub async fn set_enabled(
    installer: &PluginInstaller,
    name: &str,
    enabled: bool,
) -> anyhow::Result<()> {
    let descriptor = installer.set_enabled(name, enabled).await?;
    println!("✓ {} is {}", descriptor.name, descriptor.status);
    Ok(())
}

pub async fn lookup(installer: &PluginInstaller, kind: &str) -> anyhow::Result<()> {
    let Some(kind) = ContractKind::parse(kind) else {
        bail!(
            "unknown contract '{}' (expected analysis, menu, tracker or scm)",
            kind
        );
    };

    let capabilities = installer.catalog().lookup(kind).await;
    if capabilities.is_empty() {
        println!("No active {} instances.", kind);
        return Ok(());
    }

    for capability in capabilities {
        let info = capability.info();
        match &capability {
            Capability::Analysis(provider) => println!(
                "{} {} (language: {})",
                info.name,
                info.version,
                provider.language_key()
            ),
            Capability::MenuCommand(menu) => {
                println!("{} {} (menu: {})", info.name, info.version, menu.header())
            }
            _ => println!("{} {}", info.name, info.version),
        }
    }

    Ok(())
}

fn kinds(descriptor: &PluginDescriptor) -> String {
    descriptor
        .kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
