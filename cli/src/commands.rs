// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quota_reservations::{ConfiguredLimits, ExpiryPurger, ReservationManager, ResourceCatalog};
use quota_storage_rocksdb::RocksDBStorage;
use quota_tracing_instrumentation::TracingGuard;
use quota_types::config::Configuration;
use quota_types::config_loader::ConfigLoader;
use quota_types::identifiers::{ReservationId, TenantId};
use quota_types::time::MillisSinceEpoch;

use crate::signal;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Delete expired reservations
    Purge {
        /// Only purge the reservations of this tenant
        #[arg(long)]
        tenant: Option<String>,

        /// Keep running and purge all tenants every `quota.expiry-purge-interval` until
        /// interrupted
        #[arg(long, conflicts_with = "tenant")]
        watch: bool,
    },
    /// List the stored reservations of a tenant, including expired ones
    List {
        #[arg(long)]
        tenant: String,

        /// Print one JSON object per reservation
        #[arg(long)]
        json: bool,
    },
    /// Delete a reservation without marking the tenant's usage dirty
    Cancel {
        /// Reservation id, e.g. `rsv_01J...`
        id: ReservationId,
    },
    /// Delete a reservation whose resources were created and mark their usage dirty
    Commit {
        /// Reservation id, e.g. `rsv_01J...`
        id: ReservationId,
    },
    /// Inspect the loaded configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, clap::Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML, including environment overrides
    Dump,
}

impl Command {
    /// Whether logging should be initialized. Commands printing machine readable output to
    /// stdout run without it.
    pub fn logs(&self) -> bool {
        !matches!(self, Command::Config(_) | Command::List { json: true, .. })
    }
}

/// Process level handles a command may use while it runs.
pub struct RunContext<'a> {
    pub config_loader: &'a ConfigLoader,
    pub tracing_guard: Option<&'a TracingGuard>,
}

pub async fn run(
    command: Command,
    config: Configuration,
    context: RunContext<'_>,
) -> anyhow::Result<()> {
    match command {
        Command::Config(ConfigCommand::Dump) => {
            println!("{}", config.dump().map_err(|err| anyhow::anyhow!(err))?);
            Ok(())
        }
        Command::Purge { tenant, watch } => {
            let manager = open_manager(&config).await?;
            if watch {
                watch_expired(manager, &config, context).await
            } else {
                let tenant = tenant.map(TenantId::from);
                let purged = manager.purge_expired(tenant.as_ref()).await?;
                println!("Purged {purged} expired reservations");
                Ok(())
            }
        }
        Command::List { tenant, json } => {
            let manager = open_manager(&config).await?;
            let reservations = manager.reservations(&TenantId::from(tenant)).await?;
            let now = MillisSinceEpoch::now();

            let mut stdout = std::io::stdout().lock();
            for reservation in reservations {
                if json {
                    serde_json::to_writer(&mut stdout, &reservation)?;
                    writeln!(stdout)?;
                } else {
                    let deltas = reservation
                        .deltas
                        .iter()
                        .map(|(resource, amount)| format!("{resource}={amount}"))
                        .collect::<Vec<_>>()
                        .join(",");
                    writeln!(
                        stdout,
                        "{}\t{}\texpires {}{}",
                        reservation.id,
                        deltas,
                        reservation.expiration,
                        if reservation.is_expired(now) {
                            " (expired)"
                        } else {
                            ""
                        }
                    )?;
                }
            }
            Ok(())
        }
        Command::Cancel { id } => {
            let manager = open_manager(&config).await?;
            if manager.cancel_reservation(id).await? {
                println!("Cancelled {id}");
            } else {
                println!("{id} does not exist");
            }
            Ok(())
        }
        Command::Commit { id } => {
            let manager = open_manager(&config).await?;
            if manager.commit_reservation(id).await? {
                println!("Committed {id}");
            } else {
                println!("{id} does not exist");
            }
            Ok(())
        }
    }
}

async fn open_manager(
    config: &Configuration,
) -> anyhow::Result<ReservationManager<RocksDBStorage>> {
    let storage_dir = config.storage_dir();
    let storage = RocksDBStorage::open(storage_dir.clone())
        .await
        .with_context(|| {
            format!(
                "cannot open the reservation store at {}",
                storage_dir.display()
            )
        })?;

    // usage sources live in the services owning the resources, nothing is counted here
    Ok(ReservationManager::new(
        storage,
        Arc::new(ResourceCatalog::new()),
        Arc::new(ConfiguredLimits::from_options(&config.quota)),
        &config.quota,
        config.storage.isolation,
    ))
}

async fn watch_expired(
    manager: ReservationManager<RocksDBStorage>,
    config: &Configuration,
    context: RunContext<'_>,
) -> anyhow::Result<()> {
    let cancellation = CancellationToken::new();
    let purger = tokio::spawn(
        ExpiryPurger::new(
            Arc::new(manager),
            config.quota.expiry_purge_interval(),
            cancellation.clone(),
        )
        .run(),
    );
    info!(
        "Purging expired reservations every {:?}",
        config.quota.expiry_purge_interval()
    );

    tokio::select! {
        signal_name = signal::shutdown() => {
            info!("Stopping after {signal_name}");
        },
        _ = signal::sigusr1_dump_config(config) => {},
        _ = signal::sighup_reload_log_filter(context.config_loader, context.tracing_guard) => {},
    }

    cancellation.cancel();
    match tokio::time::timeout(config.common.shutdown_grace_period(), purger).await {
        Ok(result) => result.context("expiry purger panicked")?,
        Err(_) => warn!("Could not gracefully stop the expiry purger, terminating now."),
    }

    Ok(())
}
