// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error};

use quota_tracing_instrumentation::init_tracing_and_logging;
use quota_types::config_loader::ConfigLoaderBuilder;

mod commands;
mod signal;

const EXIT_CODE_FAILURE: i32 = 1;

#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
struct QuotaArguments {
    /// Set a configuration file to use.
    #[arg(
        short,
        long = "config-file",
        env = "QUOTA_CONFIG",
        value_name = "FILE",
        global = true
    )]
    config_file: Option<PathBuf>,

    /// Directory which relative paths of the configuration are resolved against.
    #[arg(long, value_name = "DIR", global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

fn main() {
    let cli_args = QuotaArguments::parse();

    let config_loader = match ConfigLoaderBuilder::default()
        .load_env(true)
        .path(cli_args.config_file.clone())
        .build()
    {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };

    let mut config = match config_loader.load_once() {
        Ok(c) => c,
        Err(e) => {
            // We cannot use tracing here as it's not configured yet
            eprintln!("{e}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };
    if let Some(base_dir) = cli_args.base_dir {
        config.common.set_base_dir(base_dir);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("quotactl")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to build the tokio runtime: {e}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };

    let exit_code = runtime.block_on(async move {
        let tracing_guard = if cli_args.command.logs() {
            match init_tracing_and_logging(&config.common, "quotactl") {
                Ok(guard) => Some(guard),
                Err(e) => {
                    eprintln!("{e}");
                    return EXIT_CODE_FAILURE;
                }
            }
        } else {
            None
        };

        match &cli_args.config_file {
            Some(path) => debug!("Loaded configuration file from {}", path.display()),
            None => debug!("Loaded default built-in configuration"),
        }

        let context = commands::RunContext {
            config_loader: &config_loader,
            tracing_guard: tracing_guard.as_ref(),
        };
        match commands::run(cli_args.command, config, context).await {
            Ok(()) => 0,
            Err(err) => {
                error!("quotactl failed: {err:#}");
                eprintln!("error: {err:#}");
                EXIT_CODE_FAILURE
            }
        }
    });

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;
    use crate::commands::Command;

    #[test]
    fn verify_cli() {
        QuotaArguments::command().debug_assert();
    }

    #[test]
    fn watching_is_not_scoped_to_a_tenant() {
        assert!(QuotaArguments::try_parse_from([
            "quotactl", "purge", "--tenant", "acme", "--watch"
        ])
        .is_err());

        let args = QuotaArguments::try_parse_from(["quotactl", "purge", "--watch"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Purge {
                tenant: None,
                watch: true
            }
        ));
    }

    #[test]
    fn reservation_ids_are_parsed() {
        let args = QuotaArguments::try_parse_from([
            "quotactl",
            "cancel",
            "rsv_01HMZ8G8V6R8TQ2Q6JQ0M5Y3ZB",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Cancel { .. }));
        assert!(args.command.logs());

        assert!(QuotaArguments::try_parse_from(["quotactl", "commit", "not-an-id"]).is_err());
    }
}
