// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

// Unix-specific signal handling
#[cfg(unix)]
mod platform {
    use std::io::Write;

    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{info, warn};

    use quota_tracing_instrumentation::TracingGuard;
    use quota_types::config::Configuration;
    use quota_types::config_loader::ConfigLoader;

    pub async fn shutdown() -> &'static str {
        let signal = tokio::select! {
            () = await_signal(SignalKind::interrupt()) => "SIGINT",
            () = await_signal(SignalKind::terminate()) => "SIGTERM"
        };

        info!(%signal, "Received signal, starting shutdown.");
        signal
    }

    /// Dump the configuration to stderr on SIGUSR1
    pub async fn sigusr1_dump_config(config: &Configuration) {
        let Ok(mut stream) = signal(SignalKind::user_defined1()) else {
            warn!("Failed to register handler for SIGUSR1");
            return std::future::pending().await;
        };

        loop {
            stream.recv().await;
            warn!("Received SIGUSR1, dumping configuration");
            match config.dump() {
                Err(e) => warn!("Failed to dump configuration: {}", e),
                Ok(config) => {
                    let mut stderr = std::io::stderr().lock();
                    let _ = writeln!(&mut stderr, "{config}");
                }
            }
        }
    }

    /// Reload the configuration and apply its log filter on SIGHUP
    pub async fn sighup_reload_log_filter(
        config_loader: &ConfigLoader,
        tracing_guard: Option<&TracingGuard>,
    ) {
        let Some(tracing_guard) = tracing_guard else {
            return std::future::pending().await;
        };
        let Ok(mut stream) = signal(SignalKind::hangup()) else {
            warn!("Failed to register handler for SIGHUP");
            return std::future::pending().await;
        };

        loop {
            stream.recv().await;
            warn!("Received SIGHUP, reloading the log filter");
            match config_loader.load_once() {
                Ok(config) => tracing_guard.reload_log_filter(&config.common),
                Err(e) => warn!("Failed to reload configuration: {}", e),
            }
        }
    }

    async fn await_signal(kind: SignalKind) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to register signal handler: {err}");
                std::future::pending().await
            }
        }
    }
}

// Windows-specific signal handling
#[cfg(windows)]
mod platform {
    use tracing::{info, warn};

    use quota_tracing_instrumentation::TracingGuard;
    use quota_types::config::Configuration;
    use quota_types::config_loader::ConfigLoader;

    pub async fn shutdown() -> &'static str {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
        info!("Received CTRL_C, starting shutdown.");
        "CTRL_C"
    }

    /// No-op on Windows - SIGUSR1 doesn't exist
    pub async fn sigusr1_dump_config(_config: &Configuration) {
        std::future::pending::<()>().await
    }

    /// No-op on Windows - SIGHUP doesn't exist
    pub async fn sighup_reload_log_filter(
        _config_loader: &ConfigLoader,
        _tracing_guard: Option<&TracingGuard>,
    ) {
        std::future::pending::<()>().await
    }
}

pub(super) use platform::*;
