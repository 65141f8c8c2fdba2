use std::{future::Future, sync::Arc, time::Duration};

use blaze_api::{ApiServer, ApiState};
use blaze_common::{Signal, internal, traits::relay::MessageRelay};
use blaze_delivery::{DnsLookup, DomainVerifier, HickoryLookup, Relay, SenderGate};
use blaze_smtp::Listener;
use futures_util::future::{join_all, select_all};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::config::Config;

/// How long servers get to finish after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

type Task = JoinHandle<(&'static str, anyhow::Result<()>)>;

/// Owns the configuration and runs the SMTP listener and the API server
/// side by side.
pub struct Gateway {
    config: Arc<Config>,
    dns: Option<Arc<dyn DnsLookup>>,
}

impl Gateway {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            dns: None,
        }
    }

    /// Use `dns` instead of the system resolver
    #[must_use]
    pub fn with_dns(mut self, dns: Arc<dyn DnsLookup>) -> Self {
        self.dns = Some(dns);
        self
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Fails if a server can't be started, or stops with an error.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run until `stop` completes or a server exits, then shut everything
    /// down.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn run_until(
        self,
        stop: impl Future<Output = anyhow::Result<()>> + Send + 'static,
    ) -> anyhow::Result<()> {
        let config = &self.config;
        let development_mode = config.development_mode;
        if development_mode {
            internal!(level = WARN, "Development mode: TLS is disabled");
        }

        let dns = match self.dns.clone() {
            Some(dns) => dns,
            None => Arc::new(HickoryLookup::new(config.verify.dns_timeout_secs)?),
        };
        let verifier = DomainVerifier::new(dns, config.verify.dkim_selector.as_str());
        let gate = SenderGate::new(verifier.clone(), config.verify.sender_policy.clone());
        let relay: Arc<dyn MessageRelay> =
            Arc::new(Relay::new(config.relay.clone(), development_mode));

        let listener = Listener::new(
            &config.smtp,
            config.relay.destination.as_str(),
            development_mode,
            Arc::new(gate.clone()),
            Arc::clone(&relay),
        )?;

        let state = ApiState::new(config.api.clone(), verifier, gate, relay)?
            .with_domain_policy(config.verify.domain_policy.clone())
            .with_destination(config.relay.destination.as_str());
        let api = ApiServer::new(state).await?;

        let (shutdown, _) = broadcast::channel(16);

        let smtp_signal = shutdown.subscribe();
        let api_signal = shutdown.subscribe();
        let stopper: Task = tokio::spawn(async move { ("signal handler", stop.await) });
        let stopper_handle = stopper.abort_handle();
        let tasks: Vec<Task> = vec![
            stopper,
            tokio::spawn(async move {
                let result = listener.serve(smtp_signal).await;
                ("SMTP listener", result.map_err(anyhow::Error::from))
            }),
            tokio::spawn(async move {
                let result = api.serve(api_signal).await;
                ("API server", result.map_err(anyhow::Error::from))
            }),
        ];

        internal!(level = INFO, "Gateway running");

        let (first, _, remaining) = select_all(tasks).await;
        let result = match first {
            Ok(("signal handler", Ok(()))) => {
                internal!(level = INFO, "Shutdown requested");
                Ok(())
            }
            Ok((name, Ok(()))) => {
                internal!(level = WARN, "{name} stopped unexpectedly");
                Err(anyhow::anyhow!("{name} stopped unexpectedly"))
            }
            Ok((name, Err(err))) => {
                internal!(level = ERROR, "{name} failed: {err}");
                Err(err.context(name))
            }
            Err(err) => Err(anyhow::anyhow!("gateway task panicked: {err}")),
        };

        internal!(level = INFO, "Shutting down...");
        stopper_handle.abort();
        if shutdown.send(Signal::Shutdown).is_err() {
            tracing::debug!("No server was listening for shutdown");
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, join_all(remaining)).await {
            Ok(results) => {
                for (name, result) in results.into_iter().flatten() {
                    if let Err(err) = result {
                        internal!(level = WARN, "{name} failed during shutdown: {err}");
                    }
                }
            }
            Err(_) => internal!(
                level = WARN,
                "Servers did not stop within {} seconds",
                SHUTDOWN_GRACE.as_secs()
            ),
        }

        internal!(level = INFO, "Gateway stopped");
        result
    }
}

/// Resolve on CTRL+C or SIGTERM.
async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!("CTRL+C entered");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    Ok(())
}
