//! Simulation harness for the PushKit service worker agent.
//!
//! Drives the agent through its lifecycle against a scriptable stub
//! network, without a browser host.
//!
//! ## Usage
//!
//! ```bash
//! # Install + activate, watch the cache lifecycle
//! sw-sim lifecycle
//!
//! # Install failure leaves the worker redundant
//! sw-sim lifecycle --fail-install
//!
//! # Dispatch a push and click the resulting notification
//! sw-sim push --payload '{"title":"T","body":"B","navigate":"/page"}' --click
//!
//! # Simulate an offline navigation
//! sw-sim navigate /page --fail --offline
//! ```

use clap::{Parser, Subcommand};
use pushkit_common::{init_logging, LogConfig, OptionExt, Result, ResultExt};
use pushkit_sw::{
    AgentConfig, AgentError, Connectivity, FetchEvent, FetchResponse, Network, PushEvent,
    ServiceWorkerAgent,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "sw-sim")]
#[command(about = "Simulation harness for the PushKit service worker agent")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run install then activate, printing the resulting phase
    Lifecycle {
        /// Script the fallback precache fetch to fail
        #[arg(long)]
        fail_install: bool,
    },

    /// Dispatch a push event, optionally clicking the notification
    Push {
        /// Raw payload JSON; omit to simulate an empty push
        #[arg(short, long)]
        payload: Option<String>,

        /// Click the shown notification afterwards
        #[arg(long)]
        click: bool,
    },

    /// Run the lifecycle, then issue a navigation fetch
    Navigate {
        /// Navigation target (path or absolute URL)
        url: String,

        /// Report the client as offline when the network fails
        #[arg(long)]
        offline: bool,

        /// Script the navigation fetch to fail
        #[arg(long)]
        fail: bool,
    },
}

/// Stub network with scriptable failure modes.
struct ScriptedNetwork {
    fail_all: bool,
    fail_navigations: bool,
}

impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchEvent) -> std::result::Result<FetchResponse, AgentError> {
        if self.fail_all || (self.fail_navigations && request.is_navigation) {
            return Err(AgentError::Network("connection reset".to_string()));
        }
        let body = if request.is_navigation {
            b"<html>live page</html>".to_vec()
        } else {
            b"<html>you are offline</html>".to_vec()
        };
        Ok(FetchResponse::ok(body))
    }
}

/// Fixed connectivity flag for the run.
struct ScriptedConnectivity {
    offline: bool,
}

impl Connectivity for ScriptedConnectivity {
    fn is_offline(&self) -> bool {
        self.offline
    }
}

fn build_agent(
    fail_all: bool,
    fail_navigations: bool,
    offline: bool,
) -> ServiceWorkerAgent<ScriptedNetwork, ScriptedConnectivity> {
    let (agent, _events) = ServiceWorkerAgent::new(
        AgentConfig::default(),
        ScriptedNetwork {
            fail_all,
            fail_navigations,
        },
        ScriptedConnectivity { offline },
    );
    agent
}

async fn run_lifecycle(fail_install: bool) -> Result<()> {
    let agent = build_agent(fail_install, false, false);

    match agent.start().await {
        Ok(()) => println!("worker phase: {:?}", agent.phase().await),
        Err(err) => {
            println!("install failed ({err}); worker phase: {:?}", agent.phase().await);
            return Err(err).context("lifecycle");
        }
    }

    let caches = agent.caches.read().await;
    for bucket in caches.keys() {
        println!("bucket: {bucket}");
    }
    Ok(())
}

async fn run_push(payload: Option<String>, click: bool) -> Result<()> {
    let agent = build_agent(false, false, false);
    agent.start().await.context("lifecycle")?;

    let event = match payload {
        Some(raw) => PushEvent::new(raw),
        None => PushEvent::empty(),
    };
    let shown = agent.handle_push(&event).await.context("push")?;

    match shown {
        Some(id) => {
            let notifications = agent.notifications.read().await;
            let record = notifications.get(id).ok_or_not_found("notification")?;
            println!("notification: {:?} \"{}\": {}", id, record.title, record.body);
        }
        None => println!("no notification shown"),
    }

    if click {
        let id = shown.ok_or_not_found("shown notification")?;
        let outcome = agent
            .handle_notification_click(id)
            .await
            .context("notification click")?;
        println!("click outcome: {outcome:?}");
    }
    Ok(())
}

async fn run_navigate(url: String, offline: bool, fail: bool) -> Result<()> {
    let agent = build_agent(false, fail, offline);
    agent.start().await.context("lifecycle")?;

    let target = agent.config.resolve(&url);
    info!(url = %target, offline, fail, "dispatching navigation");

    let response = agent
        .handle_fetch(&FetchEvent::navigation(&target))
        .await
        .context("navigation")?
        .ok_or_not_found("intercepted navigation response")?;

    println!(
        "response: {} {} ({}, {} bytes)",
        response.status,
        response.status_text,
        if response.from_cache {
            "cached fallback"
        } else {
            "network"
        },
        response.body.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config);

    match cli.command {
        Commands::Lifecycle { fail_install } => run_lifecycle(fail_install).await,
        Commands::Push { payload, click } => run_push(payload, click).await,
        Commands::Navigate { url, offline, fail } => run_navigate(url, offline, fail).await,
    }
}
