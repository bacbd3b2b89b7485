mod cli;
mod config;
mod render;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;

use kubepulse_events::{QueryError, RefreshScheduler, ResourceQueryEngine};
use kubepulse_k8s::{
    ClassifiedError, ClientTimeouts, ConnectivityMonitor, ContextRegistry, KubeconfigLoader,
};
use kubepulse_prefs::{FileStore, PreferencesStore};
use kubepulse_types::{EventFilterState, PanelPreferences};

use crate::cli::{Args, Command, FilterArgs, PrefsCommand};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Status { contexts } => status(&Host::connect(&config)?, contexts).await,
        Command::Namespaces { context } => namespaces(&Host::connect(&config)?, context).await,
        Command::Events { context, filter } => {
            events(&Host::connect(&config)?, &open_preferences()?, context, filter).await
        }
        Command::Watch {
            contexts,
            interval,
            filter,
        } => {
            let host = Host::connect(&config)?;
            watch(&host, &config, &open_preferences()?, contexts, interval, filter).await
        }
        Command::DeleteNamespace { name, context } => {
            delete_namespace(&Host::connect(&config)?, context, &name).await
        }
        Command::Prefs { action } => prefs(&open_preferences()?, action),
    }
}

/// Registry, monitor and engine built from kubeconfig and configuration
struct Host {
    loader: KubeconfigLoader,
    registry: Arc<ContextRegistry>,
    engine: Arc<ResourceQueryEngine>,
}

impl Host {
    fn connect(config: &Config) -> Result<Self> {
        let loader = KubeconfigLoader::new()?;
        let registry = Arc::new(loader.build_registry(
            ClientTimeouts::default(),
            &config.operated_contexts(),
            &config.operator_settings(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&registry),
            config.probe_timeout(),
        ));
        let engine = Arc::new(ResourceQueryEngine::new(
            Arc::clone(&registry),
            monitor,
            config.query_timeout(),
        ));

        Ok(Self {
            loader,
            registry,
            engine,
        })
    }

    /// Explicit context, or the kubeconfig's current one
    fn resolve(&self, context: Option<String>) -> Result<String> {
        let name = match context {
            Some(name) => name,
            None => self
                .loader
                .current_context()
                .map(str::to_string)
                .context("No context given and kubeconfig has no current context")?,
        };

        if !self.registry.contains(&name) {
            anyhow::bail!("Context '{}' not found in kubeconfig", name);
        }
        Ok(name)
    }
}

fn open_preferences() -> Result<PreferencesStore> {
    let store = FileStore::open_default().context("Failed to locate preferences file")?;
    Ok(PreferencesStore::new(Arc::new(store)))
}

fn classified(error: ClassifiedError) -> anyhow::Error {
    anyhow::anyhow!(render::error_line(&error))
}

async fn status(host: &Host, contexts: Vec<String>) -> Result<()> {
    let contexts = if contexts.is_empty() {
        host.registry.names()
    } else {
        contexts
    };

    let results = host.engine.monitor().check_all(&contexts).await;
    print!("{}", render::status_table(&results));

    for error in results.iter().filter_map(|r| r.error.as_ref()) {
        eprintln!("{}", render::error_line(error));
    }
    Ok(())
}

async fn namespaces(host: &Host, context: Option<String>) -> Result<()> {
    let context = host.resolve(context)?;
    let set = host
        .engine
        .fetch_namespaces(&context)
        .await
        .map_err(classified)?;

    for name in set.iter() {
        println!("{}", name);
    }
    Ok(())
}

async fn events(
    host: &Host,
    prefs: &PreferencesStore,
    context: Option<String>,
    filter: FilterArgs,
) -> Result<()> {
    let context = host.resolve(context)?;
    let filter = filter.to_filter();
    let panel = prefs.get(&context);

    host.engine.set_filter(&context, filter.clone());
    let snapshot = host
        .engine
        .fetch_events(&context, &filter)
        .await
        .map_err(unsupported_hint)?;

    for line in render::event_lines(&snapshot.records, &panel) {
        println!("{}", line);
    }
    if let Some(error) = snapshot.error {
        return Err(classified(error));
    }
    Ok(())
}

fn unsupported_hint(err: QueryError) -> anyhow::Error {
    match err {
        QueryError::Unsupported { .. } => anyhow::anyhow!(
            "{} (hint: list the context under [operator] contexts in the config)",
            err
        ),
        QueryError::Superseded { .. } => err.into(),
    }
}

async fn delete_namespace(host: &Host, context: Option<String>, name: &str) -> Result<()> {
    let context = host.resolve(context)?;
    host.engine
        .delete_namespace(&context, name)
        .await
        .map_err(classified)?;
    println!("namespace \"{}\" deleted", name);
    Ok(())
}

/// What has already been printed for one watched context
#[derive(Default)]
struct WatchCursor {
    fetched_at: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
    error: Option<ClassifiedError>,
}

async fn watch(
    host: &Host,
    config: &Config,
    prefs: &PreferencesStore,
    contexts: Vec<String>,
    interval: Option<u64>,
    filter: FilterArgs,
) -> Result<()> {
    let contexts: Vec<String> = if contexts.is_empty() {
        host.registry
            .names()
            .into_iter()
            .filter(|name| host.registry.is_operated(name))
            .collect()
    } else {
        contexts
            .into_iter()
            .map(|name| host.resolve(Some(name)))
            .collect::<Result<_>>()?
    };
    if contexts.is_empty() {
        anyhow::bail!("No operated contexts to watch; list them under [operator] contexts");
    }

    let filter = filter.to_filter();
    let scheduler = Arc::new(RefreshScheduler::new(Arc::clone(&host.engine)));
    let follower = scheduler.follow_registry(host.registry.subscribe());
    let mut panels: HashMap<String, PanelPreferences> = HashMap::new();
    let mut cursors: HashMap<String, WatchCursor> = HashMap::new();

    for context in &contexts {
        let panel = prefs.get(context);
        let every = match interval {
            Some(secs) => Duration::from_secs(secs.max(1)),
            None if panel.refresh_enabled => panel.refresh_interval(),
            None => config.refresh_interval(),
        };

        initial_fetch(host, context, &filter).await?;
        scheduler.start(context, every);
        panels.insert(context.clone(), panel);
    }

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {
                for context in &contexts {
                    let cursor = cursors.entry(context.clone()).or_default();
                    print_changes(host, context, &panels[context], cursor);
                }
            }
        }
    }

    for context in &contexts {
        scheduler.stop(context);
    }
    follower.abort();
    Ok(())
}

async fn initial_fetch(host: &Host, context: &str, filter: &EventFilterState) -> Result<()> {
    host.engine.set_filter(context, filter.clone());
    host.engine
        .fetch_events(context, filter)
        .await
        .map_err(unsupported_hint)?;
    Ok(())
}

fn print_changes(host: &Host, context: &str, panel: &PanelPreferences, cursor: &mut WatchCursor) {
    let error = host.engine.last_error(context);
    if error != cursor.error {
        if let Some(error) = &error {
            eprintln!("{}", render::error_line(error));
        }
        cursor.error = error;
    }

    let fetched_at = host.engine.fetched_at(context);
    if fetched_at == cursor.fetched_at {
        return;
    }
    cursor.fetched_at = fetched_at;

    let fresh: Vec<_> = host
        .engine
        .events(context)
        .into_iter()
        .filter(|e| cursor.newest.is_none_or(|newest| e.timestamp > newest))
        .collect();
    if let Some(last) = fresh.last() {
        cursor.newest = Some(last.timestamp);
    }

    for line in render::event_lines(&fresh, panel) {
        println!("[{}] {}", context, line);
    }
}

fn prefs(store: &PreferencesStore, action: PrefsCommand) -> Result<()> {
    match action {
        PrefsCommand::Show { context } => {
            println!("{}", render::preferences(&context, &store.get(&context)));
        }
        PrefsCommand::Set {
            context,
            follow,
            show_timestamps,
            line_limit,
            refresh_interval,
            refresh_enabled,
        } => {
            let mut panel = store.get(&context);
            if let Some(follow) = follow {
                panel.follow = follow;
            }
            if let Some(show_timestamps) = show_timestamps {
                panel.show_timestamps = show_timestamps;
            }
            if let Some(line_limit) = line_limit {
                panel.line_limit = line_limit;
            }
            if let Some(secs) = refresh_interval {
                panel.refresh_interval_secs = secs;
            }
            if let Some(enabled) = refresh_enabled {
                panel.refresh_enabled = enabled;
            }

            store
                .save(&context, &panel)
                .with_context(|| format!("Failed to save preferences for '{}'", context))?;
            println!("{}", render::preferences(&context, &panel));
        }
        PrefsCommand::Reset { context } => {
            store
                .reset(&context)
                .with_context(|| format!("Failed to reset preferences for '{}'", context))?;
            println!("Preferences for '{}' reset to defaults", context);
        }
    }
    Ok(())
}
