use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod config;
mod search;
#[cfg(test)]
mod tests;
mod web;

use config::{Config, DataSourceConfig, EmbeddingConfig};
use search::{
    CancelSignal, EmbeddingProvider, FeatureSource, FeatureStoreCache, HttpEmbeddingProvider,
    HttpSource, LocalSource, SearchOptions, SearchService,
};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_source(config: &Config) -> anyhow::Result<Arc<dyn FeatureSource>> {
    match &config.data.source {
        DataSourceConfig::Local { .. } => {
            let dir = config
                .data_dir()
                .context("local data source has no directory")?;
            Ok(Arc::new(LocalSource::new(dir)))
        }
        DataSourceConfig::Http {
            base_url,
            timeout_secs,
        } => Ok(Arc::new(HttpSource::new(
            base_url,
            Duration::from_secs(*timeout_secs),
        )?)),
    }
}

async fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match &config.embedding {
        #[cfg(feature = "fastembed")]
        EmbeddingConfig::Fastembed { model } => {
            let model = model.clone();
            let cache_dir = config.cache_dir();
            // model download and ONNX session setup block
            let provider = tokio::task::spawn_blocking(move || {
                search::FastEmbedProvider::new(&model, cache_dir)
            })
            .await??;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "fastembed"))]
        EmbeddingConfig::Fastembed { .. } => anyhow::bail!(
            "built without the fastembed feature; configure `embedding.provider: http` instead"
        ),
        EmbeddingConfig::Http {
            base_url,
            model,
            api_key_env,
            timeout_secs,
        } => {
            let api_key = std::env::var(api_key_env).ok();
            if api_key.is_none() {
                log::warn!("{api_key_env} is not set, sending embedding requests without a key");
            }
            Ok(Arc::new(HttpEmbeddingProvider::new(
                base_url,
                model,
                api_key,
                Duration::from_secs(*timeout_secs),
            )?))
        }
    }
}

async fn build_service(config: &Config) -> anyhow::Result<Arc<SearchService>> {
    let source = build_source(config)?;
    let layout = config.data.layout();
    let provider = build_provider(config).await?;
    log::info!(
        "using {} with location data from {}",
        provider.name(),
        source.describe()
    );

    let cache = FeatureStoreCache::new(source, layout.clone());
    let service = SearchService::new(cache, layout, provider).with_defaults(SearchOptions {
        top_k: config.search.top_k,
        min_score: config.search.min_score,
        cancel: None,
    });
    Ok(Arc::new(service))
}

/// Cancel `signal` on Ctrl+C.
fn cancel_on_ctrl_c(signal: CancelSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling search");
            signal.cancel();
        }
    });
}

async fn run(args: cli::Args) -> anyhow::Result<()> {
    let config = Config::load()?;

    match args.command {
        cli::Command::InitConfig {} => {
            println!("{}", config.path().display());
            Ok(())
        }

        cli::Command::Search {
            query,
            top_k,
            min_score,
        } => {
            let service = build_service(&config).await?;

            let signal = CancelSignal::new();
            cancel_on_ctrl_c(signal.clone());

            let mut options = service.default_options();
            if let Some(top_k) = top_k {
                options.top_k = top_k;
            }
            if min_score.is_some() {
                options.min_score = min_score;
            }
            options.cancel = Some(signal);

            let results = service.search(&query, options).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Serve { listen, eager } => {
            let service = build_service(&config).await?;
            if eager {
                service.warm_up().await?;
            }
            let listen = listen.unwrap_or_else(|| config.server.listen.clone());
            web::serve(service, &listen).await
        }

        cli::Command::Inspect {} => {
            let source = build_source(&config)?;
            let layout = config.data.layout();
            let cache = FeatureStoreCache::new(source.clone(), layout.clone());
            let store = cache.get_or_load().await?;

            let files: Vec<serde_json::Value> = search::Axis::ALL
                .iter()
                .map(|axis| {
                    serde_json::json!({
                        "axis": axis,
                        "weight": axis.weight(),
                        "file": layout.file_for(*axis),
                        "rows": store.table(*axis).rows(),
                    })
                })
                .collect();

            let report = serde_json::json!({
                "source": source.describe(),
                "locations": store.len(),
                "dimension": store.dimension(),
                "mappable": store.mappable_count(),
                "malformed_rows": store.malformed_rows(),
                "axes": files,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}
