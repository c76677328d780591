use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use futures_util::future::join_all;
use najah_bot::bot::conversation::{ConversationDeps, SearchConversation};
use najah_bot::bot::ingress;
use najah_bot::broadcast::BroadcastEngine;
use najah_bot::config::{Credential, Settings};
use najah_bot::directory::RestStudentDirectory;
use najah_bot::dispatch::manager::build_manager;
use najah_bot::dispatch::transport::TelegramTransport;
use najah_bot::dispatch::{OutboundTransport, ResponseDispatcher, RouterConfig, TokenRouter};
use najah_bot::lookup::NajahApiClient;
use najah_bot::ratelimit::{MokaCounterCache, RateLimiter};
use najah_bot::session::SessionStore;
use najah_bot::storage::R2SessionStore;
use regex::Regex;
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting bot tokens from log output.
///
/// This process holds the full token list, so any error that echoes a
/// request URL would otherwise leak credentials into the logs.
struct RedactionPatterns {
    url_token: Regex,
    bare_token: Regex,
    bot_prefix: Regex,
}

impl RedactionPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url_token: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/?)")?,
            bare_token: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            bot_prefix: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .url_token
            .replace_all(&output, "$1[BOT_TOKEN]$3")
            .to_string();
        output = self.bare_token.replace_all(&output, "[BOT_TOKEN]").to_string();
        output = self
            .bot_prefix
            .replace_all(&output, "$1[BOT_TOKEN]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the Write contract even
        // when redaction changed the byte count.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter {
    patterns: Arc<RedactionPatterns>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Najah results bot...");

    let settings = init_settings();
    let router = init_router(&settings);

    let factory = |credential: &Credential| {
        Arc::new(TelegramTransport::new(Bot::new(credential.expose())))
            as Arc<dyn OutboundTransport>
    };
    let manager = build_manager(router.clone(), &factory);
    let dispatcher = Arc::new(ResponseDispatcher::new(manager.clone()));

    let sessions = init_sessions(&settings).await;
    let directory = init_directory(&settings);
    let lookup = init_lookup(&settings);

    let limiter = RateLimiter::new(
        Arc::new(MokaCounterCache::default()),
        settings.max_requests_per_minute,
    );
    let broadcaster = Arc::new(BroadcastEngine::new(
        sessions.clone(),
        dispatcher.clone(),
        settings.broadcast_batch_size,
        Duration::from_millis(settings.broadcast_batch_delay_ms),
    ));

    let conversation = Arc::new(SearchConversation::new(ConversationDeps {
        sessions,
        directory,
        lookup,
        limiter,
        broadcaster,
        manager,
        admins: settings.admin_users(),
        required_channel: settings.required_channel.clone(),
        page_limit: settings.result_page_limit,
    }));

    run_ingress(&router, conversation, dispatcher).await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(RedactingMakeWriter { patterns }))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_router(settings: &Settings) -> TokenRouter {
    match RouterConfig::new(settings.active_tokens(), settings.bot_mode) {
        Ok(config) => {
            info!(
                "Router configured: {} credentials, mode {:?}",
                config.credentials.len(),
                config.mode
            );
            TokenRouter::new(config)
        }
        Err(e) => {
            error!("Invalid routing configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_sessions(settings: &Settings) -> Arc<dyn SessionStore> {
    match R2SessionStore::new(settings).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to initialize session store: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_directory(settings: &Settings) -> Arc<RestStudentDirectory> {
    let url = settings.directory_url.clone().unwrap_or_default();
    let key = settings.directory_api_key.clone().unwrap_or_default();
    match RestStudentDirectory::new(&url, &key) {
        Ok(directory) => Arc::new(directory),
        Err(e) => {
            error!("Failed to initialize student directory: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_lookup(settings: &Settings) -> Arc<NajahApiClient> {
    match NajahApiClient::new(settings) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to initialize result lookup client: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run one long-polling dispatcher per ingress credential.
///
/// Single-interface mode polls only the primary bot; multi-bot mode polls
/// every shard.
async fn run_ingress(
    router: &TokenRouter,
    conversation: Arc<SearchConversation>,
    dispatcher: Arc<ResponseDispatcher>,
) {
    let mut dispatchers: Vec<_> = router
        .ingress_credentials()
        .iter()
        .map(|credential| {
            info!("Starting ingress for {}", credential.preview());
            Dispatcher::builder(Bot::new(credential.expose()), ingress::schema())
                .dependencies(dptree::deps![conversation.clone(), dispatcher.clone()])
                .enable_ctrlc_handler()
                .build()
        })
        .collect();

    info!("Bot is running ({} ingress loops)...", dispatchers.len());
    join_all(dispatchers.iter_mut().map(|d| d.dispatch())).await;
}
