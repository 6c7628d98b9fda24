// feedsync demo binary.
// Walks the whole feed against the configured backend and reports profile setup status.

use std::process::ExitCode;
use std::rc::Rc;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use feedsync::{
    ClientConfig, FeedError, FeedSession, HttpBackend, InMemoryBackend, Result, SocialBackend,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(true))
        .try_init();
}

fn demo_backend() -> InMemoryBackend {
    let backend = InMemoryBackend::new("demo");
    backend.seed_posts(21);
    backend.seed_post("ann", "Ann", "First light over the harbour", 12);
    backend.seed_post("bob", "Bob", "Sourdough attempt number four", 3);
    backend
}

async fn run() -> Result<()> {
    let config = ClientConfig::from_env()?;
    let backend: Rc<dyn SocialBackend> = match HttpBackend::from_config(&config)? {
        Some(http) => {
            info!(url = config.api_url.as_deref().unwrap_or_default(), "using HTTP gateway");
            Rc::new(http)
        }
        None => {
            info!("no gateway configured, using in-memory demo data");
            Rc::new(demo_backend())
        }
    };
    let session = FeedSession::connected(&config, backend);

    let feed = session.feed();
    let mut page = Some(feed.load_first().await);
    while let Some(result) = page {
        if let Some(err) = result.error {
            return Err(FeedError::Other(err.message));
        }
        page = feed.load_more().await;
    }

    let posts = feed.items();
    info!(posts = posts.len(), pages = feed.loaded_pages(), "feed loaded");
    for (i, post) in posts.iter().enumerate() {
        println!(
            "{:>3}. {} ({} likes): {}",
            i + 1,
            post.author_display_name,
            post.likes,
            post.caption
        );
    }

    session.caller_user_profile().await;
    if session.needs_profile_setup() {
        println!("Profile setup required before posting.");
    } else {
        println!("Profile is set up.");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "feedsync failed");
            ExitCode::FAILURE
        }
    }
}
