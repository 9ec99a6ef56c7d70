use std::path::PathBuf;

use clap::{Parser, Subcommand};

use briefcast::app::App;
use briefcast::config::Config;
use briefcast::jobs::{JobPayload, JobType};
use briefcast::models::Tier;
use briefcast::Result;

#[derive(Parser)]
#[command(name = "briefcast", version, about = "Personalized daily audio news briefings")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "BRIEFCAST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and job workers until Ctrl-C
    Run,
    /// Fetch feeds and store new articles
    Fetch {
        #[arg(long = "feed")]
        feeds: Vec<i64>,
    },
    /// Summarize stored articles that have no summary
    Summarize {
        #[arg(long = "article")]
        articles: Vec<i64>,
    },
    /// Embed summarized articles
    Embed {
        #[arg(long = "article")]
        articles: Vec<i64>,
    },
    /// Generate today's episodes
    Episodes {
        #[arg(long = "user")]
        users: Vec<i64>,
    },
    /// Run the fetch, filter and store pipeline for one user
    Process {
        #[arg(long)]
        user: i64,
    },
    /// Set a user's topics and keywords
    Interests {
        #[arg(long)]
        user: i64,
        #[arg(long = "topic")]
        topics: Vec<String>,
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        /// Relevance threshold percentage (0-100)
        #[arg(long)]
        threshold: Option<i64>,
    },
    AddUser {
        email: String,
        #[arg(long, default_value = "free")]
        tier: Tier,
    },
    AddFeed {
        #[arg(long)]
        user: i64,
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Semantic search over a user's articles
    Search {
        #[arg(long)]
        user: i64,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn ids(values: Vec<i64>) -> Option<Vec<i64>> {
    (!values.is_empty()).then_some(values)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("briefcast=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let app = App::new(config).await?;

    match cli.command {
        Command::Run => app.run_daemon().await?,
        Command::Fetch { feeds } => {
            let payload = JobPayload {
                feed_ids: ids(feeds),
                ..Default::default()
            };
            print_json(&app.run_job(JobType::FetchArticles, &payload).await?)?;
        }
        Command::Summarize { articles } => {
            let payload = JobPayload {
                article_ids: ids(articles),
                ..Default::default()
            };
            print_json(&app.run_job(JobType::SummarizeArticles, &payload).await?)?;
        }
        Command::Embed { articles } => {
            let payload = JobPayload {
                article_ids: ids(articles),
                ..Default::default()
            };
            print_json(&app.run_job(JobType::GenerateEmbeddings, &payload).await?)?;
        }
        Command::Episodes { users } => {
            let payload = JobPayload {
                user_ids: ids(users),
                ..Default::default()
            };
            print_json(&app.run_job(JobType::GenerateEpisodes, &payload).await?)?;
        }
        Command::Process { user } => print_json(&app.process_user(user).await?)?,
        Command::Interests {
            user,
            topics,
            keywords,
            threshold,
        } => print_json(&app.set_interests(user, &topics, &keywords, threshold).await?)?,
        Command::AddUser { email, tier } => println!("{}", app.add_user(&email, tier).await?),
        Command::AddFeed {
            user,
            url,
            title,
            category,
        } => println!("{}", app.add_feed(user, &url, title, category).await?),
        Command::Search { user, query, limit } => {
            for (article, score) in app.search(user, &query, limit).await? {
                println!("{:.3}  {}  {}", score, article.title, article.link);
            }
        }
    }

    Ok(())
}
