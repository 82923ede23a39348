use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use futures::StreamExt;

mod ai;
mod error;
mod leaderboard;
mod listing;
mod markdown;
mod models;
mod registration;
mod store;

use ai::{ChatSession, GeminiClient, GeminiConfig, TextModel};
use listing::Filters;
use models::{Category, SortOption, WorkStyle};
use registration::Transition;
use store::EntityStore;

#[derive(Parser)]
#[command(name = "volunteer-hub")]
#[command(about = "Volunteer matching hub for the Taww association", long_about = None)]
struct Cli {
    /// Path to the JSON data snapshot
    #[arg(long, default_value = "taww-data.json")]
    data: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the mock seed dataset to the data file
    Seed {
        #[arg(long)]
        force: bool,
    },
    /// Import volunteers from a CSV file (upsert by email)
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List opportunities with filters, sorting, and pagination
    List {
        #[arg(long, value_enum)]
        category: Option<Category>,
        #[arg(long, value_enum)]
        work_style: Option<WorkStyle>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value = "default")]
        sort: SortOption,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Show the volunteer or university leaderboard
    Leaderboard {
        #[arg(long)]
        universities: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Look up the rank of one volunteer or university
    #[command(group(
        ArgGroup::new("scope")
            .args(["volunteer", "university"])
            .required(true)
            .multiple(false)
    ))]
    Rank {
        #[arg(long)]
        volunteer: Option<u64>,
        #[arg(long)]
        university: Option<String>,
    },
    /// Register a volunteer for an opportunity
    Register {
        #[arg(long)]
        volunteer: u64,
        #[arg(long)]
        opportunity: u64,
        #[arg(long, default_value = "")]
        text: String,
    },
    /// Cancel a registration
    Cancel {
        #[arg(long)]
        volunteer: u64,
        #[arg(long)]
        opportunity: u64,
    },
    /// Submit a review for a completed opportunity
    Review {
        #[arg(long)]
        volunteer: u64,
        #[arg(long)]
        opportunity: u64,
        #[arg(long)]
        rating: u8,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Ask the assistant for matching opportunities
    Recommend {
        #[arg(long)]
        interests: String,
    },
    /// Extract profile fields from a CV text file
    Extract {
        #[arg(long)]
        cv: PathBuf,
        /// Merge the extracted fields into this volunteer's profile
        #[arg(long)]
        volunteer: Option<u64>,
    },
    /// Chat with the assistant (one-shot message or interactive)
    Chat { message: Option<String> },
}

fn load_store(path: &Path) -> anyhow::Result<EntityStore> {
    EntityStore::load(path).with_context(|| {
        format!(
            "failed to load {} (run `volunteer-hub seed` first?)",
            path.display()
        )
    })
}

fn ai_client() -> anyhow::Result<GeminiClient> {
    let config = GeminiConfig::from_env().context("the assistant needs GEMINI_API_KEY")?;
    Ok(GeminiClient::new(config)?)
}

fn describe(transition: Transition, applied: &str, noop: &str) {
    match transition {
        Transition::Applied => println!("{applied}"),
        Transition::Noop => println!("{noop}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Seed { force } => {
            if cli.data.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite it",
                    cli.data.display()
                );
            }
            let store = EntityStore::seed()?;
            store.save(&cli.data)?;
            println!(
                "Seeded {} volunteers and {} opportunities into {}.",
                store.volunteers.len(),
                store.opportunities.len(),
                cli.data.display()
            );
        }
        Commands::Import { csv } => {
            let mut store = load_store(&cli.data)?;
            let inserted = store.import_volunteers_csv(&csv)?;
            store.save(&cli.data)?;
            println!("Inserted {inserted} new volunteers from {}.", csv.display());
        }
        Commands::List {
            category,
            work_style,
            search,
            sort,
            page,
        } => {
            let store = load_store(&cli.data)?;
            let filters = Filters {
                category,
                work_style,
                search_term: search,
            };
            let listed = listing::list_opportunities(&store.opportunities, &filters, sort);
            let pages = listing::total_pages(listed.len());

            if listed.is_empty() {
                println!("No opportunities match these filters.");
                return Ok(());
            }

            let page = page.max(1);
            if page > pages {
                println!(
                    "Page {page} is past the end ({pages} pages, {} matches).",
                    listed.len()
                );
                return Ok(());
            }

            for opportunity in listing::paginate(&listed, page) {
                println!(
                    "- [{}] {} — {} ({}، {}) | {} نقطة، {} ساعة | تقييم {:.1} ({})",
                    opportunity.id,
                    opportunity.title,
                    opportunity.organization,
                    opportunity.category,
                    opportunity.work_style,
                    opportunity.points,
                    opportunity.hours,
                    opportunity.rating,
                    opportunity.reviews_count
                );
            }
            println!("Page {page} of {pages} ({} matches).", listed.len());
        }
        Commands::Leaderboard {
            universities,
            limit,
        } => {
            let store = load_store(&cli.data)?;
            if universities {
                let stats = leaderboard::aggregate_by_university(&store.volunteers);
                let ordered = leaderboard::rank_universities(&stats);
                if ordered.is_empty() {
                    println!("No universities on the board yet.");
                    return Ok(());
                }
                println!("Top universities:");
                for (index, entry) in ordered.iter().take(limit).enumerate() {
                    println!(
                        "{}. {} — {} نقطة، {} ساعة، {} متطوعاً",
                        index + 1,
                        entry.name,
                        entry.total_points,
                        entry.total_hours,
                        entry.volunteer_count
                    );
                }
            } else {
                let ordered = leaderboard::rank_volunteers(&store.volunteers);
                if ordered.is_empty() {
                    println!("No volunteers on the board yet.");
                    return Ok(());
                }
                println!("Top volunteers:");
                for (index, entry) in ordered.iter().take(limit).enumerate() {
                    println!(
                        "{}. {} — {} نقطة، {} ساعة",
                        index + 1,
                        entry.full_name,
                        entry.points,
                        entry.hours
                    );
                }
            }
        }
        Commands::Rank {
            volunteer,
            university,
        } => {
            let store = load_store(&cli.data)?;
            if let Some(id) = volunteer {
                let ordered = leaderboard::rank_volunteers(&store.volunteers);
                let rank = leaderboard::volunteer_rank(&ordered, id)?;
                let entry = store.volunteer(id)?;
                println!("{} is ranked {rank} of {}.", entry.full_name, ordered.len());
            } else if let Some(name) = university {
                let stats = leaderboard::aggregate_by_university(&store.volunteers);
                let ordered = leaderboard::rank_universities(&stats);
                let rank = leaderboard::university_rank(&ordered, &name)?;
                println!("{name} is ranked {rank} of {}.", ordered.len());
            }
        }
        Commands::Register {
            volunteer,
            opportunity,
            text,
        } => {
            let mut store = load_store(&cli.data)?;
            store.opportunity(opportunity)?;
            let record = store.volunteer_mut(volunteer)?;
            let outcome = registration::register(record, opportunity, &text);
            store.save(&cli.data)?;
            describe(
                outcome,
                "Registration recorded.",
                "Already registered for this opportunity; nothing changed.",
            );
        }
        Commands::Cancel {
            volunteer,
            opportunity,
        } => {
            let mut store = load_store(&cli.data)?;
            let record = store.volunteer_mut(volunteer)?;
            let outcome = registration::cancel(record, opportunity);
            store.save(&cli.data)?;
            describe(
                outcome,
                "Registration cancelled.",
                "No active registration to cancel; nothing changed.",
            );
        }
        Commands::Review {
            volunteer,
            opportunity,
            rating,
            comment,
        } => {
            if !(1..=5).contains(&rating) {
                anyhow::bail!("rating must be between 1 and 5");
            }
            let mut store = load_store(&cli.data)?;
            store.opportunity(opportunity)?;
            let record = store.volunteer_mut(volunteer)?;
            let outcome = registration::submit_review(record, opportunity);
            store.save(&cli.data)?;
            if outcome == Transition::Applied && !comment.is_empty() {
                log::info!("review comment for opportunity {opportunity}: {comment}");
            }
            describe(
                outcome,
                "Review recorded.",
                "This opportunity was already reviewed; nothing changed.",
            );
        }
        Commands::Recommend { interests } => {
            let store = load_store(&cli.data)?;
            let client = ai_client()?;
            let ids = ai::recommend_opportunities(&client, &interests, &store.opportunities)
                .await
                .context("recommendation failed; try again")?;

            println!("Recommended opportunities:");
            for id in ids {
                let opportunity = store.opportunity(id)?;
                println!(
                    "- [{}] {} — {} ({})",
                    opportunity.id, opportunity.title, opportunity.organization, opportunity.category
                );
            }
        }
        Commands::Extract { cv, volunteer } => {
            let source_text = std::fs::read_to_string(&cv)
                .with_context(|| format!("failed to read {}", cv.display()))?;
            let client = ai_client()?;
            let draft = ai::extract_profile(&client, &source_text)
                .await
                .context("profile extraction failed; try again")?;

            println!("Extracted profile draft:\n{draft:#?}");
            if let Some(id) = volunteer {
                let mut store = load_store(&cli.data)?;
                let mut updated = store.volunteer(id)?.clone();
                draft.apply(&mut updated);
                store.update_volunteer(updated)?;
                store.save(&cli.data)?;
                println!("Merged the draft into volunteer {id}.");
            }
        }
        Commands::Chat { message } => {
            let client = ai_client()?;
            let mut session = ChatSession::new();
            match message {
                Some(message) => {
                    let reply = collect_reply(&client, &mut session, &message, false).await?;
                    print!("{}", markdown::render_text(&markdown::parse(&reply)));
                }
                None => {
                    println!("Chatting with the Taww assistant. Empty line to quit.");
                    let stdin = std::io::stdin();
                    loop {
                        print!("> ");
                        std::io::stdout().flush()?;
                        let mut line = String::new();
                        if stdin.read_line(&mut line)? == 0 || line.trim().is_empty() {
                            break;
                        }
                        collect_reply(&client, &mut session, line.trim(), true).await?;
                        println!();
                    }
                }
            }
        }
    }

    Ok(())
}

/// Drain one reply stream in arrival order, optionally echoing chunks as
/// they land, and record the exchange on the session once the reply is
/// complete. A stream error leaves the session transcript untouched.
async fn collect_reply(
    model: &dyn TextModel,
    session: &mut ChatSession,
    message: &str,
    echo: bool,
) -> anyhow::Result<String> {
    let mut stream = session
        .send(model, message)
        .await
        .context("the assistant is unavailable; try again")?;

    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("the reply stream broke off; try again")?;
        if echo {
            print!("{chunk}");
            std::io::stdout().flush()?;
        }
        reply.push_str(&chunk);
    }

    session.record_exchange(message, &reply);
    Ok(reply)
}
