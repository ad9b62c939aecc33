use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use whoknows::db::models::{EntityFilter, EntityKind, Member, OrderBy};
use whoknows::guild::{DisplayNameChain, MembershipProvider, StoredNicknames};

#[derive(Parser)]
#[command(name = "whoknows", version, about = "Guild listening leaderboards and taste neighbors")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Artist,
    Album,
    Track,
}

impl From<KindArg> for EntityKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Artist => EntityKind::Artist,
            KindArg::Album => EntityKind::Album,
            KindArg::Track => EntityKind::Track,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    #[value(alias = "plays")]
    Playcount,
    Listeners,
}

impl From<OrderArg> for OrderBy {
    fn from(o: OrderArg) -> Self {
        match o {
            OrderArg::Playcount => OrderBy::Playcount,
            OrderArg::Listeners => OrderBy::Listeners,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load users, guild memberships, playcounts and plays from a JSON dump
    Import {
        /// Path to the dump file
        file: PathBuf,
    },

    /// Show which guild members listen to an artist, album or track
    Whoknows {
        /// Entity name (case-insensitive exact match)
        name: String,

        /// Guild to rank within
        #[arg(short, long)]
        guild: i64,

        #[arg(short, long, value_enum, default_value = "artist")]
        kind: KindArg,

        /// Also show this user's own playcount
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Show the guild's top artists, albums or tracks
    Top {
        #[arg(short, long)]
        guild: i64,

        #[arg(short, long, value_enum, default_value = "artist")]
        kind: KindArg,

        #[arg(short, long, value_enum, default_value = "playcount")]
        order: OrderArg,
    },

    /// Find the guild members whose taste best matches a user
    Neighbors {
        #[arg(short, long)]
        guild: i64,

        /// User to find neighbors for
        #[arg(short, long)]
        user: i64,
    },

    /// Top entities of the trailing window with movement against the previous one
    Billboard {
        #[arg(short, long)]
        guild: i64,

        #[arg(short, long, value_enum, default_value = "artist")]
        kind: KindArg,

        /// Window length in days (defaults to config window_days)
        #[arg(short, long)]
        days: Option<i64>,
    },

    /// Show store statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = whoknows::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(whoknows::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = whoknows::db::Database::open(&db_path)
        .context("Failed to open database")?;

    let page_size = config.leaderboard.page_size;

    match cli.command {
        Commands::Import { file } => {
            let result = whoknows::import::import_file(&db, &file)
                .with_context(|| format!("Import of {} failed", file.display()))?;
            println!(
                "Import complete: {} users, {} memberships, {} playcounts, {} plays",
                result.users, result.memberships, result.playcounts, result.plays
            );
        }

        Commands::Whoknows { name, guild, kind, user } => {
            let members = db.members(guild).context("Failed to load guild members")?;
            let filter = EntityFilter::new(kind.into(), &name).context("Invalid name")?;
            let resolver = StoredNicknames::new(&db);
            let names = DisplayNameChain::standard(guild, &resolver);

            let listing = whoknows::leaderboard::ranked_indexed_members(
                &db, &members, &filter, page_size, &names,
            )
            .context("Query failed")?;

            if listing.is_empty() {
                println!("Nobody in guild {} knows {} \"{}\".", guild, filter.kind.as_str(), filter.name);
                return Ok(());
            }

            println!("Who knows {} in guild {}:", listing[0].entity_name, guild);
            println!();
            println!("{:>3}  {:<30} {:>8}", "#", "Member", "Plays");
            println!("{}", "-".repeat(44));
            for (i, row) in listing.iter().enumerate() {
                println!(
                    "{:>3}  {:<30} {:>8}",
                    i + 1,
                    truncate(&row.display_name, 30),
                    row.playcount
                );
            }
            println!();

            let now = chrono::Utc::now();
            let days = config.leaderboard.window_days;
            let listeners = whoknows::leaderboard::listener_count(&db, &members, &filter)
                .context("Query failed")?;
            let total = whoknows::leaderboard::total_playcount(&db, &members, &filter)
                .context("Query failed")?;
            let average = whoknows::leaderboard::average_playcount(&db, &members, &filter)
                .context("Query failed")?;
            let recent = whoknows::leaderboard::windowed_playcount(&db, &members, &filter, now, days)
                .context("Query failed")?;
            let recent_listeners =
                whoknows::leaderboard::windowed_listener_count(&db, &members, &filter, now, days)
                    .context("Query failed")?;

            println!(
                "{} listeners, {} plays, {:.1} average",
                listeners, total, average
            );
            println!(
                "Last {} days: {} plays from {} listeners",
                days, recent, recent_listeners
            );

            if let Some(user_id) = user {
                let own = db.member_playcount(user_id, &filter).context("Query failed")?;
                match own {
                    Some(plays) => println!("User {} has {} plays", user_id, plays),
                    None => println!("User {} has no plays", user_id),
                }
            }
        }

        Commands::Top { guild, kind, order } => {
            let kind: EntityKind = kind.into();
            let members = db.members(guild).context("Failed to load guild members")?;
            let results = whoknows::leaderboard::top_entities(
                &db, &members, kind, order.into(), page_size,
            )
            .context("Query failed")?;

            if results.is_empty() {
                println!("No {} playcounts in guild {}.", kind.as_str(), guild);
                return Ok(());
            }

            println!("Top {} {}s in guild {}:", results.len(), kind.as_str(), guild);
            println!();
            println!("{:>3}  {:<40} {:>8} {:>9}", "#", "Name", "Plays", "Listeners");
            println!("{}", "-".repeat(64));
            for (i, e) in results.iter().enumerate() {
                println!(
                    "{:>3}  {:<40} {:>8} {:>9}",
                    i + 1,
                    truncate(&e.name, 40),
                    e.playcount,
                    e.listener_count
                );
            }
        }

        Commands::Neighbors { guild, user } => {
            let members = db.members(guild).context("Failed to load guild members")?;
            let target = find_member(&members, user, guild)?;

            let cache = whoknows::cache::AffinityCache::with_system_clock();
            let engine = whoknows::affinity::AffinityEngine::new(
                db.location().clone(),
                &cache,
                config.affinity.clone(),
            )
            .context("Failed to start neighbor workers")?;

            let results = engine.neighbors(target, &members)
                .context("Neighbor search failed")?;

            if results.is_empty() {
                println!("No neighbors found for user {}.", user);
                return Ok(());
            }

            println!("Neighbors of {} in guild {}:", display_name(target), guild);
            println!();
            println!("{:>3}  {:<30} {:>7} {:>10}", "#", "Member", "Match", "Score");
            println!("{}", "-".repeat(54));
            for (i, r) in results.iter().take(page_size).enumerate() {
                println!(
                    "{:>3}  {:<30} {:>6.1}% {:>10.2}",
                    i + 1,
                    truncate(&r.display_name, 30),
                    r.match_percentage,
                    r.score
                );
            }
        }

        Commands::Billboard { guild, kind, days } => {
            let kind: EntityKind = kind.into();
            let days = days.unwrap_or(config.leaderboard.window_days);
            let members = db.members(guild).context("Failed to load guild members")?;
            let board = whoknows::leaderboard::billboard(
                &db, &members, kind, chrono::Utc::now(), days, page_size,
            )
            .context("Query failed")?;

            if board.is_empty() {
                println!("No plays in guild {} in the last {} days.", guild, days);
                return Ok(());
            }

            println!("Billboard: top {}s in guild {}, last {} days", kind.as_str(), guild, days);
            println!();
            for (entry, delta) in &board {
                let previous = delta
                    .display_old
                    .map(|r| format!("was #{r}"))
                    .unwrap_or_default();
                println!(
                    "{:<50} {:>6} plays  {}",
                    delta.line(true),
                    entry.playcount,
                    previous
                );
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Store Statistics");
            println!("================");
            println!("Users:            {}", stats.users);
            println!("Guilds:           {}", stats.guilds);
            println!("Playcount rows:   {}", stats.entity_rows);
            println!("Plays:            {}", stats.plays);
            println!();

            if !stats.kinds.is_empty() {
                println!("Kinds:");
                for (kind, count) in &stats.kinds {
                    println!("  {:<8} {}", kind, count);
                }
            }
        }
    }

    Ok(())
}

fn find_member(members: &[Member], user_id: i64, guild: i64) -> Result<&Member> {
    members
        .iter()
        .find(|m| m.user_id == user_id)
        .with_context(|| format!("User {} is not a member of guild {}", user_id, guild))
}

fn display_name(m: &Member) -> &str {
    m.display_name.as_deref().unwrap_or(&m.handle)
}

/// Truncate to `max` characters, marking the cut with "...".
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}
