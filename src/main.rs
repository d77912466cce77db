use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use claybook::config::{self, Config};
use claybook::gateway::{self, Gateway};
use claybook::lifecycle::{self, GroupOptions};
use claybook::model::{NewPiece, Piece, Stage};
use claybook::ordering::{self, ReorderOutcome};
use claybook::photos::{self, PhotoSource};

#[derive(Debug, Parser)]
#[command(author, version, about = "Track pottery pieces from idea to gallery")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Put a new piece on the bench
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Starting stage, new through glaze_firing (defaults to new)
        #[arg(long, default_value = "new", value_parser = parse_bench_stage)]
        stage: Stage,
    },
    /// Record an idea
    Idea {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        commission: bool,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// List ideas in their manual order
    Ideas,
    /// Start an idea (moves it to the new stage)
    Start { id: String },
    /// Move a piece to any stage
    Stage {
        id: String,
        #[arg(value_parser = parse_stage)]
        stage: Stage,
    },
    /// Send a piece to the graveyard
    Scrap { id: String },
    /// Show in-progress pieces grouped by stage
    Board {
        /// Hide stages with no pieces
        #[arg(long)]
        hide_empty: bool,
    },
    /// List every live piece, newest first
    Active,
    /// List completed pieces with their cover photo
    Gallery,
    /// Correct the completion date (YYYY-MM-DD or RFC 3339)
    CompletedAt { id: String, date: String },
    /// Replace an idea's description (empty clears it)
    Describe { id: String, description: String },
    /// Attach a photo from a local file or a URL
    Attach {
        id: String,
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
    },
    /// List a piece's photos, newest first
    Photos { id: String },
    /// Delete a photo record
    DeletePhoto { photo_id: String },
    /// Move the idea at FROM to position TO
    Reorder { from: usize, to: usize },
    /// Mark a piece completed, optionally with a final photo
    Complete {
        id: String,
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
    },
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    Stage::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown stage '{}' (expected one of {})", raw, known.join(", "))
    })
}

fn parse_bench_stage(raw: &str) -> Result<Stage, String> {
    let stage = parse_stage(raw)?;
    if stage.is_bench() {
        return Ok(stage);
    }
    let known: Vec<&str> = Stage::ALL
        .iter()
        .filter(|s| s.is_bench())
        .map(|s| s.as_str())
        .collect();
    Err(format!(
        "'{}' is not a bench stage (expected one of {})",
        raw,
        known.join(", ")
    ))
}

fn photo_source(file: Option<PathBuf>, url: Option<String>) -> Option<PhotoSource> {
    file.map(PhotoSource::Device)
        .or_else(|| url.map(PhotoSource::Url))
}

fn print_piece(piece: &Piece) {
    let mut line = format!("{}  [{}]  {}", piece.id, piece.stage.label(), piece.title);
    if let Some(desc) = &piece.description {
        line.push_str(&format!(" - {}", desc));
    }
    println!("{}", line);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let gw = gateway::connect(&cfg).await?;
    if let Err(err) = run(&cfg, gw.as_ref(), args.command).await {
        error!(?err, "command failed");
        return Err(err);
    }
    Ok(())
}

async fn run(cfg: &Config, gw: &dyn Gateway, command: Command) -> Result<()> {
    match command {
        Command::Add {
            title,
            description,
            stage,
        } => {
            let mut new = NewPiece::active(title, stage);
            new.description = description;
            let piece = lifecycle::create_piece(gw, new).await?;
            print_piece(&piece);
        }
        Command::Idea {
            title,
            description,
            commission,
            priority,
        } => {
            let mut new = NewPiece::idea(title).commission(commission).priority(priority);
            new.description = description;
            let piece = lifecycle::create_piece(gw, new).await?;
            print_piece(&piece);
        }
        Command::Ideas => {
            for idea in lifecycle::list_ideas(gw).await? {
                let commission = if idea.is_commission { " (commission)" } else { "" };
                let priority = idea
                    .priority
                    .map(|p| format!(" p{}", p))
                    .unwrap_or_default();
                println!(
                    "{:>3}. {}  {}{}{}",
                    idea.display_order, idea.id, idea.title, commission, priority
                );
            }
        }
        Command::Start { id } => lifecycle::promote_idea_to_active(gw, &id).await?,
        Command::Stage { id, stage } => lifecycle::transition_stage(gw, &id, stage).await?,
        Command::Scrap { id } => lifecycle::scrap(gw, &id).await?,
        Command::Board { hide_empty } => {
            let options = GroupOptions {
                include_empty_groups: cfg.board.include_empty_groups && !hide_empty,
            };
            let groups =
                lifecycle::list_by_stage(gw, &[Stage::Idea, Stage::Completed], options).await?;
            for group in groups {
                println!("{} ({})", group.stage.label(), group.pieces.len());
                for piece in &group.pieces {
                    println!("    {}  {}", piece.id, piece.title);
                }
            }
        }
        Command::Active => {
            for piece in lifecycle::list_active(gw, &[]).await? {
                print_piece(&piece);
            }
        }
        Command::Gallery => {
            for entry in lifecycle::gallery(gw).await? {
                let date = entry
                    .piece
                    .completed_at
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".into());
                let cover = entry.cover().map(|p| p.url.as_str()).unwrap_or("(no photo)");
                println!("{}  {}  {}  {}", date, entry.piece.id, entry.piece.title, cover);
            }
        }
        Command::CompletedAt { id, date } => {
            let at = lifecycle::update_completed_at(gw, &id, &date).await?;
            println!("completed {}", at.format("%Y-%m-%d"));
        }
        Command::Describe { id, description } => {
            lifecycle::update_description(gw, &id, &description).await?
        }
        Command::Attach { id, file, url } => {
            let source =
                photo_source(file, url).ok_or_else(|| anyhow!("pass --file or --url"))?;
            let photo = photos::attach_photo(gw, &cfg.storage, &id, source).await?;
            let marker = if photo.is_primary { " (primary)" } else { "" };
            println!("{}  {}{}", photo.id, photo.url, marker);
        }
        Command::Photos { id } => {
            for photo in photos::list_photos(gw, &id).await? {
                let marker = if photo.is_primary { "*" } else { " " };
                println!("{} {}  {}", marker, photo.id, photo.url);
            }
        }
        Command::DeletePhoto { photo_id } => photos::delete_photo(gw, &photo_id).await?,
        Command::Reorder { from, to } => {
            let ideas: Vec<Piece> = lifecycle::list_ideas(gw).await?.collect();
            match ordering::reorder_or_refetch(gw, ideas, from, to).await? {
                ReorderOutcome::Applied(ideas) => {
                    for idea in &ideas {
                        println!("{:>3}. {}", idea.display_order, idea.title);
                    }
                }
                ReorderOutcome::Refetched { error, .. } => return Err(error.into()),
            }
        }
        Command::Complete { id, file, url } => {
            let source = photo_source(file, url);
            let wanted_photo = source.is_some();
            let photo = photos::complete_with_photo(gw, &cfg.storage, &id, source).await?;
            if wanted_photo && photo.is_none() {
                println!("completed, but the photo could not be attached");
            }
        }
    }
    Ok(())
}
