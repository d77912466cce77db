use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use claybook::config::{self, Config};
use claybook::gateway;
use claybook::lifecycle::{self, GalleryEntry};

#[derive(Debug, Parser)]
#[command(about = "Export the gallery of completed pieces to a local HTML page. Images render from their stored URLs.")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output file (defaults to <data_dir>/html/gallery.html)
    #[arg(long)]
    out: Option<PathBuf>,
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
    run(&cfg, args.out).await
}

async fn run(cfg: &Config, out: Option<PathBuf>) -> Result<()> {
    let gw = gateway::connect(cfg).await?;
    let entries = lifecycle::gallery(gw.as_ref()).await?;

    let out = out.unwrap_or_else(|| PathBuf::from(&cfg.app.data_dir).join("html/gallery.html"));
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&out, render_html(&entries))
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    info!(pieces = entries.len(), path = %out.display(), "gallery exported");
    Ok(())
}

fn render_html(entries: &[GalleryEntry]) -> String {
    let mut cards = String::new();
    for entry in entries {
        let piece = &entry.piece;
        cards.push_str("<figure class=\"piece\">");
        match entry.cover() {
            Some(photo) => cards.push_str(&format!(
                "<img src=\"{}\" alt=\"{}\" loading=\"lazy\">",
                html_attr(&photo.url),
                html_attr(&piece.title)
            )),
            None => cards.push_str("<div class=\"placeholder\">no photo</div>"),
        }
        cards.push_str(&format!(
            "<figcaption><strong>{}</strong>",
            html_escape(&piece.title)
        ));
        if let Some(done) = piece.completed_at {
            cards.push_str(&format!(
                "<span class=\"date\">Completed {}</span>",
                done.format("%Y-%m-%d")
            ));
        }
        if let Some(desc) = &piece.description {
            cards.push_str(&format!("<p>{}</p>", html_escape(desc)));
        }
        if entry.photos.len() > 1 {
            cards.push_str(&format!(
                "<span class=\"count\">{} photos</span>",
                entry.photos.len()
            ));
        }
        cards.push_str("</figcaption></figure>\n");
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Gallery</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; background: #faf7f2; color: #3b2f2a; }}
.grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 1rem; }}
.piece {{ margin: 0; background: #fff; border-radius: 8px; overflow: hidden; }}
.piece img, .placeholder {{ width: 100%; aspect-ratio: 1; object-fit: cover; display: block; }}
.placeholder {{ background: #e8e0d5; display: flex; align-items: center; justify-content: center; }}
figcaption {{ padding: .5rem .75rem; }}
.date, .count {{ display: block; font-size: .8rem; color: #8a7a70; }}
</style>
</head>
<body>
<h1>Gallery ({})</h1>
<div class="grid">
{}</div>
</body>
</html>
"#,
        entries.len(),
        cards
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_attr(s: &str) -> String {
    html_escape(s).replace('"', "&quot;")
}
