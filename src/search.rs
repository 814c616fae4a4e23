//! `cidx search`: embed a query and print the closest chunks.
//!
//! Prints ranked hits with score, source, page and an excerpt, or the
//! prompt-ready context block with `--context`.

use anyhow::Result;

use crate::indexer::{render_context, IndexingController};
use crate::models::SearchHit;

const EXCERPT_CHARS: usize = 240;

pub async fn run_search(
    controller: &IndexingController,
    query: &str,
    limit: Option<usize>,
    min_score: Option<f32>,
    context: bool,
    json: bool,
) -> Result<()> {
    let hits = controller.search(query, limit, min_score).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    if context {
        println!("{}", render_context(&hits));
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let chunk = &hit.chunk;
    match chunk.page_or_slide {
        Some(page) => println!(
            "{}. [{:.3}] {} (page {})",
            rank, hit.score, chunk.source_path, page
        ),
        None => println!("{}. [{:.3}] {}", rank, hit.score, chunk.source_path),
    }
    println!("    chars: {}..{}", chunk.char_start, chunk.char_end);
    println!("    excerpt: \"{}\"", excerpt(&chunk.text));
    println!("    id: {}", chunk.chunk_id);
    println!();
}

/// First [`EXCERPT_CHARS`] characters on a single line.
fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n\nb   c"), "a b c");
        let long = "w ".repeat(400);
        let out = excerpt(&long);
        assert_eq!(out.chars().count(), EXCERPT_CHARS + 1);
        assert!(out.ends_with('…'));
    }
}
