use kara_studio::cues::{Cue, CueCursor, find_cue_at, load_srt};
use owo_colors::OwoColorize;
use std::error::Error;
use std::path::Path;

pub fn handle_cues(path: &str, at: Option<u64>, json: bool) -> Result<(), Box<dyn Error>> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(format!("Subtitle file not found: {}", path.display()).into());
    }

    let cues = load_srt(path)?;

    if let Some(at) = at {
        let mut cursor = CueCursor::new();
        let cue = find_cue_at(&cues, at, &mut cursor);
        if json {
            println!("{}", serde_json::to_string_pretty(&cue)?);
        } else {
            match cue {
                Some(cue) => print_cue(cursor.index(), cue),
                None => println!("{} no cue at {}", "·".dimmed(), format_ms(at)),
            }
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&cues)?);
        return Ok(());
    }

    for (index, cue) in cues.iter().enumerate() {
        print_cue(index, cue);
    }
    println!();
    println!("{} {} cues", "✓".green(), cues.len());

    Ok(())
}

fn print_cue(index: usize, cue: &Cue) {
    println!(
        "{:>4}  {} → {}  {}",
        (index + 1).dimmed(),
        format_ms(cue.start_ms).cyan(),
        format_ms(cue.end_ms).cyan(),
        cue.text
    );
}

/// `mm:ss.mmm`
pub fn format_ms(ms: u64) -> String {
    format!("{:02}:{:02}.{:03}", ms / 60_000, (ms / 1000) % 60, ms % 1000)
}
