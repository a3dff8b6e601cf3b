use std::error::Error;

pub fn handle_play(recorded: &str, merged: &str) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "desktop")]
    {
        desktop::run(recorded, merged)
    }

    #[cfg(not(feature = "desktop"))]
    {
        let _ = recorded;
        let _ = merged;
        use owo_colors::OwoColorize;
        println!("{} {}", "🎵".cyan(), "Output Player".bold());
        println!();
        println!(
            "{} Playback requires the 'desktop' feature to be enabled.",
            "Note:".yellow()
        );
        println!();
        println!("Or if building from source:");
        println!("  {}", "cargo build --release --features desktop".cyan());

        Ok(())
    }
}

#[cfg(feature = "desktop")]
mod desktop {
    use kara_studio::config::Config;
    use kara_studio::engine::{EngineEvent, ListenerKind, RodioEngine, SoundEngine};
    use kara_studio::session::{Handoff, OutputPlayer, OutputTrack};
    use owo_colors::OwoColorize;
    use std::error::Error;
    use std::io::{self, BufRead, Write};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::mpsc;

    pub fn run(recorded: &str, merged: &str) -> Result<(), Box<dyn Error>> {
        for path in [recorded, merged] {
            if !PathBuf::from(path).exists() {
                return Err(format!("File not found: {path}").into());
            }
        }

        let config = Config::load()?;
        let engine: Arc<dyn SoundEngine> = Arc::new(RodioEngine::new(&config.cache_path())?);
        let (tx, ended) = mpsc::channel();
        engine.add_listener(ListenerKind::PlaybackEnd, tx);

        let player = OutputPlayer::new(
            engine.clone(),
            Handoff {
                recorded_path: PathBuf::from(recorded),
                merged_path: PathBuf::from(merged),
            },
        );

        println!("{} {}", "🎵".cyan(), "Output".bold());
        println!("  Voice: {recorded}");
        println!("  Mix:   {merged}");
        println!();
        println!(
            "{} voice  {} mix  {} stop  {} quit",
            "[v]".cyan(),
            "[m]".cyan(),
            "[s]".cyan(),
            "[q]".cyan()
        );
        println!(
            "{} export voice  {} export mix  (into the current directory)",
            "[ev]".cyan(),
            "[em]".cyan()
        );

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("> ");
            io::stdout().flush()?;

            let Some(line) = lines.next() else {
                break;
            };
            while let Ok(EngineEvent::PlaybackEnded) = ended.try_recv() {
                player.finished();
            }

            match line?.trim() {
                "v" => report(player.toggle(OutputTrack::Recorded)),
                "m" => report(player.toggle(OutputTrack::Merged)),
                "s" => {
                    player.stop();
                    report(None);
                }
                "ev" => export(&player, OutputTrack::Recorded),
                "em" => export(&player, OutputTrack::Merged),
                "q" => break,
                "" => {}
                other => println!("{} unknown command '{other}'", "?".yellow()),
            }
        }

        player.stop();
        engine.remove_listener(ListenerKind::PlaybackEnd);
        Ok(())
    }

    fn export(player: &OutputPlayer, track: OutputTrack) {
        let result = std::env::current_dir().and_then(|dir| player.export(track, &dir));
        match result {
            Ok(path) => println!("{} saved {}", "✓".green(), path.display()),
            Err(e) => println!("{} export failed: {e}", "✗".red()),
        }
    }

    fn report(playing: Option<OutputTrack>) {
        match playing {
            Some(OutputTrack::Recorded) => println!("{} playing voice", "▶".green()),
            Some(OutputTrack::Merged) => println!("{} playing mix", "▶".green()),
            None => println!("{} stopped", "■".dimmed()),
        }
    }
}
