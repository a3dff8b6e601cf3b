use std::error::Error;

pub fn handle_sing(song: &str, lyrics: Option<&str>) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "desktop")]
    {
        desktop::run(song, lyrics)
    }

    #[cfg(not(feature = "desktop"))]
    {
        let _ = song;
        let _ = lyrics;
        use owo_colors::OwoColorize;
        println!("{} {}", "🎤".cyan(), "Sing".bold());
        println!();
        println!(
            "{} Recording requires the 'desktop' feature to be enabled.",
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
    use crate::cli::configured_pipeline;
    use crate::cli::cues::format_ms;
    use kara_studio::config::Config;
    use kara_studio::cues::load_srt;
    use kara_studio::engine::{DesktopPermissions, RodioEngine, SoundEngine};
    use kara_studio::media::{HttpDownloader, MediaResolver, MediaSource, is_remote_url};
    use kara_studio::session::{SessionController, SessionPhase, SessionUpdate};
    use kara_studio::utils::progress::create_progress_spinner;
    use owo_colors::OwoColorize;
    use std::error::Error;
    use std::fs;
    use std::io::{self, BufRead};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::thread;
    use std::time::Duration;

    fn resolver(config: &Config) -> MediaResolver {
        MediaResolver::new(
            config.assets_path(),
            config.cache_path(),
            Box::new(HttpDownloader::default()),
        )
    }

    pub fn run(song: &str, lyrics: Option<&str>) -> Result<(), Box<dyn Error>> {
        let config = Config::load()?;
        let cache_dir = config.cache_path();
        fs::create_dir_all(&cache_dir)?;

        let mut source = MediaSource::parse(song);
        if matches!(&source, MediaSource::Location(l) if is_remote_url(l)) {
            // The speaker engine only opens local files
            let spinner = create_progress_spinner();
            spinner.set_message(format!("Downloading {song}..."));
            spinner.enable_steady_tick(Duration::from_millis(100));
            let result = resolver(&config).ensure_on_disk(&source);
            spinner.finish_and_clear();
            source = MediaSource::Location(result?.to_string_lossy().to_string());
        }

        let cues = match lyrics {
            Some(path) => load_srt(Path::new(path))?,
            None => Vec::new(),
        };

        let engine: Arc<dyn SoundEngine> = Arc::new(RodioEngine::new(&cache_dir)?);
        let session = Arc::new(SessionController::new(
            engine,
            configured_pipeline(&config),
            resolver(&config),
            Box::new(DesktopPermissions),
            Some(source),
            config.session_settings(),
        ));

        session.set_cues(cues);
        let updates = session.subscribe();
        session.attach_listeners();

        println!("{} {}", "🎤".cyan(), song.bold());
        println!("{}", "Press Enter to stop.".dimmed());
        println!();

        if let Err(e) = session.start() {
            session.teardown();
            return Err(e.into());
        }

        let (enter_tx, enter_rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            let _ = enter_tx.send(());
        });

        let spinner = create_progress_spinner();
        spinner.enable_steady_tick(Duration::from_millis(100));
        let mut stop_requested = false;

        let outcome = loop {
            if !stop_requested && enter_rx.try_recv().is_ok() {
                stop_requested = true;
                let session = session.clone();
                // Stopping mixes; keep this loop free to show progress
                thread::spawn(move || {
                    let _ = session.stop();
                });
            }

            match updates.recv_timeout(Duration::from_millis(50)) {
                Ok(SessionUpdate::Position {
                    position_ms,
                    duration_ms,
                }) => {
                    spinner.set_message(format!(
                        "{} / {}",
                        format_ms(position_ms),
                        format_ms(duration_ms)
                    ));
                }
                Ok(SessionUpdate::Cue(Some(text))) => {
                    spinner.println(format!("  {} {}", "♪".magenta(), text.bold()));
                }
                Ok(SessionUpdate::Merging(true)) => {
                    spinner.set_message("Mixing your take...");
                }
                Ok(SessionUpdate::Phase(SessionPhase::Merging)) => {
                    spinner.set_message("Normalizing and mixing...");
                }
                Ok(SessionUpdate::Finished(handoff)) => break Ok(handoff),
                Ok(SessionUpdate::Failed(message)) => break Err(message),
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    break Err("session ended unexpectedly".to_string());
                }
            }
        };

        spinner.finish_and_clear();
        session.teardown();

        match outcome {
            Ok(handoff) => {
                println!("{} Take saved", "✓".green());
                println!("  Voice: {}", handoff.recorded_path.display());
                println!("  Mix:   {}", handoff.merged_path.display());
                println!();
                println!(
                    "Listen: {}",
                    format!(
                        "kara play {} {}",
                        handoff.recorded_path.display(),
                        handoff.merged_path.display()
                    )
                    .cyan()
                );
                Ok(())
            }
            Err(message) => Err(message.into()),
        }
    }
}
