use celdraw::cli::Args;
use celdraw::config::{self, EditorSettings};
use celdraw::core::history::{HistoryStep, UndoFilter};
use celdraw::entities::frame::PEN;
use celdraw::entities::region::Rect;
use celdraw::entities::{Cursor, SurfaceId};
use celdraw::EditorSession;

use anyhow::Context;
use clap::Parser;
use image::Rgba;
use log::{debug, info, warn};

const THUMB: (u32, u32) = (96, 54);
const LIGHT_TABLE: [u8; 3] = [0, 90, 255];

/// Draw a filled disc into the lines surface, clipped to the image
fn disc(surface: &mut image::RgbaImage, cx: i64, cy: i64, r: i64, color: Rgba<u8>) {
    let (w, h) = surface.dimensions();
    for y in (cy - r).max(0)..(cy + r + 1).min(h as i64) {
        for x in (cx - r).max(0)..(cx + r + 1).min(w as i64) {
            if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                surface.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Scripted session: a bouncing ball over a static background layer, browsed
/// like a user would (thumbnails, light table), then partly undone and redone.
fn run(session: &mut EditorSession, args: &Args) -> anyhow::Result<()> {
    let (w, h) = session.movie().resolution();
    let r = (h / 10).max(2) as i64;

    // background on the bottom layer
    session.draw(SurfaceId::Color, |img| {
        for (_, y, px) in img.enumerate_pixels_mut() {
            if y > h * 3 / 4 {
                *px = Rgba([120, 160, 90, 255]);
            }
        }
    })?;
    for _ in 1..args.layers {
        session.insert_layer();
    }

    for i in 0..args.frames {
        if i > 0 {
            session.insert_frame();
        }
        let t = i as f64 / args.frames.max(1) as f64;
        let cx = (t * w as f64) as i64;
        let cy = (h as f64 * (0.2 + 0.5 * (t * std::f64::consts::PI * 2.0).sin().abs())) as i64;
        let bbox = Rect::new(
            (cx - r).max(0) as u32,
            (cy - r).max(0) as u32,
            2 * r as u32 + 1,
            2 * r as u32 + 1,
        );
        session.draw_in(SurfaceId::Lines, bbox, |img| disc(img, cx, cy, r, PEN))?;

        // the timeline redraws every thumbnail after each edit
        for pos in 0..=i {
            session.thumbnail(pos, THUMB.0, THUMB.1)?;
        }
        if i > 0 {
            session.light_table_mask(i - 1, LIGHT_TABLE, 0.3)?;
        }
        let collected = session.end_interaction_cycle();
        debug!("frame {}: {} stale cache entries collected", i, collected);
    }

    // zooming around must not flood the cache
    session.interactive(|s| -> anyhow::Result<()> {
        for step in 1..=4 {
            let (sw, sh) = ((w * step / 4).max(1), (h * step / 4).max(1));
            s.scaled_light_table_mask(0, LIGHT_TABLE, 0.3, sw, sh)?;
        }
        Ok(())
    })?;

    // browse back to the start, then undo: the first undo only reveals
    session.seek(Cursor::new(0, 0))?;
    let mut undone = 0;
    for _ in 0..4 {
        match session.undo(UndoFilter::Any)? {
            HistoryStep::Applied => undone += 1,
            HistoryStep::Revealed => info!("undo revealed position {:?}", session.movie().cursor()),
            step => warn!("undo: {:?}", step),
        }
    }
    for _ in 0..undone {
        session.redo()?;
    }
    session.end_interaction_cycle();
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());

    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| config::data_file("celdraw.log", &path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }

    info!("Celdraw starting...");
    debug!("Command-line args: {:?}", args);

    let settings_path = EditorSettings::default_path(&path_config);
    info!("Config path: {}", settings_path.display());
    let mut settings = EditorSettings::load(&settings_path)?;
    if let Some(size) = &args.size {
        settings.frame_width = size[0].max(1);
        settings.frame_height = size[1].max(1);
    }
    settings.cache_debug_checks |= args.debug_cache;

    let mut session = EditorSession::new(settings);
    run(&mut session, &args)?;

    let stats = session.cache_stats();
    let movie = session.movie();
    println!(
        "movie: {} frames x {} layers at {}x{}",
        movie.frame_count(),
        movie.layer_count(),
        movie.resolution().0,
        movie.resolution().1
    );
    println!(
        "cache: {} entries, {} KB resident, {} hits / {} misses ({:.1}% hit rate), {} evicted, {} collected",
        session.cache().len(),
        session.cache().resident_bytes() / 1024,
        stats.hits(),
        stats.misses(),
        stats.hit_rate() * 100.0,
        stats.evictions(),
        stats.collected()
    );
    println!(
        "history: {} undo / {} redo entries, {} KB",
        session.history().undo_len(),
        session.history().redo_len(),
        session.history_bytes() / 1024
    );

    if let Some(path) = &args.output {
        let last = session.movie().frame_count() - 1;
        let image = session.composite(last)?;
        image
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
    }

    Ok(())
}
