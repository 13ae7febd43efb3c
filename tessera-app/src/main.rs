use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessera::prelude::*;

/// Headless driver: renders one frame or plans a region download
#[derive(Parser, Debug)]
#[command(author, version, about = "Render tile pyramids and plan region downloads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one view of a texture to a PNG file
    Render(RenderArgs),
    /// Count the tiles of a region and optionally download them
    PlanRegion(PlanArgs),
}

#[derive(Args, Debug)]
struct Common {
    /// Texture description (JSON)
    #[arg(long, value_parser)]
    texture: PathBuf,
    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long, value_parser)]
    config: Option<PathBuf>,
    /// Root of the persistent tile cache
    #[arg(long, value_parser)]
    cache: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    common: Common,
    #[arg(long, value_enum, default_value = "spherical")]
    projection: ProjectionArg,
    /// Overrides the configured still quality
    #[arg(long, value_enum)]
    quality: Option<QualityArg>,
    /// Center longitude in degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    lon: f64,
    /// Center latitude in degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    lat: f64,
    /// Globe radius in pixels
    #[arg(long, default_value_t = 300.0)]
    radius: f64,
    #[arg(long, default_value_t = 800)]
    width: u32,
    #[arg(long, default_value_t = 600)]
    height: u32,
    /// Shade the night side for this unix time (seconds)
    #[arg(long, allow_hyphen_values = true)]
    sun: Option<i64>,
    /// Seconds to wait for missing tiles
    #[arg(long, default_value_t = 10.0)]
    wait: f64,
    #[arg(long, short = 'o', value_parser, default_value = "tessera.png")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    common: Common,
    /// Bounding box in degrees
    #[arg(long, allow_hyphen_values = true)]
    west: f64,
    #[arg(long, allow_hyphen_values = true)]
    south: f64,
    #[arg(long, allow_hyphen_values = true)]
    east: f64,
    #[arg(long, allow_hyphen_values = true)]
    north: f64,
    #[arg(long, default_value_t = 0)]
    top_level: u32,
    #[arg(long)]
    bottom_level: u32,
    /// Level shown while the box was selected; defaults to the bottom level
    #[arg(long)]
    visible_level: Option<u32>,
    /// Queue the planned tiles for download
    #[arg(long)]
    download: bool,
    /// Seconds without progress before a download gives up
    #[arg(long, default_value_t = 30.0)]
    wait: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum ProjectionArg {
    Spherical,
    Equirectangular,
    Mercator,
}

impl From<ProjectionArg> for Projection {
    fn from(arg: ProjectionArg) -> Self {
        match arg {
            ProjectionArg::Spherical => Projection::Spherical,
            ProjectionArg::Equirectangular => Projection::Equirectangular,
            ProjectionArg::Mercator => Projection::Mercator,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum QualityArg {
    Low,
    High,
    Print,
}

impl From<QualityArg> for MapQuality {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Low => MapQuality::Low,
            QualityArg::High => MapQuality::High,
            QualityArg::Print => MapQuality::Print,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("tessera=info,tessera_app=info"),
    )
    .init();

    match Cli::parse().command {
        Command::Render(args) => render(&args),
        Command::PlanRegion(args) => plan_region(&args),
    }
}

impl Common {
    fn texture(&self) -> anyhow::Result<GeoSceneTexture> {
        GeoSceneTexture::load(&self.texture)
            .with_context(|| format!("loading texture {}", self.texture.display()))
    }

    fn config(&self) -> anyhow::Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display())),
            None => Ok(EngineConfig::default()),
        }
    }

    fn loader(&self, config: &EngineConfig, texture: GeoSceneTexture) -> TileLoader {
        let mut builder = TileLoader::builder()
            .config(config)
            .texture(texture)
            .fetcher(Arc::new(HttpFetcher));
        if let Some(root) = &self.cache {
            builder = builder.disk_cache(PersistentTileCache::new(
                root,
                config.cache.persistent_bytes(),
                config.cache.prune.clone(),
            ));
        }
        builder.build()
    }
}

/// Renders until every visible tile arrived or the wait budget ran out
fn render(args: &RenderArgs) -> anyhow::Result<()> {
    let mut config = args.common.config()?;
    if let Some(quality) = args.quality {
        config.render.still_quality = quality.into();
    }
    let texture = args.common.texture()?;
    let loader = Arc::new(args.common.loader(&config, texture.clone()));
    let events = loader.subscribe();

    let mut decorator = MergedLayerDecorator::new(&config.render);
    if let Some(secs) = args.sun {
        decorator.set_sun(Some(SunPosition::at_unix_time(secs)));
        decorator.set_show_sun_shading(true);
    }
    let stack = StackedTileBuilder::new(
        Arc::clone(&loader),
        &texture,
        decorator,
        config.cache.volatile_bytes() / 4,
    );

    let viewport = ViewportState::new(
        args.projection.into(),
        GeoCoord::from_degrees(args.lon, args.lat),
        args.radius,
        args.width,
        args.height,
    );
    let mut mapper = TextureMapper::new(&config);
    let mut canvas = Canvas::new(viewport.width, viewport.height);

    let deadline = Instant::now() + Duration::from_secs_f64(args.wait.max(0.0));
    loop {
        let stats = mapper.render(&viewport, &texture, &stack, ViewContext::Still, &mut canvas);
        log::info!(
            "frame at level {}: {} tiles, step {}, {:?}",
            stats.level,
            stats.tiles.len(),
            stats.step,
            stats.elapsed
        );
        if loader.pending_count() == 0 {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            log::warn!("{} tiles still pending, saving anyway", loader.pending_count());
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(event) => log::debug!("{:?}", event),
            Err(_) => continue,
        }
        // coalesce bursts of arrivals into one repaint
        while events.try_recv().is_ok() {}
    }

    canvas
        .save_png(&args.out)
        .with_context(|| format!("saving {}", args.out.display()))?;
    println!(
        "wrote {} ({} painted pixels)",
        args.out.display(),
        canvas.painted_pixels()
    );
    Ok(())
}

fn plan_region(args: &PlanArgs) -> anyhow::Result<()> {
    let config = args.common.config()?;
    let texture = args.common.texture()?;
    let area = GeoBox::from_degrees(args.west, args.south, args.east, args.north);

    let planner = RegionDownloadPlanner::for_texture(&texture, &config.region);
    let plan = planner.plan(
        &area,
        args.visible_level.unwrap_or(args.bottom_level),
        args.top_level,
        args.bottom_level,
    )?;
    for pyramid in &plan.pyramids {
        for level in pyramid.levels() {
            if let Some(rect) = pyramid.coords(level) {
                println!("level {level:2}: x {}..={} y {}..={} ({} tiles)", rect.x0, rect.x1, rect.y0, rect.y1, rect.count());
            }
        }
    }
    println!("total: {} tiles", plan.tiles_count);
    if let Some(message) = plan.message() {
        println!("{message}");
        return Ok(());
    }
    if !args.download {
        return Ok(());
    }

    let theme = texture.theme_hash();
    let loader = args.common.loader(&config, texture);
    let events = loader.subscribe();
    let token = CancellationToken::new();
    let mut queued = 0;
    for pyramid in &plan.pyramids {
        queued += loader.download_region(theme, pyramid, &token)?;
    }

    let wait = Duration::from_secs_f64(args.wait.max(0.0));
    let mut done = 0;
    while done < queued {
        match events.recv_timeout(wait) {
            Ok(TileEvent::Downloaded(_)) | Ok(TileEvent::Failed(_)) => done += 1,
            Ok(TileEvent::Updated(_)) => {}
            Err(_) => {
                log::warn!("no progress for {:?}, giving up", wait);
                token.cancel();
                break;
            }
        }
    }
    println!("downloaded {done} of {queued} tiles");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_render_arguments() {
        let cli = Cli::try_parse_from([
            "tessera-app",
            "render",
            "--texture",
            "earth.json",
            "--projection",
            "mercator",
            "--quality",
            "print",
            "--lon",
            "-122.4",
            "--lat",
            "37.8",
        ])
        .unwrap();
        let Command::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(Projection::from(args.projection), Projection::Mercator);
        assert_eq!(args.quality.map(MapQuality::from), Some(MapQuality::Print));
        assert_eq!(args.lon, -122.4);
        assert_eq!((args.width, args.height), (800, 600));
        assert_eq!(args.out, PathBuf::from("tessera.png"));
    }

    #[test]
    fn test_plan_region_requires_bottom_level() {
        let base = [
            "tessera-app",
            "plan-region",
            "--texture",
            "earth.json",
            "--west",
            "-10",
            "--south",
            "40",
            "--east",
            "5",
            "--north",
            "50",
        ];
        assert!(Cli::try_parse_from(base).is_err());

        let cli = Cli::try_parse_from(base.iter().copied().chain(["--bottom-level", "6"])).unwrap();
        let Command::PlanRegion(args) = cli.command else {
            panic!("expected plan-region");
        };
        assert_eq!((args.top_level, args.bottom_level, args.visible_level), (0, 6, None));
        assert_eq!(args.west, -10.0);
        assert!(!args.download);
    }
}
