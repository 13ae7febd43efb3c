use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tessera::constants::TRANSPARENT;
use tessera::prelude::*;
use tessera::tiles::tile::rgb;

const LAND: u32 = 0xffc8_6432;

fn texture() -> GeoSceneTexture {
    GeoSceneTexture::new("earth/uniform", 2, 1)
        .with_tile_size(32, 32)
        .with_extension("png")
        .with_download_urls(vec!["http://tiles.example/{level}/{x}/{y}.png".to_string()])
}

fn level_zero_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.render.max_tile_level = 0;
    config.loader.retry_delay_ms = 1;
    config
}

fn uniform_world(texture: &GeoSceneTexture) -> StaticTileProvider {
    let provider = StaticTileProvider::new();
    for x in 0..2 {
        provider.insert(TextureTile::new(texture.tile_id(0, x, 0), TileImage::filled(32, 32, LAND)));
    }
    provider
}

fn whole_globe(projection: Projection) -> ViewportState {
    // 2 * pi at 2 * radius / pi pixels per radian spans 400 pixels
    ViewportState::new(projection, GeoCoord::new(0.0, 0.0), 100.0, 400, 200)
}

fn pixel_at(canvas: &Canvas, viewport: &ViewportState, lon: f64, lat: f64) -> u32 {
    let p = viewport
        .geo_to_screen(GeoCoord::from_degrees(lon, lat))
        .expect("point on screen");
    canvas.pixel(p.x as u32, p.y as u32)
}

#[test]
fn test_sun_shading_through_the_stack() {
    let config = level_zero_config();
    let texture = texture();
    let mut decorator = MergedLayerDecorator::new(&config.render);
    decorator.set_sun(Some(SunPosition::new(0.0, 0.0)));
    decorator.set_show_sun_shading(true);
    let stack = StackedTileBuilder::new(uniform_world(&texture), &texture, decorator, 1 << 20);

    let viewport = whole_globe(Projection::Equirectangular);
    let mut mapper = TextureMapper::new(&config);
    let mut canvas = Canvas::new(1, 1);
    let stats = mapper.render(&viewport, &texture, &stack, ViewContext::Still, &mut canvas);

    assert_eq!(stats.level, 0);
    assert_eq!(stats.tiles.len(), 2);
    assert_eq!(pixel_at(&canvas, &viewport, 30.0, 10.0), LAND);
    assert_eq!(pixel_at(&canvas, &viewport, -30.0, 10.0), LAND);
    assert_eq!(pixel_at(&canvas, &viewport, 150.0, 10.0), rgb(100, 50, 25));
    assert_eq!(pixel_at(&canvas, &viewport, -150.0, -10.0), rgb(100, 50, 25));
}

#[test]
fn test_decoration_change_rebuilds_merged_tiles() {
    let config = level_zero_config();
    let texture = texture();
    let mut stack = StackedTileBuilder::new(
        uniform_world(&texture),
        &texture,
        MergedLayerDecorator::new(&config.render),
        1 << 20,
    );
    let id = texture.tile_id(0, 1, 0);
    assert_eq!(stack.tile(id).unwrap().image.pixel(16, 16), LAND);

    stack.update_decorator(|decorator| {
        decorator.set_sun(Some(SunPosition::new(-std::f64::consts::FRAC_PI_2, 0.0)));
        decorator.set_show_sun_shading(true);
    });
    // the eastern tile is on the night side now
    assert_eq!(stack.tile(id).unwrap().image.pixel(16, 16), rgb(100, 50, 25));
}

#[test]
fn test_spherical_view_leaves_corners_transparent() {
    let config = level_zero_config();
    let texture = texture();
    let provider = uniform_world(&texture);
    let viewport = ViewportState::new(Projection::Spherical, GeoCoord::from_degrees(20.0, 30.0), 80.0, 200, 200);
    let mut mapper = TextureMapper::new(&config);
    let mut canvas = Canvas::new(200, 200);
    canvas.fill(rgb(1, 2, 3));

    mapper.render(&viewport, &texture, &provider, ViewContext::Animation, &mut canvas);

    assert_eq!(canvas.pixel(100, 100), LAND);
    for (x, y) in [(0, 0), (199, 0), (0, 199), (199, 199)] {
        assert_eq!(canvas.pixel(x, y), TRANSPARENT);
    }
    assert!(canvas.painted_pixels() > 0);
}

#[test]
fn test_mercator_and_equirect_cover_the_same_longitudes() {
    let config = level_zero_config();
    let texture = texture();
    let provider = uniform_world(&texture);
    let mut mapper = TextureMapper::new(&config);

    for projection in [Projection::Equirectangular, Projection::Mercator] {
        let viewport = whole_globe(projection);
        let mut canvas = Canvas::new(1, 1);
        let stats = mapper.render(&viewport, &texture, &provider, ViewContext::Still, &mut canvas);
        assert_eq!(mapper.projection(), projection);
        assert_eq!(stats.tiles.len(), 2, "{:?}", projection);
        let mid = viewport.height / 2;
        assert!(canvas.row(mid).iter().all(|&p| p == LAND), "{:?}", projection);
    }
}

struct PngFetcher;

impl TileFetcher for PngFetcher {
    fn fetch(&self, _url: &str) -> tessera::Result<Vec<u8>> {
        let image = RgbaImage::from_pixel(32, 32, Rgba([200, 100, 50, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(bytes)
    }
}

#[test]
fn test_render_repaints_after_tiles_arrive() {
    let config = level_zero_config();
    let texture = texture();
    let loader = TileLoader::builder()
        .config(&config)
        .texture(texture.clone())
        .fetcher(Arc::new(PngFetcher))
        .build();
    let events = loader.subscribe();

    let viewport = whole_globe(Projection::Equirectangular);
    let mut mapper = TextureMapper::new(&config);
    let mut canvas = Canvas::new(1, 1);

    // the first frame only schedules the two level zero tiles
    let stats = mapper.render(&viewport, &texture, &loader, ViewContext::Still, &mut canvas);
    assert_eq!(stats.tiles.len(), 2);

    let mut updated = 0;
    while updated < 2 {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(TileEvent::Updated(_)) => updated += 1,
            Ok(other) => panic!("unexpected event {:?}", other),
            Err(_) => panic!("tiles never arrived"),
        }
    }

    mapper.render(&viewport, &texture, &loader, ViewContext::Still, &mut canvas);
    assert_eq!(pixel_at(&canvas, &viewport, -90.0, 0.0), LAND);
    assert_eq!(pixel_at(&canvas, &viewport, 90.0, 0.0), LAND);
}
