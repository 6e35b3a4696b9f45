use bevy::image::ImageSampler;
use bevy::prelude::*;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::*;
use noise::{NoiseFn, Value};

use crate::config::LifeSettings;
use crate::world::grid::Grid;

/// Lattice period of the noise permutation table
const NOISE_PERIOD: u32 = 256;

/// Build the starting grid: either a centred pattern or a noise fill
pub fn seeded_grid(settings: &LifeSettings) -> Grid {
    let extent = settings.extent();
    match settings.pattern {
        Some(pattern) => {
            let mut grid = Grid::new(extent);
            let origin = extent.saturating_sub(pattern.size()) / 2;
            grid.stamp(pattern, origin);
            grid
        }
        None => noise_grid(extent, settings.seed, settings.live_ratio),
    }
}

/// Fill a grid so each cell is live with probability `live_ratio`
///
/// Value noise sampled on integer lattice points is a per-cell hash. The
/// lattice repeats every 256 cells along each axis, so every 256x256 tile
/// gets its own permutation table, seeded from `seed` and the tile index.
pub fn noise_grid(extent: UVec2, seed: u32, live_ratio: f64) -> Grid {
    let mut grid = Grid::new(extent);
    if live_ratio <= 0.0 {
        return grid;
    }

    let tiles = UVec2::new(
        extent.x.div_ceil(NOISE_PERIOD),
        extent.y.div_ceil(NOISE_PERIOD),
    );
    for tile_y in 0..tiles.y {
        for tile_x in 0..tiles.x {
            let tile = tile_y * tiles.x + tile_x;
            let value = Value::new(tile_seed(seed, tile));
            let origin = UVec2::new(tile_x, tile_y) * NOISE_PERIOD;
            let end = (origin + NOISE_PERIOD).min(extent);

            for y in origin.y..end.y {
                for x in origin.x..end.x {
                    let sample = value.get([(x - origin.x) as f64, (y - origin.y) as f64]);
                    let uniform = ((sample + 1.0) * 0.5).clamp(0.0, 1.0);
                    if uniform <= live_ratio {
                        grid.set_alive(UVec2::new(x, y), true);
                    }
                }
            }
        }
    }

    grid
}

/// Distinct permutation seed per tile; tile 0 keeps the user seed
fn tile_seed(seed: u32, tile: u32) -> u32 {
    seed.wrapping_add(tile.wrapping_mul(0x9E37_79B9))
}

/// Upload the grid as the texture shared by the kernels and the sprite
///
/// The image lives only in the render world, so no host copy survives
/// the upload.
pub fn create_grid_texture(grid: &Grid, images: &mut Assets<Image>) -> Handle<Image> {
    let extent = grid.extent();
    let mut image = Image::new(
        Extent3d {
            width: extent.x,
            height: extent.y,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        grid.as_bytes().to_vec(),
        TextureFormat::Rgba32Float,
        RenderAssetUsages::RENDER_WORLD,
    );

    // Storage binding for the kernels, texture binding for the sprite
    image.texture_descriptor.usage =
        TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
    image.sampler = ImageSampler::nearest();

    images.add(image)
}
