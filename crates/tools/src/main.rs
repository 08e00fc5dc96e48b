use std::sync::Arc;

use clap::{Parser, Subcommand};
use foundation::math::{Vec2, Vec3, lonlat_to_mercator};
use imagery::{DataSetOptions, ObliqueCollection, ObliqueDataSet, ProjectionKind, ViewDirection};
use streaming::HttpFetcher;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect oblique imagery datasets")]
struct Args {
    /// Projection of the dataset's world coordinates
    #[arg(long, env = "OBLIQUE_PROJECTION", default_value = "EPSG:3857")]
    projection: String,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a dataset and summarise cameras, images and tiles
    Info {
        /// Dataset url (a directory or an image.json)
        #[arg(env = "OBLIQUE_URL")]
        url: String,
    },

    /// Find the best image for a ground coordinate and project it into that image
    Locate {
        #[arg(env = "OBLIQUE_URL")]
        url: String,

        /// Web mercator x, or longitude with --wgs84
        #[arg(long, allow_negative_numbers = true)]
        x: f64,

        /// Web mercator y, or latitude with --wgs84
        #[arg(long, allow_negative_numbers = true)]
        y: f64,

        #[arg(long, default_value = "north")]
        direction: ViewDirection,

        /// Read --x/--y as longitude/latitude in degrees
        #[arg(long)]
        wgs84: bool,
    },

    /// Project a pixel of a named image onto the ground
    Pixel {
        #[arg(env = "OBLIQUE_URL")]
        url: String,

        #[arg(long)]
        image: String,

        #[arg(long)]
        px: f64,

        #[arg(long)]
        py: f64,

        /// Ground plane height; defaults to the mean footprint height
        #[arg(long, allow_negative_numbers = true)]
        height: Option<f64>,

        /// Web mercator coordinate near the image, needed for tiled datasets: x,y
        #[arg(long, value_parser = parse_xy)]
        near: Option<Vec2>,
    },
}

fn parse_xy(s: &str) -> Result<Vec2, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got {s}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid number {v:?}: {e}"))
    };
    Ok(Vec2::new(parse(x)?, parse(y)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let projection: ProjectionKind =
        serde_json::from_value(serde_json::Value::String(args.projection.clone()))
            .map_err(|_| format!("unsupported projection: {}", args.projection))?;
    let fetcher = Arc::new(HttpFetcher::new());
    let open = |url: &str| {
        let options = DataSetOptions {
            url: url.to_string(),
            projection,
        };
        ObliqueDataSet::from_options(&options, fetcher.clone())
    };

    match args.command {
        Command::Info { url } => {
            let data_set = open(&url);
            data_set.load().await?;
            print_info(&data_set, args.json);
        }
        Command::Locate {
            url,
            x,
            y,
            direction,
            wgs84,
        } => {
            let coordinate = if wgs84 {
                lonlat_to_mercator(Vec3::new(x, y, 0.0)).xy()
            } else {
                Vec2::new(x, y)
            };
            let collection = ObliqueCollection::new("oblique", fetcher.clone());
            collection.add_data_set(Arc::new(open(&url))).await?;
            locate(&collection, coordinate, direction, args.json).await?;
        }
        Command::Pixel {
            url,
            image,
            px,
            py,
            height,
            near,
        } => {
            let data_set = open(&url);
            match near {
                Some(near) => data_set.load_data_for_coordinate(near).await?,
                None => data_set.load().await?,
            }
            let found = data_set
                .images()
                .into_iter()
                .find(|i| i.name() == image)
                .ok_or_else(|| format!("no loaded image named {image}"))?;
            let height = height.unwrap_or_else(|| found.average_height());
            let world = found.transform_pixel_to_world(Vec2::new(px, py), height)?;
            let ground = found.pixel_to_ground(Vec2::new(px, py), height)?;
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "image": found.name(),
                        "world": world.as_array(),
                        "mercator": ground.as_array(),
                    })
                );
            } else {
                println!("world\t{} {} {}", world.x, world.y, world.z);
                println!("mercator\t{} {} {}", ground.x, ground.y, ground.z);
            }
        }
    }

    Ok(())
}

fn print_info(data_set: &ObliqueDataSet, json: bool) {
    let cameras = data_set.camera_models();
    let images = data_set.images();
    let tiles = data_set.tile_states();
    info!(
        "loaded {} ({} cameras, {} images)",
        data_set.url(),
        cameras.len(),
        images.len()
    );

    if json {
        let tiles: serde_json::Map<String, serde_json::Value> = tiles
            .iter()
            .map(|(tile, state)| (tile.to_string(), serde_json::json!(state)))
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "url": data_set.url(),
                "tiled": data_set.is_tiled(),
                "tilingLevel": data_set.tiling_level(),
                "cameras": cameras.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                "images": images.len(),
                "tiles": tiles,
            })
        );
        return;
    }

    println!("url\t{}", data_set.url());
    match data_set.tiling_level() {
        Some(level) => println!("layout\ttiled (level {level}, {} tiles)", tiles.len()),
        None => println!("layout\tflat"),
    }
    println!("cameras\t{}", cameras.len());
    for camera in &cameras {
        println!(
            "  {}\t{}x{}",
            camera.name,
            camera.width(),
            camera.height()
        );
    }
    println!("images\t{}", images.len());
    for (tile, state) in &tiles {
        println!("  {tile}\t{state:?}");
    }
}

async fn locate(
    collection: &ObliqueCollection,
    coordinate: Vec2,
    direction: ViewDirection,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = collection
        .load_image_for_coordinate(coordinate, direction)
        .await
        .ok_or("no images loaded at this coordinate")?;

    let contains = image.contains_ground(coordinate);
    let height = image.average_height();
    let pixel = image.ground_to_pixel(Vec3::new(coordinate.x, coordinate.y, height))?;
    let state = collection.get_data_state_for_coordinate(coordinate);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "image": image.name(),
                "direction": image.view_direction(),
                "contains": contains,
                "pixel": [pixel.x, pixel.y],
                "state": state,
            })
        );
    } else {
        println!("image\t{} ({})", image.name(), image.view_direction());
        println!("contains\t{contains}");
        println!("pixel\t{} {}", pixel.x, pixel.y);
        println!("state\t{state:?}");
    }
    Ok(())
}
