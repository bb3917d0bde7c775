//! Headless driver: build the layer tree a TOML scene describes, run its operations, and write
//! the merged image as a PNG.
//!
//! `stratum <scene.toml> [out.png]`

mod files;
mod operations;
mod scene;

use anyhow::Context;
use anyhow::Result as AnyResult;
use stratum_core::image::Image;
use stratum_core::manager::LayerManager;

fn main() -> AnyResult<()> {
    let has_term = std::io::IsTerminal::is_terminal(&std::io::stdin());
    // Log to a terminal, if available. Else, log to "log.out" in the working directory.
    if has_term {
        env_logger::builder().filter_level(log::LevelFilter::Debug).init();
    } else {
        let _ = simple_logging::log_to_file("log.out", log::LevelFilter::Debug);
    }

    let mut args = std::env::args_os().skip(1);
    let scene_path = std::path::PathBuf::from(args.next().context("usage: stratum <scene.toml> [out.png]")?);
    let base = scene_path
        .parent()
        .map(std::path::Path::to_path_buf)
        .unwrap_or_default();
    let scene = scene::Scene::load(&scene_path)?;
    let output = args
        .next()
        .map(std::path::PathBuf::from)
        .or_else(|| scene.output.as_ref().map(|output| base.join(output)))
        .unwrap_or_else(|| scene_path.with_extension("png"));

    let mut manager = LayerManager::new(Image::new(scene.image.document()?));
    manager.set_file_source(files::ImageFiles { base: base.clone() });

    let mut names = scene::build(&mut manager, &scene.layers)?;
    log::info!("built {} layers", names.len());
    for op in &scene.operations {
        operations::run(&mut manager, &mut names, &base, op)?;
    }

    let image = manager.image_mut().context("no image open")?;
    image.block_until_operations_finished();
    let merged = image.root_projection();
    files::write_png(&output, &merged, image.bounds(), image.color_space())?;
    log::debug!(
        "{} projections computed, {} steps of history",
        image.recomputations(),
        image.history_depth()
    );
    Ok(())
}
