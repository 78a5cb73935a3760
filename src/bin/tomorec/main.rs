mod cli;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match args.command {

        Command::Reconstruct { input, out, fom } => {
            let (series, config) = load(&input, args.threads)?;
            create_parent_dir(&out)?;
            let progress = packing_bar(&series)?;
            let reconstruction = reconstruct(&series, &config, &progress)?;
            progress.finish_with_message("packed");
            reconstruction.volume.write_raw(&out)?;
            let [nx, ny, nz] = reconstruction.volume.dims;
            info!("Wrote {nx} x {ny} x {nz} voxels of {:.3} Å to {}", reconstruction.volume.voxel_size, out.display());
            if let Some(fom) = fom {
                raw::write(reconstruction.fom.into_iter(), &fom)?;
                info!("Wrote figure of merit to {}", fom.display());
            }
        },

        Command::Slabs { input, block, tiles, out, data_type, rescale, cut } => {
            let (series, config) = load(&input, args.threads)?;
            create_parent_dir(&block)?;
            create_parent_dir(&tiles)?;
            let progress = packing_bar(&series)?;
            let report = reconstruct_in_slabs(&series, &config, &block, &tiles, &progress)?;
            progress.finish_with_message("packed");
            let [nx, ny, nz] = report.block.dims();
            info!("Wrote {} slabs, {nx} x {ny} x {nz} complex voxels, to {}", report.slabs, block.display());
            info!("Reciprocal space coverage: {}", report.coverage);
            if let Some(out) = out {
                let Some(stats) = report.statistics else {
                    return Err(format!("slabs {}..{} do not cover the full depth: the block is not backtransformed in z",
                                       report.z.start, report.z.end).into())
                };
                create_parent_dir(&out)?;
                let options = WriteOptions { data_type, rescale, cut };
                let conversion = write_real_block(&report.block, &stats, &out, &options)?;
                info!("Wrote {data_type:?} map to {} (scale {:.4}, shift {:.4}, cut {:?})",
                      out.display(), conversion.scale, conversion.shift, conversion.cut);
            }
        },

        Command::Resolution { input, curve } => {
            let (series, config) = load(&input, args.threads)?;
            let estimate = series_resolution(&series, &config)?;
            println!("{:>8} {:>10} {:>12}", "id", "tilt (°)", "res (Å)");
            for mg in &estimate.micrographs {
                println!("{:>8} {:>10.2} {:>12.2}", mg.id, mg.tilt_angle.to_degrees(), mg.resolution);
            }
            if curve {
                println!("\n{:>12} {:>10}", "s (1/Å)", estimate.curve.metric);
                for (s, value) in estimate.curve.points() {
                    println!("{s:>12.5} {value:>10.4}");
                }
            }
            println!("\nResolution at {} cutoff: {:.2} Å", config.resolution.cutoff, estimate.resolution);
        },

        Command::Simulate { out, phantom, size: (w, h), pixel_size, max_tilt, step, axis, noise, seed } => {
            let phantom = match phantom {
                Some(path) => Phantom::read(&path)?,
                None       => default_phantom(w.min(h) as f64 * pixel_size),
            };
            let acquisition = Acquisition {
                dims: [w, h], pixel_size, tilt_axis: axis,
                tilts: tilt_range(max_tilt, step), noise, seed,
            };
            let series = phantom.tilt_series(&acquisition)?;
            create_parent_dir(&out)?;
            write_series(&series, &out)?;
            info!("Wrote {} micrographs of {} blobs to {}", series.len(), phantom.blobs.len(), out.display());
        },
    }
    Ok(())
}

/// Read the series and configuration files, and size the thread pool
fn load(input: &cli::Input, threads: Option<usize>) -> Result<(RawSeries, Config), Box<dyn Error>> {
    let config = read_config_file(&input.config)?;
    if let Some(n) = threads.or(config.threads) {
        rayon::ThreadPoolBuilder::new().num_threads(n).build_global()?;
    }
    let series = RawSeries::read(&input.series)?;
    info!("Read {} micrographs from {}", group_digits(series.micrographs().len()), input.series.display());
    Ok((series, config))
}

fn packing_bar(series: &RawSeries) -> Result<ProgressBar, Box<dyn Error>> {
    let bar = ProgressBar::new(series.micrographs().len() as u64);
    bar.set_style(ProgressStyle::default_bar()
                  .template("Packing micrograph: {msg}\n[{elapsed_precise}] {wide_bar} {pos}/{len} ({eta_precise})")?
    );
    bar.tick();
    Ok(bar)
}

// If the directory where results will be written does not exist yet, make it
fn create_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => create_dir_all(dir),
        _ => Ok(()),
    }
}

/// Three blobs of decreasing size, off the tilt axis, inside a field of view
/// of width `fov` Å
fn default_phantom(fov: f64) -> Phantom {
    let r = fov / 8.0;
    Phantom::new(vec![
        Blob { centre: [ 0.0,     0.0,  0.0    ], sigma: r / 2.0, amplitude: 1.0 },
        Blob { centre: [ 2.0 * r, r,    r / 2.0], sigma: r / 3.0, amplitude: 2.0 },
        Blob { centre: [-r,      -2.0 * r, -r  ], sigma: r / 4.0, amplitude: 3.0 },
    ])
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::{
    error::Error,
    fs::create_dir_all,
    path::Path,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;
use cli::{Cli, Command};
use tomorec::{
    ProjectionSource,
    backtransform::{write_real_block, WriteOptions},
    config::tomo::{read_config_file, Config},
    io::{raw, series::{write_series, RawSeries}},
    loo::series_resolution,
    phantom::{tilt_range, Acquisition, Blob, Phantom},
    reconstruct::reconstruct,
    slab::reconstruct_in_slabs,
    utils::group_digits,
};
