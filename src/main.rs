use ltfs_restore::cli::Cli;
use ltfs_restore::error::{RestoreError, Result};
use ltfs_restore::hardware::{RealTapeLibrary, TapeLibrary, TapeLibrarySimulator};
use ltfs_restore::s3::{DirEmitter, ObjectStore, S3Emitter};
use ltfs_restore::sim::{self, SimulationSpec};
use ltfs_restore::{config, logger, IndexStore, Restorer, StagingCache};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

const DEFAULT_DB: &str = "./db";
const DEFAULT_BLOCK_CACHE: &str = "cache";
const DEFAULT_VERSION_CACHE: &str = "versions";
const DEFAULT_RESTORE_DIR: &str = "restored";
const SIMULATION_FILES: &str = "tapes";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse_args();

    logger::init(args.verbose, args.log_file.to_str(), args.clean)?;

    debug!("ltfs-restore starting");

    match run(args).await {
        Ok(_) => {
            info!("run completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("run failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    // tape generation is its own mode; build the set and exit
    if args.simtapes > 0 {
        return generate_tapes(&args).await;
    }

    info!(
        "run parameters: simulate={} version={} database={} read={} s3={}",
        args.simulate, args.version, args.database, args.read, args.s3
    );

    let library: Arc<dyn TapeLibrary> = if args.simulate {
        Arc::new(TapeLibrarySimulator::new(SIMULATION_FILES, args.simdrives)?)
    } else {
        let config = config::load(&args.config)?;
        Arc::new(RealTapeLibrary::new(
            &config.library_device,
            &config.tape_devices,
        )?)
    };

    if args.verify {
        print_library(&library)?;
    }

    let emitter: Arc<dyn ObjectStore> = if args.s3 {
        Arc::new(S3Emitter::connect(&args.region, args.versioning).await?)
    } else {
        info!("S3 output disabled; restoring into {}/", DEFAULT_RESTORE_DIR);
        Arc::new(DirEmitter::new(DEFAULT_RESTORE_DIR))
    };

    let cache = StagingCache::open(DEFAULT_BLOCK_CACHE, args.clean)?;
    let index = Arc::new(IndexStore::open(DEFAULT_DB, cache, emitter, args.clean)?);
    let restorer = Arc::new(Restorer::new(library, index, DEFAULT_VERSION_CACHE));

    // the phases do blocking tape and database I/O; keep them off the
    // runtime's async workers
    let (version, database, read) = (args.version, args.database, args.read);
    tokio::task::spawn_blocking(move || -> Result<()> {
        if version {
            info!("**** phase 1: copying version files ****");
            restorer.harvest()?;
        }
        if database {
            info!("**** phase 2: building the database ****");
            restorer.build_index()?;
        }
        if read {
            info!("**** phase 3: reading packs ****");
            restorer.restore_all()?;
        }
        Ok(())
    })
    .await
    .map_err(|e| RestoreError::hardware(format!("phase worker failed: {}", e)))??;

    Ok(())
}

async fn generate_tapes(args: &Cli) -> Result<()> {
    let spec = SimulationSpec {
        tapes: args.simtapes,
        buckets: if args.simbuckets.is_empty() {
            SimulationSpec::default().buckets
        } else {
            args.simbuckets.clone()
        },
        blocks_per_object: args.simblocks.max(1),
        ..Default::default()
    };
    info!("**** creating {} simulated tapes ****", spec.tapes);
    let objects = sim::create_simulated_tapes(Path::new(SIMULATION_FILES), &spec)?;

    if args.sims3 {
        // seed the originals so a restored bucket can be compared later
        let emitter = Arc::new(S3Emitter::connect(&args.region, args.versioning).await?);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let scratch = Path::new(SIMULATION_FILES).join(".seed");
            fs::create_dir_all(&scratch)?;
            for object in &objects {
                let staged = scratch.join(&object.version);
                fs::write(&staged, &object.data)?;
                let source_bucket = format!("source-{}", object.bucket);
                emitter.put(&source_bucket, &object.object, &staged)?;
                fs::remove_file(&staged)?;
            }
            fs::remove_dir_all(&scratch)?;
            Ok(())
        })
        .await
        .map_err(|e| RestoreError::emitter(format!("seed worker failed: {}", e)))??;
    }
    Ok(())
}

fn print_library(library: &Arc<dyn TapeLibrary>) -> Result<()> {
    let (drives, cartridges) = library.audit()?;

    println!("\nCartridge\t\tSlot");
    for cartridge in &cartridges {
        println!("{:<18}\t{}", cartridge.name(), cartridge.slot());
    }

    println!("\nDrive\t\tCartridge");
    for drive in &drives {
        match drive.cartridge() {
            Some(cartridge) => println!("{:<14}\t{}", drive.name(), cartridge.name()),
            None => println!("{:<14}\tNo Cartridge", drive.name()),
        }
    }
    Ok(())
}
