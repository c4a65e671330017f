//! sable-cli/src/lib.rs — CLI pour Sable.
//!
//! Sous-commandes :
//!   - compile : compile des fichiers .sbl en artefacts .sblc
//!   - inspect : décrit un artefact .sblc (membres + désassemblage)
//!   - run     : compile, charge, instancie et invoque une méthode
//!
//! La machinerie reste en mémoire ; seul `compile` écrit des artefacts sur
//! disque (et le canal de dump si activé).

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use sable_compiler::{CompileService, DumpOptions, ServiceOptions, Source};
use sable_core::{decode_image, disasm};
use sable_runtime::{HostRegistry, Interp, IsolatedLoader, Loader};

/// Point d'entrée du binaire (à appeler depuis src/main.rs).
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Compile { files, out, dump, dump_dir } => cmd_compile(files, out, dump, dump_dir),
        Cmd::Inspect { file } => cmd_inspect(file),
        Cmd::Run { files, entry, method } => cmd_run(files, entry, method),
    }
}

#[derive(Parser, Debug)]
#[command(name = "sable", version, about = "Sable language tool")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compile des fichiers .sbl en artefacts .sblc (un par classe)
    Compile {
        /// Fichiers source .sbl
        files: Vec<PathBuf>,
        /// Répertoire de sortie des artefacts
        #[arg(long, default_value = "out")]
        out: PathBuf,
        /// Active le canal de dump (sources + classes)
        #[arg(long)]
        dump: bool,
        /// Répertoire du dump (requis avec --dump)
        #[arg(long)]
        dump_dir: Option<PathBuf>,
    },
    /// Décrit un artefact .sblc
    Inspect {
        /// Fichier artefact
        file: PathBuf,
    },
    /// Compile puis exécute : instancie `--entry` et invoque `--method`
    Run {
        /// Fichiers source .sbl
        files: Vec<PathBuf>,
        /// FQN de la classe d'entrée
        #[arg(long)]
        entry: String,
        /// Méthode sans argument à invoquer
        #[arg(long, default_value = "main")]
        method: String,
    },
}

/* ───────────────────────────── Commandes ───────────────────────────── */

fn read_sources(files: &[PathBuf]) -> Result<Vec<Source>> {
    if files.is_empty() {
        bail!("aucun fichier source fourni");
    }
    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("lecture {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map_or_else(|| path.display().to_string(), ToString::to_string);
        sources.push(Source::from_text(name, text));
    }
    Ok(sources)
}

/// Options de service : défauts + ENV, la CLI a le dernier mot.
fn service_options(dump: bool, dump_dir: Option<PathBuf>) -> Result<ServiceOptions> {
    let mut opts = ServiceOptions::from_env();
    if dump {
        let dir = dump_dir.context("--dump requiert --dump-dir")?;
        opts.dump = Some(DumpOptions { dir });
    }
    Ok(opts)
}

fn cmd_compile(
    files: Vec<PathBuf>,
    out: PathBuf,
    dump: bool,
    dump_dir: Option<PathBuf>,
) -> Result<()> {
    let sources = read_sources(&files)?;
    let registry = HostRegistry::new();
    let svc = CompileService::new(registry, service_options(dump, dump_dir)?);

    let units = svc.compile(&sources)?;
    info!("{} source(s) → {} classe(s)", sources.len(), units.len());

    fs::create_dir_all(&out).with_context(|| format!("création {}", out.display()))?;
    for u in &units {
        let path = out.join(format!("{}.sblc", u.fqn.replace('.', "_")));
        fs::write(&path, &u.bytes).with_context(|| format!("écriture {}", path.display()))?;
        println!("{}  ({} octets)", path.display(), u.bytes.len());
    }
    Ok(())
}

fn cmd_inspect(file: PathBuf) -> Result<()> {
    let bytes = fs::read(&file).with_context(|| format!("lecture {}", file.display()))?;
    let img = decode_image(&bytes).with_context(|| format!("décodage {}", file.display()))?;
    print!("{}", disasm::describe_image(&img));
    Ok(())
}

fn cmd_run(files: Vec<PathBuf>, entry: String, method: String) -> Result<()> {
    let sources = read_sources(&files)?;
    let registry = HostRegistry::new();
    let svc = CompileService::new(registry.clone(), ServiceOptions::from_env());

    let units = svc.compile(&sources)?;
    let loader = IsolatedLoader::new(registry, units);

    let class = loader.resolve(&entry)?;
    let mut interp = Interp::new(&loader);
    let instance = interp
        .instantiate(&class, &[])
        .with_context(|| format!("instanciation de {entry}"))?;
    let result = interp
        .invoke(&instance, &method, &[])
        .with_context(|| format!("invocation de {entry}::{method}"))?;

    print!("{}", interp.take_output());
    println!("→ {result}");
    Ok(())
}
