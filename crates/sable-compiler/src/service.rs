//! service.rs — Service de compilation : un appel, un lot, tout ou rien.
//!
//! - Une instance de toolchain par **thread appelant**, tenue dans un pool
//!   explicite (créée paresseusement au premier appel, jamais démontée).
//!   Le pool rend le partage visible : une toolchain sortie du pool est
//!   inaccessible aux autres threads jusqu'à sa restitution.
//! - Le classpath hôte est injecté à la construction et propagé à chaque
//!   compilation : les fragments peuvent référencer les types visibles du
//!   processus hôte.
//! - Échec : diagnostics agrégés + texte de **toutes** les sources du lot
//!   (reproductibilité). Aucune réussite partielle.
//! - Dump optionnel (sources + classes) vers un répertoire d'inspection,
//!   configuré à la construction — jamais un état global.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use ahash::{AHashMap, AHashSet};
use log::{debug, trace};
use parking_lot::Mutex;
use thiserror::Error;

use crate::codegen::emit_batch;
use crate::diag::Diagnostics;
use crate::parser::parse_source;
use crate::resolve::resolve_batch;
use crate::vfs::{CompiledClass, OutputStore, Source, SourceFile};

/* ─────────────────────────── Classpath hôte ─────────────────────────── */

/// Vue du classpath du processus hôte : l'ensemble des FQN que les
/// fragments compilés ont le droit de référencer sans les déclarer.
pub trait Classpath: Send + Sync {
    fn contains(&self, fqn: &str) -> bool;
}

/// Classpath en extension, pratique pour les tests et la CLI.
#[derive(Debug, Default)]
pub struct SetClasspath {
    set: AHashSet<String>,
}

impl SetClasspath {
    /// Classpath minimal : uniquement la classe racine.
    pub fn with_root() -> Self {
        let mut s = Self::default();
        s.insert(sable_core::ROOT_CLASS);
        s
    }

    pub fn insert(&mut self, fqn: impl Into<String>) {
        self.set.insert(fqn.into());
    }
}

impl Classpath for SetClasspath {
    fn contains(&self, fqn: &str) -> bool {
        self.set.contains(fqn)
    }
}

/* ───────────────────────────── Options ───────────────────────────── */

/// Indicateurs passés à la toolchain pour un appel.
#[derive(Debug, Clone)]
pub struct CompileFlags {
    /// Génère les tables de lignes dans les chunks (activé par le service).
    pub debug_lines: bool,
}

impl Default for CompileFlags {
    fn default() -> Self {
        Self { debug_lines: true }
    }
}

/// Canal de dump : répertoire racine où écrire sources et classes.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub dir: PathBuf,
}

/// Configuration du service, passée à la construction.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// `Some(_)` active le canal de dump.
    pub dump: Option<DumpOptions>,
}

impl ServiceOptions {
    /// Construit depuis les défauts + ENV.
    ///
    /// ENV supportés (tous facultatifs) :
    ///   SABLE_DUMP=0|1        (défaut: 0)
    ///   SABLE_DUMP_DIR=<dir>  (requis si SABLE_DUMP=1)
    pub fn from_env() -> Self {
        let mut o = Self::default();
        let on = std::env::var("SABLE_DUMP").ok().and_then(|v| parse_bool(&v)).unwrap_or(false);
        if on {
            if let Ok(dir) = std::env::var("SABLE_DUMP_DIR") {
                o.dump = Some(DumpOptions { dir: PathBuf::from(dir) });
            }
        }
        o
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/* ───────────────────────────── Erreurs ───────────────────────────── */

/// Erreurs d'un appel de compilation. Le lot est atomique : aucune réussite
/// partielle, aucune relance interne.
#[derive(Debug, Error)]
pub enum CompileError {
    /// La toolchain a rejeté le lot. Porte le rapport agrégé et le texte de
    /// toutes les sources.
    #[error("compilation rejetée:\n{report}\n-- sources du lot --\n{sources}")]
    Rejected { report: String, sources: String },

    /// Appel « réussi » mais zéro artefact produit : erreur d'intégration.
    #[error("aucune classe produite ({expected} source(s) en entrée)")]
    NoOutput { expected: usize },

    /// Échec d'écriture du canal de dump. Fatal pour le dump, jamais
    /// avalé ; les artefacts déjà produits restent valides.
    #[error("échec d'écriture du dump: {0}")]
    Dump(#[from] std::io::Error),
}

/* ─────────────────────── Toolchain (par thread) ─────────────────────── */

/// Une instance de toolchain : front-end complet, confinée à un thread.
/// Réutilisée d'un appel à l'autre depuis le même thread.
#[derive(Debug, Default)]
pub struct Toolchain {
    /// Compteur d'appels servis par cette instance (logs/tests).
    runs: u64,
}

impl Toolchain {
    /// Compile un lot figé : parse tout, résout tout, émet tout.
    /// `Err` porte le rapport agrégé des diagnostics.
    pub fn compile_batch(
        &mut self,
        files: &[SourceFile],
        classpath: &dyn Classpath,
        flags: &CompileFlags,
        store: &mut OutputStore,
    ) -> Result<(), String> {
        self.runs += 1;
        trace!("toolchain run #{}: {} source(s)", self.runs, files.len());

        let mut diags = Diagnostics::default();
        let mut programs = Vec::with_capacity(files.len());
        for f in files {
            if let Some(p) = parse_source(&f.text, &f.name, &mut diags) {
                programs.push((f.name.clone(), p));
            }
        }

        if diags.is_empty() {
            let batch = resolve_batch(programs, classpath, &mut diags);
            if diags.is_empty() {
                emit_batch(&batch, classpath, flags, store, &mut diags);
            }
        }

        if diags.is_empty() {
            Ok(())
        } else {
            Err(diags.report())
        }
    }
}

/// Pool explicite de toolchains, une par identité de thread.
#[derive(Debug, Default)]
struct ContextPool {
    parked: Mutex<AHashMap<ThreadId, Toolchain>>,
}

impl ContextPool {
    /// Sort (ou crée) la toolchain du thread courant. Tant que la garde
    /// vit, aucun autre accès à cette instance n'est possible.
    fn checkout(&self) -> CtxGuard<'_> {
        let key = thread::current().id();
        let ctx = self.parked.lock().remove(&key).unwrap_or_else(|| {
            debug!("nouvelle toolchain pour {key:?}");
            Toolchain::default()
        });
        CtxGuard { pool: self, key, ctx: Some(ctx) }
    }

    fn len(&self) -> usize {
        self.parked.lock().len()
    }
}

/// Garde de restitution : remet la toolchain au pool en fin de vie.
struct CtxGuard<'a> {
    pool: &'a ContextPool,
    key: ThreadId,
    ctx: Option<Toolchain>,
}

impl std::ops::Deref for CtxGuard<'_> {
    type Target = Toolchain;
    fn deref(&self) -> &Toolchain {
        self.ctx.as_ref().expect("toolchain présente jusqu'au drop")
    }
}

impl std::ops::DerefMut for CtxGuard<'_> {
    fn deref_mut(&mut self) -> &mut Toolchain {
        self.ctx.as_mut().expect("toolchain présente jusqu'au drop")
    }
}

impl Drop for CtxGuard<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.parked.lock().insert(self.key, ctx);
        }
    }
}

/* ───────────────────────────── Service ───────────────────────────── */

/// Orchestrateur d'appels de compilation sur des lots en mémoire.
pub struct CompileService {
    classpath: Arc<dyn Classpath>,
    opts: ServiceOptions,
    pool: ContextPool,
}

impl CompileService {
    pub fn new(classpath: Arc<dyn Classpath>, opts: ServiceOptions) -> Self {
        Self { classpath, opts, pool: ContextPool::default() }
    }

    /// Compile un lot de sources et rend les classes produites, dans
    /// l'ordre de capture (pas l'ordre des entrées : les imbriquées
    /// s'intercalent).
    pub fn compile(&self, sources: &[Source]) -> Result<Vec<CompiledClass>, CompileError> {
        // fige le texte du lot (un appel de fournisseur par source)
        let files: Vec<SourceFile> =
            sources.iter().map(|s| SourceFile::new(s.name(), s.content())).collect();

        let mut store = OutputStore::default();
        let outcome = {
            let mut ctx = self.pool.checkout();
            let flags = CompileFlags::default();
            ctx.compile_batch(&files, self.classpath.as_ref(), &flags, &mut store)
        };

        if let Err(report) = outcome {
            // re-invoque les fournisseurs : le texte joint à l'erreur est
            // celui du moment du rapport, pas une copie cachée
            let sources_text: Vec<String> = sources.iter().map(Source::content).collect();
            return Err(CompileError::Rejected { report, sources: sources_text.join("\n") });
        }

        // accepte « autant que d'entrées » OU « au moins un » : les classes
        // imbriquées produisent légitimement plus d'artefacts que de
        // sources ; seul « zéro » trahit un appel incohérent.
        let produced = store.len();
        if !(produced == sources.len() || produced > 0) {
            return Err(CompileError::NoOutput { expected: sources.len() });
        }

        let units = store.into_units();
        debug!("lot compilé: {} source(s) → {} classe(s)", sources.len(), units.len());

        if self.opts.dump.is_some() {
            self.dump(sources, &units)?;
        }
        Ok(units)
    }

    /// Écrit sources et classes dans le répertoire de dump :
    /// `<dir>/sources/<nom points→soulignés>.src` et
    /// `<dir>/classes/<fqn points→soulignés>.bin`. No-op si le canal n'est
    /// pas configuré. Toute erreur d'E/S est fatale pour le dump.
    pub fn dump(&self, sources: &[Source], units: &[CompiledClass]) -> Result<(), CompileError> {
        let Some(dump) = &self.opts.dump else {
            return Ok(());
        };

        let src_dir = dump.dir.join("sources");
        std::fs::create_dir_all(&src_dir)?;
        for s in sources {
            let path = src_dir.join(format!("{}.src", s.name().replace('.', "_")));
            std::fs::write(&path, s.content())?;
            trace!("dump source → {}", path.display());
        }

        let cls_dir = dump.dir.join("classes");
        std::fs::create_dir_all(&cls_dir)?;
        for u in units {
            let path = cls_dir.join(format!("{}.bin", u.fqn.replace('.', "_")));
            std::fs::write(&path, &u.bytes)?;
            trace!("dump classe → {}", path.display());
        }
        Ok(())
    }

    /// Nombre de toolchains actuellement au repos dans le pool (une par
    /// thread ayant déjà compilé). Introspection pour logs et tests.
    pub fn pooled_contexts(&self) -> usize {
        self.pool.len()
    }
}

/* -------------------------------- Tests -------------------------------- */
