//! vfs.rs — Gestionnaire de fichiers **virtuel** : sources et sorties en
//! mémoire, aucun disque.
//!
//! Côté entrée, une source n'a pas de chemin : son identité est un nom
//! logique arbitraire (URI-like), et **aucune correspondance** n'est exigée
//! entre ce nom et les classes déclarées dans le texte — une source peut
//! déclarer n'importe quel FQN, seuls les noms déclarés comptent pour la
//! résolution ultérieure.
//!
//! Côté sortie, chaque classe produite (imbriquées comprises) demande son
//! propre puits d'octets ; le magasin retient **l'ordre des demandes**, et
//! c'est cet ordre que le service restitue au caller.

/// Fournisseur paresseux de texte source.
///
/// Le fournisseur est invoqué **à chaque fois** que le texte est nécessaire
/// (compilation, dump, rapport d'erreur) ; il n'est ni mis en cache ni
/// supposé pur.
pub struct Source {
    name: String,
    supplier: Box<dyn Fn() -> String + Send + Sync>,
}

impl Source {
    pub fn new(name: impl Into<String>, supplier: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self { name: name.into(), supplier: Box::new(supplier) }
    }

    /// Source à texte fixe (raccourci pour tests et CLI).
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(name, move || text.clone())
    }

    /// Nom logique — métadonnée consultative (dump, diagnostics), jamais
    /// utilisée pour résoudre les classes compilées.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoque le fournisseur et rend le texte courant.
    pub fn content(&self) -> String {
        (self.supplier)()
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Unité compilable en mémoire : identité logique + texte figé pour la
/// durée d'un appel de compilation.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { name: name.into(), text: text.into() }
    }
}

/// Un artefact compilé : FQN + octets de l'image encodée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledClass {
    pub fqn: String,
    pub bytes: Vec<u8>,
}

/// Magasin des sorties capturées pendant un appel de compilation.
#[derive(Debug, Default)]
pub struct OutputStore {
    slots: Vec<CompiledClass>,
}

impl OutputStore {
    /// Ouvre un puits pour la classe donnée et rend son tampon. L'ordre des
    /// appels est l'ordre restitué par `into_units`.
    pub fn create(&mut self, fqn: &str) -> &mut Vec<u8> {
        self.slots.push(CompiledClass { fqn: fqn.to_string(), bytes: Vec::new() });
        &mut self.slots.last_mut().expect("slot fraîchement poussé").bytes
    }

    /// Nombre de sorties capturées.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Consomme le magasin, dans l'ordre de capture.
    pub fn into_units(self) -> Vec<CompiledClass> {
        self.slots
    }
}

/* -------------------------------- Tests -------------------------------- */
