//! # Configuração do Pipeline
//!
//! Arquivo TOML com as categorias, a composição de chunkers, a prioridade da fusão
//! e o resolvedor de correferência:
//!
//! ```toml
//! categories = ["PERSON", "PLACE"]
//! chunker = "final"
//!
//! [[chunkers]]
//! name = "nomes"
//! kind = "dictionary"
//! entries = { PERSON = ["Jan", "Jan Kowalski"], PLACE = ["Warszawa"] }
//!
//! [[chunkers]]
//! name = "final"
//! kind = "fix"
//! base = "nomes"
//! fixes = [{ kind = "followed-by", categories = ["PERSON"], words = ["się"] }]
//!
//! [merge]
//! priority = ["PERSON", "PLACE"]
//!
//! [coreference]
//! mention_patterns = ["PERSON"]
//! features = ["clustermention_number_match", "clustermention_closest_preceding_distance"]
//! timeout_ms = 2000
//! classifier = { bias = -0.5, weights = { clustermention_number_match = 1.0 } }
//! ```
//!
//! Erros de configuração são fatais: [`PipelineConfig::validate`] roda antes de qualquer
//! documento ser processado.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunker::{
    CategoryFilter, ChunkFix, Chunker, DictionaryChunker, FixChunker, FollowedByFilter,
    MinLengthFilter, UnionChunker,
};
use crate::classifier::{Classifier, LinearClassifier};
use crate::error::{AnotadorError, Result};
use crate::features::{FeatureRegistry, InputKind};

/// Variável de ambiente com o caminho do arquivo de configuração.
pub const CONFIG_ENV: &str = "ANOTADOR_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Inventário de categorias conhecidas.
    pub categories: Vec<String>,
    #[serde(default)]
    pub chunkers: Vec<ChunkerConfig>,
    /// Chunker cuja saída alimenta a fusão (padrão: o último declarado).
    #[serde(default)]
    pub chunker: Option<String>,
    #[serde(default)]
    pub merge: Option<MergeConfig>,
    #[serde(default)]
    pub coreference: Option<CoreferenceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChunkerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChunkerKind {
    /// Gazetteer: `entries` em linha e/ou arquivo `path` (`frase<TAB>CATEGORIA`).
    Dictionary {
        #[serde(default)]
        entries: BTreeMap<String, Vec<String>>,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        case_sensitive: bool,
    },
    Union { members: Vec<String> },
    Fix {
        base: String,
        #[serde(default)]
        fixes: Vec<FixConfig>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FixConfig {
    FollowedBy {
        #[serde(default)]
        categories: Vec<String>,
        words: Vec<String>,
    },
    CategoryFilter { keep: Vec<String> },
    MinLength { min: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    pub priority: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreferenceConfig {
    pub mention_patterns: Vec<String>,
    pub features: Vec<String>,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Pesos em linha ou `model_path` para um modelo JSON de [`LinearClassifier`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
}

impl ClassifierConfig {
    pub fn build(&self) -> Result<Arc<dyn Classifier>> {
        let model = match &self.model_path {
            Some(path) => LinearClassifier::load(path)
                .map_err(|e| AnotadorError::config(format!("classificador {}: {e}", path.display())))?,
            None => LinearClassifier::new(self.weights.clone(), self.bias),
        };
        Ok(Arc::new(model))
    }
}

impl Default for PipelineConfig {
    /// Configuração embutida: categorias usuais, sem chunkers, fusão e correferência
    /// sobre pessoas com pesos fixos.
    fn default() -> Self {
        let categories: Vec<String> = ["PERSON", "PLACE", "ORGANIZATION"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            chunkers: Vec::new(),
            chunker: None,
            merge: Some(MergeConfig {
                priority: categories.clone(),
            }),
            coreference: Some(CoreferenceConfig {
                mention_patterns: vec!["PERSON".to_string()],
                features: vec![
                    "clustermention_number_match".to_string(),
                    "clustermention_head_base_match".to_string(),
                    "clustermention_closest_preceding_distance".to_string(),
                ],
                classifier: ClassifierConfig {
                    model_path: None,
                    weights: HashMap::from([
                        ("clustermention_number_match".to_string(), 0.5),
                        ("clustermention_head_base_match".to_string(), 1.0),
                        ("clustermention_closest_preceding_distance".to_string(), -0.02),
                    ]),
                    bias: -0.25,
                },
                timeout_ms: None,
            }),
            categories,
        }
    }
}

impl PipelineConfig {
    /// Parseia e valida.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), chunkers = config.chunkers.len(), "configuração carregada");
        Ok(config)
    }

    /// Carrega de `ANOTADOR_CONFIG` se definida; senão usa a configuração embutida.
    ///
    /// Um arquivo indicado mas inválido é erro, nunca é trocado pelo padrão.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) => {
                info!("{CONFIG_ENV} não definida, usando configuração embutida");
                Ok(Self::default())
            }
        }
    }

    fn check_category(&self, category: &str, context: &str) -> Result<()> {
        if self.categories.iter().any(|c| c == category) {
            Ok(())
        } else {
            Err(AnotadorError::config(format!(
                "{context}: categoria desconhecida '{category}'"
            )))
        }
    }

    /// Verifica referências, categorias e features.
    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(AnotadorError::config("nenhuma categoria declarada"));
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.as_str()) {
                return Err(AnotadorError::config(format!(
                    "categoria '{category}' declarada duas vezes"
                )));
            }
        }

        let mut names = HashSet::new();
        for chunker in &self.chunkers {
            if !names.insert(chunker.name.as_str()) {
                return Err(AnotadorError::config(format!(
                    "chunker '{}' declarado duas vezes",
                    chunker.name
                )));
            }
        }
        for chunker in &self.chunkers {
            let context = format!("chunker '{}'", chunker.name);
            match &chunker.kind {
                ChunkerKind::Dictionary { entries, .. } => {
                    for category in entries.keys() {
                        self.check_category(category, &context)?;
                    }
                }
                ChunkerKind::Union { members } => {
                    for member in members {
                        if !names.contains(member.as_str()) {
                            return Err(AnotadorError::config(format!(
                                "{context}: membro inexistente '{member}'"
                            )));
                        }
                    }
                }
                ChunkerKind::Fix { base, fixes } => {
                    if !names.contains(base.as_str()) {
                        return Err(AnotadorError::config(format!(
                            "{context}: chunker base inexistente '{base}'"
                        )));
                    }
                    for fix in fixes {
                        match fix {
                            FixConfig::FollowedBy { categories, .. } => {
                                for c in categories {
                                    self.check_category(c, &context)?;
                                }
                            }
                            FixConfig::CategoryFilter { keep } => {
                                for c in keep {
                                    self.check_category(c, &context)?;
                                }
                            }
                            FixConfig::MinLength { .. } => {}
                        }
                    }
                }
            }
        }
        // detecta ciclos
        for chunker in &self.chunkers {
            self.dependency_order(&chunker.name)?;
        }
        if let Some(name) = &self.chunker {
            if !names.contains(name.as_str()) {
                return Err(AnotadorError::config(format!("chunker '{name}' não declarado")));
            }
        }

        if let Some(merge) = &self.merge {
            if merge.priority.is_empty() {
                return Err(AnotadorError::config("lista de prioridade da fusão vazia"));
            }
            for category in &merge.priority {
                self.check_category(category, "merge")?;
            }
        }

        if let Some(coref) = &self.coreference {
            if coref.mention_patterns.is_empty() {
                return Err(AnotadorError::config("nenhum padrão de menção configurado"));
            }
            for pattern in &coref.mention_patterns {
                regex::Regex::new(pattern)?;
            }
            let registry = FeatureRegistry::with_builtins(&self.categories);
            let set = registry.select(&coref.features)?;
            if set.input_kind() != InputKind::ClusterMention {
                return Err(AnotadorError::config(
                    "features de correferência precisam ser ClusterMention",
                ));
            }
            if coref.classifier.model_path.is_none() {
                if let Some(unknown) = coref
                    .classifier
                    .weights
                    .keys()
                    .find(|k| !coref.features.iter().any(|f| k.split('=').next() == Some(f.as_str())))
                {
                    return Err(AnotadorError::config(format!(
                        "peso para coluna desconhecida '{unknown}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&ChunkerConfig> {
        self.chunkers.iter().find(|c| c.name == name)
    }

    /// Ordem em que os chunkers precisam ser montados para obter `name` (dependências antes).
    fn dependency_order(&self, name: &str) -> Result<Vec<&str>> {
        fn visit<'c>(
            config: &'c PipelineConfig,
            name: &str,
            stack: &mut Vec<String>,
            order: &mut Vec<&'c str>,
        ) -> Result<()> {
            if stack.iter().any(|n| n == name) {
                return Err(AnotadorError::config(format!(
                    "ciclo na composição de chunkers: {} -> {name}",
                    stack.join(" -> ")
                )));
            }
            let Some(chunker) = config.find(name) else {
                return Err(AnotadorError::config(format!("chunker '{name}' não declarado")));
            };
            if order.contains(&chunker.name.as_str()) {
                return Ok(());
            }
            stack.push(name.to_string());
            match &chunker.kind {
                ChunkerKind::Dictionary { .. } => {}
                ChunkerKind::Union { members } => {
                    for member in members {
                        visit(config, member, stack, order)?;
                    }
                }
                ChunkerKind::Fix { base, .. } => visit(config, base, stack, order)?,
            }
            stack.pop();
            order.push(chunker.name.as_str());
            Ok(())
        }

        let mut order = Vec::new();
        visit(self, name, &mut Vec::new(), &mut order)?;
        Ok(order)
    }

    /// Monta o chunker principal (`chunker` ou o último declarado). `None` sem chunkers.
    pub fn build_chunker(&self) -> Result<Option<Arc<dyn Chunker>>> {
        let Some(target) = self
            .chunker
            .as_deref()
            .or_else(|| self.chunkers.last().map(|c| c.name.as_str()))
        else {
            return Ok(None);
        };

        let mut built: HashMap<&str, Arc<dyn Chunker>> = HashMap::new();
        for name in self.dependency_order(target)? {
            let Some(config) = self.find(name) else {
                continue;
            };
            let get = |n: &str| {
                built
                    .get(n)
                    .cloned()
                    .ok_or_else(|| AnotadorError::config(format!("chunker '{n}' não montado")))
            };
            let chunker: Arc<dyn Chunker> = match &config.kind {
                ChunkerKind::Dictionary {
                    entries,
                    path,
                    case_sensitive,
                } => {
                    let mut dictionary = DictionaryChunker::new(name).case_sensitive(*case_sensitive);
                    if let Some(path) = path {
                        dictionary.extend_from_file(path)?;
                    }
                    for (category, phrases) in entries {
                        for phrase in phrases {
                            dictionary.add(phrase, category);
                        }
                    }
                    for category in dictionary.categories() {
                        self.check_category(category, &format!("dicionário '{name}'"))?;
                    }
                    Arc::new(dictionary)
                }
                ChunkerKind::Union { members } => {
                    let members = members.iter().map(|m| get(m)).collect::<Result<Vec<_>>>()?;
                    Arc::new(UnionChunker::new(name, members))
                }
                ChunkerKind::Fix { base, fixes } => {
                    let mut fix = FixChunker::new(name, get(base)?);
                    for stage in fixes {
                        fix = fix.with_fix(stage.build());
                    }
                    Arc::new(fix)
                }
            };
            built.insert(name, chunker);
        }
        Ok(built.remove(target))
    }
}

impl FixConfig {
    fn build(&self) -> Box<dyn ChunkFix> {
        match self {
            FixConfig::FollowedBy { categories, words } => {
                Box::new(FollowedByFilter::new(categories.clone(), words.clone()))
            }
            FixConfig::CategoryFilter { keep } => Box::new(CategoryFilter::new(keep.clone())),
            FixConfig::MinLength { min } => Box::new(MinLengthFilter::new(*min)),
        }
    }
}
