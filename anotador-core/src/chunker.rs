//! # Chunkers: Propostas de Anotação
//!
//! Um [`Chunker`] recebe uma sentença e devolve propostas de spans rotulados.
//! Chunkers são compostos por uma lista explícita e ordenada, não por herança:
//!
//! ```text
//!   DictionaryChunker("nomes") ─┐
//!                               ├─ UnionChunker("todos") ── FixChunker("final", [FollowedBy, MinLength])
//!   DictionaryChunker("locais")─┘
//! ```
//!
//! - [`DictionaryChunker`]: busca de gazetteer (n-gramas) em todas as posições.
//! - [`UnionChunker`]: concatena as propostas de vários chunkers, na ordem configurada.
//! - [`FixChunker`]: envolve um chunker base e aplica estágios [`ChunkFix`] em sequência
//!   antes de as propostas chegarem à fusão de chunks.
//!
//! As propostas podem se sobrepor; resolver conflitos é trabalho de
//! [`ChunkMerger`](crate::merge::ChunkMerger).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{AnotadorError, Result};
use crate::model::{AnnotationId, Document, Proposal, Sentence};

/// Capacidade de marcação: propõe spans para uma sentença.
pub trait Chunker: Send + Sync {
    fn name(&self) -> &str;

    fn chunk(&self, sentence: &Sentence) -> Vec<Proposal>;
}

/// Estágio de pós-processamento de um [`FixChunker`].
pub trait ChunkFix: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, sentence: &Sentence, proposals: Vec<Proposal>) -> Vec<Proposal>;
}

/// Chunker de dicionário: cada entrada é uma frase (um ou mais tokens) e uma categoria.
///
/// Todas as entradas que casam em cada posição viram propostas, então "Jan" e
/// "Jan Kowalski" produzem dois spans sobrepostos.
#[derive(Debug, Clone)]
pub struct DictionaryChunker {
    name: String,
    case_sensitive: bool,
    /// (tokens da frase, categoria)
    entries: Vec<(Vec<String>, String)>,
}

impl DictionaryChunker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            case_sensitive: false,
            entries: Vec::new(),
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    fn normalize(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }

    /// Adiciona uma frase; frases vazias são ignoradas.
    pub fn add(&mut self, phrase: &str, category: &str) {
        let parts: Vec<String> = phrase.split_whitespace().map(|p| self.normalize(p)).collect();
        if !parts.is_empty() {
            self.entries.push((parts, category.to_string()));
        }
    }

    /// Carrega um dicionário de arquivo texto: uma entrada por linha, `frase<TAB>CATEGORIA`.
    ///
    /// Linhas vazias e iniciadas por `#` são ignoradas.
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let mut chunker = Self::new(name);
        chunker.extend_from_file(path)?;
        Ok(chunker)
    }

    /// Acrescenta as entradas de um arquivo e devolve quantas foram lidas.
    pub fn extend_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let before = self.entries.len();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((phrase, category)) = line.rsplit_once('\t') else {
                return Err(AnotadorError::config(format!(
                    "{}:{}: entrada sem categoria",
                    path.display(),
                    n + 1
                )));
            };
            self.add(phrase, category.trim());
        }
        let read = self.entries.len() - before;
        debug!(chunker = %self.name, entries = read, path = %path.display(), "dicionário carregado");
        Ok(read)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Categorias que o dicionário pode propor.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, c)| c.as_str())
    }
}

impl Chunker for DictionaryChunker {
    fn name(&self) -> &str {
        &self.name
    }

    fn chunk(&self, sentence: &Sentence) -> Vec<Proposal> {
        let words: Vec<String> = sentence.tokens.iter().map(|t| self.normalize(&t.orth)).collect();
        let mut proposals = Vec::new();
        for i in 0..words.len() {
            for (parts, category) in &self.entries {
                let end = i + parts.len();
                if end <= words.len() && words[i..end] == parts[..] {
                    proposals.push(Proposal::new(i, end - 1, category.clone()));
                }
            }
        }
        proposals
    }
}

/// União ordenada de chunkers. Propostas idênticas aparecem uma vez.
pub struct UnionChunker {
    name: String,
    members: Vec<Arc<dyn Chunker>>,
}

impl UnionChunker {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Chunker>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

impl Chunker for UnionChunker {
    fn name(&self) -> &str {
        &self.name
    }

    fn chunk(&self, sentence: &Sentence) -> Vec<Proposal> {
        let mut seen = HashSet::new();
        let mut proposals = Vec::new();
        for member in &self.members {
            for proposal in member.chunk(sentence) {
                if seen.insert(proposal.clone()) {
                    proposals.push(proposal);
                }
            }
        }
        proposals
    }
}

/// Chunker base seguido de estágios de correção aplicados em ordem.
pub struct FixChunker {
    name: String,
    base: Arc<dyn Chunker>,
    fixes: Vec<Box<dyn ChunkFix>>,
}

impl FixChunker {
    pub fn new(name: impl Into<String>, base: Arc<dyn Chunker>) -> Self {
        Self {
            name: name.into(),
            base,
            fixes: Vec::new(),
        }
    }

    pub fn with_fix(mut self, fix: Box<dyn ChunkFix>) -> Self {
        self.fixes.push(fix);
        self
    }

    /// Nomes dos estágios, na ordem de aplicação.
    pub fn stages(&self) -> Vec<&str> {
        self.fixes.iter().map(|f| f.name()).collect()
    }
}

impl Chunker for FixChunker {
    fn name(&self) -> &str {
        &self.name
    }

    /// Propostas malformadas (`end < begin`) não passam pelos estágios: seguem adiante
    /// para que o documento as rejeite.
    fn chunk(&self, sentence: &Sentence) -> Vec<Proposal> {
        let (malformed, mut proposals): (Vec<Proposal>, Vec<Proposal>) =
            self.base.chunk(sentence).into_iter().partition(Proposal::is_empty);
        for fix in &self.fixes {
            let before = proposals.len();
            proposals = fix.apply(sentence, proposals);
            if proposals.len() != before {
                debug!(
                    chunker = %self.name,
                    fix = fix.name(),
                    dropped = before.saturating_sub(proposals.len()),
                    "propostas filtradas"
                );
            }
        }
        proposals.extend(malformed);
        proposals
    }
}

/// Descarta propostas das categorias indicadas quando o token seguinte é uma das palavras
/// (ex: nomes seguidos do reflexivo "się" em polonês).
#[derive(Debug, Clone)]
pub struct FollowedByFilter {
    /// Categorias afetadas; vazio = todas.
    categories: Vec<String>,
    words: Vec<String>,
}

impl FollowedByFilter {
    pub fn new(categories: Vec<String>, words: Vec<String>) -> Self {
        let words = words.iter().map(|w| w.to_lowercase()).collect();
        Self { categories, words }
    }
}

impl ChunkFix for FollowedByFilter {
    fn name(&self) -> &str {
        "followed-by"
    }

    fn apply(&self, sentence: &Sentence, proposals: Vec<Proposal>) -> Vec<Proposal> {
        proposals
            .into_iter()
            .filter(|p| {
                let affected = self.categories.is_empty() || self.categories.contains(&p.category);
                let next = p
                    .end
                    .checked_add(1)
                    .and_then(|i| sentence.orth(i))
                    .map(str::to_lowercase);
                !(affected && next.is_some_and(|w| self.words.contains(&w)))
            })
            .collect()
    }
}

/// Mantém apenas as categorias listadas.
#[derive(Debug, Clone)]
pub struct CategoryFilter {
    keep: Vec<String>,
}

impl CategoryFilter {
    pub fn new(keep: Vec<String>) -> Self {
        Self { keep }
    }
}

impl ChunkFix for CategoryFilter {
    fn name(&self) -> &str {
        "category-filter"
    }

    fn apply(&self, _sentence: &Sentence, proposals: Vec<Proposal>) -> Vec<Proposal> {
        proposals
            .into_iter()
            .filter(|p| self.keep.contains(&p.category))
            .collect()
    }
}

/// Descarta spans com menos de `min` tokens.
#[derive(Debug, Clone, Copy)]
pub struct MinLengthFilter {
    min: usize,
}

impl MinLengthFilter {
    pub fn new(min: usize) -> Self {
        Self { min }
    }
}

impl ChunkFix for MinLengthFilter {
    fn name(&self) -> &str {
        "min-length"
    }

    fn apply(&self, _sentence: &Sentence, proposals: Vec<Proposal>) -> Vec<Proposal> {
        proposals.into_iter().filter(|p| p.len() >= self.min).collect()
    }
}

impl Document {
    /// Roda o chunker em todas as sentenças e adiciona as propostas como anotações.
    ///
    /// Uma proposta inválida (fora da sentença) rejeita o documento inteiro: as anotações
    /// já adicionadas nesta chamada são desfeitas.
    pub fn apply_chunker(&mut self, chunker: &dyn Chunker) -> Result<Vec<AnnotationId>> {
        let mut added = Vec::new();
        for index in 0..self.sentences().len() {
            let proposals = match self.sentence(index) {
                Some(sentence) => chunker.chunk(sentence),
                None => continue,
            };
            debug!(chunker = chunker.name(), sentence = index, proposals = proposals.len(), "chunk");
            for proposal in proposals {
                match self.add_annotation_from(index, proposal, chunker.name()) {
                    Ok(id) => added.push(id),
                    Err(e) => {
                        for id in added {
                            self.remove_annotation(id);
                        }
                        return Err(e);
                    }
                }
            }
        }
        Ok(added)
    }
}
