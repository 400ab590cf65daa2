//! # Modelo de Spans
//!
//! Estruturas centrais do anotador:
//!
//! - [`Sentence`]: sequência de [`Token`]s + [`AttributeStore`] colunar.
//! - [`Annotation`]: span `(begin, end, category)` sobre os tokens de uma sentença
//!   (`end` inclusivo), com cabeça opcional e canal.
//! - [`AnnotationCluster`]: menções que se referem à mesma entidade, com uma cabeça.
//! - [`Relation`]: aresta tipada `(from, to, kind)` entre anotações do documento.
//! - [`Document`]: sentenças, todas as anotações e todas as relações.
//!
//! ## Ciclo de vida
//!
//! Tokens e sentenças são criados uma vez, quando o documento é carregado; depois disso
//! apenas valores de atributos mudam. Anotações são criadas por chunkers e podem ser
//! removidas pela fusão de chunks. Relações e clusters são criados somente pelo
//! resolvedor de correferência.
//!
//! Anotações são guardadas numa arena indexada por [`AnnotationId`]; ids nunca são
//! reutilizados, então uma relação nunca passa a apontar para outra anotação.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attributes::{AttributeKey, AttributeStore};
use crate::error::{AnotadorError, Result};
use crate::tokenizer::{split_sentences, Token};

/// Atributo com a forma ortográfica, registrado para toda sentença.
pub const ORTH: &str = "orth";

/// Identificador estável de uma anotação dentro do documento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub usize);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Uma sentença: tokens em ordem e a tabela de atributos deles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawSentence")]
pub struct Sentence {
    pub id: String,
    pub tokens: Vec<Token>,
    pub attributes: AttributeStore,
}

/// Sentença vinda de fora; a tabela de atributos é opcional.
#[derive(Deserialize)]
struct RawSentence {
    #[serde(default)]
    id: String,
    tokens: Vec<Token>,
    #[serde(default)]
    attributes: Option<AttributeStore>,
}

impl From<RawSentence> for Sentence {
    fn from(raw: RawSentence) -> Self {
        let Some(attributes) = raw.attributes else {
            return Sentence::new(raw.id, raw.tokens);
        };
        let mut sentence = Sentence {
            id: raw.id,
            tokens: raw.tokens,
            attributes,
        };
        for (i, token) in sentence.tokens.iter_mut().enumerate() {
            token.index = i;
        }
        // tabela de tamanho errado fica como está para `Document::validate` rejeitar
        if sentence.attributes.lookup(ORTH).is_none()
            && sentence.attributes.token_count() == sentence.tokens.len()
        {
            sentence.fill_orth();
        }
        sentence
    }
}

impl Sentence {
    /// Cria a sentença e registra o atributo `orth` de cada token.
    pub fn new(id: impl Into<String>, mut tokens: Vec<Token>) -> Self {
        for (i, token) in tokens.iter_mut().enumerate() {
            token.index = i;
        }
        let mut sentence = Self {
            id: id.into(),
            attributes: AttributeStore::new(tokens.len()),
            tokens,
        };
        sentence.fill_orth();
        sentence
    }

    /// Atalho para testes e fixtures: sentença a partir das formas ortográficas.
    pub fn from_orths(id: impl Into<String>, orths: &[&str]) -> Self {
        let tokens = orths
            .iter()
            .enumerate()
            .map(|(i, orth)| Token::new(*orth, i))
            .collect();
        Self::new(id, tokens)
    }

    fn fill_orth(&mut self) {
        let orth = self.attributes.index(ORTH);
        for (i, token) in self.tokens.iter().enumerate() {
            // `i` sempre está dentro da tabela: ela foi criada com `tokens.len()` posições
            let _ = self.attributes.set(i, orth, token.orth.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Valor de um atributo de um token (`None` se ausente).
    pub fn attribute<'k>(&self, token: usize, key: impl Into<AttributeKey<'k>>) -> Option<&str> {
        self.attributes.get(token, key)
    }

    /// Forma ortográfica do token `i`.
    pub fn orth(&self, i: usize) -> Option<&str> {
        self.tokens.get(i).map(|t| t.orth.as_str())
    }
}

/// Proposta de anotação emitida por um chunker, ainda sem id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proposal {
    pub begin: usize,
    /// Último token (inclusivo).
    pub end: usize,
    pub category: String,
    #[serde(default)]
    pub head: Option<usize>,
    #[serde(default)]
    pub channel: usize,
}

impl Proposal {
    pub fn new(begin: usize, end: usize, category: impl Into<String>) -> Self {
        Self {
            begin,
            end,
            category: category.into(),
            head: None,
            channel: 0,
        }
    }

    pub fn with_head(mut self, head: usize) -> Self {
        self.head = Some(head);
        self
    }

    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    /// Quantidade de tokens; 0 para spans invertidos.
    pub fn len(&self) -> usize {
        self.end.saturating_add(1).saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.begin
    }
}

/// Um span rotulado de tokens contíguos dentro de uma sentença.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    /// Índice da sentença no documento.
    pub sentence: usize,
    pub begin: usize,
    /// Último token (inclusivo).
    pub end: usize,
    pub category: String,
    /// Token cabeça (absoluto na sentença), se designado.
    #[serde(default)]
    pub head: Option<usize>,
    /// Camada de anotação; permite rótulos simultâneos sobre os mesmos tokens.
    #[serde(default)]
    pub channel: usize,
    /// Chunker que propôs a anotação.
    #[serde(default)]
    pub source: String,
}

impl Annotation {
    /// Quantidade de tokens cobertos.
    pub fn len(&self) -> usize {
        self.end.saturating_add(1).saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn tokens(&self) -> RangeInclusive<usize> {
        self.begin..=self.end
    }

    /// Token cabeça; sem cabeça designada, o primeiro token do span.
    pub fn head_token(&self) -> usize {
        self.head.unwrap_or(self.begin)
    }

    /// Duas anotações se sobrepõem sse seus conjuntos de tokens se intersectam.
    pub fn overlaps(&self, other: &Annotation) -> bool {
        self.sentence == other.sentence && self.begin <= other.end && other.begin <= self.end
    }

    /// Chave de ordem textual: sentença, início, fim, id.
    pub fn order_key(&self) -> (usize, usize, usize, AnnotationId) {
        (self.sentence, self.begin, self.end, self.id)
    }

    /// Indica se `self` vem antes de `other` na ordem do texto.
    pub fn precedes(&self, other: &Annotation) -> bool {
        self.order_key() < other.order_key()
    }
}

/// Aresta dirigida e tipada entre duas anotações.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub from: AnnotationId,
    pub to: AnnotationId,
    pub kind: String,
    /// Conjunto de relações ao qual esta pertence (ex: "coreference").
    #[serde(default)]
    pub set: String,
}

impl Relation {
    /// Tipo reservado das relações criadas pelo resolvedor de correferência.
    pub const COREFERENCE: &'static str = "coreference";

    pub fn new(from: AnnotationId, to: AnnotationId, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            from,
            to,
            set: kind.clone(),
            kind,
        }
    }

    pub fn coreference(from: AnnotationId, to: AnnotationId) -> Self {
        Self::new(from, to, Self::COREFERENCE)
    }

    pub fn is_coreference(&self) -> bool {
        self.kind == Self::COREFERENCE
    }
}

/// Menções que se acredita referirem à mesma entidade.
///
/// A ordem das menções é a ordem de inclusão; como o resolvedor percorre o texto da
/// esquerda para a direita, ela coincide com a ordem textual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationCluster {
    head: AnnotationId,
    mentions: Vec<AnnotationId>,
}

impl AnnotationCluster {
    /// Cria um cluster unitário cuja cabeça é `head`.
    pub fn new(head: AnnotationId) -> Self {
        Self {
            head,
            mentions: vec![head],
        }
    }

    pub fn head(&self) -> AnnotationId {
        self.head
    }

    pub fn mentions(&self) -> &[AnnotationId] {
        &self.mentions
    }

    pub fn len(&self) -> usize {
        self.mentions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }

    pub fn contains(&self, id: AnnotationId) -> bool {
        self.mentions.contains(&id)
    }

    pub fn push(&mut self, id: AnnotationId) {
        if !self.contains(id) {
            self.mentions.push(id);
        }
    }

    /// A menção do cluster mais próxima que precede `mention` no documento.
    pub fn closest_preceding<'d>(
        &self,
        document: &'d Document,
        mention: &Annotation,
    ) -> Option<&'d Annotation> {
        self.mentions
            .iter()
            .filter_map(|id| document.annotation(*id))
            .filter(|candidate| candidate.precedes(mention))
            .max_by_key(|candidate| candidate.order_key())
    }
}

/// Documento: sentenças, anotações e relações.
///
/// Invariante: toda anotação referenciada por uma relação pertence a uma sentença
/// deste documento. [`Document::validate`] verifica isso e os limites dos spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDocument")]
pub struct Document {
    pub id: String,
    sentences: Vec<Sentence>,
    #[serde(serialize_with = "serialize_arena")]
    annotations: BTreeMap<AnnotationId, Annotation>,
    relations: Vec<Relation>,
    next_id: usize,
    /// Posição global do primeiro token de cada sentença.
    #[serde(skip_serializing)]
    offsets: Vec<usize>,
}

fn serialize_arena<S>(
    arena: &BTreeMap<AnnotationId, Annotation>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(arena.values())
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    id: String,
    sentences: Vec<Sentence>,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(default)]
    relations: Vec<Relation>,
    #[serde(default)]
    next_id: usize,
}

impl TryFrom<RawDocument> for Document {
    type Error = AnotadorError;

    fn try_from(raw: RawDocument) -> Result<Self> {
        let mut document = Document::new(raw.id, raw.sentences);
        let max_id = raw.annotations.iter().map(|a| a.id.0 + 1).max().unwrap_or(0);
        for annotation in raw.annotations {
            if document.annotations.insert(annotation.id, annotation).is_some() {
                return Err(AnotadorError::invalid_document("id de anotação repetido"));
            }
        }
        document.next_id = raw.next_id.max(max_id);
        document.relations = raw.relations;
        document.validate()?;
        Ok(document)
    }
}

impl Document {
    pub fn new(id: impl Into<String>, sentences: Vec<Sentence>) -> Self {
        let mut offsets = Vec::with_capacity(sentences.len());
        let mut total = 0;
        for sentence in &sentences {
            offsets.push(total);
            total += sentence.len();
        }
        Self {
            id: id.into(),
            sentences,
            annotations: BTreeMap::new(),
            relations: Vec::new(),
            next_id: 0,
            offsets,
        }
    }

    /// Monta um documento a partir de texto puro (uma sentença por fronteira detectada).
    pub fn from_text(id: impl Into<String>, text: &str) -> Self {
        let sentences = split_sentences(text)
            .into_iter()
            .enumerate()
            .map(|(i, tokens)| Sentence::new(format!("s{}", i + 1), tokens))
            .collect();
        Self::new(id, sentences)
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentence(&self, index: usize) -> Option<&Sentence> {
        self.sentences.get(index)
    }

    /// Acesso mutável à sentença, para escrita de atributos.
    pub fn sentence_mut(&mut self, index: usize) -> Option<&mut Sentence> {
        self.sentences.get_mut(index)
    }

    /// Total de tokens do documento.
    pub fn token_count(&self) -> usize {
        self.sentences.iter().map(Sentence::len).sum()
    }

    /// Posição de um token contando desde o início do documento.
    pub fn global_position(&self, sentence: usize, token: usize) -> usize {
        self.offsets.get(sentence).copied().unwrap_or(0) + token
    }

    /// Distância em tokens entre duas anotações (0 se se sobrepõem).
    pub fn token_distance(&self, a: &Annotation, b: &Annotation) -> usize {
        let (a_begin, a_end) = (
            self.global_position(a.sentence, a.begin),
            self.global_position(a.sentence, a.end),
        );
        let (b_begin, b_end) = (
            self.global_position(b.sentence, b.begin),
            self.global_position(b.sentence, b.end),
        );
        if a_end < b_begin {
            b_begin - a_end
        } else if b_end < a_begin {
            a_begin - b_end
        } else {
            0
        }
    }

    /// Valida e adiciona uma proposta à sentença indicada.
    pub fn add_annotation(&mut self, sentence: usize, proposal: Proposal) -> Result<AnnotationId> {
        self.add_annotation_from(sentence, proposal, "")
    }

    /// Como [`Document::add_annotation`], registrando o chunker de origem.
    pub fn add_annotation_from(
        &mut self,
        sentence: usize,
        proposal: Proposal,
        source: &str,
    ) -> Result<AnnotationId> {
        let id = AnnotationId(self.next_id);
        let annotation = Annotation {
            id,
            sentence,
            begin: proposal.begin,
            end: proposal.end,
            category: proposal.category,
            head: proposal.head,
            channel: proposal.channel,
            source: source.to_string(),
        };
        self.check_annotation(&annotation)?;
        self.annotations.insert(id, annotation);
        self.next_id += 1;
        Ok(id)
    }

    /// Remove uma anotação. Relações que a referenciam são removidas junto.
    pub fn remove_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        let removed = self.annotations.remove(&id)?;
        let before = self.relations.len();
        self.relations.retain(|r| r.from != id && r.to != id);
        if self.relations.len() != before {
            debug!(
                annotation = %id,
                dropped = before - self.relations.len(),
                "relações removidas junto com a anotação"
            );
        }
        Some(removed)
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    /// Todas as anotações, na ordem de criação.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// Anotações de uma sentença, ordenadas por posição.
    pub fn annotations_in(&self, sentence: usize) -> Vec<&Annotation> {
        let mut found: Vec<&Annotation> = self
            .annotations
            .values()
            .filter(|a| a.sentence == sentence)
            .collect();
        found.sort_by_key(|a| a.order_key());
        found
    }

    /// Todas as anotações na ordem do texto.
    pub fn annotations_in_order(&self) -> Vec<&Annotation> {
        let mut all: Vec<&Annotation> = self.annotations.values().collect();
        all.sort_by_key(|a| a.order_key());
        all
    }

    /// Texto do span (formas ortográficas separadas por espaço).
    pub fn span_text(&self, annotation: &Annotation) -> String {
        let Some(sentence) = self.sentence(annotation.sentence) else {
            return String::new();
        };
        annotation
            .tokens()
            .filter_map(|i| sentence.orth(i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Verifica se o token `token` da sentença é coberto por uma anotação da categoria.
    pub fn is_chunk_at(&self, sentence: usize, token: usize, category: &str) -> bool {
        self.annotations
            .values()
            .any(|a| a.sentence == sentence && a.category == category && a.tokens().contains(&token))
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Relações de um tipo específico.
    pub fn relations_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    /// Adiciona uma relação; ambos os extremos precisam existir no documento.
    pub fn add_relation(&mut self, relation: Relation) -> Result<()> {
        for end in [relation.from, relation.to] {
            if !self.annotations.contains_key(&end) {
                return Err(AnotadorError::invalid_document(format!(
                    "relação '{}' referencia anotação inexistente {end}",
                    relation.kind
                )));
            }
        }
        self.relations.push(relation);
        Ok(())
    }

    fn check_annotation(&self, annotation: &Annotation) -> Result<()> {
        let Some(sentence) = self.sentences.get(annotation.sentence) else {
            return Err(AnotadorError::invalid_document(format!(
                "anotação {} referencia sentença inexistente {}",
                annotation.id, annotation.sentence
            )));
        };
        if annotation.begin > annotation.end || annotation.end >= sentence.len() {
            return Err(AnotadorError::invalid_document(format!(
                "anotação {} [{}, {}] fora da sentença '{}' ({} tokens)",
                annotation.id,
                annotation.begin,
                annotation.end,
                sentence.id,
                sentence.len()
            )));
        }
        if let Some(head) = annotation.head {
            if !annotation.tokens().contains(&head) {
                return Err(AnotadorError::invalid_document(format!(
                    "cabeça {head} fora do span da anotação {}",
                    annotation.id
                )));
            }
        }
        if annotation.category.is_empty() {
            return Err(AnotadorError::invalid_document(format!(
                "anotação {} sem categoria",
                annotation.id
            )));
        }
        Ok(())
    }

    /// Verifica todos os invariantes do modelo de spans.
    pub fn validate(&self) -> Result<()> {
        for sentence in &self.sentences {
            if sentence.attributes.token_count() != sentence.len() {
                return Err(AnotadorError::invalid_document(format!(
                    "tabela de atributos da sentença '{}' cobre {} tokens, esperado {}",
                    sentence.id,
                    sentence.attributes.token_count(),
                    sentence.len()
                )));
            }
        }
        for (id, annotation) in &self.annotations {
            if *id != annotation.id || id.0 >= self.next_id {
                return Err(AnotadorError::invalid_document(format!(
                    "id de anotação inconsistente {id}"
                )));
            }
            self.check_annotation(annotation)?;
        }
        for relation in &self.relations {
            for end in [relation.from, relation.to] {
                if !self.annotations.contains_key(&end) {
                    return Err(AnotadorError::invalid_document(format!(
                        "relação '{}' referencia anotação inexistente {end}",
                        relation.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(
            "d1",
            vec![
                Sentence::from_orths("s1", &["Jan", "poszedł", "do", "szkoły"]),
                Sentence::from_orths("s2", &["Tam", "spotkał", "Marię"]),
            ],
        )
    }

    #[test]
    fn test_orth_attribute_registered() {
        let d = doc();
        let s = d.sentence(0).unwrap();
        assert_eq!(s.attribute(1, ORTH), Some("poszedł"));
        assert_eq!(s.attribute(1, "case"), None);
    }

    #[test]
    fn test_add_annotation_checks_bounds() {
        let mut d = doc();
        assert!(d.add_annotation(0, Proposal::new(0, 1, "PERSON")).is_ok());
        assert!(d.add_annotation(0, Proposal::new(2, 4, "PERSON")).is_err());
        assert!(d.add_annotation(5, Proposal::new(0, 0, "PERSON")).is_err());
        assert!(d.add_annotation(1, Proposal::new(0, 1, "X").with_head(2)).is_err());
        assert_eq!(d.annotation_count(), 1);
    }

    #[test]
    fn test_overlap_and_order() {
        let mut d = doc();
        let a = d.add_annotation(0, Proposal::new(0, 0, "PERSON")).unwrap();
        let b = d.add_annotation(0, Proposal::new(0, 1, "PERSON")).unwrap();
        let c = d.add_annotation(1, Proposal::new(2, 2, "PERSON")).unwrap();
        let (a, b, c) = (d.annotation(a).unwrap(), d.annotation(b).unwrap(), d.annotation(c).unwrap());
        assert!(a.overlaps(b));
        assert!(!a.overlaps(c));
        assert!(a.precedes(b));
        assert!(b.precedes(c));
        // "Jan" (global 0) e "Marię" (global 6)
        assert_eq!(d.token_distance(a, c), 6);
        assert_eq!(d.token_distance(a, b), 0);
    }

    #[test]
    fn test_remove_annotation_drops_relations() {
        let mut d = doc();
        let a = d.add_annotation(0, Proposal::new(0, 0, "PERSON")).unwrap();
        let b = d.add_annotation(1, Proposal::new(2, 2, "PERSON")).unwrap();
        d.add_relation(Relation::coreference(b, a)).unwrap();
        assert!(d.remove_annotation(a).is_some());
        assert!(d.relations().is_empty());
        assert!(d.add_relation(Relation::coreference(b, a)).is_err());
        // ids não são reutilizados
        let c = d.add_annotation(0, Proposal::new(3, 3, "PLACE")).unwrap();
        assert_ne!(c, a);
    }

    #[test]
    fn test_cluster_closest_preceding() {
        let mut d = doc();
        let jan = d.add_annotation(0, Proposal::new(0, 0, "PERSON")).unwrap();
        let tam = d.add_annotation(1, Proposal::new(0, 0, "PERSON")).unwrap();
        let maria = d.add_annotation(1, Proposal::new(2, 2, "PERSON")).unwrap();
        let mut cluster = AnnotationCluster::new(jan);
        cluster.push(tam);
        let mention = d.annotation(maria).unwrap();
        let closest = cluster.closest_preceding(&d, mention).unwrap();
        assert_eq!(closest.id, tam);
        let first = d.annotation(jan).unwrap();
        assert!(cluster.closest_preceding(&d, first).is_none());
    }

    #[test]
    fn test_json_roundtrip_validates() {
        let mut d = doc();
        let a = d.add_annotation(0, Proposal::new(0, 1, "PERSON")).unwrap();
        let b = d.add_annotation(1, Proposal::new(2, 2, "PERSON")).unwrap();
        d.add_relation(Relation::coreference(b, a)).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back.annotation_count(), 2);
        assert_eq!(back.relations().len(), 1);
        assert_eq!(back.global_position(1, 0), 4);

        let broken = json.replace("\"end\":2", "\"end\":9");
        assert!(serde_json::from_str::<Document>(&broken).is_err());
    }

    #[test]
    fn test_sentence_without_attributes_is_normalized() {
        let json = r#"{"sentences":[{"tokens":[{"orth":"Ala"},{"orth":"ma"}]}]}"#;
        let d: Document = serde_json::from_str(json).unwrap();
        assert_eq!(d.sentence(0).unwrap().attribute(1, ORTH), Some("ma"));
        assert_eq!(d.token_count(), 2);
    }
}
