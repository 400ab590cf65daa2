//! # Codificação BIO
//!
//! Representa os spans de **uma** categoria como uma tag por token:
//!
//! - `B`: Begin, primeiro token de um span
//! - `I`: Inside, continuação do span iniciado antes
//! - `O`: Outside, token fora de qualquer span da categoria
//!
//! A tag de cada token depende só da cobertura dele e do token anterior: coberto após um
//! token coberto é `I`, coberto após um não coberto é `B`.
//!
//! Limitação conhecida: spans adjacentes da mesma categoria (`[0,1]` e `[2,2]`) viram
//! `B I I` e voltam da decodificação como um único span `[0,2]`. Spans sobrepostos também
//! se fundem. Só conjuntos com pelo menos um token de separação entre spans sobrevivem
//! intactos a codificar e decodificar.
//!
//! A decodificação é tolerante: um `I` sem `B`/`I` antes dele inicia um novo span.
//! Ela nunca falha.

use serde::{Deserialize, Serialize};

use crate::error::{AnotadorError, Result};
use crate::model::Document;

/// Tag BIO de um token, relativa a uma categoria-alvo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Primeiro token de um span.
    Begin,
    /// Continuação do span corrente.
    Inside,
    /// Fora de qualquer span.
    Outside,
}

impl Tag {
    /// Representação textual ("B", "I", "O"), a mesma gravada no atributo do token.
    pub fn label(&self) -> &'static str {
        match self {
            Tag::Begin => "B",
            Tag::Inside => "I",
            Tag::Outside => "O",
        }
    }

    /// Parseia "B", "I" ou "O". Aceita também o formato prefixado ("B-PER"), mas descarta
    /// a categoria: para rótulos prefixados de várias categorias use [`decode_labels_for`].
    pub fn from_label(s: &str) -> Option<Self> {
        match s.split('-').next()? {
            "B" => Some(Tag::Begin),
            "I" => Some(Tag::Inside),
            "O" => Some(Tag::Outside),
            _ => None,
        }
    }

    /// Verifica se a transição prev → next é válida no esquema BIO estrito.
    pub fn is_valid_transition(prev: Tag, next: Tag) -> bool {
        !(next == Tag::Inside && prev == Tag::Outside)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Codifica spans `(begin, end)` (fim inclusivo) de uma sentença de `len` tokens.
pub fn encode_spans(spans: &[(usize, usize)], len: usize) -> Vec<Tag> {
    let mut covered = vec![false; len];
    for &(begin, end) in spans {
        for flag in covered.iter_mut().take(end.saturating_add(1)).skip(begin) {
            *flag = true;
        }
    }
    tags_from_coverage(&covered)
}

/// Codifica as anotações de `category` na sentença `sentence` do documento.
pub fn encode(document: &Document, sentence: usize, category: &str) -> Vec<Tag> {
    let len = document.sentence(sentence).map(|s| s.len()).unwrap_or(0);
    let covered: Vec<bool> = (0..len)
        .map(|token| document.is_chunk_at(sentence, token, category))
        .collect();
    tags_from_coverage(&covered)
}

fn tags_from_coverage(covered: &[bool]) -> Vec<Tag> {
    covered
        .iter()
        .enumerate()
        .map(|(i, &current)| match (i > 0 && covered[i - 1], current) {
            (_, false) => Tag::Outside,
            (true, true) => Tag::Inside,
            (false, true) => Tag::Begin,
        })
        .collect()
}

/// Grava a codificação BIO de `category` no atributo `attribute` de cada token.
///
/// Retorna o índice do atributo na tabela da sentença.
pub fn write_attribute(
    document: &mut Document,
    sentence: usize,
    category: &str,
    attribute: &str,
) -> Result<usize> {
    let tags = encode(document, sentence, category);
    let target = document.sentence_mut(sentence).ok_or_else(|| {
        AnotadorError::invalid_document(format!("sentença {sentence} inexistente"))
    })?;
    let index = target.attributes.index(attribute);
    for (token, tag) in tags.iter().enumerate() {
        target.attributes.set(token, index, tag.label())?;
    }
    Ok(index)
}

/// Reconstrói os spans `(begin, end)` a partir das tags.
pub fn decode(tags: &[Tag]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;

    for (i, tag) in tags.iter().enumerate() {
        match tag {
            Tag::Begin => {
                if let Some(start) = current.take() {
                    spans.push((start, i - 1));
                }
                current = Some(i);
            }
            Tag::Inside => {
                // I sem span aberto: trata como B
                if current.is_none() {
                    current = Some(i);
                }
            }
            Tag::Outside => {
                if let Some(start) = current.take() {
                    spans.push((start, i - 1));
                }
            }
        }
    }
    if let Some(start) = current {
        spans.push((start, tags.len() - 1));
    }
    spans
}

/// Decodifica rótulos textuais; rótulos desconhecidos contam como `O`.
pub fn decode_labels(labels: &[&str]) -> Vec<(usize, usize)> {
    let tags: Vec<Tag> = labels
        .iter()
        .map(|l| Tag::from_label(l).unwrap_or(Tag::Outside))
        .collect();
    decode(&tags)
}

/// Decodifica rótulos prefixados ("B-PER", "I-LOC") considerando só `category`.
///
/// Rótulos de outras categorias contam como `O`, então `B-LOC I-PER` não vira um span.
pub fn decode_labels_for(labels: &[&str], category: &str) -> Vec<(usize, usize)> {
    let tags: Vec<Tag> = labels
        .iter()
        .map(|l| match l.split_once('-') {
            Some((_, c)) if c != category => Tag::Outside,
            Some(_) => Tag::from_label(l).unwrap_or(Tag::Outside),
            None => Tag::Outside,
        })
        .collect();
    decode(&tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Proposal, Sentence};

    #[test]
    fn test_encode_adjacent_spans_collapse() {
        let tags = encode_spans(&[(0, 1), (2, 2)], 4);
        assert_eq!(tags, vec![Tag::Begin, Tag::Inside, Tag::Inside, Tag::Outside]);
        assert_eq!(decode(&tags), vec![(0, 2)]);

        let tags = encode_spans(&[(0, 1), (3, 3)], 4);
        assert_eq!(decode(&tags), vec![(0, 1), (3, 3)]);
    }

    #[test]
    fn test_encode_document_uses_token_coverage() {
        let mut doc = Document::new("d", vec![Sentence::from_orths("s1", &["Jan", "Maria", "Piotr", "śpi"])]);
        doc.add_annotation(0, Proposal::new(0, 1, "PERSON")).unwrap();
        doc.add_annotation(0, Proposal::new(2, 2, "PERSON")).unwrap();
        let labels: Vec<&str> = encode(&doc, 0, "PERSON").iter().map(Tag::label).collect();
        assert_eq!(labels, vec!["B", "I", "I", "O"]);
        assert_eq!(encode(&doc, 0, "PLACE"), vec![Tag::Outside; 4]);
    }

    #[test]
    fn test_decode_lenient_inside() {
        let labels = ["I", "I", "O", "I", "B", "I"];
        assert_eq!(decode_labels(&labels), vec![(0, 1), (3, 3), (4, 5)]);
        assert_eq!(decode(&[]), Vec::<(usize, usize)>::new());
    }

    #[test]
    fn test_decode_labels_per_category() {
        let labels = ["B-LOC", "I-PER", "B-PER", "I-PER", "O"];
        assert_eq!(decode_labels_for(&labels, "PER"), vec![(1, 1), (2, 3)]);
        assert_eq!(decode_labels_for(&labels, "LOC"), vec![(0, 0)]);
        // sem filtro, a categoria é descartada: B-LOC I-PER vira um span só
        assert_eq!(decode_labels(&labels), vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn test_transitions() {
        assert!(Tag::is_valid_transition(Tag::Begin, Tag::Inside));
        assert!(!Tag::is_valid_transition(Tag::Outside, Tag::Inside));
        assert_eq!(Tag::from_label("B-PER"), Some(Tag::Begin));
        assert_eq!(Tag::from_label("X"), None);
    }

    #[test]
    fn test_write_attribute() {
        let mut doc = Document::new(
            "d",
            vec![Sentence::from_orths("s1", &["Jan", "Kowalski", "poszedł", "do", "Warszawy"])],
        );
        doc.add_annotation(0, Proposal::new(0, 1, "PERSON")).unwrap();
        doc.add_annotation(0, Proposal::new(4, 4, "PLACE")).unwrap();
        let index = write_attribute(&mut doc, 0, "PERSON", "is_person").unwrap();
        let s = doc.sentence(0).unwrap();
        let labels: Vec<&str> = (0..s.len()).map(|i| s.attribute(i, index).unwrap()).collect();
        assert_eq!(labels, vec!["B", "I", "O", "O", "O"]);
        assert!(write_attribute(&mut doc, 3, "PERSON", "is_person").is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Spans separados por pelo menos um token: cada par é (lacuna antes, tamanho - 1).
    fn arb_layout() -> impl Strategy<Value = (Vec<(usize, usize)>, usize)> {
        (proptest::collection::vec((1usize..4, 0usize..3), 0..6), 0usize..3).prop_map(|(parts, tail)| {
            let mut spans = Vec::new();
            let mut pos = 0;
            for (gap, extra) in parts {
                // o primeiro span pode começar no token 0
                let begin = if spans.is_empty() { pos + gap - 1 } else { pos + gap };
                spans.push((begin, begin + extra));
                pos = begin + extra + 1;
            }
            (spans, pos + tail)
        })
    }

    proptest! {
        #[test]
        fn prop_disjoint_spans_survive_encoding((spans, len) in arb_layout()) {
            let tags = encode_spans(&spans, len);
            prop_assert_eq!(tags.len(), len);
            prop_assert_eq!(decode(&tags), spans);
        }

        #[test]
        fn prop_encoded_transitions_are_valid((spans, len) in arb_layout()) {
            let tags = encode_spans(&spans, len);
            for pair in tags.windows(2) {
                prop_assert!(Tag::is_valid_transition(pair[0], pair[1]));
            }
        }
    }
}
