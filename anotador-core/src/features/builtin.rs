//! Features embutidas, agrupadas pelo formato de input.
//!
//! Todas leem os atributos morfológicos `base`, `case` e `number` dos tokens quando
//! presentes; na ausência deles a feature fica indefinida e vale o padrão do tipo.

use crate::model::{Annotation, Document};

use super::{Feature, FeatureValue, ValueKind};

/// Casos gramaticais (tagset do NKJP); `OTHER` é o padrão.
pub const CASES: &[&str] = &["nom", "gen", "dat", "acc", "inst", "loc", "voc", "OTHER"];

/// Número gramatical; `OTHER` é o padrão.
pub const NUMBERS: &[&str] = &["sg", "pl", "OTHER"];

/// Conjunções coordenativas do polonês (forma base).
pub const COORDINATE_CONJUNCTIONS: &[&str] = &[
    "a", "aczkolwiek", "albo", "ale", "ani", "bądź", "czy", "czyli", "dlatego", "i", "jednak",
    "lecz", "lub", "mianowicie", "natomiast", "ni", "oraz", "przeto", "tedy", "toteż", "tudzież",
    "więc", "zatem", "zaś",
];

const RELATIVE_PRONOUN_BASE: &str = "który";

/// Quantos tokens antes da menção procurar uma conjunção.
const CONJUNCTION_LOOKBACK: usize = 2;

const OTHER: &str = "OTHER";

/// Valor de um atributo no token cabeça da anotação.
pub fn head_attribute<'d>(document: &'d Document, annotation: &Annotation, name: &str) -> Option<&'d str> {
    document
        .sentence(annotation.sentence)?
        .attribute(annotation.head_token(), name)
}

/// Mapeia um valor livre para a enumeração fechada (`OTHER` se fora dela).
fn closed(value: &str, values: &[&str]) -> FeatureValue {
    let lower = value.to_lowercase();
    let v = values.iter().find(|v| **v == lower).copied().unwrap_or(OTHER);
    FeatureValue::Enum(v.to_string())
}

/// Todas as features embutidas.
pub fn all(categories: &[String]) -> Vec<Feature> {
    vec![
        annotation_length(),
        annotation_category(categories),
        annotation_preceding_relative_pronoun_case(),
        annotation_head_number(),
        pair_first_length(),
        pair_same_category(),
        pair_token_distance(),
        pair_same_base(),
        clustermention_number_match(),
        clustermention_closest_preceding_distance(),
        clustermention_closest_preceding_preceded_by_coord_conj(),
        clustermention_closest_preceding_number(),
        clustermention_cluster_size(),
        clustermention_head_base_match(),
    ]
}

// ── Anotação ────────────────────────────────────────────────────────────────

pub fn annotation_length() -> Feature {
    Feature::annotation("annotation_length", ValueKind::Int, |_, a| {
        Some(FeatureValue::Int(a.len() as i64))
    })
}

pub fn annotation_category(categories: &[String]) -> Feature {
    let mut values: Vec<String> = categories.iter().filter(|c| *c != OTHER).cloned().collect();
    values.push(OTHER.to_string());
    let kind = ValueKind::Enumeration {
        values: values.clone(),
        default: OTHER.to_string(),
    };
    Feature::annotation("annotation_category", kind, move |_, a| {
        let v = if values.contains(&a.category) { a.category.as_str() } else { OTHER };
        Some(FeatureValue::Enum(v.to_string()))
    })
}

/// Caso do último pronome relativo "który" antes da anotação, na mesma sentença.
pub fn annotation_preceding_relative_pronoun_case() -> Feature {
    Feature::annotation(
        "annotation_preceding_relative_pronoun_case",
        ValueKind::enumeration(CASES),
        |d, a| {
            let sentence = d.sentence(a.sentence)?;
            let mut found = FeatureValue::Enum(OTHER.to_string());
            for i in 0..a.begin {
                let is_pronoun = sentence
                    .attribute(i, "base")
                    .is_some_and(|b| b.to_lowercase() == RELATIVE_PRONOUN_BASE);
                if is_pronoun {
                    found = closed(sentence.attribute(i, "case").unwrap_or(OTHER), CASES);
                }
            }
            Some(found)
        },
    )
}

pub fn annotation_head_number() -> Feature {
    Feature::annotation("annotation_head_number", ValueKind::enumeration(NUMBERS), |d, a| {
        head_attribute(d, a, "number").map(|n| closed(n, NUMBERS))
    })
}

// ── Par de anotações ────────────────────────────────────────────────────────

pub fn pair_first_length() -> Feature {
    Feature::pair("pair_first_length", ValueKind::Int, |_, a, _| {
        Some(FeatureValue::Int(a.len() as i64))
    })
}

pub fn pair_same_category() -> Feature {
    Feature::pair("pair_same_category", ValueKind::Bool, |_, a, b| {
        Some(FeatureValue::Bool(a.category == b.category))
    })
}

pub fn pair_token_distance() -> Feature {
    Feature::pair("pair_token_distance", ValueKind::Int, |d, a, b| {
        Some(FeatureValue::Int(d.token_distance(a, b) as i64))
    })
}

pub fn pair_same_base() -> Feature {
    Feature::pair("pair_same_base", ValueKind::Bool, |d, a, b| {
        let (x, y) = (head_attribute(d, a, "base")?, head_attribute(d, b, "base")?);
        Some(FeatureValue::Bool(x.to_lowercase() == y.to_lowercase()))
    })
}

// ── Menção × cluster ────────────────────────────────────────────────────────

/// Fração das menções do cluster cujo número coincide com o da menção.
pub fn clustermention_number_match() -> Feature {
    Feature::cluster_mention("clustermention_number_match", ValueKind::Float, |d, m, c| {
        let Some(number) = head_attribute(d, m, "number") else {
            return Some(FeatureValue::Float(0.0));
        };
        let mut total = 0usize;
        let mut matches = 0usize;
        for other in c.mentions().iter().filter_map(|id| d.annotation(*id)) {
            total += 1;
            if head_attribute(d, other, "number").is_some_and(|n| n.eq_ignore_ascii_case(number)) {
                matches += 1;
            }
        }
        if total == 0 {
            return None;
        }
        Some(FeatureValue::Float(matches as f64 / total as f64))
    })
}

pub fn clustermention_closest_preceding_distance() -> Feature {
    Feature::cluster_mention(
        "clustermention_closest_preceding_distance",
        ValueKind::Int,
        |d, m, c| {
            let closest = c.closest_preceding(d, m)?;
            Some(FeatureValue::Int(d.token_distance(closest, m) as i64))
        },
    )
}

/// A menção mais próxima do cluster é precedida (até 2 tokens) por conjunção coordenativa.
pub fn clustermention_closest_preceding_preceded_by_coord_conj() -> Feature {
    Feature::cluster_mention(
        "clustermention_closest_preceding_preceded_by_coord_conj",
        ValueKind::Bool,
        |d, m, c| {
            let Some(closest) = c.closest_preceding(d, m) else {
                return Some(FeatureValue::Bool(false));
            };
            let sentence = d.sentence(closest.sentence)?;
            let start = closest.begin.saturating_sub(CONJUNCTION_LOOKBACK);
            let found = (start..closest.begin).any(|i| {
                sentence
                    .attribute(i, "base")
                    .is_some_and(|b| COORDINATE_CONJUNCTIONS.contains(&b))
            });
            Some(FeatureValue::Bool(found))
        },
    )
}

pub fn clustermention_closest_preceding_number() -> Feature {
    Feature::cluster_mention(
        "clustermention_closest_preceding_number",
        ValueKind::enumeration(NUMBERS),
        |d, m, c| {
            let closest = c.closest_preceding(d, m)?;
            head_attribute(d, closest, "number").map(|n| closed(n, NUMBERS))
        },
    )
}

pub fn clustermention_cluster_size() -> Feature {
    Feature::cluster_mention("clustermention_cluster_size", ValueKind::Int, |_, _, c| {
        Some(FeatureValue::Int(c.len() as i64))
    })
}

/// A base do token cabeça da menção coincide com a da cabeça do cluster.
pub fn clustermention_head_base_match() -> Feature {
    Feature::cluster_mention("clustermention_head_base_match", ValueKind::Bool, |d, m, c| {
        let head = d.annotation(c.head())?;
        let (x, y) = (head_attribute(d, m, "base")?, head_attribute(d, head, "base")?);
        Some(FeatureValue::Bool(x.to_lowercase() == y.to_lowercase()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureInput, FeatureRegistry};
    use crate::model::{AnnotationCluster, AnnotationId, Proposal, Sentence};

    /// "Jan i Piotr, który ich widział, lubią Marię"
    fn doc() -> (Document, Vec<AnnotationId>) {
        let mut s = Sentence::from_orths(
            "s1",
            &["Jan", "i", "Piotr", ",", "który", "ich", "widział", ",", "lubią", "Marię"],
        );
        let rows = [
            (0, "Jan", "nom", "sg"),
            (1, "i", "", ""),
            (2, "Piotr", "nom", "sg"),
            (4, "który", "nom", "sg"),
            (5, "on", "gen", "pl"),
            (9, "Maria", "acc", "sg"),
        ];
        for (i, base, case, number) in rows {
            s.attributes.set(i, "base", base).unwrap();
            if !case.is_empty() {
                s.attributes.set(i, "case", case).unwrap();
                s.attributes.set(i, "number", number).unwrap();
            }
        }
        let mut d = Document::new("d", vec![s]);
        let ids = [(0, 0), (2, 2), (5, 5), (9, 9)]
            .iter()
            .map(|(b, e)| d.add_annotation(0, Proposal::new(*b, *e, "PERSON")).unwrap())
            .collect();
        (d, ids)
    }

    fn registry() -> FeatureRegistry {
        FeatureRegistry::with_builtins(&["PERSON".to_string(), "PLACE".to_string()])
    }

    fn eval(name: &str, d: &Document, input: FeatureInput<'_>) -> FeatureValue {
        registry().get(name).unwrap().evaluate(d, &input).unwrap()
    }

    #[test]
    fn test_all_builtins_registered() {
        let r = registry();
        assert_eq!(r.len(), 14);
        assert_eq!(r.legal_values("annotation_category").unwrap().len(), 3);
        assert_eq!(r.legal_values("annotation_preceding_relative_pronoun_case").unwrap().len(), 8);
    }

    #[test]
    fn test_relative_pronoun_case() {
        let (d, ids) = doc();
        let ich = d.annotation(ids[2]).unwrap();
        let jan = d.annotation(ids[0]).unwrap();
        assert_eq!(
            eval("annotation_preceding_relative_pronoun_case", &d, FeatureInput::Annotation(ich)),
            FeatureValue::Enum("nom".into())
        );
        assert_eq!(
            eval("annotation_preceding_relative_pronoun_case", &d, FeatureInput::Annotation(jan)),
            FeatureValue::Enum("OTHER".into())
        );
    }

    #[test]
    fn test_category_and_number() {
        let (d, ids) = doc();
        let ich = d.annotation(ids[2]).unwrap();
        assert_eq!(
            eval("annotation_category", &d, FeatureInput::Annotation(ich)),
            FeatureValue::Enum("PERSON".into())
        );
        assert_eq!(
            eval("annotation_head_number", &d, FeatureInput::Annotation(ich)),
            FeatureValue::Enum("pl".into())
        );
    }

    #[test]
    fn test_pair_features() {
        let (d, ids) = doc();
        let (a, b) = (d.annotation(ids[0]).unwrap(), d.annotation(ids[3]).unwrap());
        assert_eq!(eval("pair_token_distance", &d, FeatureInput::Pair(a, b)), FeatureValue::Int(9));
        assert_eq!(eval("pair_same_category", &d, FeatureInput::Pair(a, b)), FeatureValue::Bool(true));
        assert_eq!(eval("pair_same_base", &d, FeatureInput::Pair(a, a)), FeatureValue::Bool(true));
    }

    #[test]
    fn test_number_match_share() {
        let (d, ids) = doc();
        let mut cluster = AnnotationCluster::new(ids[0]);
        cluster.push(ids[2]);
        let maria = d.annotation(ids[3]).unwrap();
        let input = FeatureInput::ClusterMention { mention: maria, cluster: &cluster };
        assert_eq!(eval("clustermention_number_match", &d, input), FeatureValue::Float(0.5));
        assert_eq!(eval("clustermention_cluster_size", &d, input), FeatureValue::Int(2));
        assert_eq!(
            eval("clustermention_closest_preceding_number", &d, input),
            FeatureValue::Enum("pl".into())
        );
        assert_eq!(
            eval("clustermention_closest_preceding_distance", &d, input),
            FeatureValue::Int(4)
        );
    }

    #[test]
    fn test_coordinate_conjunction_lookback() {
        let (d, ids) = doc();
        let piotr_cluster = AnnotationCluster::new(ids[1]);
        let jan_cluster = AnnotationCluster::new(ids[0]);
        let maria = d.annotation(ids[3]).unwrap();
        let name = "clustermention_closest_preceding_preceded_by_coord_conj";
        assert_eq!(
            eval(name, &d, FeatureInput::ClusterMention { mention: maria, cluster: &piotr_cluster }),
            FeatureValue::Bool(true)
        );
        assert_eq!(
            eval(name, &d, FeatureInput::ClusterMention { mention: maria, cluster: &jan_cluster }),
            FeatureValue::Bool(false)
        );
    }

    #[test]
    fn test_undefined_cluster_feature_uses_default() {
        let (d, ids) = doc();
        // cluster sem menção anterior a "Jan"
        let later = AnnotationCluster::new(ids[3]);
        let jan = d.annotation(ids[0]).unwrap();
        let input = FeatureInput::ClusterMention { mention: jan, cluster: &later };
        assert_eq!(eval("clustermention_closest_preceding_distance", &d, input), FeatureValue::Int(0));
        assert_eq!(
            eval("clustermention_closest_preceding_number", &d, input),
            FeatureValue::Enum("OTHER".into())
        );
    }
}
