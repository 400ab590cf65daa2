//! # Extração de Features
//!
//! Uma feature é uma função pura que, dado um *input*, calcula um único valor tipado.
//! Há três formatos de input:
//!
//! | [`InputKind`]       | Input                                  | Uso típico                    |
//! |---------------------|----------------------------------------|-------------------------------|
//! | `Annotation`        | uma anotação                           | propriedades da menção        |
//! | `Pair`              | par ordenado de anotações              | modelos mention-pair          |
//! | `ClusterMention`    | (menção, cluster candidato)            | resolvedor sequencial         |
//!
//! E quatro tipos de saída ([`ValueKind`]): booleano, inteiro, real e enumeração fechada.
//!
//! O framework cuida de:
//!
//! 1. registro e busca por nome ([`FeatureRegistry`]);
//! 2. enumeração dos valores legais de features enumeradas (necessário para one-hot);
//! 3. avaliação em lote de uma lista configurada ([`FeatureSet`]), com colunas em ordem fixa;
//! 4. valor padrão do próprio tipo quando a feature é indefinida para o input.
//!
//! Features nunca alteram o modelo: recebem `&Document`.

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AnotadorError, Result};
use crate::model::{Annotation, AnnotationCluster, Document};

/// Valor calculado por uma feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FeatureValue::Int(i) => Some(*i as f64),
            FeatureValue::Float(f) => Some(*f),
            FeatureValue::Enum(_) => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Bool(b) => write!(f, "{b}"),
            FeatureValue::Int(i) => write!(f, "{i}"),
            FeatureValue::Float(x) => write!(f, "{x}"),
            FeatureValue::Enum(s) => f.write_str(s),
        }
    }
}

/// Tipo declarado da saída de uma feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    /// Enumeração fechada; `default` precisa estar em `values`.
    Enumeration { values: Vec<String>, default: String },
}

impl ValueKind {
    /// Enumeração cujo padrão é o último valor da lista.
    pub fn enumeration(values: &[&str]) -> Self {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let default = values.last().cloned().unwrap_or_default();
        ValueKind::Enumeration { values, default }
    }

    /// Valor "desconhecido" do tipo, usado quando a feature é indefinida.
    pub fn default_value(&self) -> FeatureValue {
        match self {
            ValueKind::Bool => FeatureValue::Bool(false),
            ValueKind::Int => FeatureValue::Int(0),
            ValueKind::Float => FeatureValue::Float(0.0),
            ValueKind::Enumeration { default, .. } => FeatureValue::Enum(default.clone()),
        }
    }

    /// Verifica se o valor pertence ao tipo.
    pub fn accepts(&self, value: &FeatureValue) -> bool {
        match (self, value) {
            (ValueKind::Bool, FeatureValue::Bool(_))
            | (ValueKind::Int, FeatureValue::Int(_))
            | (ValueKind::Float, FeatureValue::Float(_)) => true,
            (ValueKind::Enumeration { values, .. }, FeatureValue::Enum(v)) => values.contains(v),
            _ => false,
        }
    }

    /// Todos os valores legais. Tipos numéricos têm domínio aberto: lista vazia.
    pub fn legal_values(&self) -> Vec<FeatureValue> {
        match self {
            ValueKind::Bool => vec![FeatureValue::Bool(false), FeatureValue::Bool(true)],
            ValueKind::Int | ValueKind::Float => Vec::new(),
            ValueKind::Enumeration { values, .. } => {
                values.iter().cloned().map(FeatureValue::Enum).collect()
            }
        }
    }
}

/// Formato de input aceito por uma feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Annotation,
    Pair,
    ClusterMention,
}

/// Input concreto de uma avaliação.
#[derive(Debug, Clone, Copy)]
pub enum FeatureInput<'a> {
    Annotation(&'a Annotation),
    Pair(&'a Annotation, &'a Annotation),
    ClusterMention {
        mention: &'a Annotation,
        cluster: &'a AnnotationCluster,
    },
}

impl FeatureInput<'_> {
    pub fn kind(&self) -> InputKind {
        match self {
            FeatureInput::Annotation(_) => InputKind::Annotation,
            FeatureInput::Pair(..) => InputKind::Pair,
            FeatureInput::ClusterMention { .. } => InputKind::ClusterMention,
        }
    }
}

type AnnotationFn = dyn Fn(&Document, &Annotation) -> Option<FeatureValue> + Send + Sync;
type PairFn = dyn Fn(&Document, &Annotation, &Annotation) -> Option<FeatureValue> + Send + Sync;
type ClusterMentionFn =
    dyn Fn(&Document, &Annotation, &AnnotationCluster) -> Option<FeatureValue> + Send + Sync;

enum Compute {
    Annotation(Box<AnnotationFn>),
    Pair(Box<PairFn>),
    ClusterMention(Box<ClusterMentionFn>),
}

/// Uma feature registrada: `{nome, tipo de input, tipo de saída, função}`.
pub struct Feature {
    name: String,
    output: ValueKind,
    compute: Compute,
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("input", &self.input_kind())
            .field("output", &self.output)
            .finish()
    }
}

impl Feature {
    pub fn annotation<F>(name: impl Into<String>, output: ValueKind, f: F) -> Self
    where
        F: Fn(&Document, &Annotation) -> Option<FeatureValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            output,
            compute: Compute::Annotation(Box::new(f)),
        }
    }

    pub fn pair<F>(name: impl Into<String>, output: ValueKind, f: F) -> Self
    where
        F: Fn(&Document, &Annotation, &Annotation) -> Option<FeatureValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            output,
            compute: Compute::Pair(Box::new(f)),
        }
    }

    pub fn cluster_mention<F>(name: impl Into<String>, output: ValueKind, f: F) -> Self
    where
        F: Fn(&Document, &Annotation, &AnnotationCluster) -> Option<FeatureValue>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            output,
            compute: Compute::ClusterMention(Box::new(f)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &ValueKind {
        &self.output
    }

    pub fn input_kind(&self) -> InputKind {
        match self.compute {
            Compute::Annotation(_) => InputKind::Annotation,
            Compute::Pair(_) => InputKind::Pair,
            Compute::ClusterMention(_) => InputKind::ClusterMention,
        }
    }

    /// Calcula o valor; input de formato errado é erro de configuração.
    ///
    /// Computação indefinida ou valor fora do tipo declarado resultam no valor padrão.
    pub fn evaluate(&self, document: &Document, input: &FeatureInput<'_>) -> Result<FeatureValue> {
        let computed = match (&self.compute, input) {
            (Compute::Annotation(f), FeatureInput::Annotation(a)) => f(document, a),
            (Compute::Pair(f), FeatureInput::Pair(a, b)) => f(document, a, b),
            (Compute::ClusterMention(f), FeatureInput::ClusterMention { mention, cluster }) => {
                f(document, mention, cluster)
            }
            _ => {
                return Err(AnotadorError::config(format!(
                    "feature '{}' espera input {:?}, recebeu {:?}",
                    self.name,
                    self.input_kind(),
                    input.kind()
                )))
            }
        };
        Ok(match computed {
            Some(value) if self.output.accepts(&value) => value,
            Some(value) => {
                warn!(feature = %self.name, %value, "valor fora do tipo declarado, usando padrão");
                self.output.default_value()
            }
            None => {
                debug!(feature = %self.name, "feature indefinida para o input");
                self.output.default_value()
            }
        })
    }
}

/// Catálogo de features por nome.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    features: Vec<Arc<Feature>>,
    index: HashMap<String, usize>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registro com todas as features de [`builtin`]; `categories` fecha a enumeração
    /// de `annotation_category`.
    pub fn with_builtins(categories: &[String]) -> Self {
        let mut registry = Self::new();
        for feature in builtin::all(categories) {
            // nomes internos são únicos
            let _ = registry.register(feature);
        }
        registry
    }

    /// Registra uma feature; nomes repetidos e enumerações inconsistentes são rejeitados.
    pub fn register(&mut self, feature: Feature) -> Result<()> {
        if self.index.contains_key(feature.name()) {
            return Err(AnotadorError::config(format!(
                "feature '{}' registrada duas vezes",
                feature.name()
            )));
        }
        if let ValueKind::Enumeration { values, default } = feature.output() {
            if !values.contains(default) {
                return Err(AnotadorError::config(format!(
                    "feature '{}': valor padrão '{default}' fora da enumeração",
                    feature.name()
                )));
            }
        }
        self.index.insert(feature.name().to_string(), self.features.len());
        self.features.push(Arc::new(feature));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Feature>> {
        self.index
            .get(name)
            .map(|&i| &self.features[i])
            .ok_or_else(|| AnotadorError::UnknownFeature(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Nomes registrados, em ordem de registro.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Valores legais da feature (vazio para tipos numéricos).
    pub fn legal_values(&self, name: &str) -> Result<Vec<FeatureValue>> {
        Ok(self.get(name)?.output().legal_values())
    }

    /// Monta um conjunto ordenado; todas as features precisam ter o mesmo tipo de input.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<FeatureSet> {
        let Some(first) = names.first() else {
            return Err(AnotadorError::config("lista de features vazia"));
        };
        let input = self.get(first.as_ref())?.input_kind();
        let mut features = Vec::with_capacity(names.len());
        for name in names {
            let feature = self.get(name.as_ref())?;
            if feature.input_kind() != input {
                return Err(AnotadorError::config(format!(
                    "feature '{}' tem input {:?}, o conjunto usa {:?}",
                    feature.name(),
                    feature.input_kind(),
                    input
                )));
            }
            features.push(Arc::clone(feature));
        }
        let schema = Arc::new(Schema {
            columns: features
                .iter()
                .map(|f| (f.name().to_string(), f.output().clone()))
                .collect(),
        });
        Ok(FeatureSet {
            input,
            features,
            schema,
        })
    }
}

/// Nomes e tipos das colunas de um [`FeatureSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<(String, ValueKind)>,
}

/// Lista configurada de features com colunas em ordem fixa.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    input: InputKind,
    features: Vec<Arc<Feature>>,
    schema: Arc<Schema>,
}

impl FeatureSet {
    pub fn input_kind(&self) -> InputKind {
        self.input
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name()).collect()
    }

    /// Avalia todas as features, na ordem do conjunto.
    pub fn extract(&self, document: &Document, input: &FeatureInput<'_>) -> Result<FeatureVector> {
        let values = self
            .features
            .iter()
            .map(|f| f.evaluate(document, input))
            .collect::<Result<Vec<_>>>()?;
        Ok(FeatureVector {
            schema: Arc::clone(&self.schema),
            values,
        })
    }

    /// Um vetor por input, na mesma ordem.
    pub fn extract_batch(
        &self,
        document: &Document,
        inputs: &[FeatureInput<'_>],
    ) -> Result<Vec<FeatureVector>> {
        inputs.iter().map(|input| self.extract(document, input)).collect()
    }
}

/// Valores de um [`FeatureSet`] para um input.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Arc<Schema>,
    values: Vec<FeatureValue>,
}

impl FeatureVector {
    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schema.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        let i = self.schema.columns.iter().position(|(n, _)| n == name)?;
        self.values.get(i)
    }

    /// Colunas numéricas: números como estão, booleanos como 0/1 e enumerações em
    /// one-hot (`nome=valor`, uma coluna por valor legal).
    pub fn to_numeric(&self) -> Vec<(String, f64)> {
        let mut columns = Vec::new();
        for ((name, kind), value) in self.schema.columns.iter().zip(&self.values) {
            match (kind, value) {
                (ValueKind::Enumeration { values, .. }, FeatureValue::Enum(v)) => {
                    for legal in values {
                        columns.push((format!("{name}={legal}"), if legal == v { 1.0 } else { 0.0 }));
                    }
                }
                _ => columns.push((name.clone(), value.as_f64().unwrap_or(0.0))),
            }
        }
        columns
    }

    /// Produto escalar das colunas numéricas com um vetor de pesos esparso.
    ///
    /// $$ \text{score} = \sum (w_i \cdot f_i) $$
    pub fn dot(&self, weights: &HashMap<String, f64>) -> f64 {
        self.to_numeric()
            .iter()
            .map(|(k, v)| v * weights.get(k).unwrap_or(&0.0))
            .sum()
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for ((name, _), value) in self.schema.columns.iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
