//! # Classificador de Instâncias
//!
//! O resolvedor de correferência enxerga o classificador apenas pelo trait [`Classifier`]:
//! recebe os vetores de features de uma menção (um por cluster candidato) e devolve um
//! rótulo inteiro por vetor, na mesma ordem. Qualquer rótulo maior que [`REJECTED`]
//! conta como candidato aceito.
//!
//! [`LinearClassifier`] é a implementação embutida: pesos esparsos por coluna numérica
//! (ver [`FeatureVector::to_numeric`]) mais um viés, treinável com o perceptron médio.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AnotadorError, Result};
use crate::features::FeatureVector;

/// Rótulo de rejeição; rótulos maiores significam "aceito".
pub const REJECTED: i64 = 0;

/// Rótulo emitido por [`LinearClassifier`] para instâncias aceitas.
pub const ACCEPTED: i64 = 1;

pub fn is_accepted(label: i64) -> bool {
    label > REJECTED
}

/// Capacidade de classificação em lote.
///
/// A saída precisa ter o mesmo tamanho e ordem da entrada.
pub trait Classifier: Send + Sync {
    fn classify(&self, instances: &[FeatureVector]) -> Result<Vec<i64>>;
}

/// Classificador linear: aceita quando `w · x + b > 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
}

impl LinearClassifier {
    pub fn new(weights: HashMap<String, f64>, bias: f64) -> Self {
        Self { weights, bias }
    }

    /// Carrega o modelo de um arquivo JSON (`{"weights": {...}, "bias": ...}`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&content)?;
        if model.weights.values().chain([&model.bias]).any(|w| !w.is_finite()) {
            return Err(AnotadorError::classifier(format!(
                "modelo {} contém pesos não finitos",
                path.display()
            )));
        }
        info!(path = %path.display(), weights = model.weights.len(), "classificador carregado");
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn score(&self, instance: &FeatureVector) -> f64 {
        instance.dot(&self.weights) + self.bias
    }

    /// Treina com o perceptron médio sobre exemplos `(vetor, aceito?)`.
    ///
    /// O modelo final usa a média dos pesos de todos os passos, o que estabiliza
    /// o resultado quando os dados não são linearmente separáveis.
    pub fn train(examples: &[(FeatureVector, bool)], iterations: usize) -> Self {
        let mut current = Self::default();
        let mut total = Self::default();
        let mut steps = 0usize;

        for epoch in 0..iterations {
            let mut mistakes = 0;
            for (instance, accepted) in examples {
                let predicted = current.score(instance) > 0.0;
                if predicted != *accepted {
                    mistakes += 1;
                    let delta = if *accepted { 1.0 } else { -1.0 };
                    for (name, value) in instance.to_numeric() {
                        *current.weights.entry(name).or_insert(0.0) += delta * value;
                    }
                    current.bias += delta;
                }
                for (name, w) in &current.weights {
                    *total.weights.entry(name.clone()).or_insert(0.0) += w;
                }
                total.bias += current.bias;
                steps += 1;
            }
            debug!(epoch, mistakes, "época do perceptron");
            if mistakes == 0 {
                break;
            }
        }

        if steps > 0 {
            let n = steps as f64;
            for w in total.weights.values_mut() {
                *w /= n;
            }
            total.bias /= n;
        }
        total
    }
}

impl Classifier for LinearClassifier {
    fn classify(&self, instances: &[FeatureVector]) -> Result<Vec<i64>> {
        Ok(instances
            .iter()
            .map(|x| if self.score(x) > 0.0 { ACCEPTED } else { REJECTED })
            .collect())
    }
}
